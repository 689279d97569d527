//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are synchronous.
//! A lock manager only reasons about lock state, it never does storage
//! I/O, so every method returns instantly.
use std::fmt::Debug;
use std::time::{Duration, SystemTime};

use dyn_clone::{DynClone, clone_trait_object};
use thiserror::Error;
use xmltree::Element;

use crate::davpath::DavPath;

/// Scope of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// Depth of a lock. `Infinity` also covers all descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone)]
pub struct DavLock {
    /// Token, an `urn:uuid:` URI.
    pub token: String,
    /// Path the lock was requested against.
    pub path: DavPath,
    /// Principal that holds the lock.
    pub principal: Option<String>,
    /// Owner, as supplied by the client.
    pub owner: Option<Element>,
    /// When the lock turns stale (absolute).
    pub timeout_at: Option<SystemTime>,
    /// When the lock turns stale (relative).
    pub timeout: Option<Duration>,
    pub scope: LockScope,
    pub depth: LockDepth,
}

impl DavLock {
    pub fn is_shared(&self) -> bool {
        self.scope == LockScope::Shared
    }

    pub fn is_deep(&self) -> bool {
        self.depth == LockDepth::Infinity
    }

    /// Has the lock timed out at instant `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.timeout_at.is_some_and(|t| t <= now)
    }
}

/// Errors returned by a lock manager.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// The request conflicts with this (effective) lock.
    #[error("locked by {}", .0.token)]
    Conflict(Box<DavLock>),
    /// No live lock with that token exists.
    #[error("lock token not found")]
    NotFound,
    /// The token exists but the lock does not cover the request path.
    #[error("lock does not cover path")]
    WrongPath,
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync + DynClone {
    /// Lock a node. Returns the new lock, or the conflicting lock.
    ///
    /// A deep lock also checks all existing locks below `path`; if any
    /// of them conflicts nothing is locked at all.
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        scope: LockScope,
        depth: LockDepth,
    ) -> Result<DavLock, LockError>;

    /// Unlock a node.
    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), LockError>;

    /// Refresh lock. Returns the updated lock.
    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>) -> Result<DavLock, LockError>;

    /// Check if node is locked and if so, if we hold the locks.
    /// If not, returns one conflicting lock.
    ///
    /// With `deep` set, locks on resources below `path` are checked too.
    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), LockError>;

    /// Find and return all live locks that cover a given path.
    fn discover(&self, path: &DavPath) -> Vec<DavLock>;

    /// Delete all locks at this path and below (after MOVE or DELETE)
    fn delete(&self, path: &DavPath);

    /// Drop all expired locks. Returns the number of locks removed.
    fn sweep(&self) -> usize {
        0
    }
}

clone_trait_object! {DavLockSystem}
