//! Contains the structs and traits that define a storage back-end.
//!
//! The engine never persists anything itself. It only asks the
//! back-end whether resources exist, what they are, and to create,
//! copy, move or remove them. Every method may fail; the engine maps
//! the `FsError` onto a per-resource protocol status.
use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dyn_clone::{DynClone, clone_trait_object};
use futures_util::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

use crate::davpath::DavPath;

macro_rules! notimplemented {
    ($method:expr) => {
        future::ready(Err(FsError::NotImplemented)).boxed()
    };
}

/// Errors generated by a storage back-end or property store.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Operation not implemented (501)
    #[error("not implemented")]
    NotImplemented,
    /// Something went wrong (500)
    #[error("general failure")]
    GeneralFailure,
    /// Tried to create something, but it existed (405 / 412)
    #[error("resource exists")]
    Exists,
    /// Tried to do something on a non-existing resource (404)
    #[error("not found")]
    NotFound,
    /// Structural problem, e.g. a missing parent collection (409)
    #[error("conflict")]
    Conflict,
    /// Not allowed (403)
    #[error("forbidden")]
    Forbidden,
    /// Out of space (507)
    #[error("insufficient storage")]
    InsufficientStorage,
    /// Cyclic structure while walking a tree (508)
    #[error("loop detected")]
    LoopDetected,
    /// The path is too long (414)
    #[error("path too long")]
    PathTooLong,
    /// The file being PUT is too large (413)
    #[error("too large")]
    TooLarge,
    /// Trying to MOVE over a mount boundary (EXDEV) (502)
    #[error("is remote")]
    IsRemote,
}

/// The Result type.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Future returned by almost all of the storage methods.
pub type FsFuture<'a, T> = BoxFuture<'a, FsResult<T>>;

/// The trait that defines a storage back-end.
pub trait DavFileSystem: Debug + Send + Sync + DynClone {
    /// Return the metadata of a resource. `FsError::NotFound` means
    /// the resource does not exist.
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>>;

    /// List the direct members of a collection.
    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>>;

    /// Read the content of a regular resource.
    fn read<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes>;

    /// Replace the content of a regular resource, creating it if needed.
    /// The parent collection must exist (`FsError::Conflict` otherwise).
    fn write<'a>(&'a self, path: &'a DavPath, data: Bytes) -> FsFuture<'a, ()>;

    /// Create a collection. The parent collection must exist.
    #[allow(unused_variables)]
    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("create_dir")
    }

    /// Remove an empty collection.
    #[allow(unused_variables)]
    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_dir")
    }

    /// Remove a regular resource.
    #[allow(unused_variables)]
    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("remove_file")
    }

    /// Copy a single node. A regular resource is copied with its content,
    /// a collection is copied as an empty collection. An existing
    /// destination node of the same kind is replaced.
    #[allow(unused_variables)]
    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("copy")
    }

    /// Move a node and everything below it.
    #[allow(unused_variables)]
    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        notimplemented!("rename")
    }

    /// Does the resource exist.
    fn exists<'a>(&'a self, path: &'a DavPath) -> BoxFuture<'a, bool> {
        self.metadata(path).map(|r| r.is_ok()).boxed()
    }
}

clone_trait_object! {DavFileSystem}

/// One member of a collection, as returned by `read_dir`.
#[derive(Debug, Clone)]
pub struct DavDirEntry {
    /// Name of the member (one path segment, not encoded).
    pub name: Vec<u8>,
    /// Metadata of the member.
    pub meta: Box<dyn DavMetaData>,
}

/// Metadata of a resource.
pub trait DavMetaData: Debug + Send + Sync + DynClone {
    /// Size of the content in bytes.
    fn len(&self) -> u64;
    /// Last modification time.
    fn modified(&self) -> FsResult<SystemTime>;
    /// Is this a collection.
    fn is_dir(&self) -> bool;

    /// Entity tag, derived from size and modification time.
    fn etag(&self) -> Option<String> {
        if let Ok(t) = self.modified() {
            if let Ok(t) = t.duration_since(UNIX_EPOCH) {
                let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
                if self.is_file() {
                    return Some(format!("{:x}-{:x}", self.len(), t));
                } else {
                    return Some(format!("{:x}", t));
                }
            }
        }
        None
    }

    /// Is this a regular resource.
    fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Is the content empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creation time.
    fn created(&self) -> FsResult<SystemTime> {
        Err(FsError::NotImplemented)
    }
}

clone_trait_object! {DavMetaData}
