//! Simple in-memory locksystem.
//!
//! This implementation has state - if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemLs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemLs struct is just a handle, cloning is cheap.
//!
//! All lock state sits behind a single mutex. Acquiring a deep lock checks
//! the whole subtree and inserts the lock while holding it, so a lock is
//! either granted completely or not at all. Expired locks are dropped
//! whenever a check passes over them; `spawn_sweeper` can reclaim the
//! rest periodically.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use xmltree::Element;

use crate::davpath::DavPath;
use crate::ls::*;
use crate::tree;

type Tree = tree::Tree<Vec<u8>, Vec<DavLock>>;

/// Ephemeral in-memory LockSystem.
#[derive(Debug, Clone)]
pub struct MemLs(Arc<Mutex<MemLsInner>>);

#[derive(Debug)]
struct MemLsInner {
    tree: Tree,
    // token -> id of the node that holds the lock.
    tokens: HashMap<String, u64>,
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Box<MemLs> {
        let inner = MemLsInner {
            tree: Tree::new(Vec::new()),
            tokens: HashMap::new(),
        };
        Box::new(MemLs(Arc::new(Mutex::new(inner))))
    }

    /// Start a tokio task that drops expired locks every `interval`.
    ///
    /// The task only keeps a weak reference and ends once the last
    /// clone of this `MemLs` is gone.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.0);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let n = inner.lock().sweep(SystemTime::now());
                if n > 0 {
                    debug!("memls sweeper: removed {} expired locks", n);
                }
            }
        })
    }

    /// Number of live locks.
    pub fn len(&self) -> usize {
        self.0.lock().tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DavLockSystem for MemLs {
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        scope: LockScope,
        depth: LockDepth,
    ) -> Result<DavLock, LockError> {
        let now = SystemTime::now();
        let inner = &mut *self.0.lock();
        let deep = depth == LockDepth::Infinity;
        let shared = scope == LockScope::Shared;
        inner.purge_path(path, deep, now);

        // any locks in the path?
        let rc = check_locks_to_path(&inner.tree, path, None, true, &[], shared);
        trace!("lock: check_locks_to_path: {:?}", rc.as_ref().map_err(|l| &l.token));
        rc.map_err(|l| LockError::Conflict(Box::new(l)))?;

        // if it's a deep lock we need to check if there are locks further along the path.
        if deep {
            let rc = check_locks_from_path(&inner.tree, path, None, true, &[], shared);
            trace!("lock: check_locks_from_path: {:?}", rc.as_ref().map_err(|l| &l.token));
            rc.map_err(|l| LockError::Conflict(Box::new(l)))?;
        }

        let lock = DavLock {
            token: Uuid::new_v4().urn().to_string(),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: timeout.map(|d| now + d),
            timeout,
            scope,
            depth,
        };
        let node_id = inner.get_or_create_node(path).ok_or(LockError::NotFound)?;
        inner.tree.get_node_mut(node_id).map_err(|_| LockError::NotFound)?.push(lock.clone());
        inner.tokens.insert(lock.token.clone(), node_id);
        trace!("lock {} created", &lock.token);
        Ok(lock)
    }

    fn unlock(&self, path: &DavPath, token: &str) -> Result<(), LockError> {
        let now = SystemTime::now();
        let inner = &mut *self.0.lock();
        let (node_id, idx) = inner.find_live(token, now).ok_or_else(|| {
            trace!("unlock: {} not found at {}", token, path);
            LockError::NotFound
        })?;
        let node = inner.tree.get_node_mut(node_id).map_err(|_| LockError::NotFound)?;
        if !covers(&node[idx], path) {
            trace!("unlock: {} does not cover {}", token, path);
            return Err(LockError::WrongPath);
        }
        node.remove(idx);
        inner.tokens.remove(token);
        inner.prune(node_id);
        Ok(())
    }

    fn refresh(&self, path: &DavPath, token: &str, timeout: Option<Duration>) -> Result<DavLock, LockError> {
        trace!("refresh lock {}", token);
        let now = SystemTime::now();
        let inner = &mut *self.0.lock();
        let (node_id, idx) = inner.find_live(token, now).ok_or(LockError::NotFound)?;
        let node = inner.tree.get_node_mut(node_id).map_err(|_| LockError::NotFound)?;
        let lock = &mut node[idx];
        if !covers(lock, path) {
            trace!("refresh: {} does not cover {}", token, path);
            return Err(LockError::NotFound);
        }
        lock.timeout = timeout;
        lock.timeout_at = timeout.map(|d| now + d);
        Ok(lock.clone())
    }

    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        ignore_principal: bool,
        deep: bool,
        submitted_tokens: &[String],
    ) -> Result<(), LockError> {
        let inner = &mut *self.0.lock();
        inner.purge_path(path, deep, SystemTime::now());
        let rc = check_locks_to_path(
            &inner.tree,
            path,
            principal,
            ignore_principal,
            submitted_tokens,
            false,
        );
        trace!("check: check_locks_to_path: {:?}: {:?}", submitted_tokens, rc.as_ref().map_err(|l| &l.token));
        rc.map_err(|l| LockError::Conflict(Box::new(l)))?;

        if deep {
            let rc = check_locks_from_path(
                &inner.tree,
                path,
                principal,
                ignore_principal,
                submitted_tokens,
                false,
            );
            trace!("check: check_locks_from_path: {:?}", rc.as_ref().map_err(|l| &l.token));
            rc.map_err(|l| LockError::Conflict(Box::new(l)))?;
        }
        Ok(())
    }

    fn discover(&self, path: &DavPath) -> Vec<DavLock> {
        let inner = &mut *self.0.lock();
        inner.purge_path(path, false, SystemTime::now());
        let (ids, complete) = inner.nodes_to_path(path);
        let last = ids.len() - 1;
        let mut locks = Vec::new();
        for (i, id) in ids.into_iter().enumerate() {
            let target = complete && i == last;
            if let Ok(node) = inner.tree.get_node(id) {
                locks.extend(node.iter().filter(|l| target || l.is_deep()).cloned());
            }
        }
        locks
    }

    fn delete(&self, path: &DavPath) {
        let inner = &mut *self.0.lock();
        let Some(node_id) = inner.lookup_node(path) else {
            return;
        };
        if node_id == tree::ROOT_ID {
            inner.tree = Tree::new(Vec::new());
            inner.tokens.clear();
            return;
        }
        let parent_id = inner.tree.parent_id(node_id);
        if let Ok(removed) = inner.tree.delete_subtree(node_id) {
            for l in removed.iter().flatten() {
                inner.tokens.remove(&l.token);
            }
        }
        if let Some(parent_id) = parent_id {
            inner.prune(parent_id);
        }
    }

    fn sweep(&self) -> usize {
        self.0.lock().sweep(SystemTime::now())
    }
}

impl MemLsInner {
    // Find node ID for path.
    fn lookup_node(&self, path: &DavPath) -> Option<u64> {
        let mut node_id = tree::ROOT_ID;
        for seg in path.segments() {
            node_id = self.tree.get_child(node_id, seg).ok()?;
        }
        Some(node_id)
    }

    // Node IDs from the root towards `path`, as far as they exist.
    // The flag tells whether the last one is the node for `path` itself.
    fn nodes_to_path(&self, path: &DavPath) -> (Vec<u64>, bool) {
        let mut ids = vec![tree::ROOT_ID];
        let mut node_id = tree::ROOT_ID;
        for seg in path.segments() {
            node_id = match self.tree.get_child(node_id, seg) {
                Ok(n) => n,
                Err(_) => return (ids, false),
            };
            ids.push(node_id);
        }
        (ids, true)
    }

    fn get_or_create_node(&mut self, path: &DavPath) -> Option<u64> {
        let mut node_id = tree::ROOT_ID;
        for seg in path.segments() {
            node_id = match self.tree.get_child(node_id, seg) {
                Ok(n) => n,
                Err(_) => self.tree.add_child(node_id, seg.to_vec(), Vec::new()).ok()?,
            };
        }
        Some(node_id)
    }

    // Locate a token that has not expired yet. An expired one is dropped.
    fn find_live(&mut self, token: &str, now: SystemTime) -> Option<(u64, usize)> {
        let node_id = *self.tokens.get(token)?;
        if self.purge_node(node_id, now) > 0 {
            self.prune(node_id);
        }
        let idx = self.tree.get_node(node_id).ok()?.iter().position(|l| l.token == token)?;
        Some((node_id, idx))
    }

    // Drop the expired locks of one node.
    fn purge_node(&mut self, node_id: u64, now: SystemTime) -> usize {
        let Ok(node) = self.tree.get_node_mut(node_id) else {
            return 0;
        };
        let before = node.len();
        let mut expired = Vec::new();
        node.retain(|l| {
            if l.is_expired(now) {
                expired.push(l.token.clone());
                false
            } else {
                true
            }
        });
        for t in &expired {
            trace!("lock {} expired", t);
            self.tokens.remove(t);
        }
        before - node_len(&self.tree, node_id)
    }

    // Remove empty leaf nodes, walking up towards the root.
    fn prune(&mut self, mut node_id: u64) {
        while node_id != tree::ROOT_ID {
            let empty = self.tree.get_node(node_id).map(|n| n.is_empty()).unwrap_or(false);
            if !empty || self.tree.has_children(node_id) {
                break;
            }
            let parent_id = self.tree.parent_id(node_id);
            if self.tree.delete_node(node_id).is_err() {
                break;
            }
            match parent_id {
                Some(p) => node_id = p,
                None => break,
            }
        }
    }

    // Purge expired locks along the path, and below it if `deep`.
    fn purge_path(&mut self, path: &DavPath, deep: bool, now: SystemTime) {
        let (mut ids, complete) = self.nodes_to_path(path);
        if deep && complete {
            if let Some(&last) = ids.last() {
                ids.extend(self.descendants(last));
            }
        }
        let mut dirty = Vec::new();
        for id in ids {
            if self.purge_node(id, now) > 0 {
                dirty.push(id);
            }
        }
        for id in dirty.into_iter().rev() {
            self.prune(id);
        }
    }

    // All node ids below `node_id`, parents before children.
    fn descendants(&self, node_id: u64) -> Vec<u64> {
        let mut res = Vec::new();
        let mut stack = vec![node_id];
        while let Some(id) = stack.pop() {
            if let Ok(children) = self.tree.get_children(id) {
                for (_, c) in children.into_iter().rev() {
                    res.push(c);
                    stack.push(c);
                }
            }
        }
        res
    }

    fn sweep(&mut self, now: SystemTime) -> usize {
        let mut nodes: Vec<u64> = self.tokens.values().copied().collect();
        nodes.sort_unstable();
        nodes.dedup();
        let mut removed = 0;
        for id in nodes {
            let n = self.purge_node(id, now);
            if n > 0 {
                removed += n;
                self.prune(id);
            }
        }
        removed
    }
}

fn node_len(tree: &Tree, node_id: u64) -> usize {
    tree.get_node(node_id).map(|n| n.len()).unwrap_or(0)
}

// Does this lock apply to `path`.
fn covers(lock: &DavLock, path: &DavPath) -> bool {
    lock.path == *path || (lock.is_deep() && lock.path.is_ancestor_of(path))
}

fn holds(lock: &DavLock, principal: Option<&str>, ignore_principal: bool, submitted_tokens: &[String]) -> bool {
    submitted_tokens.iter().any(|t| *t == lock.token)
        && (ignore_principal || lock.principal.is_none() || principal == lock.principal.as_deref())
}

// check if there are any locks along the path.
fn check_locks_to_path(
    tree: &Tree,
    path: &DavPath,
    principal: Option<&str>,
    ignore_principal: bool,
    submitted_tokens: &[String],
    shared_ok: bool,
) -> Result<(), DavLock> {
    // state
    let mut holds_lock = false;
    let mut first_lock_seen: Option<&DavLock> = None;

    // walk over path segments starting at root.
    let segs = path.segments();
    let mut node_id = tree::ROOT_ID;
    for i in 0..=segs.len() {
        if i > 0 {
            node_id = match tree.get_child(node_id, segs[i - 1]) {
                Ok(n) => n,
                Err(_) => break,
            };
        }
        let Ok(node_locks) = tree.get_node(node_id) else {
            break;
        };
        let is_target = i == segs.len();

        for nl in node_locks {
            if !is_target && !nl.is_deep() {
                continue;
            }
            if holds(nl, principal, ignore_principal, submitted_tokens) {
                // fine, we hold this lock.
                holds_lock = true;
            } else {
                // exclusive locks are fatal.
                if !nl.is_shared() {
                    return Err(nl.to_owned());
                }
                // remember first shared lock seen.
                if !shared_ok {
                    first_lock_seen.get_or_insert(nl);
                }
            }
        }
    }

    // return conflicting lock on error.
    if !holds_lock {
        if let Some(first_lock_seen) = first_lock_seen {
            return Err(first_lock_seen.to_owned());
        }
    }

    Ok(())
}

// See if there are locks in any path below this collection.
fn check_locks_from_path(
    tree: &Tree,
    path: &DavPath,
    principal: Option<&str>,
    ignore_principal: bool,
    submitted_tokens: &[String],
    shared_ok: bool,
) -> Result<(), DavLock> {
    let mut node_id = tree::ROOT_ID;
    for seg in path.segments() {
        node_id = match tree.get_child(node_id, seg) {
            Ok(n) => n,
            Err(_) => return Ok(()),
        };
    }
    let mut stack = vec![node_id];
    while let Some(id) = stack.pop() {
        let Ok(children) = tree.get_children(id) else {
            continue;
        };
        for (_, child_id) in children.into_iter().rev() {
            let Ok(node_locks) = tree.get_node(child_id) else {
                continue;
            };
            let held_shared = node_locks
                .iter()
                .any(|l| l.is_shared() && holds(l, principal, ignore_principal, submitted_tokens));
            for nl in node_locks {
                if holds(nl, principal, ignore_principal, submitted_tokens) {
                    continue;
                }
                if !nl.is_shared() || (!shared_ok && !held_shared) {
                    return Err(nl.to_owned());
                }
            }
            stack.push(child_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s).unwrap()
    }

    fn lock(ls: &MemLs, path: &str, scope: LockScope, depth: LockDepth) -> Result<DavLock, LockError> {
        ls.lock(&p(path), None, None, None, scope, depth)
    }

    #[test]
    fn exclusive_excludes_everything() {
        let ls = MemLs::new();
        let l = lock(&ls, "/a/", LockScope::Exclusive, LockDepth::Infinity).unwrap();
        assert!(l.token.starts_with("urn:uuid:"));
        assert!(lock(&ls, "/a/", LockScope::Shared, LockDepth::Zero).is_err());
        assert!(lock(&ls, "/a/b", LockScope::Exclusive, LockDepth::Zero).is_err());
        assert!(lock(&ls, "/b", LockScope::Exclusive, LockDepth::Zero).is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = MemLs::new();
        let l1 = lock(&ls, "/x", LockScope::Shared, LockDepth::Zero).unwrap();
        let l2 = lock(&ls, "/x", LockScope::Shared, LockDepth::Zero).unwrap();
        assert_ne!(l1.token, l2.token);
        assert!(lock(&ls, "/x", LockScope::Exclusive, LockDepth::Zero).is_err());
        assert_eq!(ls.discover(&p("/x")).len(), 2);

        // holding one of the shared locks is enough.
        assert!(ls.check(&p("/x"), None, false, false, &[l2.token.clone()]).is_ok());
        assert!(ls.check(&p("/x"), None, false, false, &[]).is_err());
    }

    #[test]
    fn deep_lock_is_atomic() {
        let ls = MemLs::new();
        lock(&ls, "/d/e/f", LockScope::Exclusive, LockDepth::Zero).unwrap();
        match lock(&ls, "/d/", LockScope::Exclusive, LockDepth::Infinity) {
            Err(LockError::Conflict(l)) => assert_eq!(l.path, p("/d/e/f")),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(ls.discover(&p("/d/")).is_empty());
        assert_eq!(ls.len(), 1);
        // a shallow lock on the parent does not conflict.
        assert!(lock(&ls, "/d/", LockScope::Exclusive, LockDepth::Zero).is_ok());
    }

    #[test]
    fn check_with_tokens_and_principal() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/r/"), Some("alice"), None, None, LockScope::Exclusive, LockDepth::Infinity)
            .unwrap();
        let tokens = vec![l.token.clone()];
        assert!(ls.check(&p("/r/s"), Some("alice"), false, false, &tokens).is_ok());
        assert!(ls.check(&p("/r/s"), Some("bob"), false, false, &tokens).is_err());
        assert!(ls.check(&p("/r/s"), Some("bob"), true, false, &tokens).is_ok());
        assert!(ls.check(&p("/r/s"), Some("alice"), false, false, &[]).is_err());
        // a lock below the path only matters for deep checks.
        let l2 = lock(&ls, "/q/w", LockScope::Exclusive, LockDepth::Zero).unwrap();
        assert!(ls.check(&p("/q/"), None, false, false, &[]).is_ok());
        assert!(ls.check(&p("/q/"), None, false, true, &[]).is_err());
        assert!(ls.check(&p("/q/"), None, false, true, &[l2.token]).is_ok());
    }

    #[test]
    fn unlock_and_refresh() {
        let ls = MemLs::new();
        let l = lock(&ls, "/u/", LockScope::Exclusive, LockDepth::Infinity).unwrap();
        assert!(matches!(ls.unlock(&p("/u/"), "urn:uuid:nope"), Err(LockError::NotFound)));
        assert!(matches!(ls.unlock(&p("/other"), &l.token), Err(LockError::WrongPath)));
        let r = ls.refresh(&p("/u/v"), &l.token, Some(Duration::from_secs(60))).unwrap();
        assert_eq!(r.timeout, Some(Duration::from_secs(60)));
        assert!(ls.unlock(&p("/u/v"), &l.token).is_ok());
        assert!(matches!(ls.unlock(&p("/u/"), &l.token), Err(LockError::NotFound)));
        assert!(matches!(ls.refresh(&p("/u/"), &l.token, None), Err(LockError::NotFound)));
        assert!(ls.is_empty());
    }

    #[test]
    fn expired_locks_are_gone() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/t"), None, None, Some(Duration::ZERO), LockScope::Exclusive, LockDepth::Zero)
            .unwrap();
        assert!(ls.discover(&p("/t")).is_empty());
        assert!(lock(&ls, "/t", LockScope::Exclusive, LockDepth::Zero).is_ok());
        assert!(matches!(ls.unlock(&p("/t"), &l.token), Err(LockError::NotFound)));

        let ls = MemLs::new();
        ls.lock(&p("/s1"), None, None, Some(Duration::ZERO), LockScope::Shared, LockDepth::Zero)
            .unwrap();
        ls.lock(&p("/s2"), None, None, None, LockScope::Shared, LockDepth::Zero)
            .unwrap();
        assert_eq!(ls.sweep(), 1);
        assert_eq!(ls.len(), 1);
    }

    #[test]
    fn delete_subtree() {
        let ls = MemLs::new();
        lock(&ls, "/a/b", LockScope::Exclusive, LockDepth::Zero).unwrap();
        lock(&ls, "/a/c/d", LockScope::Exclusive, LockDepth::Zero).unwrap();
        lock(&ls, "/e", LockScope::Exclusive, LockDepth::Zero).unwrap();
        ls.delete(&p("/a"));
        assert_eq!(ls.len(), 1);
        assert!(lock(&ls, "/a/b", LockScope::Exclusive, LockDepth::Zero).is_ok());
    }

    #[tokio::test]
    async fn sweeper_task() {
        let ls = MemLs::new();
        ls.lock(&p("/z"), None, None, Some(Duration::from_millis(1)), LockScope::Exclusive, LockDepth::Zero)
            .unwrap();
        let handle = ls.spawn_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ls.is_empty());
        drop(ls);
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
