//! Simple in-memory filesystem and property store.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemFs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemFs struct is just a handle, cloning is cheap.
//!
//! Dead properties are kept apart from the tree, keyed by path, so that
//! they follow the resources only through the `DavPropStore` calls the
//! engine makes.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::FutureExt;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::fs::*;
use crate::props::{DavProp, DavPropStore};
use crate::tree;

type Tree = tree::Tree<Vec<u8>, MemFsNode>;
type PropMap = HashMap<String, DavProp>;

/// Ephemeral in-memory filesystem.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<MemFsTree>>,
    props: Arc<Mutex<BTreeMap<Vec<u8>, PropMap>>>,
}

#[derive(Debug)]
struct MemFsTree {
    tree: Tree,
    used: u64,
    quota: Option<u64>,
}

#[derive(Debug, Clone)]
enum MemFsNode {
    Dir(MemFsDirNode),
    File(MemFsFileNode),
}

#[derive(Debug, Clone)]
struct MemFsDirNode {
    mtime: SystemTime,
    crtime: SystemTime,
}

#[derive(Debug, Clone)]
struct MemFsFileNode {
    mtime: SystemTime,
    crtime: SystemTime,
    data: Bytes,
}

#[derive(Debug, Clone)]
struct MemFsMeta {
    mtime: SystemTime,
    crtime: SystemTime,
    is_dir: bool,
    size: u64,
}

impl MemFs {
    /// Create a new "memfs" filesystem.
    pub fn new() -> Box<MemFs> {
        MemFs::build(None)
    }

    /// Create a new "memfs" filesystem that holds at most `bytes` bytes
    /// of file content. Writes beyond that fail with
    /// `FsError::InsufficientStorage`.
    pub fn with_quota(bytes: u64) -> Box<MemFs> {
        MemFs::build(Some(bytes))
    }

    fn build(quota: Option<u64>) -> Box<MemFs> {
        let tree = MemFsTree {
            tree: Tree::new(MemFsNode::new_dir()),
            used: 0,
            quota,
        };
        Box::new(MemFs {
            tree: Arc::new(Mutex::new(tree)),
            props: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }
}

impl DavFileSystem for MemFs {
    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let t = self.tree.lock();
            let node_id = t.tree.lookup(path)?;
            let meta = t.tree.get_node(node_id)?.meta();
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }

    fn read_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavDirEntry>> {
        async move {
            let t = self.tree.lock();
            let node_id = t.tree.lookup(path)?;
            if !t.tree.get_node(node_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            let mut v = Vec::new();
            for (name, child_id) in t.tree.get_children(node_id)? {
                if let Ok(node) = t.tree.get_node(child_id) {
                    v.push(DavDirEntry {
                        name,
                        meta: Box::new(node.meta()),
                    });
                }
            }
            Ok(v)
        }
        .boxed()
    }

    fn read<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes> {
        async move {
            let t = self.tree.lock();
            let node_id = t.tree.lookup(path)?;
            Ok(t.tree.get_node(node_id)?.as_file()?.data.clone())
        }
        .boxed()
    }

    fn write<'a>(&'a self, path: &'a DavPath, data: Bytes) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: write {:?} ({} bytes)", path, data.len());
            let t = &mut *self.tree.lock();
            let now = SystemTime::now();
            match t.tree.lookup(path) {
                Ok(node_id) => {
                    let old = t.tree.get_node(node_id)?.as_file()?.data.len() as u64;
                    t.reserve(data.len() as u64, old)?;
                    let file = t.tree.get_node_mut(node_id)?.as_file_mut()?;
                    file.data = data;
                    file.mtime = now;
                }
                Err(FsError::NotFound) => {
                    let parent_id = t.tree.lookup_parent(path)?;
                    t.reserve(data.len() as u64, 0)?;
                    let node = MemFsNode::File(MemFsFileNode {
                        mtime: now,
                        crtime: now,
                        data,
                    });
                    t.tree.add_child(parent_id, path.file_name().to_vec(), node)?;
                    t.tree.get_node_mut(parent_id)?.update_mtime(now);
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
        .boxed()
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: create_dir {:?}", path);
            let t = &mut *self.tree.lock();
            if path.is_root() {
                return Err(FsError::Exists);
            }
            let parent_id = t.tree.lookup_parent(path)?;
            t.tree.add_child(parent_id, path.file_name().to_vec(), MemFsNode::new_dir())?;
            t.tree.get_node_mut(parent_id)?.update_mtime(SystemTime::now());
            Ok(())
        }
        .boxed()
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let t = &mut *self.tree.lock();
            let node_id = t.tree.lookup(path)?;
            let size = t.tree.get_node(node_id)?.as_file()?.data.len() as u64;
            t.remove(node_id)?;
            t.used -= size.min(t.used);
            Ok(())
        }
        .boxed()
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let t = &mut *self.tree.lock();
            let node_id = t.tree.lookup(path)?;
            if node_id == tree::ROOT_ID || !t.tree.get_node(node_id)?.is_dir() {
                return Err(FsError::Forbidden);
            }
            t.remove(node_id)
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: copy {:?} -> {:?}", from, to);
            let t = &mut *self.tree.lock();
            let now = SystemTime::now();
            let snode_id = t.tree.lookup(from)?;
            let mut node = t.tree.get_node(snode_id)?.clone();
            match node {
                MemFsNode::Dir(ref mut d) => {
                    d.crtime = now;
                    d.mtime = now;
                }
                MemFsNode::File(ref mut f) => {
                    f.crtime = now;
                    f.mtime = now;
                }
            }
            let size = node.size();

            match t.tree.lookup(to) {
                Ok(dnode_id) => {
                    let dnode = t.tree.get_node(dnode_id)?;
                    if dnode.is_dir() != node.is_dir() {
                        return Err(FsError::Exists);
                    }
                    // copying a collection onto a collection keeps its members.
                    if !node.is_dir() {
                        let old = dnode.size();
                        t.reserve(size, old)?;
                        *t.tree.get_node_mut(dnode_id)? = node;
                    }
                }
                Err(FsError::NotFound) => {
                    let parent_id = t.tree.lookup_parent(to)?;
                    t.reserve(size, 0)?;
                    t.tree.add_child(parent_id, to.file_name().to_vec(), node)?;
                    t.tree.get_node_mut(parent_id)?.update_mtime(now);
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: rename {:?} -> {:?}", from, to);
            let t = &mut *self.tree.lock();
            let now = SystemTime::now();
            let node_id = t.tree.lookup(from)?;
            if node_id == tree::ROOT_ID {
                return Err(FsError::Forbidden);
            }
            let parent_id = t.tree.lookup_parent(from)?;
            let dst_id = t.tree.lookup_parent(to)?;
            let replaced = match t.tree.lookup(to) {
                Ok(id) => t.tree.get_node(id)?.size(),
                Err(_) => 0,
            };
            t.tree.move_node(node_id, dst_id, to.file_name().to_vec())?;
            t.used -= replaced.min(t.used);
            t.tree.get_node_mut(parent_id)?.update_mtime(now);
            t.tree.get_node_mut(dst_id)?.update_mtime(now);
            Ok(())
        }
        .boxed()
    }
}

impl DavPropStore for MemFs {
    fn get_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavProp>> {
        async move {
            let props = self.props.lock();
            Ok(props
                .get(&propkey_path(path))
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default())
        }
        .boxed()
    }

    fn set_prop<'a>(&'a self, path: &'a DavPath, prop: DavProp) -> FsFuture<'a, ()> {
        async move {
            self.tree.lock().tree.lookup(path)?;
            let mut props = self.props.lock();
            props
                .entry(propkey_path(path))
                .or_default()
                .insert(propkey(&prop), prop);
            Ok(())
        }
        .boxed()
    }

    fn remove_prop<'a>(&'a self, path: &'a DavPath, prop: &'a DavProp) -> FsFuture<'a, ()> {
        async move {
            self.tree.lock().tree.lookup(path)?;
            let mut props = self.props.lock();
            let key = propkey_path(path);
            if let Some(m) = props.get_mut(&key) {
                m.remove(&propkey(prop));
                if m.is_empty() {
                    props.remove(&key);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn copy_props<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let mut props = self.props.lock();
            match props.get(&propkey_path(from)).cloned() {
                Some(m) => props.insert(propkey_path(to), m),
                None => props.remove(&propkey_path(to)),
            };
            Ok(())
        }
        .boxed()
    }

    fn rename_props<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            let mut props = self.props.lock();
            let from_key = propkey_path(from);
            let to_key = propkey_path(to);
            // drop whatever was at the destination subtree.
            let stale: Vec<_> = props.keys().filter(|k| is_below(k, &to_key)).cloned().collect();
            for k in stale {
                props.remove(&k);
            }
            let moving: Vec<_> = props.keys().filter(|k| is_below(k, &from_key)).cloned().collect();
            for k in moving {
                if let Some(m) = props.remove(&k) {
                    let mut nk = to_key.clone();
                    nk.extend_from_slice(&k[from_key.len()..]);
                    props.insert(nk, m);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn delete_props<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            self.props.lock().remove(&propkey_path(path));
            Ok(())
        }
        .boxed()
    }
}

// props are keyed by path without trailing slash.
fn propkey_path(path: &DavPath) -> Vec<u8> {
    let p = path.as_bytes();
    if p.len() > 1 && p.ends_with(b"/") {
        p[..p.len() - 1].to_vec()
    } else {
        p.to_vec()
    }
}

// is `key` equal to `base` or below it.
fn is_below(key: &[u8], base: &[u8]) -> bool {
    key == base || (key.starts_with(base) && (base == b"/" || key.get(base.len()) == Some(&b'/')))
}

fn propkey(p: &DavProp) -> String {
    format!("{{{}}}{}", p.namespace.as_deref().unwrap_or(""), p.name)
}

impl DavMetaData for MemFsMeta {
    fn len(&self) -> u64 {
        self.size
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.crtime)
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.mtime)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }
}

impl MemFsNode {
    fn new_dir() -> MemFsNode {
        let now = SystemTime::now();
        MemFsNode::Dir(MemFsDirNode { crtime: now, mtime: now })
    }

    fn meta(&self) -> MemFsMeta {
        match self {
            MemFsNode::File(file) => MemFsMeta {
                is_dir: false,
                size: file.data.len() as u64,
                mtime: file.mtime,
                crtime: file.crtime,
            },
            MemFsNode::Dir(dir) => MemFsMeta {
                is_dir: true,
                size: 0,
                mtime: dir.mtime,
                crtime: dir.crtime,
            },
        }
    }

    fn size(&self) -> u64 {
        match self {
            MemFsNode::File(f) => f.data.len() as u64,
            MemFsNode::Dir(_) => 0,
        }
    }

    fn update_mtime(&mut self, tm: SystemTime) {
        match self {
            MemFsNode::Dir(d) => d.mtime = tm,
            MemFsNode::File(f) => f.mtime = tm,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, MemFsNode::Dir(_))
    }

    fn as_file(&self) -> FsResult<&MemFsFileNode> {
        match self {
            MemFsNode::File(n) => Ok(n),
            _ => Err(FsError::Forbidden),
        }
    }

    fn as_file_mut(&mut self) -> FsResult<&mut MemFsFileNode> {
        match self {
            MemFsNode::File(n) => Ok(n),
            _ => Err(FsError::Forbidden),
        }
    }
}

impl MemFsTree {
    // account for `new` bytes replacing `old` bytes.
    fn reserve(&mut self, new: u64, old: u64) -> FsResult<()> {
        let used = self.used - old.min(self.used) + new;
        if let Some(q) = self.quota {
            if used > q {
                return Err(FsError::InsufficientStorage);
            }
        }
        self.used = used;
        Ok(())
    }

    fn remove(&mut self, node_id: u64) -> FsResult<()> {
        let parent_id = self.tree.parent_id(node_id).ok_or(FsError::Forbidden)?;
        self.tree.delete_node(node_id)?;
        self.tree.get_node_mut(parent_id)?.update_mtime(SystemTime::now());
        Ok(())
    }
}

trait TreeExt {
    fn lookup_segs(&self, segs: &[&[u8]]) -> FsResult<u64>;
    fn lookup(&self, path: &DavPath) -> FsResult<u64>;
    fn lookup_parent(&self, path: &DavPath) -> FsResult<u64>;
}

impl TreeExt for Tree {
    fn lookup_segs(&self, segs: &[&[u8]]) -> FsResult<u64> {
        let mut node_id = tree::ROOT_ID;
        for seg in segs {
            if !self.get_node(node_id)?.is_dir() {
                return Err(FsError::NotFound);
            }
            node_id = self.get_child(node_id, *seg)?;
        }
        Ok(node_id)
    }

    fn lookup(&self, path: &DavPath) -> FsResult<u64> {
        self.lookup_segs(&path.segments())
    }

    // pop the last segment off the path, do a lookup, then
    // check if the result is a directory. Anything missing
    // along the way is a conflict.
    fn lookup_parent(&self, path: &DavPath) -> FsResult<u64> {
        let mut segs = path.segments();
        segs.pop();
        let node_id = match self.lookup_segs(&segs) {
            Err(FsError::NotFound) => return Err(FsError::Conflict),
            other => other?,
        };
        if !self.get_node(node_id)?.is_dir() {
            return Err(FsError::Conflict);
        }
        Ok(node_id)
    }
}
