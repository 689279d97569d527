//! Arena tree used by both the in-memory lock manager and `MemFs`.
//!
//! Nodes live in a flat map indexed by id; children are kept in a
//! `BTreeMap` so that iterating over them is always in key order.
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use crate::fs::{FsError, FsResult};

/// id of the root node of the tree.
pub(crate) const ROOT_ID: u64 = 1;

/// A tree contains a bunch of nodes.
#[derive(Debug)]
pub(crate) struct Tree<K: Ord, D> {
    nodes: HashMap<u64, Node<K, D>>,
    node_id: u64,
}

/// Node itself. "data" contains user-modifiable data.
#[derive(Debug)]
pub(crate) struct Node<K: Ord, D> {
    pub data: D,
    parent_id: u64,
    children: BTreeMap<K, u64>,
}

impl<K: Ord + Debug + Clone, D: Debug> Tree<K, D> {
    /// Get new tree and initialize the root with 'data'.
    pub fn new(data: D) -> Tree<K, D> {
        let mut t = Tree {
            nodes: HashMap::new(),
            node_id: ROOT_ID,
        };
        t.new_node(0, data);
        t
    }

    fn new_node(&mut self, parent: u64, data: D) -> u64 {
        let id = self.node_id;
        self.node_id += 1;
        let node = Node {
            parent_id: parent,
            data,
            children: BTreeMap::new(),
        };
        self.nodes.insert(id, node);
        id
    }

    /// add a child node to an existing node.
    pub fn add_child(&mut self, parent: u64, key: K, data: D) -> FsResult<u64> {
        match self.nodes.get(&parent) {
            None => return Err(FsError::NotFound),
            Some(p) if p.children.contains_key(&key) => return Err(FsError::Exists),
            Some(_) => {}
        }
        let id = self.new_node(parent, data);
        let pnode = self.nodes.get_mut(&parent).ok_or(FsError::GeneralFailure)?;
        pnode.children.insert(key, id);
        Ok(id)
    }

    /// Get a child node by key K.
    pub fn get_child<Q>(&self, parent: u64, key: &Q) -> FsResult<u64>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let pnode = self.nodes.get(&parent).ok_or(FsError::NotFound)?;
        let id = pnode.children.get(key).ok_or(FsError::NotFound)?;
        Ok(*id)
    }

    /// Get all children of this node, in key order.
    pub fn get_children(&self, parent: u64) -> FsResult<Vec<(K, u64)>> {
        let pnode = self.nodes.get(&parent).ok_or(FsError::NotFound)?;
        Ok(pnode.children.iter().map(|(k, i)| (k.clone(), *i)).collect())
    }

    pub fn has_children(&self, id: u64) -> bool {
        self.nodes.get(&id).map(|n| !n.children.is_empty()).unwrap_or(false)
    }

    pub fn parent_id(&self, id: u64) -> Option<u64> {
        self.nodes.get(&id).map(|n| n.parent_id).filter(|&p| p != 0)
    }

    /// Get reference to a node.
    pub fn get_node(&self, id: u64) -> FsResult<&D> {
        let n = self.nodes.get(&id).ok_or(FsError::NotFound)?;
        Ok(&n.data)
    }

    /// Get mutable reference to a node.
    pub fn get_node_mut(&mut self, id: u64) -> FsResult<&mut D> {
        let n = self.nodes.get_mut(&id).ok_or(FsError::NotFound)?;
        Ok(&mut n.data)
    }

    fn delete_node_from_parent(&mut self, id: u64) -> FsResult<()> {
        let parent_id = self.nodes.get(&id).ok_or(FsError::NotFound)?.parent_id;
        let pnode = self.nodes.get_mut(&parent_id).ok_or(FsError::Forbidden)?;
        pnode.children.retain(|_, i| *i != id);
        Ok(())
    }

    /// Delete a node. Fails if node has children. Returns the node data.
    pub fn delete_node(&mut self, id: u64) -> FsResult<D> {
        if self.has_children(id) {
            return Err(FsError::Forbidden);
        }
        self.delete_node_from_parent(id)?;
        let n = self.nodes.remove(&id).ok_or(FsError::NotFound)?;
        Ok(n.data)
    }

    /// Delete a subtree, returning the data of all removed nodes.
    pub fn delete_subtree(&mut self, id: u64) -> FsResult<Vec<D>> {
        self.delete_node_from_parent(id)?;
        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.remove(&id) {
                stack.extend(n.children.values().copied());
                removed.push(n.data);
            }
        }
        Ok(removed)
    }

    /// Move a node to a new position and new name in the tree.
    /// An existing node at the destination is replaced, but only
    /// if it doesn't have any children.
    pub fn move_node(&mut self, id: u64, new_parent: u64, new_name: K) -> FsResult<()> {
        let dest = {
            let pnode = self.nodes.get(&new_parent).ok_or(FsError::NotFound)?;
            match pnode.children.get(&new_name) {
                Some(&cid) if cid == id => return Ok(()),
                Some(&cid) if self.has_children(cid) => return Err(FsError::Exists),
                Some(&cid) => Some(cid),
                None => None,
            }
        };
        // refuse to move a node below itself.
        let mut p = Some(new_parent);
        while let Some(pid) = p {
            if pid == id {
                return Err(FsError::Forbidden);
            }
            p = self.parent_id(pid);
        }
        self.delete_node_from_parent(id)?;
        if let Some(dest) = dest {
            self.nodes.remove(&dest);
        }
        self.nodes.get_mut(&id).ok_or(FsError::NotFound)?.parent_id = new_parent;
        let pnode = self.nodes.get_mut(&new_parent).ok_or(FsError::NotFound)?;
        pnode.children.insert(new_name, id);
        Ok(())
    }
}
