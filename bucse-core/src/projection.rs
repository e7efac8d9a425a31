//! Filesystem projection (spec §4.5, C5): the in-memory tree derived by
//! replaying the action log. Nodes live in a `slab::Slab` arena addressed
//! by `NodeId` handles rather than `Rc<RefCell<..>>` parent/child pointers
//! (spec §9 "no owning aliasing between a node and its parent").

use std::collections::BTreeMap;

use slab::Slab;

use crate::error::{BucseError, Result};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct NodeId(pub usize);

pub const ROOT: NodeId = NodeId(0);

pub enum Node {
    Dir(DirNode),
    File(FileNode),
}

pub struct DirNode {
    pub parent: Option<NodeId>,
    pub name: String,
    /// Child name -> NodeId, ordered for deterministic `readdir` (spec §4.5).
    pub children: BTreeMap<String, NodeId>,
    pub atime: i64,
    pub mtime: i64,
}

pub struct FileNode {
    pub parent: NodeId,
    pub name: String,
    pub size: i64,
    pub block_size: i64,
    /// Ordered storage object names making up the file's content (spec §4.7).
    pub content: Vec<String>,
    pub atime: i64,
    pub mtime: i64,
    /// Buffered writes not yet folded into `content` (spec §3.2
    /// `dirtyFlags`/pending-write queue — these live on the node itself, not
    /// on a transient open-file handle, so `getattr`/`read` can observe or
    /// trigger a flush of them per spec §4.7.3).
    pub dirty: bool,
    pub pending: BTreeMap<i64, Vec<u8>>,
}

/// The in-memory filesystem tree (spec §4.5). Owns every node; callers
/// address nodes exclusively through `NodeId` handles returned by its
/// resolve/lookup methods, never by holding references across mutations.
pub struct Projection {
    nodes: Slab<Node>,
}

impl Projection {
    pub fn new(time: i64) -> Self {
        let mut nodes = Slab::new();
        let root_key = nodes.insert(Node::Dir(DirNode {
            parent: None,
            name: String::new(),
            children: BTreeMap::new(),
            atime: time,
            mtime: time,
        }));
        debug_assert_eq!(root_key, ROOT.0);
        Projection { nodes }
    }

    pub fn dir(&self, id: NodeId) -> Result<&DirNode> {
        match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => Ok(d),
            Some(Node::File(_)) => Err(BucseError::NotDir(d_path(self, id).into())),
            None => Err(BucseError::NotFound(d_path(self, id).into())),
        }
    }

    pub fn dir_mut(&mut self, id: NodeId) -> Result<&mut DirNode> {
        match self.nodes.get_mut(id.0) {
            Some(Node::Dir(d)) => Ok(d),
            Some(Node::File(_)) => Err(BucseError::NotDir("".into())),
            None => Err(BucseError::NotFound("".into())),
        }
    }

    pub fn file(&self, id: NodeId) -> Result<&FileNode> {
        match self.nodes.get(id.0) {
            Some(Node::File(f)) => Ok(f),
            Some(Node::Dir(_)) => Err(BucseError::IsDir("".into())),
            None => Err(BucseError::NotFound("".into())),
        }
    }

    pub fn file_mut(&mut self, id: NodeId) -> Result<&mut FileNode> {
        match self.nodes.get_mut(id.0) {
            Some(Node::File(f)) => Ok(f),
            Some(Node::Dir(_)) => Err(BucseError::IsDir("".into())),
            None => Err(BucseError::NotFound("".into())),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Finds a child of `parent` regardless of kind (spec §4.5 `findChild`).
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.dir(parent).ok()?.children.get(name).copied()
    }

    pub fn find_child_file(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let id = self.find_child(parent, name)?;
        matches!(self.nodes.get(id.0), Some(Node::File(_))).then_some(id)
    }

    pub fn find_child_dir(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let id = self.find_child(parent, name)?;
        matches!(self.nodes.get(id.0), Some(Node::Dir(_))).then_some(id)
    }

    /// Resolves an absolute slash-separated path (no leading slash, "" is
    /// root) to the directory containing its final component, returning
    /// that directory's NodeId and the final component name (spec §4.5
    /// `resolveContainingDir`).
    pub fn resolve_containing_dir<'a>(&self, path: &'a str) -> Result<(NodeId, &'a str)> {
        let path = path.trim_start_matches('/');
        match path.rsplit_once('/') {
            None => Ok((ROOT, path)),
            Some((parent, leaf)) => {
                let dir = self.resolve_dir(parent)?;
                Ok((dir, leaf))
            }
        }
    }

    /// Resolves an absolute directory path to a NodeId (spec §4.5
    /// `resolveDir`), failing with `NotDir`/`NotFound` on a bad component.
    pub fn resolve_dir(&self, path: &str) -> Result<NodeId> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(ROOT);
        }
        let mut current = ROOT;
        for component in path.split('/') {
            current = self
                .find_child_dir(current, component)
                .ok_or_else(|| BucseError::NotFound(path.into()))?;
        }
        Ok(current)
    }

    /// Resolves an absolute file path to a NodeId.
    pub fn resolve_file(&self, path: &str) -> Result<NodeId> {
        let (dir, leaf) = self.resolve_containing_dir(path)?;
        self.find_child_file(dir, leaf)
            .ok_or_else(|| BucseError::NotFound(path.into()))
    }

    /// Resolves either kind of node by path.
    pub fn resolve(&self, path: &str) -> Result<NodeId> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(ROOT);
        }
        let (dir, leaf) = self.resolve_containing_dir(path)?;
        self.find_child(dir, leaf)
            .ok_or_else(|| BucseError::NotFound(path.into()))
    }

    /// Reconstructs the absolute path of `id` by walking parent links
    /// (spec §4.5 `fullPathOf`); root is `""`.
    pub fn full_path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = id;
        loop {
            match self.nodes.get(current.0) {
                Some(Node::Dir(d)) => {
                    if let Some(parent) = d.parent {
                        parts.push(d.name.clone());
                        current = parent;
                    } else {
                        break;
                    }
                }
                Some(Node::File(f)) => {
                    parts.push(f.name.clone());
                    current = f.parent;
                }
                None => break,
            }
        }
        parts.reverse();
        parts.join("/")
    }

    /// Inserts a new empty directory under `parent` (spec §4.5, uniqueness
    /// invariant: a parent never holds two children with the same name).
    pub fn insert_dir(&mut self, parent: NodeId, name: &str, time: i64) -> Result<NodeId> {
        if self.find_child(parent, name).is_some() {
            return Err(BucseError::Exists(name.into()));
        }
        let id = NodeId(self.nodes.insert(Node::Dir(DirNode {
            parent: Some(parent),
            name: name.to_string(),
            children: BTreeMap::new(),
            atime: time,
            mtime: time,
        })));
        self.dir_mut(parent)?.children.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn insert_file(
        &mut self,
        parent: NodeId,
        name: &str,
        content: Vec<String>,
        size: i64,
        block_size: i64,
        time: i64,
    ) -> Result<NodeId> {
        if self.find_child(parent, name).is_some() {
            return Err(BucseError::Exists(name.into()));
        }
        let id = NodeId(self.nodes.insert(Node::File(FileNode {
            parent,
            name: name.to_string(),
            size,
            block_size,
            content,
            atime: time,
            mtime: time,
            dirty: false,
            pending: BTreeMap::new(),
        })));
        self.dir_mut(parent)?.children.insert(name.to_string(), id);
        Ok(id)
    }

    /// Removes a leaf node (file, or empty directory) from its parent and
    /// frees its slab slot (spec §4.5, local POSIX-facing `rmdir`/`unlink`:
    /// `rmdir` requires an empty directory per §4.7.4).
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let (parent, name) = match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => {
                if !d.children.is_empty() {
                    return Err(BucseError::NotEmpty(d.name.clone().into()));
                }
                (d.parent, d.name.clone())
            }
            Some(Node::File(f)) => (Some(f.parent), f.name.clone()),
            None => return Err(BucseError::NotFound("".into())),
        };
        if let Some(parent) = parent {
            self.dir_mut(parent)?.children.remove(&name);
        }
        self.nodes.remove(id.0);
        Ok(())
    }

    /// Frees `id` and, if it is a directory, its entire subtree, regardless
    /// of emptiness (spec §4.6 apply-semantics table: a replayed/remote
    /// `RemoveDirectory` "recursively free[s]" rather than requiring an
    /// empty directory — that POSIX precondition belongs only to the local
    /// `rmdir` call site, which uses `remove` instead).
    pub fn remove_recursive(&mut self, id: NodeId) -> Result<()> {
        let (parent, name) = match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => (d.parent, d.name.clone()),
            Some(Node::File(f)) => (Some(f.parent), f.name.clone()),
            None => return Err(BucseError::NotFound("".into())),
        };
        self.free_subtree(id);
        if let Some(parent) = parent {
            self.dir_mut(parent)?.children.remove(&name);
        }
        Ok(())
    }

    fn free_subtree(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => d.children.values().copied().collect(),
            _ => Vec::new(),
        };
        for child in children {
            self.free_subtree(child);
        }
        self.nodes.remove(id.0);
    }

    /// Moves `id` from its current parent to `(new_parent, new_name)`,
    /// updating both the node's own name/parent and the BTreeMap entries on
    /// both sides (spec §4.7 rename).
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId, new_name: &str) -> Result<()> {
        let old_parent = match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => d.parent,
            Some(Node::File(f)) => Some(f.parent),
            None => return Err(BucseError::NotFound("".into())),
        };
        let old_name = match self.nodes.get(id.0) {
            Some(Node::Dir(d)) => d.name.clone(),
            Some(Node::File(f)) => f.name.clone(),
            None => unreachable!(),
        };
        if let Some(old_parent) = old_parent {
            self.dir_mut(old_parent)?.children.remove(&old_name);
        }
        match self.nodes.get_mut(id.0) {
            Some(Node::Dir(d)) => {
                d.parent = Some(new_parent);
                d.name = new_name.to_string();
            }
            Some(Node::File(f)) => {
                f.parent = new_parent;
                f.name = new_name.to_string();
            }
            None => unreachable!(),
        }
        self.dir_mut(new_parent)?
            .children
            .insert(new_name.to_string(), id);
        Ok(())
    }
}

fn d_path(p: &Projection, id: NodeId) -> String {
    p.full_path_of(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_and_is_empty_dir() {
        let p = Projection::new(0);
        assert!(p.dir(ROOT).unwrap().children.is_empty());
        assert_eq!(p.full_path_of(ROOT), "");
    }

    #[test]
    fn insert_and_resolve_nested_path() {
        let mut p = Projection::new(0);
        let a = p.insert_dir(ROOT, "a", 1).unwrap();
        let b = p.insert_dir(a, "b", 1).unwrap();
        let f = p
            .insert_file(b, "c.txt", vec!["blk1".into()], 5, 4096, 1)
            .unwrap();

        assert_eq!(p.resolve_dir("a/b").unwrap(), b);
        assert_eq!(p.resolve_file("a/b/c.txt").unwrap(), f);
        assert_eq!(p.full_path_of(f), "a/b/c.txt");
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut p = Projection::new(0);
        p.insert_dir(ROOT, "a", 1).unwrap();
        assert!(p.insert_dir(ROOT, "a", 1).is_err());
    }

    #[test]
    fn remove_nonempty_dir_fails() {
        let mut p = Projection::new(0);
        let a = p.insert_dir(ROOT, "a", 1).unwrap();
        p.insert_dir(a, "b", 1).unwrap();
        assert!(p.remove(a).is_err());
    }

    #[test]
    fn remove_recursive_frees_nonempty_subtree() {
        let mut p = Projection::new(0);
        let a = p.insert_dir(ROOT, "a", 1).unwrap();
        let b = p.insert_dir(a, "b", 1).unwrap();
        p.insert_file(b, "c.txt", vec![], 0, 0, 1).unwrap();

        p.remove_recursive(a).unwrap();
        assert!(p.resolve_dir("a").is_err());
        assert!(p.resolve_dir("a/b").is_err());
        assert!(p.resolve_file("a/b/c.txt").is_err());
    }

    #[test]
    fn reparent_moves_node_and_updates_lookup() {
        let mut p = Projection::new(0);
        let a = p.insert_dir(ROOT, "a", 1).unwrap();
        let b = p.insert_dir(ROOT, "b", 1).unwrap();
        let f = p.insert_file(a, "x.txt", vec![], 0, 4096, 1).unwrap();

        p.reparent(f, b, "y.txt").unwrap();
        assert!(p.resolve_file("a/x.txt").is_err());
        assert_eq!(p.resolve_file("b/y.txt").unwrap(), f);
    }
}
