//! Client-side interface to the repository.
//!
//! The repository (per spec §1/§6) provides immutable file/directory objects
//! addressed by short integer ids and content tags; it is an external
//! collaborator. This module defines the operation set the evaluator needs
//! (`VestaSource`-shaped, per spec §6) and [`InMemoryRepository`], a test
//! double used to exercise `ToolDirServer`/`PrimRunTool` without a real
//! repository process.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use color_eyre::{Result, eyre::bail};
use serde::{Deserialize, Serialize};

use crate::tag::Tag;

/// A 32-bit compact identifier of a repository object.
pub type ShortId = u32;

/// The type tags a repository node can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    ImmutableFile,
    MutableFile,
    ImmutableDir,
    AppendableDir,
    VolatileDir,
    VolatileRoExistingDir,
    Ghost,
    Stub,
    Device,
    Deleted,
}

impl NodeType {
    pub fn is_directory(self) -> bool {
        matches!(
            self,
            NodeType::ImmutableDir
                | NodeType::AppendableDir
                | NodeType::VolatileDir
                | NodeType::VolatileRoExistingDir
        )
    }
}

/// Result of resolving one name in a directory.
#[derive(Clone, Debug)]
pub enum LookupResult {
    Found {
        shortid: ShortId,
        node_type: NodeType,
    },
    NotFound,
}

/// Operations the evaluator needs from the repository client.
pub trait RepositoryClient: Send + Sync {
    fn lookup(&self, dir: ShortId, name: &str) -> Result<LookupResult>;
    fn lookup_index(&self, dir: ShortId, index: u32) -> Result<Option<(String, LookupResult)>>;
    /// Enumerate entries starting at `start`, invoking `callback(index, name,
    /// node_type, shortid)` for each; stops early if the callback returns
    /// `false`.
    fn list(
        &self,
        dir: ShortId,
        start: u32,
        callback: &mut dyn FnMut(u32, &str, NodeType, Option<ShortId>) -> bool,
    ) -> Result<()>;
    fn create_volatile_directory(&self, host: &str) -> Result<ShortId>;
    fn delete_volatile_directory(&self, dir: ShortId) -> Result<()>;
    fn insert_mutable_file(&self, dir: ShortId, name: &str, content: &[u8]) -> Result<ShortId>;
    fn make_files_immutable(&self, dir: ShortId, fp_content_threshold: u64) -> Result<()>;
    fn write(&self, file: ShortId, content: &[u8]) -> Result<()>;
    fn read(&self, file: ShortId) -> Result<Vec<u8>>;
    fn resync(&self, dir: ShortId) -> Result<()>;
    fn fptag(&self, node: ShortId) -> Result<Tag>;
}

#[derive(Clone, Debug)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, ShortId>),
    Deleted,
}

struct Inner {
    nodes: BTreeMap<ShortId, Node>,
    next_id: ShortId,
}

/// An in-process repository double backed by a `BTreeMap` tree.
#[derive(Clone)]
pub struct InMemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(1, Node::Dir(BTreeMap::new()));
        Self {
            inner: Arc::new(Mutex::new(Inner { nodes, next_id: 2 })),
        }
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub const ROOT: ShortId = 1;

    fn alloc(&self, inner: &mut Inner, node: Node) -> ShortId {
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.insert(id, node);
        id
    }

    /// Seed a file at `dir/name` directly, for test setup.
    pub fn seed_file(&self, dir: ShortId, name: &str, content: impl Into<Vec<u8>>) -> ShortId {
        let mut inner = self.inner.lock().unwrap();
        let id = self.alloc(&mut inner, Node::File(content.into()));
        match inner.nodes.get_mut(&dir) {
            Some(Node::Dir(entries)) => {
                entries.insert(name.to_string(), id);
            }
            _ => panic!("seed_file: {dir} is not a directory"),
        }
        id
    }

    pub fn seed_dir(&self, parent: ShortId, name: &str) -> ShortId {
        let mut inner = self.inner.lock().unwrap();
        let id = self.alloc(&mut inner, Node::Dir(BTreeMap::new()));
        match inner.nodes.get_mut(&parent) {
            Some(Node::Dir(entries)) => {
                entries.insert(name.to_string(), id);
            }
            _ => panic!("seed_dir: {parent} is not a directory"),
        }
        id
    }
}

impl RepositoryClient for InMemoryRepository {
    fn lookup(&self, dir: ShortId, name: &str) -> Result<LookupResult> {
        let inner = self.inner.lock().unwrap();
        let Some(Node::Dir(entries)) = inner.nodes.get(&dir) else {
            bail!("lookup: {dir} is not a directory");
        };
        match entries.get(name) {
            Some(&shortid) => {
                let node_type = match inner.nodes.get(&shortid) {
                    Some(Node::File(_)) => NodeType::MutableFile,
                    Some(Node::Dir(_)) => NodeType::AppendableDir,
                    Some(Node::Deleted) | None => NodeType::Deleted,
                };
                Ok(LookupResult::Found { shortid, node_type })
            }
            None => Ok(LookupResult::NotFound),
        }
    }

    fn lookup_index(&self, dir: ShortId, index: u32) -> Result<Option<(String, LookupResult)>> {
        let inner = self.inner.lock().unwrap();
        let Some(Node::Dir(entries)) = inner.nodes.get(&dir) else {
            bail!("lookup_index: {dir} is not a directory");
        };
        let Some((name, &shortid)) = entries.iter().nth(index as usize) else {
            return Ok(None);
        };
        let node_type = match inner.nodes.get(&shortid) {
            Some(Node::File(_)) => NodeType::MutableFile,
            Some(Node::Dir(_)) => NodeType::AppendableDir,
            _ => NodeType::Deleted,
        };
        Ok(Some((
            name.clone(),
            LookupResult::Found { shortid, node_type },
        )))
    }

    fn list(
        &self,
        dir: ShortId,
        start: u32,
        callback: &mut dyn FnMut(u32, &str, NodeType, Option<ShortId>) -> bool,
    ) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let Some(Node::Dir(entries)) = inner.nodes.get(&dir) else {
            bail!("list: {dir} is not a directory");
        };
        for (i, (name, &shortid)) in entries.iter().enumerate().skip(start as usize) {
            let node_type = match inner.nodes.get(&shortid) {
                Some(Node::File(_)) => NodeType::MutableFile,
                Some(Node::Dir(_)) => NodeType::AppendableDir,
                _ => NodeType::Deleted,
            };
            if !callback(i as u32, name, node_type, Some(shortid)) {
                break;
            }
        }
        Ok(())
    }

    fn create_volatile_directory(&self, _host: &str) -> Result<ShortId> {
        let mut inner = self.inner.lock().unwrap();
        Ok(self.alloc(&mut inner, Node::Dir(BTreeMap::new())))
    }

    fn delete_volatile_directory(&self, dir: ShortId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.insert(dir, Node::Deleted);
        Ok(())
    }

    fn insert_mutable_file(&self, dir: ShortId, name: &str, content: &[u8]) -> Result<ShortId> {
        let mut inner = self.inner.lock().unwrap();
        let id = self.alloc(&mut inner, Node::File(content.to_vec()));
        match inner.nodes.get_mut(&dir) {
            Some(Node::Dir(entries)) => {
                entries.insert(name.to_string(), id);
            }
            _ => bail!("insert_mutable_file: {dir} is not a directory"),
        }
        Ok(id)
    }

    fn make_files_immutable(&self, _dir: ShortId, _fp_content_threshold: u64) -> Result<()> {
        Ok(())
    }

    fn write(&self, file: ShortId, content: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get_mut(&file) {
            Some(Node::File(buf)) => {
                *buf = content.to_vec();
                Ok(())
            }
            _ => bail!("write: {file} is not a file"),
        }
    }

    fn read(&self, file: ShortId) -> Result<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&file) {
            Some(Node::File(buf)) => Ok(buf.clone()),
            _ => bail!("read: {file} is not a file"),
        }
    }

    fn resync(&self, _dir: ShortId) -> Result<()> {
        Ok(())
    }

    fn fptag(&self, node: ShortId) -> Result<Tag> {
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&node) {
            Some(Node::File(buf)) => Ok(Tag::of(buf)),
            Some(Node::Dir(entries)) => {
                let mut tag = Tag::ZERO;
                for (name, id) in entries {
                    tag = tag.extend(name.as_bytes()).extend(id.to_be_bytes());
                }
                Ok(tag)
            }
            _ => bail!("fptag: {node} has no content"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_and_lookup_roundtrip() {
        let repo = InMemoryRepository::new();
        repo.seed_file(InMemoryRepository::ROOT, "main.c", b"int main(){}".to_vec());

        let found = repo.lookup(InMemoryRepository::ROOT, "main.c").unwrap();
        assert!(matches!(found, LookupResult::Found { .. }));

        let missing = repo.lookup(InMemoryRepository::ROOT, "absent").unwrap();
        assert!(matches!(missing, LookupResult::NotFound));
    }

    #[test]
    fn fptag_changes_with_content() {
        let repo = InMemoryRepository::new();
        let id = repo.seed_file(InMemoryRepository::ROOT, "a.txt", b"one".to_vec());
        let before = repo.fptag(id).unwrap();
        repo.write(id, b"two").unwrap();
        let after = repo.fptag(id).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn list_visits_all_entries() {
        let repo = InMemoryRepository::new();
        repo.seed_file(InMemoryRepository::ROOT, "a", b"1".to_vec());
        repo.seed_file(InMemoryRepository::ROOT, "b", b"2".to_vec());
        let mut seen = Vec::new();
        repo.list(InMemoryRepository::ROOT, 0, &mut |_, name, _, _| {
            seen.push(name.to_string());
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }
}
