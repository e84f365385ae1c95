//! `ToolDirServer`: answers filesystem-shaped queries from a sandboxed tool
//! against a synthetic directory tree rooted in a [`Value::Binding`],
//! recording fine-grained dependencies as it goes.
//!
//! Grounded on `examples/original_source/progs/vestaeval/ToolDirectoryServer.H`
//! (spec §4.6): `Lookup`, `LookupIndex`, `OldList`/`List` procedures, each
//! contributing to the calling `_run_tool`'s dependency set.

pub mod wire;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use color_eyre::eyre::{bail, Result};
use dashmap::DashMap;

pub use wire::DirHandle;

use crate::deppath::{Arc as PathArc, DepPath, PathKind};
use crate::dpaths::DPaths;
use crate::value::Value;

/// Above this many distinct names looked up individually in one directory,
/// the server stops recording a `Bang` dependency per name and instead
/// records one coarse `BindingLen` dependency on the whole directory. This
/// resolves spec §9's Open Question about the secondary key's O(n·m) growth
/// for tools that probe many names in a large directory (e.g. a compiler's
/// include-path search): past the threshold, any addition or removal in the
/// directory invalidates the entry, trading a slightly coarser cache for a
/// bounded secondary key.
const COARSEN_THRESHOLD: usize = 8;

#[derive(Clone, Debug)]
pub enum LookupReply {
    Found { handle: Option<DirHandle>, value: Value },
    NotFound,
}

struct DirEntry {
    path: DepPath,
    lookups: Mutex<u32>,
}

pub struct ToolDirServer {
    call_id: u32,
    root: Value,
    dirs: DashMap<DirHandle, DirEntry>,
    next_seq: AtomicU32,
    deps: Mutex<DPaths>,
    root_handle: DirHandle,
}

impl ToolDirServer {
    pub fn new(call_id: u32, root: Value) -> Self {
        let server = ToolDirServer {
            call_id,
            root,
            dirs: DashMap::new(),
            next_seq: AtomicU32::new(0),
            deps: Mutex::new(DPaths::empty()),
            root_handle: DirHandle::encode(call_id, 0),
        };
        server.dirs.insert(
            server.root_handle,
            DirEntry {
                path: DepPath::root(PathKind::Norm),
                lookups: Mutex::new(0),
            },
        );
        server
    }

    pub fn root_handle(&self) -> DirHandle {
        self.root_handle
    }

    fn allocate_handle(&self, path: DepPath) -> DirHandle {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = DirHandle::encode(self.call_id, seq);
        self.dirs.insert(
            handle,
            DirEntry {
                path,
                lookups: Mutex::new(0),
            },
        );
        handle
    }

    fn resolve(&self, path: &DepPath) -> Option<Value> {
        let mut current = self.root.clone();
        for arc in path.arcs() {
            match (&current, arc) {
                (Value::Binding(b), PathArc::Name(name)) => current = b.lookup(name)?.clone(),
                (Value::List(l), PathArc::Index(i)) => current = l.get(*i as usize)?.clone(),
                _ => return None,
            }
        }
        Some(current)
    }

    fn record(&self, path: DepPath, value: Value) {
        self.deps.lock().unwrap().put(path, value);
    }

    /// Resolve one name inside `dir`, recording a dependency on it.
    pub fn lookup(&self, dir: DirHandle, name: &str) -> Result<LookupReply> {
        let Some(entry) = self.dirs.get(&dir) else {
            bail!("unknown directory handle {}", dir.as_u64());
        };
        let dir_path = entry.path.clone();
        let lookups_so_far = {
            let mut count = entry.lookups.lock().unwrap();
            *count += 1;
            *count
        };
        drop(entry);

        let child_path = dir_path.extend(PathArc::name(name), PathKind::Norm);

        if lookups_so_far as usize > COARSEN_THRESHOLD {
            let coarse = DepPath::from_arcs(dir_path.arcs().to_vec(), PathKind::BindingLen);
            if let Some(Value::Binding(b)) = self.resolve(&dir_path) {
                self.record(coarse, Value::Fp(b.len_fingerprint()));
            }
        }

        match self.resolve(&child_path) {
            Some(value) => {
                if lookups_so_far as usize <= COARSEN_THRESHOLD {
                    self.record(child_path.clone(), value.clone());
                    let type_path =
                        DepPath::from_arcs(child_path.arcs().to_vec(), PathKind::Type);
                    self.record(type_path, Value::text(value.type_name()));
                }
                let handle = matches!(value, Value::Binding(_)).then(|| self.allocate_handle(child_path));
                Ok(LookupReply::Found { handle, value })
            }
            None => {
                if lookups_so_far as usize <= COARSEN_THRESHOLD {
                    let bang_path = DepPath::from_arcs(child_path.arcs().to_vec(), PathKind::Bang);
                    self.record(bang_path, Value::Boolean(false));
                }
                Ok(LookupReply::NotFound)
            }
        }
    }

    /// Resolve the `index`-th entry of `dir` by position, for tools that
    /// iterate a directory rather than probing names.
    pub fn lookup_index(&self, dir: DirHandle, index: u32) -> Result<Option<(String, LookupReply)>> {
        let Some(entry) = self.dirs.get(&dir) else {
            bail!("unknown directory handle {}", dir.as_u64());
        };
        let dir_path = entry.path.clone();
        drop(entry);

        match self.resolve(&dir_path) {
            Some(Value::Binding(b)) => match b.entries().get(index as usize) {
                Some((name, value)) => {
                    let child_path = dir_path.extend(PathArc::name(name), PathKind::Norm);
                    self.record(child_path.clone(), value.clone());
                    let handle =
                        matches!(value, Value::Binding(_)).then(|| self.allocate_handle(child_path));
                    Ok(Some((
                        name.clone(),
                        LookupReply::Found {
                            handle,
                            value: value.clone(),
                        },
                    )))
                }
                None => Ok(None),
            },
            _ => bail!("lookup_index: handle does not resolve to a binding"),
        }
    }

    /// Enumerate all entries of `dir`; records one coarse `BindingLen`
    /// dependency rather than one per entry, since a tool that lists a
    /// directory exhaustively is sensitive to any change in it anyway.
    pub fn list(
        &self,
        dir: DirHandle,
        mut callback: impl FnMut(u32, &str, &Value),
    ) -> Result<()> {
        let Some(entry) = self.dirs.get(&dir) else {
            bail!("unknown directory handle {}", dir.as_u64());
        };
        let dir_path = entry.path.clone();
        drop(entry);

        match self.resolve(&dir_path) {
            Some(Value::Binding(b)) => {
                let len_path = DepPath::from_arcs(dir_path.arcs().to_vec(), PathKind::BindingLen);
                self.record(len_path, Value::Fp(b.len_fingerprint()));
                for (i, (name, value)) in b.entries().iter().enumerate() {
                    callback(i as u32, name, value);
                }
                Ok(())
            }
            _ => bail!("list: handle does not resolve to a binding"),
        }
    }

    /// Drain the dependencies accumulated by queries served so far, for
    /// folding into the enclosing `_run_tool` call's cache entry.
    pub fn take_deps(&self) -> DPaths {
        std::mem::take(&mut self.deps.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Binding;

    fn sample_root() -> Value {
        let mut src = Binding::new();
        src.insert("main.c", Value::text("int main(){}"), false);
        src.insert("util.c", Value::text("void f(){}"), false);
        let mut root = Binding::new();
        root.insert("src", Value::Binding(src), false);
        Value::Binding(root)
    }

    #[test]
    fn lookup_found_allocates_handle_for_directory() {
        let server = ToolDirServer::new(1, sample_root());
        let reply = server.lookup(server.root_handle(), "src").unwrap();
        match reply {
            LookupReply::Found { handle, value } => {
                assert!(handle.is_some());
                assert!(matches!(value, Value::Binding(_)));
            }
            LookupReply::NotFound => panic!("expected src to be found"),
        }
    }

    #[test]
    fn lookup_missing_records_bang_dependency() {
        let server = ToolDirServer::new(1, sample_root());
        let reply = server.lookup(server.root_handle(), "missing").unwrap();
        assert!(matches!(reply, LookupReply::NotFound));
        let deps = server.take_deps();
        assert!(deps.contains(&DepPath::singleton(
            PathArc::name("missing"),
            PathKind::Bang
        )));
    }

    #[test]
    fn list_records_coarse_bindinglen_dep() {
        let server = ToolDirServer::new(1, sample_root());
        let src_reply = server.lookup(server.root_handle(), "src").unwrap();
        let LookupReply::Found { handle: Some(src_handle), .. } = src_reply else {
            panic!("expected src directory handle");
        };
        let mut seen = Vec::new();
        server
            .list(src_handle, |_, name, _| seen.push(name.to_string()))
            .unwrap();
        assert_eq!(seen, vec!["main.c".to_string(), "util.c".to_string()]);

        let deps = server.take_deps();
        assert!(deps.contains(&DepPath::from_arcs(
            vec![PathArc::name("src")],
            PathKind::BindingLen
        )));
    }
}
