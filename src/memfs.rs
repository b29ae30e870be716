//! Simple in-memory store.
//!
//! This implementation has state, so if you create a new instance in a
//! handler(), it will be empty every time.
//!
//! This means you have to create the instance once, and share it between
//! handlers. [`MemFs`] is cheap to clone; clones share the same tree.
//!
//! Transactions work on a private snapshot of the tree taken at `begin`.
//! Their writes are recorded in a log that is replayed onto the shared
//! tree on `commit`. Concurrent transactions are not serialized against
//! each other: the last one to commit wins.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future;
use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::davxml::{PropName, PropValue};
use crate::fs::*;

/// Ephemeral in-memory store.
#[derive(Clone, Default)]
pub struct MemFs {
    shared: Arc<Mutex<MemTree>>,
}

#[derive(Debug, Clone)]
struct MemNode {
    // None for collections.
    content: Option<Bytes>,
    props: BTreeMap<PropName, PropValue>,
    created: SystemTime,
    modified: SystemTime,
}

#[derive(Debug, Clone)]
struct MemTree {
    nodes: BTreeMap<DavPath, MemNode>,
}

#[derive(Debug)]
enum Op {
    Put(DavPath, MemNode),
    Remove(DavPath),
}

struct TxnState {
    tree: MemTree,
    log: Vec<Op>,
    finished: bool,
}

struct MemTxn {
    shared: Arc<Mutex<MemTree>>,
    state: Mutex<TxnState>,
}

impl MemNode {
    fn collection() -> MemNode {
        let now = SystemTime::now();
        MemNode {
            content: None,
            props: BTreeMap::new(),
            created: now,
            modified: now,
        }
    }

    fn is_collection(&self) -> bool {
        self.content.is_none()
    }

    fn metadata(&self) -> DavMetaData {
        let mut meta = match self.content {
            Some(ref data) => DavMetaData::file(data.len() as u64),
            None => DavMetaData::collection(),
        };
        meta.created = Some(self.created);
        meta.modified = Some(self.modified);
        meta
    }
}

impl Default for MemTree {
    fn default() -> MemTree {
        let mut nodes = BTreeMap::new();
        nodes.insert(DavPath::root(), MemNode::collection());
        MemTree { nodes }
    }
}

impl MemTree {
    fn get(&self, path: &DavPath) -> FsResult<&MemNode> {
        self.nodes.get(path).ok_or(FsError::NotFound)
    }

    // members sort directly after their collection.
    fn children(&self, path: &DavPath) -> Vec<DavPath> {
        let depth = path.segments().len() + 1;
        self.nodes
            .range(path.clone()..)
            .skip(1)
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| p.segments().len() == depth)
            .map(|(p, _)| p.clone())
            .collect()
    }

    // the parent of `path` must exist and be a collection.
    fn check_parent(&self, path: &DavPath) -> FsResult<()> {
        let parent = path.parent().ok_or(FsError::Forbidden)?;
        match self.nodes.get(&parent) {
            Some(node) if node.is_collection() => Ok(()),
            _ => Err(FsError::Conflict),
        }
    }
}

impl TxnState {
    fn put(&mut self, path: &DavPath, node: MemNode) {
        self.tree.nodes.insert(path.clone(), node.clone());
        self.log.push(Op::Put(path.clone(), node));
    }

    fn remove(&mut self, path: &DavPath) {
        self.tree.nodes.remove(path);
        self.log.push(Op::Remove(path.clone()));
    }
}

impl MemFs {
    /// Create a new, empty store. Only the root collection exists.
    pub fn new() -> MemFs {
        MemFs::default()
    }
}

impl DavStore for MemFs {
    fn begin(&self) -> FsFuture<'_, DavTxn> {
        let tree = self.shared.lock().clone();
        let txn: DavTxn = Arc::new(MemTxn {
            shared: self.shared.clone(),
            state: Mutex::new(TxnState {
                tree,
                log: Vec::new(),
                finished: false,
            }),
        });
        Box::pin(future::ready(Ok(txn)))
    }
}

impl MemTxn {
    fn with_state<T>(&self, f: impl FnOnce(&mut TxnState) -> FsResult<T>) -> FsResult<T> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(FsError::TransactionClosed);
        }
        f(&mut state)
    }

    fn finish(&self, apply: bool) -> FsResult<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(FsError::TransactionClosed);
        }
        state.finished = true;
        let log = std::mem::take(&mut state.log);
        if apply {
            trace!("memfs: replaying {} operation(s)", log.len());
            let mut shared = self.shared.lock();
            for op in log {
                match op {
                    Op::Put(path, node) => {
                        shared.nodes.insert(path, node);
                    }
                    Op::Remove(path) => {
                        shared.nodes.remove(&path);
                    }
                }
            }
        }
        Ok(())
    }
}

impl DavTransaction for MemTxn {
    fn commit(&self) -> FsFuture<'_, ()> {
        Box::pin(future::ready(self.finish(true)))
    }

    fn rollback(&self) -> FsFuture<'_, ()> {
        Box::pin(future::ready(self.finish(false)))
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, DavMetaData> {
        let res = self.with_state(|st| Ok(st.tree.get(path)?.metadata()));
        Box::pin(future::ready(res))
    }

    fn children<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<DavPath>> {
        let res = self.with_state(|st| {
            st.tree.get(path)?;
            Ok(st.tree.children(path))
        });
        Box::pin(future::ready(res))
    }

    fn read_content<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Bytes> {
        let res = self.with_state(|st| match st.tree.get(path)?.content {
            Some(ref data) => Ok(data.clone()),
            None => Err(FsError::Forbidden),
        });
        Box::pin(future::ready(res))
    }

    fn write_content<'a>(&'a self, path: &'a DavPath, data: Bytes) -> FsFuture<'a, ()> {
        let res = self.with_state(|st| {
            st.tree.check_parent(path)?;
            let now = SystemTime::now();
            let node = match st.tree.nodes.get(path) {
                Some(node) if node.is_collection() => return Err(FsError::Forbidden),
                Some(node) => MemNode {
                    content: Some(data),
                    modified: now,
                    ..node.clone()
                },
                None => MemNode {
                    content: Some(data),
                    ..MemNode::collection()
                },
            };
            st.put(path, node);
            Ok(())
        });
        Box::pin(future::ready(res))
    }

    fn create_collection<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        let res = self.with_state(|st| {
            if st.tree.nodes.contains_key(path) {
                return Err(FsError::Exists);
            }
            st.tree.check_parent(path)?;
            st.put(path, MemNode::collection());
            Ok(())
        });
        Box::pin(future::ready(res))
    }

    fn remove_resource<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        let res = self.with_state(|st| {
            if path.is_root() {
                return Err(FsError::Forbidden);
            }
            st.tree.get(path)?;
            if !st.tree.children(path).is_empty() {
                return Err(FsError::Conflict);
            }
            st.remove(path);
            Ok(())
        });
        Box::pin(future::ready(res))
    }

    fn get_property<'a>(&'a self, path: &'a DavPath, name: &'a PropName) -> FsFuture<'a, PropValue> {
        let res = self.with_state(|st| {
            let node = st.tree.get(path)?;
            node.props.get(name).cloned().ok_or(FsError::NotFound)
        });
        Box::pin(future::ready(res))
    }

    fn get_properties<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<(PropName, PropValue)>> {
        let res = self.with_state(|st| {
            let node = st.tree.get(path)?;
            Ok(node
                .props
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        });
        Box::pin(future::ready(res))
    }

    fn set_property<'a>(
        &'a self,
        path: &'a DavPath,
        name: PropName,
        value: PropValue,
    ) -> FsFuture<'a, ()> {
        let res = self.with_state(|st| {
            let mut node = st.tree.get(path)?.clone();
            node.props.insert(name, value);
            st.put(path, node);
            Ok(())
        });
        Box::pin(future::ready(res))
    }

    fn remove_property<'a>(&'a self, path: &'a DavPath, name: &'a PropName) -> FsFuture<'a, ()> {
        let res = self.with_state(|st| {
            let mut node = st.tree.get(path)?.clone();
            if node.props.remove(name).is_some() {
                st.put(path, node);
            }
            Ok(())
        });
        Box::pin(future::ready(res))
    }
}
