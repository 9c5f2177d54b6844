//! Node index
//!
//! A point-in-time lookup structure over the current node set, rebuilt
//! from scratch every run. [`NodeIndexer::build`] constructs a complete
//! [`NodeIndex`] in isolation; [`IndexHandle::publish`] then swaps it in
//! with a single atomic pointer store, so a reader holding the previous
//! `Arc<NodeIndex>` keeps a consistent view until it loads again.
//!
//! Fingerprints under one key are kept in node-processing order, so the
//! same input always produces the same index.

use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::correlator::CurrentSet;
use crate::time::NO_TIME_AVAILABLE;
use crate::types::{Fingerprint, NodeKind};

/// Minimal per-node record kept for search results
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    pub nickname: String,
    pub kind: NodeKind,
    pub running: bool,
}

type KeyMap = HashMap<String, Vec<Fingerprint>>;

/// Callers register each (key, node) pair at most once
fn register(map: &mut KeyMap, key: String, fingerprint: &Fingerprint) {
    map.entry(key).or_default().push(fingerprint.clone());
}

fn lookup<'a>(map: &'a KeyMap, key: &str) -> &'a [Fingerprint] {
    map.get(key).map(Vec::as_slice).unwrap_or(&[])
}

/// Immutable key → fingerprints mapping
#[derive(Debug, Clone, PartialEq)]
pub struct NodeIndex {
    pub built_millis: i64,
    pub relays_published_millis: i64,
    pub bridges_published_millis: i64,
    entries: Vec<IndexEntry>,
    by_fingerprint: KeyMap,
    by_nickname: KeyMap,
    by_address: KeyMap,
    by_flag: KeyMap,
}

impl Default for NodeIndex {
    fn default() -> Self {
        Self {
            built_millis: NO_TIME_AVAILABLE,
            relays_published_millis: NO_TIME_AVAILABLE,
            bridges_published_millis: NO_TIME_AVAILABLE,
            entries: Vec::new(),
            by_fingerprint: KeyMap::new(),
            by_nickname: KeyMap::new(),
            by_address: KeyMap::new(),
            by_flag: KeyMap::new(),
        }
    }
}

impl NodeIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed nodes in processing order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn lookup_fingerprint(&self, fingerprint: &str) -> &[Fingerprint] {
        lookup(&self.by_fingerprint, &fingerprint.to_ascii_uppercase())
    }

    pub fn lookup_nickname(&self, nickname: &str) -> &[Fingerprint] {
        lookup(&self.by_nickname, &nickname.to_lowercase())
    }

    pub fn lookup_address(&self, address: &str) -> &[Fingerprint] {
        lookup(&self.by_address, address)
    }

    pub fn lookup_flag(&self, flag: &str) -> &[Fingerprint] {
        lookup(&self.by_flag, &flag.to_lowercase())
    }

    /// Free-text search: fingerprint prefix, nickname substring or exact address.
    ///
    /// Results keep index order and contain each node once.
    pub fn search(&self, term: &str) -> Vec<Fingerprint> {
        let term = term.trim();
        if term.is_empty() {
            return Vec::new();
        }
        let upper = term.to_ascii_uppercase();
        let lower = term.to_lowercase();
        let addressed = self.lookup_address(term);
        self.entries
            .iter()
            .filter(|e| {
                e.fingerprint.as_str().starts_with(&upper)
                    || e.nickname.to_lowercase().contains(&lower)
                    || addressed.contains(&e.fingerprint)
            })
            .map(|e| e.fingerprint.clone())
            .collect()
    }
}

/// Builds a fresh [`NodeIndex`] from the current node set
pub struct NodeIndexer;

impl NodeIndexer {
    pub fn build(current: &CurrentSet, built_millis: i64) -> NodeIndex {
        let mut index = NodeIndex {
            built_millis,
            relays_published_millis: current.relays_published_millis,
            bridges_published_millis: current.bridges_published_millis,
            ..NodeIndex::default()
        };

        for node in &current.nodes {
            let fp = &node.fingerprint;
            register(&mut index.by_fingerprint, fp.as_str().to_string(), fp);
            if !node.nickname.is_empty() {
                register(&mut index.by_nickname, node.nickname.to_lowercase(), fp);
            }
            let addresses: BTreeSet<&String> = node.current_addresses.iter().collect();
            for address in addresses {
                register(&mut index.by_address, address.clone(), fp);
            }
            for flag in &node.flags {
                register(&mut index.by_flag, flag.to_lowercase(), fp);
            }
            index.entries.push(IndexEntry {
                fingerprint: fp.clone(),
                nickname: node.nickname.clone(),
                kind: node.kind,
                running: current.is_running(node),
            });
        }

        tracing::debug!(
            nodes = index.entries.len(),
            nicknames = index.by_nickname.len(),
            addresses = index.by_address.len(),
            "Built node index"
        );
        index
    }
}

/// Shared, atomically replaceable index
#[derive(Debug)]
pub struct IndexHandle {
    inner: ArcSwap<NodeIndex>,
}

impl Default for IndexHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexHandle {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(NodeIndex::default()),
        }
    }

    /// Current snapshot; stays valid even after a later publish
    pub fn load(&self) -> Arc<NodeIndex> {
        self.inner.load_full()
    }

    /// Replace the published index, returning the previous one
    pub fn publish(&self, index: NodeIndex) -> Arc<NodeIndex> {
        self.inner.swap(Arc::new(index))
    }
}
