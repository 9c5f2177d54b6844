//! Node correlator
//!
//! Folds listing snapshots and descriptor records into one authoritative
//! record per fingerprint. Snapshots may arrive in any interleaving
//! across feeds; point-in-time attributes (nickname, flags, current
//! addresses, ports) always reflect the snapshot with the newest validity
//! time, while the address history and first-seen time accumulate.
//!
//! Nodes are never removed. [`NodeCorrelator::current_set`] selects the
//! ones seen within the retention window of the newest listing.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::time::NO_TIME_AVAILABLE;
use crate::types::{
    DescriptorDetails, DescriptorRecord, Fingerprint, ListingEntry, ListingSnapshot, Node, NodeKind,
};

/// Flag a node must carry to be reported as running
pub const RUNNING_FLAG: &str = "Running";

/// Result of merging one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotMerge {
    /// Accepted entries, in snapshot order
    pub sighted: Vec<Fingerprint>,
    pub created: usize,
    /// Existing nodes whose record changed
    pub updated: usize,
    /// One message per rejected entry
    pub rejected: Vec<String>,
}

/// What happened to one descriptor record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorOutcome {
    Applied,
    /// Not newer than the descriptor already on the node
    Stale,
    /// No listing has mentioned this fingerprint yet
    UnknownNode,
}

/// Nodes selected for publication, handed to later stages by value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentSet {
    /// Sorted by fingerprint
    pub nodes: Vec<Node>,
    pub relays_published_millis: i64,
    pub bridges_published_millis: i64,
}

impl CurrentSet {
    /// Whether the node appeared in the newest listing of its kind with the `Running` flag
    pub fn is_running(&self, node: &Node) -> bool {
        let latest = match node.kind {
            NodeKind::Relay => self.relays_published_millis,
            NodeKind::Bridge => self.bridges_published_millis,
        };
        latest != NO_TIME_AVAILABLE
            && node.last_seen_millis == latest
            && node.has_flag(RUNNING_FLAG)
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.nodes.iter().map(|n| n.fingerprint.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Authoritative node set
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCorrelator {
    nodes: BTreeMap<Fingerprint, Node>,
    relays_published_millis: i64,
    bridges_published_millis: i64,
}

impl Default for NodeCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeCorrelator {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            relays_published_millis: NO_TIME_AVAILABLE,
            bridges_published_millis: NO_TIME_AVAILABLE,
        }
    }

    /// Seed the set with previously persisted nodes.
    ///
    /// The newest listing time per kind is recovered from the nodes'
    /// last-seen times.
    pub fn load(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.note_listing(node.kind, node.last_seen_millis);
            match self.nodes.get_mut(&node.fingerprint) {
                Some(existing) => absorb_node(existing, node),
                None => {
                    self.nodes.insert(node.fingerprint.clone(), node);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Node> {
        self.nodes.get(fingerprint)
    }

    /// All known nodes, sorted by fingerprint
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn latest_listing(&self, kind: NodeKind) -> i64 {
        match kind {
            NodeKind::Relay => self.relays_published_millis,
            NodeKind::Bridge => self.bridges_published_millis,
        }
    }

    fn note_listing(&mut self, kind: NodeKind, millis: i64) {
        let latest = match kind {
            NodeKind::Relay => &mut self.relays_published_millis,
            NodeKind::Bridge => &mut self.bridges_published_millis,
        };
        *latest = (*latest).max(millis);
    }

    /// Upsert every entry of a snapshot.
    ///
    /// An entry with an unparseable fingerprint is rejected on its own;
    /// the rest of the snapshot still applies.
    pub fn merge_snapshot(&mut self, snapshot: &ListingSnapshot) -> SnapshotMerge {
        let mut merge = SnapshotMerge::default();
        let ts = snapshot.valid_after_millis;
        self.note_listing(snapshot.kind, ts);

        for entry in &snapshot.entries {
            let fingerprint = match Fingerprint::parse(&entry.fingerprint) {
                Ok(fp) => fp,
                Err(e) => {
                    tracing::debug!(kind = snapshot.kind.display_name(), "Rejecting entry: {}", e);
                    merge.rejected.push(e.to_string());
                    continue;
                }
            };

            match self.nodes.get_mut(&fingerprint) {
                Some(node) => {
                    let before = node.clone();
                    apply_entry(node, snapshot.kind, ts, entry);
                    if *node != before {
                        merge.updated += 1;
                    }
                }
                None => {
                    let mut node = Node::new(fingerprint.clone(), snapshot.kind, ts);
                    replace_attributes(&mut node, snapshot.kind, entry);
                    node.remember_addresses(&entry.addresses);
                    self.nodes.insert(fingerprint.clone(), node);
                    merge.created += 1;
                }
            }
            merge.sighted.push(fingerprint);
        }
        merge
    }

    /// Attach descriptor details; the newest publication wins.
    pub fn merge_descriptor(&mut self, record: &DescriptorRecord) -> Result<DescriptorOutcome> {
        let fingerprint = Fingerprint::parse(&record.fingerprint)?;
        let Some(node) = self.nodes.get_mut(&fingerprint) else {
            return Ok(DescriptorOutcome::UnknownNode);
        };
        let newer = match &node.descriptor {
            Some(current) => record.published_millis > current.published_millis,
            None => true,
        };
        if !newer {
            return Ok(DescriptorOutcome::Stale);
        }
        node.descriptor = Some(DescriptorDetails::from(record));
        Ok(DescriptorOutcome::Applied)
    }

    /// Nodes last seen within `window_millis` of the newest listing of either kind
    pub fn current_set(&self, window_millis: i64) -> CurrentSet {
        let newest = self
            .relays_published_millis
            .max(self.bridges_published_millis);
        let nodes = if newest == NO_TIME_AVAILABLE {
            Vec::new()
        } else {
            let cutoff = newest.saturating_sub(window_millis);
            self.nodes
                .values()
                .filter(|n| n.last_seen_millis >= cutoff)
                .cloned()
                .collect()
        };
        CurrentSet {
            nodes,
            relays_published_millis: self.relays_published_millis,
            bridges_published_millis: self.bridges_published_millis,
        }
    }
}

/// Fold one listing entry into a node. Point-in-time attributes only
/// change for a strictly newer snapshot.
fn apply_entry(node: &mut Node, kind: NodeKind, ts: i64, entry: &ListingEntry) {
    node.remember_addresses(&entry.addresses);
    node.first_seen_millis = node.first_seen_millis.min(ts);
    if ts > node.last_seen_millis {
        replace_attributes(node, kind, entry);
        node.last_seen_millis = ts;
    }
}

fn replace_attributes(node: &mut Node, kind: NodeKind, entry: &ListingEntry) {
    node.kind = kind;
    node.nickname = entry.nickname.clone();
    node.current_addresses = entry.addresses.clone();
    node.or_port = entry.or_port;
    node.dir_port = entry.dir_port;
    node.flags = entry.flags.clone();
}

/// Merge a persisted copy of a node into the in-memory one
fn absorb_node(existing: &mut Node, other: Node) {
    existing.remember_addresses(&other.addresses);
    existing.first_seen_millis = existing.first_seen_millis.min(other.first_seen_millis);
    let other_descriptor_newer = match (&existing.descriptor, &other.descriptor) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(a), Some(b)) => b.published_millis > a.published_millis,
    };
    if other_descriptor_newer {
        existing.descriptor = other.descriptor.clone();
    }
    if other.last_seen_millis > existing.last_seen_millis {
        let addresses = std::mem::take(&mut existing.addresses);
        let first_seen = existing.first_seen_millis;
        let descriptor = existing.descriptor.take();
        *existing = other;
        existing.addresses = addresses;
        existing.first_seen_millis = first_seen;
        existing.descriptor = descriptor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{ONE_DAY, ONE_HOUR, ONE_WEEK};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const T0: i64 = 1_700_000_000_000;

    fn fp_str(prefix: &str) -> String {
        prefix.repeat(40 / prefix.len())
    }

    fn entry(prefix: &str, nickname: &str, addresses: &[&str], flags: &[&str]) -> ListingEntry {
        ListingEntry {
            fingerprint: fp_str(prefix),
            nickname: nickname.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            or_port: 9001,
            dir_port: 0,
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn snapshot(kind: NodeKind, ts: i64, entries: Vec<ListingEntry>) -> ListingSnapshot {
        ListingSnapshot {
            kind,
            valid_after_millis: ts,
            entries,
        }
    }

    fn flags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_flags_replaced_and_seen_extended() {
        let mut correlator = NodeCorrelator::new();
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0,
            vec![entry("AAAA", "alpha", &["10.0.0.1"], &["Running", "Valid"])],
        ));
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0 + ONE_HOUR,
            vec![entry("AAAA", "alpha", &["10.0.0.1"], &["Running"])],
        ));

        let node = correlator
            .get(&Fingerprint::parse(&fp_str("AAAA")).unwrap())
            .unwrap();
        assert_eq!(node.flags, flags(&["Running"]));
        assert_eq!(node.first_seen_millis, T0);
        assert_eq!(node.last_seen_millis, T0 + ONE_HOUR);
    }

    #[test]
    fn test_older_snapshot_does_not_override() {
        let mut correlator = NodeCorrelator::new();
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0 + ONE_HOUR,
            vec![entry("AAAA", "newer", &["10.0.0.2"], &["Running"])],
        ));
        let merge = correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0,
            vec![entry("AAAA", "older", &["10.0.0.1"], &["Valid"])],
        ));
        assert_eq!(merge.updated, 1);

        let node = correlator.nodes().next().unwrap();
        assert_eq!(node.nickname, "newer");
        assert_eq!(node.flags, flags(&["Running"]));
        assert_eq!(node.current_addresses, vec!["10.0.0.2"]);
        assert_eq!(node.addresses, vec!["10.0.0.2", "10.0.0.1"]);
        assert_eq!(node.first_seen_millis, T0);
        assert_eq!(node.last_seen_millis, T0 + ONE_HOUR);
    }

    #[test]
    fn test_malformed_entry_rejected_individually() {
        let mut correlator = NodeCorrelator::new();
        let mut bad = entry("AAAA", "bad", &[], &[]);
        bad.fingerprint = "not-a-fingerprint".to_string();
        let merge = correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0,
            vec![bad, entry("BBBB", "good", &["10.0.0.3"], &["Running"])],
        ));
        assert_eq!(merge.rejected.len(), 1);
        assert_eq!(merge.created, 1);
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_descriptor_newest_wins() {
        let mut correlator = NodeCorrelator::new();
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0,
            vec![entry("AAAA", "alpha", &[], &[])],
        ));
        let record = |published, contact: &str| DescriptorRecord {
            fingerprint: fp_str("AAAA"),
            published_millis: published,
            contact: Some(contact.to_string()),
            exit_policy: vec!["reject *:*".to_string()],
            platform: None,
            family: Vec::new(),
        };
        assert_eq!(
            correlator.merge_descriptor(&record(T0, "first")).unwrap(),
            DescriptorOutcome::Applied
        );
        assert_eq!(
            correlator.merge_descriptor(&record(T0 - 1, "older")).unwrap(),
            DescriptorOutcome::Stale
        );
        assert_eq!(
            correlator.merge_descriptor(&record(T0 + 1, "second")).unwrap(),
            DescriptorOutcome::Applied
        );
        let node = correlator.nodes().next().unwrap();
        assert_eq!(node.descriptor.as_ref().unwrap().contact.as_deref(), Some("second"));

        let unknown = DescriptorRecord {
            fingerprint: fp_str("CCCC"),
            ..record(T0, "x")
        };
        assert_eq!(
            correlator.merge_descriptor(&unknown).unwrap(),
            DescriptorOutcome::UnknownNode
        );
        let bad = DescriptorRecord {
            fingerprint: "xyz".into(),
            ..record(T0, "x")
        };
        assert!(correlator.merge_descriptor(&bad).unwrap_err().is_input());
    }

    #[test]
    fn test_current_set_and_running() {
        let mut correlator = NodeCorrelator::new();
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0,
            vec![entry("AAAA", "old", &[], &["Running"])],
        ));
        correlator.merge_snapshot(&snapshot(
            NodeKind::Relay,
            T0 + 10 * ONE_DAY,
            vec![
                entry("BBBB", "now", &[], &["Running"]),
                entry("DDDD", "stopped", &[], &["Valid"]),
            ],
        ));
        correlator.merge_snapshot(&snapshot(
            NodeKind::Bridge,
            T0 + 9 * ONE_DAY,
            vec![entry("CCCC", "bridge", &[], &["Running"])],
        ));

        let current = correlator.current_set(ONE_WEEK);
        let names: Vec<_> = current.nodes.iter().map(|n| n.nickname.as_str()).collect();
        assert_eq!(names, vec!["now", "bridge", "stopped"]);
        assert!(current.is_running(&current.nodes[0]));
        assert!(current.is_running(&current.nodes[1]));
        assert!(!current.is_running(&current.nodes[2]));
        // Archived nodes are kept, just not current
        assert_eq!(correlator.len(), 4);
    }

    #[test]
    fn test_empty_correlator_has_no_current_nodes() {
        let correlator = NodeCorrelator::new();
        assert!(correlator.current_set(ONE_WEEK).is_empty());
    }

    #[test]
    fn test_load_recovers_latest_listing() {
        let mut first = NodeCorrelator::new();
        first.merge_snapshot(&snapshot(
            NodeKind::Bridge,
            T0,
            vec![entry("AAAA", "b", &["10.0.0.1"], &["Running"])],
        ));
        let mut second = NodeCorrelator::new();
        second.load(first.nodes().cloned());
        assert_eq!(second.latest_listing(NodeKind::Bridge), T0);
        assert_eq!(second.latest_listing(NodeKind::Relay), NO_TIME_AVAILABLE);
        assert_eq!(second, first);
    }

    fn arb_entry() -> impl Strategy<Value = ListingEntry> {
        (
            prop::sample::select(vec!["AAAA", "BBBB", "CCCC", "zz"]),
            "[a-z]{1,8}",
            prop::collection::vec(
                prop::sample::select(vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                0..3,
            ),
            prop::collection::btree_set(
                prop::sample::select(vec!["Running", "Valid", "Exit", "Guard"]),
                0..4,
            ),
        )
            .prop_map(|(prefix, nickname, addresses, flags)| ListingEntry {
                fingerprint: prefix.repeat(40 / prefix.len()),
                nickname,
                addresses: addresses.into_iter().map(String::from).collect(),
                or_port: 443,
                dir_port: 0,
                flags: flags.into_iter().map(String::from).collect(),
            })
    }

    proptest! {
        #[test]
        fn test_merging_snapshot_twice_is_idempotent(
            entries in prop::collection::vec(arb_entry(), 0..12),
            hours in 0i64..1000,
            prior in prop::collection::vec(arb_entry(), 0..6),
        ) {
            let mut once = NodeCorrelator::new();
            once.merge_snapshot(&snapshot(NodeKind::Relay, T0, prior.clone()));
            let snap = snapshot(NodeKind::Relay, T0 + hours * ONE_HOUR - 500 * ONE_HOUR, entries);
            once.merge_snapshot(&snap);

            let mut twice = once.clone();
            let merge = twice.merge_snapshot(&snap);
            prop_assert_eq!(merge.created, 0);
            prop_assert_eq!(twice, once);
        }
    }
}
