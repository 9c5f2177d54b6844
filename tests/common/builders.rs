//! Test data builders for creating test inputs

use onionoo_rs::types::{ListingEntry, ListingSnapshot, MeasurementRecord, NodeKind};
use onionoo_rs::{MeasurementSample, Metric};

/// Builder for listing entries
pub struct EntryBuilder {
    entry: ListingEntry,
}

impl EntryBuilder {
    /// Entry whose fingerprint repeats `prefix` to 40 characters
    pub fn new(prefix: &str) -> Self {
        Self {
            entry: ListingEntry {
                fingerprint: prefix.repeat(40 / prefix.len().max(1)),
                nickname: format!("node{}", prefix.to_lowercase()),
                addresses: Vec::new(),
                or_port: 9001,
                dir_port: 0,
                flags: Default::default(),
            },
        }
    }

    pub fn raw_fingerprint(mut self, fingerprint: &str) -> Self {
        self.entry.fingerprint = fingerprint.to_string();
        self
    }

    pub fn nickname(mut self, nickname: &str) -> Self {
        self.entry.nickname = nickname.to_string();
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.entry.addresses.push(address.to_string());
        self
    }

    pub fn flags(mut self, flags: &[&str]) -> Self {
        self.entry.flags = flags.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn build(self) -> ListingEntry {
        self.entry
    }
}

/// Builder for listing snapshots
pub struct SnapshotBuilder {
    snapshot: ListingSnapshot,
}

impl SnapshotBuilder {
    pub fn relays(valid_after_millis: i64) -> Self {
        Self::new(NodeKind::Relay, valid_after_millis)
    }

    pub fn bridges(valid_after_millis: i64) -> Self {
        Self::new(NodeKind::Bridge, valid_after_millis)
    }

    fn new(kind: NodeKind, valid_after_millis: i64) -> Self {
        Self {
            snapshot: ListingSnapshot {
                kind,
                valid_after_millis,
                entries: Vec::new(),
            },
        }
    }

    pub fn entry(mut self, entry: EntryBuilder) -> Self {
        self.snapshot.entries.push(entry.build());
        self
    }

    pub fn build(self) -> ListingSnapshot {
        self.snapshot
    }
}

/// Measurement record with `(millis, value)` samples
pub fn measurements(prefix: &str, metric: Metric, samples: &[(i64, f64)]) -> MeasurementRecord {
    MeasurementRecord {
        fingerprint: prefix.repeat(40 / prefix.len().max(1)),
        metric,
        samples: samples
            .iter()
            .map(|(t, v)| MeasurementSample::new(*t, *v))
            .collect(),
    }
}
