//! Core data types for the status updater
//!
//! This module contains the records that flow between the pipeline
//! stages: raw inputs handed over by the descriptor source, the
//! correlated [`Node`] record, and the metric/sample vocabulary used by
//! the history engine.
//!
//! # Main Types
//!
//! - [`Fingerprint`] - Validated 40-hex-digit node identifier
//! - [`Node`] - Correlated record of one relay or bridge
//! - [`ListingSnapshot`] - One published listing of nodes with its validity time
//! - [`DescriptorRecord`] - Self-published node metadata
//! - [`MeasurementRecord`] - Timestamped samples of one metric for one node
//! - [`Metric`] - The historical series kept per node

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{OnionooError, Result};
use crate::time::ONE_HOUR;

/// Number of hex digits in a fingerprint
pub const FINGERPRINT_LEN: usize = 40;

/// Unique node identifier: 40 hex digits, normalized to uppercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse and normalize a fingerprint
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.len() != FINGERPRINT_LEN {
            return Err(OnionooError::Input(format!(
                "fingerprint '{}' has {} characters, expected {}",
                trimmed,
                trimmed.len(),
                FINGERPRINT_LEN
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OnionooError::Input(format!(
                "fingerprint '{}' contains non-hex characters",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = OnionooError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = OnionooError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Whether a node is a public relay or an unlisted bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Listed in the relay consensus
    #[default]
    Relay,
    /// Listed in the bridge authority's status
    Bridge,
}

impl NodeKind {
    pub fn is_relay(&self) -> bool {
        matches!(self, NodeKind::Relay)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NodeKind::Relay => "relay",
            NodeKind::Bridge => "bridge",
        }
    }
}

/// One row of a listing snapshot, exactly as handed over by the source.
///
/// The fingerprint is kept as a raw string so that a malformed entry can
/// be rejected on its own without failing the whole snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub fingerprint: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub or_port: u16,
    #[serde(default)]
    pub dir_port: u16,
    #[serde(default)]
    pub flags: BTreeSet<String>,
}

/// One published set of currently known nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSnapshot {
    #[serde(default)]
    pub kind: NodeKind,
    /// Start of the validity interval (consensus valid-after or bridge status published)
    pub valid_after_millis: i64,
    pub entries: Vec<ListingEntry>,
}

/// Self-published metadata of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub fingerprint: String,
    pub published_millis: i64,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub exit_policy: Vec<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub family: Vec<String>,
}

/// Descriptor-derived attributes kept on a [`Node`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorDetails {
    pub published_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_policy: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub family: Vec<String>,
}

impl From<&DescriptorRecord> for DescriptorDetails {
    fn from(record: &DescriptorRecord) -> Self {
        Self {
            published_millis: record.published_millis,
            contact: record.contact.clone(),
            platform: record.platform.clone(),
            exit_policy: record.exit_policy.clone(),
            family: record.family.clone(),
        }
    }
}

/// Correlated record of one relay or bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub fingerprint: Fingerprint,
    pub nickname: String,
    pub kind: NodeKind,
    /// Every address ever listed for this node, in first-sighting order
    pub addresses: Vec<String>,
    /// Addresses of the most recent listing
    #[serde(default)]
    pub current_addresses: Vec<String>,
    #[serde(default)]
    pub or_port: u16,
    #[serde(default)]
    pub dir_port: u16,
    /// Flags of the most recent listing (never accumulated)
    pub flags: BTreeSet<String>,
    pub first_seen_millis: i64,
    pub last_seen_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<DescriptorDetails>,
}

impl Node {
    /// Create a node from its first sighting
    pub fn new(fingerprint: Fingerprint, kind: NodeKind, seen_millis: i64) -> Self {
        Self {
            fingerprint,
            nickname: String::new(),
            kind,
            addresses: Vec::new(),
            current_addresses: Vec::new(),
            or_port: 0,
            dir_port: 0,
            flags: BTreeSet::new(),
            first_seen_millis: seen_millis,
            last_seen_millis: seen_millis,
            descriptor: None,
        }
    }

    /// Append addresses not yet in the history
    pub fn remember_addresses<'a>(&mut self, addresses: impl IntoIterator<Item = &'a String>) {
        for address in addresses {
            if !self.addresses.contains(address) {
                self.addresses.push(address.clone());
            }
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// How samples of a metric are folded into a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Running mean of sample values
    Gauge,
    /// Fraction of the bucket covered by samples, weighted by duration
    Interval { sample_millis: i64 },
}

/// Historical series kept per node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ReadBandwidth,
    WriteBandwidth,
    Uptime,
    Clients,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::ReadBandwidth,
        Metric::WriteBandwidth,
        Metric::Uptime,
        Metric::Clients,
    ];

    /// Position in [`Metric::ALL`]
    pub fn index(&self) -> usize {
        match self {
            Metric::ReadBandwidth => 0,
            Metric::WriteBandwidth => 1,
            Metric::Uptime => 2,
            Metric::Clients => 3,
        }
    }

    pub fn aggregation(&self) -> Aggregation {
        match self {
            Metric::ReadBandwidth | Metric::WriteBandwidth | Metric::Clients => {
                Aggregation::Gauge
            }
            Metric::Uptime => Aggregation::Interval {
                sample_millis: ONE_HOUR,
            },
        }
    }

    /// Stable name used for directories and config keys
    pub fn name(&self) -> &'static str {
        match self {
            Metric::ReadBandwidth => "read_bandwidth",
            Metric::WriteBandwidth => "write_bandwidth",
            Metric::Uptime => "uptime",
            Metric::Clients => "clients",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One (timestamp, value) observation of a metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub timestamp_millis: i64,
    pub value: f64,
}

impl MeasurementSample {
    pub fn new(timestamp_millis: i64, value: f64) -> Self {
        Self {
            timestamp_millis,
            value,
        }
    }
}

/// Timestamped samples of one metric for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub fingerprint: String,
    pub metric: Metric,
    pub samples: Vec<MeasurementSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_normalizes_case() {
        let fp = Fingerprint::parse(&"ab12".repeat(10)).unwrap();
        assert_eq!(fp.as_str(), "AB12".repeat(10));
    }

    #[test]
    fn test_fingerprint_rejects_wrong_length() {
        assert!(Fingerprint::parse("AAAA").is_err());
        assert!(Fingerprint::parse(&"A".repeat(41)).is_err());
    }

    #[test]
    fn test_fingerprint_rejects_non_hex() {
        let err = Fingerprint::parse(&"G".repeat(40)).unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_fingerprint_serde_validates() {
        let ok: Fingerprint = serde_json::from_str(&format!("\"{}\"", "c".repeat(40))).unwrap();
        assert_eq!(ok.as_str(), "C".repeat(40));
        assert!(serde_json::from_str::<Fingerprint>("\"zz\"").is_err());
    }

    #[test]
    fn test_remember_addresses_is_append_only() {
        let fp = Fingerprint::parse(&"A".repeat(40)).unwrap();
        let mut node = Node::new(fp, NodeKind::Relay, 0);
        node.remember_addresses(&["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        node.remember_addresses(&["10.0.0.2".to_string(), "10.0.0.3".to_string()]);
        assert_eq!(node.addresses, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_metric_aggregation() {
        assert_eq!(Metric::Clients.aggregation(), Aggregation::Gauge);
        assert!(matches!(
            Metric::Uptime.aggregation(),
            Aggregation::Interval { sample_millis } if sample_millis == ONE_HOUR
        ));
    }
}
