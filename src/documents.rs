//! Published document layouts and the builders that fill them
//!
//! Every run rebuilds these from the current node set and the history
//! engine. Field names follow the public lookup protocol, which is why
//! the summary uses one-letter keys.

use serde::{Deserialize, Serialize};

use crate::correlator::CurrentSet;
use crate::history::{Bucket, HistoryEngine, TierLadder};
use crate::store::Document;
use crate::time::{format_millis, ONE_SECOND};
use crate::types::{Fingerprint, Metric, Node};

/// Time of the last completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub updated_millis: i64,
    pub relays_published_millis: i64,
    pub bridges_published_millis: i64,
}

/// Compact per-node record used for search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    #[serde(rename = "n")]
    pub nickname: String,
    #[serde(rename = "f")]
    pub fingerprint: String,
    #[serde(rename = "a")]
    pub addresses: Vec<String>,
    #[serde(rename = "r")]
    pub running: bool,
}

/// Full current attributes of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailsDocument {
    pub nickname: String,
    pub fingerprint: String,
    pub kind: String,
    pub or_addresses: Vec<String>,
    pub or_port: u16,
    #[serde(default)]
    pub dir_port: u16,
    pub running: bool,
    pub flags: Vec<String>,
    pub first_seen: String,
    pub last_seen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_policy: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub family: Vec<String>,
}

/// One published bucket; intervals without data are simply missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedBucket {
    pub start: String,
    pub duration_secs: i64,
    pub value: f64,
    pub count: u64,
}

/// Buckets of one resolution tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHistory {
    pub tier: String,
    pub buckets: Vec<PublishedBucket>,
}

/// Published history of a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub fingerprint: String,
    pub tiers: Vec<TierHistory>,
}

/// Published read and write bandwidth history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthDocument {
    pub fingerprint: String,
    pub read_history: Vec<TierHistory>,
    pub write_history: Vec<TierHistory>,
}

pub fn summary(node: &Node, running: bool) -> SummaryDocument {
    SummaryDocument {
        nickname: node.nickname.clone(),
        fingerprint: node.fingerprint.to_string(),
        addresses: node.current_addresses.clone(),
        running,
    }
}

pub fn details(node: &Node, running: bool) -> DetailsDocument {
    let descriptor = node.descriptor.as_ref();
    DetailsDocument {
        nickname: node.nickname.clone(),
        fingerprint: node.fingerprint.to_string(),
        kind: node.kind.display_name().to_string(),
        or_addresses: node.current_addresses.clone(),
        or_port: node.or_port,
        dir_port: node.dir_port,
        running,
        flags: node.flags.iter().cloned().collect(),
        first_seen: format_millis(node.first_seen_millis),
        last_seen: format_millis(node.last_seen_millis),
        contact: descriptor.and_then(|d| d.contact.clone()),
        platform: descriptor.and_then(|d| d.platform.clone()),
        exit_policy: descriptor.map(|d| d.exit_policy.clone()).unwrap_or_default(),
        family: descriptor.map(|d| d.family.clone()).unwrap_or_default(),
    }
}

fn publish_bucket(bucket: &Bucket) -> PublishedBucket {
    PublishedBucket {
        start: format_millis(bucket.start_millis),
        duration_secs: bucket.duration_millis / ONE_SECOND,
        value: bucket.aggregated_value,
        count: bucket.sample_count,
    }
}

/// Non-empty tiers of one series, finest first
pub fn tier_histories(
    ladder: &TierLadder,
    engine: &HistoryEngine,
    fingerprint: &Fingerprint,
) -> Vec<TierHistory> {
    ladder
        .tiers
        .iter()
        .enumerate()
        .filter_map(|(idx, tier)| {
            let buckets = engine.get_series(fingerprint, ladder.metric, idx);
            (!buckets.is_empty()).then(|| TierHistory {
                tier: tier.name.clone(),
                buckets: buckets.iter().map(publish_bucket).collect(),
            })
        })
        .collect()
}

pub fn history(
    engine: &HistoryEngine,
    fingerprint: &Fingerprint,
    metric: Metric,
) -> HistoryDocument {
    HistoryDocument {
        fingerprint: fingerprint.to_string(),
        tiers: tier_histories(engine.ladder(metric), engine, fingerprint),
    }
}

pub fn bandwidth(engine: &HistoryEngine, fingerprint: &Fingerprint) -> BandwidthDocument {
    BandwidthDocument {
        fingerprint: fingerprint.to_string(),
        read_history: tier_histories(engine.ladder(Metric::ReadBandwidth), engine, fingerprint),
        write_history: tier_histories(engine.ladder(Metric::WriteBandwidth), engine, fingerprint),
    }
}

/// Every published document for every current node
pub fn published_documents(
    current: &CurrentSet,
    engine: &HistoryEngine,
) -> Vec<(Fingerprint, Document)> {
    let mut out = Vec::with_capacity(current.len() * 5);
    for node in &current.nodes {
        let fp = &node.fingerprint;
        let running = current.is_running(node);
        out.push((fp.clone(), Document::Summary(summary(node, running))));
        out.push((fp.clone(), Document::Details(details(node, running))));
        out.push((fp.clone(), Document::Bandwidth(bandwidth(engine, fp))));
        out.push((fp.clone(), Document::Uptime(history(engine, fp, Metric::Uptime))));
        out.push((fp.clone(), Document::Clients(history(engine, fp, Metric::Clients))));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistorySettings;
    use crate::time::{ONE_DAY, ONE_HOUR};
    use crate::types::{DescriptorDetails, MeasurementSample, NodeKind};

    fn node() -> Node {
        let fp = Fingerprint::parse(&"AAAA".repeat(10)).unwrap();
        let mut node = Node::new(fp, NodeKind::Relay, 0);
        node.nickname = "alpha".into();
        node.current_addresses = vec!["10.0.0.1".into()];
        node.addresses = vec!["10.0.0.9".into(), "10.0.0.1".into()];
        node.flags = ["Running", "Valid"].iter().map(|f| f.to_string()).collect();
        node.last_seen_millis = ONE_DAY;
        node
    }

    #[test]
    fn test_summary_uses_short_keys() {
        let json = serde_json::to_value(summary(&node(), true)).unwrap();
        assert_eq!(json["n"], "alpha");
        assert_eq!(json["r"], true);
        assert_eq!(json["a"][0], "10.0.0.1");
    }

    #[test]
    fn test_details_formats_times_and_descriptor() {
        let mut n = node();
        n.descriptor = Some(DescriptorDetails {
            published_millis: ONE_HOUR,
            contact: Some("ops@example.org".into()),
            platform: Some("Tor 0.4.8".into()),
            exit_policy: vec!["reject *:*".into()],
            family: Vec::new(),
        });
        let doc = details(&n, false);
        assert_eq!(doc.first_seen, "1970-01-01 00:00:00");
        assert_eq!(doc.last_seen, "1970-01-02 00:00:00");
        assert_eq!(doc.flags, vec!["Running", "Valid"]);
        assert_eq!(doc.contact.as_deref(), Some("ops@example.org"));
        assert!(!doc.running);

        let json = serde_json::to_string(&doc).unwrap();
        assert!(!json.contains("family"));
    }

    #[test]
    fn test_history_skips_empty_tiers() {
        let n = node();
        let mut engine = HistoryEngine::new(&HistorySettings::default());
        engine
            .merge_sample(&n.fingerprint, Metric::Uptime, MeasurementSample::new(0, 1.0))
            .unwrap();
        let doc = history(&engine, &n.fingerprint, Metric::Uptime);
        assert_eq!(doc.tiers.len(), 1);
        assert_eq!(doc.tiers[0].tier, "1_week");
        assert_eq!(doc.tiers[0].buckets[0].duration_secs, 3600);
        assert_eq!(doc.tiers[0].buckets[0].value, 1.0);

        let bw = bandwidth(&engine, &n.fingerprint);
        assert!(bw.read_history.is_empty());
        assert!(bw.write_history.is_empty());
    }
}
