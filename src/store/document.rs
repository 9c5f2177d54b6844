//! Document kinds and their stored JSON form

use std::fmt;
use std::path::PathBuf;

use crate::documents::{
    BandwidthDocument, DetailsDocument, HistoryDocument, SummaryDocument, UpdateStatus,
};
use crate::error::{OnionooError, Result};
use crate::history::StoredHistory;
use crate::types::{Metric, Node};

/// Tag selecting a document's layout and location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKind {
    /// Persisted node record (internal)
    NodeStatus,
    /// Persisted tiers of one metric (internal)
    HistoryStatus(Metric),
    /// Time of the last completed run (singleton)
    UpdateStatus,
    Summary,
    Details,
    Bandwidth,
    Uptime,
    Clients,
}

impl DocumentKind {
    /// Kinds retired together with a node that leaves the current set
    pub const PUBLISHED: [DocumentKind; 5] = [
        DocumentKind::Summary,
        DocumentKind::Details,
        DocumentKind::Bandwidth,
        DocumentKind::Uptime,
        DocumentKind::Clients,
    ];

    /// Directory holding documents of this kind, relative to the store root
    pub fn relative_dir(&self) -> PathBuf {
        match self {
            DocumentKind::NodeStatus => PathBuf::from("status/nodes"),
            DocumentKind::HistoryStatus(metric) => {
                PathBuf::from("status/history").join(metric.name())
            }
            DocumentKind::UpdateStatus => PathBuf::from("status"),
            DocumentKind::Summary => PathBuf::from("out/summary"),
            DocumentKind::Details => PathBuf::from("out/details"),
            DocumentKind::Bandwidth => PathBuf::from("out/bandwidth"),
            DocumentKind::Uptime => PathBuf::from("out/uptime"),
            DocumentKind::Clients => PathBuf::from("out/clients"),
        }
    }

    /// Whether there is one document of this kind rather than one per node
    pub fn is_singleton(&self) -> bool {
        matches!(self, DocumentKind::UpdateStatus)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::NodeStatus => f.write_str("node status"),
            DocumentKind::HistoryStatus(metric) => write!(f, "{} history status", metric),
            DocumentKind::UpdateStatus => f.write_str("update status"),
            DocumentKind::Summary => f.write_str("summary"),
            DocumentKind::Details => f.write_str("details"),
            DocumentKind::Bandwidth => f.write_str("bandwidth"),
            DocumentKind::Uptime => f.write_str("uptime"),
            DocumentKind::Clients => f.write_str("clients"),
        }
    }
}

/// A stored document, one variant per kind
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    NodeStatus(Node),
    HistoryStatus(Metric, StoredHistory),
    UpdateStatus(UpdateStatus),
    Summary(SummaryDocument),
    Details(DetailsDocument),
    Bandwidth(BandwidthDocument),
    Uptime(HistoryDocument),
    Clients(HistoryDocument),
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::NodeStatus(_) => DocumentKind::NodeStatus,
            Document::HistoryStatus(metric, _) => DocumentKind::HistoryStatus(*metric),
            Document::UpdateStatus(_) => DocumentKind::UpdateStatus,
            Document::Summary(_) => DocumentKind::Summary,
            Document::Details(_) => DocumentKind::Details,
            Document::Bandwidth(_) => DocumentKind::Bandwidth,
            Document::Uptime(_) => DocumentKind::Uptime,
            Document::Clients(_) => DocumentKind::Clients,
        }
    }

    /// Serialize the document body; the kind lives in the path, not the content
    pub fn to_content(&self) -> Result<String> {
        let content = match self {
            Document::NodeStatus(node) => serde_json::to_string(node)?,
            Document::HistoryStatus(_, history) => serde_json::to_string(history)?,
            Document::UpdateStatus(status) => serde_json::to_string(status)?,
            Document::Summary(doc) => serde_json::to_string(doc)?,
            Document::Details(doc) => serde_json::to_string(doc)?,
            Document::Bandwidth(doc) => serde_json::to_string(doc)?,
            Document::Uptime(doc) | Document::Clients(doc) => serde_json::to_string(doc)?,
        };
        Ok(content)
    }

    /// Parse stored content as a document of `kind`
    pub fn from_content(kind: DocumentKind, content: &str) -> Result<Self> {
        let doc = match kind {
            DocumentKind::NodeStatus => Document::NodeStatus(serde_json::from_str(content)?),
            DocumentKind::HistoryStatus(metric) => {
                Document::HistoryStatus(metric, serde_json::from_str(content)?)
            }
            DocumentKind::UpdateStatus => Document::UpdateStatus(serde_json::from_str(content)?),
            DocumentKind::Summary => Document::Summary(serde_json::from_str(content)?),
            DocumentKind::Details => Document::Details(serde_json::from_str(content)?),
            DocumentKind::Bandwidth => Document::Bandwidth(serde_json::from_str(content)?),
            DocumentKind::Uptime => Document::Uptime(serde_json::from_str(content)?),
            DocumentKind::Clients => Document::Clients(serde_json::from_str(content)?),
        };
        Ok(doc)
    }

    pub fn into_node(self) -> Result<Node> {
        match self {
            Document::NodeStatus(node) => Ok(node),
            other => Err(OnionooError::Invariant(format!(
                "expected node status, found {}",
                other.kind()
            ))),
        }
    }

    pub fn into_history(self) -> Result<StoredHistory> {
        match self {
            Document::HistoryStatus(_, history) => Ok(history),
            other => Err(OnionooError::Invariant(format!(
                "expected history status, found {}",
                other.kind()
            ))),
        }
    }
}
