//! Descriptor/status source
//!
//! All inputs of a run are fetched before the run starts and handed over
//! as one [`SourceBatch`]. Parsing the upstream wire formats happens
//! elsewhere; the directory source reads inputs that have already been
//! converted to JSON:
//!
//! ```text
//! <input_dir>/listings/relays/*.json    one ListingSnapshot per file
//! <input_dir>/listings/bridges/*.json   one ListingSnapshot per file
//! <input_dir>/descriptors/*.json        array of DescriptorRecord
//! <input_dir>/measurements/*.json       array of MeasurementRecord
//! ```
//!
//! Files of one feed are read in file-name order. A file that cannot be
//! parsed is recorded in [`SourceBatch::issues`] and skipped. Array
//! elements and snapshot entries are converted one at a time, so a bad
//! record only drops itself.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{OnionooError, Result};
use crate::types::{DescriptorRecord, ListingSnapshot, MeasurementRecord, NodeKind};

/// Everything one run consumes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub relay_listings: Vec<ListingSnapshot>,
    pub bridge_listings: Vec<ListingSnapshot>,
    pub descriptors: Vec<DescriptorRecord>,
    pub measurements: Vec<MeasurementRecord>,
    /// Inputs that were skipped while loading
    pub issues: Vec<String>,
}

impl SourceBatch {
    pub fn is_empty(&self) -> bool {
        self.relay_listings.is_empty()
            && self.bridge_listings.is_empty()
            && self.descriptors.is_empty()
            && self.measurements.is_empty()
    }

    /// Both feeds, relays first, each in feed order
    pub fn listings(&self) -> impl Iterator<Item = &ListingSnapshot> {
        self.relay_listings.iter().chain(self.bridge_listings.iter())
    }
}

/// Provider of pre-fetched run inputs
#[cfg_attr(test, mockall::automock)]
pub trait DescriptorSource: Send + Sync {
    /// Load all pending inputs. An error means nothing could be read at all.
    fn load(&self) -> Result<SourceBatch>;
}

/// Reads JSON inputs from a directory tree
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `*.json` files of `dir` sorted by name; a missing directory is empty
fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OnionooError::Input(format!("cannot read {:?}: {}", dir, e))),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| OnionooError::Input(format!("cannot read {:?}: {}", dir, e)))?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| OnionooError::Input(format!("cannot read {:?}: {}", path, e)))?;
    serde_json::from_str(&content)
        .map_err(|e| OnionooError::Input(format!("cannot parse {:?}: {}", path, e)))
}

/// Convert the elements of a JSON array one at a time. A bad element is
/// recorded in `issues` and its siblings are kept.
fn parse_elements<T: DeserializeOwned>(
    path: &Path,
    value: Value,
    issues: &mut Vec<String>,
) -> Result<Vec<T>> {
    let Value::Array(items) = value else {
        return Err(OnionooError::Input(format!(
            "cannot parse {:?}: expected a JSON array",
            path
        )));
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value(item) {
            Ok(parsed) => out.push(parsed),
            Err(e) => {
                let issue = format!("skipping element {} of {:?}: {}", i, path, e);
                tracing::warn!("{}", issue);
                issues.push(issue);
            }
        }
    }
    Ok(out)
}

/// Parse a snapshot header, then its entries one by one
fn parse_snapshot(
    path: &Path,
    mut value: Value,
    issues: &mut Vec<String>,
) -> Result<ListingSnapshot> {
    let entries = match value.as_object_mut() {
        Some(object) => object.insert("entries".to_string(), Value::Array(Vec::new())),
        None => {
            return Err(OnionooError::Input(format!(
                "cannot parse {:?}: expected a JSON object",
                path
            )))
        }
    };
    let Some(entries) = entries else {
        return Err(OnionooError::Input(format!(
            "cannot parse {:?}: missing field `entries`",
            path
        )));
    };
    let mut snapshot: ListingSnapshot = serde_json::from_value(value)
        .map_err(|e| OnionooError::Input(format!("cannot parse {:?}: {}", path, e)))?;
    snapshot.entries = parse_elements(path, entries, issues)?;
    Ok(snapshot)
}

/// Parse every file of `dir` with `parse`, collecting failures instead of stopping
fn load_dir<T>(
    dir: &Path,
    issues: &mut Vec<String>,
    parse: impl Fn(&Path, Value, &mut Vec<String>) -> Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for path in json_files(dir)? {
        match read_value(&path).and_then(|value| parse(&path, value, issues)) {
            Ok(item) => out.push(item),
            Err(e) => {
                tracing::warn!("Skipping input file: {}", e);
                issues.push(e.to_string());
            }
        }
    }
    Ok(out)
}

impl DescriptorSource for JsonDirSource {
    fn load(&self) -> Result<SourceBatch> {
        if !self.root.is_dir() {
            return Err(OnionooError::Input(format!(
                "input directory {:?} does not exist",
                self.root
            )));
        }

        let mut batch = SourceBatch::default();
        let listings = self.root.join("listings");
        for (kind, dir) in [(NodeKind::Relay, "relays"), (NodeKind::Bridge, "bridges")] {
            let mut snapshots =
                load_dir(&listings.join(dir), &mut batch.issues, parse_snapshot)?;
            for snapshot in &mut snapshots {
                snapshot.kind = kind;
            }
            match kind {
                NodeKind::Relay => batch.relay_listings = snapshots,
                NodeKind::Bridge => batch.bridge_listings = snapshots,
            }
        }

        let descriptors = load_dir(
            &self.root.join("descriptors"),
            &mut batch.issues,
            parse_elements::<DescriptorRecord>,
        )?;
        batch.descriptors = descriptors.into_iter().flatten().collect();

        let measurements = load_dir(
            &self.root.join("measurements"),
            &mut batch.issues,
            parse_elements::<MeasurementRecord>,
        )?;
        batch.measurements = measurements.into_iter().flatten().collect();

        tracing::info!(
            relay_listings = batch.relay_listings.len(),
            bridge_listings = batch.bridge_listings.len(),
            descriptors = batch.descriptors.len(),
            measurements = batch.measurements.len(),
            issues = batch.issues.len(),
            "Loaded inputs from {:?}",
            self.root
        );
        Ok(batch)
    }
}

/// Source that hands out a fixed batch
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    batch: SourceBatch,
}

impl MemorySource {
    pub fn new(batch: SourceBatch) -> Self {
        Self { batch }
    }
}

impl DescriptorSource for MemorySource {
    fn load(&self) -> Result<SourceBatch> {
        Ok(self.batch.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_input_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonDirSource::new(dir.path().join("absent"));
        assert!(source.load().is_err());
    }

    #[test]
    fn test_empty_input_dir() {
        let dir = tempfile::tempdir().unwrap();
        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        assert!(batch.is_empty());
        assert!(batch.issues.is_empty());
    }

    #[test]
    fn test_loads_feeds_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let fp = "AAAA".repeat(10);
        write(
            dir.path(),
            "listings/relays/2024-01-01-01.json",
            r#"{"valid_after_millis": 2, "entries": []}"#,
        );
        write(
            dir.path(),
            "listings/relays/2024-01-01-00.json",
            r#"{"valid_after_millis": 1, "entries": []}"#,
        );
        write(
            dir.path(),
            "listings/bridges/b.json",
            &format!(
                concat!(
                    r#"{{"kind": "relay", "valid_after_millis": 3, "#,
                    r#""entries": [{{"fingerprint": "{}"}}]}}"#
                ),
                fp
            ),
        );
        write(
            dir.path(),
            "descriptors/d.json",
            &format!(r#"[{{"fingerprint": "{}", "published_millis": 5}}]"#, fp),
        );
        write(
            dir.path(),
            "measurements/m.json",
            &format!(
                concat!(
                    r#"[{{"fingerprint": "{}", "metric": "clients", "#,
                    r#""samples": [{{"timestamp_millis": 0, "value": 3.0}}]}}]"#
                ),
                fp
            ),
        );
        write(dir.path(), "measurements/notes.txt", "ignored");

        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        let times: Vec<_> = batch.relay_listings.iter().map(|s| s.valid_after_millis).collect();
        assert_eq!(times, vec![1, 2]);
        assert_eq!(batch.bridge_listings[0].kind, NodeKind::Bridge);
        assert_eq!(batch.descriptors.len(), 1);
        assert_eq!(batch.measurements[0].metric, Metric::Clients);
        assert_eq!(batch.listings().count(), 3);
    }

    #[test]
    fn test_unparseable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "listings/relays/bad.json", "{ not json");
        write(
            dir.path(),
            "listings/relays/good.json",
            r#"{"valid_after_millis": 1, "entries": []}"#,
        );
        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        assert_eq!(batch.relay_listings.len(), 1);
        assert_eq!(batch.issues.len(), 1);
        assert!(batch.issues[0].contains("bad.json"));
    }

    #[test]
    fn test_bad_measurement_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let fp = "AAAA".repeat(10);
        write(
            dir.path(),
            "measurements/m.json",
            &format!(
                r#"[
                    {{"fingerprint": "{fp}", "metric": "clients", "samples": []}},
                    {{"fingerprint": "{fp}", "metric": "bogus", "samples": []}}
                ]"#
            ),
        );
        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        assert_eq!(batch.measurements.len(), 1);
        assert_eq!(batch.measurements[0].metric, Metric::Clients);
        assert_eq!(batch.issues.len(), 1);
        assert!(batch.issues[0].contains("element 1"));
        assert!(batch.issues[0].contains("m.json"));
    }

    #[test]
    fn test_bad_entry_keeps_rest_of_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "listings/relays/s.json",
            &format!(
                r#"{{"valid_after_millis": 7, "entries": [
                    {{"nickname": "nofingerprint"}},
                    {{"fingerprint": "{}", "nickname": "ok"}}
                ]}}"#,
                "BBBB".repeat(10)
            ),
        );
        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        assert_eq!(batch.relay_listings.len(), 1);
        let snapshot = &batch.relay_listings[0];
        assert_eq!(snapshot.valid_after_millis, 7);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].nickname, "ok");
        assert_eq!(batch.issues.len(), 1);
        assert!(batch.issues[0].contains("element 0"));
    }

    #[test]
    fn test_snapshot_without_entries_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "listings/bridges/s.json", r#"{"valid_after_millis": 7}"#);
        write(dir.path(), "descriptors/d.json", r#"{"not": "an array"}"#);
        let batch = JsonDirSource::new(dir.path()).load().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.issues.len(), 2);
    }

    #[test]
    fn test_memory_source_returns_batch() {
        let batch = SourceBatch {
            issues: vec!["x".into()],
            ..SourceBatch::default()
        };
        assert_eq!(MemorySource::new(batch.clone()).load().unwrap(), batch);
    }
}
