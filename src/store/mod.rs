//! Document store
//!
//! Per-node documents live as one JSON file per (kind, fingerprint) under
//! the data directory:
//!
//! ```text
//! <root>/status/nodes/<FP>
//! <root>/status/history/<metric>/<FP>
//! <root>/status/update
//! <root>/out/{summary,details,bandwidth,uptime,clients}/<FP>
//! ```
//!
//! # Write minimality
//!
//! Every stored file has a SHA-256 content digest cached in memory
//! (computed from disk on first comparison). A `put` whose content
//! digest matches performs no filesystem write at all.
//!
//! # Atomicity
//!
//! New content is written to `<file>.tmp` and renamed over the target,
//! so a concurrent reader sees either the old or the new file, never a
//! partial one. The store expects a single writer; see [`crate::lock`].

pub mod document;

pub use document::{Document, DocumentKind};

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{OnionooError, Result};
use crate::types::{Fingerprint, FINGERPRINT_LEN};

const TEMP_SUFFIX: &str = ".tmp";
const UPDATE_FILE_NAME: &str = "update";

/// Result of a [`DocumentStore::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// Content identical to what is stored; nothing was written
    Unchanged,
}

/// Files removed by [`DocumentStore::delete_obsolete`]
#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub removed: Vec<Fingerprint>,
    pub failures: Vec<OnionooError>,
}

/// Store I/O counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub listed: u64,
    pub stored: u64,
    pub stored_bytes: u64,
    pub unchanged: u64,
    pub retrieved: u64,
    pub retrieved_bytes: u64,
    pub removed: u64,
}

impl StoreStats {
    pub fn summary(&self) -> String {
        format!(
            "{} listed, {} stored ({}), {} unchanged, {} retrieved ({}), {} removed",
            self.listed,
            self.stored,
            format_bytes(self.stored_bytes),
            self.unchanged,
            self.retrieved,
            format_bytes(self.retrieved_bytes),
            self.removed
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn digest(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Filesystem-backed document store
#[derive(Debug)]
pub struct DocumentStore {
    root: PathBuf,
    digests: HashMap<PathBuf, String>,
    stats: StoreStats,
}

impl DocumentStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| OnionooError::storage(&root, e))?;
        Ok(Self {
            root,
            digests: HashMap::new(),
            stats: StoreStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    fn path_for(&self, kind: DocumentKind, fingerprint: Option<&Fingerprint>) -> Result<PathBuf> {
        let dir = self.root.join(kind.relative_dir());
        match (kind.is_singleton(), fingerprint) {
            (true, _) => Ok(dir.join(UPDATE_FILE_NAME)),
            (false, Some(fp)) => Ok(dir.join(fp.as_str())),
            (false, None) => Err(OnionooError::Input(format!(
                "{} documents need a fingerprint",
                kind
            ))),
        }
    }

    /// Store a per-node document unless identical content is already stored
    pub fn put(&mut self, fingerprint: &Fingerprint, document: &Document) -> Result<PutOutcome> {
        let content = document.to_content()?;
        self.put_content(document.kind(), Some(fingerprint), &content)
    }

    /// Store a singleton document such as the update status
    pub fn put_singleton(&mut self, document: &Document) -> Result<PutOutcome> {
        let content = document.to_content()?;
        self.put_content(document.kind(), None, &content)
    }

    /// Store raw content for (kind, fingerprint)
    pub fn put_content(
        &mut self,
        kind: DocumentKind,
        fingerprint: Option<&Fingerprint>,
        content: &str,
    ) -> Result<PutOutcome> {
        let path = self.path_for(kind, fingerprint)?;
        let new_digest = digest(content);
        if self.stored_digest(&path)?.as_deref() == Some(new_digest.as_str()) {
            self.stats.unchanged += 1;
            return Ok(PutOutcome::Unchanged);
        }

        write_atomically(&path, content)?;
        self.stats.stored += 1;
        self.stats.stored_bytes += content.len() as u64;
        self.digests.insert(path, new_digest);
        Ok(PutOutcome::Written)
    }

    /// Digest of what is on disk at `path`, from cache or by reading it once
    fn stored_digest(&mut self, path: &Path) -> Result<Option<String>> {
        if let Some(cached) = self.digests.get(path) {
            return Ok(Some(cached.clone()));
        }
        match fs::read_to_string(path) {
            Ok(existing) => {
                let d = digest(&existing);
                self.digests.insert(path.to_path_buf(), d.clone());
                Ok(Some(d))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OnionooError::storage(path, e)),
        }
    }

    /// Fetch a per-node document; `Ok(None)` when none is stored
    pub fn get(
        &mut self,
        fingerprint: &Fingerprint,
        kind: DocumentKind,
    ) -> Result<Option<Document>> {
        match self.get_content(kind, Some(fingerprint))? {
            Some(content) => Document::from_content(kind, &content).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_singleton(&mut self, kind: DocumentKind) -> Result<Option<Document>> {
        match self.get_content(kind, None)? {
            Some(content) => Document::from_content(kind, &content).map(Some),
            None => Ok(None),
        }
    }

    /// Fetch raw content for (kind, fingerprint)
    pub fn get_content(
        &mut self,
        kind: DocumentKind,
        fingerprint: Option<&Fingerprint>,
    ) -> Result<Option<String>> {
        let path = self.path_for(kind, fingerprint)?;
        match fs::read_to_string(&path) {
            Ok(content) => {
                self.stats.retrieved += 1;
                self.stats.retrieved_bytes += content.len() as u64;
                self.digests.insert(path, digest(&content));
                Ok(Some(content))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OnionooError::storage(&path, e)),
        }
    }

    /// Fingerprints with a stored document of `kind`, sorted
    pub fn list(&mut self, kind: DocumentKind) -> Result<Vec<Fingerprint>> {
        if kind.is_singleton() {
            return Ok(Vec::new());
        }
        let dir = self.root.join(kind.relative_dir());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OnionooError::storage(&dir, e)),
        };

        let mut fingerprints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| OnionooError::storage(&dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.len() != FINGERPRINT_LEN {
                continue;
            }
            if let Ok(fp) = Fingerprint::parse(name) {
                fingerprints.push(fp);
            }
        }
        fingerprints.sort();
        self.stats.listed += fingerprints.len() as u64;
        Ok(fingerprints)
    }

    /// Remove documents of `kind` whose fingerprint is not in `active`.
    ///
    /// A failed removal is reported in the outcome and does not stop the others.
    pub fn delete_obsolete(
        &mut self,
        active: &BTreeSet<Fingerprint>,
        kind: DocumentKind,
    ) -> Result<PruneOutcome> {
        let mut outcome = PruneOutcome::default();
        for fp in self.list(kind)? {
            if active.contains(&fp) {
                continue;
            }
            let path = self.path_for(kind, Some(&fp))?;
            match fs::remove_file(&path) {
                Ok(()) => {
                    self.digests.remove(&path);
                    self.stats.removed += 1;
                    tracing::debug!(fingerprint = %fp, kind = %kind, "Removed obsolete document");
                    outcome.removed.push(fp);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.digests.remove(&path);
                }
                Err(e) => outcome.failures.push(OnionooError::storage(&path, e)),
            }
        }
        Ok(outcome)
    }
}

/// Write `content` next to `path` and rename it into place
fn write_atomically(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| OnionooError::storage(parent, e))?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    fs::write(&temp, content).map_err(|e| OnionooError::storage(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        OnionooError::storage(path, e)
    })
}
