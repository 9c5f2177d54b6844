//! # onionoo-rs: relay and bridge status updater
//!
//! Aggregates periodic snapshots of the network status (node listings,
//! descriptor metadata, per-node measurement samples) into durable
//! per-node documents with multi-resolution history, plus a lookup index
//! for the serving layer.
//!
//! ## Architecture
//!
//! - **Correlator**: merges listing snapshots into one record per fingerprint
//! - **History**: compacts samples into tiered bandwidth, uptime and client series
//! - **Store**: write-minimal, atomically replaced JSON documents
//! - **Index**: fully rebuilt lookup structure, published with an atomic swap
//! - **Pipeline**: runs the stages in order under a single-instance lock
//!
//! ## Data Location
//!
//! Documents live under `paths.data_dir`, which defaults to the
//! platform-appropriate data directory:
//!
//! - **Linux**: `~/.local/share/onionoo-rs/`
//! - **macOS**: `~/Library/Application Support/onionoo-rs/`
//! - **Windows**: `%APPDATA%\onionoo-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use onionoo_rs::{
//!     config::UpdaterConfig,
//!     context::UpdaterContext,
//!     pipeline::{PipelineOrchestrator, RunOutcome},
//! };
//!
//! fn main() -> onionoo_rs::Result<()> {
//!     let config = UpdaterConfig::load_from_env()?;
//!     let mut ctx = UpdaterContext::from_config(config)?;
//!
//!     match PipelineOrchestrator::run(&mut ctx) {
//!         RunOutcome::Completed(report) => println!("{}", report.summary()),
//!         RunOutcome::Skipped => println!("another run is active"),
//!         RunOutcome::Failed(reason) => eprintln!("run failed: {}", reason),
//!     }
//!
//!     // The serving layer reads the published index
//!     let index = ctx.index.load();
//!     println!("{} nodes indexed", index.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod correlator;
pub mod documents;
pub mod error;
pub mod history;
pub mod index;
pub mod lock;
pub mod pipeline;
pub mod source;
pub mod store;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use config::UpdaterConfig;
pub use context::UpdaterContext;
pub use correlator::{CurrentSet, NodeCorrelator};
pub use error::{OnionooError, Result, ResultExt};
pub use history::HistoryEngine;
pub use index::{IndexHandle, NodeIndex, NodeIndexer};
pub use pipeline::{PipelineOrchestrator, RunOutcome, RunReport};
pub use store::{Document, DocumentKind, DocumentStore};
pub use types::{Fingerprint, MeasurementSample, Metric, Node, NodeKind};
