//! Services shared by one updater process
//!
//! Built once at startup and passed by reference to the pipeline, so
//! tests can swap any service for a fake.

use std::sync::Arc;

use crate::config::UpdaterConfig;
use crate::error::Result;
use crate::index::IndexHandle;
use crate::lock::{AdvisoryLock, FileLock};
use crate::source::{DescriptorSource, JsonDirSource};
use crate::store::DocumentStore;
use crate::time::{Clock, SystemClock};

pub struct UpdaterContext {
    pub config: UpdaterConfig,
    pub clock: Arc<dyn Clock>,
    pub source: Box<dyn DescriptorSource>,
    pub lock: Box<dyn AdvisoryLock>,
    pub store: DocumentStore,
    pub index: Arc<IndexHandle>,
}

impl UpdaterContext {
    /// Production services for `config`
    pub fn from_config(config: UpdaterConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let source = Box::new(JsonDirSource::new(config.paths.input_dir()));
        let lock = Box::new(FileLock::new(
            config.paths.lock_file(),
            config.lock.stale_after_secs,
            Arc::clone(&clock),
        ));
        let store = DocumentStore::open(&config.paths.data_dir)?;
        Ok(Self {
            config,
            clock,
            source,
            lock,
            store,
            index: Arc::new(IndexHandle::new()),
        })
    }

    /// Assemble a context from explicit services
    pub fn new(
        config: UpdaterConfig,
        clock: Arc<dyn Clock>,
        source: Box<dyn DescriptorSource>,
        lock: Box<dyn AdvisoryLock>,
        store: DocumentStore,
    ) -> Self {
        Self {
            config,
            clock,
            source,
            lock,
            store,
            index: Arc::new(IndexHandle::new()),
        }
    }
}
