//! Update pipeline
//!
//! One run moves pre-fetched inputs through every stage in order:
//!
//! ```text
//! [source] ──► correlate ──► persist_nodes ──► history
//!          ──► documents ──► prune ──► index
//! ```
//!
//! The whole run happens under the advisory lock. If the lock is held
//! elsewhere the run is skipped without touching anything. Per-item
//! problems (a bad entry, one unwritable document) are recorded in the
//! [`RunReport`] and never stop later items or stages; only a failure to
//! read the inputs or the persisted node set at all aborts the run, and
//! that happens before the first write.

pub mod report;

pub use report::{Issue, IssueKind, RunOutcome, RunReport, Stage, StageStats};

use std::collections::BTreeSet;

use crate::context::UpdaterContext;
use crate::correlator::{CurrentSet, DescriptorOutcome, NodeCorrelator};
use crate::documents::{self, UpdateStatus};
use crate::error::{Result, ResultExt};
use crate::history::{HistoryEngine, SeriesUpdate};
use crate::index::NodeIndexer;
use crate::source::SourceBatch;
use crate::store::{Document, DocumentKind, DocumentStore, PutOutcome};
use crate::time::{floor_to, ONE_HOUR};
use crate::types::{Fingerprint, MeasurementSample, Metric, Node};

/// Sequences one update run
pub struct PipelineOrchestrator;

impl PipelineOrchestrator {
    /// Run every stage once under the advisory lock
    pub fn run(ctx: &mut UpdaterContext) -> RunOutcome {
        match ctx.lock.acquire() {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Another run holds the lock, skipping this run");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!("Could not acquire lock: {}", e);
                return RunOutcome::Failed(e.to_string());
            }
        }

        let outcome = Self::run_locked(ctx);

        match ctx.lock.release() {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Lock was still held after release"),
            Err(e) => tracing::warn!("Could not release lock: {}", e),
        }
        outcome
    }

    fn run_locked(ctx: &mut UpdaterContext) -> RunOutcome {
        let now = ctx.clock.now_millis();
        tracing::info!("Starting update run");

        let batch = match ctx.source.load() {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!("Could not load inputs, aborting run: {}", e);
                return RunOutcome::Failed(format!("could not load inputs: {}", e));
            }
        };

        let mut report = RunReport::new(now);
        let stored_nodes = match load_nodes(&mut ctx.store, &mut report) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::error!("Could not read node status, aborting run: {}", e);
                return RunOutcome::Failed(format!("could not read node status: {}", e));
            }
        };

        let mut correlator = NodeCorrelator::new();
        correlator.load(stored_nodes);

        let uptime = correlate(&mut correlator, &batch, &mut report);
        persist_nodes(&correlator, &mut ctx.store, &mut report);

        let mut engine = HistoryEngine::new(&ctx.config.history);
        update_history(
            &mut engine,
            &mut ctx.store,
            &batch,
            uptime,
            now,
            ctx.config.workers.history_threads,
            &mut report,
        );

        let current = correlator.current_set(ctx.config.retention.current_window_millis());
        write_documents(&engine, &current, &mut ctx.store, &mut report);
        prune(&current, &mut ctx.store, &mut report);

        let index = NodeIndexer::build(&current, now);
        let stats = report.stage_mut(Stage::Index);
        stats.processed = index.len() as u64;
        stats.updated = index.len() as u64;
        ctx.index.publish(index);

        let status = Document::UpdateStatus(UpdateStatus {
            updated_millis: now,
            relays_published_millis: current.relays_published_millis,
            bridges_published_millis: current.bridges_published_millis,
        });
        if let Err(e) = ctx.store.put_singleton(&status) {
            report.note(Stage::Documents, IssueKind::Storage, e.to_string());
        }

        report.finished_millis = ctx.clock.now_millis();
        report.store = ctx.store.stats();
        tracing::info!("Update run finished\n{}", report.summary());
        RunOutcome::Completed(report)
    }
}

/// Read every persisted node. Unreadable single files are recorded and skipped.
fn load_nodes(store: &mut DocumentStore, report: &mut RunReport) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for fp in store.list(DocumentKind::NodeStatus).context("listing node status")? {
        let stored = store
            .get(&fp, DocumentKind::NodeStatus)
            .and_then(|d| match d {
                Some(doc) => doc.into_node().map(Some),
                None => Ok(None),
            })
            .with_context(|| format!("node status {}", fp));
        match stored {
            Ok(Some(node)) => nodes.push(node),
            Ok(None) => {}
            Err(e) => report.note(Stage::Correlate, IssueKind::of(&e), e.to_string()),
        }
    }
    tracing::debug!(nodes = nodes.len(), "Loaded node status");
    Ok(nodes)
}

/// Merge listings and descriptors. Returns the uptime samples implied by the listings.
fn correlate(
    correlator: &mut NodeCorrelator,
    batch: &SourceBatch,
    report: &mut RunReport,
) -> Vec<SeriesUpdate> {
    for issue in &batch.issues {
        report.fail(Stage::Correlate, IssueKind::Input, issue.clone());
    }

    let mut uptime = Vec::new();
    for snapshot in batch.listings() {
        let merge = correlator.merge_snapshot(snapshot);
        let stats = report.stage_mut(Stage::Correlate);
        stats.processed += snapshot.entries.len() as u64;
        stats.updated += (merge.created + merge.updated) as u64;
        stats.skipped += (merge.sighted.len() - merge.created - merge.updated) as u64;
        for rejected in merge.rejected {
            report.fail(Stage::Correlate, IssueKind::Input, rejected);
        }

        let hour = floor_to(snapshot.valid_after_millis, ONE_HOUR);
        uptime.extend(merge.sighted.into_iter().map(|fp| {
            SeriesUpdate::new(fp, Metric::Uptime, vec![MeasurementSample::new(hour, 1.0)])
        }));
    }

    for record in &batch.descriptors {
        report.stage_mut(Stage::Correlate).processed += 1;
        match correlator.merge_descriptor(record) {
            Ok(DescriptorOutcome::Applied) => report.stage_mut(Stage::Correlate).updated += 1,
            Ok(DescriptorOutcome::Stale) | Ok(DescriptorOutcome::UnknownNode) => {
                report.stage_mut(Stage::Correlate).skipped += 1
            }
            Err(e) => report.fail(Stage::Correlate, IssueKind::Input, format!("descriptor: {}", e)),
        }
    }

    tracing::info!(
        nodes = correlator.len(),
        listings = batch.relay_listings.len() + batch.bridge_listings.len(),
        descriptors = batch.descriptors.len(),
        "Correlated inputs"
    );
    uptime
}

/// Record a put outcome in the counters of `stage`
fn count_put(report: &mut RunReport, stage: Stage, what: String, result: Result<PutOutcome>) {
    let stats = report.stage_mut(stage);
    stats.processed += 1;
    match result {
        Ok(PutOutcome::Written) => stats.updated += 1,
        Ok(PutOutcome::Unchanged) => stats.skipped += 1,
        Err(e) => {
            let e = e.with_context(what);
            tracing::warn!("Could not store {}", e);
            report.fail(stage, IssueKind::of(&e), e.to_string());
        }
    }
}

fn persist_nodes(correlator: &NodeCorrelator, store: &mut DocumentStore, report: &mut RunReport) {
    for node in correlator.nodes() {
        let result = store.put(&node.fingerprint, &Document::NodeStatus(node.clone()));
        count_put(
            report,
            Stage::PersistNodes,
            format!("node status {}", node.fingerprint),
            result,
        );
    }
}

/// Restore persisted series, merge new samples, compact, and store the series back
fn update_history(
    engine: &mut HistoryEngine,
    store: &mut DocumentStore,
    batch: &SourceBatch,
    mut updates: Vec<SeriesUpdate>,
    now: i64,
    workers: usize,
    report: &mut RunReport,
) {
    for metric in Metric::ALL {
        let kind = DocumentKind::HistoryStatus(metric);
        let fingerprints = match store.list(kind).with_context(|| format!("listing {}", kind)) {
            Ok(fps) => fps,
            Err(e) => {
                report.note(Stage::History, IssueKind::of(&e), e.to_string());
                continue;
            }
        };
        for fp in fingerprints {
            let stored = store
                .get(&fp, kind)
                .and_then(|d| match d {
                    Some(doc) => doc.into_history().map(Some),
                    None => Ok(None),
                })
                .with_context(|| format!("{} history {}", metric, fp));
            match stored {
                Ok(Some(history)) => {
                    engine.restore(&fp, metric, history);
                }
                Ok(None) => {}
                Err(e) => report.note(Stage::History, IssueKind::of(&e), e.to_string()),
            }
        }
    }
    for violation in engine.take_violations() {
        report.note(Stage::History, IssueKind::Invariant, violation);
    }

    for record in &batch.measurements {
        match Fingerprint::parse(&record.fingerprint) {
            Ok(fp) => updates.push(SeriesUpdate::new(fp, record.metric, record.samples.clone())),
            Err(e) => {
                report.stage_mut(Stage::History).processed += record.samples.len() as u64;
                report.fail(Stage::History, IssueKind::Input, format!("measurement: {}", e));
            }
        }
    }

    let summary = engine.merge_batch(updates, workers);
    let stats = report.stage_mut(Stage::History);
    stats.processed += (summary.merged + summary.duplicates + summary.rejected.len()) as u64;
    stats.updated += summary.merged as u64;
    stats.skipped += summary.duplicates as u64;
    for rejected in summary.rejected {
        report.fail(Stage::History, IssueKind::Input, rejected);
    }

    for metric in Metric::ALL {
        let compaction = engine.compact_metric(metric, now);
        if compaction.changed() {
            tracing::debug!(
                metric = %metric,
                folded = compaction.folded,
                dropped = compaction.dropped,
                "Compacted series"
            );
        }
    }

    for metric in Metric::ALL {
        for fp in engine.fingerprints(metric) {
            let Some(history) = engine.export(&fp, metric) else {
                continue;
            };
            let result = store.put(&fp, &Document::HistoryStatus(metric, history));
            count_put(
                report,
                Stage::Documents,
                format!("{} history {}", metric, fp),
                result,
            );
        }
    }
}

fn write_documents(
    engine: &HistoryEngine,
    current: &CurrentSet,
    store: &mut DocumentStore,
    report: &mut RunReport,
) {
    for (fp, document) in documents::published_documents(current, engine) {
        let what = format!("{} {}", document.kind(), fp);
        let result = store.put(&fp, &document);
        count_put(report, Stage::Documents, what, result);
    }
    tracing::info!(nodes = current.len(), "Wrote published documents");
}

fn prune(current: &CurrentSet, store: &mut DocumentStore, report: &mut RunReport) {
    let active: BTreeSet<Fingerprint> = current.fingerprints().into_iter().collect();
    for kind in DocumentKind::PUBLISHED {
        match store.delete_obsolete(&active, kind) {
            Ok(outcome) => {
                let stats = report.stage_mut(Stage::Prune);
                stats.processed += (outcome.removed.len() + outcome.failures.len()) as u64;
                stats.updated += outcome.removed.len() as u64;
                for failure in outcome.failures {
                    report.fail(Stage::Prune, IssueKind::Storage, failure.to_string());
                }
            }
            Err(e) => {
                let e = e.with_context(format!("listing {} documents", kind));
                report.fail(Stage::Prune, IssueKind::of(&e), e.to_string());
            }
        }
    }
}
