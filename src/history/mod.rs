//! History engine
//!
//! Turns irregular measurement samples into compacted multi-resolution
//! time series, one [`MetricHistory`] per (node, metric). Each metric has
//! its own [`TierLadder`] of resolution tiers, finest first.
//!
//! # Merging
//!
//! A sample lands in the finest-tier bucket containing its timestamp.
//! Buckets remember the highest timestamp they have absorbed, so feeding
//! an overlapping batch a second time is a no-op.
//!
//! # Compaction
//!
//! Buckets that fall entirely behind a tier's horizon are folded into the
//! next coarser tier. Data is only dropped once it ages past the coarsest
//! horizon.
//!
//! # Parallelism
//!
//! Series of different nodes share nothing, so [`HistoryEngine::merge_batch`]
//! hands whole series to a small pool of worker threads over crossbeam
//! channels and collects them back when the workers finish.

pub mod series;
pub mod tier;

pub use series::{
    Bucket, CompactionStats, MetricHistory, SampleOutcome, StoredHistory, StoredTier, TimeSeries,
};
pub use tier::{ResolutionTier, TierLadder};

use crossbeam_channel::unbounded;
use std::collections::{BTreeMap, HashMap};

use crate::config::HistorySettings;
use crate::error::Result;
use crate::types::{Fingerprint, MeasurementSample, Metric};

type SeriesKey = (Fingerprint, Metric);

/// Pending samples for one (node, metric)
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesUpdate {
    pub fingerprint: Fingerprint,
    pub metric: Metric,
    pub samples: Vec<MeasurementSample>,
}

impl SeriesUpdate {
    pub fn new(fingerprint: Fingerprint, metric: Metric, samples: Vec<MeasurementSample>) -> Self {
        Self {
            fingerprint,
            metric,
            samples,
        }
    }
}

/// Totals of one [`HistoryEngine::merge_batch`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Series touched by the batch
    pub series: usize,
    pub merged: usize,
    pub duplicates: usize,
    /// One message per rejected sample
    pub rejected: Vec<String>,
}

struct MergeJob {
    key: SeriesKey,
    history: MetricHistory,
    samples: Vec<MeasurementSample>,
}

struct MergeResult {
    key: SeriesKey,
    history: MetricHistory,
    merged: usize,
    duplicates: usize,
    rejected: Vec<String>,
}

impl MergeJob {
    fn run(mut self, ladder: &TierLadder) -> MergeResult {
        let mut merged = 0;
        let mut duplicates = 0;
        let mut rejected = Vec::new();
        for sample in &self.samples {
            match self.history.merge_sample(ladder, sample) {
                Ok(SampleOutcome::Merged) => merged += 1,
                Ok(SampleOutcome::Duplicate) => duplicates += 1,
                Err(e) => rejected.push(format!("{} {}: {}", self.key.0, self.key.1, e)),
            }
        }
        MergeResult {
            key: self.key,
            history: self.history,
            merged,
            duplicates,
            rejected,
        }
    }
}

/// Multi-resolution series for every (node, metric)
#[derive(Debug, Clone)]
pub struct HistoryEngine {
    /// Indexed by [`Metric::index`]
    ladders: Vec<TierLadder>,
    series: HashMap<SeriesKey, MetricHistory>,
    violations: Vec<String>,
}

impl HistoryEngine {
    pub fn new(settings: &HistorySettings) -> Self {
        Self {
            ladders: Metric::ALL
                .iter()
                .map(|m| TierLadder::new(*m, settings.tiers(*m)))
                .collect(),
            series: HashMap::new(),
            violations: Vec::new(),
        }
    }

    pub fn ladder(&self, metric: Metric) -> &TierLadder {
        &self.ladders[metric.index()]
    }

    /// Number of (node, metric) series held
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn history(&self, fingerprint: &Fingerprint, metric: Metric) -> Option<&MetricHistory> {
        self.series.get(&(fingerprint.clone(), metric))
    }

    /// Fingerprints holding a series of `metric`, sorted
    pub fn fingerprints(&self, metric: Metric) -> Vec<Fingerprint> {
        let mut out: Vec<_> = self
            .series
            .keys()
            .filter(|(_, m)| *m == metric)
            .map(|(fp, _)| fp.clone())
            .collect();
        out.sort();
        out
    }

    /// Fold one sample into the finest tier of a node's series
    pub fn merge_sample(
        &mut self,
        fingerprint: &Fingerprint,
        metric: Metric,
        sample: MeasurementSample,
    ) -> Result<SampleOutcome> {
        let ladder = &self.ladders[metric.index()];
        self.series
            .entry((fingerprint.clone(), metric))
            .or_insert_with(|| MetricHistory::new(ladder))
            .merge_sample(ladder, &sample)
    }

    /// Compact one series against `now_millis`
    pub fn compact(
        &mut self,
        fingerprint: &Fingerprint,
        metric: Metric,
        now_millis: i64,
    ) -> CompactionStats {
        let ladder = &self.ladders[metric.index()];
        match self.series.get_mut(&(fingerprint.clone(), metric)) {
            Some(history) => history.compact(ladder, now_millis),
            None => CompactionStats::default(),
        }
    }

    /// Compact every series of `metric`
    pub fn compact_metric(&mut self, metric: Metric, now_millis: i64) -> CompactionStats {
        let ladder = &self.ladders[metric.index()];
        let mut total = CompactionStats::default();
        for ((_, m), history) in self.series.iter_mut() {
            if *m != metric {
                continue;
            }
            let stats = history.compact(ladder, now_millis);
            total.folded += stats.folded;
            total.dropped += stats.dropped;
        }
        total
    }

    /// Buckets of one tier, oldest first; empty when there is no data.
    pub fn get_series(&self, fingerprint: &Fingerprint, metric: Metric, tier: usize) -> &[Bucket] {
        self.series
            .get(&(fingerprint.clone(), metric))
            .map(|h| h.series(tier))
            .unwrap_or(&[])
    }

    /// Like [`get_series`](Self::get_series) with the tier looked up by name
    pub fn get_series_by_name(
        &self,
        fingerprint: &Fingerprint,
        metric: Metric,
        tier_name: &str,
    ) -> &[Bucket] {
        match self.ladder(metric).tier_by_name(tier_name) {
            Some(tier) => self.get_series(fingerprint, metric, tier),
            None => &[],
        }
    }

    /// Load a persisted series, discarding buckets that break the tier
    /// invariants. Returns the number of discarded buckets.
    pub fn restore(
        &mut self,
        fingerprint: &Fingerprint,
        metric: Metric,
        stored: StoredHistory,
    ) -> usize {
        let ladder = &self.ladders[metric.index()];
        let (history, problems) = MetricHistory::restore(ladder, stored);
        for problem in &problems {
            tracing::warn!(
                fingerprint = %fingerprint,
                metric = %metric,
                "Discarding stored bucket: {}",
                problem
            );
        }
        let discarded = problems.len();
        self.violations.extend(
            problems
                .into_iter()
                .map(|p| format!("{} {}: {}", fingerprint, metric, p)),
        );
        self.series.insert((fingerprint.clone(), metric), history);
        discarded
    }

    /// Persistable form of one series, `None` if the node has none
    pub fn export(&self, fingerprint: &Fingerprint, metric: Metric) -> Option<StoredHistory> {
        self.history(fingerprint, metric)
            .map(|h| h.to_stored(self.ladder(metric)))
    }

    /// Invariant violations found while restoring, drained
    pub fn take_violations(&mut self) -> Vec<String> {
        std::mem::take(&mut self.violations)
    }

    /// Merge many series updates on `workers` threads.
    ///
    /// Updates for the same (node, metric) are combined and their samples
    /// ordered by timestamp before merging, so interleaved feeds do not
    /// shadow each other's earlier samples.
    pub fn merge_batch(&mut self, updates: Vec<SeriesUpdate>, workers: usize) -> BatchSummary {
        let mut grouped: BTreeMap<SeriesKey, Vec<MeasurementSample>> = BTreeMap::new();
        for update in updates {
            grouped
                .entry((update.fingerprint, update.metric))
                .or_default()
                .extend(update.samples);
        }

        let mut summary = BatchSummary {
            series: grouped.len(),
            ..BatchSummary::default()
        };
        if grouped.is_empty() {
            return summary;
        }

        let workers = workers.clamp(1, grouped.len());
        let ladders = &self.ladders;
        let series = &mut self.series;

        let (job_tx, job_rx) = unbounded::<MergeJob>();
        let (result_tx, result_rx) = unbounded::<MergeResult>();

        for (key, mut samples) in grouped {
            samples.sort_by_key(|s| s.timestamp_millis);
            let history = series
                .remove(&key)
                .unwrap_or_else(|| MetricHistory::new(&ladders[key.1.index()]));
            // The receiver is held below, so sending cannot fail
            let _ = job_tx.send(MergeJob {
                key,
                history,
                samples,
            });
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        let ladder = &ladders[job.key.1.index()];
                        if result_tx.send(job.run(ladder)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        for result in result_rx.iter() {
            summary.merged += result.merged;
            summary.duplicates += result.duplicates;
            summary.rejected.extend(result.rejected);
            series.insert(result.key, result.history);
        }

        tracing::debug!(
            series = summary.series,
            merged = summary.merged,
            duplicates = summary.duplicates,
            rejected = summary.rejected.len(),
            workers,
            "History batch merged"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierSettings;
    use crate::time::{FIFTEEN_MINUTES, ONE_DAY, ONE_HOUR, ONE_SECOND};

    fn fp(prefix: &str) -> Fingerprint {
        Fingerprint::parse(&prefix.repeat(40 / prefix.len())).unwrap()
    }

    fn scenario_settings() -> HistorySettings {
        let tiers = vec![
            TierSettings::new("15_minutes", FIFTEEN_MINUTES, ONE_DAY),
            TierSettings::new("1_hour", ONE_HOUR, 30 * ONE_DAY),
        ];
        HistorySettings {
            read_bandwidth: tiers.clone(),
            write_bandwidth: tiers,
            ..HistorySettings::default()
        }
    }

    #[test]
    fn test_bandwidth_compaction_scenario() {
        let node = fp("AAAA");
        let mut engine = HistoryEngine::new(&scenario_settings());
        for (t, v) in [(0, 100.0), (900, 200.0), (1800, 150.0), (2700, 300.0)] {
            let sample = MeasurementSample::new(t * ONE_SECOND, v);
            engine.merge_sample(&node, Metric::ReadBandwidth, sample).unwrap();
        }

        let fine = engine.get_series(&node, Metric::ReadBandwidth, 0);
        assert_eq!(fine[0].start_millis, 0);
        assert_eq!(fine[0].aggregated_value, 100.0);
        assert_eq!(fine[0].sample_count, 1);

        engine.compact(&node, Metric::ReadBandwidth, ONE_HOUR + ONE_DAY);
        assert!(engine.get_series(&node, Metric::ReadBandwidth, 0).is_empty());
        let hourly = engine.get_series_by_name(&node, Metric::ReadBandwidth, "1_hour");
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].start_millis, 0);
        assert_eq!(hourly[0].duration_millis, ONE_HOUR);
        assert_eq!(hourly[0].aggregated_value, 187.5);
        assert_eq!(hourly[0].sample_count, 4);
    }

    #[test]
    fn test_unknown_series_is_empty() {
        let engine = HistoryEngine::new(&HistorySettings::default());
        assert!(engine.get_series(&fp("BBBB"), Metric::Uptime, 0).is_empty());
        assert!(engine.get_series(&fp("BBBB"), Metric::Uptime, 99).is_empty());
        assert!(engine.export(&fp("BBBB"), Metric::Uptime).is_none());
    }

    #[test]
    fn test_merge_batch_matches_sequential() {
        let settings = scenario_settings();
        let nodes = [fp("AAAA"), fp("BBBB"), fp("CCCC"), fp("DDDD")];

        let mut updates = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            let samples = (0..20)
                .map(|k| {
                    MeasurementSample::new(k * 600 * ONE_SECOND, (i * 100 + k as usize) as f64)
                })
                .collect();
            updates.push(SeriesUpdate::new(node.clone(), Metric::WriteBandwidth, samples));
        }

        let mut sequential = HistoryEngine::new(&settings);
        for update in &updates {
            for sample in &update.samples {
                sequential
                    .merge_sample(&update.fingerprint, update.metric, *sample)
                    .unwrap();
            }
        }

        let mut parallel = HistoryEngine::new(&settings);
        let summary = parallel.merge_batch(updates, 3);
        assert_eq!(summary.series, 4);
        assert_eq!(summary.merged, 80);
        assert!(summary.rejected.is_empty());

        for node in &nodes {
            assert_eq!(
                parallel.get_series(node, Metric::WriteBandwidth, 0),
                sequential.get_series(node, Metric::WriteBandwidth, 0)
            );
        }
    }

    #[test]
    fn test_merge_batch_orders_interleaved_feeds() {
        let node = fp("AAAA");
        let mut engine = HistoryEngine::new(&scenario_settings());
        let updates = vec![
            SeriesUpdate::new(
                node.clone(),
                Metric::ReadBandwidth,
                vec![MeasurementSample::new(600_000, 2.0)],
            ),
            SeriesUpdate::new(
                node.clone(),
                Metric::ReadBandwidth,
                vec![MeasurementSample::new(60_000, 4.0)],
            ),
        ];
        let summary = engine.merge_batch(updates, 2);
        assert_eq!(summary.merged, 2);
        assert_eq!(engine.get_series(&node, Metric::ReadBandwidth, 0)[0].aggregated_value, 3.0);
    }

    #[test]
    fn test_merge_batch_twice_is_idempotent() {
        let node = fp("AAAA");
        let mut engine = HistoryEngine::new(&scenario_settings());
        let batch = vec![SeriesUpdate::new(
            node.clone(),
            Metric::ReadBandwidth,
            vec![MeasurementSample::new(0, 1.0), MeasurementSample::new(ONE_HOUR, 2.0)],
        )];
        engine.merge_batch(batch.clone(), 2);
        let before = engine.export(&node, Metric::ReadBandwidth);
        let summary = engine.merge_batch(batch, 2);
        assert_eq!(summary.merged, 0);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(engine.export(&node, Metric::ReadBandwidth), before);
    }

    #[test]
    fn test_bad_sample_does_not_stop_batch() {
        let node = fp("AAAA");
        let mut engine = HistoryEngine::new(&scenario_settings());
        let summary = engine.merge_batch(
            vec![SeriesUpdate::new(
                node.clone(),
                Metric::ReadBandwidth,
                vec![
                    MeasurementSample::new(0, f64::INFINITY),
                    MeasurementSample::new(ONE_SECOND, 5.0),
                ],
            )],
            1,
        );
        assert_eq!(summary.rejected.len(), 1);
        assert_eq!(summary.merged, 1);
    }

    #[test]
    fn test_restore_records_violations() {
        let node = fp("AAAA");
        let mut engine = HistoryEngine::new(&scenario_settings());
        let bucket = Bucket {
            start_millis: 0,
            duration_millis: FIFTEEN_MINUTES,
            aggregated_value: 1.0,
            sample_count: 1,
            accumulator: 1.0,
            high_water_millis: 0,
        };
        let stored = StoredHistory {
            tiers: vec![StoredTier {
                name: "15_minutes".into(),
                bucket_millis: FIFTEEN_MINUTES,
                buckets: vec![bucket.clone(), bucket],
            }],
        };
        assert_eq!(engine.restore(&node, Metric::ReadBandwidth, stored), 1);
        assert_eq!(engine.get_series(&node, Metric::ReadBandwidth, 0).len(), 1);
        assert_eq!(engine.take_violations().len(), 1);
        assert!(engine.take_violations().is_empty());
    }
}
