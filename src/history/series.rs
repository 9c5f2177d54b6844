//! Buckets, single-tier series and the multi-tier history of one metric.
//!
//! Every tier holds epoch-aligned buckets of one fixed duration, kept
//! sorted by start. Because the coarser bucket duration is always a
//! multiple of the finer one, each finer bucket falls inside exactly one
//! coarser bucket, which is what compaction relies on.

use serde::{Deserialize, Serialize};

use super::tier::TierLadder;
use crate::error::{OnionooError, Result};
use crate::time::{floor_to, LATEST_SUPPORTED_MILLIS};
use crate::types::{Aggregation, MeasurementSample};

/// One fixed-duration aggregated interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start_millis: i64,
    pub duration_millis: i64,
    /// Mean for gauges, covered fraction for interval metrics
    pub aggregated_value: f64,
    pub sample_count: u64,
    /// Sum of values for gauges, covered milliseconds for interval metrics
    pub accumulator: f64,
    /// Highest sample timestamp folded into this bucket
    pub high_water_millis: i64,
}

impl Bucket {
    fn empty(start_millis: i64, duration_millis: i64) -> Self {
        Self {
            start_millis,
            duration_millis,
            aggregated_value: 0.0,
            sample_count: 0,
            accumulator: 0.0,
            high_water_millis: i64::MIN,
        }
    }

    #[inline]
    pub fn end_millis(&self) -> i64 {
        self.start_millis.saturating_add(self.duration_millis)
    }

    #[inline]
    pub fn contains(&self, millis: i64) -> bool {
        self.start_millis <= millis && millis < self.end_millis()
    }

    fn refresh(&mut self, aggregation: Aggregation) {
        self.aggregated_value = match aggregation {
            Aggregation::Gauge if self.sample_count > 0 => {
                self.accumulator / self.sample_count as f64
            }
            Aggregation::Gauge => 0.0,
            Aggregation::Interval { .. } => {
                (self.accumulator / self.duration_millis as f64).min(1.0)
            }
        };
    }

    fn absorb_sample(&mut self, aggregation: Aggregation, sample: &MeasurementSample) {
        let contribution = match aggregation {
            Aggregation::Gauge => sample.value,
            Aggregation::Interval { sample_millis } => {
                let covered = sample_millis.min(self.end_millis() - sample.timestamp_millis);
                sample.value.clamp(0.0, 1.0) * covered as f64
            }
        };
        self.accumulator += contribution;
        self.sample_count += 1;
        self.high_water_millis = self.high_water_millis.max(sample.timestamp_millis);
        self.refresh(aggregation);
    }

    fn absorb_bucket(&mut self, aggregation: Aggregation, finer: &Bucket) {
        self.accumulator += finer.accumulator;
        self.sample_count += finer.sample_count;
        self.high_water_millis = self.high_water_millis.max(finer.high_water_millis);
        self.refresh(aggregation);
    }
}

/// Ordered, non-overlapping buckets of one tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    buckets: Vec<Bucket>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a tier from stored buckets, discarding any bucket that is
    /// misaligned, has the wrong duration, or overlaps its predecessor.
    /// Returns the series and one message per discarded bucket.
    pub fn from_buckets(mut buckets: Vec<Bucket>, duration_millis: i64) -> (Self, Vec<String>) {
        buckets.sort_by_key(|b| b.start_millis);
        let mut kept: Vec<Bucket> = Vec::with_capacity(buckets.len());
        let mut violations = Vec::new();
        for bucket in buckets {
            let problem = if bucket.duration_millis != duration_millis {
                Some("unexpected duration")
            } else if bucket.start_millis.rem_euclid(duration_millis) != 0 {
                Some("misaligned start")
            } else if kept
                .last()
                .is_some_and(|prev| prev.end_millis() > bucket.start_millis)
            {
                Some("overlaps previous bucket")
            } else if !bucket.aggregated_value.is_finite() || !bucket.accumulator.is_finite() {
                Some("non-finite value")
            } else {
                None
            };
            match problem {
                Some(reason) => violations.push(format!(
                    "bucket at {} ({} ms): {}",
                    bucket.start_millis, bucket.duration_millis, reason
                )),
                None => kept.push(bucket),
            }
        }
        (Self { buckets: kept }, violations)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total_samples(&self) -> u64 {
        self.buckets.iter().map(|b| b.sample_count).sum()
    }

    pub fn bucket_containing(&self, millis: i64) -> Option<&Bucket> {
        let idx = self.buckets.partition_point(|b| b.start_millis <= millis);
        idx.checked_sub(1)
            .map(|i| &self.buckets[i])
            .filter(|b| b.contains(millis))
    }

    /// Get the bucket starting at `start_millis`, inserting an empty one if absent
    fn bucket_at(&mut self, start_millis: i64, duration_millis: i64) -> &mut Bucket {
        let idx = match self
            .buckets
            .binary_search_by_key(&start_millis, |b| b.start_millis)
        {
            Ok(idx) => idx,
            Err(idx) => {
                self.buckets
                    .insert(idx, Bucket::empty(start_millis, duration_millis));
                idx
            }
        };
        &mut self.buckets[idx]
    }

    /// Remove and return all buckets that end at or before `cutoff_millis`
    fn split_expired(&mut self, cutoff_millis: i64) -> Vec<Bucket> {
        let n = self
            .buckets
            .partition_point(|b| b.end_millis() <= cutoff_millis);
        self.buckets.drain(..n).collect()
    }
}

/// What happened to one merged sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Folded into a bucket
    Merged,
    /// At or before the high-water mark of the covering bucket
    Duplicate,
}

/// Bucket movement caused by one compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Finer buckets folded into a coarser tier
    pub folded: usize,
    /// Buckets dropped past the coarsest horizon
    pub dropped: usize,
}

impl CompactionStats {
    pub fn changed(&self) -> bool {
        self.folded > 0 || self.dropped > 0
    }
}

/// Persisted form of one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTier {
    pub name: String,
    pub bucket_millis: i64,
    pub buckets: Vec<Bucket>,
}

/// Persisted form of a [`MetricHistory`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredHistory {
    pub tiers: Vec<StoredTier>,
}

/// All tiers of one metric for one node
#[derive(Debug, Clone, PartialEq)]
pub struct MetricHistory {
    tiers: Vec<TimeSeries>,
}

impl MetricHistory {
    pub fn new(ladder: &TierLadder) -> Self {
        Self {
            tiers: vec![TimeSeries::new(); ladder.len()],
        }
    }

    /// Restore from storage; tiers are matched to the ladder by bucket duration.
    pub fn restore(ladder: &TierLadder, stored: StoredHistory) -> (Self, Vec<String>) {
        let mut history = Self::new(ladder);
        let mut violations = Vec::new();
        for tier in stored.tiers {
            let Some(idx) = ladder.tier_by_bucket(tier.bucket_millis) else {
                violations.push(format!(
                    "tier {} ({} ms) is not configured, {} buckets discarded",
                    tier.name,
                    tier.bucket_millis,
                    tier.buckets.len()
                ));
                continue;
            };
            let (series, problems) = TimeSeries::from_buckets(tier.buckets, tier.bucket_millis);
            violations.extend(
                problems
                    .into_iter()
                    .map(|p| format!("tier {}: {}", tier.name, p)),
            );
            history.tiers[idx] = series;
        }
        (history, violations)
    }

    pub fn to_stored(&self, ladder: &TierLadder) -> StoredHistory {
        StoredHistory {
            tiers: ladder
                .tiers
                .iter()
                .zip(&self.tiers)
                .filter(|(_, series)| !series.is_empty())
                .map(|(tier, series)| StoredTier {
                    name: tier.name.clone(),
                    bucket_millis: tier.bucket_millis,
                    buckets: series.buckets().to_vec(),
                })
                .collect(),
        }
    }

    pub fn series(&self, tier: usize) -> &[Bucket] {
        self.tiers.get(tier).map(|s| s.buckets()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(TimeSeries::is_empty)
    }

    pub fn total_samples(&self) -> u64 {
        self.tiers.iter().map(TimeSeries::total_samples).sum()
    }

    /// Fold one sample into the finest tier.
    ///
    /// A sample already covered by a bucket whose high-water mark is at
    /// or past its timestamp, in any tier, is a no-op.
    pub fn merge_sample(
        &mut self,
        ladder: &TierLadder,
        sample: &MeasurementSample,
    ) -> Result<SampleOutcome> {
        if !sample.value.is_finite() {
            return Err(OnionooError::Input(format!(
                "non-finite {} sample at {}",
                ladder.metric, sample.timestamp_millis
            )));
        }
        if !(0..=LATEST_SUPPORTED_MILLIS).contains(&sample.timestamp_millis) {
            return Err(OnionooError::Input(format!(
                "{} sample timestamp {} is out of range",
                ladder.metric, sample.timestamp_millis
            )));
        }
        let Some(finest) = ladder.tiers.first() else {
            return Err(OnionooError::Invariant(format!(
                "metric {} has no tiers",
                ladder.metric
            )));
        };

        let ts = sample.timestamp_millis;
        let already_covered = self.tiers.iter().any(|series| {
            series
                .bucket_containing(ts)
                .is_some_and(|b| b.high_water_millis >= ts)
        });
        if already_covered {
            return Ok(SampleOutcome::Duplicate);
        }

        let start = floor_to(ts, finest.bucket_millis);
        self.tiers[0]
            .bucket_at(start, finest.bucket_millis)
            .absorb_sample(ladder.aggregation, sample);
        Ok(SampleOutcome::Merged)
    }

    /// Fold buckets past each tier's horizon into the next coarser tier,
    /// dropping only what has aged past the coarsest horizon.
    pub fn compact(&mut self, ladder: &TierLadder, now_millis: i64) -> CompactionStats {
        let mut stats = CompactionStats::default();
        for (idx, tier) in ladder.tiers.iter().enumerate() {
            let cutoff = now_millis.saturating_sub(tier.horizon_millis);
            let expired = self.tiers[idx].split_expired(cutoff);
            if expired.is_empty() {
                continue;
            }
            match ladder.tiers.get(idx + 1) {
                Some(coarser) => {
                    let target = &mut self.tiers[idx + 1];
                    for bucket in &expired {
                        target
                            .bucket_at(
                                floor_to(bucket.start_millis, coarser.bucket_millis),
                                coarser.bucket_millis,
                            )
                            .absorb_bucket(ladder.aggregation, bucket);
                    }
                    stats.folded += expired.len();
                }
                None => stats.dropped += expired.len(),
            }
        }
        stats
    }
}
