//! Resolution tiers and per-metric tier ladders.

use crate::config::TierSettings;
use crate::types::{Aggregation, Metric};

/// One granularity level of a series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionTier {
    pub name: String,
    pub bucket_millis: i64,
    pub horizon_millis: i64,
}

impl From<&TierSettings> for ResolutionTier {
    fn from(settings: &TierSettings) -> Self {
        Self {
            name: settings.name.clone(),
            bucket_millis: settings.bucket_millis(),
            horizon_millis: settings.horizon_millis(),
        }
    }
}

/// Ordered tiers of one metric, finest first, plus how it aggregates
#[derive(Debug, Clone, PartialEq)]
pub struct TierLadder {
    pub metric: Metric,
    pub aggregation: Aggregation,
    pub tiers: Vec<ResolutionTier>,
}

impl TierLadder {
    pub fn new(metric: Metric, tiers: &[TierSettings]) -> Self {
        Self {
            metric,
            aggregation: metric.aggregation(),
            tiers: tiers.iter().map(ResolutionTier::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Index of the tier with this bucket duration, if any
    pub fn tier_by_bucket(&self, bucket_millis: i64) -> Option<usize> {
        self.tiers
            .iter()
            .position(|t| t.bucket_millis == bucket_millis)
    }

    pub fn tier_by_name(&self, name: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t.name == name)
    }
}
