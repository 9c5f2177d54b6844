//! History tier settings
//!
//! Each metric keeps an ordered ladder of resolution tiers, finest to
//! coarsest. A tier is a bucket duration plus a retention horizon: data
//! older than the horizon is folded into the next tier, and data older
//! than the coarsest horizon is dropped.
//!
//! The defaults reproduce the production ladders: bandwidth starts at
//! 15-minute buckets for three days, uptime at hourly buckets for a
//! week, client counts at daily buckets for three months.

use serde::{Deserialize, Serialize};

use crate::error::{OnionooError, Result};
use crate::time::{
    FIFTEEN_MINUTES, FOUR_HOURS, ONE_DAY, ONE_HOUR, ONE_SECOND, ONE_WEEK, ROUGHLY_FIVE_YEARS,
    ROUGHLY_ONE_MONTH, ROUGHLY_ONE_YEAR, ROUGHLY_THREE_MONTHS, TEN_DAYS, THREE_DAYS,
    TWELVE_HOURS, TWO_DAYS,
};
use crate::types::Metric;

/// One resolution tier as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Label used in published documents, e.g. `"3_days"`
    pub name: String,
    pub bucket_secs: i64,
    pub horizon_secs: i64,
}

impl TierSettings {
    pub fn new(name: &str, bucket_millis: i64, horizon_millis: i64) -> Self {
        Self {
            name: name.to_string(),
            bucket_secs: bucket_millis / ONE_SECOND,
            horizon_secs: horizon_millis / ONE_SECOND,
        }
    }

    pub fn bucket_millis(&self) -> i64 {
        self.bucket_secs * ONE_SECOND
    }

    pub fn horizon_millis(&self) -> i64 {
        self.horizon_secs * ONE_SECOND
    }
}

/// Tier ladders for every metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default = "bandwidth_tiers")]
    pub read_bandwidth: Vec<TierSettings>,
    #[serde(default = "bandwidth_tiers")]
    pub write_bandwidth: Vec<TierSettings>,
    #[serde(default = "uptime_tiers")]
    pub uptime: Vec<TierSettings>,
    #[serde(default = "clients_tiers")]
    pub clients: Vec<TierSettings>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            read_bandwidth: bandwidth_tiers(),
            write_bandwidth: bandwidth_tiers(),
            uptime: uptime_tiers(),
            clients: clients_tiers(),
        }
    }
}

impl HistorySettings {
    pub fn tiers(&self, metric: Metric) -> &[TierSettings] {
        match metric {
            Metric::ReadBandwidth => &self.read_bandwidth,
            Metric::WriteBandwidth => &self.write_bandwidth,
            Metric::Uptime => &self.uptime,
            Metric::Clients => &self.clients,
        }
    }

    /// Check every ladder for the properties compaction relies on
    pub fn validate(&self) -> Result<()> {
        for metric in Metric::ALL {
            validate_ladder(metric, self.tiers(metric))?;
        }
        Ok(())
    }
}

fn validate_ladder(metric: Metric, tiers: &[TierSettings]) -> Result<()> {
    if tiers.is_empty() {
        return Err(OnionooError::Config(format!(
            "metric {} has no resolution tiers",
            metric
        )));
    }
    for tier in tiers {
        if tier.bucket_secs <= 0 || tier.horizon_secs <= 0 {
            return Err(OnionooError::Config(format!(
                "tier {} of {} must have positive durations",
                tier.name, metric
            )));
        }
    }
    for pair in tiers.windows(2) {
        let (finer, coarser) = (&pair[0], &pair[1]);
        if coarser.bucket_secs <= finer.bucket_secs || coarser.bucket_secs % finer.bucket_secs != 0
        {
            return Err(OnionooError::Config(format!(
                "tier {} of {} must use a bucket that is a larger multiple of tier {}",
                coarser.name, metric, finer.name
            )));
        }
        if coarser.horizon_secs <= finer.horizon_secs {
            return Err(OnionooError::Config(format!(
                "tier {} of {} must keep data longer than tier {}",
                coarser.name, metric, finer.name
            )));
        }
    }
    Ok(())
}

fn bandwidth_tiers() -> Vec<TierSettings> {
    vec![
        TierSettings::new("3_days", FIFTEEN_MINUTES, THREE_DAYS),
        TierSettings::new("1_week", ONE_HOUR, ONE_WEEK),
        TierSettings::new("1_month", FOUR_HOURS, ROUGHLY_ONE_MONTH),
        TierSettings::new("3_months", TWELVE_HOURS, ROUGHLY_THREE_MONTHS),
        TierSettings::new("1_year", TWO_DAYS, ROUGHLY_ONE_YEAR),
        TierSettings::new("5_years", TEN_DAYS, ROUGHLY_FIVE_YEARS),
    ]
}

fn uptime_tiers() -> Vec<TierSettings> {
    vec![
        TierSettings::new("1_week", ONE_HOUR, ONE_WEEK),
        TierSettings::new("1_month", FOUR_HOURS, ROUGHLY_ONE_MONTH),
        TierSettings::new("3_months", TWELVE_HOURS, ROUGHLY_THREE_MONTHS),
        TierSettings::new("1_year", TWO_DAYS, ROUGHLY_ONE_YEAR),
        TierSettings::new("5_years", TEN_DAYS, ROUGHLY_FIVE_YEARS),
    ]
}

fn clients_tiers() -> Vec<TierSettings> {
    vec![
        TierSettings::new("3_months", ONE_DAY, ROUGHLY_THREE_MONTHS),
        TierSettings::new("1_year", TWO_DAYS, ROUGHLY_ONE_YEAR),
        TierSettings::new("5_years", TEN_DAYS, ROUGHLY_FIVE_YEARS),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladders_are_valid() {
        HistorySettings::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_non_multiple_bucket() {
        let mut settings = HistorySettings::default();
        settings.uptime = vec![
            TierSettings::new("a", ONE_HOUR, ONE_WEEK),
            TierSettings::new("b", ONE_HOUR + ONE_SECOND, ROUGHLY_ONE_MONTH),
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_shrinking_horizon() {
        let mut settings = HistorySettings::default();
        settings.clients = vec![
            TierSettings::new("a", ONE_DAY, ROUGHLY_ONE_YEAR),
            TierSettings::new("b", TWO_DAYS, ROUGHLY_ONE_MONTH),
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_ladder() {
        let mut settings = HistorySettings::default();
        settings.read_bandwidth.clear();
        assert!(settings.validate().is_err());
    }
}
