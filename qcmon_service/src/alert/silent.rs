//! Silent station and stale stream detection.
//!
//! A station that should have reported in a window but contributed no
//! samples shows up in the average table as a row of N/A cells; this module
//! turns that into an explicit list. Stream staleness looks at the newest
//! sample of each stream instead.
//!
//! # Clock injection
//! `stale_streams` takes `now: DateTime<Utc>` rather than calling
//! `Utc::now()` internally, so results are deterministic in tests.

use crate::model::{QcDataset, StationAverageTable, StationKey, StreamKey};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Silent stations
// ---------------------------------------------------------------------------

/// Reference stations with zero samples in every column, sorted.
///
/// With no columns at all (nothing requested was returned), every station
/// is silent.
pub fn silent_stations(table: &StationAverageTable) -> Vec<StationKey> {
    table
        .stations
        .iter()
        .filter(|(_, row)| row.total_samples() == 0)
        .map(|(station, _)| station.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Staleness check
// ---------------------------------------------------------------------------

/// Streams whose newest sample, over all parameters, is older than
/// `max_age_minutes` relative to `now`.
///
/// Staleness is strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
pub fn stale_streams(dataset: &QcDataset, max_age_minutes: u64, now: DateTime<Utc>) -> Vec<(StreamKey, DateTime<Utc>)> {
    dataset
        .iter()
        .filter_map(|(stream, params)| {
            let newest = params.values().filter_map(|s| s.latest()).max()?;
            let age_minutes = (now - newest).num_minutes();
            (age_minutes > max_age_minutes as i64).then(|| (stream.clone(), newest))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::averages::aggregate;
    use crate::model::QualitySample;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    /// A fixed "now" used across all tests: 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn sample_at(h: u32, m: u32, value: f64) -> QualitySample {
        QualitySample {
            time: Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap(),
            value,
        }
    }

    fn dataset() -> QcDataset {
        let mut ds = QcDataset::new();
        ds.push(StreamKey::new("GE", "APE", "", "BHZ"), "latency", sample_at(12, 30, 1.0));
        ds.push(StreamKey::new("GE", "APE", "", "BHZ"), "rms", sample_at(12, 55, 9.0));
        ds.push(StreamKey::new("GE", "MORC", "", "BHZ"), "latency", sample_at(12, 45, 2.0));
        ds.push(StreamKey::new("GE", "OLD", "", "BHZ"), "latency", sample_at(9, 0, 3.0));
        ds
    }

    #[test]
    fn test_station_without_samples_is_silent() {
        let eligible: BTreeSet<StationKey> = ["APE", "MORC", "QUIET"]
            .iter()
            .map(|s| StationKey::new("GE", *s))
            .collect();
        let requested: BTreeSet<String> = ["latency".to_string()].into_iter().collect();
        let table = aggregate(&eligible, &dataset(), &requested);

        assert_eq!(silent_stations(&table), vec![StationKey::new("GE", "QUIET")]);
    }

    #[test]
    fn test_no_columns_means_every_station_is_silent() {
        let eligible: BTreeSet<StationKey> = [StationKey::new("GE", "APE")].into_iter().collect();
        let table = aggregate(&eligible, &QcDataset::new(), &BTreeSet::new());
        assert_eq!(silent_stations(&table).len(), 1);
    }

    #[test]
    fn test_newest_parameter_decides_staleness() {
        // APE latency is 30 min old but rms is 5 min old
        let stale = stale_streams(&dataset(), 15, fixed_now());
        let keys: Vec<String> = stale.iter().map(|(k, _)| k.station.clone()).collect();
        assert_eq!(keys, vec!["OLD"], "only GE.OLD is older than 15 minutes");
    }

    #[test]
    fn test_exactly_at_threshold_is_not_stale() {
        // MORC is exactly 15 minutes old
        let stale = stale_streams(&dataset(), 15, fixed_now());
        assert!(
            !stale.iter().any(|(k, _)| k.station == "MORC"),
            "staleness is strictly greater than, not >="
        );
        let tighter = stale_streams(&dataset(), 14, fixed_now());
        assert!(tighter.iter().any(|(k, _)| k.station == "MORC"));
    }

    #[test]
    fn test_stale_stream_reports_its_newest_time() {
        let stale = stale_streams(&dataset(), 60, fixed_now());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].1, Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    }
}
