//! Per-station averages over a reference station set.
//!
//! The reference set comes from the metadata store (stations that should
//! have reported in the window), not from the returned data, so stations
//! that stayed silent still get a row of N/A cells.

use crate::logging::{self, DataSource};
use crate::model::{ParameterAverage, QcDataset, StationAverage, StationAverageTable, StationKey};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Accumulator {
    values: Vec<f64>,
}

/// Builds the dense average table.
///
/// Samples from every location/channel of a station pool into one
/// station-level value. Streams of stations outside `eligible` are ignored.
/// Columns are the requested parameters that actually occur in `dataset`.
pub fn aggregate(
    eligible: &BTreeSet<StationKey>,
    dataset: &QcDataset,
    requested: &BTreeSet<String>,
) -> StationAverageTable {
    let mut pooled: BTreeMap<StationKey, BTreeMap<String, Accumulator>> =
        eligible.iter().map(|s| (s.clone(), BTreeMap::new())).collect();
    let mut columns: BTreeSet<String> = BTreeSet::new();

    for (stream, params) in dataset.iter() {
        let Some(entry) = pooled.get_mut(&stream.station_key()) else {
            logging::debug(
                DataSource::System,
                Some(&stream.to_string()),
                "stream is not in the reference station set; ignored for averages",
            );
            continue;
        };

        for (parameter, series) in params {
            if !requested.contains(parameter) {
                continue;
            }
            columns.insert(parameter.clone());
            entry
                .entry(parameter.clone())
                .or_default()
                .values
                .extend(series.values());
        }
    }

    let stations = pooled
        .into_iter()
        .map(|(station, accs)| {
            let parameters = columns
                .iter()
                .map(|p| {
                    let cell = accs.get(p).map(summarize).unwrap_or(ParameterAverage::MISSING);
                    (p.clone(), cell)
                })
                .collect();
            (station, StationAverage { parameters })
        })
        .collect();

    StationAverageTable {
        parameters: columns.into_iter().collect(),
        stations,
    }
}

fn summarize(acc: &Accumulator) -> ParameterAverage {
    let count = acc.values.len();
    if count == 0 {
        return ParameterAverage::MISSING;
    }
    ParameterAverage {
        average: Some(acc.values.iter().sum::<f64>() / count as f64),
        sample_count: count,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
