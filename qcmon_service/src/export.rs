//! File output for request results.
//!
//! The average table is written as CSV: a `Station` column followed by an
//! `<parameter> (Avg)` / `<parameter> (Count)` pair per parameter, averages
//! with four decimals and `N/A` where a station has no samples. Time series
//! are dumped as JSON records.

use crate::model::{ParameterAverage, QcDataset, QcError, StationAverage, StationAverageTable, StationKey};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

pub const STATION_COLUMN: &str = "Station";
pub const MISSING_CELL: &str = "N/A";

const AVG_SUFFIX: &str = " (Avg)";
const COUNT_SUFFIX: &str = " (Count)";

// ---------------------------------------------------------------------------
// Average table CSV
// ---------------------------------------------------------------------------

fn format_average(cell: &ParameterAverage) -> String {
    match cell.average {
        Some(avg) => format!("{:.4}", avg),
        None => MISSING_CELL.to_string(),
    }
}

/// Writes `table` as CSV, one row per station in station order.
pub fn write_averages_csv<W: Write>(table: &StationAverageTable, writer: W) -> Result<(), QcError> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec![STATION_COLUMN.to_string()];
    for p in &table.parameters {
        header.push(format!("{}{}", p, AVG_SUFFIX));
        header.push(format!("{}{}", p, COUNT_SUFFIX));
    }
    wtr.write_record(&header)?;

    for (station, row) in &table.stations {
        let mut record = vec![station.to_string()];
        for p in &table.parameters {
            let cell = row.get(p);
            record.push(format_average(&cell));
            record.push(cell.sample_count.to_string());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn save_averages_csv(table: &StationAverageTable, path: impl AsRef<Path>) -> Result<(), QcError> {
    let file = std::fs::File::create(path)?;
    write_averages_csv(table, file)
}

/// Reads a table written by [`write_averages_csv`]. Averages come back at the
/// written precision.
pub fn read_averages_csv<R: Read>(reader: R) -> Result<StationAverageTable, QcError> {
    let mut rdr = csv::Reader::from_reader(reader);

    let header = rdr.headers()?.clone();
    if header.get(0) != Some(STATION_COLUMN) || header.len() % 2 != 1 {
        return Err(QcError::MalformedData(format!(
            "unexpected average table header: {}",
            header.iter().collect::<Vec<_>>().join(",")
        )));
    }

    let mut parameters = Vec::new();
    for pair in header.iter().skip(1).collect::<Vec<_>>().chunks(2) {
        let name = pair[0]
            .strip_suffix(AVG_SUFFIX)
            .filter(|name| pair[1].strip_suffix(COUNT_SUFFIX) == Some(*name))
            .ok_or_else(|| QcError::MalformedData(format!("unpaired columns {} / {}", pair[0], pair[1])))?;
        parameters.push(name.to_string());
    }

    let mut stations = BTreeMap::new();
    for record in rdr.records() {
        let record = record?;
        let station: StationKey = record.get(0).unwrap_or_default().parse()?;

        let mut cells = BTreeMap::new();
        for (i, p) in parameters.iter().enumerate() {
            let avg_text = record.get(1 + 2 * i).unwrap_or(MISSING_CELL);
            let count_text = record.get(2 + 2 * i).unwrap_or("0");
            let average = if avg_text == MISSING_CELL {
                None
            } else {
                Some(avg_text.parse::<f64>().map_err(|_| {
                    QcError::MalformedData(format!("{}: non-numeric average '{}'", station, avg_text))
                })?)
            };
            let sample_count = count_text.parse::<usize>().map_err(|_| {
                QcError::MalformedData(format!("{}: non-numeric count '{}'", station, count_text))
            })?;
            cells.insert(p.clone(), ParameterAverage { average, sample_count });
        }
        stations.insert(station, StationAverage { parameters: cells });
    }

    Ok(StationAverageTable { parameters, stations })
}

// ---------------------------------------------------------------------------
// Time series JSON
// ---------------------------------------------------------------------------

/// Writes every sample as a flat `{stream, parameter, time, value}` record.
pub fn write_dataset_json<W: Write>(dataset: &QcDataset, writer: W) -> Result<(), QcError> {
    serde_json::to_writer_pretty(writer, &dataset.records())?;
    Ok(())
}

pub fn save_dataset_json(dataset: &QcDataset, path: impl AsRef<Path>) -> Result<(), QcError> {
    let file = std::fs::File::create(path)?;
    write_dataset_json(dataset, std::io::BufWriter::new(file))
}
