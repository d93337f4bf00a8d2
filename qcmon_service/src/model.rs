//! Core data types for the SeisComP QC monitoring service.
//!
//! This module defines the shared domain model imported by all other modules:
//! stream identifiers, QC samples and series, the station average table and
//! the crate-wide error type. It contains no I/O.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// QC parameter vocabulary
// ---------------------------------------------------------------------------

/// The fixed set of waveform quality parameters `scqueryqc` can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QcParameter {
    Latency,
    Delay,
    Timing,
    Offset,
    Rms,
    Availability,
    GapsCount,
    GapsInterval,
    GapsLength,
    OverlapsCount,
    OverlapsInterval,
    OverlapsLength,
    SpikesCount,
    SpikesInterval,
    SpikesAmplitude,
}

impl QcParameter {
    pub const ALL: [QcParameter; 15] = [
        QcParameter::Latency,
        QcParameter::Delay,
        QcParameter::Timing,
        QcParameter::Offset,
        QcParameter::Rms,
        QcParameter::Availability,
        QcParameter::GapsCount,
        QcParameter::GapsInterval,
        QcParameter::GapsLength,
        QcParameter::OverlapsCount,
        QcParameter::OverlapsInterval,
        QcParameter::OverlapsLength,
        QcParameter::SpikesCount,
        QcParameter::SpikesInterval,
        QcParameter::SpikesAmplitude,
    ];

    /// Name as it appears in the `<parameter>` element and on the tool's
    /// `-p` option.
    pub fn as_str(&self) -> &'static str {
        match self {
            QcParameter::Latency => "latency",
            QcParameter::Delay => "delay",
            QcParameter::Timing => "timing",
            QcParameter::Offset => "offset",
            QcParameter::Rms => "rms",
            QcParameter::Availability => "availability",
            QcParameter::GapsCount => "gaps count",
            QcParameter::GapsInterval => "gaps interval",
            QcParameter::GapsLength => "gaps length",
            QcParameter::OverlapsCount => "overlaps count",
            QcParameter::OverlapsInterval => "overlaps interval",
            QcParameter::OverlapsLength => "overlaps length",
            QcParameter::SpikesCount => "spikes count",
            QcParameter::SpikesInterval => "spikes interval",
            QcParameter::SpikesAmplitude => "spikes amplitude",
        }
    }
}

impl fmt::Display for QcParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QcParameter {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        QcParameter::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| QcError::EmptySelection(format!("unknown QC parameter '{}'", wanted)))
    }
}

// ---------------------------------------------------------------------------
// Stream identifiers
// ---------------------------------------------------------------------------

/// How an empty location code is shown to users. Internally the empty
/// location is always the empty string.
pub const EMPTY_LOCATION_DISPLAY: &str = "--";

/// Normalizes a location code: surrounding whitespace is dropped and both
/// blank and `--` collapse to the empty string.
pub fn normalize_location(code: &str) -> String {
    let trimmed = code.trim();
    if trimmed == EMPTY_LOCATION_DISPLAY {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Renders a normalized location code for display.
pub fn display_location(code: &str) -> &str {
    if code.is_empty() { EMPTY_LOCATION_DISPLAY } else { code }
}

/// A `(network, station)` pair, rendered as `NET.STA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StationKey {
    pub network: String,
    pub station: String,
}

impl StationKey {
    pub fn new(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: network.into().trim().to_string(),
            station: station.into().trim().to_string(),
        }
    }
}

impl fmt::Display for StationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}

impl FromStr for StationKey {
    type Err = QcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((net, sta)) if !net.is_empty() && !sta.is_empty() && !sta.contains('.') => {
                Ok(StationKey::new(net, sta))
            }
            _ => Err(QcError::MalformedData(format!("invalid station key '{}'", s))),
        }
    }
}

/// A single physical channel. Uniqueness is the full 4-tuple; the location
/// is stored normalized (see [`normalize_location`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StreamKey {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl StreamKey {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        location: &str,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into().trim().to_string(),
            station: station.into().trim().to_string(),
            location: normalize_location(location),
            channel: channel.into().trim().to_string(),
        }
    }

    pub fn station_key(&self) -> StationKey {
        StationKey::new(self.network.clone(), self.station.clone())
    }

    /// The `NET.STA.LOC.CHA` form passed to the tool's `-i` option, with an
    /// empty location field.
    pub fn pattern(&self) -> String {
        format!("{}.{}.{}.{}", self.network, self.station, self.location, self.channel)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network,
            self.station,
            display_location(&self.location),
            self.channel
        )
    }
}

/// The configured primary stream of a station, used when the user leaves
/// location and channel blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultChannelEntry {
    /// Raw configured channel code; may be a 2-letter band+instrument code.
    pub channel_code: String,
    /// Normalized location code (empty string for no location).
    pub location_code: String,
}

impl DefaultChannelEntry {
    /// Used for stations with no configuration entry.
    pub fn fallback() -> Self {
        Self {
            channel_code: "BHZ".to_string(),
            location_code: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Query window
// ---------------------------------------------------------------------------

/// Format the tool expects for `-b` / `-e`.
pub const TOOL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A UTC time window for metric retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl QueryWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    /// Parses two `YYYY-MM-DD HH:MM:SS` strings (a `T` separator is also
    /// accepted).
    pub fn parse(start: &str, end: &str) -> Result<Self, QcError> {
        Ok(Self::new(parse_tool_time(start)?, parse_tool_time(end)?))
    }

    /// Length of the window in hours; negative for inverted windows.
    pub fn hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }

    pub fn is_inverted(&self) -> bool {
        self.end < self.start
    }

    pub fn start_str(&self) -> String {
        self.start.format(TOOL_TIME_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(TOOL_TIME_FORMAT).to_string()
    }
}

fn parse_tool_time(s: &str) -> Result<NaiveDateTime, QcError> {
    let normalized = s.trim().replace('T', " ");
    NaiveDateTime::parse_from_str(&normalized, TOOL_TIME_FORMAT)
        .map_err(|e| QcError::EmptySelection(format!("invalid time '{}': {}", s, e)))
}

// ---------------------------------------------------------------------------
// QC samples
// ---------------------------------------------------------------------------

/// One reported value of one QC parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualitySample {
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// Samples for one `(stream, parameter)` pair, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSeries {
    samples: Vec<QualitySample>,
}

impl ParameterSeries {
    pub fn push(&mut self, sample: QualitySample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[QualitySample] {
        &self.samples
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// A copy ordered by sample time; ties keep arrival order.
    pub fn sorted_by_time(&self) -> Vec<QualitySample> {
        let mut sorted = self.samples.clone();
        sorted.sort_by_key(|s| s.time);
        sorted
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.samples.iter().map(|s| s.time).max()
    }
}

/// Flattened dataset row, suitable for JSON export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcRecord {
    pub stream: String,
    pub parameter: String,
    pub time: DateTime<Utc>,
    pub value: f64,
}

/// All parsed samples of one request, keyed by stream then parameter.
/// A stream that reported nothing has no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcDataset {
    streams: BTreeMap<StreamKey, BTreeMap<String, ParameterSeries>>,
}

impl QcDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sample to `stream`/`parameter`, creating entries as needed.
    pub fn push(&mut self, stream: StreamKey, parameter: &str, sample: QualitySample) {
        self.streams
            .entry(stream)
            .or_default()
            .entry(parameter.to_string())
            .or_default()
            .push(sample);
    }

    pub fn get(&self, stream: &StreamKey) -> Option<&BTreeMap<String, ParameterSeries>> {
        self.streams.get(stream)
    }

    pub fn series(&self, stream: &StreamKey, parameter: &str) -> Option<&ParameterSeries> {
        self.streams.get(stream).and_then(|p| p.get(parameter))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StreamKey, &BTreeMap<String, ParameterSeries>)> {
        self.streams.iter()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.streams
            .values()
            .flat_map(|params| params.values())
            .map(ParameterSeries::len)
            .sum()
    }

    /// One row per sample, streams and parameters in key order, samples in
    /// arrival order.
    pub fn records(&self) -> Vec<QcRecord> {
        let mut rows = Vec::with_capacity(self.sample_count());
        for (stream, params) in &self.streams {
            for (parameter, series) in params {
                for sample in series.samples() {
                    rows.push(QcRecord {
                        stream: stream.to_string(),
                        parameter: parameter.clone(),
                        time: sample.time,
                        value: sample.value,
                    });
                }
            }
        }
        rows
    }
}

// ---------------------------------------------------------------------------
// Station averages
// ---------------------------------------------------------------------------

/// Average of one parameter at one station. `average` is `None` (N/A) when
/// no samples were reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterAverage {
    pub average: Option<f64>,
    pub sample_count: usize,
}

impl ParameterAverage {
    pub const MISSING: ParameterAverage = ParameterAverage {
        average: None,
        sample_count: 0,
    };
}

/// Per-parameter averages for one station.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationAverage {
    pub parameters: BTreeMap<String, ParameterAverage>,
}

impl StationAverage {
    /// The cell for `parameter`, N/A if the station never reported it.
    pub fn get(&self, parameter: &str) -> ParameterAverage {
        self.parameters
            .get(parameter)
            .copied()
            .unwrap_or(ParameterAverage::MISSING)
    }

    pub fn total_samples(&self) -> usize {
        self.parameters.values().map(|p| p.sample_count).sum()
    }
}

/// Dense station × parameter table: every station row carries a cell for
/// every column in `parameters`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationAverageTable {
    /// Column order (sorted parameter names).
    pub parameters: Vec<String>,
    pub stations: BTreeMap<StationKey, StationAverage>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while resolving streams, fetching or processing QC
/// data.
#[derive(Debug, thiserror::Error)]
pub enum QcError {
    /// A metadata store query failed.
    #[error("Configuration lookup failed: {0}")]
    ConfigurationLookup(String),
    /// The QC tool exited unsuccessfully; carries its diagnostic output.
    #[error("QC tool failed: {0}")]
    ToolExecution(String),
    /// The tool output is not well-formed XML or holds a non-numeric value.
    #[error("Malformed QC data: {0}")]
    MalformedData(String),
    /// The selection resolves to nothing; the user can correct this.
    #[error("Empty selection: {0}")]
    EmptySelection(String),
    /// The reference station set for averaging could not be determined.
    #[error("No reference stations: {0}")]
    NoReferenceStations(String),
    /// A request is already running in this session.
    #[error("A QC request is already in progress")]
    FetchInProgress,
    /// The request was cancelled before it completed.
    #[error("QC request cancelled")]
    Cancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QcError {
    /// True for validation conditions the user fixes by changing the
    /// selection, as opposed to system faults.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, QcError::EmptySelection(_))
    }
}

impl From<postgres::Error> for QcError {
    fn from(e: postgres::Error) -> Self {
        QcError::ConfigurationLookup(e.to_string())
    }
}

impl From<reqwest::Error> for QcError {
    fn from(e: reqwest::Error) -> Self {
        QcError::ConfigurationLookup(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
