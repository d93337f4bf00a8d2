//! Parser for `scqueryqc` XML output.
//!
//! The tool writes a SeisComP document with one `waveformQuality` element
//! per reported value:
//!
//! ```xml
//! <seiscomp xmlns="http://geofon.gfz-potsdam.de/ns/seiscomp3-schema/0.12">
//!   <QualityControl>
//!     <waveformQuality>
//!       <waveformID networkCode="GE" stationCode="APE" locationCode="" channelCode="BHZ"/>
//!       <start>2024-05-01T12:00:00.0000Z</start>
//!       <parameter>latency</parameter>
//!       <value>2.5</value>
//!     </waveformQuality>
//!   </QualityControl>
//! </seiscomp>
//! ```
//!
//! Elements are matched by local name so any schema version's namespace is
//! accepted. Records missing one of the four sub-fields are skipped; a
//! document that is not well-formed XML, or a record whose value or start
//! time does not parse, fails the whole parse.

use crate::logging::{self, DataSource};
use crate::model::{QcDataset, QcError, QualitySample, StreamKey};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeSet;

const RECORD_ELEMENT: &[u8] = b"waveformQuality";
const START_ELEMENT: &[u8] = b"start";
const PARAMETER_ELEMENT: &[u8] = b"parameter";
const VALUE_ELEMENT: &[u8] = b"value";
const WAVEFORM_ID_ELEMENT: &[u8] = b"waveformID";

/// Timestamp format of `<start>`: ISO 8601 with fractional seconds and a
/// literal `Z`.
const QC_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// Counters collected while parsing, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// `waveformQuality` elements seen.
    pub records: usize,
    /// Records added to the dataset.
    pub accepted: usize,
    /// Records dropped for a missing sub-field.
    pub incomplete: usize,
    /// Complete records whose parameter was not requested.
    pub unrequested: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Start,
    Parameter,
    Value,
}

#[derive(Debug, Default)]
struct PartialRecord {
    start: Option<String>,
    parameter: Option<String>,
    value: Option<String>,
    stream: Option<StreamKey>,
}

/// Parses `raw_xml`, keeping only records whose parameter is in `wanted`.
pub fn parse(raw_xml: &str, wanted: &BTreeSet<String>) -> Result<QcDataset, QcError> {
    let (dataset, stats) = parse_with_stats(raw_xml, wanted)?;
    if stats.incomplete > 0 {
        logging::debug(
            DataSource::Parser,
            None,
            &format!("skipped {} of {} incomplete quality records", stats.incomplete, stats.records),
        );
    }
    Ok(dataset)
}

/// Like [`parse`], also returning the record counters.
pub fn parse_with_stats(raw_xml: &str, wanted: &BTreeSet<String>) -> Result<(QcDataset, ParseStats), QcError> {
    let mut reader = Reader::from_str(raw_xml);
    reader.config_mut().trim_text(true);

    let mut dataset = QcDataset::new();
    let mut stats = ParseStats::default();

    let mut depth: usize = 0;
    let mut saw_root = false;
    let mut record: Option<(usize, PartialRecord)> = None;
    let mut field: Option<(Field, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(&reader, e.to_string()))?;

        match event {
            Event::Start(e) => {
                check_element(&reader, &e, depth, saw_root)?;
                depth += 1;
                saw_root = true;
                match record.as_mut() {
                    None if e.local_name().as_ref() == RECORD_ELEMENT => {
                        record = Some((depth, PartialRecord::default()));
                    }
                    Some((record_depth, partial)) if depth == *record_depth + 1 => {
                        field = open_child(&e, partial)?.map(|f| (f, String::new()));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                check_element(&reader, &e, depth, saw_root)?;
                saw_root = true;
                match record.as_mut() {
                    None if e.local_name().as_ref() == RECORD_ELEMENT => {
                        // a record with no content at all
                        stats.records += 1;
                        stats.incomplete += 1;
                    }
                    Some((record_depth, partial)) if depth == *record_depth => {
                        // self-closing child: only waveformID carries data
                        open_child(&e, partial)?;
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if depth == 0 {
                    return Err(malformed(&reader, "text outside the root element".to_string()));
                }
                let text = t.unescape().map_err(|e| malformed(&reader, e.to_string()))?;
                if let Some((_, buf)) = field.as_mut() {
                    buf.push_str(&text);
                }
            }
            Event::CData(c) => {
                let text = std::str::from_utf8(&c).map_err(|e| malformed(&reader, e.to_string()))?;
                if let Some((_, buf)) = field.as_mut() {
                    buf.push_str(text);
                }
            }
            Event::End(_) => {
                if let Some((record_depth, partial)) = record.as_mut() {
                    if depth == *record_depth + 1 {
                        if let Some((kind, text)) = field.take() {
                            store_field(partial, kind, text);
                        }
                    } else if depth == *record_depth {
                        if let Some((_, finished)) = record.take() {
                            stats.records += 1;
                            finish_record(finished, wanted, &mut dataset, &mut stats)?;
                        }
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(QcError::MalformedData("document has no root element".to_string()));
    }
    if depth != 0 {
        return Err(QcError::MalformedData(format!("document ends with {} unclosed element(s)", depth)));
    }

    Ok((dataset, stats))
}

fn malformed(reader: &Reader<&[u8]>, message: String) -> QcError {
    QcError::MalformedData(format!("at byte {}: {}", reader.buffer_position(), message))
}

/// Rejects a second root element and any element whose attributes are not
/// well-formed (missing value, duplicate name, bad entity reference).
fn check_element(reader: &Reader<&[u8]>, e: &BytesStart<'_>, depth: usize, saw_root: bool) -> Result<(), QcError> {
    if depth == 0 && saw_root {
        return Err(malformed(reader, "more than one root element".to_string()));
    }
    let mut attributes = e.attributes();
    attributes.with_checks(true);
    for attr in attributes {
        let attr = attr.map_err(|err| malformed(reader, err.to_string()))?;
        attr.unescape_value().map_err(|err| malformed(reader, err.to_string()))?;
    }
    Ok(())
}

/// Handles a direct child of a record. Returns the text field it opens, if
/// any; `waveformID` attributes are captured immediately.
fn open_child(e: &BytesStart<'_>, partial: &mut PartialRecord) -> Result<Option<Field>, QcError> {
    match e.local_name().as_ref() {
        START_ELEMENT => Ok(Some(Field::Start)),
        PARAMETER_ELEMENT => Ok(Some(Field::Parameter)),
        VALUE_ELEMENT => Ok(Some(Field::Value)),
        WAVEFORM_ID_ELEMENT => {
            partial.stream = read_waveform_id(e)?;
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn store_field(partial: &mut PartialRecord, kind: Field, text: String) {
    let text = text.trim().to_string();
    if text.is_empty() {
        return;
    }
    match kind {
        Field::Start => partial.start = Some(text),
        Field::Parameter => partial.parameter = Some(text),
        Field::Value => partial.value = Some(text),
    }
}

/// Builds the stream key from `waveformID` attributes. Network, station and
/// channel are required; a missing or blank location is the empty location.
fn read_waveform_id(e: &BytesStart<'_>) -> Result<Option<StreamKey>, QcError> {
    let mut network = None;
    let mut station = None;
    let mut location = String::new();
    let mut channel = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|err| QcError::MalformedData(err.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|err| QcError::MalformedData(err.to_string()))?
            .trim()
            .to_string();
        match attr.key.local_name().as_ref() {
            b"networkCode" => network = Some(value),
            b"stationCode" => station = Some(value),
            b"locationCode" => location = value,
            b"channelCode" => channel = Some(value),
            _ => {}
        }
    }

    match (network, station, channel) {
        (Some(n), Some(s), Some(c)) if !n.is_empty() && !s.is_empty() && !c.is_empty() => {
            Ok(Some(StreamKey::new(n, s, &location, c)))
        }
        _ => Ok(None),
    }
}

fn finish_record(
    partial: PartialRecord,
    wanted: &BTreeSet<String>,
    dataset: &mut QcDataset,
    stats: &mut ParseStats,
) -> Result<(), QcError> {
    let (Some(start), Some(parameter), Some(value), Some(stream)) =
        (partial.start, partial.parameter, partial.value, partial.stream)
    else {
        stats.incomplete += 1;
        return Ok(());
    };

    let value: f64 = value.parse().map_err(|_| {
        QcError::MalformedData(format!("non-numeric value '{}' for {} {}", value, stream, parameter))
    })?;
    let time = parse_qc_time(&start)?;

    if !wanted.contains(&parameter) {
        stats.unrequested += 1;
        return Ok(());
    }

    dataset.push(stream, &parameter, QualitySample { time, value });
    stats.accepted += 1;
    Ok(())
}

/// Parses a `<start>` timestamp. RFC 3339 with an explicit offset is
/// accepted as well.
pub fn parse_qc_time(s: &str) -> Result<DateTime<Utc>, QcError> {
    NaiveDateTime::parse_from_str(s, QC_TIME_FORMAT)
        .map(|t| t.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc)))
        .map_err(|e| QcError::MalformedData(format!("invalid start time '{}': {}", s, e)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
