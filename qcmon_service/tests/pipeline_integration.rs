//! End-to-end tests of the request pipeline without external services.
//!
//! Inventory and station configuration come from an in-memory snapshot and
//! the QC tool output is replayed from `tests/fixtures/qc_sample.xml`, so
//! these run anywhere.
//!
//! Run with: cargo test --test pipeline_integration

use qcmon_service::alert::silent::silent_stations;
use qcmon_service::analysis::patterns::StreamSelection;
use qcmon_service::config::Config;
use qcmon_service::dev_mode::{ReplayFetcher, StaticGateway};
use qcmon_service::export;
use qcmon_service::model::{DefaultChannelEntry, QcError, QueryWindow, StationKey, StreamKey};
use qcmon_service::session::{self, QcOutcome, QcRequest, QcSession, RequestKind};
use qcmon_service::stations::DefaultChannels;

use chrono::NaiveDateTime;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/qc_sample.xml");

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// GE.APE has a configured `HH` default; GE.MORC and GE.QUIET have none.
/// GE.GONE closed its epoch years ago.
fn snapshot() -> StaticGateway {
    let mut defaults = DefaultChannels::new();
    defaults.insert(
        &StationKey::new("GE", "APE"),
        DefaultChannelEntry { channel_code: "HH".to_string(), location_code: String::new() },
    );

    StaticGateway::new()
        .with_stream(StreamKey::new("GE", "APE", "", "HHZ"), at("2009-01-01 00:00:00"), None)
        .with_stream(StreamKey::new("GE", "APE", "", "HHN"), at("2009-01-01 00:00:00"), None)
        .with_stream(StreamKey::new("GE", "MORC", "", "BHZ"), at("2001-01-01 00:00:00"), None)
        .with_stream(StreamKey::new("GE", "QUIET", "00", "BHZ"), at("2015-01-01 00:00:00"), None)
        .with_stream(
            StreamKey::new("GE", "GONE", "", "BHZ"),
            at("2001-01-01 00:00:00"),
            Some(at("2005-01-01 00:00:00")),
        )
        .with_defaults(defaults)
}

fn request(networks: &[&str], stations: &[&str], parameters: &[&str], kind: RequestKind) -> QcRequest {
    QcRequest {
        selection: StreamSelection::from_lists::<&str>(networks, stations, &[], &[]),
        window: QueryWindow::parse("2024-05-01 00:00:00", "2024-05-01 01:00:00").unwrap(),
        parameters: parameters.iter().map(|s| s.to_string()).collect(),
        kind,
    }
}

async fn run(gateway: &mut StaticGateway, request: &QcRequest) -> Result<QcOutcome, QcError> {
    let prepared = session::prepare(gateway, request, &Config::default())?;
    let session = QcSession::new(Arc::new(ReplayFetcher::from_file(FIXTURE)));
    session.start(prepared)?.wait().await
}

// ---------------------------------------------------------------------------
// Time series
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_series_keeps_only_requested_parameter() {
    let outcome = run(
        &mut snapshot(),
        &request(&["GE"], &["APE", "MORC"], &["latency"], RequestKind::TimeSeries),
    )
    .await
    .expect("replayed series request should succeed");

    let dataset = outcome.dataset();
    assert_eq!(dataset.stream_count(), 2);
    let ape = StreamKey::new("GE", "APE", "", "HHZ");
    let values: Vec<f64> = dataset.series(&ape, "latency").unwrap().values().collect();
    assert_eq!(values, vec![2.5, 3.5]);
    assert!(dataset.series(&ape, "rms").is_none(), "rms was not requested");

    // the MORC record without a <value> is skipped, not fatal
    let morc = StreamKey::new("GE", "MORC", "", "BHZ");
    assert_eq!(dataset.series(&morc, "latency").unwrap().len(), 1);
}

#[tokio::test]
async fn test_parameter_names_match_case_insensitively() {
    let outcome = run(
        &mut snapshot(),
        &request(&["GE"], &["APE"], &["RMS"], RequestKind::TimeSeries),
    )
    .await
    .unwrap();
    let ape = StreamKey::new("GE", "APE", "", "HHZ");
    assert_eq!(outcome.dataset().series(&ape, "rms").unwrap().values().next(), Some(812.25));
}

#[tokio::test]
async fn test_series_json_export() {
    let outcome = run(
        &mut snapshot(),
        &request(&["GE"], &["APE", "MORC"], &["latency", "rms"], RequestKind::TimeSeries),
    )
    .await
    .unwrap();

    let file = tempfile::NamedTempFile::new().unwrap();
    export::save_dataset_json(outcome.dataset(), file.path()).unwrap();
    let text = std::fs::read_to_string(file.path()).unwrap();
    let rows: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 4, "three APE samples plus one MORC sample");
}

// ---------------------------------------------------------------------------
// Station averages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_averages_include_silent_reference_stations() {
    let outcome = run(
        &mut snapshot(),
        &request(&["GE"], &["APE", "MORC"], &["latency"], RequestKind::StationAverages),
    )
    .await
    .unwrap();
    let QcOutcome::Averages { table, .. } = outcome else {
        panic!("expected an averages outcome");
    };

    // reference set is every GE station active in the window, not just the
    // selected ones
    let stations: Vec<String> = table.stations.keys().map(ToString::to_string).collect();
    assert_eq!(stations, vec!["GE.APE", "GE.MORC", "GE.QUIET"]);
    assert_eq!(table.parameters, vec!["latency"]);

    let ape = table.stations[&StationKey::new("GE", "APE")].get("latency");
    assert_eq!(ape.average, Some(3.0));
    assert_eq!(ape.sample_count, 2);

    let quiet = table.stations[&StationKey::new("GE", "QUIET")].get("latency");
    assert_eq!(quiet.average, None);
    assert_eq!(quiet.sample_count, 0);
    assert_eq!(silent_stations(&table), vec![StationKey::new("GE", "QUIET")]);
}

#[tokio::test]
async fn test_averages_csv_round_trip_through_file() {
    let outcome = run(
        &mut snapshot(),
        &request(&["GE"], &["APE", "MORC"], &["latency", "rms"], RequestKind::StationAverages),
    )
    .await
    .unwrap();
    let QcOutcome::Averages { table, .. } = outcome else {
        panic!("expected an averages outcome");
    };

    let file = tempfile::NamedTempFile::new().unwrap();
    export::save_averages_csv(&table, file.path()).unwrap();
    let text = std::fs::read_to_string(file.path()).unwrap();
    assert!(text.starts_with("Station,latency (Avg),latency (Count),rms (Avg),rms (Count)\n"));
    assert!(text.contains("GE.MORC,10.0000,1,N/A,0"), "MORC never reported rms:\n{}", text);

    let restored = export::read_averages_csv(std::fs::File::open(file.path()).unwrap()).unwrap();
    assert_eq!(restored, table);
}

#[tokio::test]
async fn test_averages_without_active_stations_is_distinct_error() {
    let err = run(
        &mut snapshot(),
        &request(&["XX"], &["AAA"], &["latency"], RequestKind::StationAverages),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, QcError::NoReferenceStations(_)), "got {:?}", err);
    assert!(!err.is_user_correctable());
}

// ---------------------------------------------------------------------------
// Validation and failures
// ---------------------------------------------------------------------------

#[test]
fn test_empty_network_selection_fails_before_fetch() {
    let mut gateway = snapshot();
    let prepared = session::prepare(
        &mut gateway,
        &request(&[], &["APE"], &["latency"], RequestKind::TimeSeries),
        &Config::default(),
    );
    let err = prepared.unwrap_err();
    assert!(matches!(err, QcError::EmptySelection(_)));
    assert!(err.is_user_correctable());
}

#[tokio::test]
async fn test_malformed_tool_output_fails_whole_request() {
    let prepared = session::prepare(
        &mut snapshot(),
        &request(&["GE"], &["APE"], &["latency"], RequestKind::TimeSeries),
        &Config::default(),
    )
    .unwrap();
    let session = QcSession::new(Arc::new(ReplayFetcher::from_xml("<seiscomp><QualityControl>")));
    let err = session.start(prepared).unwrap().wait().await.unwrap_err();
    assert!(matches!(err, QcError::MalformedData(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_configuration_falls_back_to_bhz() {
    let mut gateway = StaticGateway::new()
        .with_stream(StreamKey::new("GE", "APE", "", "HHZ"), at("2009-01-01 00:00:00"), None);
    let prepared = session::prepare(
        &mut gateway,
        &request(&["GE"], &["APE"], &["latency"], RequestKind::TimeSeries),
        &Config::default(),
    )
    .unwrap();
    assert_eq!(prepared.command.stream_list(), "GE.APE..BHZ");

    // the capture was taken for HHZ; the parser keeps whatever streams the
    // tool returned
    let session = QcSession::new(Arc::new(ReplayFetcher::from_file(FIXTURE)));
    let outcome = session.start(prepared).unwrap().wait().await.unwrap();
    assert!(outcome.dataset().series(&StreamKey::new("GE", "APE", "", "HHZ"), "latency").is_some());
}
