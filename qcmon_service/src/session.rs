//! One QC request from selection to result.
//!
//! A request runs in two phases. `prepare` does every metadata lookup on the
//! calling thread (the gateways are blocking) and ends with a ready-to-run
//! command. `QcSession::start` then fetches, parses and aggregates in a
//! background task while the caller watches progress.

use crate::alert::silent::silent_stations;
use crate::analysis::averages;
use crate::analysis::patterns::{self, StreamSelection};
use crate::config::Config;
use crate::db::MetadataGateway;
use crate::ingest::qc_xml;
use crate::ingest::scqueryqc::{MetricFetcher, ProgressTracker, QueryCommand, estimate_total_bytes};
use crate::logging;
use crate::model::{QcDataset, QcError, QcParameter, QueryWindow, StationAverageTable, StationKey, StreamKey};
use crate::stations::DefaultChannels;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::{AbortHandle, JoinHandle};

// ---------------------------------------------------------------------------
// Request description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Per-stream time series.
    TimeSeries,
    /// Per-station averages over the reference station set.
    StationAverages,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QcRequest {
    pub selection: StreamSelection,
    pub window: QueryWindow,
    /// Parameter names as entered; matched case-insensitively.
    pub parameters: BTreeSet<String>,
    pub kind: RequestKind,
}

/// A validated request with everything the fetch needs.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub kind: RequestKind,
    pub command: QueryCommand,
    pub streams: BTreeSet<StreamKey>,
    /// Canonical parameter names.
    pub parameters: BTreeSet<String>,
    pub estimated_bytes: f64,
    /// Stations expected to report; empty for time series requests.
    pub reference_stations: BTreeSet<StationKey>,
}

// ---------------------------------------------------------------------------
// Blocking phase
// ---------------------------------------------------------------------------

/// Maps entered names onto the fixed vocabulary.
fn canonical_parameters(entered: &BTreeSet<String>) -> Result<BTreeSet<String>, QcError> {
    let parameters = entered
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.parse::<QcParameter>().map(|q| q.as_str().to_string()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if parameters.is_empty() {
        return Err(QcError::EmptySelection("no QC parameters selected".to_string()));
    }
    Ok(parameters)
}

/// Loads configured defaults; a failed lookup is logged and treated as "no
/// defaults", so every station falls back to `BHZ`.
pub fn load_defaults<G: MetadataGateway + ?Sized>(gateway: &mut G) -> DefaultChannels {
    match gateway.default_streams() {
        Ok(defaults) => defaults,
        Err(e) => {
            logging::log_gateway_failure(gateway.source(), "default stream lookup", &e);
            DefaultChannels::new()
        }
    }
}

/// Validates `request` and resolves it against the metadata store.
///
/// Nothing is fetched here. Selection problems fail with `EmptySelection`
/// before any store query; an averages request whose reference set cannot
/// be loaded fails with `NoReferenceStations`.
pub fn prepare<G: MetadataGateway + ?Sized>(
    gateway: &mut G,
    request: &QcRequest,
    config: &Config,
) -> Result<PreparedQuery, QcError> {
    let parameters = canonical_parameters(&request.parameters)?;
    let selection = &request.selection;
    if selection.networks.is_empty() {
        return Err(QcError::EmptySelection("no networks selected".to_string()));
    }
    if selection.stations.is_empty() {
        return Err(QcError::EmptySelection("no stations selected".to_string()));
    }
    if request.window.is_inverted() {
        return Err(QcError::EmptySelection(format!(
            "start time {} is after end time {}",
            request.window.start_str(),
            request.window.end_str()
        )));
    }

    let defaults = load_defaults(gateway);
    let fallback = patterns::stations_without_defaults(selection, &defaults);
    if !fallback.is_empty() && (selection.locations.is_empty() || selection.channels.is_empty()) {
        logging::debug(
            gateway.source(),
            None,
            &format!("{} stations use the BHZ fallback stream", fallback.len()),
        );
    }

    let streams = patterns::generate(selection, &defaults);
    if streams.is_empty() {
        return Err(QcError::EmptySelection("selection resolves to no streams".to_string()));
    }

    let reference_stations = match request.kind {
        RequestKind::TimeSeries => BTreeSet::new(),
        RequestKind::StationAverages => load_reference_stations(gateway, &selection.networks, &request.window)?,
    };

    let command = QueryCommand::new(&config.tool, request.window, &parameters, &streams);
    let estimated_bytes = estimate_total_bytes(streams.len(), parameters.len(), &request.window, &config.progress);

    Ok(PreparedQuery {
        kind: request.kind,
        command,
        streams,
        parameters,
        estimated_bytes,
        reference_stations,
    })
}

fn load_reference_stations<G: MetadataGateway + ?Sized>(
    gateway: &mut G,
    networks: &BTreeSet<String>,
    window: &QueryWindow,
) -> Result<BTreeSet<StationKey>, QcError> {
    let stations = gateway.active_stations(networks, window).map_err(|e| {
        logging::log_gateway_failure(gateway.source(), "reference station lookup", &e);
        QcError::NoReferenceStations(e.to_string())
    })?;
    if stations.is_empty() {
        return Err(QcError::NoReferenceStations(format!(
            "no stations of {} were active between {} and {}",
            networks.iter().cloned().collect::<Vec<_>>().join(","),
            window.start_str(),
            window.end_str()
        )));
    }
    Ok(stations)
}

// ---------------------------------------------------------------------------
// Async phase
// ---------------------------------------------------------------------------

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum QcOutcome {
    Series(QcDataset),
    Averages {
        dataset: QcDataset,
        table: StationAverageTable,
    },
}

impl QcOutcome {
    pub fn dataset(&self) -> &QcDataset {
        match self {
            QcOutcome::Series(dataset) => dataset,
            QcOutcome::Averages { dataset, .. } => dataset,
        }
    }
}

/// Runs requests one at a time against a metric fetcher.
#[derive(Clone)]
pub struct QcSession {
    fetcher: Arc<dyn MetricFetcher>,
    in_flight: Arc<Semaphore>,
}

impl QcSession {
    pub fn new(fetcher: Arc<dyn MetricFetcher>) -> Self {
        Self {
            fetcher,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// Starts `prepared` in a background task. Must be called from within a
    /// tokio runtime.
    ///
    /// Fails with `FetchInProgress` while an earlier request of this session
    /// is still running.
    pub fn start(&self, prepared: PreparedQuery) -> Result<RequestHandle, QcError> {
        let permit = self
            .in_flight
            .clone()
            .try_acquire_owned()
            .map_err(|_| QcError::FetchInProgress)?;

        let (tracker, progress) = ProgressTracker::new(prepared.estimated_bytes);
        let fetcher = Arc::clone(&self.fetcher);
        let task = tokio::spawn(async move {
            let _permit = permit;
            run(fetcher.as_ref(), prepared, tracker).await
        });

        Ok(RequestHandle { progress, task })
    }
}

async fn run(fetcher: &dyn MetricFetcher, prepared: PreparedQuery, mut tracker: ProgressTracker) -> Result<QcOutcome, QcError> {
    let xml = fetcher.fetch(&prepared.command, &mut tracker).await?;
    let dataset = qc_xml::parse(&xml, &prepared.parameters)?;

    match prepared.kind {
        RequestKind::TimeSeries => {
            logging::log_request_summary(prepared.streams.len(), dataset.stream_count(), dataset.sample_count(), 0);
            Ok(QcOutcome::Series(dataset))
        }
        RequestKind::StationAverages => {
            let table = averages::aggregate(&prepared.reference_stations, &dataset, &prepared.parameters);
            logging::log_request_summary(
                prepared.streams.len(),
                dataset.stream_count(),
                dataset.sample_count(),
                silent_stations(&table).len(),
            );
            Ok(QcOutcome::Averages { dataset, table })
        }
    }
}

/// A running request.
pub struct RequestHandle {
    progress: watch::Receiver<f64>,
    task: JoinHandle<Result<QcOutcome, QcError>>,
}

impl RequestHandle {
    /// Advisory progress in `[0.0, 1.0]`; reaches 1.0 when the fetch
    /// completes.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    /// Stops the request. A running tool process is killed; `wait` then
    /// returns `Cancelled`.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// A handle that cancels the request from elsewhere, e.g. a signal
    /// handler, without holding on to this one.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the full result.
    pub async fn wait(self) -> Result<QcOutcome, QcError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(QcError::Cancelled),
            Err(e) => Err(QcError::ToolExecution(format!("request task failed: {}", e))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
