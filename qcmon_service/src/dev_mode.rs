//! Development mode utilities for working without a SeisComP installation.
//!
//! `ReplayFetcher` stands in for the QC tool by returning previously captured
//! XML, and `StaticGateway` holds an in-memory inventory/configuration
//! snapshot. Together they let the whole request pipeline run offline.

use crate::db::{MetadataGateway, StreamInventory};
use crate::ingest::scqueryqc::{MetricFetcher, ProgressTracker, QueryCommand};
use crate::logging::{self, DataSource};
use crate::model::{QcError, QueryWindow, StationKey, StreamKey};
use crate::stations::{DefaultChannels, is_inventory_channel};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::BTreeSet;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Replayed QC output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ReplaySource {
    File(PathBuf),
    Inline(String),
}

/// Returns captured QC XML instead of running the tool. The command is only
/// logged; the parser's parameter filter still applies to the replayed
/// document.
#[derive(Debug, Clone)]
pub struct ReplayFetcher {
    source: ReplaySource,
}

impl ReplayFetcher {
    /// Replays the file at `path`, read fresh on every fetch.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ReplaySource::File(path.into()),
        }
    }

    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self {
            source: ReplaySource::Inline(xml.into()),
        }
    }
}

#[async_trait]
impl MetricFetcher for ReplayFetcher {
    async fn fetch(&self, command: &QueryCommand, progress: &mut ProgressTracker) -> Result<String, QcError> {
        logging::info(
            DataSource::Tool,
            None,
            &format!("Replaying captured output for: {}", command.command_line()),
        );

        let xml = match &self.source {
            ReplaySource::Inline(xml) => xml.clone(),
            ReplaySource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                QcError::ToolExecution(format!("cannot read replay file {}: {}", path.display(), e))
            })?,
        };

        progress.advance(xml.len());
        progress.finish();
        Ok(xml)
    }
}

// ---------------------------------------------------------------------------
// In-memory metadata
// ---------------------------------------------------------------------------

/// One stream epoch in a snapshot. `end == None` means still open.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEpoch {
    pub stream: StreamKey,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

impl StreamEpoch {
    fn overlaps(&self, window: &QueryWindow) -> bool {
        self.start <= window.end && self.end.is_none_or(|end| end > window.start)
    }
}

/// Metadata gateway over a fixed inventory snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticGateway {
    epochs: Vec<StreamEpoch>,
    /// `None` behaves like a store without station configuration.
    defaults: Option<DefaultChannels>,
}

impl StaticGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, stream: StreamKey, start: NaiveDateTime, end: Option<NaiveDateTime>) -> Self {
        self.epochs.push(StreamEpoch { stream, start, end });
        self
    }

    pub fn with_defaults(mut self, defaults: DefaultChannels) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn epochs(&self) -> &[StreamEpoch] {
        &self.epochs
    }
}

impl MetadataGateway for StaticGateway {
    fn source(&self) -> DataSource {
        DataSource::System
    }

    fn network_codes(&mut self) -> Result<Vec<String>, QcError> {
        let codes: BTreeSet<String> = self.epochs.iter().map(|e| e.stream.network.clone()).collect();
        Ok(codes.into_iter().collect())
    }

    fn station_codes(&mut self, networks: &BTreeSet<String>) -> Result<Vec<StationKey>, QcError> {
        let stations: BTreeSet<StationKey> = self
            .epochs
            .iter()
            .filter(|e| networks.contains(&e.stream.network))
            .map(|e| e.stream.station_key())
            .collect();
        Ok(stations.into_iter().collect())
    }

    fn stream_inventory(
        &mut self,
        networks: &BTreeSet<String>,
        stations: &BTreeSet<String>,
    ) -> Result<StreamInventory, QcError> {
        let mut inventory = StreamInventory::default();
        for epoch in &self.epochs {
            let s = &epoch.stream;
            if networks.contains(&s.network) && stations.contains(&s.station) && is_inventory_channel(&s.channel) {
                inventory.locations.insert(s.location.clone());
                inventory.channels.insert(s.channel.clone());
            }
        }
        Ok(inventory)
    }

    fn default_streams(&mut self) -> Result<DefaultChannels, QcError> {
        self.defaults.clone().ok_or_else(|| {
            QcError::ConfigurationLookup("station configuration is not available from the snapshot".to_string())
        })
    }

    fn active_stations(
        &mut self,
        networks: &BTreeSet<String>,
        window: &QueryWindow,
    ) -> Result<BTreeSet<StationKey>, QcError> {
        Ok(self
            .epochs
            .iter()
            .filter(|e| networks.contains(&e.stream.network))
            .filter(|e| is_inventory_channel(&e.stream.channel) && e.overlaps(window))
            .map(|e| e.stream.station_key())
            .collect())
    }
}
