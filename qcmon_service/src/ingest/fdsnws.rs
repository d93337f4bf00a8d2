//! FDSN Station Web Service client
//!
//! Retrieves network, station and channel inventory from an FDSN station
//! service (e.g. the one SeisComP's `fdsnws` module serves) in its
//! pipe-separated text format. The web service exposes inventory only, so
//! station configuration (default streams) is not available from here.
//!
//! Service documentation: https://www.fdsn.org/webservices/

use crate::config::FdsnwsConfig;
use crate::db::{MetadataGateway, StreamInventory};
use crate::logging::{self, DataSource};
use crate::model::{QcError, QueryWindow, StationKey, normalize_location};
use crate::stations::{DefaultChannels, is_inventory_channel};
use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::time::Duration;

/// ISO 8601 form the service accepts for `starttime` / `endtime`.
const FDSN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// ============================================================================
// Text Format Parsing
// ============================================================================

/// One channel-level line: `Network|Station|Location|Channel|...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLine {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

/// Splits a text response into field rows, skipping the `#` header and
/// blank lines.
fn data_rows(body: &str) -> impl Iterator<Item = Vec<&str>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split('|').map(str::trim).collect())
}

/// Parses a `level=network` response into sorted, distinct network codes.
pub fn parse_networks(body: &str) -> Vec<String> {
    data_rows(body)
        .filter_map(|fields| fields.first().map(|s| s.to_string()))
        .filter(|code| !code.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parses a `level=station` response.
pub fn parse_stations(body: &str) -> Vec<StationKey> {
    data_rows(body)
        .filter(|fields| fields.len() >= 2 && !fields[0].is_empty() && !fields[1].is_empty())
        .map(|fields| StationKey::new(fields[0], fields[1]))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parses a `level=channel` response. Rows with fewer than four fields are
/// skipped.
pub fn parse_channels(body: &str) -> Vec<ChannelLine> {
    data_rows(body)
        .filter(|fields| fields.len() >= 4 && !fields[3].is_empty())
        .map(|fields| ChannelLine {
            network: fields[0].to_string(),
            station: fields[1].to_string(),
            location: normalize_location(fields[2]),
            channel: fields[3].to_string(),
        })
        .collect()
}

// ============================================================================
// API Client
// ============================================================================

/// Metadata gateway backed by an FDSN station web service.
pub struct FdsnStationClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl FdsnStationClient {
    pub fn new(config: &FdsnwsConfig) -> Result<Self, QcError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.station_url.trim_end_matches('?').to_string(),
        })
    }

    /// Issues one query. `nodata=404` makes "nothing matched" a 404, which
    /// is returned as an empty body.
    fn get(&self, query: &[(&str, String)]) -> Result<String, QcError> {
        let mut params: Vec<(&str, String)> = query.to_vec();
        params.push(("format", "text".to_string()));
        params.push(("nodata", "404".to_string()));

        let response = self.client.get(&self.base_url).query(&params).send()?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(String::new()),
            status if status.is_success() => Ok(response.text()?),
            status => Err(QcError::ConfigurationLookup(format!(
                "FDSNWS station query returned HTTP {}",
                status
            ))),
        }
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}

impl MetadataGateway for FdsnStationClient {
    fn source(&self) -> DataSource {
        DataSource::Fdsnws
    }

    fn network_codes(&mut self) -> Result<Vec<String>, QcError> {
        let body = self.get(&[("level", "network".to_string())])?;
        Ok(parse_networks(&body))
    }

    fn station_codes(&mut self, networks: &BTreeSet<String>) -> Result<Vec<StationKey>, QcError> {
        if networks.is_empty() {
            return Ok(Vec::new());
        }
        let body = self.get(&[("network", join(networks)), ("level", "station".to_string())])?;
        Ok(parse_stations(&body))
    }

    fn stream_inventory(
        &mut self,
        networks: &BTreeSet<String>,
        stations: &BTreeSet<String>,
    ) -> Result<StreamInventory, QcError> {
        if networks.is_empty() || stations.is_empty() {
            return Ok(StreamInventory::default());
        }
        let body = self.get(&[
            ("network", join(networks)),
            ("station", join(stations)),
            ("level", "channel".to_string()),
        ])?;

        let mut inventory = StreamInventory::default();
        for line in parse_channels(&body) {
            if is_inventory_channel(&line.channel) {
                inventory.locations.insert(line.location);
                inventory.channels.insert(line.channel);
            }
        }
        Ok(inventory)
    }

    fn default_streams(&mut self) -> Result<DefaultChannels, QcError> {
        Err(QcError::ConfigurationLookup(
            "station configuration is not available from FDSNWS".to_string(),
        ))
    }

    fn active_stations(
        &mut self,
        networks: &BTreeSet<String>,
        window: &QueryWindow,
    ) -> Result<BTreeSet<StationKey>, QcError> {
        if networks.is_empty() {
            return Ok(BTreeSet::new());
        }
        // starttime/endtime select epochs overlapping the window
        let body = self.get(&[
            ("network", join(networks)),
            ("level", "channel".to_string()),
            ("starttime", window.start.format(FDSN_TIME_FORMAT).to_string()),
            ("endtime", window.end.format(FDSN_TIME_FORMAT).to_string()),
        ])?;

        let active: BTreeSet<StationKey> = parse_channels(&body)
            .into_iter()
            .filter(|line| is_inventory_channel(&line.channel))
            .map(|line| StationKey::new(line.network, line.station))
            .collect();
        logging::debug(
            DataSource::Fdsnws,
            None,
            &format!("{} stations active in window", active.len()),
        );
        Ok(active)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK_TEXT: &str = "\
#Network|Description|StartTime|EndTime|TotalStations
GE|GEOFON Program|1993-01-01T00:00:00||85
XX|Test network|2020-01-01T00:00:00||2
GE|GEOFON duplicate epoch|1993-01-01T00:00:00||85
";

    const STATION_TEXT: &str = "\
#Network|Station|Latitude|Longitude|Elevation|SiteName|StartTime|EndTime
GE|APE|37.0689|25.5306|620.0|Apirathos, Naxos|2009-01-01T00:00:00|
GE|MORC|49.7766|17.5428|740.0|Moravsky Beroun|2001-01-01T00:00:00|

";

    const CHANNEL_TEXT: &str = "\
#Network|Station|Location|Channel|Latitude|Longitude|Elevation|Depth|Azimuth|Dip|SensorDescription|Scale|ScaleFreq|ScaleUnits|SampleRate|StartTime|EndTime
GE|APE||BHZ|37.07|25.53|620.0|0.0|0.0|-90.0|STS-2|6.0e8|1.0|M/S|20.0|2009-01-01T00:00:00|
GE|APE||BHN|37.07|25.53|620.0|0.0|0.0|0.0|STS-2|6.0e8|1.0|M/S|20.0|2009-01-01T00:00:00|
GE|APE|00|HHZ|37.07|25.53|620.0|0.0|0.0|-90.0|STS-2|6.0e8|1.0|M/S|100.0|2009-01-01T00:00:00|
GE|MORC||BDF|49.78|17.54|740.0|0.0|0.0|0.0|MB2005|1.0|1.0|PA|20.0|2001-01-01T00:00:00|
GE|MORC|
";

    #[test]
    fn test_parse_networks_skips_header_and_dedups() {
        assert_eq!(parse_networks(NETWORK_TEXT), vec!["GE", "XX"]);
    }

    #[test]
    fn test_parse_stations() {
        assert_eq!(
            parse_stations(STATION_TEXT),
            vec![StationKey::new("GE", "APE"), StationKey::new("GE", "MORC")]
        );
    }

    #[test]
    fn test_parse_channels_normalizes_location_and_skips_short_rows() {
        let lines = parse_channels(CHANNEL_TEXT);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].location, "");
        assert_eq!(lines[2].location, "00");
        assert_eq!(lines[3].channel, "BDF");
    }

    #[test]
    fn test_inventory_filter_matches_vertical_and_auxiliary() {
        let kept: Vec<String> = parse_channels(CHANNEL_TEXT)
            .into_iter()
            .filter(|l| is_inventory_channel(&l.channel))
            .map(|l| l.channel)
            .collect();
        assert_eq!(kept, vec!["BHZ", "HHZ", "BDF"]);
    }

    #[test]
    fn test_empty_body_parses_to_nothing() {
        assert!(parse_networks("").is_empty());
        assert!(parse_channels("#Network|Station\n").is_empty());
    }

    #[test]
    fn test_default_streams_are_not_available() {
        let mut client = FdsnStationClient::new(&FdsnwsConfig::default()).unwrap();
        let err = client.default_streams().unwrap_err();
        assert!(matches!(err, QcError::ConfigurationLookup(_)));
        assert_eq!(
            logging::classify_gateway_failure(&err.to_string()),
            logging::FailureType::Expected
        );
    }
}
