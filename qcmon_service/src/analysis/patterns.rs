//! Stream pattern generation.
//!
//! Expands a sparse user selection into the concrete set of
//! `network.station.location.channel` streams to ask the QC tool for.
//! Blank location/channel selections are filled from each station's
//! configured default stream.

use crate::model::{StationKey, StreamKey, normalize_location};
use crate::stations::{DefaultChannels, resolve_default_channels};
use std::collections::BTreeSet;

/// What the user picked. Empty `locations` / `channels` mean "use each
/// station's default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub networks: BTreeSet<String>,
    pub stations: BTreeSet<String>,
    pub locations: BTreeSet<String>,
    pub channels: BTreeSet<String>,
}

impl StreamSelection {
    /// Builds a selection from free-form lists, trimming entries, dropping
    /// blanks and normalizing location codes.
    pub fn from_lists<S: AsRef<str>>(networks: &[S], stations: &[S], locations: &[S], channels: &[S]) -> Self {
        Self {
            networks: clean(networks),
            stations: clean(stations),
            // `--` is a real user choice (the empty location) so it is kept,
            // as the normalized empty string
            locations: locations
                .iter()
                .map(|l| l.as_ref().trim())
                .filter(|l| !l.is_empty())
                .map(normalize_location)
                .collect(),
            channels: clean(channels),
        }
    }

    /// The `(network, station)` pairs of the cross product.
    pub fn station_keys(&self) -> BTreeSet<StationKey> {
        self.networks
            .iter()
            .flat_map(|net| self.stations.iter().map(move |sta| StationKey::new(net.as_str(), sta.as_str())))
            .collect()
    }
}

fn clean<S: AsRef<str>>(items: &[S]) -> BTreeSet<String> {
    items
        .iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolves a selection into the set of streams to query.
///
/// For every selected `(network, station)` pair, locations are the explicit
/// ones or the station's default location, and channels are the explicit ones
/// or the resolved default channel candidates. Stations without a configured
/// default use `BHZ` with an empty location. An empty result is returned as
/// such; callers decide whether that is an error.
pub fn generate(selection: &StreamSelection, defaults: &DefaultChannels) -> BTreeSet<StreamKey> {
    let mut streams = BTreeSet::new();

    for station in selection.station_keys() {
        let default = defaults.get_or_fallback(&station);

        let locations: Vec<String> = if selection.locations.is_empty() {
            vec![default.location_code.clone()]
        } else {
            selection.locations.iter().cloned().collect()
        };

        let channels: Vec<String> = if selection.channels.is_empty() {
            resolve_default_channels(&default.channel_code)
        } else {
            selection.channels.iter().cloned().collect()
        };

        for location in &locations {
            for channel in &channels {
                streams.insert(StreamKey::new(
                    station.network.as_str(),
                    station.station.as_str(),
                    location,
                    channel.as_str(),
                ));
            }
        }
    }

    streams
}

/// Stations of the selection that have no configured default and will be
/// queried with the hard-coded fallback.
pub fn stations_without_defaults(selection: &StreamSelection, defaults: &DefaultChannels) -> Vec<StationKey> {
    selection
        .station_keys()
        .into_iter()
        .filter(|s| defaults.get(s).is_none())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DefaultChannelEntry;

    fn selection(nets: &[&str], stas: &[&str], locs: &[&str], chans: &[&str]) -> StreamSelection {
        StreamSelection::from_lists(nets, stas, locs, chans)
    }

    fn patterns(streams: &BTreeSet<StreamKey>) -> Vec<String> {
        streams.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_station_without_default_uses_bhz_and_empty_location() {
        let streams = generate(&selection(&["XX"], &["AAA"], &[], &[]), &DefaultChannels::new());
        assert_eq!(patterns(&streams), vec!["XX.AAA.--.BHZ"]);
    }

    #[test]
    fn test_configured_default_is_completed_and_located() {
        let mut defaults = DefaultChannels::new();
        defaults.insert(
            &StationKey::new("GE", "APE"),
            DefaultChannelEntry { channel_code: "HH".into(), location_code: "00".into() },
        );
        let streams = generate(&selection(&["GE"], &["APE"], &[], &[]), &defaults);
        assert_eq!(patterns(&streams), vec!["GE.APE.00.HHZ"]);
    }

    #[test]
    fn test_unusable_default_expands_to_fallback_candidates() {
        let mut defaults = DefaultChannels::new();
        defaults.insert(
            &StationKey::new("GE", "APE"),
            DefaultChannelEntry { channel_code: String::new(), location_code: String::new() },
        );
        let streams = generate(&selection(&["GE"], &["APE"], &[], &[]), &defaults);
        assert_eq!(streams.len(), 6);
        assert!(streams.contains(&StreamKey::new("GE", "APE", "", "EDH")));
    }

    #[test]
    fn test_explicit_locations_and_channels_override_defaults() {
        let mut defaults = DefaultChannels::new();
        defaults.insert(
            &StationKey::new("GE", "APE"),
            DefaultChannelEntry { channel_code: "HH".into(), location_code: "00".into() },
        );
        let streams = generate(&selection(&["GE"], &["APE"], &["10", "--"], &["BHZ", "EDH"]), &defaults);
        assert_eq!(
            patterns(&streams),
            vec!["GE.APE.--.BHZ", "GE.APE.--.EDH", "GE.APE.10.BHZ", "GE.APE.10.EDH"]
        );
    }

    #[test]
    fn test_explicit_channel_with_default_location() {
        let mut defaults = DefaultChannels::new();
        defaults.insert(
            &StationKey::new("GE", "APE"),
            DefaultChannelEntry { channel_code: "HH".into(), location_code: "00".into() },
        );
        let streams = generate(&selection(&["GE"], &["APE"], &[], &["BDF"]), &defaults);
        assert_eq!(patterns(&streams), vec!["GE.APE.00.BDF"]);
    }

    #[test]
    fn test_cross_product_covers_every_network_station_pair() {
        let streams = generate(&selection(&["AA", "BB"], &["S1", "S2"], &[], &[]), &DefaultChannels::new());
        assert_eq!(streams.len(), 4);
    }

    #[test]
    fn test_repeated_entries_never_duplicate_streams() {
        let streams = generate(
            &selection(&["XX", "XX"], &["AAA", " AAA"], &["00", "00 "], &["BHZ", "BHZ"]),
            &DefaultChannels::new(),
        );
        assert_eq!(patterns(&streams), vec!["XX.AAA.00.BHZ"]);
    }

    #[test]
    fn test_generation_is_order_independent() {
        let a = generate(&selection(&["AA", "BB"], &["S1", "S2"], &["00", "10"], &["BHZ", "HHZ"]), &DefaultChannels::new());
        let b = generate(&selection(&["BB", "AA"], &["S2", "S1"], &["10", "00"], &["HHZ", "BHZ"]), &DefaultChannels::new());
        assert_eq!(a, b);
        let again = generate(&selection(&["AA", "BB"], &["S1", "S2"], &["00", "10"], &["BHZ", "HHZ"]), &DefaultChannels::new());
        assert_eq!(a, again, "generation must be idempotent");
    }

    #[test]
    fn test_no_stations_yields_empty_set() {
        let streams = generate(&selection(&["XX"], &[], &[], &[]), &DefaultChannels::new());
        assert!(streams.is_empty());
    }

    #[test]
    fn test_stations_without_defaults_lists_fallback_users() {
        let mut defaults = DefaultChannels::new();
        defaults.insert(&StationKey::new("XX", "AAA"), DefaultChannelEntry::fallback());
        let missing = stations_without_defaults(&selection(&["XX"], &["AAA", "BBB"], &[], &[]), &defaults);
        assert_eq!(missing, vec![StationKey::new("XX", "BBB")]);
    }
}
