//! Station default streams and channel naming rules.
//!
//! SeisComP stores each station's primary stream in its module
//! configuration (`detecStream` / `detecLocid`). The stored channel code is
//! often only the band+instrument pair (`BH`), so it has to be completed
//! before it can name a real channel. This module owns that resolution and
//! the decode boundary for raw values coming out of the metadata store:
//! everything past [`RawCode::decode`] is plain text.

use crate::model::{DefaultChannelEntry, StationKey, normalize_location};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Channel naming
// ---------------------------------------------------------------------------

/// Auxiliary (non-seismometer) sensor codes that are used verbatim and never
/// completed with a component letter.
pub const RESERVED_CHANNEL_CODES: &[&str] = &["EDH", "BDF"];

/// Candidate channels tried when a station's configured code is unusable.
pub const FALLBACK_CHANNELS: &[&str] = &["BHZ", "HHZ", "EHZ", "SHZ", "EDH", "BDF"];

/// Component letter appended to 2-letter band+instrument codes.
pub const VERTICAL_COMPONENT: char = 'Z';

/// Returns the channel codes to query for a station whose configured default
/// channel is `raw_code`. Never returns an empty list.
///
/// - `EDH…` / `BDF…` → the code unchanged
/// - 2 letters (`BH`) → vertical component (`BHZ`)
/// - 3 letters → the code unchanged
/// - anything else, including empty → [`FALLBACK_CHANNELS`]
pub fn resolve_default_channels(raw_code: &str) -> Vec<String> {
    let code = raw_code.trim();

    if RESERVED_CHANNEL_CODES.iter().any(|r| code.starts_with(r)) {
        return vec![code.to_string()];
    }

    match code.chars().count() {
        2 => vec![format!("{}{}", code, VERTICAL_COMPONENT)],
        3 => vec![code.to_string()],
        _ => FALLBACK_CHANNELS.iter().map(|c| c.to_string()).collect(),
    }
}

/// True for channel codes the inventory listing exposes: vertical components
/// (`*Z`) and the auxiliary `ED?` / `BD?` families.
pub fn is_inventory_channel(code: &str) -> bool {
    let code = code.trim();
    code.ends_with(VERTICAL_COMPONENT)
        || (code.len() == 3 && (code.starts_with("ED") || code.starts_with("BD")))
}

// ---------------------------------------------------------------------------
// Decode boundary
// ---------------------------------------------------------------------------

/// A code value as it comes out of a metadata query. Depending on the column
/// type, the store hands back text, raw bytes or NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCode {
    Text(String),
    Bytes(Vec<u8>),
    Null,
}

impl RawCode {
    /// Decodes to trimmed text. Invalid UTF-8 is replaced rather than
    /// rejected; NULL becomes the empty string.
    pub fn decode(self) -> String {
        match self {
            RawCode::Text(s) => s.trim().to_string(),
            RawCode::Bytes(b) => String::from_utf8_lossy(&b).trim().to_string(),
            RawCode::Null => String::new(),
        }
    }
}

impl From<Option<String>> for RawCode {
    fn from(value: Option<String>) -> Self {
        value.map(RawCode::Text).unwrap_or(RawCode::Null)
    }
}

// ---------------------------------------------------------------------------
// Default stream table
// ---------------------------------------------------------------------------

/// Configured default stream per station, keyed by `"net.sta"`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefaultChannels {
    entries: HashMap<String, DefaultChannelEntry>,
}

impl DefaultChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one configuration row. Values are decoded here; a later row for
    /// the same station replaces an earlier one.
    pub fn insert_raw(&mut self, network: RawCode, station: RawCode, channel: RawCode, location: RawCode) {
        let key = StationKey::new(network.decode(), station.decode());
        let entry = DefaultChannelEntry {
            channel_code: channel.decode(),
            location_code: normalize_location(&location.decode()),
        };
        self.entries.insert(key.to_string(), entry);
    }

    pub fn insert(&mut self, station: &StationKey, entry: DefaultChannelEntry) {
        self.entries.insert(station.to_string(), entry);
    }

    /// The configured entry for a station, if any.
    pub fn get(&self, station: &StationKey) -> Option<&DefaultChannelEntry> {
        self.entries.get(&station.to_string())
    }

    /// The configured entry, or `BHZ` with an empty location.
    pub fn get_or_fallback(&self, station: &StationKey) -> DefaultChannelEntry {
        self.get(station)
            .cloned()
            .unwrap_or_else(DefaultChannelEntry::fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Label used in station listings: `STA (Default: LOC.CHA)`, with `--` for
/// an empty location and the 2-letter code completed where the rules allow.
pub fn station_label(station: &StationKey, defaults: &DefaultChannels) -> String {
    let entry = defaults.get_or_fallback(station);
    let channels = resolve_default_channels(&entry.channel_code);
    let channel = if channels.len() == 1 {
        channels[0].clone()
    } else {
        entry.channel_code.clone()
    };
    format!(
        "{} (Default: {}.{})",
        station.station,
        crate::model::display_location(&entry.location_code),
        channel
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
