//! Metadata gateway over the SeisComP inventory/configuration database.
//!
//! All queries are independent point-in-time reads on one reused
//! connection; nothing is written and no transactions are opened.

use crate::logging::{self, DataSource};
use crate::model::{QcError, QueryWindow, StationKey, normalize_location};
use crate::stations::{DefaultChannels, RawCode};
use postgres::{Client, NoTls, Row};
use std::collections::BTreeSet;

/// SeisComP module whose station bindings hold the default stream.
pub const DEFAULT_STREAM_MODULE: &str = "trunk";

/// Tables the gateway reads. Postgres folds the unquoted SeisComP names to
/// lower case.
const REQUIRED_TABLES: &[&str] = &[
    "network",
    "station",
    "sensorlocation",
    "stream",
    "configmodule",
    "configstation",
    "setup",
    "publicobject",
    "parameter",
];

/// Vertical and auxiliary channel naming conventions (`*Z`, `ED?`, `BD?`).
const CHANNEL_FILTER_SQL: &str =
    "(st.m_code LIKE '%Z' OR st.m_code LIKE 'ED_' OR st.m_code LIKE 'BD_')";

/// Location and channel codes available for a set of stations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInventory {
    /// Normalized location codes (empty string for no location).
    pub locations: BTreeSet<String>,
    pub channels: BTreeSet<String>,
}

/// Structural queries the stream resolution and averaging steps need.
pub trait MetadataGateway {
    /// Tag used when logging this gateway's failures.
    fn source(&self) -> DataSource;

    /// Distinct network codes, sorted.
    fn network_codes(&mut self) -> Result<Vec<String>, QcError>;

    /// Stations of the given networks, sorted.
    fn station_codes(&mut self, networks: &BTreeSet<String>) -> Result<Vec<StationKey>, QcError>;

    /// Locations and vertical/auxiliary channels of the given stations.
    fn stream_inventory(
        &mut self,
        networks: &BTreeSet<String>,
        stations: &BTreeSet<String>,
    ) -> Result<StreamInventory, QcError>;

    /// Configured default stream per station.
    fn default_streams(&mut self) -> Result<DefaultChannels, QcError>;

    /// Stations of the given networks with at least one vertical/auxiliary
    /// stream whose whole epoch chain overlaps `window`.
    fn active_stations(
        &mut self,
        networks: &BTreeSet<String>,
        window: &QueryWindow,
    ) -> Result<BTreeSet<StationKey>, QcError>;
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Gateway backed by a SeisComP Postgres database.
pub struct SeisCompDb {
    client: Client,
    module: String,
}

impl SeisCompDb {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            module: DEFAULT_STREAM_MODULE.to_string(),
        }
    }

    /// Reads default streams from another module's bindings.
    pub fn with_module(mut self, module: &str) -> Self {
        self.module = module.to_string();
        self
    }
}

/// Opens a connection to the metadata database.
pub fn connect(url: &str) -> Result<SeisCompDb, QcError> {
    let client = Client::connect(url, NoTls)?;
    logging::debug(DataSource::Database, None, "connected to metadata database");
    Ok(SeisCompDb::new(client))
}

/// Opens a connection and checks that the SeisComP tables the gateway reads
/// exist.
pub fn connect_and_verify(url: &str) -> Result<SeisCompDb, QcError> {
    let mut db = connect(url)?;

    let rows = db.client.query(
        "SELECT lower(table_name) FROM information_schema.tables
         WHERE lower(table_name) = ANY($1)",
        &[&REQUIRED_TABLES.iter().map(|t| t.to_string()).collect::<Vec<_>>()],
    )?;
    let present: BTreeSet<String> = rows.iter().map(|r| r.get(0)).collect();
    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|t| !present.contains(*t))
        .collect();

    if !missing.is_empty() {
        return Err(QcError::ConfigurationLookup(format!(
            "metadata database is missing SeisComP tables: {}",
            missing.join(", ")
        )));
    }
    Ok(db)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

/// Reads a code column whatever its storage type; this is where byte
/// columns (e.g. `Parameter.m_value`) become text.
fn raw_code(row: &Row, idx: usize) -> RawCode {
    if let Ok(text) = row.try_get::<_, Option<String>>(idx) {
        return RawCode::from(text);
    }
    match row.try_get::<_, Option<Vec<u8>>>(idx) {
        Ok(Some(bytes)) => RawCode::Bytes(bytes),
        _ => RawCode::Null,
    }
}

impl MetadataGateway for SeisCompDb {
    fn source(&self) -> DataSource {
        DataSource::Database
    }

    fn network_codes(&mut self) -> Result<Vec<String>, QcError> {
        let rows = self
            .client
            .query("SELECT DISTINCT m_code FROM Network ORDER BY m_code", &[])?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    fn station_codes(&mut self, networks: &BTreeSet<String>) -> Result<Vec<StationKey>, QcError> {
        let rows = self.client.query(
            "SELECT DISTINCT n.m_code, s.m_code
             FROM Station s
             JOIN Network n ON s._parent_oid = n._oid
             WHERE n.m_code = ANY($1)
             ORDER BY n.m_code, s.m_code",
            &[&to_vec(networks)],
        )?;
        Ok(rows
            .iter()
            .map(|r| StationKey::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }

    fn stream_inventory(
        &mut self,
        networks: &BTreeSet<String>,
        stations: &BTreeSet<String>,
    ) -> Result<StreamInventory, QcError> {
        let query = format!(
            "SELECT DISTINCT COALESCE(sl.m_code, ''), st.m_code
             FROM Network n
             JOIN Station s ON n._oid = s._parent_oid
             JOIN SensorLocation sl ON s._oid = sl._parent_oid
             JOIN Stream st ON sl._oid = st._parent_oid
             WHERE n.m_code = ANY($1)
               AND s.m_code = ANY($2)
               AND {}",
            CHANNEL_FILTER_SQL
        );
        let rows = self
            .client
            .query(query.as_str(), &[&to_vec(networks), &to_vec(stations)])?;

        let mut inventory = StreamInventory::default();
        for row in &rows {
            inventory.locations.insert(normalize_location(&raw_code(row, 0).decode()));
            inventory.channels.insert(raw_code(row, 1).decode());
        }
        Ok(inventory)
    }

    fn default_streams(&mut self) -> Result<DefaultChannels, QcError> {
        let rows = self.client.query(
            "SELECT cs.m_networkCode, cs.m_stationCode, pm_stream.m_value, pm_locid.m_value
             FROM ConfigModule cm
             JOIN ConfigStation cs ON cs._parent_oid = cm._oid
             JOIN Setup su ON su._parent_oid = cs._oid AND su.m_name = 'default'
             JOIN PublicObject po ON po.m_publicID = su.m_parameterSetID
             JOIN Parameter pm_stream ON pm_stream._parent_oid = po._oid
                  AND pm_stream.m_name = 'detecStream'
             LEFT JOIN Parameter pm_locid ON pm_locid._parent_oid = po._oid
                  AND pm_locid.m_name = 'detecLocid'
             WHERE cm.m_name = $1",
            &[&self.module],
        )?;

        let mut defaults = DefaultChannels::new();
        for row in &rows {
            defaults.insert_raw(raw_code(row, 0), raw_code(row, 1), raw_code(row, 2), raw_code(row, 3));
        }
        logging::debug(
            DataSource::Database,
            None,
            &format!("loaded {} configured default streams", defaults.len()),
        );
        Ok(defaults)
    }

    fn active_stations(
        &mut self,
        networks: &BTreeSet<String>,
        window: &QueryWindow,
    ) -> Result<BTreeSet<StationKey>, QcError> {
        let query = format!(
            "SELECT DISTINCT n.m_code, s.m_code
             FROM Network n
             JOIN Station s ON n._oid = s._parent_oid
             JOIN SensorLocation sl ON s._oid = sl._parent_oid
             JOIN Stream st ON sl._oid = st._parent_oid
             WHERE n.m_code = ANY($1)
               AND (n.m_end IS NULL OR n.m_end > $2)
               AND (s.m_end IS NULL OR s.m_end > $2)
               AND (sl.m_end IS NULL OR sl.m_end > $2)
               AND (st.m_end IS NULL OR st.m_end > $2)
               AND n.m_start <= $3
               AND s.m_start <= $3
               AND sl.m_start <= $3
               AND st.m_start <= $3
               AND {}
             ORDER BY n.m_code, s.m_code",
            CHANNEL_FILTER_SQL
        );
        let rows = self
            .client
            .query(query.as_str(), &[&to_vec(networks), &window.start, &window.end])?;
        Ok(rows
            .iter()
            .map(|r| StationKey::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect())
    }
}
