//! PostgreSQL implementation of the ocpihub storage seam.
//!
//! Hierarchical entities are stored normalized: EVSE rows are keyed by
//! `(location_id, uid)` and connector rows by `(location_id, evse_uid, id)`,
//! matching the OCPI rule that child ids are unique only within their
//! parent's scope. All upserts are `INSERT .. ON CONFLICT DO UPDATE`
//! (idempotent storage-level merge); the partial-field business merge lives
//! in the core crate.
//!
//! # Database Schema
//!
//! ```sql
//! -- Sync header columns shared by replicated entities:
//! --   country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//! --   last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ
//!
//! CREATE TABLE locations (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     name TEXT,
//!     address TEXT NOT NULL DEFAULT '',
//!     city TEXT NOT NULL DEFAULT '',
//!     country TEXT NOT NULL DEFAULT '',
//!     coordinates JSONB,
//!     time_zone TEXT
//! );
//!
//! CREATE TABLE evses (
//!     location_id TEXT NOT NULL,
//!     uid TEXT NOT NULL,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     status TEXT,
//!     floor_level TEXT,
//!     physical_reference TEXT,
//!     PRIMARY KEY (location_id, uid)
//! );
//!
//! CREATE TABLE connectors (
//!     location_id TEXT NOT NULL,
//!     evse_uid TEXT NOT NULL,
//!     id TEXT NOT NULL,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     standard TEXT, format TEXT, power_type TEXT,
//!     max_voltage INTEGER, max_amperage INTEGER,
//!     tariff_ids TEXT[] NOT NULL DEFAULT '{}',
//!     PRIMARY KEY (location_id, evse_uid, id)
//! );
//!
//! CREATE TABLE sessions (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     start_date_time TIMESTAMPTZ, end_date_time TIMESTAMPTZ,
//!     kwh DOUBLE PRECISION,
//!     auth_ref TEXT, token_uid TEXT,
//!     location_id TEXT, evse_uid TEXT, connector_id TEXT,
//!     currency TEXT, status TEXT
//! );
//!
//! CREATE TABLE charging_periods (
//!     session_id TEXT NOT NULL,
//!     start_date_time TIMESTAMPTZ NOT NULL,
//!     dimensions JSONB NOT NULL DEFAULT '[]'
//! );
//! CREATE INDEX idx_charging_periods_session ON charging_periods (session_id);
//!
//! CREATE TABLE tariffs (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     currency TEXT NOT NULL DEFAULT '',
//!     tariff_alt_url TEXT,
//!     elements JSONB NOT NULL DEFAULT '[]'
//! );
//!
//! CREATE TABLE tokens (
//!     uid TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     token_type TEXT,
//!     contract_id TEXT NOT NULL DEFAULT '',
//!     visual_number TEXT, issuer TEXT,
//!     valid BOOLEAN, whitelist TEXT
//! );
//!
//! CREATE TABLE cdrs (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     start_date_time TIMESTAMPTZ, stop_date_time TIMESTAMPTZ,
//!     session_id TEXT, auth_ref TEXT, currency TEXT,
//!     total_cost DOUBLE PRECISION,
//!     total_energy DOUBLE PRECISION,
//!     total_time DOUBLE PRECISION
//! );
//!
//! CREATE TABLE parties (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     name TEXT, website TEXT,
//!     roles JSONB NOT NULL DEFAULT '[]',
//!     status TEXT
//! );
//!
//! CREATE TABLE commands (
//!     id TEXT PRIMARY KEY,
//!     country_code TEXT, party_id TEXT, platform_id UUID, ref_id TEXT,
//!     last_updated TIMESTAMPTZ, last_sent TIMESTAMPTZ,
//!     cmd TEXT NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'created',
//!     origin TEXT NOT NULL DEFAULT 'local',
//!     deadline TIMESTAMPTZ,
//!     auth_ref TEXT,
//!     details JSONB NOT NULL,
//!     processing JSONB
//! );
//! CREATE INDEX idx_commands_pending ON commands (origin, deadline)
//!     WHERE status IN ('created', 'accepted');
//!
//! CREATE TABLE webhooks (
//!     id TEXT PRIMARY KEY,
//!     api_key TEXT NOT NULL,
//!     events TEXT[] NOT NULL DEFAULT '{}',
//!     url TEXT NOT NULL
//! );
//! CREATE INDEX idx_webhooks_events ON webhooks USING GIN (events);
//!
//! CREATE TABLE log_messages (
//!     id UUID PRIMARY KEY,
//!     event TEXT NOT NULL,
//!     request_id TEXT, correlation_id TEXT,
//!     from_platform UUID, to_platform UUID,
//!     request_body JSONB, response_body JSONB,
//!     status INTEGER, ocpi_status INTEGER,
//!     err TEXT, duration_ms BIGINT,
//!     incoming BOOLEAN NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL
//! );
//! CREATE INDEX idx_log_messages_created ON log_messages (created_at);
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Row, Transaction};

use ocpihub::model::{
    Cdr, ChargingPeriod, Command, CommandDetails, Connector, Evse, Location, LogMessage, Party,
    Processing, Role, Session, Tariff, TariffElement, Token, Webhook,
};
use ocpihub::store::{CommandCriteria, SearchCriteria};
use ocpihub::sync::{ExtId, SyncHeader};
use ocpihub::{HubError, HubStore, HubTx, StorageOp};

/// PostgreSQL hub store.
#[derive(Clone)]
pub struct PgHubStore {
    pool: PgPool,
}

impl PgHubStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ----------------------------------------------------------------------
// Mapping helpers
// ----------------------------------------------------------------------

fn storage_err(
    op: StorageOp,
    entity: &'static str,
) -> impl FnOnce(sqlx::Error) -> HubError {
    move |err| HubError::storage(op, entity, err)
}

fn sync_from_row(row: &PgRow) -> SyncHeader {
    let country_code: Option<String> = row.get("country_code");
    let party_id: Option<String> = row.get("party_id");
    let ext_id = match (country_code, party_id) {
        (Some(country_code), Some(party_id)) => Some(ExtId {
            country_code,
            party_id,
        }),
        _ => None,
    };
    SyncHeader {
        ext_id,
        platform_id: row.get("platform_id"),
        ref_id: row.get("ref_id"),
        last_updated: row.get("last_updated"),
        last_sent: row.get("last_sent"),
    }
}

fn ext_parts(sync: &SyncHeader) -> (Option<&str>, Option<&str>) {
    match &sync.ext_id {
        Some(ext_id) => (
            Some(ext_id.country_code.as_str()),
            Some(ext_id.party_id.as_str()),
        ),
        None => (None, None),
    }
}

fn parse_text<T>(entity: &'static str, value: String) -> Result<T, HubError>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|err: String| HubError::storage(StorageOp::Get, entity, anyhow::anyhow!(err)))
}

fn parse_text_opt<T>(entity: &'static str, value: Option<String>) -> Result<Option<T>, HubError>
where
    T: std::str::FromStr<Err = String>,
{
    value.map(|v| parse_text(entity, v)).transpose()
}

fn to_json<T: Serialize>(entity: &'static str, value: &T) -> Result<serde_json::Value, HubError> {
    serde_json::to_value(value).map_err(|err| HubError::storage(StorageOp::Merge, entity, err))
}

fn from_json<T: DeserializeOwned>(
    entity: &'static str,
    value: serde_json::Value,
) -> Result<T, HubError> {
    serde_json::from_value(value).map_err(|err| HubError::storage(StorageOp::Get, entity, err))
}

fn location_from_row(row: &PgRow) -> Result<Location, HubError> {
    let coordinates: Option<serde_json::Value> = row.get("coordinates");
    Ok(Location {
        id: row.get("id"),
        sync: sync_from_row(row),
        name: row.get("name"),
        address: row.get("address"),
        city: row.get("city"),
        country: row.get("country"),
        coordinates: coordinates.map(|c| from_json("location", c)).transpose()?,
        time_zone: row.get("time_zone"),
        evses: Vec::new(),
    })
}

fn evse_from_row(row: &PgRow) -> Result<Evse, HubError> {
    Ok(Evse {
        uid: row.get("uid"),
        location_id: row.get("location_id"),
        sync: sync_from_row(row),
        status: parse_text_opt("evse", row.get("status"))?,
        floor_level: row.get("floor_level"),
        physical_reference: row.get("physical_reference"),
        connectors: Vec::new(),
    })
}

fn connector_from_row(row: &PgRow) -> Result<Connector, HubError> {
    Ok(Connector {
        id: row.get("id"),
        evse_uid: row.get("evse_uid"),
        location_id: row.get("location_id"),
        sync: sync_from_row(row),
        standard: parse_text_opt("connector", row.get("standard"))?,
        format: parse_text_opt("connector", row.get("format"))?,
        power_type: parse_text_opt("connector", row.get("power_type"))?,
        max_voltage: row.get("max_voltage"),
        max_amperage: row.get("max_amperage"),
        tariff_ids: row.get("tariff_ids"),
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, HubError> {
    Ok(Session {
        id: row.get("id"),
        sync: sync_from_row(row),
        start_date_time: row.get("start_date_time"),
        end_date_time: row.get("end_date_time"),
        kwh: row.get("kwh"),
        auth_ref: row.get("auth_ref"),
        token_uid: row.get("token_uid"),
        location_id: row.get("location_id"),
        evse_uid: row.get("evse_uid"),
        connector_id: row.get("connector_id"),
        currency: row.get("currency"),
        status: parse_text_opt("session", row.get("status"))?,
        charging_periods: Vec::new(),
    })
}

fn period_from_row(row: &PgRow) -> Result<ChargingPeriod, HubError> {
    let dimensions: serde_json::Value = row.get("dimensions");
    Ok(ChargingPeriod {
        session_id: row.get("session_id"),
        start_date_time: row.get("start_date_time"),
        dimensions: from_json("session", dimensions)?,
    })
}

fn tariff_from_row(row: &PgRow) -> Result<Tariff, HubError> {
    let elements: serde_json::Value = row.get("elements");
    let elements: Vec<TariffElement> = from_json("tariff", elements)?;
    Ok(Tariff {
        id: row.get("id"),
        sync: sync_from_row(row),
        currency: row.get("currency"),
        tariff_alt_url: row.get("tariff_alt_url"),
        elements,
    })
}

fn token_from_row(row: &PgRow) -> Result<Token, HubError> {
    Ok(Token {
        uid: row.get("uid"),
        sync: sync_from_row(row),
        token_type: parse_text_opt("token", row.get("token_type"))?,
        contract_id: row.get("contract_id"),
        visual_number: row.get("visual_number"),
        issuer: row.get("issuer"),
        valid: row.get("valid"),
        whitelist: parse_text_opt("token", row.get("whitelist"))?,
    })
}

fn cdr_from_row(row: &PgRow) -> Result<Cdr, HubError> {
    Ok(Cdr {
        id: row.get("id"),
        sync: sync_from_row(row),
        start_date_time: row.get("start_date_time"),
        stop_date_time: row.get("stop_date_time"),
        session_id: row.get("session_id"),
        auth_ref: row.get("auth_ref"),
        currency: row.get("currency"),
        total_cost: row.get("total_cost"),
        total_energy: row.get("total_energy"),
        total_time: row.get("total_time"),
    })
}

fn party_from_row(row: &PgRow) -> Result<Party, HubError> {
    let roles: serde_json::Value = row.get("roles");
    let roles: Vec<Role> = from_json("party", roles)?;
    Ok(Party {
        id: row.get("id"),
        sync: sync_from_row(row),
        name: row.get("name"),
        website: row.get("website"),
        roles,
        status: parse_text_opt("party", row.get("status"))?,
    })
}

fn command_from_row(row: &PgRow) -> Result<Command, HubError> {
    let details: serde_json::Value = row.get("details");
    let details: CommandDetails = from_json("command", details)?;
    let processing: Option<serde_json::Value> = row.get("processing");
    let processing: Option<Processing> =
        processing.map(|p| from_json("command", p)).transpose()?;
    Ok(Command {
        id: row.get("id"),
        sync: sync_from_row(row),
        cmd: parse_text("command", row.get("cmd"))?,
        status: parse_text("command", row.get("status"))?,
        origin: parse_text("command", row.get("origin"))?,
        deadline: row.get("deadline"),
        auth_ref: row.get("auth_ref"),
        details,
        processing,
    })
}

fn webhook_from_row(row: &PgRow) -> Webhook {
    Webhook {
        id: row.get("id"),
        api_key: row.get("api_key"),
        events: row.get("events"),
        url: row.get("url"),
    }
}

fn push_header_filters<'q>(
    builder: &mut QueryBuilder<'q, Postgres>,
    criteria: &'q SearchCriteria,
) {
    if let Some(ext_id) = &criteria.ext_id {
        builder
            .push(" AND country_code = ")
            .push_bind(&ext_id.country_code)
            .push(" AND party_id = ")
            .push_bind(&ext_id.party_id);
    }
    if let Some(from) = criteria.updated_from {
        builder.push(" AND last_updated >= ").push_bind(from);
    }
    if let Some(to) = criteria.updated_to {
        builder.push(" AND last_updated <= ").push_bind(to);
    }
    if !criteria.platform_in.is_empty() {
        builder
            .push(" AND platform_id = ANY(")
            .push_bind(&criteria.platform_in)
            .push(")");
    }
    if !criteria.platform_not_in.is_empty() {
        builder
            .push(" AND (platform_id IS NULL OR platform_id <> ALL(")
            .push_bind(&criteria.platform_not_in)
            .push("))");
    }
    if !criteria.ids.is_empty() {
        builder
            .push(" AND id = ANY(")
            .push_bind(&criteria.ids)
            .push(")");
    }
}

fn push_paging(builder: &mut QueryBuilder<'_, Postgres>, criteria: &SearchCriteria) {
    builder.push(" ORDER BY id");
    if let Some(limit) = criteria.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }
    if let Some(offset) = criteria.offset {
        builder.push(" OFFSET ").push_bind(offset);
    }
}

// ----------------------------------------------------------------------
// Row writes shared by pool and transaction paths
// ----------------------------------------------------------------------

async fn write_location_row<'e, E: PgExecutor<'e>>(
    exec: E,
    location: &Location,
) -> Result<(), sqlx::Error> {
    let (country_code, party_id) = ext_parts(&location.sync);
    let coordinates = location
        .coordinates
        .as_ref()
        .and_then(|c| serde_json::to_value(c).ok());
    sqlx::query(
        r#"
        INSERT INTO locations (
            id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
            name, address, city, country, coordinates, time_zone
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            country_code = EXCLUDED.country_code,
            party_id = EXCLUDED.party_id,
            platform_id = EXCLUDED.platform_id,
            ref_id = EXCLUDED.ref_id,
            last_updated = EXCLUDED.last_updated,
            last_sent = EXCLUDED.last_sent,
            name = EXCLUDED.name,
            address = EXCLUDED.address,
            city = EXCLUDED.city,
            country = EXCLUDED.country,
            coordinates = EXCLUDED.coordinates,
            time_zone = EXCLUDED.time_zone
        "#,
    )
    .bind(&location.id)
    .bind(country_code)
    .bind(party_id)
    .bind(location.sync.platform_id)
    .bind(&location.sync.ref_id)
    .bind(location.sync.last_updated)
    .bind(location.sync.last_sent)
    .bind(&location.name)
    .bind(&location.address)
    .bind(&location.city)
    .bind(&location.country)
    .bind(coordinates)
    .bind(&location.time_zone)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_evse_row<'e, E: PgExecutor<'e>>(exec: E, evse: &Evse) -> Result<(), sqlx::Error> {
    let (country_code, party_id) = ext_parts(&evse.sync);
    sqlx::query(
        r#"
        INSERT INTO evses (
            location_id, uid, country_code, party_id, platform_id, ref_id,
            last_updated, last_sent, status, floor_level, physical_reference
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (location_id, uid) DO UPDATE SET
            country_code = EXCLUDED.country_code,
            party_id = EXCLUDED.party_id,
            platform_id = EXCLUDED.platform_id,
            ref_id = EXCLUDED.ref_id,
            last_updated = EXCLUDED.last_updated,
            last_sent = EXCLUDED.last_sent,
            status = EXCLUDED.status,
            floor_level = EXCLUDED.floor_level,
            physical_reference = EXCLUDED.physical_reference
        "#,
    )
    .bind(&evse.location_id)
    .bind(&evse.uid)
    .bind(country_code)
    .bind(party_id)
    .bind(evse.sync.platform_id)
    .bind(&evse.sync.ref_id)
    .bind(evse.sync.last_updated)
    .bind(evse.sync.last_sent)
    .bind(evse.status.map(|s| s.as_str()))
    .bind(&evse.floor_level)
    .bind(&evse.physical_reference)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_connector_row<'e, E: PgExecutor<'e>>(
    exec: E,
    connector: &Connector,
) -> Result<(), sqlx::Error> {
    let (country_code, party_id) = ext_parts(&connector.sync);
    sqlx::query(
        r#"
        INSERT INTO connectors (
            location_id, evse_uid, id, country_code, party_id, platform_id, ref_id,
            last_updated, last_sent, standard, format, power_type,
            max_voltage, max_amperage, tariff_ids
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (location_id, evse_uid, id) DO UPDATE SET
            country_code = EXCLUDED.country_code,
            party_id = EXCLUDED.party_id,
            platform_id = EXCLUDED.platform_id,
            ref_id = EXCLUDED.ref_id,
            last_updated = EXCLUDED.last_updated,
            last_sent = EXCLUDED.last_sent,
            standard = EXCLUDED.standard,
            format = EXCLUDED.format,
            power_type = EXCLUDED.power_type,
            max_voltage = EXCLUDED.max_voltage,
            max_amperage = EXCLUDED.max_amperage,
            tariff_ids = EXCLUDED.tariff_ids
        "#,
    )
    .bind(&connector.location_id)
    .bind(&connector.evse_uid)
    .bind(&connector.id)
    .bind(country_code)
    .bind(party_id)
    .bind(connector.sync.platform_id)
    .bind(&connector.sync.ref_id)
    .bind(connector.sync.last_updated)
    .bind(connector.sync.last_sent)
    .bind(connector.standard.map(|s| s.as_str()))
    .bind(connector.format.map(|s| s.as_str()))
    .bind(connector.power_type.map(|s| s.as_str()))
    .bind(connector.max_voltage)
    .bind(connector.max_amperage)
    .bind(&connector.tariff_ids)
    .execute(exec)
    .await?;
    Ok(())
}

async fn write_session_row<'e, E: PgExecutor<'e>>(
    exec: E,
    session: &Session,
) -> Result<(), sqlx::Error> {
    let (country_code, party_id) = ext_parts(&session.sync);
    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
            start_date_time, end_date_time, kwh, auth_ref, token_uid,
            location_id, evse_uid, connector_id, currency, status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (id) DO UPDATE SET
            country_code = EXCLUDED.country_code,
            party_id = EXCLUDED.party_id,
            platform_id = EXCLUDED.platform_id,
            ref_id = EXCLUDED.ref_id,
            last_updated = EXCLUDED.last_updated,
            last_sent = EXCLUDED.last_sent,
            start_date_time = EXCLUDED.start_date_time,
            end_date_time = EXCLUDED.end_date_time,
            kwh = EXCLUDED.kwh,
            auth_ref = EXCLUDED.auth_ref,
            token_uid = EXCLUDED.token_uid,
            location_id = EXCLUDED.location_id,
            evse_uid = EXCLUDED.evse_uid,
            connector_id = EXCLUDED.connector_id,
            currency = EXCLUDED.currency,
            status = EXCLUDED.status
        "#,
    )
    .bind(&session.id)
    .bind(country_code)
    .bind(party_id)
    .bind(session.sync.platform_id)
    .bind(&session.sync.ref_id)
    .bind(session.sync.last_updated)
    .bind(session.sync.last_sent)
    .bind(session.start_date_time)
    .bind(session.end_date_time)
    .bind(session.kwh)
    .bind(&session.auth_ref)
    .bind(&session.token_uid)
    .bind(&session.location_id)
    .bind(&session.evse_uid)
    .bind(&session.connector_id)
    .bind(&session.currency)
    .bind(session.status.map(|s| s.as_str()))
    .execute(exec)
    .await?;
    Ok(())
}

// ----------------------------------------------------------------------
// Transaction
// ----------------------------------------------------------------------

struct PgHubTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl HubTx for PgHubTx {
    async fn upsert_location(&mut self, location: &Location) -> Result<(), HubError> {
        write_location_row(&mut *self.tx, location)
            .await
            .map_err(storage_err(StorageOp::Merge, "location"))
    }

    async fn upsert_evse(&mut self, evse: &Evse) -> Result<(), HubError> {
        write_evse_row(&mut *self.tx, evse)
            .await
            .map_err(storage_err(StorageOp::Merge, "evse"))
    }

    async fn upsert_connector(&mut self, connector: &Connector) -> Result<(), HubError> {
        write_connector_row(&mut *self.tx, connector)
            .await
            .map_err(storage_err(StorageOp::Merge, "connector"))
    }

    async fn upsert_session(&mut self, session: &Session) -> Result<(), HubError> {
        write_session_row(&mut *self.tx, session)
            .await
            .map_err(storage_err(StorageOp::Merge, "session"))
    }

    async fn replace_charging_periods(
        &mut self,
        session_id: &str,
        periods: &[ChargingPeriod],
    ) -> Result<(), HubError> {
        sqlx::query("DELETE FROM charging_periods WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err(StorageOp::Merge, "session"))?;
        for period in periods {
            let dimensions = to_json("session", &period.dimensions)?;
            sqlx::query(
                r#"
                INSERT INTO charging_periods (session_id, start_date_time, dimensions)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(session_id)
            .bind(period.start_date_time)
            .bind(dimensions)
            .execute(&mut *self.tx)
            .await
            .map_err(storage_err(StorageOp::Merge, "session"))?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), HubError> {
        self.tx
            .commit()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<(), HubError> {
        self.tx
            .rollback()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))
    }
}

// ----------------------------------------------------------------------
// Store
// ----------------------------------------------------------------------

#[async_trait]
impl HubStore for PgHubStore {
    async fn begin(&self) -> Result<Box<dyn HubTx>, HubError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))?;
        Ok(Box::new(PgHubTx { tx }))
    }

    async fn get_location(&self, id: &str) -> Result<Option<Location>, HubError> {
        let row = sqlx::query("SELECT * FROM locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "location"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut location = location_from_row(&row)?;
        location.evses = self.load_evses(std::slice::from_ref(&location.id)).await?;
        Ok(Some(location))
    }

    async fn delete_location(&self, id: &str) -> Result<(), HubError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))?;
        for sql in [
            "DELETE FROM connectors WHERE location_id = $1",
            "DELETE FROM evses WHERE location_id = $1",
            "DELETE FROM locations WHERE id = $1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err(StorageOp::Delete, "location"))?;
        }
        tx.commit()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))
    }

    async fn search_locations(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<Location>, HubError> {
        let mut builder = QueryBuilder::new("SELECT * FROM locations WHERE TRUE");
        push_header_filters(&mut builder, criteria);
        push_paging(&mut builder, criteria);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Search, "location"))?;

        let mut locations = rows
            .iter()
            .map(location_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<String> = locations.iter().map(|l| l.id.clone()).collect();
        if ids.is_empty() {
            return Ok(locations);
        }
        let evses = self.load_evses(&ids).await?;
        for location in &mut locations {
            location.evses = evses
                .iter()
                .filter(|e| e.location_id == location.id)
                .cloned()
                .collect();
        }
        Ok(locations)
    }

    async fn get_evse(&self, location_id: &str, uid: &str) -> Result<Option<Evse>, HubError> {
        let row = sqlx::query("SELECT * FROM evses WHERE location_id = $1 AND uid = $2")
            .bind(location_id)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "evse"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut evse = evse_from_row(&row)?;
        let rows = sqlx::query(
            "SELECT * FROM connectors WHERE location_id = $1 AND evse_uid = $2 ORDER BY id",
        )
        .bind(location_id)
        .bind(uid)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Get, "connector"))?;
        evse.connectors = rows
            .iter()
            .map(connector_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(evse))
    }

    async fn get_connector(
        &self,
        location_id: &str,
        evse_uid: &str,
        id: &str,
    ) -> Result<Option<Connector>, HubError> {
        let row = sqlx::query(
            "SELECT * FROM connectors WHERE location_id = $1 AND evse_uid = $2 AND id = $3",
        )
        .bind(location_id)
        .bind(evse_uid)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Get, "connector"))?;
        row.as_ref().map(connector_from_row).transpose()
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, HubError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "session"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut session = session_from_row(&row)?;
        let rows = sqlx::query(
            "SELECT * FROM charging_periods WHERE session_id = $1 ORDER BY start_date_time",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Get, "session"))?;
        session.charging_periods = rows
            .iter()
            .map(period_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(session))
    }

    async fn delete_session(&self, id: &str) -> Result<(), HubError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))?;
        for sql in [
            "DELETE FROM charging_periods WHERE session_id = $1",
            "DELETE FROM sessions WHERE id = $1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err(StorageOp::Delete, "session"))?;
        }
        tx.commit()
            .await
            .map_err(storage_err(StorageOp::Transaction, "transaction"))
    }

    async fn search_sessions(&self, criteria: &SearchCriteria) -> Result<Vec<Session>, HubError> {
        let mut builder = QueryBuilder::new("SELECT * FROM sessions WHERE TRUE");
        push_header_filters(&mut builder, criteria);
        push_paging(&mut builder, criteria);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Search, "session"))?;
        let mut sessions = rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
        if ids.is_empty() {
            return Ok(sessions);
        }
        let rows = sqlx::query(
            "SELECT * FROM charging_periods WHERE session_id = ANY($1) ORDER BY start_date_time",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Search, "session"))?;
        let periods = rows
            .iter()
            .map(period_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        for session in &mut sessions {
            session.charging_periods = periods
                .iter()
                .filter(|p| p.session_id == session.id)
                .cloned()
                .collect();
        }
        Ok(sessions)
    }

    async fn get_tariff(&self, id: &str) -> Result<Option<Tariff>, HubError> {
        let row = sqlx::query("SELECT * FROM tariffs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "tariff"))?;
        row.as_ref().map(tariff_from_row).transpose()
    }

    async fn upsert_tariff(&self, tariff: &Tariff) -> Result<(), HubError> {
        let (country_code, party_id) = ext_parts(&tariff.sync);
        let elements = to_json("tariff", &tariff.elements)?;
        sqlx::query(
            r#"
            INSERT INTO tariffs (
                id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
                currency, tariff_alt_url, elements
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                country_code = EXCLUDED.country_code,
                party_id = EXCLUDED.party_id,
                platform_id = EXCLUDED.platform_id,
                ref_id = EXCLUDED.ref_id,
                last_updated = EXCLUDED.last_updated,
                last_sent = EXCLUDED.last_sent,
                currency = EXCLUDED.currency,
                tariff_alt_url = EXCLUDED.tariff_alt_url,
                elements = EXCLUDED.elements
            "#,
        )
        .bind(&tariff.id)
        .bind(country_code)
        .bind(party_id)
        .bind(tariff.sync.platform_id)
        .bind(&tariff.sync.ref_id)
        .bind(tariff.sync.last_updated)
        .bind(tariff.sync.last_sent)
        .bind(&tariff.currency)
        .bind(&tariff.tariff_alt_url)
        .bind(elements)
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "tariff"))?;
        Ok(())
    }

    async fn delete_tariff(&self, id: &str) -> Result<(), HubError> {
        sqlx::query("DELETE FROM tariffs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Delete, "tariff"))?;
        Ok(())
    }

    async fn get_token(&self, uid: &str) -> Result<Option<Token>, HubError> {
        let row = sqlx::query("SELECT * FROM tokens WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "token"))?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn upsert_token(&self, token: &Token) -> Result<(), HubError> {
        let (country_code, party_id) = ext_parts(&token.sync);
        sqlx::query(
            r#"
            INSERT INTO tokens (
                uid, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
                token_type, contract_id, visual_number, issuer, valid, whitelist
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (uid) DO UPDATE SET
                country_code = EXCLUDED.country_code,
                party_id = EXCLUDED.party_id,
                platform_id = EXCLUDED.platform_id,
                ref_id = EXCLUDED.ref_id,
                last_updated = EXCLUDED.last_updated,
                last_sent = EXCLUDED.last_sent,
                token_type = EXCLUDED.token_type,
                contract_id = EXCLUDED.contract_id,
                visual_number = EXCLUDED.visual_number,
                issuer = EXCLUDED.issuer,
                valid = EXCLUDED.valid,
                whitelist = EXCLUDED.whitelist
            "#,
        )
        .bind(&token.uid)
        .bind(country_code)
        .bind(party_id)
        .bind(token.sync.platform_id)
        .bind(&token.sync.ref_id)
        .bind(token.sync.last_updated)
        .bind(token.sync.last_sent)
        .bind(token.token_type.map(|t| t.as_str()))
        .bind(&token.contract_id)
        .bind(&token.visual_number)
        .bind(&token.issuer)
        .bind(token.valid)
        .bind(token.whitelist.map(|w| w.as_str()))
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "token"))?;
        Ok(())
    }

    async fn delete_token(&self, uid: &str) -> Result<(), HubError> {
        sqlx::query("DELETE FROM tokens WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Delete, "token"))?;
        Ok(())
    }

    async fn get_cdr(&self, id: &str) -> Result<Option<Cdr>, HubError> {
        let row = sqlx::query("SELECT * FROM cdrs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "cdr"))?;
        row.as_ref().map(cdr_from_row).transpose()
    }

    async fn upsert_cdr(&self, cdr: &Cdr) -> Result<(), HubError> {
        let (country_code, party_id) = ext_parts(&cdr.sync);
        sqlx::query(
            r#"
            INSERT INTO cdrs (
                id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
                start_date_time, stop_date_time, session_id, auth_ref, currency,
                total_cost, total_energy, total_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                country_code = EXCLUDED.country_code,
                party_id = EXCLUDED.party_id,
                platform_id = EXCLUDED.platform_id,
                ref_id = EXCLUDED.ref_id,
                last_updated = EXCLUDED.last_updated,
                last_sent = EXCLUDED.last_sent,
                start_date_time = EXCLUDED.start_date_time,
                stop_date_time = EXCLUDED.stop_date_time,
                session_id = EXCLUDED.session_id,
                auth_ref = EXCLUDED.auth_ref,
                currency = EXCLUDED.currency,
                total_cost = EXCLUDED.total_cost,
                total_energy = EXCLUDED.total_energy,
                total_time = EXCLUDED.total_time
            "#,
        )
        .bind(&cdr.id)
        .bind(country_code)
        .bind(party_id)
        .bind(cdr.sync.platform_id)
        .bind(&cdr.sync.ref_id)
        .bind(cdr.sync.last_updated)
        .bind(cdr.sync.last_sent)
        .bind(cdr.start_date_time)
        .bind(cdr.stop_date_time)
        .bind(&cdr.session_id)
        .bind(&cdr.auth_ref)
        .bind(&cdr.currency)
        .bind(cdr.total_cost)
        .bind(cdr.total_energy)
        .bind(cdr.total_time)
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "cdr"))?;
        Ok(())
    }

    async fn get_party(&self, id: &str) -> Result<Option<Party>, HubError> {
        let row = sqlx::query("SELECT * FROM parties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "party"))?;
        row.as_ref().map(party_from_row).transpose()
    }

    async fn upsert_party(&self, party: &Party) -> Result<(), HubError> {
        let (country_code, party_id) = ext_parts(&party.sync);
        let roles = to_json("party", &party.roles)?;
        sqlx::query(
            r#"
            INSERT INTO parties (
                id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
                name, website, roles, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                country_code = EXCLUDED.country_code,
                party_id = EXCLUDED.party_id,
                platform_id = EXCLUDED.platform_id,
                ref_id = EXCLUDED.ref_id,
                last_updated = EXCLUDED.last_updated,
                last_sent = EXCLUDED.last_sent,
                name = EXCLUDED.name,
                website = EXCLUDED.website,
                roles = EXCLUDED.roles,
                status = EXCLUDED.status
            "#,
        )
        .bind(&party.id)
        .bind(country_code)
        .bind(party_id)
        .bind(party.sync.platform_id)
        .bind(&party.sync.ref_id)
        .bind(party.sync.last_updated)
        .bind(party.sync.last_sent)
        .bind(&party.name)
        .bind(&party.website)
        .bind(roles)
        .bind(party.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "party"))?;
        Ok(())
    }

    async fn search_parties(&self, criteria: &SearchCriteria) -> Result<Vec<Party>, HubError> {
        let mut builder = QueryBuilder::new("SELECT * FROM parties WHERE TRUE");
        push_header_filters(&mut builder, criteria);
        push_paging(&mut builder, criteria);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Search, "party"))?;
        rows.iter().map(party_from_row).collect()
    }

    async fn get_command(&self, id: &str) -> Result<Option<Command>, HubError> {
        let row = sqlx::query("SELECT * FROM commands WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "command"))?;
        row.as_ref().map(command_from_row).transpose()
    }

    async fn upsert_command(&self, command: &Command) -> Result<(), HubError> {
        let (country_code, party_id) = ext_parts(&command.sync);
        let details = to_json("command", &command.details)?;
        let processing = command
            .processing
            .as_ref()
            .map(|p| to_json("command", p))
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO commands (
                id, country_code, party_id, platform_id, ref_id, last_updated, last_sent,
                cmd, status, origin, deadline, auth_ref, details, processing
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                country_code = EXCLUDED.country_code,
                party_id = EXCLUDED.party_id,
                platform_id = EXCLUDED.platform_id,
                ref_id = EXCLUDED.ref_id,
                last_updated = EXCLUDED.last_updated,
                last_sent = EXCLUDED.last_sent,
                cmd = EXCLUDED.cmd,
                status = EXCLUDED.status,
                origin = EXCLUDED.origin,
                deadline = EXCLUDED.deadline,
                auth_ref = EXCLUDED.auth_ref,
                details = EXCLUDED.details,
                processing = EXCLUDED.processing
            "#,
        )
        .bind(&command.id)
        .bind(country_code)
        .bind(party_id)
        .bind(command.sync.platform_id)
        .bind(&command.sync.ref_id)
        .bind(command.sync.last_updated)
        .bind(command.sync.last_sent)
        .bind(command.cmd.as_str())
        .bind(command.status.as_str())
        .bind(command.origin.as_str())
        .bind(command.deadline)
        .bind(&command.auth_ref)
        .bind(details)
        .bind(processing)
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "command"))?;
        Ok(())
    }

    async fn search_commands(
        &self,
        criteria: &CommandCriteria,
    ) -> Result<Vec<Command>, HubError> {
        let mut builder = QueryBuilder::new("SELECT * FROM commands WHERE TRUE");
        if let Some(reservation_id) = &criteria.reservation_id {
            builder
                .push(" AND cmd = 'RESERVE_NOW' AND details->>'reservation_id' = ")
                .push_bind(reservation_id);
        }
        if let Some(exclude_id) = &criteria.exclude_id {
            builder.push(" AND id <> ").push_bind(exclude_id);
        }
        if let Some(origin) = criteria.origin {
            builder.push(" AND origin = ").push_bind(origin.as_str());
        }
        if criteria.pending_only {
            builder.push(" AND status IN ('created', 'accepted')");
        }
        if let Some(before) = criteria.deadline_before {
            builder
                .push(" AND deadline IS NOT NULL AND deadline < ")
                .push_bind(before);
        }
        builder.push(" ORDER BY id");
        if let Some(limit) = criteria.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Search, "command"))?;
        rows.iter().map(command_from_row).collect()
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, HubError> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "webhook"))?;
        Ok(row.as_ref().map(webhook_from_row))
    }

    async fn upsert_webhook(&self, webhook: &Webhook) -> Result<(), HubError> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, api_key, events, url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                api_key = EXCLUDED.api_key,
                events = EXCLUDED.events,
                url = EXCLUDED.url
            "#,
        )
        .bind(&webhook.id)
        .bind(&webhook.api_key)
        .bind(&webhook.events)
        .bind(&webhook.url)
        .execute(&self.pool)
        .await
        .map_err(storage_err(StorageOp::Merge, "webhook"))?;
        Ok(())
    }

    async fn delete_webhook(&self, id: &str) -> Result<(), HubError> {
        sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Delete, "webhook"))?;
        Ok(())
    }

    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, HubError> {
        let rows = sqlx::query("SELECT * FROM webhooks WHERE $1 = ANY(events) ORDER BY id")
            .bind(event)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Search, "webhook"))?;
        Ok(rows.iter().map(webhook_from_row).collect())
    }

    async fn insert_log_batch(&self, batch: &[LogMessage]) -> Result<(), HubError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut builder = QueryBuilder::new(
            "INSERT INTO log_messages (
                id, event, request_id, correlation_id, from_platform, to_platform,
                request_body, response_body, status, ocpi_status, err, duration_ms,
                incoming, created_at
            ) ",
        );
        builder.push_values(batch, |mut b, message| {
            b.push_bind(message.id)
                .push_bind(&message.event)
                .push_bind(&message.request_id)
                .push_bind(&message.correlation_id)
                .push_bind(message.from_platform)
                .push_bind(message.to_platform)
                .push_bind(&message.request_body)
                .push_bind(&message.response_body)
                .push_bind(message.status)
                .push_bind(message.ocpi_status)
                .push_bind(&message.err)
                .push_bind(message.duration_ms)
                .push_bind(message.incoming)
                .push_bind(message.created_at);
        });
        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Create, "log_message"))?;
        Ok(())
    }
}

impl PgHubStore {
    /// Load EVSEs (with connectors) for a set of locations, ordered by uid.
    async fn load_evses(&self, location_ids: &[String]) -> Result<Vec<Evse>, HubError> {
        let rows = sqlx::query("SELECT * FROM evses WHERE location_id = ANY($1) ORDER BY uid")
            .bind(location_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err(StorageOp::Get, "evse"))?;
        let mut evses = rows
            .iter()
            .map(evse_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        if evses.is_empty() {
            return Ok(evses);
        }
        let rows =
            sqlx::query("SELECT * FROM connectors WHERE location_id = ANY($1) ORDER BY id")
                .bind(location_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err(StorageOp::Get, "connector"))?;
        let connectors = rows
            .iter()
            .map(connector_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        for evse in &mut evses {
            evse.connectors = connectors
                .iter()
                .filter(|c| c.location_id == evse.location_id && c.evse_uid == evse.uid)
                .cloned()
                .collect();
        }
        Ok(evses)
    }
}
