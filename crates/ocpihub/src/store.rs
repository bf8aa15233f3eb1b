//! Storage seam consumed by the hub core.
//!
//! Implementations live in their own crates (`ocpihub-postgres` for
//! production, `ocpihub-testing` for tests). At the storage level `upsert`
//! means "insert or update all columns on conflict" — an idempotent write,
//! distinct from the coordinator's partial-field merge semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HubError;
use crate::model::{
    Cdr, ChargingPeriod, Command, CommandOrigin, Connector, Evse, Location, LogMessage, Party,
    Session, Tariff, Token, Webhook,
};
use crate::sync::ExtId;

/// Criteria for listing synchronized entities.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub ext_id: Option<ExtId>,
    pub updated_from: Option<DateTime<Utc>>,
    pub updated_to: Option<DateTime<Utc>>,
    /// Only records produced by one of these platforms.
    pub platform_in: Vec<Uuid>,
    /// Exclude records produced by one of these platforms.
    pub platform_not_in: Vec<Uuid>,
    pub ids: Vec<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

/// Criteria for command lookups: reservation-uniqueness checks and the
/// deadline sweep.
#[derive(Debug, Clone, Default)]
pub struct CommandCriteria {
    pub reservation_id: Option<String>,
    pub exclude_id: Option<String>,
    pub origin: Option<CommandOrigin>,
    pub pending_only: bool,
    pub deadline_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl CommandCriteria {
    pub fn by_reservation(reservation_id: impl Into<String>) -> Self {
        Self {
            reservation_id: Some(reservation_id.into()),
            ..Default::default()
        }
    }

    pub fn excluding(mut self, command_id: impl Into<String>) -> Self {
        self.exclude_id = Some(command_id.into());
        self
    }

    pub fn expired(origin: CommandOrigin, now: DateTime<Utc>) -> Self {
        Self {
            origin: Some(origin),
            pending_only: true,
            deadline_before: Some(now),
            ..Default::default()
        }
    }
}

/// Unit of work for composite writes.
///
/// All row writes issued through one `HubTx` commit or roll back together;
/// a reader never observes a location with some but not all of its EVSEs.
#[async_trait]
pub trait HubTx: Send {
    /// Location row only; children are written through their own calls.
    async fn upsert_location(&mut self, location: &Location) -> Result<(), HubError>;

    async fn upsert_evse(&mut self, evse: &Evse) -> Result<(), HubError>;

    async fn upsert_connector(&mut self, connector: &Connector) -> Result<(), HubError>;

    /// Session row only.
    async fn upsert_session(&mut self, session: &Session) -> Result<(), HubError>;

    /// Replace the full charging-period set of a session.
    async fn replace_charging_periods(
        &mut self,
        session_id: &str,
        periods: &[ChargingPeriod],
    ) -> Result<(), HubError>;

    async fn commit(self: Box<Self>) -> Result<(), HubError>;

    async fn rollback(self: Box<Self>) -> Result<(), HubError>;
}

/// Per-entity storage operations. Safe for concurrent use.
#[async_trait]
pub trait HubStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn HubTx>, HubError>;

    // Locations (loaded with children)
    async fn get_location(&self, id: &str) -> Result<Option<Location>, HubError>;
    async fn delete_location(&self, id: &str) -> Result<(), HubError>;
    async fn search_locations(&self, criteria: &SearchCriteria)
        -> Result<Vec<Location>, HubError>;

    async fn get_evse(&self, location_id: &str, uid: &str) -> Result<Option<Evse>, HubError>;
    async fn get_connector(
        &self,
        location_id: &str,
        evse_uid: &str,
        id: &str,
    ) -> Result<Option<Connector>, HubError>;

    // Sessions (loaded with charging periods)
    async fn get_session(&self, id: &str) -> Result<Option<Session>, HubError>;
    async fn delete_session(&self, id: &str) -> Result<(), HubError>;
    async fn search_sessions(&self, criteria: &SearchCriteria) -> Result<Vec<Session>, HubError>;

    // Tariffs
    async fn get_tariff(&self, id: &str) -> Result<Option<Tariff>, HubError>;
    async fn upsert_tariff(&self, tariff: &Tariff) -> Result<(), HubError>;
    async fn delete_tariff(&self, id: &str) -> Result<(), HubError>;

    // Tokens
    async fn get_token(&self, uid: &str) -> Result<Option<Token>, HubError>;
    async fn upsert_token(&self, token: &Token) -> Result<(), HubError>;
    async fn delete_token(&self, uid: &str) -> Result<(), HubError>;

    // CDRs
    async fn get_cdr(&self, id: &str) -> Result<Option<Cdr>, HubError>;
    async fn upsert_cdr(&self, cdr: &Cdr) -> Result<(), HubError>;

    // Parties
    async fn get_party(&self, id: &str) -> Result<Option<Party>, HubError>;
    async fn upsert_party(&self, party: &Party) -> Result<(), HubError>;
    async fn search_parties(&self, criteria: &SearchCriteria) -> Result<Vec<Party>, HubError>;

    // Commands
    async fn get_command(&self, id: &str) -> Result<Option<Command>, HubError>;
    async fn upsert_command(&self, command: &Command) -> Result<(), HubError>;
    async fn search_commands(&self, criteria: &CommandCriteria)
        -> Result<Vec<Command>, HubError>;

    // Webhooks
    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>, HubError>;
    async fn upsert_webhook(&self, webhook: &Webhook) -> Result<(), HubError>;
    async fn delete_webhook(&self, id: &str) -> Result<(), HubError>;
    async fn webhooks_for_event(&self, event: &str) -> Result<Vec<Webhook>, HubError>;

    // Audit log (write-once, batched)
    async fn insert_log_batch(&self, batch: &[LogMessage]) -> Result<(), HubError>;
}
