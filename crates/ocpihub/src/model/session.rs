//! Charging sessions and their charging periods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tariff::TariffDimension;
use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum SessionStatus {
        Active => "ACTIVE",
        Completed => "COMPLETED",
        Invalid => "INVALID",
        Pending => "PENDING",
    }
}

/// Metered volume for one dimension within a charging period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdrDimension {
    #[serde(rename = "type")]
    pub dimension_type: TariffDimension,
    pub volume: f64,
}

/// One period of a session. Periods are unordered and always replaced as a
/// whole set; there is no positional append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingPeriod {
    #[serde(default)]
    pub session_id: String,
    pub start_date_time: DateTime<Utc>,
    #[serde(default)]
    pub dimensions: Vec<CdrDimension>,
}

/// A charging session reported by a CPO.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub kwh: Option<f64>,
    pub auth_ref: Option<String>,
    pub token_uid: Option<String>,
    pub location_id: Option<String>,
    pub evse_uid: Option<String>,
    pub connector_id: Option<String>,
    pub currency: Option<String>,
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub charging_periods: Vec<ChargingPeriod>,
}

impl Session {
    /// Apply the non-empty fields of a PATCH. A non-empty incoming period
    /// set replaces the stored set outright.
    pub fn merge_from(&mut self, patch: &Session) {
        self.sync.merge_from(&patch.sync);
        if patch.start_date_time.is_some() {
            self.start_date_time = patch.start_date_time;
        }
        if patch.end_date_time.is_some() {
            self.end_date_time = patch.end_date_time;
        }
        if patch.kwh.is_some() {
            self.kwh = patch.kwh;
        }
        if patch.auth_ref.is_some() {
            self.auth_ref = patch.auth_ref.clone();
        }
        if patch.token_uid.is_some() {
            self.token_uid = patch.token_uid.clone();
        }
        if patch.location_id.is_some() {
            self.location_id = patch.location_id.clone();
        }
        if patch.evse_uid.is_some() {
            self.evse_uid = patch.evse_uid.clone();
        }
        if patch.connector_id.is_some() {
            self.connector_id = patch.connector_id.clone();
        }
        if patch.currency.is_some() {
            self.currency = patch.currency.clone();
        }
        if patch.status.is_some() {
            self.status = patch.status;
        }
        if !patch.charging_periods.is_empty() {
            self.charging_periods = patch.charging_periods.clone();
            self.propagate_to_children();
        }
    }

    /// Stamp owned periods with this session's id.
    pub fn propagate_to_children(&mut self) {
        for period in &mut self.charging_periods {
            period.session_id = self.id.clone();
        }
    }
}

impl Syncable for Session {
    const ENTITY: &'static str = "session";

    fn primary_id(&self) -> &str {
        &self.id
    }

    fn sync(&self) -> &SyncHeader {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut SyncHeader {
        &mut self.sync
    }
}
