//! Charge Detail Records, the settlement record for a completed session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::{SyncHeader, Syncable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cdr {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub start_date_time: Option<DateTime<Utc>>,
    pub stop_date_time: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub auth_ref: Option<String>,
    pub currency: Option<String>,
    pub total_cost: Option<f64>,
    pub total_energy: Option<f64>,
    pub total_time: Option<f64>,
}

impl Cdr {
    pub fn merge_from(&mut self, patch: &Cdr) {
        self.sync.merge_from(&patch.sync);
        if patch.start_date_time.is_some() {
            self.start_date_time = patch.start_date_time;
        }
        if patch.stop_date_time.is_some() {
            self.stop_date_time = patch.stop_date_time;
        }
        if patch.session_id.is_some() {
            self.session_id = patch.session_id.clone();
        }
        if patch.auth_ref.is_some() {
            self.auth_ref = patch.auth_ref.clone();
        }
        if patch.currency.is_some() {
            self.currency = patch.currency.clone();
        }
        if patch.total_cost.is_some() {
            self.total_cost = patch.total_cost;
        }
        if patch.total_energy.is_some() {
            self.total_energy = patch.total_energy;
        }
        if patch.total_time.is_some() {
            self.total_time = patch.total_time;
        }
    }
}

impl Syncable for Cdr {
    const ENTITY: &'static str = "cdr";

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
