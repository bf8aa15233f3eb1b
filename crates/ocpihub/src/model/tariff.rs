//! Charging tariffs.

use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum TariffDimension {
        Energy => "ENERGY",
        Flat => "FLAT",
        ParkingTime => "PARKING_TIME",
        Time => "TIME",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceComponent {
    #[serde(rename = "type")]
    pub component_type: TariffDimension,
    pub price: f64,
    pub step_size: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffElement {
    pub price_components: Vec<PriceComponent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub currency: String,
    pub tariff_alt_url: Option<String>,
    #[serde(default)]
    pub elements: Vec<TariffElement>,
}

impl Tariff {
    pub fn merge_from(&mut self, patch: &Tariff) {
        self.sync.merge_from(&patch.sync);
        if !patch.currency.is_empty() {
            self.currency = patch.currency.clone();
        }
        if patch.tariff_alt_url.is_some() {
            self.tariff_alt_url = patch.tariff_alt_url.clone();
        }
        if !patch.elements.is_empty() {
            self.elements = patch.elements.clone();
        }
    }
}

impl Syncable for Tariff {
    const ENTITY: &'static str = "tariff";

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
