//! Location → EVSE → Connector hierarchy.
//!
//! Child ids are unique only within their parent's scope: an EVSE uid is
//! scoped to its location, a connector id to its EVSE.

use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum EvseStatus {
        Available => "AVAILABLE",
        Blocked => "BLOCKED",
        Charging => "CHARGING",
        Inoperative => "INOPERATIVE",
        OutOfOrder => "OUTOFORDER",
        Planned => "PLANNED",
        Removed => "REMOVED",
        Reserved => "RESERVED",
        Unknown => "UNKNOWN",
    }
}

text_enum! {
    pub enum ConnectorStandard {
        Chademo => "CHADEMO",
        IecT1 => "IEC_62196_T1",
        IecT2 => "IEC_62196_T2",
        IecT2Combo => "IEC_62196_T2_COMBO",
        DomesticF => "DOMESTIC_F",
        TeslaS => "TESLA_S",
    }
}

text_enum! {
    pub enum ConnectorFormat {
        Socket => "SOCKET",
        Cable => "CABLE",
    }
}

text_enum! {
    pub enum PowerType {
        Ac1Phase => "AC_1_PHASE",
        Ac3Phase => "AC_3_PHASE",
        Dc => "DC",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: String,
    pub longitude: String,
}

/// A charging site owned by a party.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub name: Option<String>,
    pub address: String,
    pub city: String,
    pub country: String,
    pub coordinates: Option<GeoLocation>,
    pub time_zone: Option<String>,
    #[serde(default)]
    pub evses: Vec<Evse>,
}

impl Location {
    /// Apply the non-empty fields of a PATCH. Children are rejected before
    /// this runs; the patch never carries them here.
    pub fn merge_from(&mut self, patch: &Location) {
        self.sync.merge_from(&patch.sync);
        if patch.name.is_some() {
            self.name = patch.name.clone();
        }
        if !patch.address.is_empty() {
            self.address = patch.address.clone();
        }
        if !patch.city.is_empty() {
            self.city = patch.city.clone();
        }
        if !patch.country.is_empty() {
            self.country = patch.country.clone();
        }
        if patch.coordinates.is_some() {
            self.coordinates = patch.coordinates.clone();
        }
        if patch.time_zone.is_some() {
            self.time_zone = patch.time_zone.clone();
        }
    }

    /// Stamp owned EVSEs (and their connectors) with this location's
    /// identity and clock, as part of a wholesale replace.
    pub fn propagate_to_children(&mut self) {
        let id = self.id.clone();
        let sync = self.sync.clone();
        for evse in &mut self.evses {
            evse.location_id = id.clone();
            evse.sync.inherit_from(&sync);
            evse.propagate_to_children();
        }
    }
}

impl Syncable for Location {
    const ENTITY: &'static str = "location";

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

/// A charging point within a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evse {
    pub uid: String,
    /// Owning location. Set by the hub when the EVSE arrives nested in a
    /// location PUT; mandatory when addressed standalone.
    #[serde(default)]
    pub location_id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub status: Option<EvseStatus>,
    pub floor_level: Option<String>,
    pub physical_reference: Option<String>,
    #[serde(default)]
    pub connectors: Vec<Connector>,
}

impl Evse {
    pub fn merge_from(&mut self, patch: &Evse) {
        self.sync.merge_from(&patch.sync);
        if patch.status.is_some() {
            self.status = patch.status;
        }
        if patch.floor_level.is_some() {
            self.floor_level = patch.floor_level.clone();
        }
        if patch.physical_reference.is_some() {
            self.physical_reference = patch.physical_reference.clone();
        }
    }

    pub fn propagate_to_children(&mut self) {
        let uid = self.uid.clone();
        let location_id = self.location_id.clone();
        let sync = self.sync.clone();
        for connector in &mut self.connectors {
            connector.evse_uid = uid.clone();
            connector.location_id = location_id.clone();
            connector.sync.inherit_from(&sync);
        }
    }
}

impl Syncable for Evse {
    const ENTITY: &'static str = "evse";

    fn primary_id(&self) -> &str {
        &self.uid
    }

    fn sync(&self) -> &SyncHeader {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut SyncHeader {
        &mut self.sync
    }
}

/// A socket or cable on an EVSE.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    #[serde(default)]
    pub evse_uid: String,
    #[serde(default)]
    pub location_id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub standard: Option<ConnectorStandard>,
    pub format: Option<ConnectorFormat>,
    pub power_type: Option<PowerType>,
    pub max_voltage: Option<i32>,
    pub max_amperage: Option<i32>,
    #[serde(default)]
    pub tariff_ids: Vec<String>,
}

impl Connector {
    pub fn merge_from(&mut self, patch: &Connector) {
        self.sync.merge_from(&patch.sync);
        if patch.standard.is_some() {
            self.standard = patch.standard;
        }
        if patch.format.is_some() {
            self.format = patch.format;
        }
        if patch.power_type.is_some() {
            self.power_type = patch.power_type;
        }
        if patch.max_voltage.is_some() {
            self.max_voltage = patch.max_voltage;
        }
        if patch.max_amperage.is_some() {
            self.max_amperage = patch.max_amperage;
        }
        if !patch.tariff_ids.is_empty() {
            self.tariff_ids = patch.tariff_ids.clone();
        }
    }
}

impl Syncable for Connector {
    const ENTITY: &'static str = "connector";

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
