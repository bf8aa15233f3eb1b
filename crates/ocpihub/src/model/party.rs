//! Platform parties (CPOs, eMSPs, hubs) known to this hub.

use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum Role {
        Cpo => "CPO",
        Emsp => "EMSP",
        Hub => "HUB",
        Nap => "NAP",
        Nsp => "NSP",
        Other => "OTHER",
    }
}

text_enum! {
    pub enum PartyStatus {
        Planned => "PLANNED",
        Active => "ACTIVE",
        Suspended => "SUSPENDED",
        Deleted => "DELETED",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub name: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    pub status: Option<PartyStatus>,
}

impl Party {
    pub fn merge_from(&mut self, patch: &Party) {
        self.sync.merge_from(&patch.sync);
        if patch.name.is_some() {
            self.name = patch.name.clone();
        }
        if patch.website.is_some() {
            self.website = patch.website.clone();
        }
        if !patch.roles.is_empty() {
            self.roles = patch.roles.clone();
        }
        if patch.status.is_some() {
            self.status = patch.status;
        }
    }
}

impl Syncable for Party {
    const ENTITY: &'static str = "party";

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
