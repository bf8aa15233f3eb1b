//! Authorization tokens issued by eMSPs.

use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum TokenType {
        AdHocUser => "AD_HOC_USER",
        AppUser => "APP_USER",
        Rfid => "RFID",
        Other => "OTHER",
    }
}

text_enum! {
    pub enum WhitelistType {
        Always => "ALWAYS",
        Allowed => "ALLOWED",
        AllowedOffline => "ALLOWED_OFFLINE",
        Never => "NEVER",
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub uid: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    #[serde(rename = "type")]
    pub token_type: Option<TokenType>,
    pub contract_id: String,
    pub visual_number: Option<String>,
    pub issuer: Option<String>,
    pub valid: Option<bool>,
    pub whitelist: Option<WhitelistType>,
}

impl Token {
    pub fn merge_from(&mut self, patch: &Token) {
        self.sync.merge_from(&patch.sync);
        if patch.token_type.is_some() {
            self.token_type = patch.token_type;
        }
        if !patch.contract_id.is_empty() {
            self.contract_id = patch.contract_id.clone();
        }
        if patch.visual_number.is_some() {
            self.visual_number = patch.visual_number.clone();
        }
        if patch.issuer.is_some() {
            self.issuer = patch.issuer.clone();
        }
        if patch.valid.is_some() {
            self.valid = patch.valid;
        }
        if patch.whitelist.is_some() {
            self.whitelist = patch.whitelist;
        }
    }
}

impl Syncable for Token {
    const ENTITY: &'static str = "token";

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
