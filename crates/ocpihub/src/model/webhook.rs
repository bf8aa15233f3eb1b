//! Webhook subscriber registrations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub api_key: String,
    /// Event names this endpoint subscribes to. Exact membership, no
    /// pattern matching.
    pub events: Vec<String>,
    pub url: String,
}

impl Webhook {
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}
