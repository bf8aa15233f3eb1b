//! Request/response audit log entries.
//!
//! Write-once: log messages are batch-inserted by the audit writer and
//! never updated or merged. They are keyed for search only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub id: Uuid,
    pub event: String,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub from_platform: Option<Uuid>,
    pub to_platform: Option<Uuid>,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
    pub status: Option<i32>,
    pub ocpi_status: Option<i32>,
    pub err: Option<String>,
    pub duration_ms: Option<i64>,
    pub incoming: bool,
    pub created_at: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            request_id: None,
            correlation_id: None,
            from_platform: None,
            to_platform: None,
            request_body: None,
            response_body: None,
            status: None,
            ocpi_status: None,
            err: None,
            duration_ms: None,
            incoming: false,
            created_at: Utc::now(),
        }
    }
}
