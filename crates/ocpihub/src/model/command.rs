//! Asynchronous roaming commands and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::text_enum;
use crate::sync::{SyncHeader, Syncable};

text_enum! {
    pub enum CommandKind {
        StartSession => "START_SESSION",
        StopSession => "STOP_SESSION",
        ReserveNow => "RESERVE_NOW",
        CancelReservation => "CANCEL_RESERVATION",
        UnlockConnector => "UNLOCK_CONNECTOR",
    }
}

text_enum! {
    pub enum CommandStatus {
        Created => "created",
        Accepted => "accepted",
        Rejected => "rejected",
        ProcessedOk => "processed_ok",
        ProcessedRejected => "processed_rejected",
        ProcessedFailed => "processed_failed",
        ProcessedExpired => "processed_expired",
    }
}

impl CommandStatus {
    /// Request-level acceptance can still be followed by a processing
    /// result; everything after that is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::ProcessedOk
                | CommandStatus::ProcessedRejected
                | CommandStatus::ProcessedFailed
                | CommandStatus::ProcessedExpired
        )
    }

    /// Pending commands are the ones the deadline sweep looks at.
    pub fn is_pending(&self) -> bool {
        matches!(self, CommandStatus::Created | CommandStatus::Accepted)
    }
}

impl Default for CommandStatus {
    fn default() -> Self {
        CommandStatus::Created
    }
}

text_enum! {
    pub enum CommandOrigin {
        Local => "local",
        Remote => "remote",
    }
}

impl Default for CommandOrigin {
    fn default() -> Self {
        CommandOrigin::Local
    }
}

text_enum! {
    pub enum ProcessingResult {
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
        Timeout => "TIMEOUT",
        Failed => "FAILED",
        EvseOccupied => "EVSE_OCCUPIED",
        EvseInoperative => "EVSE_INOPERATIVE",
        NotSupported => "NOT_SUPPORTED",
        UnknownReservation => "UNKNOWN_RESERVATION",
    }
}

impl ProcessingResult {
    /// Fixed result → outer-status table applied when a response callback
    /// carries a processing result.
    pub fn derived_status(&self) -> CommandStatus {
        match self {
            ProcessingResult::Accepted => CommandStatus::ProcessedOk,
            ProcessingResult::Rejected => CommandStatus::ProcessedRejected,
            ProcessingResult::Timeout
            | ProcessingResult::Failed
            | ProcessingResult::EvseOccupied
            | ProcessingResult::EvseInoperative
            | ProcessingResult::NotSupported
            | ProcessingResult::UnknownReservation => CommandStatus::ProcessedFailed,
        }
    }
}

/// Terminal processing result reported by the executing platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processing {
    pub status: Option<ProcessingResult>,
    pub message: Option<String>,
}

/// Typed payload, one variant per command kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandDetails {
    #[serde(rename = "START_SESSION")]
    StartSession {
        location_id: String,
        evse_uid: String,
        connector_id: String,
        token_uid: String,
    },
    #[serde(rename = "STOP_SESSION")]
    StopSession { session_id: String },
    #[serde(rename = "RESERVE_NOW")]
    ReserveNow {
        reservation_id: String,
        location_id: String,
        evse_uid: Option<String>,
        token_uid: String,
        expiry_date: Option<DateTime<Utc>>,
    },
    #[serde(rename = "CANCEL_RESERVATION")]
    CancelReservation { reservation_id: String },
    #[serde(rename = "UNLOCK_CONNECTOR")]
    UnlockConnector {
        location_id: String,
        evse_uid: String,
        connector_id: String,
    },
}

impl CommandDetails {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandDetails::StartSession { .. } => CommandKind::StartSession,
            CommandDetails::StopSession { .. } => CommandKind::StopSession,
            CommandDetails::ReserveNow { .. } => CommandKind::ReserveNow,
            CommandDetails::CancelReservation { .. } => CommandKind::CancelReservation,
            CommandDetails::UnlockConnector { .. } => CommandKind::UnlockConnector,
        }
    }
}

/// An asynchronous command relayed between platforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(flatten)]
    pub sync: SyncHeader,
    pub cmd: CommandKind,
    #[serde(default)]
    pub status: CommandStatus,
    #[serde(default)]
    pub origin: CommandOrigin,
    pub deadline: Option<DateTime<Utc>>,
    pub auth_ref: Option<String>,
    pub details: CommandDetails,
    pub processing: Option<Processing>,
}

impl Command {
    /// Reservation id claimed by this command, when it is a reservation.
    pub fn reservation_id(&self) -> Option<&str> {
        match &self.details {
            CommandDetails::ReserveNow { reservation_id, .. } => Some(reservation_id),
            _ => None,
        }
    }

    /// Apply the non-empty fields of a response callback.
    ///
    /// `created` is the zero value of the status field and is never
    /// re-applied onto a stored command.
    pub fn merge_from(&mut self, patch: &Command) {
        self.sync.merge_from(&patch.sync);
        if patch.status != CommandStatus::Created {
            self.status = patch.status;
        }
        if patch.deadline.is_some() {
            self.deadline = patch.deadline;
        }
        if patch.auth_ref.is_some() {
            self.auth_ref = patch.auth_ref.clone();
        }
        if patch.processing.is_some() {
            self.processing = patch.processing.clone();
        }
    }
}

impl Syncable for Command {
    const ENTITY: &'static str = "command";

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
