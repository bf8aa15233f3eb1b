//! Shared synchronization header and the optimistic timestamp protocol.
//!
//! Every entity exchanged between platforms embeds a [`SyncHeader`]. The
//! header's `last_updated` value is the protocol clock: an incoming update is
//! accepted only when its clock is not strictly older than the stored one.
//! Equal clocks re-apply (idempotent retry); older clocks are silently
//! dropped by the merge coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OCPI external identity of the party that owns a record.
///
/// Immutable once assigned; the merge path only ever back-fills it from the
/// stored record when the incoming update left it blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtId {
    pub country_code: String,
    pub party_id: String,
}

impl ExtId {
    pub fn new(country_code: impl Into<String>, party_id: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            party_id: party_id.into(),
        }
    }
}

impl std::fmt::Display for ExtId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}*{}", self.country_code, self.party_id)
    }
}

/// Synchronization metadata embedded in every replicated entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncHeader {
    /// Owning party. Back-filled from storage when absent on an update.
    pub ext_id: Option<ExtId>,
    /// Platform that produced the record.
    pub platform_id: Option<Uuid>,
    /// Caller-assigned correlation handle. Never cleared by an absent
    /// incoming value.
    pub ref_id: Option<String>,
    /// Protocol clock used for conflict resolution. Mandatory on PATCH;
    /// never defaulted by the hub.
    pub last_updated: Option<DateTime<Utc>>,
    /// Last successful onward propagation. Preserved across merges; the
    /// merge path itself never sets it.
    pub last_sent: Option<DateTime<Utc>>,
}

impl SyncHeader {
    /// True when `self` carries a clock strictly older than `stored`.
    ///
    /// Missing clocks never count as stale: a PUT without a clock replaces,
    /// and a PATCH without one is rejected before this check runs.
    pub fn is_stale_against(&self, stored: &SyncHeader) -> bool {
        match (self.last_updated, stored.last_updated) {
            (Some(incoming), Some(current)) => incoming < current,
            _ => false,
        }
    }

    /// Fill blanks on an incoming header from the stored one.
    ///
    /// Applied on PUT after the staleness check: identity and correlation
    /// fields survive a full replace that did not restate them.
    pub fn backfill_from(&mut self, stored: &SyncHeader) {
        if self.last_sent.is_none() {
            self.last_sent = stored.last_sent;
        }
        if self.platform_id.is_none() {
            self.platform_id = stored.platform_id;
        }
        if self.ref_id.is_none() {
            self.ref_id = stored.ref_id.clone();
        }
        if self.ext_id.is_none() {
            self.ext_id = stored.ext_id.clone();
        }
    }

    /// Apply the non-empty header fields of a PATCH onto the stored header.
    ///
    /// `last_updated` is always taken from the patch (the staleness check has
    /// already passed). `last_sent` is deliberately untouched. `ext_id` is
    /// immutable once assigned: a patch can only fill a blank one.
    pub fn merge_from(&mut self, patch: &SyncHeader) {
        if self.ext_id.is_none() {
            self.ext_id = patch.ext_id.clone();
        }
        if patch.platform_id.is_some() {
            self.platform_id = patch.platform_id;
        }
        if patch.ref_id.is_some() {
            self.ref_id = patch.ref_id.clone();
        }
        self.last_updated = patch.last_updated;
    }

    /// Propagate parent identity and clock onto a child during a wholesale
    /// parent replace.
    pub fn inherit_from(&mut self, parent: &SyncHeader) {
        self.ext_id = parent.ext_id.clone();
        self.platform_id = parent.platform_id;
        self.last_updated = parent.last_updated;
    }
}

/// Implemented by every entity that flows through the merge coordinator.
pub trait Syncable {
    /// Entity name used in errors and log fields.
    const ENTITY: &'static str;

    /// Primary identifier within the entity's own scope.
    fn primary_id(&self) -> &str;

    fn sync(&self) -> &SyncHeader;

    fn sync_mut(&mut self) -> &mut SyncHeader;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn equal_clocks_are_not_stale() {
        let incoming = SyncHeader {
            last_updated: at(100),
            ..Default::default()
        };
        let stored = SyncHeader {
            last_updated: at(100),
            ..Default::default()
        };
        assert!(!incoming.is_stale_against(&stored));
    }

    #[test]
    fn older_clock_is_stale() {
        let incoming = SyncHeader {
            last_updated: at(99),
            ..Default::default()
        };
        let stored = SyncHeader {
            last_updated: at(100),
            ..Default::default()
        };
        assert!(incoming.is_stale_against(&stored));
    }

    #[test]
    fn missing_clock_never_counts_as_stale() {
        let incoming = SyncHeader::default();
        let stored = SyncHeader {
            last_updated: at(100),
            ..Default::default()
        };
        assert!(!incoming.is_stale_against(&stored));
    }

    #[test]
    fn backfill_keeps_incoming_values() {
        let mut incoming = SyncHeader {
            ref_id: Some("mine".into()),
            ..Default::default()
        };
        let stored = SyncHeader {
            ext_id: Some(ExtId::new("DE", "ABC")),
            ref_id: Some("theirs".into()),
            last_sent: at(50),
            ..Default::default()
        };
        incoming.backfill_from(&stored);
        assert_eq!(incoming.ref_id.as_deref(), Some("mine"));
        assert_eq!(incoming.ext_id, Some(ExtId::new("DE", "ABC")));
        assert_eq!(incoming.last_sent, at(50));
    }

    #[test]
    fn merge_cannot_reassign_ext_id() {
        let mut stored = SyncHeader {
            ext_id: Some(ExtId::new("DE", "ABC")),
            last_updated: at(60),
            ..Default::default()
        };
        let patch = SyncHeader {
            ext_id: Some(ExtId::new("FR", "XYZ")),
            last_updated: at(70),
            ..Default::default()
        };
        stored.merge_from(&patch);
        assert_eq!(stored.ext_id, Some(ExtId::new("DE", "ABC")));
    }

    #[test]
    fn merge_fills_a_blank_ext_id() {
        let mut stored = SyncHeader {
            last_updated: at(60),
            ..Default::default()
        };
        let patch = SyncHeader {
            ext_id: Some(ExtId::new("DE", "ABC")),
            last_updated: at(70),
            ..Default::default()
        };
        stored.merge_from(&patch);
        assert_eq!(stored.ext_id, Some(ExtId::new("DE", "ABC")));
    }

    #[test]
    fn merge_never_touches_last_sent() {
        let mut stored = SyncHeader {
            last_sent: at(50),
            last_updated: at(60),
            ..Default::default()
        };
        let patch = SyncHeader {
            last_sent: at(999),
            last_updated: at(70),
            ..Default::default()
        };
        stored.merge_from(&patch);
        assert_eq!(stored.last_sent, at(50));
        assert_eq!(stored.last_updated, at(70));
    }
}
