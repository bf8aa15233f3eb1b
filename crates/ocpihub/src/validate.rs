//! Structural validation run by the merge coordinator before a persist.
//!
//! Business-rule validation (country/currency/timezone lookups and the
//! like) lives with the transport layer; the checks here are the ones the
//! sync engine itself depends on: required identifiers, required enum
//! fields and command payload completeness.

use crate::error::HubError;
use crate::model::{
    Cdr, Command, CommandDetails, Connector, Evse, Location, Party, Session, Tariff, Token,
    Webhook,
};
use crate::sync::Syncable;

pub trait Validate {
    fn validate(&self) -> Result<(), HubError>;
}

fn required(entity: &'static str, field: &'static str, value: &str) -> Result<(), HubError> {
    if value.is_empty() {
        return Err(HubError::validation(entity, field, "must not be empty"));
    }
    Ok(())
}

impl Validate for Location {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        required(Self::ENTITY, "address", &self.address)?;
        required(Self::ENTITY, "city", &self.city)?;
        required(Self::ENTITY, "country", &self.country)?;
        for evse in &self.evses {
            evse.validate()?;
        }
        Ok(())
    }
}

impl Validate for Evse {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "uid", &self.uid)?;
        required(Self::ENTITY, "location_id", &self.location_id)?;
        if self.status.is_none() {
            return Err(HubError::validation(Self::ENTITY, "status", "is required"));
        }
        for connector in &self.connectors {
            connector.validate()?;
        }
        Ok(())
    }
}

impl Validate for Connector {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        required(Self::ENTITY, "evse_uid", &self.evse_uid)?;
        required(Self::ENTITY, "location_id", &self.location_id)?;
        if self.standard.is_none() {
            return Err(HubError::validation(Self::ENTITY, "standard", "is required"));
        }
        if self.format.is_none() {
            return Err(HubError::validation(Self::ENTITY, "format", "is required"));
        }
        if self.power_type.is_none() {
            return Err(HubError::validation(
                Self::ENTITY,
                "power_type",
                "is required",
            ));
        }
        Ok(())
    }
}

impl Validate for Session {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        for period in &self.charging_periods {
            required(Self::ENTITY, "charging_periods.session_id", &period.session_id)?;
        }
        Ok(())
    }
}

impl Validate for Tariff {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        required(Self::ENTITY, "currency", &self.currency)
    }
}

impl Validate for Token {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "uid", &self.uid)?;
        required(Self::ENTITY, "contract_id", &self.contract_id)
    }
}

impl Validate for Cdr {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)
    }
}

impl Validate for Party {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        if self.roles.is_empty() {
            return Err(HubError::validation(Self::ENTITY, "roles", "must not be empty"));
        }
        Ok(())
    }
}

impl Validate for Command {
    fn validate(&self) -> Result<(), HubError> {
        required(Self::ENTITY, "id", &self.id)?;
        if self.details.kind() != self.cmd {
            return Err(HubError::validation(
                Self::ENTITY,
                "details",
                format!("payload is {} but cmd is {}", self.details.kind(), self.cmd),
            ));
        }
        match &self.details {
            CommandDetails::StartSession {
                location_id,
                evse_uid,
                connector_id,
                token_uid,
            } => {
                required(Self::ENTITY, "details.location_id", location_id)?;
                required(Self::ENTITY, "details.evse_uid", evse_uid)?;
                required(Self::ENTITY, "details.connector_id", connector_id)?;
                required(Self::ENTITY, "details.token_uid", token_uid)?;
            }
            CommandDetails::StopSession { session_id } => {
                required(Self::ENTITY, "details.session_id", session_id)?;
            }
            CommandDetails::ReserveNow {
                reservation_id,
                location_id,
                token_uid,
                ..
            } => {
                required(Self::ENTITY, "details.reservation_id", reservation_id)?;
                required(Self::ENTITY, "details.location_id", location_id)?;
                required(Self::ENTITY, "details.token_uid", token_uid)?;
            }
            CommandDetails::CancelReservation { reservation_id } => {
                required(Self::ENTITY, "details.reservation_id", reservation_id)?;
            }
            CommandDetails::UnlockConnector {
                location_id,
                evse_uid,
                connector_id,
            } => {
                required(Self::ENTITY, "details.location_id", location_id)?;
                required(Self::ENTITY, "details.evse_uid", evse_uid)?;
                required(Self::ENTITY, "details.connector_id", connector_id)?;
            }
        }
        Ok(())
    }
}

impl Validate for Webhook {
    fn validate(&self) -> Result<(), HubError> {
        required("webhook", "id", &self.id)?;
        required("webhook", "url", &self.url)?;
        required("webhook", "api_key", &self.api_key)?;
        if self.events.is_empty() {
            return Err(HubError::validation("webhook", "events", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandKind;

    #[test]
    fn command_payload_must_match_kind() {
        let cmd = Command {
            id: "c1".into(),
            sync: Default::default(),
            cmd: CommandKind::StopSession,
            status: Default::default(),
            origin: Default::default(),
            deadline: None,
            auth_ref: None,
            details: CommandDetails::CancelReservation {
                reservation_id: "r1".into(),
            },
            processing: None,
        };
        assert!(matches!(
            cmd.validate(),
            Err(HubError::Validation { field: "details", .. })
        ));
    }

    #[test]
    fn reserve_requires_reservation_id() {
        let cmd = Command {
            id: "c1".into(),
            sync: Default::default(),
            cmd: CommandKind::ReserveNow,
            status: Default::default(),
            origin: Default::default(),
            deadline: None,
            auth_ref: None,
            details: CommandDetails::ReserveNow {
                reservation_id: String::new(),
                location_id: "loc1".into(),
                evse_uid: None,
                token_uid: "tok1".into(),
                expiry_date: None,
            },
            processing: None,
        };
        assert!(cmd.validate().is_err());
    }
}
