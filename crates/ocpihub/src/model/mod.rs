//! OCPI domain entities synchronized between platforms.
//!
//! Every entity embeds a [`crate::sync::SyncHeader`] and implements
//! [`crate::sync::Syncable`]. Enumerations are closed: membership is decided
//! at the type level, never by a runtime table.

mod cdr;
mod command;
mod location;
mod log;
mod party;
mod session;
mod tariff;
mod token;
mod webhook;

pub use cdr::Cdr;
pub use command::{
    Command, CommandDetails, CommandKind, CommandOrigin, CommandStatus, Processing,
    ProcessingResult,
};
pub use location::{
    Connector, ConnectorFormat, ConnectorStandard, Evse, EvseStatus, GeoLocation, Location,
    PowerType,
};
pub use log::LogMessage;
pub use party::{Party, PartyStatus, Role};
pub use session::{CdrDimension, ChargingPeriod, Session, SessionStatus};
pub use tariff::{PriceComponent, Tariff, TariffDimension, TariffElement};
pub use token::{Token, TokenType, WhitelistType};
pub use webhook::Webhook;

/// Closed text enumeration with OCPI wire names.
///
/// Generates serde renames, `as_str`, `FromStr` and `Display` so the same
/// names serve the JSON wire format and text storage columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other}", stringify!($name))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;
