#![warn(missing_docs)]

//! nodelink session layer
//!
//! Outbound: payload → envelope (JSON/CBOR) → sealed frame → [`Transport`]
//! Inbound:  bytes → [`RxDispatcher`] → frame open + replay check → envelope →
//!           command authentication → bounded queue → [`CommandExecutor`]
//!
//! Every session owns its own counters, watermarks and nonce history.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod session;
pub mod transport;

pub use config::{CommandAuthSettings, NodeConfig, NodeRole, SecuritySettings};
pub use dispatch::{DeliveryOutcome, DispatchStats, RxDispatcher};
pub use error::{Result, SessionError};
pub use executor::{ActuatorError, CommandExecutor, DeviceActuator, SimulatedBoard};
pub use session::{Inbound, Session};
pub use transport::{ChannelTransport, RecordingTransport, Transport};
