//! # hublink
//!
//! Wire codec, port model and connection supervision for wireless hub
//! vehicles (Duplo trains and relatives).
//!
//! hublink talks to a hub over a byte-oriented notify/write channel, keeps
//! track of which devices sit on which ports, and reconnects when the link
//! drops.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Application / CLI                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                   Connection Supervisor                         │
//! │   Disconnected → Scanning → Connecting → Connected → Draining   │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │       Command Dispatcher      │      Notification Router        │
//! │   (validate, encode, write)   │  (decode, port table, events)   │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │               Protocol Codec (frames and messages)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │            Transport (BLE characteristic / TCP bridge)          │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]        // UUIDs
#![allow(clippy::cast_possible_truncation)]  // Wire fields are narrower than host ints
#![allow(clippy::cast_sign_loss)]            // Signed speeds travel as raw bytes
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::ignored_unit_patterns)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod ports;
pub mod protocol;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bluetooth SIG company identifier carried in hub advertisements.
pub const LEGO_MANUFACTURER_ID: u16 = 0x0397;

/// GATT service exposing the hub characteristic.
pub const SERVICE_UUID: u128 = 0x00001623_1212_efde_1623_785feabcd123;

/// Characteristic carrying both notifications and writes.
pub const CHARACTERISTIC_UUID: u128 = 0x00001624_1212_efde_1623_785feabcd123;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, HubProfile};
    pub use crate::dispatcher::{CommandDispatcher, CommandHistory};
    pub use crate::error::{Error, Result};
    pub use crate::events::HubEvent;
    pub use crate::ports::PortTable;
    pub use crate::protocol::{decode, encode, Command, Message};
    pub use crate::router::{NotificationRouter, ResponseKey};
    pub use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};
    pub use crate::transport::{DeviceHandle, HubTransport, TransportConfig};
    pub use crate::types::*;
}
