//! # Spacegate
//!
//! The gateway application: configuration, the bouquet-driven
//! tool-selection strategy, the per-request server factory, and the
//! built-in tool surface over the Hub API.
//!
//! The binary in `main.rs` wires these onto one of the three transports
//! from `spacegate-transport`.

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod factory;
pub mod hub_client;
pub mod selection;
pub mod settings;
pub mod tools;

pub use config::GatewayConfig;
pub use factory::GatewayServerFactory;
pub use hub_client::HubApiClient;
pub use selection::{select_tools, SelectionInput, SelectionMode, SelectionResult};
pub use settings::{SettingsProvider, UserSettings};
