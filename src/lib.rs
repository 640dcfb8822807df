//! CEC MQTT Bridge
//!
//! Exposes an HDMI-CEC bus over MQTT for home automation.
//!
//! This library provides:
//! - CEC frame codec and bus vocabulary (`cec`)
//! - Device state tracking from bus traffic and adapter logs
//! - Volume convergence over relative key presses
//! - Bus enumeration (scan) and periodic refresh
//! - A `cec-client` subprocess adapter
//! - MQTT command dispatch and status publishing

// =============================================================================
// Lints - Enforce code quality and consistency
// =============================================================================

// Deny truly dangerous patterns (these will fail the build)
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod bridge;
pub mod cec;
pub mod config;
pub mod convergence;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod mqtt;
pub mod scanner;
pub mod tracker;
pub mod volume;

pub use bridge::{BridgeSettings, CecBridge};
pub use error::{CecError, Result};
pub use events::{create_event_bus, EventBus, SharedEventBus, StatusEvent};
