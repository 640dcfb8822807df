//! CEC protocol vocabulary: frames, opcodes, addresses and the
//! name tables the bridge renders into status payloads.

pub mod frame;
pub mod types;

pub use frame::*;
pub use types::*;
