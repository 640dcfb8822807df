//! CEC adapter abstraction
//!
//! `CecAdapter` is the set of bus primitives the bridge drives. Bus traffic
//! flows the other way as `AdapterEvent`s on an mpsc channel handed to the
//! adapter when it is opened.

pub mod cec_client;
#[cfg(test)]
pub mod mock;
pub mod replies;

use async_trait::async_trait;

use crate::cec::{CecVersion, LogicalAddress, PhysicalAddress, PowerStatus, VendorId};
use crate::error::Result;

pub use cec_client::CecClientAdapter;

/// Capacity of the adapter -> bridge event channel
pub const ADAPTER_EVENT_CAPACITY: usize = 256;

/// Something the adapter observed on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Raw text of a received frame, e.g. `50:7a:2c`
    Frame(String),
    /// A free-text adapter log line
    Log(String),
}

/// Bus primitives. Implementations are not required to be reentrant: the
/// bridge serializes every call behind one lock.
#[async_trait]
pub trait CecAdapter: Send + Sync {
    /// Our own logical address on the bus
    fn logical_address(&self) -> LogicalAddress;

    /// Send a raw, already-addressed command such as `15:71`
    async fn transmit(&self, command: &str) -> Result<()>;

    async fn power_on(&self, device: LogicalAddress) -> Result<()>;

    async fn standby(&self, device: LogicalAddress) -> Result<()>;

    /// One volume-up key pulse to the audio system. `release` ends the
    /// press; a batch of pulses only releases on its last one.
    async fn volume_up(&self, release: bool) -> Result<()>;

    async fn volume_down(&self, release: bool) -> Result<()>;

    async fn mute(&self) -> Result<()>;

    async fn unmute(&self) -> Result<()>;

    /// `PhysicalAddress::ABSENT` when the device does not answer
    async fn physical_address(&self, device: LogicalAddress) -> Result<PhysicalAddress>;

    async fn power_status(&self, device: LogicalAddress) -> Result<PowerStatus>;

    async fn vendor_id(&self, device: LogicalAddress) -> Result<VendorId>;

    async fn osd_name(&self, device: LogicalAddress) -> Result<String>;

    async fn cec_version(&self, device: LogicalAddress) -> Result<CecVersion>;

    /// Device currently announcing itself as active source, `None` when
    /// nobody answers
    async fn active_source(&self) -> Result<Option<LogicalAddress>>;

    /// Raw Report Audio Status operand from the audio system
    async fn audio_status(&self) -> Result<u8>;

    /// Release the bus connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
