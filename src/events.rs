//! Outbound status events and the broadcast bus that fans them out.
//!
//! Every observation of a device attribute becomes one `StatusEvent`.
//! The MQTT link renders each event as `topic()` / `payload()` under the
//! configured prefix; tests subscribe directly.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cec::{LogicalAddress, PhysicalAddress};

/// Capacity of the broadcast channel. A scan of 15 devices emits ~110 events.
const EVENT_BUS_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Power state, as rendered by the adapter (`on`, `standby`, ...)
    DevicePower {
        device: LogicalAddress,
        status: String,
    },

    DeviceVendor {
        device: LogicalAddress,
        vendor: String,
    },

    DeviceAddress {
        device: LogicalAddress,
        address: PhysicalAddress,
    },

    DeviceActive {
        device: LogicalAddress,
        active: bool,
    },

    /// Device role derived from the logical address
    DeviceType {
        device: LogicalAddress,
        name: String,
    },

    DeviceOsd {
        device: LogicalAddress,
        name: String,
    },

    DeviceCecVersion {
        device: LogicalAddress,
        version: String,
    },

    /// Amplifier volume after correction (0-100)
    Volume { level: u8 },

    Mute { muted: bool },

    /// Raw frame text of every received frame
    Received { frame: String },
}

impl StatusEvent {
    /// Topic relative to the MQTT prefix
    pub fn topic(&self) -> String {
        match self {
            StatusEvent::DevicePower { device, .. } => format!("cec/device/{}/power", device),
            StatusEvent::DeviceVendor { device, .. } => format!("cec/device/{}/vendor", device),
            StatusEvent::DeviceAddress { device, .. } => format!("cec/device/{}/address", device),
            StatusEvent::DeviceActive { device, .. } => format!("cec/device/{}/active", device),
            StatusEvent::DeviceType { device, .. } => format!("cec/device/{}/type", device),
            StatusEvent::DeviceOsd { device, .. } => format!("cec/device/{}/osd", device),
            StatusEvent::DeviceCecVersion { device, .. } => {
                format!("cec/device/{}/cecver", device)
            }
            StatusEvent::Volume { .. } => "cec/audio/volume".to_string(),
            StatusEvent::Mute { .. } => "cec/audio/mute".to_string(),
            StatusEvent::Received { .. } => "cec/rx".to_string(),
        }
    }

    pub fn payload(&self) -> String {
        match self {
            StatusEvent::DevicePower { status, .. } => status.clone(),
            StatusEvent::DeviceVendor { vendor, .. } => vendor.clone(),
            StatusEvent::DeviceAddress { address, .. } => address.to_string(),
            StatusEvent::DeviceActive { active, .. } => active.to_string(),
            StatusEvent::DeviceType { name, .. } => name.clone(),
            StatusEvent::DeviceOsd { name, .. } => name.clone(),
            StatusEvent::DeviceCecVersion { version, .. } => version.clone(),
            StatusEvent::Volume { level } => level.to_string(),
            StatusEvent::Mute { muted } => if *muted { "on" } else { "off" }.to_string(),
            StatusEvent::Received { frame } => frame.clone(),
        }
    }

    /// Device the event describes, `None` for audio and raw traffic
    pub fn device(&self) -> Option<LogicalAddress> {
        match self {
            StatusEvent::DevicePower { device, .. }
            | StatusEvent::DeviceVendor { device, .. }
            | StatusEvent::DeviceAddress { device, .. }
            | StatusEvent::DeviceActive { device, .. }
            | StatusEvent::DeviceType { device, .. }
            | StatusEvent::DeviceOsd { device, .. }
            | StatusEvent::DeviceCecVersion { device, .. } => Some(*device),
            StatusEvent::Volume { .. } | StatusEvent::Mute { .. } | StatusEvent::Received { .. } => {
                None
            }
        }
    }
}

/// Broadcast fan-out of status events
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_event_bus() -> SharedEventBus {
    let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    Arc::new(EventBus { tx })
}

impl EventBus {
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!("Status {} = {}", event.topic(), event.payload());
        // No subscribers is fine: nobody is listening yet during startup
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}
