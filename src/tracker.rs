//! Device state tracker
//!
//! Turns bus observations into status events and keeps the last known
//! attributes of every device. Two observation channels feed it:
//! - received frames (primary), decoded by opcode
//! - adapter log lines, because some power transitions only surface there
//!
//! Every observation is republished, changed or not. While a scan or
//! refresh is enumerating the bus both passive channels are muted so that
//! half-finished query traffic does not leak out as state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::LazyLock;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::adapters::AdapterEvent;
use crate::cec::{
    device_type_name, CecFrame, CecVersion, LogicalAddress, Opcode, PhysicalAddress, PowerStatus,
    VendorId,
};
use crate::events::{SharedEventBus, StatusEvent};
use crate::volume::{VolumeCodec, VolumeState};

/// e.g. `TV (0): power status changed from 'standby' to 'on'`
static POWER_CHANGE_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([0-9a-fA-F])\): power status changed from '.*' to '(.*)'")
        .expect("power status pattern is valid")
});

/// Last known attributes of one logical address
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub address: LogicalAddress,
    pub physical: Option<PhysicalAddress>,
    pub power: PowerStatus,
    pub vendor: Option<VendorId>,
    pub osd_name: Option<String>,
    pub cec_version: Option<CecVersion>,
    pub active_source: bool,
}

impl Device {
    fn new(address: LogicalAddress) -> Self {
        Self {
            address,
            physical: None,
            power: PowerStatus::Unknown,
            vendor: None,
            osd_name: None,
            cec_version: None,
            active_source: false,
        }
    }
}

pub struct DeviceTracker {
    codec: VolumeCodec,
    events: SharedEventBus,
    devices: RwLock<BTreeMap<LogicalAddress, Device>>,
    enumerating: AtomicBool,
    /// Resolved by the next matching Report Audio Status frame
    audio_waiter: Mutex<Option<AudioWaiter>>,
}

/// One outstanding Give Audio Status request
struct AudioWaiter {
    from: LogicalAddress,
    to: LogicalAddress,
    tx: oneshot::Sender<VolumeState>,
}

/// Mutes passive observation until dropped
pub struct EnumerationGuard<'a> {
    tracker: &'a DeviceTracker,
}

impl Drop for EnumerationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.enumerating.store(false, Ordering::SeqCst);
    }
}

impl DeviceTracker {
    pub fn new(codec: VolumeCodec, events: SharedEventBus) -> Self {
        Self {
            codec,
            events,
            devices: RwLock::new(BTreeMap::new()),
            enumerating: AtomicBool::new(false),
            audio_waiter: Mutex::new(None),
        }
    }

    pub fn codec(&self) -> &VolumeCodec {
        &self.codec
    }

    pub fn handle(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::Frame(text) => self.observe_frame(&text),
            AdapterEvent::Log(line) => self.observe_log(&line),
        }
    }

    /// Decode one received frame and publish what it tells us
    pub fn observe_frame(&self, text: &str) {
        let frame = match CecFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return;
            }
        };

        debug!(
            "Received {:?} {} -> {} ({})",
            frame.opcode, frame.initiator, frame.destination, frame
        );
        self.events.publish(StatusEvent::Received {
            frame: frame.to_string(),
        });

        let audio = match frame.opcode {
            Opcode::ReportAudioStatus => frame.operand().map(|status| self.codec.decode(status)),
            _ => None,
        };
        if let Some(state) = audio {
            self.wake_audio_waiter(&frame, state);
        }

        if self.is_enumerating() {
            return;
        }

        match frame.opcode {
            Opcode::ReportPowerStatus => match frame.operand() {
                Some(code) => {
                    self.record_power(frame.initiator, PowerStatus::from_code(code).as_str())
                }
                None => debug!("Power report without status from {}", frame.initiator),
            },
            Opcode::DeviceVendorId => match frame.operands_be(3) {
                Some(id) => self.record_vendor(frame.initiator, VendorId(id)),
                None => debug!("Vendor report too short from {}", frame.initiator),
            },
            Opcode::ReportPhysicalAddress => match frame.operands_be(2) {
                Some(address) => {
                    self.record_address(frame.initiator, PhysicalAddress(address as u16))
                }
                None => debug!("Address report too short from {}", frame.initiator),
            },
            Opcode::ReportAudioStatus => {
                if let Some(state) = audio {
                    self.publish_volume(state);
                }
            }
            Opcode::SetSystemAudioMode => {
                let status = if frame.operand() == Some(1) {
                    PowerStatus::On
                } else {
                    PowerStatus::Standby
                };
                self.record_power(LogicalAddress::AUDIO_SYSTEM, status.as_str());
            }
            _ => {}
        }
    }

    /// Pick power transitions out of adapter log text
    pub fn observe_log(&self, line: &str) {
        trace!("Adapter log: {}", line);
        if self.is_enumerating() {
            return;
        }

        let Some(captures) = POWER_CHANGE_LOG.captures(line) else {
            return;
        };
        let device = u8::from_str_radix(&captures[1], 16)
            .ok()
            .and_then(LogicalAddress::new);
        if let Some(device) = device {
            self.record_power(device, &captures[2]);
        }
    }

    // =========================================================================
    // Enumeration and the audio status handshake
    // =========================================================================

    pub fn is_enumerating(&self) -> bool {
        self.enumerating.load(Ordering::SeqCst)
    }

    pub fn begin_enumeration(&self) -> EnumerationGuard<'_> {
        self.enumerating.store(true, Ordering::SeqCst);
        EnumerationGuard { tracker: self }
    }

    /// Register interest in the next Report Audio Status sent by `from` to
    /// `to`. Replaces (and thereby cancels) any earlier waiter.
    pub fn expect_audio_status(
        &self,
        from: LogicalAddress,
        to: LogicalAddress,
    ) -> oneshot::Receiver<VolumeState> {
        let (tx, rx) = oneshot::channel();
        *self.audio_waiter.lock() = Some(AudioWaiter { from, to, tx });
        rx
    }

    fn wake_audio_waiter(&self, frame: &CecFrame, state: VolumeState) {
        let mut waiter = self.audio_waiter.lock();
        let matches = waiter
            .as_ref()
            .is_some_and(|w| w.from == frame.initiator && w.to == frame.destination);
        if !matches {
            return;
        }
        if let Some(waiter) = waiter.take() {
            let _ = waiter.tx.send(state);
        }
    }

    // =========================================================================
    // Recording observations (table update + one event each)
    // =========================================================================

    fn update(&self, device: LogicalAddress, f: impl FnOnce(&mut Device)) {
        let mut devices = self.devices.write();
        f(devices.entry(device).or_insert_with(|| Device::new(device)));
    }

    /// `status` is published as given; the table keeps its parsed form
    pub fn record_power(&self, device: LogicalAddress, status: &str) {
        let parsed: PowerStatus = status.parse().unwrap_or_default();
        self.update(device, |d| d.power = parsed);
        self.events.publish(StatusEvent::DevicePower {
            device,
            status: status.to_string(),
        });
    }

    pub fn record_vendor(&self, device: LogicalAddress, vendor: VendorId) {
        self.update(device, |d| d.vendor = Some(vendor));
        self.events.publish(StatusEvent::DeviceVendor {
            device,
            vendor: vendor.name().to_string(),
        });
    }

    pub fn record_address(&self, device: LogicalAddress, address: PhysicalAddress) {
        self.update(device, |d| d.physical = Some(address));
        self.events
            .publish(StatusEvent::DeviceAddress { device, address });
    }

    pub fn record_active(&self, device: LogicalAddress, active: bool) {
        self.update(device, |d| d.active_source = active);
        self.events
            .publish(StatusEvent::DeviceActive { device, active });
    }

    pub fn record_type(&self, device: LogicalAddress) {
        self.update(device, |_| {});
        self.events.publish(StatusEvent::DeviceType {
            device,
            name: device_type_name(device).to_string(),
        });
    }

    pub fn record_osd(&self, device: LogicalAddress, name: &str) {
        self.update(device, |d| d.osd_name = Some(name.to_string()));
        self.events.publish(StatusEvent::DeviceOsd {
            device,
            name: name.to_string(),
        });
    }

    pub fn record_cec_version(&self, device: LogicalAddress, version: CecVersion) {
        self.update(device, |d| d.cec_version = Some(version));
        self.events.publish(StatusEvent::DeviceCecVersion {
            device,
            version: version.as_str().to_string(),
        });
    }

    pub fn record_volume(&self, state: VolumeState) {
        self.publish_volume(state);
    }

    pub fn record_mute(&self, muted: bool) {
        self.events.publish(StatusEvent::Mute { muted });
    }

    fn publish_volume(&self, state: VolumeState) {
        self.events.publish(StatusEvent::Volume { level: state.level });
        self.events.publish(StatusEvent::Mute {
            muted: state.muted,
        });
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub fn device(&self, device: LogicalAddress) -> Option<Device> {
        self.devices.read().get(&device).cloned()
    }
}
