//! Scriptable in-memory adapter for tests.
//!
//! Simulates an amplifier at logical address 5 that answers Give Audio Status
//! with a Report Audio Status frame on the event channel, and a fixed device
//! population for scan/refresh queries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{AdapterEvent, CecAdapter};
use crate::cec::{
    format_hex_bytes, parse_hex_bytes, CecVersion, LogicalAddress, Opcode, PhysicalAddress,
    PowerStatus, VendorId,
};
use crate::convergence::Direction;
use crate::error::{CecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub direction: Direction,
    pub release: bool,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub physical: PhysicalAddress,
    pub power: PowerStatus,
    pub vendor: VendorId,
    pub osd: String,
    pub version: CecVersion,
    pub active: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            physical: PhysicalAddress(0x1000),
            power: PowerStatus::On,
            vendor: VendorId(0x0000F0),
            osd: "Device".to_string(),
            version: CecVersion::V1_4,
            active: false,
        }
    }
}

#[derive(Debug)]
pub struct MockState {
    /// Every raw command passed to `transmit`, in order
    pub transmits: Vec<String>,
    pub pulses: Vec<Pulse>,
    /// Every query and power/mute primitive, e.g. `physical_address 4`
    pub calls: Vec<String>,
    pub devices: HashMap<LogicalAddress, MockDevice>,
    /// Raw amplifier volume (0-127)
    pub volume: u8,
    pub muted: bool,
    /// Answer Give Audio Status with a Report Audio Status frame
    pub answer_audio_requests: bool,
}

impl MockState {
    fn audio_status(&self) -> u8 {
        self.volume | if self.muted { 0x80 } else { 0 }
    }
}

/// Shared view of the mock's state, kept by the test after the adapter has
/// been moved into the bridge
#[derive(Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn add_device(&self, address: u8, device: MockDevice) {
        let address = LogicalAddress::new(address).unwrap();
        self.0.lock().devices.insert(address, device);
    }

    pub fn set_volume(&self, volume: u8) {
        self.0.lock().volume = volume;
    }

    pub fn volume(&self) -> u8 {
        self.0.lock().volume
    }

    pub fn transmits(&self) -> Vec<String> {
        self.0.lock().transmits.clone()
    }

    pub fn pulses(&self) -> Vec<Pulse> {
        self.0.lock().pulses.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    /// Transmits that were audio status requests to the amplifier
    pub fn audio_requests(&self) -> usize {
        self.0
            .lock()
            .transmits
            .iter()
            .filter(|t| t.ends_with(":71"))
            .count()
    }
}

pub struct MockAdapter {
    address: LogicalAddress,
    state: Arc<Mutex<MockState>>,
    events: mpsc::Sender<AdapterEvent>,
}

impl MockAdapter {
    pub fn new(events: mpsc::Sender<AdapterEvent>) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            transmits: Vec::new(),
            pulses: Vec::new(),
            calls: Vec::new(),
            devices: HashMap::new(),
            volume: 0,
            muted: false,
            answer_audio_requests: true,
        }));
        let adapter = Self {
            address: LogicalAddress::RECORDING_1,
            state: state.clone(),
            events,
        };
        (adapter, MockHandle(state))
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn pulse(&self, direction: Direction, release: bool) {
        let mut state = self.state.lock();
        state.volume = match direction {
            Direction::Up => (state.volume + 1).min(100),
            Direction::Down => state.volume.saturating_sub(1),
        };
        state.pulses.push(Pulse { direction, release });
    }

    fn device(&self, device: LogicalAddress) -> Result<MockDevice> {
        self.state
            .lock()
            .devices
            .get(&device)
            .cloned()
            .ok_or(CecError::DeviceUnresponsive(device))
    }
}

#[async_trait]
impl CecAdapter for MockAdapter {
    fn logical_address(&self) -> LogicalAddress {
        self.address
    }

    async fn transmit(&self, command: &str) -> Result<()> {
        let reply = {
            let mut state = self.state.lock();
            state.transmits.push(command.to_string());

            let bytes = parse_hex_bytes(command).unwrap_or_default();
            let asks_audio = bytes.len() >= 2
                && bytes[0] & 0x0f == LogicalAddress::AUDIO_SYSTEM.value()
                && Opcode::from(bytes[1]) == Opcode::GiveAudioStatus;

            (asks_audio && state.answer_audio_requests).then(|| {
                let header = LogicalAddress::AUDIO_SYSTEM.value() << 4 | (bytes[0] >> 4);
                format_hex_bytes(&[header, 0x7a, state.audio_status()])
            })
        };

        if let Some(frame) = reply {
            let _ = self.events.send(AdapterEvent::Frame(frame)).await;
        }
        Ok(())
    }

    async fn power_on(&self, device: LogicalAddress) -> Result<()> {
        self.record(format!("power_on {}", device));
        Ok(())
    }

    async fn standby(&self, device: LogicalAddress) -> Result<()> {
        self.record(format!("standby {}", device));
        Ok(())
    }

    async fn volume_up(&self, release: bool) -> Result<()> {
        self.pulse(Direction::Up, release);
        Ok(())
    }

    async fn volume_down(&self, release: bool) -> Result<()> {
        self.pulse(Direction::Down, release);
        Ok(())
    }

    async fn mute(&self) -> Result<()> {
        self.record("mute".to_string());
        self.state.lock().muted = true;
        Ok(())
    }

    async fn unmute(&self) -> Result<()> {
        self.record("unmute".to_string());
        self.state.lock().muted = false;
        Ok(())
    }

    async fn physical_address(&self, device: LogicalAddress) -> Result<PhysicalAddress> {
        self.record(format!("physical_address {}", device));
        Ok(self
            .device(device)
            .map(|d| d.physical)
            .unwrap_or(PhysicalAddress::ABSENT))
    }

    async fn power_status(&self, device: LogicalAddress) -> Result<PowerStatus> {
        self.record(format!("power_status {}", device));
        Ok(self.device(device)?.power)
    }

    async fn vendor_id(&self, device: LogicalAddress) -> Result<VendorId> {
        self.record(format!("vendor_id {}", device));
        Ok(self.device(device)?.vendor)
    }

    async fn osd_name(&self, device: LogicalAddress) -> Result<String> {
        self.record(format!("osd_name {}", device));
        Ok(self.device(device)?.osd)
    }

    async fn cec_version(&self, device: LogicalAddress) -> Result<CecVersion> {
        self.record(format!("cec_version {}", device));
        Ok(self.device(device)?.version)
    }

    async fn active_source(&self) -> Result<Option<LogicalAddress>> {
        self.record("active_source".to_string());
        let state = self.state.lock();
        let mut active: Vec<_> = state
            .devices
            .iter()
            .filter(|(_, d)| d.active)
            .map(|(address, _)| *address)
            .collect();
        active.sort();
        Ok(active.first().copied())
    }

    async fn audio_status(&self) -> Result<u8> {
        self.record("audio_status".to_string());
        Ok(self.state.lock().audio_status())
    }
}
