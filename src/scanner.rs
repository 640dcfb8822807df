//! Bus scanner
//!
//! `scan` enumerates every attribute of every configured device and is run
//! at startup and on request. `refresh` only re-reads power and volume and
//! runs on the periodic timer. Both skip devices whose physical address comes
//! back as `ffff` and both mute the tracker's passive channels while they run.

use std::fmt::Display;

use tracing::{debug, warn};

use crate::bridge::CecBridge;
use crate::cec::{LogicalAddress, PhysicalAddress};
use crate::error::Result;
use crate::tracker::Device;
use crate::volume::VolumeState;

/// Snapshot assembled by one scan or refresh
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    pub devices: Vec<Device>,
    /// `None` when the audio system did not answer
    pub volume: Option<VolumeState>,
}

/// Fall back to the "unknown" rendering when one attribute query fails
fn or_unknown<T: Default, E: Display>(
    result: std::result::Result<T, E>,
    what: &str,
    device: LogicalAddress,
) -> T {
    result.unwrap_or_else(|e| {
        warn!("Could not read {} of device {}: {}", what, device, e);
        T::default()
    })
}

impl CecBridge {
    /// Full enumeration. Waits for any running convergence or refresh.
    pub async fn scan(&self) -> Result<ScanResult> {
        let _operation = self.operation.lock().await;
        let tracker = self.tracker();
        let _enumerating = tracker.begin_enumeration();
        debug!("Requesting CEC bus information");

        let mut devices = Vec::new();
        // Asked once, on the first present device
        let mut active_source: Option<Option<LogicalAddress>> = None;
        for &device in self.devices() {
            let Some(address) = self.probe(device).await else {
                continue;
            };

            let (vendor, active, version, power, osd) = {
                let bus = self.bus().await;
                let vendor = or_unknown(bus.vendor_id(device).await, "vendor", device);
                let source = match active_source {
                    Some(source) => source,
                    None => {
                        let source = or_unknown(bus.active_source().await, "active source", device);
                        active_source = Some(source);
                        source
                    }
                };
                let active = source == Some(device);
                (
                    vendor,
                    active,
                    or_unknown(bus.cec_version(device).await, "CEC version", device),
                    or_unknown(bus.power_status(device).await, "power status", device),
                    or_unknown(bus.osd_name(device).await, "OSD name", device),
                )
            };

            tracker.record_type(device);
            tracker.record_address(device, address);
            tracker.record_active(device, active);
            tracker.record_vendor(device, vendor);
            tracker.record_osd(device, &osd);
            tracker.record_cec_version(device, version);
            tracker.record_power(device, power.as_str());

            if let Some(snapshot) = tracker.device(device) {
                devices.push(snapshot);
            }
        }

        let volume = self.read_audio_status().await;
        Ok(ScanResult { devices, volume })
    }

    /// Power and volume only. Returns `None` without touching the bus when a
    /// volume change or another enumeration is in progress.
    pub async fn refresh(&self) -> Result<Option<ScanResult>> {
        if self.is_setting_volume() {
            debug!("Volume change in progress, skipping refresh");
            return Ok(None);
        }
        let Ok(_operation) = self.operation.try_lock() else {
            debug!("Bus busy, skipping refresh");
            return Ok(None);
        };

        let tracker = self.tracker();
        let _enumerating = tracker.begin_enumeration();
        debug!("Refreshing HDMI-CEC");

        let mut devices = Vec::new();
        for &device in self.devices() {
            let Some(address) = self.probe(device).await else {
                continue;
            };

            let power = or_unknown(
                self.bus().await.power_status(device).await,
                "power status",
                device,
            );
            debug!("device {} {} power {}", device, address, power);
            tracker.record_power(device, power.as_str());

            if let Some(snapshot) = tracker.device(device) {
                devices.push(snapshot);
            }
        }

        let volume = self.read_audio_status().await;
        Ok(Some(ScanResult { devices, volume }))
    }

    /// Physical address of `device`, `None` when it is not on the bus
    async fn probe(&self, device: LogicalAddress) -> Option<PhysicalAddress> {
        let address = match self.bus().await.physical_address(device).await {
            Ok(address) => address,
            Err(e) => {
                warn!("Could not read physical address of device {}: {}", device, e);
                return None;
            }
        };
        address.is_present().then_some(address)
    }

    async fn read_audio_status(&self) -> Option<VolumeState> {
        let status = match self.bus().await.audio_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not read audio status: {}", e);
                return None;
            }
        };
        let state = self.tracker().codec().decode(status);
        self.tracker().record_volume(state);
        Some(state)
    }
}
