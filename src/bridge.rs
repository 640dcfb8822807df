//! CecBridge - owns the adapter and the shared state every operation uses
//!
//! - The adapter sits behind one async mutex so bus writes (pulses, queries,
//!   raw transmits) never interleave.
//! - `operation` serializes the multi-step operations (volume convergence,
//!   volume pulses, scan, refresh) so their query/reply handshakes cannot
//!   cross.
//! - Bus traffic is consumed by a listener task that feeds the tracker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterEvent, CecAdapter};
use crate::cec::{address_command, LogicalAddress};
use crate::error::Result;
use crate::events::SharedEventBus;
use crate::tracker::DeviceTracker;
use crate::volume::VolumeCodec;

/// Shortest allowed period between refreshes
pub const MIN_REFRESH_PERIOD: Duration = Duration::from_secs(10);

/// Settings the bridge core needs from the configuration
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Logical addresses enumerated by scan and refresh
    pub devices: Vec<LogicalAddress>,
    /// Multiplier applied to reported volume levels
    pub volume_correction: f64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            devices: (0..15).filter_map(LogicalAddress::new).collect(),
            volume_correction: 1.0,
        }
    }
}

pub struct CecBridge {
    adapter: Mutex<Box<dyn CecAdapter>>,
    own_address: LogicalAddress,
    devices: Vec<LogicalAddress>,
    tracker: Arc<DeviceTracker>,
    /// Held for the whole of a convergence, pulse batch, scan or refresh
    pub(crate) operation: Mutex<()>,
    pub(crate) setting_volume: AtomicBool,
}

/// Clears the "setting volume" flag when the convergence ends, however it ends
pub(crate) struct SettingVolumeGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SettingVolumeGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl CecBridge {
    pub fn new(adapter: Box<dyn CecAdapter>, settings: BridgeSettings, events: SharedEventBus) -> Self {
        let own_address = adapter.logical_address();
        let codec = VolumeCodec::new(settings.volume_correction);
        info!(
            "CEC bridge on logical address {} watching devices {:?}",
            own_address,
            settings.devices.iter().map(|d| d.value()).collect::<Vec<_>>()
        );

        Self {
            adapter: Mutex::new(adapter),
            own_address,
            devices: settings.devices,
            tracker: Arc::new(DeviceTracker::new(codec, events)),
            operation: Mutex::new(()),
            setting_volume: AtomicBool::new(false),
        }
    }

    pub fn own_address(&self) -> LogicalAddress {
        self.own_address
    }

    pub fn devices(&self) -> &[LogicalAddress] {
        &self.devices
    }

    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        &self.tracker
    }

    pub fn is_setting_volume(&self) -> bool {
        self.setting_volume.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_setting_volume(&self) -> SettingVolumeGuard<'_> {
        self.setting_volume.store(true, Ordering::SeqCst);
        SettingVolumeGuard {
            flag: &self.setting_volume,
        }
    }

    /// Exclusive access to the adapter for one bus primitive
    pub(crate) async fn bus(&self) -> MutexGuard<'_, Box<dyn CecAdapter>> {
        self.adapter.lock().await
    }

    /// Consume adapter events until the channel closes or shutdown
    pub fn spawn_listener(
        &self,
        mut rx: mpsc::Receiver<AdapterEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("CEC listener shutting down");
                        break;
                    }
                    event = rx.recv() => match event {
                        Some(event) => tracker.handle(event),
                        None => {
                            warn!("CEC adapter event channel closed");
                            break;
                        }
                    }
                }
            }
            info!("CEC listener stopped");
        })
    }

    // =========================================================================
    // Direct bus primitives
    // =========================================================================

    /// Send a raw command code. With a target the code is addressed from our
    /// own logical address, otherwise it must already carry its header.
    pub async fn transmit(&self, code: &str, target: Option<LogicalAddress>) -> Result<()> {
        let command = address_command(self.own_address, target, code);
        debug!("Sending {}", command);
        self.bus().await.transmit(&command).await
    }

    pub async fn power_on(&self, device: LogicalAddress) -> Result<()> {
        debug!("Power on device {}", device);
        self.tracker.record_power(device, "on");
        self.bus().await.power_on(device).await
    }

    pub async fn power_off(&self, device: LogicalAddress) -> Result<()> {
        debug!("Power off device {}", device);
        self.tracker.record_power(device, "standby");
        self.bus().await.standby(device).await
    }

    pub async fn mute(&self) -> Result<()> {
        debug!("Mute audio system");
        self.tracker.record_mute(true);
        self.bus().await.mute().await
    }

    pub async fn unmute(&self) -> Result<()> {
        debug!("Unmute audio system");
        self.tracker.record_mute(false);
        self.bus().await.unmute().await
    }

    /// Release the adapter. Call after the listener and refresh timer stopped.
    pub async fn close(&self) -> Result<()> {
        info!("Closing CEC adapter");
        self.bus().await.close().await
    }
}

/// Periodically refresh power and volume until shutdown.
///
/// The first refresh happens one period after start; the startup scan
/// already covers time zero.
pub async fn run_refresh(bridge: Arc<CecBridge>, period: Duration, shutdown: CancellationToken) {
    let period = period.max(MIN_REFRESH_PERIOD);
    info!("Refreshing CEC state every {:?}", period);

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Refresh timer stopped");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = bridge.refresh().await {
                    warn!("Refresh failed: {}", e);
                }
            }
        }
    }
}
