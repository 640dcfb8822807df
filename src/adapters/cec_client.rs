//! `cec-client` adapter
//!
//! Drives libcec's command line client as a child process:
//! - frames go out as `tx 15:44:41` lines on stdin
//! - received traffic comes back on stdout as `TRAFFIC: [ 123]\t>> 50:7a:2c`
//! - every other stdout line is adapter log text
//!
//! Queries transmit the request frame and wait for the matching report
//! through a [`ReplyRouter`], bounded by the configured query timeout.

use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::replies::ReplyRouter;
use super::{AdapterEvent, CecAdapter};
use crate::cec::{
    CecFrame, CecVersion, LogicalAddress, Opcode, PhysicalAddress, PowerStatus, VendorId,
};
use crate::error::{CecError, Result};

/// How long `cec-client` gets to open the adapter and register
const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Printed by `cec-client` once it accepts commands
const READY_MARKER: &str = "waiting for input";

/// Log level tag of bus traffic lines in `cec-client` output
const TRAFFIC_TAG: &str = "TRAFFIC:";

/// Marks a received frame inside a traffic line
const RECEIVED_MARKER: &str = ">> ";

/// User control codes sent inside User Control Pressed
const KEY_VOLUME_UP: u8 = 0x41;
const KEY_VOLUME_DOWN: u8 = 0x42;
const KEY_MUTE_FUNCTION: u8 = 0x65;
const KEY_RESTORE_VOLUME_FUNCTION: u8 = 0x66;
const KEY_POWER_ON_FUNCTION: u8 = 0x6D;

/// e.g. `logical address(es) = Recorder 1 (1) , base device: TV (0)`
static OWN_ADDRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"logical address\(es\) = .*?\((\d+)\)").expect("own address pattern is valid")
});

#[derive(Debug, Clone)]
pub struct CecClientSettings {
    /// Path or name of the `cec-client` binary
    pub client: String,
    /// Adapter port, e.g. `RPI` or `/dev/ttyACM0`
    pub port: String,
    /// OSD name announced on the bus
    pub name: String,
    /// libcec log mask passed with `-d`; must include traffic (8)
    pub log_level: u8,
    pub query_timeout: Duration,
}

impl Default for CecClientSettings {
    fn default() -> Self {
        Self {
            client: "cec-client".to_string(),
            port: "RPI".to_string(),
            name: "CEC Bridge".to_string(),
            log_level: 31,
            query_timeout: Duration::from_millis(1000),
        }
    }
}

/// Classify one line of `cec-client` output. Only traffic lines carry
/// frames; debug lines also print `>> ` with a decoded description.
pub(crate) fn classify_line(line: &str) -> AdapterEvent {
    let frame = line
        .strip_prefix(TRAFFIC_TAG)
        .and_then(|rest| rest.split_once(RECEIVED_MARKER))
        .map(|(_, frame)| frame.trim());
    match frame {
        Some(frame) => AdapterEvent::Frame(frame.to_string()),
        None => AdapterEvent::Log(line.trim_end().to_string()),
    }
}

/// Our logical address from the registration line, if this is that line
pub(crate) fn parse_own_address(line: &str) -> Option<LogicalAddress> {
    let captures = OWN_ADDRESS_LINE.captures(line)?;
    captures[1].parse::<u8>().ok().and_then(LogicalAddress::new)
}

pub struct CecClientAdapter {
    own_address: LogicalAddress,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    replies: Arc<ReplyRouter>,
    query_timeout: Duration,
    reader: JoinHandle<()>,
}

impl CecClientAdapter {
    /// Start `cec-client` and wait until it is ready for commands.
    /// Received traffic and log lines are forwarded to `events`.
    pub async fn spawn(settings: &CecClientSettings, events: mpsc::Sender<AdapterEvent>) -> Result<Self> {
        info!(
            "Starting {} on port {} as '{}'",
            settings.client, settings.port, settings.name
        );

        let mut child = Command::new(&settings.client)
            .arg("-t")
            .arg("r")
            .arg("-o")
            .arg(&settings.name)
            .arg("-d")
            .arg(settings.log_level.to_string())
            .arg(&settings.port)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CecError::BusConnectionFailure(format!("could not start {}: {}", settings.client, e))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(CecError::BusConnectionFailure(
                "cec-client pipes unavailable".to_string(),
            ));
        };

        let mut lines = BufReader::new(stdout).lines();
        let own_address = match timeout(STARTUP_TIMEOUT, wait_until_ready(&mut lines)).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(CecError::BusConnectionFailure(format!(
                    "no ready signal from cec-client within {:?}",
                    STARTUP_TIMEOUT
                )));
            }
        };
        info!("Connected to HDMI-CEC with ID {}", own_address);

        let replies = Arc::new(ReplyRouter::new());
        let reader = tokio::spawn(read_output(lines, replies.clone(), events));

        Ok(Self {
            own_address,
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            replies,
            query_timeout: settings.query_timeout,
            reader,
        })
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| CecError::Adapter(format!("write to cec-client failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| CecError::Adapter(format!("flush to cec-client failed: {}", e)))
    }

    async fn send(&self, destination: LogicalAddress, opcode: Opcode, operands: &[u8]) -> Result<()> {
        let frame = CecFrame::new(self.own_address, destination, opcode, operands);
        self.write_line(&format!("tx {}", frame)).await
    }

    /// One key pulse to `destination`, released when asked
    async fn key(&self, destination: LogicalAddress, code: u8, release: bool) -> Result<()> {
        self.send(destination, Opcode::UserControlPressed, &[code]).await?;
        if release {
            self.send(destination, Opcode::UserControlReleased, &[]).await?;
        }
        Ok(())
    }

    /// Send `request` and wait for a `reply` frame from `from`
    async fn query(
        &self,
        destination: LogicalAddress,
        request: Opcode,
        from: Option<LogicalAddress>,
        reply: Opcode,
    ) -> Result<Option<CecFrame>> {
        let rx = self.replies.expect(from, reply);
        self.send(destination, request, &[]).await?;
        match timeout(self.query_timeout, rx).await {
            Ok(Ok(frame)) => Ok(Some(frame)),
            _ => {
                debug!("No {:?} from {:?} after {:?}", reply, from, request);
                Ok(None)
            }
        }
    }

    async fn query_device(&self, device: LogicalAddress, request: Opcode, reply: Opcode) -> Result<CecFrame> {
        self.query(device, request, Some(device), reply)
            .await?
            .ok_or(CecError::DeviceUnresponsive(device))
    }
}

/// Consume startup output until the ready marker, returning our address
async fn wait_until_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<LogicalAddress> {
    let mut own_address = None;
    loop {
        let Some(line) = lines.next_line().await? else {
            return Err(CecError::BusConnectionFailure(
                "cec-client exited before the adapter was opened".to_string(),
            ));
        };
        debug!("cec-client: {}", line);

        if let Some(address) = parse_own_address(&line) {
            own_address = Some(address);
        }
        if line.contains(READY_MARKER) {
            return Ok(own_address.unwrap_or(LogicalAddress::RECORDING_1));
        }
    }
}

/// Reader task: route replies and forward everything to the bridge
async fn read_output(
    mut lines: Lines<BufReader<ChildStdout>>,
    replies: Arc<ReplyRouter>,
    events: mpsc::Sender<AdapterEvent>,
) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!("cec-client exited");
                break;
            }
            Err(e) => {
                warn!("Reading cec-client output failed: {}", e);
                break;
            }
        };

        let event = classify_line(&line);
        if let AdapterEvent::Frame(text) = &event {
            if let Ok(frame) = CecFrame::parse(text) {
                replies.route(&frame);
            }
        }
        if events.send(event).await.is_err() {
            debug!("Adapter event receiver dropped");
            break;
        }
    }
}

#[async_trait]
impl CecAdapter for CecClientAdapter {
    fn logical_address(&self) -> LogicalAddress {
        self.own_address
    }

    async fn transmit(&self, command: &str) -> Result<()> {
        self.write_line(&format!("tx {}", command)).await
    }

    async fn power_on(&self, device: LogicalAddress) -> Result<()> {
        if device == LogicalAddress::TV {
            self.send(device, Opcode::ImageViewOn, &[]).await
        } else {
            self.key(device, KEY_POWER_ON_FUNCTION, true).await
        }
    }

    async fn standby(&self, device: LogicalAddress) -> Result<()> {
        self.send(device, Opcode::Standby, &[]).await
    }

    async fn volume_up(&self, release: bool) -> Result<()> {
        self.key(LogicalAddress::AUDIO_SYSTEM, KEY_VOLUME_UP, release).await
    }

    async fn volume_down(&self, release: bool) -> Result<()> {
        self.key(LogicalAddress::AUDIO_SYSTEM, KEY_VOLUME_DOWN, release).await
    }

    async fn mute(&self) -> Result<()> {
        self.key(LogicalAddress::AUDIO_SYSTEM, KEY_MUTE_FUNCTION, true).await
    }

    async fn unmute(&self) -> Result<()> {
        self.key(LogicalAddress::AUDIO_SYSTEM, KEY_RESTORE_VOLUME_FUNCTION, true)
            .await
    }

    async fn physical_address(&self, device: LogicalAddress) -> Result<PhysicalAddress> {
        // Frames addressed to ourselves are never echoed back
        if device == self.own_address {
            return Ok(PhysicalAddress::ABSENT);
        }
        let reply = self
            .query(
                device,
                Opcode::GivePhysicalAddress,
                Some(device),
                Opcode::ReportPhysicalAddress,
            )
            .await?;
        Ok(reply
            .and_then(|frame| frame.operands_be(2))
            .map(|address| PhysicalAddress(address as u16))
            .unwrap_or(PhysicalAddress::ABSENT))
    }

    async fn power_status(&self, device: LogicalAddress) -> Result<PowerStatus> {
        let frame = self
            .query_device(device, Opcode::GiveDevicePowerStatus, Opcode::ReportPowerStatus)
            .await?;
        Ok(frame.operand().map(PowerStatus::from_code).unwrap_or_default())
    }

    async fn vendor_id(&self, device: LogicalAddress) -> Result<VendorId> {
        let frame = self
            .query_device(device, Opcode::GiveDeviceVendorId, Opcode::DeviceVendorId)
            .await?;
        Ok(frame.operands_be(3).map(VendorId).unwrap_or_default())
    }

    async fn osd_name(&self, device: LogicalAddress) -> Result<String> {
        let frame = self
            .query_device(device, Opcode::GiveOsdName, Opcode::SetOsdName)
            .await?;
        Ok(String::from_utf8_lossy(&frame.operands).trim().to_string())
    }

    async fn cec_version(&self, device: LogicalAddress) -> Result<CecVersion> {
        let frame = self
            .query_device(device, Opcode::GetCecVersion, Opcode::CecVersion)
            .await?;
        Ok(frame.operand().map(CecVersion::from_code).unwrap_or_default())
    }

    async fn active_source(&self) -> Result<Option<LogicalAddress>> {
        let reply = self
            .query(
                LogicalAddress::BROADCAST,
                Opcode::RequestActiveSource,
                None,
                Opcode::ActiveSource,
            )
            .await?;
        Ok(reply.map(|frame| frame.initiator))
    }

    async fn audio_status(&self) -> Result<u8> {
        let frame = self
            .query_device(
                LogicalAddress::AUDIO_SYSTEM,
                Opcode::GiveAudioStatus,
                Opcode::ReportAudioStatus,
            )
            .await?;
        frame
            .operand()
            .ok_or(CecError::DeviceUnresponsive(LogicalAddress::AUDIO_SYSTEM))
    }

    async fn close(&self) -> Result<()> {
        let _ = self.write_line("q").await;
        self.reader.abort();
        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        info!("cec-client stopped");
        Ok(())
    }
}
