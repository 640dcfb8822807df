//! Command dispatcher
//!
//! Inbound commands arrive as a topic path (prefix already stripped) and a
//! text payload. Parsing is strict inside the families we own and silent
//! outside them: `cec/audio/volume/set` with `"150"` is an error, while
//! `cec/lights/set` is simply not ours and is ignored.

use std::sync::Arc;

use tracing::debug;

use crate::bridge::CecBridge;
use crate::cec::LogicalAddress;
use crate::error::{CecError, Result};
use crate::volume::MAX_LEVEL;

/// A validated inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PowerOn(LogicalAddress),
    PowerOff(LogicalAddress),
    VolumeUp,
    VolumeDown,
    SetVolume(u8),
    Mute,
    Unmute,
    /// Raw codes, transmitted verbatim and in order
    Transmit(Vec<String>),
    Refresh,
    Scan,
}

impl Command {
    /// Parse one inbound message. `Ok(None)` means the path is outside the
    /// command families this bridge handles.
    pub fn parse(path: &str, payload: &str) -> Result<Option<Command>> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let invalid = || CecError::unrecognized(path, payload);

        let command = match segments.as_slice() {
            ["cec", "device", id, "power", "set"] => {
                let device = id
                    .parse::<u8>()
                    .ok()
                    .and_then(LogicalAddress::new)
                    .ok_or_else(invalid)?;
                match payload {
                    "on" => Command::PowerOn(device),
                    "standby" => Command::PowerOff(device),
                    _ => return Err(invalid()),
                }
            }
            ["cec", "audio", "volume", "set"] => match payload {
                "up" => Command::VolumeUp,
                "down" => Command::VolumeDown,
                level => Command::SetVolume(parse_level(level).ok_or_else(invalid)?),
            },
            ["cec", "audio", "mute", "set"] => match payload {
                "on" => Command::Mute,
                "off" => Command::Unmute,
                _ => return Err(invalid()),
            },
            ["cec", "tx"] => Command::Transmit(
                payload
                    .split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            ["cec", "refresh"] => Command::Refresh,
            ["cec", "scan"] => Command::Scan,
            _ => return Ok(None),
        };

        Ok(Some(command))
    }
}

/// Decimal digits only, at most 100
fn parse_level(text: &str) -> Option<u8> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u8>().ok().filter(|level| *level <= MAX_LEVEL)
}

/// Routes parsed commands to the bridge
#[derive(Clone)]
pub struct CommandDispatcher {
    bridge: Arc<CecBridge>,
}

impl CommandDispatcher {
    pub fn new(bridge: Arc<CecBridge>) -> Self {
        Self { bridge }
    }

    /// Parse and run one inbound message. Returns whether it was handled.
    pub async fn dispatch(&self, path: &str, payload: &str) -> Result<bool> {
        debug!("Command received: {} ({})", path, payload);
        let Some(command) = Command::parse(path, payload)? else {
            debug!("Ignoring {}", path);
            return Ok(false);
        };
        self.execute(command).await?;
        Ok(true)
    }

    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::PowerOn(device) => self.bridge.power_on(device).await,
            Command::PowerOff(device) => self.bridge.power_off(device).await,
            Command::VolumeUp => self.bridge.volume_up(1, true).await,
            Command::VolumeDown => self.bridge.volume_down(1, true).await,
            Command::SetVolume(level) => self.bridge.set_volume(level).await.map(|_| ()),
            Command::Mute => self.bridge.mute().await,
            Command::Unmute => self.bridge.unmute().await,
            Command::Transmit(codes) => {
                for code in codes {
                    self.bridge.transmit(&code, None).await?;
                }
                Ok(())
            }
            Command::Refresh => self.bridge.refresh().await.map(|_| ()),
            Command::Scan => self.bridge.scan().await.map(|_| ()),
        }
    }
}
