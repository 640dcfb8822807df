//! Bus vocabulary rendered into status payloads.
//!
//! The strings match what libcec's `*ToString` helpers produce so existing
//! Home Assistant automations keep working.

use std::fmt;
use std::str::FromStr;

use super::frame::LogicalAddress;

/// Device power state as reported by Report Power Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerStatus {
    On,
    Standby,
    StandbyToOn,
    OnToStandby,
    #[default]
    Unknown,
}

impl PowerStatus {
    /// Decode the Report Power Status operand
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => PowerStatus::On,
            0x01 => PowerStatus::Standby,
            0x02 => PowerStatus::StandbyToOn,
            0x03 => PowerStatus::OnToStandby,
            _ => PowerStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerStatus::On => "on",
            PowerStatus::Standby => "standby",
            PowerStatus::StandbyToOn => "in transition from standby to on",
            PowerStatus::OnToStandby => "in transition from on to standby",
            PowerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerStatus {
    type Err = std::convert::Infallible;

    /// Never fails: anything unrecognised maps to `Unknown`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "on" => PowerStatus::On,
            "standby" => PowerStatus::Standby,
            "in transition from standby to on" => PowerStatus::StandbyToOn,
            "in transition from on to standby" => PowerStatus::OnToStandby,
            _ => PowerStatus::Unknown,
        })
    }
}

/// CEC specification version reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CecVersion {
    V1_2,
    V1_2a,
    V1_3,
    V1_3a,
    V1_4,
    V2_0,
    #[default]
    Unknown,
}

impl CecVersion {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => CecVersion::V1_2,
            0x02 => CecVersion::V1_2a,
            0x03 => CecVersion::V1_3,
            0x04 => CecVersion::V1_3a,
            0x05 => CecVersion::V1_4,
            0x06 => CecVersion::V2_0,
            _ => CecVersion::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CecVersion::V1_2 => "1.2",
            CecVersion::V1_2a => "1.2a",
            CecVersion::V1_3 => "1.3",
            CecVersion::V1_3a => "1.3a",
            CecVersion::V1_4 => "1.4",
            CecVersion::V2_0 => "2.0",
            CecVersion::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 24-bit IEEE OUI identifying the device manufacturer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VendorId(pub u32);

impl VendorId {
    pub fn name(&self) -> &'static str {
        match self.0 {
            0x000039 | 0x000CE7 => "Toshiba",
            0x0000F0 => "Samsung",
            0x0005CD => "Denon",
            0x000678 => "Marantz",
            0x000982 => "Loewe",
            0x0009B0 => "Onkyo",
            0x000CB8 => "Medion",
            0x0010FA => "Apple",
            0x001582 | 0x9C645E => "Harman/Kardon",
            0x001A11 => "Google",
            0x0020C7 => "Akai",
            0x002467 => "AOC",
            0x008045 => "Panasonic",
            0x00903E => "Philips",
            0x009053 => "Daewoo",
            0x00A0DE => "Yamaha",
            0x00D0D5 => "Grundig",
            0x00E036 => "Pioneer",
            0x00E091 => "LG",
            0x08001F | 0x534850 => "Sharp",
            0x080046 => "Sony",
            0x18C086 => "Broadcom",
            0x6B746D => "Vizio",
            0x8065E9 => "Benq",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Device role implied by a logical address
pub fn device_type_name(address: LogicalAddress) -> &'static str {
    match address.value() {
        0 => "TV",
        1 => "Recorder 1",
        2 => "Recorder 2",
        3 => "Tuner 1",
        4 => "Playback 1",
        5 => "Audio",
        6 => "Tuner 2",
        7 => "Tuner 3",
        8 => "Playback 2",
        9 => "Recorder 3",
        10 => "Tuner 4",
        11 => "Playback 3",
        12 => "Reserved 1",
        13 => "Reserved 2",
        14 => "Free use",
        _ => "Broadcast",
    }
}
