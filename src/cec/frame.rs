//! Frame codec
//!
//! Converts between the hex text the adapter speaks (`10:47:43:45`, or the
//! compact `104743`) and structured [`CecFrame`] values.

use std::fmt;

use crate::error::{CecError, Result};

/// Operands allowed after header and opcode (16 byte frame limit)
pub const MAX_OPERANDS: usize = 14;

/// 4-bit logical address of a device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalAddress(u8);

impl LogicalAddress {
    pub const TV: LogicalAddress = LogicalAddress(0);
    pub const RECORDING_1: LogicalAddress = LogicalAddress(1);
    pub const AUDIO_SYSTEM: LogicalAddress = LogicalAddress(5);
    pub const BROADCAST: LogicalAddress = LogicalAddress(15);

    /// Returns `None` when the value does not fit in 4 bits
    pub fn new(value: u8) -> Option<Self> {
        (value <= 0x0f).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-bit HDMI topology address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalAddress(pub u16);

impl PhysicalAddress {
    /// Reported for devices that are not on the bus
    pub const ABSENT: PhysicalAddress = PhysicalAddress(0xFFFF);

    pub fn is_present(self) -> bool {
        self != Self::ABSENT
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Opcodes the bridge understands. Everything else is carried as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    FeatureAbort,
    ImageViewOn,
    Standby,
    UserControlPressed,
    UserControlReleased,
    GiveOsdName,
    SetOsdName,
    SystemAudioModeRequest,
    GiveAudioStatus,
    SetSystemAudioMode,
    ReportAudioStatus,
    GiveSystemAudioModeStatus,
    SystemAudioModeStatus,
    RoutingChange,
    ActiveSource,
    GivePhysicalAddress,
    ReportPhysicalAddress,
    RequestActiveSource,
    SetStreamPath,
    DeviceVendorId,
    GiveDeviceVendorId,
    GiveDevicePowerStatus,
    ReportPowerStatus,
    InactiveSource,
    CecVersion,
    GetCecVersion,
    Abort,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Opcode::FeatureAbort,
            0x04 => Opcode::ImageViewOn,
            0x36 => Opcode::Standby,
            0x44 => Opcode::UserControlPressed,
            0x45 => Opcode::UserControlReleased,
            0x46 => Opcode::GiveOsdName,
            0x47 => Opcode::SetOsdName,
            0x70 => Opcode::SystemAudioModeRequest,
            0x71 => Opcode::GiveAudioStatus,
            0x72 => Opcode::SetSystemAudioMode,
            0x7A => Opcode::ReportAudioStatus,
            0x7D => Opcode::GiveSystemAudioModeStatus,
            0x7E => Opcode::SystemAudioModeStatus,
            0x80 => Opcode::RoutingChange,
            0x82 => Opcode::ActiveSource,
            0x83 => Opcode::GivePhysicalAddress,
            0x84 => Opcode::ReportPhysicalAddress,
            0x85 => Opcode::RequestActiveSource,
            0x86 => Opcode::SetStreamPath,
            0x87 => Opcode::DeviceVendorId,
            0x8C => Opcode::GiveDeviceVendorId,
            0x8F => Opcode::GiveDevicePowerStatus,
            0x90 => Opcode::ReportPowerStatus,
            0x9D => Opcode::InactiveSource,
            0x9E => Opcode::CecVersion,
            0x9F => Opcode::GetCecVersion,
            0xFF => Opcode::Abort,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::FeatureAbort => 0x00,
            Opcode::ImageViewOn => 0x04,
            Opcode::Standby => 0x36,
            Opcode::UserControlPressed => 0x44,
            Opcode::UserControlReleased => 0x45,
            Opcode::GiveOsdName => 0x46,
            Opcode::SetOsdName => 0x47,
            Opcode::SystemAudioModeRequest => 0x70,
            Opcode::GiveAudioStatus => 0x71,
            Opcode::SetSystemAudioMode => 0x72,
            Opcode::ReportAudioStatus => 0x7A,
            Opcode::GiveSystemAudioModeStatus => 0x7D,
            Opcode::SystemAudioModeStatus => 0x7E,
            Opcode::RoutingChange => 0x80,
            Opcode::ActiveSource => 0x82,
            Opcode::GivePhysicalAddress => 0x83,
            Opcode::ReportPhysicalAddress => 0x84,
            Opcode::RequestActiveSource => 0x85,
            Opcode::SetStreamPath => 0x86,
            Opcode::DeviceVendorId => 0x87,
            Opcode::GiveDeviceVendorId => 0x8C,
            Opcode::GiveDevicePowerStatus => 0x8F,
            Opcode::ReportPowerStatus => 0x90,
            Opcode::InactiveSource => 0x9D,
            Opcode::CecVersion => 0x9E,
            Opcode::GetCecVersion => 0x9F,
            Opcode::Abort => 0xFF,
            Opcode::Unknown(value) => value,
        }
    }
}

/// A decoded CEC frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecFrame {
    pub initiator: LogicalAddress,
    pub destination: LogicalAddress,
    pub opcode: Opcode,
    pub operands: Vec<u8>,
}

impl CecFrame {
    pub fn new(
        initiator: LogicalAddress,
        destination: LogicalAddress,
        opcode: Opcode,
        operands: &[u8],
    ) -> Self {
        Self {
            initiator,
            destination,
            opcode,
            operands: operands.to_vec(),
        }
    }

    /// Decode frame text. Needs at least a header and an opcode.
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = parse_hex_bytes(text)?;
        if bytes.len() < 2 {
            return Err(CecError::malformed(text, "frame shorter than 2 bytes"));
        }
        if bytes.len() - 2 > MAX_OPERANDS {
            return Err(CecError::malformed(text, "too many operands"));
        }

        Ok(Self {
            initiator: LogicalAddress(bytes[0] >> 4),
            destination: LogicalAddress(bytes[0] & 0x0f),
            opcode: Opcode::from(bytes[1]),
            operands: bytes[2..].to_vec(),
        })
    }

    /// Header, opcode and operands as raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.operands.len() + 2);
        bytes.push(self.initiator.0 << 4 | self.destination.0);
        bytes.push(u8::from(self.opcode));
        bytes.extend_from_slice(&self.operands);
        bytes
    }

    /// First operand, if any
    pub fn operand(&self) -> Option<u8> {
        self.operands.first().copied()
    }

    /// Operands read as one big-endian number (vendor IDs, physical addresses)
    pub fn operands_be(&self, len: usize) -> Option<u32> {
        if self.operands.len() < len || len > 4 {
            return None;
        }
        Some(
            self.operands[..len]
                .iter()
                .fold(0u32, |acc, byte| acc << 8 | u32::from(*byte)),
        )
    }
}

impl fmt::Display for CecFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_hex_bytes(&self.to_bytes()))
    }
}

/// Parse colon separated or contiguous hex text into bytes.
///
/// Colons may separate any even-length group of digits, so `1F:82:1000`
/// and `1f821000` decode to the same four bytes.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    let mut bytes = Vec::new();

    for group in trimmed.split(':') {
        if group.is_empty() {
            return Err(CecError::malformed(text, "empty byte group"));
        }
        if group.len() % 2 != 0 {
            return Err(CecError::malformed(text, "odd number of hex digits"));
        }
        if !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CecError::malformed(text, "non-hex character"));
        }
        for start in (0..group.len()).step_by(2) {
            let byte = u8::from_str_radix(&group[start..start + 2], 16)
                .map_err(|_| CecError::malformed(text, "non-hex character"))?;
            bytes.push(byte);
        }
    }

    Ok(bytes)
}

/// Lowercase two-digit bytes joined by `:`
pub fn format_hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Address a bare command code to `target`, e.g. `("71", Some(5))` from
/// address 1 becomes `15:71`. Without a target the code is assumed to carry
/// its own header and passes through unchanged.
pub fn address_command(sender: LogicalAddress, target: Option<LogicalAddress>, code: &str) -> String {
    match target {
        Some(target) => format!("{:02x}:{}", sender.0 * 16 + target.0, code),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_frame() {
        let frame = CecFrame::parse("50:7a:2c").unwrap();
        assert_eq!(frame.initiator, LogicalAddress::AUDIO_SYSTEM);
        assert_eq!(frame.destination, LogicalAddress::TV);
        assert_eq!(frame.opcode, Opcode::ReportAudioStatus);
        assert_eq!(frame.operands, vec![0x2c]);
    }

    #[test]
    fn test_parse_compact_frame() {
        let compact = CecFrame::parse("0F87000039").unwrap();
        let colon = CecFrame::parse("0f:87:00:00:39").unwrap();
        assert_eq!(compact, colon);
        assert_eq!(compact.opcode, Opcode::DeviceVendorId);
        assert_eq!(compact.operands_be(3), Some(0x000039));
    }

    #[test]
    fn test_header_byte_splits_into_addresses() {
        for opcode in [0x00u8, 0x36, 0x90, 0xAB] {
            let frame = CecFrame::parse(&format!("14:{:02x}", opcode)).unwrap();
            assert_eq!(frame.initiator.value(), 1);
            assert_eq!(frame.destination.value(), 4);
        }
    }

    #[test]
    fn test_mixed_grouping() {
        let bytes = parse_hex_bytes("1F:82:1000").unwrap();
        assert_eq!(bytes, vec![0x1f, 0x82, 0x10, 0x00]);
    }

    #[test]
    fn test_unknown_opcode_passes_through() {
        let frame = CecFrame::parse("4f:a0:00:00:f0:01").unwrap();
        assert_eq!(frame.opcode, Opcode::Unknown(0xa0));
        assert_eq!(frame.to_string(), "4f:a0:00:00:f0:01");
    }

    #[test]
    fn test_malformed_frames_rejected() {
        for text in ["", "1", "10", "10:4", "10:zz", "1g:47", "10::47", "10:47:"] {
            assert!(
                matches!(CecFrame::parse(text), Err(CecError::MalformedFrame { .. })),
                "{:?} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_too_many_operands_rejected() {
        let text = format!("10:47:{}", vec!["41"; MAX_OPERANDS + 1].join(":"));
        assert!(CecFrame::parse(&text).is_err());

        let text = format!("10:47:{}", vec!["41"; MAX_OPERANDS].join(":"));
        assert!(CecFrame::parse(&text).is_ok());
    }

    #[test]
    fn test_address_command() {
        assert_eq!(
            address_command(LogicalAddress::RECORDING_1, Some(LogicalAddress::AUDIO_SYSTEM), "71"),
            "15:71"
        );
        assert_eq!(
            address_command(LogicalAddress::TV, Some(LogicalAddress::AUDIO_SYSTEM), "71"),
            "05:71"
        );
        assert_eq!(
            address_command(LogicalAddress::RECORDING_1, None, "1F:82:1000"),
            "1F:82:1000"
        );
    }

    #[test]
    fn test_physical_address_display() {
        assert_eq!(PhysicalAddress(0x1000).to_string(), "1000");
        assert_eq!(PhysicalAddress(0x0000).to_string(), "0000");
        assert!(!PhysicalAddress::ABSENT.is_present());
    }

    #[test]
    fn test_logical_address_bounds() {
        assert!(LogicalAddress::new(15).is_some());
        assert!(LogicalAddress::new(16).is_none());
    }
}
