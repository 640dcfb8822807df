//! Volume codec for the Report Audio Status operand.
//!
//! Bit 7 is the mute flag, bits 0-6 the amplifier's volume. Some amplifiers
//! report a maximum other than 100, so the raw value is scaled by a
//! per-installation correction factor (e.g. `0.8` when the amp tops out at
//! 80 but reports 100).

/// Absorbs floating point noise such as `80.0 * 0.8 == 64.00000000000001`
const CEIL_TOLERANCE: f64 = 1e-9;

/// Highest level reported after correction
pub const MAX_LEVEL: u8 = 100;

/// Decoded audio status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeState {
    pub muted: bool,
    pub level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCodec {
    correction: f64,
}

impl Default for VolumeCodec {
    fn default() -> Self {
        Self { correction: 1.0 }
    }
}

impl VolumeCodec {
    pub fn new(correction: f64) -> Self {
        Self { correction }
    }

    pub fn decode(&self, status: u8) -> VolumeState {
        let muted = status > 127;
        let raw = if muted { status - 128 } else { status };
        let scaled = (f64::from(raw) * self.correction - CEIL_TOLERANCE).ceil();
        let level = scaled.clamp(0.0, f64::from(MAX_LEVEL)) as u8;

        tracing::debug!(
            "Audio status = {} -> mute = {}, volume = {}, real volume = {}",
            status,
            muted,
            raw,
            level
        );

        VolumeState { muted, level }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_every_byte_without_correction() {
        let codec = VolumeCodec::default();
        for status in 0..=255u8 {
            let state = codec.decode(status);
            let raw = if status > 127 { status - 128 } else { status };
            assert_eq!(state.muted, status > 127, "mute bit for {}", status);
            assert_eq!(state.level, raw.min(MAX_LEVEL), "level for {}", status);
        }
    }

    #[test]
    fn test_decode_is_pure() {
        let codec = VolumeCodec::new(0.8);
        for status in 0..=255u8 {
            assert_eq!(codec.decode(status), codec.decode(status));
        }
    }

    #[test]
    fn test_decode_with_correction() {
        let codec = VolumeCodec::new(0.8);
        assert_eq!(codec.decode(80).level, 64);
        assert_eq!(codec.decode(81).level, 65); // 64.8 rounds up
        assert_eq!(codec.decode(0).level, 0);

        let half = VolumeCodec::new(0.5);
        assert_eq!(half.decode(33).level, 17);
        assert_eq!(
            half.decode(128 + 33),
            VolumeState {
                muted: true,
                level: 17
            }
        );
    }

    #[test]
    fn test_decode_clamps_to_max_level() {
        let codec = VolumeCodec::new(1.25);
        assert_eq!(codec.decode(100).level, MAX_LEVEL);
        assert_eq!(codec.decode(127).level, MAX_LEVEL);
    }
}
