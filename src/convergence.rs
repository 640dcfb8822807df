//! Volume convergence
//!
//! CEC has no "set volume to N" message, only volume up/down key presses.
//! `set_volume` closes the gap iteratively: ask the amplifier for its level,
//! pulse towards the target, ask again. Large gaps are halved per round with
//! a held key (fast mode), small gaps are walked one released press at a time.
//! The loop is bounded at 10 rounds and may stop short of the target; the
//! amplifier's step size is not guaranteed to be one unit per press.

use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::bridge::CecBridge;
use crate::cec::LogicalAddress;
use crate::error::Result;
use crate::volume::MAX_LEVEL;

/// Rounds of query/compare/adjust before giving up
pub const MAX_ATTEMPTS: u32 = 10;

/// How long to wait for Report Audio Status after asking
pub const AUDIO_STATUS_TIMEOUT: Duration = Duration::from_millis(200);

/// Spacing between key presses; the bus cannot absorb them faster
pub const PULSE_SPACING: Duration = Duration::from_millis(100);

/// Gaps at least this large are closed in fast mode
pub const FAST_MODE_THRESHOLD: u8 = 10;

/// Give Audio Status
const AUDIO_STATUS_REQUEST: &str = "71";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// How a `set_volume` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Amplifier reported the target level on round `attempts`
    Converged { attempts: u32 },
    /// Attempts ran out; `last_level` is the last level heard, if any
    Exhausted { last_level: Option<u8> },
}

/// Release flags for a held batch of `count` presses: only the last releases
fn release_plan(count: u32) -> impl Iterator<Item = bool> {
    (0..count).map(move |i| i + 1 == count)
}

impl CecBridge {
    /// Move the amplifier towards `target` (0-100). Best effort: returns
    /// normally whether or not the target was reached.
    pub async fn set_volume(&self, target: u8) -> Result<Convergence> {
        let target = target.min(MAX_LEVEL);
        let _operation = self.operation.lock().await;
        let _setting = self.begin_setting_volume();
        debug!("Set volume to {}", target);

        let mut last_level = None;
        for attempt in 1..=MAX_ATTEMPTS {
            debug!("Attempt {} to set volume", attempt);

            let reply = self
                .tracker()
                .expect_audio_status(LogicalAddress::AUDIO_SYSTEM, self.own_address());
            self.transmit(AUDIO_STATUS_REQUEST, Some(LogicalAddress::AUDIO_SYSTEM))
                .await?;

            let current = match timeout(AUDIO_STATUS_TIMEOUT, reply).await {
                Ok(Ok(state)) => state.level,
                _ => {
                    warn!("No audio status from the audio system, retrying");
                    continue;
                }
            };
            last_level = Some(current);

            if current == target {
                info!("Volume reached {} after {} attempt(s)", target, attempt);
                return Ok(Convergence::Converged { attempts: attempt });
            }

            let direction = if current < target {
                Direction::Up
            } else {
                Direction::Down
            };
            let diff = current.abs_diff(target);
            debug!("Difference in volume is {}", diff);

            if diff >= FAST_MODE_THRESHOLD {
                let presses = u32::from(diff).div_ceil(2);
                debug!("Changing fast with {}", presses);
                self.pulse_batch(direction, presses, true).await?;
            } else {
                debug!("Changing slow with {}", diff);
                self.pulse_batch(direction, u32::from(diff), false).await?;
            }
        }

        warn!(
            "Volume did not reach {} within {} attempts (last heard {:?})",
            target, MAX_ATTEMPTS, last_level
        );
        Ok(Convergence::Exhausted { last_level })
    }

    pub async fn volume_up(&self, amount: u32, update: bool) -> Result<()> {
        self.volume_step(Direction::Up, amount, update).await
    }

    pub async fn volume_down(&self, amount: u32, update: bool) -> Result<()> {
        self.volume_step(Direction::Down, amount, update).await
    }

    /// `amount` presses, then optionally ask the amplifier to report back
    async fn volume_step(&self, direction: Direction, amount: u32, update: bool) -> Result<()> {
        let _operation = self.operation.lock().await;
        debug!("Volume {:?} with {}", direction, amount);
        self.pulse_batch(direction, amount, amount >= u32::from(FAST_MODE_THRESHOLD))
            .await?;

        if update {
            self.transmit(AUDIO_STATUS_REQUEST, Some(LogicalAddress::AUDIO_SYSTEM))
                .await?;
        }
        Ok(())
    }

    /// Send `count` presses spaced by `PULSE_SPACING`. With `hold` only the
    /// last press is released.
    async fn pulse_batch(&self, direction: Direction, count: u32, hold: bool) -> Result<()> {
        let releases: Vec<bool> = if hold {
            release_plan(count).collect()
        } else {
            vec![true; count as usize]
        };

        for release in releases {
            {
                let bus = self.bus().await;
                match direction {
                    Direction::Up => bus.volume_up(release).await?,
                    Direction::Down => bus.volume_down(release).await?,
                }
            }
            sleep(PULSE_SPACING).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::Pulse;
    use crate::bridge::tests::create_test_bridge;
    use crate::bridge::BridgeSettings;

    /// Split recorded pulses into batches, one batch ending at each release
    /// for held batches, single presses otherwise
    fn batch_sizes(pulses: &[Pulse]) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut current = 0;
        for pulse in pulses {
            current += 1;
            if pulse.release {
                sizes.push(current);
                current = 0;
            }
        }
        sizes
    }

    #[test]
    fn test_release_plan() {
        assert_eq!(release_plan(3).collect::<Vec<_>>(), vec![false, false, true]);
        let held: Vec<_> = release_plan(10).collect();
        assert_eq!(held.iter().filter(|r| **r).count(), 1);
        assert!(held[9]);
        assert_eq!(release_plan(0).count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_at_target_sends_no_pulses() {
        let t = create_test_bridge(BridgeSettings::default());
        t.mock.set_volume(35);

        let outcome = t.bridge.set_volume(35).await.unwrap();

        assert_eq!(outcome, Convergence::Converged { attempts: 1 });
        assert_eq!(t.mock.audio_requests(), 1);
        assert!(t.mock.pulses().is_empty());
        assert!(!t.bridge.is_setting_volume());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forty_unit_gap_halves_then_walks() {
        let t = create_test_bridge(BridgeSettings::default());
        t.mock.set_volume(20);

        let outcome = t.bridge.set_volume(60).await.unwrap();

        // 40 -> 20 held presses, 20 -> 10, 10 -> 5, then 5 single presses
        let pulses = t.mock.pulses();
        assert!(pulses.iter().all(|p| p.direction == Direction::Up));
        let mut expected = vec![20, 10, 5];
        expected.extend(vec![1; 5]);
        assert_eq!(batch_sizes(&pulses), expected);

        assert_eq!(outcome, Convergence::Converged { attempts: 5 });
        assert_eq!(t.mock.volume(), 60);
        assert!(t.mock.audio_requests() <= MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowering_volume_pulses_down() {
        let t = create_test_bridge(BridgeSettings::default());
        t.mock.set_volume(50);

        let outcome = t.bridge.set_volume(47).await.unwrap();

        assert_eq!(outcome, Convergence::Converged { attempts: 2 });
        let pulses = t.mock.pulses();
        assert_eq!(pulses.len(), 3);
        assert!(pulses
            .iter()
            .all(|p| p.direction == Direction::Down && p.release));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_amplifier_exhausts_attempts() {
        let t = create_test_bridge(BridgeSettings::default());
        t.mock.with(|s| s.answer_audio_requests = false);

        let outcome = t.bridge.set_volume(40).await.unwrap();

        assert_eq!(outcome, Convergence::Exhausted { last_level: None });
        assert_eq!(t.mock.audio_requests(), MAX_ATTEMPTS as usize);
        assert!(t.mock.pulses().is_empty());
        assert!(!t.bridge.is_setting_volume());
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_up_single_press_then_update() {
        let t = create_test_bridge(BridgeSettings::default());

        t.bridge.volume_up(1, true).await.unwrap();

        assert_eq!(
            t.mock.pulses(),
            vec![Pulse {
                direction: Direction::Up,
                release: true
            }]
        );
        assert_eq!(t.mock.transmits(), vec!["15:71"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_down_large_amount_holds_key() {
        let t = create_test_bridge(BridgeSettings::default());
        t.mock.set_volume(50);

        t.bridge.volume_down(12, false).await.unwrap();

        let pulses = t.mock.pulses();
        assert_eq!(batch_sizes(&pulses), vec![12]);
        assert_eq!(t.mock.volume(), 38);
        assert!(t.mock.transmits().is_empty());
    }
}
