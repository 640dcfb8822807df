//! Request/reply matching for bus queries
//!
//! A query (e.g. Give Device Power Status to 4) is answered by a frame with
//! a known opcode from the queried device. The caller registers what it
//! expects before transmitting and awaits the receiver; the reader task
//! offers every received frame to `route`.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cec::{CecFrame, LogicalAddress, Opcode};

struct Pending {
    /// `None` accepts the reply from any initiator
    from: Option<LogicalAddress>,
    opcode: Opcode,
    tx: oneshot::Sender<CecFrame>,
}

#[derive(Default)]
pub struct ReplyRouter {
    pending: Mutex<Vec<Pending>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next `opcode` frame from `from`
    pub fn expect(&self, from: Option<LogicalAddress>, opcode: Opcode) -> oneshot::Receiver<CecFrame> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        // Waiters whose caller gave up are dead weight
        pending.retain(|p| !p.tx.is_closed());
        pending.push(Pending { from, opcode, tx });
        rx
    }

    /// Hand `frame` to the oldest matching waiter. Returns whether one took it.
    pub fn route(&self, frame: &CecFrame) -> bool {
        let mut pending = self.pending.lock();
        let matched = pending.iter().position(|p| {
            p.opcode == frame.opcode && p.from.map_or(true, |from| from == frame.initiator)
        });
        match matched {
            Some(index) => pending.remove(index).tx.send(frame.clone()).is_ok(),
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> CecFrame {
        CecFrame::parse(text).unwrap()
    }

    #[tokio::test]
    async fn test_reply_matched_by_opcode_and_initiator() {
        let router = ReplyRouter::new();
        let tv = router.expect(Some(LogicalAddress::TV), Opcode::ReportPowerStatus);
        let player = router.expect(LogicalAddress::new(4), Opcode::ReportPowerStatus);

        assert!(router.route(&frame("41:90:01")));
        assert!(router.route(&frame("01:90:00")));

        assert_eq!(player.await.unwrap().operand(), Some(0x01));
        assert_eq!(tv.await.unwrap().operand(), Some(0x00));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn test_any_initiator() {
        let router = ReplyRouter::new();
        let rx = router.expect(None, Opcode::ActiveSource);

        assert!(router.route(&frame("4f:82:10:00")));
        assert_eq!(rx.await.unwrap().initiator.value(), 4);
    }

    #[test]
    fn test_unmatched_frame_not_routed() {
        let router = ReplyRouter::new();
        let _rx = router.expect(Some(LogicalAddress::TV), Opcode::SetOsdName);

        assert!(!router.route(&frame("01:90:00")));
        assert!(!router.route(&frame("41:47:41")));
        assert_eq!(router.pending(), 1);
    }

    #[test]
    fn test_abandoned_waiters_are_pruned() {
        let router = ReplyRouter::new();
        drop(router.expect(Some(LogicalAddress::TV), Opcode::SetOsdName));
        let _rx = router.expect(Some(LogicalAddress::TV), Opcode::CecVersion);

        assert_eq!(router.pending(), 1);
    }
}
