use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

struct ClockState {
    pinned: Vec<bool>,
    referenced: Vec<bool>,
    hand: usize,
    size: usize,
}

/// CLOCK page replacement policy: a second-chance scan over per-frame
/// `pinned` and `referenced` bits. The hand skips pinned frames, clears a
/// set reference bit on first pass, and evicts on the second.
pub struct ClockReplacer {
    state: Mutex<ClockState>,
    num_frames: usize,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            state: Mutex::new(ClockState {
                pinned: vec![true; pool_size],
                referenced: vec![false; pool_size],
                hand: 0,
                size: 0,
            }),
            num_frames: pool_size,
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.size == 0 {
            return None;
        }
        loop {
            while state.pinned[state.hand] {
                state.hand = (state.hand + 1) % self.num_frames;
            }
            let hand = state.hand;
            if !state.referenced[hand] {
                state.pinned[hand] = true;
                state.size -= 1;
                return Some(hand as FrameId);
            }
            state.referenced[hand] = false;
            state.hand = (hand + 1) % self.num_frames;
        }
    }

    fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let idx = frame_id as usize;
        if state.pinned[idx] {
            return;
        }
        state.pinned[idx] = true;
        state.size -= 1;
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        let idx = frame_id as usize;
        if !state.pinned[idx] {
            return;
        }
        state.pinned[idx] = false;
        state.referenced[idx] = false;
        state.size += 1;
    }

    fn size(&self) -> usize {
        self.state.lock().size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_evicts_in_hand_order() {
        let replacer = ClockReplacer::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.unpin(2);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(0));
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pinned_frames_are_skipped() {
        let replacer = ClockReplacer::new(4);
        replacer.unpin(0);
        replacer.unpin(1);
        replacer.pin(0);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_hand_resumes_after_eviction() {
        let replacer = ClockReplacer::new(3);
        replacer.unpin(0);
        replacer.unpin(1);

        assert_eq!(replacer.victim(), Some(0));
        replacer.unpin(0);
        // the hand is still on frame 0, which was just re-admitted
        assert_eq!(replacer.victim(), Some(0));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_idempotent_pin_unpin() {
        let replacer = ClockReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 1);
        replacer.pin(1);
        replacer.pin(1);
        assert_eq!(replacer.size(), 0);
    }
}
