use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

/// LRU page replacement policy: frames become candidates in unpin order,
/// and the coldest candidate is evicted first. The ordered map gives O(1)
/// membership checks alongside the recency order.
pub struct LruReplacer {
    candidates: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(_pool_size: usize) -> Self {
        Self {
            candidates: Mutex::new(LinkedHashMap::new()),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut candidates = self.candidates.lock();
        candidates.pop_front().map(|(frame_id, _)| frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        self.candidates.lock().remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut candidates = self.candidates.lock();
        // A frame already waiting keeps its place in line.
        if candidates.contains_key(&frame_id) {
            return;
        }
        candidates.insert(frame_id, ());
    }

    fn size(&self) -> usize {
        self.candidates.lock().len()
    }
}
