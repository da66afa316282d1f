use std::collections::{BTreeMap, HashMap};

use crate::common::{FrameId, Timestamp};

/// LRU Replacement Policy over unpinned frames.
///
/// A frame becomes a candidate when its pin count drops to 0 and is stamped
/// with the time that happened. The victim is the frame that has been
/// unpinned the longest. Pinning a frame removes it from consideration.
///
/// The replacer is not synchronized; the buffer pool keeps it behind its
/// pool latch.
pub struct LruReplacer {
    /// Maximum number of frames the replacer can track
    max_frames: usize,
    /// Current timestamp (monotonically increasing)
    current_timestamp: Timestamp,
    /// Evictable frames ordered by the time they were unpinned
    by_age: BTreeMap<Timestamp, FrameId>,
    /// Unpin timestamp of each evictable frame
    stamps: HashMap<FrameId, Timestamp>,
}

impl LruReplacer {
    /// Creates a new LRU replacer for a pool of `max_frames` frames.
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames,
            current_timestamp: 0,
            by_age: BTreeMap::new(),
            stamps: HashMap::with_capacity(max_frames),
        }
    }

    /// Evicts the least-recently-unpinned frame.
    /// Returns None if there are no evictable frames.
    pub fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.by_age.pop_first()?;
        self.stamps.remove(&frame_id);
        Some(frame_id)
    }

    /// Sets whether a frame is evictable.
    /// Marking an already evictable frame keeps its original stamp.
    pub fn set_evictable(&mut self, frame_id: FrameId, is_evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        if is_evictable {
            if self.stamps.contains_key(&frame_id) {
                return;
            }
            let timestamp = self.current_timestamp;
            self.current_timestamp += 1;
            self.stamps.insert(frame_id, timestamp);
            self.by_age.insert(timestamp, frame_id);
        } else {
            self.remove(frame_id);
        }
    }

    /// Removes a frame from the replacer entirely.
    /// This should be called when a page is deleted from the BufferPoolManager.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(timestamp) = self.stamps.remove(&frame_id) {
            self.by_age.remove(&timestamp);
        }
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.stamps.len()
    }
}
