//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not (pinned).
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Combined operation: records access and pins the frame (sets
    /// non-evictable). Single lock acquisition instead of two calls.
    fn access_and_pin(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// LRU-K replacement algorithm.
///
/// Evicts the evictable frame with the largest backward k-distance: the
/// gap between now and the k-th most recent access. Frames with fewer
/// than k recorded accesses have infinite distance and are preferred as
/// victims, tie-broken by earliest recorded access.
pub struct LruKReplacer {
    k: usize,
    num_frames: usize,
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    /// Logical clock, bumped on every recorded access.
    clock: u64,
    nodes: HashMap<FrameId, LruKNode>,
    evictable_count: usize,
}

struct LruKNode {
    /// Up to k most recent access timestamps, oldest first.
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer over `num_frames` frames.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            num_frames,
            inner: Mutex::new(LruKInner {
                clock: 0,
                nodes: HashMap::with_capacity(num_frames),
                evictable_count: 0,
            }),
        }
    }

    /// Returns the total frame capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Returns the configured history depth.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    fn record_access_locked(&self, inner: &mut LruKInner, frame_id: FrameId) {
        inner.clock += 1;
        let clock = inner.clock;
        let node = inner.nodes.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(self.k),
            evictable: false,
        });
        node.history.push_back(clock);
        if node.history.len() > self.k {
            node.history.pop_front();
        }
    }

    fn set_evictable_locked(inner: &mut LruKInner, frame_id: FrameId, evictable: bool) {
        if let Some(node) = inner.nodes.get_mut(&frame_id) {
            if node.evictable != evictable {
                node.evictable = evictable;
                if evictable {
                    inner.evictable_count += 1;
                } else {
                    inner.evictable_count -= 1;
                }
            }
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        Self::set_evictable_locked(&mut inner, frame_id, evictable);
    }

    fn access_and_pin(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        self.record_access_locked(&mut inner, frame_id);
        Self::set_evictable_locked(&mut inner, frame_id, false);
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }

        // Prefer frames with infinite backward distance (< k accesses),
        // earliest first access wins; otherwise the oldest k-th access.
        let mut victim: Option<(FrameId, bool, u64)> = None;
        for (&frame_id, node) in inner.nodes.iter() {
            if !node.evictable {
                continue;
            }
            let infinite = node.history.len() < self.k;
            let oldest = node.history.front().copied().unwrap_or(0);
            let better = match victim {
                None => true,
                Some((_, v_infinite, v_oldest)) => {
                    (infinite && !v_infinite) || (infinite == v_infinite && oldest < v_oldest)
                }
            };
            if better {
                victim = Some((frame_id, infinite, oldest));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.nodes.remove(&frame_id);
        inner.evictable_count -= 1;
        Some(frame_id)
    }

    fn remove(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) >= self.num_frames {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(node) = inner.nodes.remove(&frame_id) {
            if node.evictable {
                inner.evictable_count -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_evict_empty() {
        let replacer = LruKReplacer::new(10, 2);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_evict_single() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(5));
        replacer.set_evictable(FrameId(5), true);
        assert_eq!(replacer.size(), 1);

        assert_eq!(replacer.evict(), Some(FrameId(5)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_infinite_distance_preferred() {
        let replacer = LruKReplacer::new(10, 2);

        // Frame 0 has two accesses (finite distance), frame 1 only one.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_lru_k_infinite_tie_break_earliest_access() {
        let replacer = LruKReplacer::new(10, 3);

        replacer.record_access(FrameId(2));
        replacer.record_access(FrameId(7));
        replacer.set_evictable(FrameId(2), true);
        replacer.set_evictable(FrameId(7), true);

        // Both have < k accesses; the earlier first access is evicted first.
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(7)));
    }

    #[test]
    fn test_lru_k_distance_ordering() {
        let replacer = LruKReplacer::new(10, 2);

        // Access order: f0, f1, f0, f1 -> f0's 2nd-most-recent access is
        // older than f1's, so f0 is the larger-distance victim.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);

        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_lru_k_pinned_not_evicted() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), false);

        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_access_and_pin() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.access_and_pin(FrameId(0));
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_remove() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);
        assert_eq!(replacer.size(), 2);

        replacer.remove(FrameId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_lru_k_out_of_bounds() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(FrameId(100));
        replacer.set_evictable(FrameId(100), true);
        replacer.remove(FrameId(100));

        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_reaccess_after_evict() {
        let replacer = LruKReplacer::new(5, 2);

        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.evict(), Some(FrameId(0)));

        // The frame starts fresh after eviction.
        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }
}
