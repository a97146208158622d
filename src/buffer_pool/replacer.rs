use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::FrameId;

/// A frame's bookkeeping node: the timestamps of its `k` most recent
/// accesses, most-recent first, and whether it is a candidate for eviction.
#[derive(Debug)]
struct LruKNode {
    history: VecDeque<i64>,
    is_evictable: bool,
}

#[derive(Debug)]
struct Inner {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: i64,
    curr_size: usize,
    k: usize,
}

/// LRU-K replacement policy (O'Neil et al.): evicts the evictable frame with
/// the largest backward k-distance, the gap between now and the frame's
/// k-th most recent access. A frame with fewer than `k` recorded accesses
/// has an infinite k-distance and is always preferred over one that has
/// reached `k`. Ties are broken by the oldest remembered access.
///
/// Grounded on `examples/original_source/src/buffer/lru_k_replacer.cpp`
/// (the teacher's own `buffer_pool::replacer::LRU` is a plain LRU built on a
/// `priority_queue::PriorityQueue` and does not implement k-distance at all).
/// Operations are serialized under a single internal mutex, matching the
/// teacher's replacer's self-contained locking style.
#[derive(Debug)]
pub struct LruKReplacer {
    inner: Mutex<Inner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                node_store: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                curr_size: 0,
                k,
            }),
        }
    }

    /// Records a reference to `frame_id` at the current timestamp, creating
    /// its node (non-evictable) if this is the first time it's seen.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let ts = inner.current_timestamp;
        let k = inner.k;

        let node = inner
            .node_store
            .entry(frame_id)
            .or_insert_with(|| LruKNode {
                history: VecDeque::with_capacity(k),
                is_evictable: false,
            });

        node.history.push_front(ts);
        if node.history.len() > k {
            node.history.pop_back();
        }
    }

    /// Toggles whether `frame_id` may be evicted. No-op if the frame is
    /// untracked or already in the requested state.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            inner.curr_size += 1;
        } else {
            inner.curr_size -= 1;
        }
    }

    /// Removes `frame_id` from tracking entirely. No-op if untracked;
    /// asserts in debug builds if the frame is not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.node_store.get(&frame_id) else {
            return;
        };
        debug_assert!(node.is_evictable, "removing a non-evictable frame");
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Selects and removes the victim frame with the largest k-distance,
    /// breaking ties by the oldest remembered access. `None` if no frame is
    /// currently evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        let k = inner.k;
        let now = inner.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_is_inf = false;
        let mut victim_dist = 0i64;
        let mut victim_ts = i64::MAX;

        for (&frame_id, node) in inner.node_store.iter() {
            if !node.is_evictable {
                continue;
            }

            let is_inf = node.history.len() < k;
            // history is most-recent-first; the k-th most recent access is
            // at index k-1, or the oldest recorded one if history is short.
            let ts = if is_inf {
                *node.history.back().unwrap()
            } else {
                node.history[k - 1]
            };
            let dist = if is_inf { i64::MAX } else { now - ts };

            let better = match victim {
                None => true,
                Some(_) if is_inf != victim_is_inf => is_inf,
                Some(_) if is_inf => ts < victim_ts,
                Some(_) => dist > victim_dist || (dist == victim_dist && ts < victim_ts),
            };

            if better {
                victim = Some(frame_id);
                victim_is_inf = is_inf;
                victim_dist = dist;
                victim_ts = ts;
            }
        }

        if let Some(frame_id) = victim {
            inner.node_store.remove(&frame_id);
            inner.curr_size -= 1;
        }

        victim
    }

    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_eviction_order() {
        // Mirrors the spec's concrete scenario 1 with K=2.
        let replacer = LruKReplacer::new(8, 2);

        for frame_id in [1, 2, 3, 4, 1, 2, 3, 1, 2, 5, 4] {
            replacer.record_access(frame_id);
        }
        for frame_id in [1, 2, 3, 4, 5] {
            replacer.set_evictable(frame_id, true);
        }

        assert_eq!(replacer.size(), 5);
        // Frame 5 has been seen only once (at t=10) -> infinite k-distance,
        // the only frame with fewer than K accesses, so it goes first.
        assert_eq!(replacer.evict(), Some(5));
        // Among the rest, backward k-distance (now=11) is 3:8, 4:7, 1:6, 2:5.
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    fn test_set_evictable_is_idempotent_noop_on_untracked() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.set_evictable(99, true); // untracked frame id: no-op
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_evict_returns_none_when_nothing_evictable() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_remove_is_noop_on_untracked_frame() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.remove(42);
        assert_eq!(replacer.size(), 0);
    }
}
