use rustc_hash::FxHashSet;
use tracing::trace;

/// Detects duplicates among reliable message indices. Indices are accepted inside
///  `[start, end]` if they were not seen before; the window slides forward as soon as its lowest
///  index was seen, so memory is bounded by the window size.
pub struct ReliableWindow {
    start: u32,
    end: u32,
    seen: FxHashSet<u32>,
}

impl ReliableWindow {
    pub fn new(window_size: u32) -> ReliableWindow {
        ReliableWindow {
            start: 0,
            end: window_size,
            seen: FxHashSet::default(),
        }
    }

    /// returns `true` if the index is new, `false` for duplicates and indices outside the window
    #[must_use]
    pub fn insert(&mut self, index: u32) -> bool {
        if index < self.start || index > self.end {
            trace!("message index {} outside of reliable window [{}, {}]", index, self.start, self.end);
            return false;
        }
        if !self.seen.insert(index) {
            return false;
        }

        if index == self.start {
            while self.seen.remove(&self.start) {
                self.start += 1;
                self.end += 1;
            }
        }
        true
    }
}
