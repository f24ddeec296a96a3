//! Recent-value history for the clipboard and primary selections.
//!
//! Two independent ring buffers, newest entry at index 0. Consecutive
//! duplicates are suppressed; non-adjacent duplicates are allowed.

use std::collections::VecDeque;

pub const DEFAULT_HISTORY_MAX: usize = 50;

/// Selection channel a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Which {
    Clipboard,
    Primary,
}

impl Which {
    /// Parse a wire string. Anything that isn't "primary" resolves to the
    /// clipboard channel, matching the CLI default.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("primary") {
            Which::Primary
        } else {
            Which::Clipboard
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Which::Clipboard => "clipboard",
            Which::Primary => "primary",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Which::Clipboard => 0,
            Which::Primary => 1,
        }
    }
}

/// Bounded ring of recent text values, newest first.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    items: VecDeque<String>,
    max_size: usize,
}

impl RingBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(64)),
            max_size: max_size.max(1),
        }
    }

    /// Insert at the front. Empty text and adjacent duplicates are no-ops;
    /// the tail is evicted when the buffer is over capacity.
    pub fn add_front(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.items.front().is_some_and(|front| front.as_str() == text) {
            return;
        }
        self.items.push_front(text.to_string());
        if self.items.len() > self.max_size {
            self.items.pop_back();
        }
    }

    /// Positional read, 0 = most recent.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(String::as_str)
    }

    /// Newest-first snapshot, optionally truncated.
    pub fn list(&self, limit: Option<usize>) -> Vec<String> {
        let n = limit.unwrap_or(self.items.len());
        self.items.iter().take(n).cloned().collect()
    }

    /// Exchange positions 0 and 1. Leaves the buffer untouched and returns
    /// false when fewer than two entries exist.
    pub fn swap_last_two(&mut self) -> bool {
        if self.items.len() < 2 {
            return false;
        }
        self.items.swap(0, 1);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The two per-channel ring buffers.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    clipboard: RingBuffer,
    primary: RingBuffer,
}

impl HistoryStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            clipboard: RingBuffer::new(max_size),
            primary: RingBuffer::new(max_size),
        }
    }

    fn buf(&self, which: Which) -> &RingBuffer {
        match which {
            Which::Clipboard => &self.clipboard,
            Which::Primary => &self.primary,
        }
    }

    fn buf_mut(&mut self, which: Which) -> &mut RingBuffer {
        match which {
            Which::Clipboard => &mut self.clipboard,
            Which::Primary => &mut self.primary,
        }
    }

    pub fn add(&mut self, which: Which, text: &str) {
        self.buf_mut(which).add_front(text);
    }

    pub fn get(&self, which: Which, index: usize) -> Option<&str> {
        self.buf(which).get(index)
    }

    pub fn list(&self, which: Which, limit: Option<usize>) -> Vec<String> {
        self.buf(which).list(limit)
    }

    pub fn swap_last_two(&mut self, which: Which) -> bool {
        self.buf_mut(which).swap_last_two()
    }

    pub fn len(&self, which: Which) -> usize {
        self.buf(which).len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_MAX)
    }
}
