//! Bounded recency stack of recently seen identifiers
//!
//! Cursor pagination with `before=<id>` silently returns nothing once `<id>`
//! is deleted upstream, and never recovers. Keeping the last few anchors
//! lets a stream fall back to an older one.

use std::collections::VecDeque;

/// Default number of identifiers a stream remembers
pub const DEFAULT_HIGH_WATER_MARK_CAPACITY: usize = 10;

/// Fixed-capacity LIFO stack; the oldest entry is dropped on overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighWaterMark {
    marks: VecDeque<String>,
    capacity: usize,
}

impl HighWaterMark {
    /// Create a stack holding at most `capacity` identifiers (minimum 1).
    ///
    /// `seed` is stored as given, last element on top. A seed longer than
    /// `capacity` is kept whole until the next push trims it.
    pub fn new<I, S>(capacity: usize, seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            marks: seed.into_iter().map(Into::into).collect(),
            capacity: capacity.max(1),
        }
    }

    /// Create an empty stack.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, std::iter::empty::<String>())
    }

    /// Push `id` on top, returning `true` if older entries were evicted.
    pub fn push(&mut self, id: impl Into<String>) -> bool {
        let mut evicted = false;
        while self.marks.len() >= self.capacity {
            self.marks.pop_front();
            evicted = true;
        }
        self.marks.push_back(id.into());
        evicted
    }

    /// Remove and return the most recent identifier.
    pub fn pop(&mut self) -> Option<String> {
        self.marks.pop_back()
    }

    /// The most recent identifier.
    pub fn top(&self) -> Option<&str> {
        self.marks.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Identifiers from most to least recent.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.marks.iter().rev().map(String::as_str)
    }
}

impl Default for HighWaterMark {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HIGH_WATER_MARK_CAPACITY)
    }
}
