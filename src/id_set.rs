//! Two-generation "seen before" set with bounded memory

use std::collections::HashSet;

/// How many pages worth of identifiers a generation holds before rolling over
pub const GENERATION_PAGES: usize = 10;

/// Membership set split into an old and a new generation.
///
/// When the new generation reaches `10 × page_size` entries it replaces the
/// old one and a fresh generation starts. Steady-state memory stays around
/// `20 × page_size` identifiers; anything older than both generations reads
/// as unseen.
#[derive(Debug, Clone)]
pub struct IdSet {
    old: HashSet<String>,
    new: HashSet<String>,
    threshold: usize,
    rollovers: u64,
}

impl IdSet {
    pub fn new(page_size: usize) -> Self {
        let threshold = page_size.saturating_mul(GENERATION_PAGES).max(1);
        Self {
            old: HashSet::new(),
            new: HashSet::with_capacity(threshold),
            threshold,
            rollovers: 0,
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.new.contains(id) || self.old.contains(id)
    }

    /// Record `id`, rolling the generations over once the new one is full.
    pub fn add(&mut self, id: impl Into<String>) {
        self.new.insert(id.into());
        if self.new.len() >= self.threshold {
            self.old = std::mem::replace(&mut self.new, HashSet::with_capacity(self.threshold));
            self.rollovers += 1;
            log::trace!("id set rolled over (generation {})", self.rollovers);
        }
    }

    /// Identifiers held across both generations.
    pub fn len(&self) -> usize {
        self.old.len() + self.new.len()
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_empty() && self.new.is_empty()
    }

    pub fn generation_len(&self) -> usize {
        self.new.len()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }
}
