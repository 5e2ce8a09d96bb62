//! Configuration types for polling streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StreamError, StreamResult};
use crate::high_water_mark::{HighWaterMark, DEFAULT_HIGH_WATER_MARK_CAPACITY};
use crate::stream_types::{FetchFn, KeyFn};

/// How often a stream polls unless told otherwise
pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(5);

/// Items requested per fetch; Reddit caps listings at 100
pub const ITEM_LIMIT: usize = 100;

/// Capacity of each output channel. A send blocks once this many items wait.
pub const DEFAULT_BUFFER: usize = 1;

/// Tunables of one polling stream.
///
/// Every setter ignores values that make no sense and keeps the previous
/// value instead of failing.
pub struct StreamConfig<T> {
    pub interval: Duration,
    pub discard_initial: bool,
    /// Fetch attempts before the stream ends on its own; 0 = unbounded
    pub max_requests: u64,
    /// Cursor used until the stream has seen an item of its own
    pub start_from: Option<String>,
    pub fetch: Option<FetchFn<T>>,
    pub high_water_mark_capacity: usize,
    pub high_water_mark_seed: Vec<String>,
    pub page_size: usize,
    pub buffer: usize,
    /// Empty pages in a row, fetched with a cursor, before falling back to
    /// the previous anchor; 0 disables the fallback
    pub stale_cursor_after: u32,
    pub dedup_key: Option<KeyFn<T>>,
}

impl<T> std::fmt::Debug for StreamConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("interval", &self.interval)
            .field("discard_initial", &self.discard_initial)
            .field("max_requests", &self.max_requests)
            .field("start_from", &self.start_from)
            .field("fetch", &if self.fetch.is_some() { "Some(FetchFn)" } else { "None" })
            .field("high_water_mark_capacity", &self.high_water_mark_capacity)
            .field("high_water_mark_seed", &self.high_water_mark_seed)
            .field("page_size", &self.page_size)
            .field("buffer", &self.buffer)
            .field("stale_cursor_after", &self.stale_cursor_after)
            .field(
                "dedup_key",
                &if self.dedup_key.is_some() { "Some(KeyFn)" } else { "None" },
            )
            .finish()
    }
}

impl<T> Clone for StreamConfig<T> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            discard_initial: self.discard_initial,
            max_requests: self.max_requests,
            start_from: self.start_from.clone(),
            fetch: self.fetch.clone(),
            high_water_mark_capacity: self.high_water_mark_capacity,
            high_water_mark_seed: self.high_water_mark_seed.clone(),
            page_size: self.page_size,
            buffer: self.buffer,
            stale_cursor_after: self.stale_cursor_after,
            dedup_key: self.dedup_key.clone(),
        }
    }
}

impl<T> Default for StreamConfig<T> {
    fn default() -> Self {
        Self {
            interval: DEFAULT_STREAM_INTERVAL,
            discard_initial: false,
            max_requests: 0,
            start_from: None,
            fetch: None,
            high_water_mark_capacity: DEFAULT_HIGH_WATER_MARK_CAPACITY,
            high_water_mark_seed: Vec::new(),
            page_size: ITEM_LIMIT,
            buffer: DEFAULT_BUFFER,
            stale_cursor_after: 0,
            dedup_key: None,
        }
    }
}

impl<T> StreamConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a list of options, applied in order.
    pub fn from_opts(opts: impl IntoIterator<Item = StreamOpt<T>>) -> Self {
        Self::default().with_opts(opts)
    }

    /// Apply options on top of this configuration, in order.
    pub fn with_opts(self, opts: impl IntoIterator<Item = StreamOpt<T>>) -> Self {
        opts.into_iter().fold(self, |config, opt| opt.apply(config))
    }

    /// Set the polling interval. Zero keeps the current interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Drop everything the first non-empty page returns.
    pub fn discard_initial(mut self, discard: bool) -> Self {
        self.discard_initial = discard;
        self
    }

    /// Limit the number of fetch attempts. Values `<= 0` are ignored.
    pub fn max_requests(mut self, max: i64) -> Self {
        if max > 0 {
            self.max_requests = max as u64;
        }
        self
    }

    pub fn start_from(mut self, cursor: impl Into<String>) -> Self {
        self.start_from = Some(cursor.into());
        self
    }

    pub fn fetch_with(mut self, fetch: FetchFn<T>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    /// Size and pre-seed the recency stack. A zero capacity is ignored.
    pub fn high_water_mark<I, S>(mut self, capacity: usize, seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if capacity > 0 {
            self.high_water_mark_capacity = capacity;
            self.high_water_mark_seed = seed.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        if page_size > 0 {
            self.page_size = page_size;
        }
        self
    }

    pub fn buffer(mut self, buffer: usize) -> Self {
        if buffer > 0 {
            self.buffer = buffer;
        }
        self
    }

    pub fn stale_cursor_after(mut self, empty_pages: u32) -> Self {
        self.stale_cursor_after = empty_pages;
        self
    }

    pub fn dedup_key(mut self, key: KeyFn<T>) -> Self {
        self.dedup_key = Some(key);
        self
    }

    /// Whether the stream runs until cancelled.
    pub fn is_unbounded(&self) -> bool {
        self.max_requests == 0
    }

    pub(crate) fn build_high_water_mark(&self) -> HighWaterMark {
        HighWaterMark::new(
            self.high_water_mark_capacity,
            self.high_water_mark_seed.iter().cloned(),
        )
    }
}

/// A single stream option, mirroring the [`StreamConfig`] setters
pub enum StreamOpt<T> {
    Interval(Duration),
    DiscardInitial,
    MaxRequests(i64),
    StartFrom(String),
    FetchWith(FetchFn<T>),
    HighWaterMark { capacity: usize, seed: Vec<String> },
    PageSize(usize),
    Buffer(usize),
    StaleCursorAfter(u32),
    DedupKey(KeyFn<T>),
}

impl<T> StreamOpt<T> {
    pub fn apply(self, config: StreamConfig<T>) -> StreamConfig<T> {
        match self {
            StreamOpt::Interval(interval) => config.interval(interval),
            StreamOpt::DiscardInitial => config.discard_initial(true),
            StreamOpt::MaxRequests(max) => config.max_requests(max),
            StreamOpt::StartFrom(cursor) => config.start_from(cursor),
            StreamOpt::FetchWith(fetch) => config.fetch_with(fetch),
            StreamOpt::HighWaterMark { capacity, seed } => config.high_water_mark(capacity, seed),
            StreamOpt::PageSize(page_size) => config.page_size(page_size),
            StreamOpt::Buffer(buffer) => config.buffer(buffer),
            StreamOpt::StaleCursorAfter(n) => config.stale_cursor_after(n),
            StreamOpt::DedupKey(key) => config.dedup_key(key),
        }
    }
}

impl<T> std::fmt::Debug for StreamOpt<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOpt::Interval(d) => f.debug_tuple("Interval").field(d).finish(),
            StreamOpt::DiscardInitial => f.write_str("DiscardInitial"),
            StreamOpt::MaxRequests(n) => f.debug_tuple("MaxRequests").field(n).finish(),
            StreamOpt::StartFrom(c) => f.debug_tuple("StartFrom").field(c).finish(),
            StreamOpt::FetchWith(_) => f.write_str("FetchWith(..)"),
            StreamOpt::HighWaterMark { capacity, seed } => f
                .debug_struct("HighWaterMark")
                .field("capacity", capacity)
                .field("seed", seed)
                .finish(),
            StreamOpt::PageSize(n) => f.debug_tuple("PageSize").field(n).finish(),
            StreamOpt::Buffer(n) => f.debug_tuple("Buffer").field(n).finish(),
            StreamOpt::StaleCursorAfter(n) => f.debug_tuple("StaleCursorAfter").field(n).finish(),
            StreamOpt::DedupKey(_) => f.write_str("DedupKey(..)"),
        }
    }
}

/// Plain-data stream settings, e.g. loaded from a JSON config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub interval_ms: u64,
    pub discard_initial: bool,
    pub max_requests: i64,
    pub start_from: Option<String>,
    pub high_water_mark_capacity: usize,
    pub high_water_mark_seed: Vec<String>,
    pub page_size: usize,
    pub buffer: usize,
    pub stale_cursor_after: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_STREAM_INTERVAL.as_millis() as u64,
            discard_initial: false,
            max_requests: 0,
            start_from: None,
            high_water_mark_capacity: DEFAULT_HIGH_WATER_MARK_CAPACITY,
            high_water_mark_seed: Vec::new(),
            page_size: ITEM_LIMIT,
            buffer: DEFAULT_BUFFER,
            stale_cursor_after: 0,
        }
    }
}

impl StreamSettings {
    pub fn from_json(json: &str) -> StreamResult<Self> {
        serde_json::from_str(json).map_err(|e| StreamError::InvalidConfiguration(e.to_string()))
    }

    /// Validate the settings
    pub fn validate(&self) -> StreamResult<()> {
        if self.interval_ms == 0 {
            return Err(StreamError::InvalidConfiguration(
                "interval cannot be zero".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(StreamError::InvalidConfiguration(
                "page size cannot be zero".to_string(),
            ));
        }
        if self.buffer == 0 {
            return Err(StreamError::InvalidConfiguration(
                "buffer cannot be zero".to_string(),
            ));
        }
        if self.high_water_mark_capacity == 0 {
            return Err(StreamError::InvalidConfiguration(
                "high water mark capacity cannot be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Turn the settings into a configuration. The fetch function still has
    /// to be supplied by the caller or the stream service.
    pub fn into_config<T>(self) -> StreamConfig<T> {
        let config = StreamConfig::new()
            .interval(Duration::from_millis(self.interval_ms))
            .discard_initial(self.discard_initial)
            .max_requests(self.max_requests)
            .high_water_mark(self.high_water_mark_capacity, self.high_water_mark_seed)
            .page_size(self.page_size)
            .buffer(self.buffer)
            .stale_cursor_after(self.stale_cursor_after);
        match self.start_from {
            Some(cursor) => config.start_from(cursor),
            None => config,
        }
    }
}
