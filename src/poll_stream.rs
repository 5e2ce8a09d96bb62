//! Poll-stream engine
//!
//! Turns a "fetch the latest page" function into a continuous stream of new
//! items. One tokio task per stream ticks on a fixed interval, fetches a
//! page, drops everything already delivered and forwards the rest over
//! bounded channels. The task owns all dedup state, so nothing here locks.
//!
//! A stream ends when the caller's [`CancellationToken`] fires, when its
//! request budget runs out, when every item receiver is gone, or when
//! [`StopHandle::stop`] is called. Channels close exactly once in every
//! case.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, StreamResult};
use crate::high_water_mark::HighWaterMark;
use crate::id_set::IdSet;
use crate::stream_configuration::StreamConfig;
use crate::stream_types::{
    FetchFn, FetchRequest, ItemStream, KeyFn, Route, Routed, Streamable,
};

/// Capacity of the error channel. Errors beyond it are dropped while the
/// receiver lags; they never hold up item delivery.
pub const ERROR_BUFFER: usize = 16;

/// Longest usable poll interval; longer ones are clamped to it.
pub const MAX_INTERVAL: Duration = Duration::from_secs(86400 * 365 * 30);

/// Lifecycle of a stream's engine task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Spawned, task not yet running
    Idle = 0,
    /// Ticking and fetching
    Running = 1,
    /// Shutdown decided, channels about to close
    Draining = 2,
    /// Channels closed, task finished
    Stopped = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Idle,
            1 => EngineState::Running,
            2 => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }
}

/// How a page is split into dedup passes for two-channel streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneMode {
    /// The whole page is one pass; the first seen item ends it
    #[default]
    Shared,
    /// Every route is its own pass over the page, in page order
    PerRoute,
}

struct Shared {
    closed: AtomicBool,
    stop: CancellationToken,
    state: AtomicU8,
    requests: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            stop: CancellationToken::new(),
            state: AtomicU8::new(EngineState::Idle as u8),
            requests: AtomicU64::new(0),
        }
    }

    /// One-shot shutdown guard. Returns `true` for the single caller that
    /// actually performed the shutdown.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.store(EngineState::Draining as u8, Ordering::Release);
        self.stop.cancel();
        true
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Stops a stream. Cheap to clone, safe to call from any task, any number
/// of times.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Stop the stream and close its channels.
    ///
    /// Returns `true` only for the call that performed the shutdown; every
    /// later or concurrent call is a no-op returning `false`. A blocked send
    /// is abandoned, an in-flight fetch is allowed to finish first.
    pub fn stop(&self) -> bool {
        let first = self.shared.close();
        if first {
            debug!("stream stop requested");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Fetch attempts made so far, failed ones included
    pub fn requests(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("state", &self.state())
            .field("requests", &self.requests())
            .finish()
    }
}

struct StopOnDrop(StopHandle);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// A running single-channel stream
#[derive(Debug)]
pub struct StreamHandle<T> {
    pub items: mpsc::Receiver<T>,
    pub errors: mpsc::Receiver<StreamError>,
    pub stop: StopHandle,
}

impl<T> StreamHandle<T>
where
    T: Send + 'static,
{
    pub fn into_parts(self) -> (mpsc::Receiver<T>, mpsc::Receiver<StreamError>, StopHandle) {
        (self.items, self.errors, self.stop)
    }

    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    /// Merge items and errors into one stream.
    ///
    /// The stream ends once the engine has closed both channels. Dropping it
    /// stops the engine.
    pub fn into_stream(self) -> ItemStream<StreamResult<T>> {
        let StreamHandle {
            mut items,
            mut errors,
            stop,
        } = self;

        let guard = StopOnDrop(stop);
        stream! {
            let _guard = guard;
            let mut items_open = true;
            let mut errors_open = true;

            while items_open || errors_open {
                tokio::select! {
                    item = items.recv(), if items_open => match item {
                        Some(item) => yield Ok(item),
                        None => items_open = false,
                    },
                    err = errors.recv(), if errors_open => match err {
                        Some(err) => yield Err(err),
                        None => errors_open = false,
                    },
                }
            }
        }
        .boxed()
    }
}

/// A running stream that routes items to one of two channels
#[derive(Debug)]
pub struct SplitStreamHandle<A, B> {
    pub first: mpsc::Receiver<A>,
    pub second: mpsc::Receiver<B>,
    pub errors: mpsc::Receiver<StreamError>,
    pub stop: StopHandle,
}

impl<A, B> SplitStreamHandle<A, B> {
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<A>,
        mpsc::Receiver<B>,
        mpsc::Receiver<StreamError>,
        StopHandle,
    ) {
        (self.first, self.second, self.errors, self.stop)
    }

    pub fn stop(&self) -> bool {
        self.stop.stop()
    }
}

/// Every item receiver is gone
#[derive(Debug)]
struct Disconnected;

#[async_trait]
trait Emitter<T: Send + 'static>: Send + Sync {
    fn route(&self, item: &T) -> Route;

    async fn emit(&self, item: T) -> Result<(), Disconnected>;
}

struct SingleOutput<T> {
    items: mpsc::Sender<T>,
}

#[async_trait]
impl<T: Send + 'static> Emitter<T> for SingleOutput<T> {
    fn route(&self, _item: &T) -> Route {
        Route::First
    }

    async fn emit(&self, item: T) -> Result<(), Disconnected> {
        self.items.send(item).await.map_err(|_| Disconnected)
    }
}

struct SplitOutput<A, B> {
    first: mpsc::Sender<A>,
    second: mpsc::Sender<B>,
}

#[async_trait]
impl<A, B> Emitter<Routed<A, B>> for SplitOutput<A, B>
where
    A: Send + 'static,
    B: Send + 'static,
{
    fn route(&self, item: &Routed<A, B>) -> Route {
        item.route()
    }

    async fn emit(&self, item: Routed<A, B>) -> Result<(), Disconnected> {
        let sent = match item {
            Routed::First(a) => self.first.send(a).await.is_ok(),
            Routed::Second(b) => self.second.send(b).await.is_ok(),
        };
        // A dropped receiver only loses its own items while the other one listens.
        if sent || !(self.first.is_closed() && self.second.is_closed()) {
            Ok(())
        } else {
            Err(Disconnected)
        }
    }
}

struct PollEngine<T, E> {
    scope: String,
    interval: Duration,
    max_requests: u64,
    start_from: Option<String>,
    fetch: Option<FetchFn<T>>,
    key: Option<KeyFn<T>>,
    stale_cursor_after: u32,
    discard_initial: bool,
    lanes: LaneMode,
    ids: IdSet,
    marks: HighWaterMark,
    latest: [Option<DateTime<Utc>>; 2],
    empty_pages: u32,
    token: CancellationToken,
    shared: Arc<Shared>,
    errors: mpsc::Sender<StreamError>,
    out: E,
}

impl<T, E> PollEngine<T, E>
where
    T: Streamable,
    E: Emitter<T>,
{
    fn new(
        token: CancellationToken,
        scope: String,
        config: StreamConfig<T>,
        lanes: LaneMode,
        shared: Arc<Shared>,
        errors: mpsc::Sender<StreamError>,
        out: E,
    ) -> Self {
        let marks = config.build_high_water_mark();
        Self {
            scope,
            interval: config.interval,
            max_requests: config.max_requests,
            start_from: config.start_from,
            fetch: config.fetch,
            key: config.dedup_key,
            stale_cursor_after: config.stale_cursor_after,
            discard_initial: config.discard_initial,
            lanes,
            ids: IdSet::new(config.page_size),
            marks,
            latest: [None, None],
            empty_pages: 0,
            token,
            shared,
            errors,
            out,
        }
    }

    async fn run(mut self) {
        let _ = self.shared.state.compare_exchange(
            EngineState::Idle as u8,
            EngineState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        match self.fetch.clone() {
            Some(fetch) => {
                info!(
                    "stream for {} started, polling every {:?}",
                    self.scope, self.interval
                );
                self.poll_loop(fetch).await;
            }
            None => {
                self.report(StreamError::InvalidConfiguration(
                    "no fetch function configured".to_string(),
                ));
            }
        }

        self.shared.close();
        let shared = Arc::clone(&self.shared);
        let scope = std::mem::take(&mut self.scope);
        // Dropping the engine drops every sender, which closes the channels.
        drop(self);
        shared
            .state
            .store(EngineState::Stopped as u8, Ordering::Release);
        info!(
            "stream for {} stopped after {} requests",
            scope,
            shared.requests.load(Ordering::Relaxed)
        );
    }

    async fn poll_loop(&mut self, fetch: FetchFn<T>) {
        let period = self.interval.min(MAX_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => return,
                _ = self.token.cancelled() => {
                    debug!("stream for {} cancelled", self.scope);
                    self.report(StreamError::Cancelled);
                    return;
                }
                _ = ticker.tick() => {}
            }

            let n = self.shared.requests.fetch_add(1, Ordering::Relaxed) + 1;
            let request = FetchRequest {
                scope: self.scope.clone(),
                cursor: self.cursor(),
            };
            let with_cursor = request.cursor.is_some();
            debug!(
                "fetch #{} for {} (cursor {:?})",
                n, self.scope, request.cursor
            );

            match fetch(request).await {
                Ok(page) => {
                    if !self.process(page, with_cursor).await {
                        return;
                    }
                }
                Err(err) => {
                    warn!("fetch #{} for {} failed: {}", n, self.scope, err);
                    self.report(err);
                }
            }

            if self.max_requests != 0 && n >= self.max_requests {
                info!(
                    "stream for {} used its budget of {} requests",
                    self.scope, self.max_requests
                );
                return;
            }
        }
    }

    fn cursor(&self) -> Option<String> {
        self.marks
            .top()
            .map(str::to_owned)
            .or_else(|| self.start_from.clone())
    }

    fn key_of(&self, item: &T) -> String {
        match &self.key {
            Some(key) => key(item),
            None => item.id().to_owned(),
        }
    }

    /// Deliver the unseen prefix of every pass. Returns `false` once the
    /// stream must end.
    async fn process(&mut self, page: Vec<T>, with_cursor: bool) -> bool {
        if page.is_empty() {
            self.note_empty_page(with_cursor);
            return true;
        }
        self.empty_pages = 0;

        let discard = std::mem::take(&mut self.discard_initial);
        let fetched = page.len();
        let passes = match self.lanes {
            LaneMode::Shared => vec![page],
            LaneMode::PerRoute => {
                let (first, second): (Vec<T>, Vec<T>) = page
                    .into_iter()
                    .partition(|item| self.out.route(item) == Route::First);
                vec![first, second]
            }
        };

        let mut delivered = 0usize;
        for pass in passes {
            for item in pass {
                let key = self.key_of(&item);
                if self.ids.exists(&key) {
                    trace!("{} already delivered, rest of the pass is old", key);
                    break;
                }
                self.ids.add(key);

                let lane = self.out.route(&item).index();
                let id = item.id().to_owned();
                let created = item.created();
                if !discard {
                    if !self.deliver(item).await {
                        return false;
                    }
                    delivered += 1;
                }
                self.advance(lane, id, created);
            }
        }

        if discard {
            debug!(
                "discarded initial page of {} items for {}",
                fetched, self.scope
            );
        } else {
            debug!(
                "page for {}: {} fetched, {} new",
                self.scope, fetched, delivered
            );
        }
        true
    }

    async fn deliver(&self, item: T) -> bool {
        tokio::select! {
            biased;
            _ = self.shared.stop.cancelled() => false,
            sent = self.out.emit(item) => match sent {
                Ok(()) => true,
                Err(Disconnected) => {
                    debug!("every receiver for {} is gone", self.scope);
                    false
                }
            },
        }
    }

    /// Queue an error without waiting for the receiver.
    fn report(&self, err: StreamError) {
        match self.errors.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                warn!("error channel for {} is full, dropping: {}", self.scope, err);
            }
            Err(TrySendError::Closed(_)) => {
                trace!("error receiver for {} is gone", self.scope);
            }
        }
    }

    fn advance(&mut self, lane: usize, id: String, created: Option<DateTime<Utc>>) {
        let Some(created) = created else {
            return;
        };
        if self.latest[lane].map_or(true, |latest| created > latest) {
            self.latest[lane] = Some(created);
            self.marks.push(id);
        }
    }

    fn note_empty_page(&mut self, with_cursor: bool) {
        if self.stale_cursor_after == 0 || !with_cursor {
            return;
        }
        self.empty_pages += 1;
        if self.empty_pages < self.stale_cursor_after {
            return;
        }
        self.empty_pages = 0;

        match self.marks.pop() {
            Some(stale) => warn!(
                "cursor {} for {} looks deleted, falling back to {:?}",
                stale,
                self.scope,
                self.cursor()
            ),
            None => {
                if let Some(stale) = self.start_from.take() {
                    warn!(
                        "starting cursor {} for {} looks deleted, fetching without one",
                        stale, self.scope
                    );
                }
            }
        }
    }
}

/// Start a single-channel stream on the current tokio runtime.
///
/// The first fetch happens one full interval after this call.
pub fn spawn_stream<T>(
    token: CancellationToken,
    scope: impl Into<String>,
    config: StreamConfig<T>,
) -> StreamHandle<T>
where
    T: Streamable,
{
    let (items_tx, items) = mpsc::channel(config.buffer.max(1));
    let (errors_tx, errors) = mpsc::channel(ERROR_BUFFER.max(config.buffer));
    let shared = Arc::new(Shared::new());

    let engine = PollEngine::new(
        token,
        scope.into(),
        config,
        LaneMode::Shared,
        Arc::clone(&shared),
        errors_tx,
        SingleOutput { items: items_tx },
    );
    tokio::spawn(engine.run());

    StreamHandle {
        items,
        errors,
        stop: StopHandle { shared },
    }
}

/// Start a two-channel stream on the current tokio runtime.
///
/// `Routed::First` items go to `first`, `Routed::Second` items to `second`.
pub fn spawn_split_stream<A, B>(
    token: CancellationToken,
    scope: impl Into<String>,
    config: StreamConfig<Routed<A, B>>,
    lanes: LaneMode,
) -> SplitStreamHandle<A, B>
where
    A: Streamable,
    B: Streamable,
{
    let (first_tx, first) = mpsc::channel(config.buffer.max(1));
    let (second_tx, second) = mpsc::channel(config.buffer.max(1));
    let (errors_tx, errors) = mpsc::channel(ERROR_BUFFER.max(config.buffer));
    let shared = Arc::new(Shared::new());

    let engine = PollEngine::new(
        token,
        scope.into(),
        config,
        lanes,
        Arc::clone(&shared),
        errors_tx,
        SplitOutput {
            first: first_tx,
            second: second_tx,
        },
    );
    tokio::spawn(engine.run());

    SplitStreamHandle {
        first,
        second,
        errors,
        stop: StopHandle { shared },
    }
}
