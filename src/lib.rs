pub mod error;
pub mod high_water_mark;
pub mod id_set;

pub mod stream_types;
pub mod stream_configuration;
pub mod poll_stream;

pub mod connectors;
pub mod things;
pub mod stream_service;

// Re-export the types most callers need at the crate root
pub use error::{StreamError, StreamResult};
pub use high_water_mark::HighWaterMark;
pub use id_set::IdSet;
pub use poll_stream::{
    spawn_split_stream, spawn_stream, EngineState, LaneMode, SplitStreamHandle, StopHandle,
    StreamHandle,
};
pub use stream_configuration::{StreamConfig, StreamOpt, StreamSettings};
pub use stream_service::StreamService;
pub use stream_types::{fetch_fn, key_fn, FetchFn, FetchRequest, Route, Routed, Streamable};
pub use tokio_util::sync::CancellationToken;
