//! Image Gather
//!
//! Polling engine that samples a set of image paths, deduplicates by
//! modification time, loads changed images and emits one uniform record per
//! gather attempt.

pub mod consumer;
pub mod decode;
pub mod engine;
pub mod record;
pub mod report;
pub mod watch_state;

pub use image_gather_config as config;
pub use image_gather_config::GatherConfig;
pub use consumer::{drive, ConsumerFlow, FailureStreaks, RecordConsumer};
pub use decode::{FsImageDecoder, ImageDecoder, LoadError};
pub use engine::{GatherEngine, GatherError};
pub use record::{ImageRecord, RecordContext, RecordError, RecordSummary, SourceRef};
pub use report::{GatherReport, PathReport, StopReason};
pub use watch_state::{Classification, Observation, PathWatchState};
