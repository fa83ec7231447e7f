//! The uniform output unit of the gather engine.
//!
//! One [`ImageRecord`] is produced per gather attempt that reaches the emit
//! step: a successful load, a decode failure, or a missing path.

use crate::decode::LoadError;
use crate::report::StopReason;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Where an image came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    /// A file on the local filesystem.
    Path(PathBuf),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Metadata describing how a record was produced.
///
/// Fields are read-only once the record leaves the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    pub(crate) path: PathBuf,
    pub(crate) exists: bool,
    pub(crate) modified: bool,
    pub(crate) watch_id: usize,
    pub(crate) poll: u64,
    pub(crate) mtime: Option<SystemTime>,
    pub(crate) stop: Option<StopReason>,
}

impl RecordContext {
    /// Watched path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the path existed as a regular file at poll time.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Whether the file changed since a previous successful load.
    ///
    /// False for the first load of a path.
    pub fn modified(&self) -> bool {
        self.modified
    }

    /// Index of the poll loop that emitted the record, in registration order.
    pub fn watch_id(&self) -> usize {
        self.watch_id
    }

    /// 1-based poll number within the emitting loop.
    pub fn poll(&self) -> u64 {
        self.poll
    }

    /// Modification time observed by the poll.
    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Set when this record was the last one its loop will produce.
    pub fn stop(&self) -> Option<StopReason> {
        self.stop
    }
}

/// Violations of the record invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has both pixels and an error")]
    PixelsAndError,

    #[error("record has neither pixels nor an error")]
    NoOutcome,

    #[error("record has an outcome but no loaded_at timestamp")]
    MissingLoadedAt,

    #[error("loaded_at {loaded_at} precedes started_at {started_at}")]
    LoadedBeforeStarted {
        started_at: DateTime<Utc>,
        loaded_at: DateTime<Utc>,
    },
}

/// One gather attempt.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub source_ref: SourceRef,
    pub pixels: Option<DynamicImage>,
    pub started_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub error_detail: Option<Arc<LoadError>>,
    /// Results attached by a downstream stage. Never filled by the engine.
    pub analysis: serde_json::Map<String, serde_json::Value>,
    pub analyzed_at: Option<DateTime<Utc>>,
    /// Annotated frame produced from `pixels` by a downstream stage.
    pub processed: Option<DynamicImage>,
    pub processed_at: Option<DateTime<Utc>>,
    context: RecordContext,
}

impl ImageRecord {
    pub(crate) fn loaded(
        context: RecordContext,
        started_at: DateTime<Utc>,
        pixels: DynamicImage,
    ) -> Self {
        Self {
            source_ref: SourceRef::Path(context.path.clone()),
            pixels: Some(pixels),
            started_at,
            loaded_at: Some(Utc::now()),
            error: None,
            error_detail: None,
            analysis: serde_json::Map::new(),
            analyzed_at: None,
            processed: None,
            processed_at: None,
            context,
        }
    }

    pub(crate) fn failed(
        context: RecordContext,
        started_at: DateTime<Utc>,
        error: LoadError,
    ) -> Self {
        Self {
            source_ref: SourceRef::Path(context.path.clone()),
            pixels: None,
            started_at,
            loaded_at: Some(Utc::now()),
            error: Some(error.message()),
            error_detail: Some(Arc::new(error)),
            analysis: serde_json::Map::new(),
            analyzed_at: None,
            processed: None,
            processed_at: None,
            context,
        }
    }

    pub fn context(&self) -> &RecordContext {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut RecordContext {
        &mut self.context
    }

    /// Pixels were loaded and no error was recorded.
    pub fn is_success(&self) -> bool {
        self.pixels.is_some() && self.error.is_none()
    }

    /// The attempt failed; the consumer should treat it as a per-item failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Attach downstream results and stamp `analyzed_at`.
    pub fn attach_analysis(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.analysis.insert(key.into(), value);
        self.analyzed_at = Some(Utc::now());
    }

    /// Attach an annotated frame and stamp `processed_at`.
    pub fn attach_processed(&mut self, image: DynamicImage) {
        self.processed = Some(image);
        self.processed_at = Some(Utc::now());
    }

    /// Check the record invariants.
    pub fn validate(&self) -> Result<(), RecordError> {
        match (&self.pixels, &self.error) {
            (Some(_), Some(_)) => return Err(RecordError::PixelsAndError),
            (None, None) => return Err(RecordError::NoOutcome),
            _ => {}
        }

        let loaded_at = self.loaded_at.ok_or(RecordError::MissingLoadedAt)?;
        if loaded_at < self.started_at {
            return Err(RecordError::LoadedBeforeStarted {
                started_at: self.started_at,
                loaded_at,
            });
        }

        Ok(())
    }

    /// Serializable digest of the record, without pixel data.
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            source: self.source_ref.to_string(),
            watch_id: self.context.watch_id,
            poll: self.context.poll,
            exists: self.context.exists,
            modified: self.context.modified,
            mtime: self.context.mtime.map(DateTime::<Utc>::from),
            width: self.pixels.as_ref().map(|p| p.width()),
            height: self.pixels.as_ref().map(|p| p.height()),
            processed_width: self.processed.as_ref().map(|p| p.width()),
            processed_height: self.processed.as_ref().map(|p| p.height()),
            started_at: self.started_at,
            loaded_at: self.loaded_at,
            error: self.error.clone(),
            stop: self.context.stop,
        }
    }
}

/// Pixel-free view of an [`ImageRecord`] for logs and JSON output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSummary {
    pub source: String,
    pub watch_id: usize,
    pub poll: u64,
    pub exists: bool,
    pub modified: bool,
    pub mtime: Option<DateTime<Utc>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub processed_width: Option<u32>,
    pub processed_height: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub stop: Option<StopReason>,
}
