//! Polling gather engine
//!
//! Drives one poll loop per registered path and yields [`ImageRecord`]s
//! lazily. Each loop walks `POLLING -> {EMIT | SKIP} -> SLEEPING -> POLLING`
//! until one of its stop conditions holds. The inter-poll sleep is the only
//! await point; stat, classify and decode run to completion.

use crate::config::{ConfigError, GatherConfig};
use crate::decode::{FsImageDecoder, ImageDecoder, LoadError};
use crate::record::{ImageRecord, RecordContext};
use crate::report::{GatherReport, PathReport, StopReason};
use crate::watch_state::{Classification, Observation, PathWatchState};
use chrono::Utc;
use futures::stream::{self, Stream};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Error type for engine construction.
///
/// Per-attempt failures never surface here; they are carried by records.
#[derive(Debug, Error)]
pub enum GatherError {
    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `must_exist` is set and a path is missing at startup
    #[error("Required file not found: {}", .0.display())]
    MissingPath(PathBuf),

    /// Relative paths could not be resolved
    #[error("Failed to resolve working directory: {0}")]
    WorkingDir(#[source] io::Error),
}

/// Loop settings shared by every path of one engine.
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    watch: bool,
    sleep: Duration,
    max_images: Option<u64>,
    max_duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Polling,
    Sleeping,
    Done,
}

/// Poll loop for a single registered path.
struct PathLoop<D> {
    watch_id: usize,
    path: PathBuf,
    settings: LoopSettings,
    decoder: Arc<D>,
    state: PathWatchState,
    phase: Phase,
    first_poll: Option<Instant>,
    report: PathReport,
}

impl<D: ImageDecoder> PathLoop<D> {
    fn new(watch_id: usize, path: PathBuf, settings: LoopSettings, decoder: Arc<D>) -> Self {
        Self {
            watch_id,
            report: PathReport::new(watch_id, path.clone()),
            path,
            settings,
            decoder,
            state: PathWatchState::new(),
            phase: Phase::Polling,
            first_poll: None,
        }
    }

    /// Advance the loop until it emits a record or stops.
    ///
    /// Dropping the returned future while sleeping leaves the loop in the
    /// sleeping phase; the next call sleeps again before polling.
    async fn next_record(&mut self) -> Option<ImageRecord> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Sleeping => {
                    tokio::time::sleep(self.settings.sleep).await;
                    self.phase = Phase::Polling;
                }
                Phase::Polling => {
                    let record = self.poll();
                    let stop = self.stop_reason();

                    match stop {
                        Some(reason) => {
                            info!(
                                watch_id = self.watch_id,
                                path = %self.path.display(),
                                reason = %reason,
                                polls = self.report.polls,
                                emitted = self.report.emitted,
                                "Ending gather"
                            );
                            self.report.stop = Some(reason);
                            self.phase = Phase::Done;
                        }
                        None => self.phase = Phase::Sleeping,
                    }

                    if let Some(mut record) = record {
                        record.context_mut().stop = stop;
                        return Some(record);
                    }
                }
            }
        }
    }

    /// One stat/classify/load cycle. `None` means the poll was skipped.
    fn poll(&mut self) -> Option<ImageRecord> {
        self.first_poll.get_or_insert_with(Instant::now);
        self.report.polls += 1;
        let poll = self.report.polls;
        let started_at = Utc::now();

        debug!(
            watch_id = self.watch_id,
            path = %self.path.display(),
            poll,
            "Starting gather"
        );

        let observation = match observe(&self.path) {
            Ok(observation) => observation,
            Err(source) => {
                let error = LoadError::Metadata {
                    path: self.path.clone(),
                    source,
                };
                warn!(watch_id = self.watch_id, poll, error = %error, "Gather failed");
                self.report.note_failure();
                let context = self.context(poll, true, false, None);
                return Some(ImageRecord::failed(context, started_at, error));
            }
        };

        match self.state.classify(observation) {
            Classification::NotFound => {
                warn!(
                    watch_id = self.watch_id,
                    path = %self.path.display(),
                    poll,
                    "Not loading image, file not found"
                );
                self.report.note_failure();
                let context = self.context(poll, false, false, None);
                let error = LoadError::NotFound {
                    path: self.path.clone(),
                };
                Some(ImageRecord::failed(context, started_at, error))
            }
            Classification::Unchanged => {
                debug!(watch_id = self.watch_id, poll, "Not loading image, already emitted");
                self.report.skipped += 1;
                None
            }
            Classification::Changed { mtime, first } => {
                let context = self.context(poll, true, !first, Some(mtime));
                match self.decoder.decode(&self.path) {
                    Ok(pixels) => {
                        self.state.record_success(mtime);
                        self.report.note_success();
                        debug!(
                            watch_id = self.watch_id,
                            poll,
                            width = pixels.width(),
                            height = pixels.height(),
                            emitted = self.state.emitted_count(),
                            "Loaded image"
                        );
                        Some(ImageRecord::loaded(context, started_at, pixels))
                    }
                    Err(error) => {
                        warn!(watch_id = self.watch_id, poll, error = %error, "Gather failed");
                        self.report.note_failure();
                        Some(ImageRecord::failed(context, started_at, error))
                    }
                }
            }
        }
    }

    /// Stop conditions, checked after every poll.
    fn stop_reason(&self) -> Option<StopReason> {
        if !self.settings.watch {
            return Some(StopReason::SingleCycle);
        }

        if let Some(max) = self.settings.max_images {
            if self.state.emitted_count() >= max {
                return Some(StopReason::MaxImages);
            }
        }

        if let (Some(max), Some(first)) = (self.settings.max_duration, self.first_poll) {
            if first.elapsed() > max {
                return Some(StopReason::MaxDuration);
            }
        }

        None
    }

    fn context(
        &self,
        poll: u64,
        exists: bool,
        modified: bool,
        mtime: Option<std::time::SystemTime>,
    ) -> RecordContext {
        RecordContext {
            path: self.path.clone(),
            exists,
            modified,
            watch_id: self.watch_id,
            poll,
            mtime,
            stop: None,
        }
    }
}

/// Stat a path. Anything that is not a regular file counts as missing.
fn observe(path: &Path) -> io::Result<Observation> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Observation::Present(meta.modified()?)),
        Ok(_) => Ok(Observation::Missing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Observation::Missing),
        Err(e) => Err(e),
    }
}

/// Make a path absolute against the current directory without touching the filesystem.
fn resolve(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Polling gather engine over a set of paths.
///
/// Records come out path-major: one path's loop runs to completion before
/// the next path is polled. See [`GatherEngine::spawn_interleaved`] for the
/// concurrent variant.
pub struct GatherEngine<D = FsImageDecoder> {
    loops: Vec<PathLoop<D>>,
    current: usize,
}

impl GatherEngine<FsImageDecoder> {
    /// Build an engine that decodes with the `image` crate.
    pub fn new(config: &GatherConfig) -> Result<Self, GatherError> {
        Self::with_decoder(config, FsImageDecoder)
    }
}

impl<D: ImageDecoder> GatherEngine<D> {
    /// Validate the configuration and register every path.
    ///
    /// A path listed twice gets two independent loops.
    pub fn with_decoder(config: &GatherConfig, decoder: D) -> Result<Self, GatherError> {
        config.validate()?;

        let cwd = std::env::current_dir().map_err(GatherError::WorkingDir)?;
        let paths: Vec<PathBuf> = config.paths.iter().map(|p| resolve(p, &cwd)).collect();

        if config.must_exist {
            if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                return Err(GatherError::MissingPath(missing.clone()));
            }
        }

        let settings = LoopSettings {
            watch: config.watch,
            sleep: config.sleep_interval(),
            max_images: config.max_images_per_path,
            max_duration: config.max_duration_per_path(),
        };
        let decoder = Arc::new(decoder);

        let loops = paths
            .into_iter()
            .enumerate()
            .map(|(watch_id, path)| PathLoop::new(watch_id, path, settings, decoder.clone()))
            .collect::<Vec<_>>();

        info!(
            paths = loops.len(),
            watch = settings.watch,
            sleep_ms = settings.sleep.as_millis() as u64,
            "Gather engine initialized"
        );

        Ok(Self { loops, current: 0 })
    }

    /// Pull the next record.
    ///
    /// Returns `None` once every path's loop has stopped. May wait through
    /// any number of skipped polls before returning.
    pub async fn next(&mut self) -> Option<ImageRecord> {
        while let Some(path_loop) = self.loops.get_mut(self.current) {
            if let Some(record) = path_loop.next_record().await {
                return Some(record);
            }
            self.current += 1;
        }
        None
    }

    /// Whether every loop has stopped.
    pub fn is_done(&self) -> bool {
        self.loops.iter().all(|l| l.phase == Phase::Done)
    }

    /// Registered paths in watch-id order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.loops.iter().map(|l| l.path.as_path())
    }

    /// Snapshot of every loop's counters and stop reason.
    pub fn report(&self) -> GatherReport {
        GatherReport {
            paths: self.loops.iter().map(|l| l.report.clone()).collect(),
        }
    }

    /// The record sequence as a [`Stream`], plus the final report.
    ///
    /// The report is sent once the stream is exhausted. If the stream is
    /// dropped early the receiver sees a closed channel.
    pub fn into_stream(
        self,
    ) -> (
        impl Stream<Item = ImageRecord>,
        oneshot::Receiver<GatherReport>,
    ) {
        let (done_tx, done_rx) = oneshot::channel();

        let records = stream::unfold((self, Some(done_tx)), |(mut engine, mut done)| async move {
            match engine.next().await {
                Some(record) => Some((record, (engine, done))),
                None => {
                    if let Some(done) = done.take() {
                        let _ = done.send(engine.report());
                    }
                    None
                }
            }
        });

        (records, done_rx)
    }
}

impl<D: ImageDecoder + 'static> GatherEngine<D> {
    /// Run the path-major sequence in a background task feeding a bounded channel.
    ///
    /// The task ends when the sequence ends or the receiver is dropped, and
    /// returns the final report.
    pub fn spawn(
        mut self,
        capacity: usize,
    ) -> (mpsc::Receiver<ImageRecord>, JoinHandle<GatherReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = self.next().await {
                if tx.send(record).await.is_err() {
                    debug!("Record receiver dropped, stopping gather");
                    break;
                }
            }
            self.report()
        });

        (rx, handle)
    }

    /// Run every path's loop concurrently, merged into one bounded channel.
    ///
    /// Records of one path stay in order; interleaving across paths is unspecified.
    pub fn spawn_interleaved(
        self,
        capacity: usize,
    ) -> (mpsc::Receiver<ImageRecord>, JoinHandle<GatherReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let tasks: Vec<JoinHandle<PathReport>> = self
            .loops
            .into_iter()
            .map(|mut path_loop| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(record) = path_loop.next_record().await {
                        if tx.send(record).await.is_err() {
                            debug!(watch_id = path_loop.watch_id, "Record receiver dropped");
                            break;
                        }
                    }
                    path_loop.report
                })
            })
            .collect();
        drop(tx);

        let handle = tokio::spawn(async move {
            let mut paths = Vec::with_capacity(tasks.len());
            for task in tasks {
                match task.await {
                    Ok(report) => paths.push(report),
                    Err(e) => warn!("Path loop task failed: {}", e),
                }
            }
            GatherReport { paths }
        });

        (rx, handle)
    }
}
