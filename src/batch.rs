//! Batch removal of a template mask from many images.
//!
//! A [`BatchOrchestrator`] validates a [`BatchJob`], snapshots its template
//! mask and runs every source on a bounded rayon pool from a background
//! thread. Progress and completion are delivered as [`BatchEvent`]s over a
//! channel returned by [`BatchOrchestrator::start`].

use std::any::Any;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::GrayImage;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::engine::{load_image, save_image, suffixed_file_name, DEFAULT_SUFFIX};
use crate::error::{Error, Result};
use crate::inpaint::{BuiltinInpainter, Inpainter};
use crate::mask::{has_marked_region, resize_mask};
use crate::strategy::{resolve, InpaintStrategy};

/// Upper bound on the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 4;

/// Worker count used when a job does not set one.
#[must_use]
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .clamp(1, MAX_DEFAULT_WORKERS)
}

/// Everything needed to run one batch.
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Images to process.
    pub sources: Vec<PathBuf>,
    /// Directory receiving the results.
    pub output_dir: PathBuf,
    /// Mask applied to every source after resizing to its dimensions.
    pub template_mask: Option<GrayImage>,
    /// Method and radius for every item.
    pub strategy: InpaintStrategy,
    /// Pool size; [`default_workers`] when `None`.
    pub max_workers: Option<usize>,
    /// Inserted between file stem and extension of each output.
    pub suffix: String,
}

impl BatchJob {
    /// Job with default strategy, worker count and suffix.
    #[must_use]
    pub fn new(sources: Vec<PathBuf>, output_dir: impl Into<PathBuf>, template: GrayImage) -> Self {
        Self {
            sources,
            output_dir: output_dir.into(),
            template_mask: Some(template),
            strategy: InpaintStrategy::default(),
            max_workers: None,
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

/// Lifecycle of a [`BatchOrchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchState {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// A batch is executing.
    Running,
    /// The last batch ran through every source.
    Completed,
    /// The last batch was stopped early.
    Stopped,
    /// The last batch could not execute.
    Errored,
}

impl BatchState {
    /// Whether a new batch may be started.
    #[must_use]
    pub fn is_finished(self) -> bool {
        !matches!(self, BatchState::Running)
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Number of sources in the job.
    pub total: usize,
    /// Items written successfully.
    pub succeeded: usize,
    /// Items that failed to load, inpaint or save.
    pub failed: usize,
    /// Paths of failed items, in completion order.
    pub failed_paths: Vec<PathBuf>,
    /// Whether the batch was stopped before every item was dispatched.
    pub stopped: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl BatchResult {
    /// Items that were attempted.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Message sent from the batch thread.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// One more item finished, successfully or not.
    Progress {
        /// Items finished so far.
        processed: usize,
        /// Items in the job.
        total: usize,
    },
    /// The batch could not execute at all.
    Error(String),
    /// Sent exactly once per started batch, last.
    Completed(BatchResult),
}

#[derive(Default)]
struct Shared {
    state: Mutex<BatchState>,
    stop: AtomicBool,
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    failed_paths: Mutex<Vec<PathBuf>>,
    result: Mutex<Option<BatchResult>>,
}

impl Shared {
    fn reset(&self, total: usize) {
        self.stop.store(false, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.failed_paths.lock().clear();
        *self.result.lock() = None;
    }

    fn processed(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }

    fn finish(&self, state: BatchState, elapsed: Duration) -> BatchResult {
        let result = BatchResult {
            total: self.total.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            failed_paths: std::mem::take(&mut *self.failed_paths.lock()),
            stopped: state == BatchState::Stopped,
            elapsed,
        };
        *self.result.lock() = Some(result.clone());
        *self.state.lock() = state;
        result
    }
}

/// Runs one batch at a time in the background.
pub struct BatchOrchestrator {
    oracle: Arc<dyn Inpainter>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinInpainter))
    }
}

impl BatchOrchestrator {
    /// Orchestrator inpainting with `oracle`.
    #[must_use]
    pub fn new(oracle: Arc<dyn Inpainter>) -> Self {
        Self {
            oracle,
            shared: Arc::new(Shared::default()),
            handle: Mutex::new(None),
        }
    }

    /// Validate `job` and start it on a background thread.
    ///
    /// Checks run in order: template present and non-empty, at least one
    /// source, output directory creatable and writable, no batch running.
    /// The template is copied so later edits to the caller's mask cannot
    /// reach the running batch.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyTemplate`], [`Error::NoSources`], [`Error::OutputDir`]
    /// or [`Error::AlreadyRunning`]; nothing is started in that case.
    pub fn start(&self, job: BatchJob) -> Result<Receiver<BatchEvent>> {
        let template = match &job.template_mask {
            Some(mask) if has_marked_region(mask) => mask.clone(),
            _ => return Err(Error::EmptyTemplate),
        };
        if job.sources.is_empty() {
            return Err(Error::NoSources);
        }
        check_output_dir(&job.output_dir)?;

        {
            let mut state = self.shared.state.lock();
            if *state == BatchState::Running {
                return Err(Error::AlreadyRunning);
            }
            self.shared.reset(job.sources.len());
            *state = BatchState::Running;
        }
        // a finished previous run may still be joinable
        if let Some(previous) = self.handle.lock().take() {
            let _ = previous.join();
        }

        let (tx, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let oracle = Arc::clone(&self.oracle);
        let spawned = std::thread::Builder::new()
            .name("batch".to_string())
            .spawn(move || run(&shared, oracle.as_ref(), &job, &template, &tx));

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(rx)
            }
            Err(e) => {
                *self.shared.state.lock() = BatchState::Idle;
                Err(Error::Io(e))
            }
        }
    }

    /// Ask the running batch to stop before dispatching further items.
    ///
    /// Items already in flight finish. Returns whether a batch was running.
    pub fn stop(&self) -> bool {
        let state = self.shared.state.lock();
        if *state == BatchState::Running {
            tracing::info!("stop requested");
            self.shared.stop.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BatchState {
        *self.shared.state.lock()
    }

    /// `(processed, total)` for the current or last batch.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        (
            self.shared.processed(),
            self.shared.total.load(Ordering::SeqCst),
        )
    }

    /// Summary of the last finished batch.
    #[must_use]
    pub fn results(&self) -> Option<BatchResult> {
        self.shared.result.lock().clone()
    }

    /// Block until the current batch thread exits and return its summary.
    pub fn wait(&self) -> Option<BatchResult> {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("batch thread panicked");
            }
        }
        self.results()
    }
}

fn check_output_dir(dir: &Path) -> Result<()> {
    let unusable = |reason: String| Error::OutputDir {
        path: dir.to_path_buf(),
        reason,
    };
    if dir.as_os_str().is_empty() {
        return Err(unusable("not set".to_string()));
    }
    std::fs::create_dir_all(dir).map_err(|e| unusable(e.to_string()))?;
    tempfile::Builder::new()
        .prefix(".write-check")
        .tempfile_in(dir)
        .map_err(|e| unusable(format!("not writable: {e}")))?;
    Ok(())
}

fn run(
    shared: &Shared,
    oracle: &dyn Inpainter,
    job: &BatchJob,
    template: &GrayImage,
    tx: &Sender<BatchEvent>,
) {
    let start = Instant::now();
    let total = job.sources.len();
    let workers = job.max_workers.unwrap_or_else(default_workers).max(1);
    tracing::info!(total, workers, output_dir = %job.output_dir.display(), "batch started");

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("batch-worker-{i}"))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to build worker pool");
            let _ = tx.send(BatchEvent::Error(e.to_string()));
            let result = shared.finish(BatchState::Errored, start.elapsed());
            let _ = tx.send(BatchEvent::Completed(result));
            return;
        }
    };

    let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
        pool.install(|| {
            job.sources.par_iter().for_each(|source| {
                if shared.stop.load(Ordering::SeqCst) {
                    return;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    process_item(oracle, template, &job.strategy, source, &job.output_dir, &job.suffix)
                }))
                .unwrap_or_else(|payload| {
                    Err(Error::Oracle(format!("panicked: {}", panic_message(payload.as_ref()))))
                });
                match outcome {
                    Ok(output) => {
                        tracing::debug!(
                            source = %source.display(),
                            output = %output.display(),
                            "item done"
                        );
                        shared.succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        tracing::warn!(source = %source.display(), error = %e, "item failed");
                        shared.failed_paths.lock().push(source.clone());
                        shared.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
                let _ = tx.send(BatchEvent::Progress {
                    processed: shared.processed(),
                    total,
                });
            });
        });
    }));

    let state = match dispatched {
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(error = %message, "batch dispatch panicked");
            let _ = tx.send(BatchEvent::Error(message));
            BatchState::Errored
        }
        Ok(()) if shared.stop.load(Ordering::SeqCst) => BatchState::Stopped,
        Ok(()) => BatchState::Completed,
    };
    let result = shared.finish(state, start.elapsed());
    tracing::info!(
        succeeded = result.succeeded,
        failed = result.failed,
        total = result.total,
        stopped = result.stopped,
        elapsed_ms = result.elapsed.as_millis(),
        "batch finished"
    );
    let _ = tx.send(BatchEvent::Completed(result));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn process_item(
    oracle: &dyn Inpainter,
    template: &GrayImage,
    strategy: &InpaintStrategy,
    source: &Path,
    output_dir: &Path,
    suffix: &str,
) -> Result<PathBuf> {
    let image = load_image(source)?;
    let mask = resize_mask(template, image.dimensions());
    let resolution = resolve(strategy.algorithm, &mask, oracle);
    let result = oracle.inpaint(&image, &mask, strategy.radius, resolution.method)?;

    let output = reserve_output_path(output_dir, source, suffix)?;
    if let Err(e) = save_image(&result, &output, None) {
        let _ = std::fs::remove_file(&output);
        return Err(e);
    }
    Ok(output)
}

/// Create an empty file at the first free `{stem}_{suffix}[_{n}]{ext}` in `dir`.
///
/// Creation is atomic, so concurrent workers never share a name.
///
/// # Errors
///
/// Any I/O error other than the name already existing.
pub fn reserve_output_path(dir: &Path, source: &Path, suffix: &str) -> Result<PathBuf> {
    let mut counter = None;
    loop {
        let candidate = dir.join(suffixed_file_name(source, suffix, counter));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                counter = Some(counter.map_or(1, |n| n + 1));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn template() -> GrayImage {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(5, 5, Luma([255]));
        mask
    }

    #[test]
    fn default_workers_is_bounded() {
        let n = default_workers();
        assert!((1..=MAX_DEFAULT_WORKERS).contains(&n));
    }

    #[test]
    fn validation_order_template_first() {
        let orchestrator = BatchOrchestrator::default();
        let mut job = BatchJob::new(Vec::new(), "", GrayImage::new(4, 4));
        assert!(matches!(orchestrator.start(job.clone()), Err(Error::EmptyTemplate)));

        job.template_mask = None;
        assert!(matches!(orchestrator.start(job.clone()), Err(Error::EmptyTemplate)));

        job.template_mask = Some(template());
        assert!(matches!(orchestrator.start(job.clone()), Err(Error::NoSources)));

        job.sources.push(PathBuf::from("a.png"));
        assert!(matches!(orchestrator.start(job), Err(Error::OutputDir { .. })));
        assert_eq!(orchestrator.state(), BatchState::Idle);
    }

    #[test]
    fn reserve_output_path_counts_up_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let source = Path::new("/elsewhere/photo.png");
        let first = reserve_output_path(dir.path(), source, "cleaned").unwrap();
        let second = reserve_output_path(dir.path(), source, "cleaned").unwrap();
        let third = reserve_output_path(dir.path(), source, "cleaned").unwrap();
        assert_eq!(first, dir.path().join("photo_cleaned.png"));
        assert_eq!(second, dir.path().join("photo_cleaned_1.png"));
        assert_eq!(third, dir.path().join("photo_cleaned_2.png"));
    }

    #[test]
    fn stop_when_idle_is_a_no_op() {
        let orchestrator = BatchOrchestrator::default();
        assert!(!orchestrator.stop());
        assert!(orchestrator.results().is_none());
        assert_eq!(orchestrator.progress(), (0, 0));
        assert!(orchestrator.wait().is_none());
    }

    #[test]
    fn finished_states() {
        assert!(BatchState::Idle.is_finished());
        assert!(!BatchState::Running.is_finished());
        assert!(BatchState::Stopped.is_finished());
    }
}
