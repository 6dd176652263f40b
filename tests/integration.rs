use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{GrayImage, Luma, Rgb, RgbImage};
use watermark_eraser::{
    BatchEvent, BatchJob, BatchOrchestrator, BatchResult, BatchState, BuiltinInpainter, Error,
    InpaintMethod, Inpainter, RemovalSession, Settings,
};

/// Delegates to the builtin inpainter after a fixed delay.
struct SlowInpainter(Duration);

impl Inpainter for SlowInpainter {
    fn inpaint(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
        radius: u32,
        method: InpaintMethod,
    ) -> watermark_eraser::Result<RgbImage> {
        std::thread::sleep(self.0);
        BuiltinInpainter.inpaint(image, mask, radius, method)
    }
}

struct FailingInpainter;

impl Inpainter for FailingInpainter {
    fn inpaint(
        &self,
        _image: &RgbImage,
        _mask: &GrayImage,
        _radius: u32,
        _method: InpaintMethod,
    ) -> watermark_eraser::Result<RgbImage> {
        Err(Error::Oracle("refused".into()))
    }
}

/// Panics on every call.
struct PanickingInpainter;

impl Inpainter for PanickingInpainter {
    fn inpaint(
        &self,
        _image: &RgbImage,
        _mask: &GrayImage,
        _radius: u32,
        _method: InpaintMethod,
    ) -> watermark_eraser::Result<RgbImage> {
        panic!("inpainter exploded");
    }
}

fn write_image(path: &Path, w: u32, h: u32) {
    let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
    img.save(path).unwrap();
}

fn template() -> GrayImage {
    let mut mask = GrayImage::new(20, 20);
    for y in 8..12 {
        for x in 8..12 {
            mask.put_pixel(x, y, Luma([255]));
        }
    }
    mask
}

/// Drain the channel, asserting exactly one completion event.
fn drain(events: std::sync::mpsc::Receiver<BatchEvent>) -> BatchResult {
    let mut completed: Vec<BatchResult> = events
        .into_iter()
        .filter_map(|e| match e {
            BatchEvent::Completed(result) => Some(result),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 1, "completion must fire exactly once");
    completed.remove(0)
}

#[test]
fn batch_counts_malformed_sources_as_failures() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let mut sources = Vec::new();
    for (i, (w, h)) in [(40, 30), (64, 64), (25, 50), (33, 17)].iter().enumerate() {
        let path = input.path().join(format!("good{i}.png"));
        write_image(&path, *w, *h);
        sources.push(path);
    }
    let mut broken = Vec::new();
    for name in ["broken.png", "missing.jpg"] {
        let path = input.path().join(name);
        if name.starts_with("broken") {
            std::fs::write(&path, b"not an image").unwrap();
        }
        broken.push(path.clone());
        sources.push(path);
    }

    let orchestrator = BatchOrchestrator::default();
    let mut job = BatchJob::new(sources, output.path(), template());
    job.max_workers = Some(2);
    let result = drain(orchestrator.start(job).unwrap());

    assert_eq!(result.total, 6);
    assert_eq!(result.succeeded + result.failed, 6);
    assert_eq!(result.failed, 2);
    assert!(!result.stopped);
    let mut failed = result.failed_paths.clone();
    failed.sort();
    broken.sort();
    assert_eq!(failed, broken);

    orchestrator.wait();
    assert_eq!(orchestrator.state(), BatchState::Completed);
    assert_eq!(orchestrator.progress(), (6, 6));

    for i in 0..4 {
        let out = output.path().join(format!("good{i}_cleaned.png"));
        let original = image::open(input.path().join(format!("good{i}.png"))).unwrap();
        let cleaned = image::open(&out).unwrap();
        assert_eq!(
            (cleaned.width(), cleaned.height()),
            (original.width(), original.height())
        );
    }
    assert!(!output.path().join("broken_cleaned.png").exists());
}

#[test]
fn batch_output_names_never_collide() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let first = a.path().join("photo.png");
    let second = b.path().join("photo.png");
    write_image(&first, 30, 30);
    write_image(&second, 30, 30);

    let orchestrator = BatchOrchestrator::default();
    let mut job = BatchJob::new(vec![first, second], output.path(), template());
    job.suffix = "clean".to_string();
    let result = drain(orchestrator.start(job).unwrap());

    assert_eq!(result.succeeded, 2);
    assert!(output.path().join("photo_clean.png").is_file());
    assert!(output.path().join("photo_clean_1.png").is_file());
}

#[test]
fn batch_oracle_failures_do_not_abort() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources: Vec<PathBuf> = (0..3)
        .map(|i| {
            let p = input.path().join(format!("{i}.png"));
            write_image(&p, 16, 16);
            p
        })
        .collect();

    let orchestrator = BatchOrchestrator::new(Arc::new(FailingInpainter));
    let result = drain(
        orchestrator
            .start(BatchJob::new(sources, output.path(), template()))
            .unwrap(),
    );
    assert_eq!(result.failed, 3);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed_paths.len(), 3);
}

#[test]
fn batch_survives_panicking_inpainter() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let source = input.path().join("only.png");
    write_image(&source, 16, 16);

    let orchestrator = BatchOrchestrator::new(Arc::new(PanickingInpainter));
    let job = BatchJob::new(vec![source.clone()], output.path(), template());
    let result = drain(orchestrator.start(job.clone()).unwrap());
    assert_eq!(result.failed, 1);
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed_paths, vec![source]);

    orchestrator.wait();
    assert_eq!(orchestrator.state(), BatchState::Completed);
    // the orchestrator is reusable afterwards
    let again = drain(orchestrator.start(job).unwrap());
    assert_eq!(again.failed, 1);
}

#[test]
fn batch_stop_right_after_start_is_honoured() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources: Vec<PathBuf> = (0..10)
        .map(|i| {
            let p = input.path().join(format!("{i}.png"));
            write_image(&p, 20, 20);
            p
        })
        .collect();

    let orchestrator =
        BatchOrchestrator::new(Arc::new(SlowInpainter(Duration::from_millis(50))));
    let mut job = BatchJob::new(sources, output.path(), template());
    job.max_workers = Some(1);
    let events = orchestrator.start(job).unwrap();
    assert!(orchestrator.stop());

    let result = drain(events);
    assert!(result.stopped);
    assert!(result.processed() <= 1);
    orchestrator.wait();
    assert_eq!(orchestrator.state(), BatchState::Stopped);
}

#[test]
fn batch_stop_completes_once_with_partial_counts() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources: Vec<PathBuf> = (0..20)
        .map(|i| {
            let p = input.path().join(format!("{i}.png"));
            write_image(&p, 20, 20);
            p
        })
        .collect();

    let orchestrator =
        BatchOrchestrator::new(Arc::new(SlowInpainter(Duration::from_millis(50))));
    let mut job = BatchJob::new(sources, output.path(), template());
    job.max_workers = Some(1);
    let events = orchestrator.start(job).unwrap();

    let mut completed = Vec::new();
    for event in events {
        match event {
            BatchEvent::Progress { .. } => {
                orchestrator.stop();
            }
            BatchEvent::Completed(result) => completed.push(result),
            BatchEvent::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(completed.len(), 1);
    let result = &completed[0];
    assert!(result.stopped);
    assert!(result.processed() < result.total);
    assert_eq!(result.total, 20);
    orchestrator.wait();
    assert_eq!(orchestrator.state(), BatchState::Stopped);
}

#[test]
fn batch_rejects_second_start_while_running() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let sources: Vec<PathBuf> = (0..4)
        .map(|i| {
            let p = input.path().join(format!("{i}.png"));
            write_image(&p, 20, 20);
            p
        })
        .collect();

    let orchestrator =
        BatchOrchestrator::new(Arc::new(SlowInpainter(Duration::from_millis(100))));
    let mut job = BatchJob::new(sources, output.path(), template());
    job.max_workers = Some(1);
    let events = orchestrator.start(job.clone()).unwrap();
    assert!(matches!(orchestrator.start(job.clone()), Err(Error::AlreadyRunning)));

    orchestrator.stop();
    drain(events);
    orchestrator.wait();

    // a finished orchestrator accepts a new batch
    let result = drain(orchestrator.start(job).unwrap());
    assert_eq!(result.succeeded, 4);
}

#[test]
fn session_marks_processes_and_chains_passes() {
    let mut img = RgbImage::from_pixel(120, 90, Rgb([210, 210, 210]));
    for y in 40..50 {
        for x in 70..100 {
            img.put_pixel(x, y, Rgb([20, 20, 20]));
        }
    }

    let mut session = RemovalSession::default();
    session.load_image(img, None);
    assert!(matches!(
        session.process(false).unwrap().into_inpainted(),
        Err(Error::NoMaskMarked)
    ));
    let regions = session.auto_mark().unwrap();
    assert!(!regions.is_empty());
    assert!(session.editor().unwrap().has_marked_region());

    let done = session.process(false).unwrap().into_inpainted().unwrap();
    let px = done.image.get_pixel(85, 45);
    assert!(px.0[0] > 150, "dark block should be filled, got {px:?}");

    session.continue_editing().unwrap();
    assert!(!session.editor().unwrap().has_marked_region());
    assert_eq!(session.image().unwrap().get_pixel(85, 45), px);

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        session.save_result(&dir.path().join("x.png"), None),
        Err(Error::NoResult)
    ));
}

#[test]
fn settings_drive_session_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"algorithm": "patch-based", "inpaint_radius": 5}"#).unwrap();

    let settings = Settings::load(&path).unwrap();
    let mut session = RemovalSession::default();
    session.set_strategy(settings.strategy());
    assert_eq!(session.strategy().radius, 5);
    assert_eq!(settings.get("output_suffix", String::new()), "cleaned");
}
