//! Mark regions of a raster image and erase them by mask-driven inpainting.
//!
//! A [`RemovalSession`] holds one image and its binary mask. Brush strokes,
//! rectangle fills and automatic watermark detection paint into the mask with
//! snapshot-based undo/redo; an [`Inpainter`] then fills the marked pixels
//! from their surroundings. [`BatchOrchestrator`] applies one template mask to
//! many images on a bounded worker pool.
//!
//! # Quick Start
//!
//! ```no_run
//! use watermark_eraser::RemovalSession;
//!
//! let mut session = RemovalSession::default();
//! session.load_path("photo.jpg".as_ref()).expect("failed to load");
//! session.auto_mark().expect("image is loaded");
//! session.process(false).expect("inpainting failed");
//! session.save_result("photo_cleaned.jpg".as_ref(), None).expect("failed to save");
//! ```
//!
//! # Batch
//!
//! ```no_run
//! use std::path::PathBuf;
//! use watermark_eraser::{load_mask, BatchEvent, BatchJob, BatchOrchestrator};
//!
//! let template = load_mask("mask.png".as_ref(), None).unwrap();
//! let sources = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
//! let orchestrator = BatchOrchestrator::default();
//! let events = orchestrator.start(BatchJob::new(sources, "out", template)).unwrap();
//! for event in events {
//!     if let BatchEvent::Completed(result) = event {
//!         println!("{}/{} succeeded", result.succeeded, result.total);
//!     }
//! }
//! ```

#![deny(missing_docs)]

pub mod batch;
pub mod config;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
pub mod mask;
pub mod strategy;
pub mod viewport;

pub use batch::{BatchEvent, BatchJob, BatchOrchestrator, BatchResult, BatchState};
pub use config::Settings;
pub use detection::{DetectedRegion, WatermarkDetector};
pub use engine::{
    default_output_path, is_supported_image, load_image, load_mask, process, save_image,
    suffixed_file_name, Inpainted, ProcessJob, ProcessOutcome, RemovalSession, BRUSH_RANGE,
    DEFAULT_JPEG_QUALITY, DEFAULT_SUFFIX,
};
pub use error::{Error, Result};
pub use inpaint::{BuiltinInpainter, Inpainter};
pub use mask::{MaskEditor, MaskHistory};
pub use strategy::{Algorithm, InpaintMethod, InpaintStrategy};
pub use viewport::{CoordinateMapper, FitPolicy};
