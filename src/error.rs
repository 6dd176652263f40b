//! Error types for the watermark-eraser crate.

use std::path::PathBuf;

/// Errors that can occur while marking, inpainting or batch-processing images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation needed an active image but none has been loaded.
    #[error("no image loaded")]
    NoImageLoaded,

    /// Inpainting was requested but the mask has no marked pixels.
    #[error("no region marked for removal")]
    NoMaskMarked,

    /// There is no inpainting result to save or continue from.
    #[error("no inpainting result available")]
    NoResult,

    /// The inpainting oracle failed.
    #[error("inpainting failed: {0}")]
    Oracle(String),

    /// Image and mask handed to the oracle differ in size.
    #[error("mask is {}x{} but image is {}x{}", mask.0, mask.1, image.0, image.1)]
    DimensionMismatch {
        /// Image dimensions `(width, height)`.
        image: (u32, u32),
        /// Mask dimensions `(width, height)`.
        mask: (u32, u32),
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred while decoding or encoding an image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The configuration file or a configuration value is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A batch was started without a template mask or with an empty one.
    #[error("template mask has no marked region")]
    EmptyTemplate,

    /// A batch was started without any source images.
    #[error("no source images selected")]
    NoSources,

    /// The batch output directory is missing or not writable.
    #[error("output directory {} unusable: {reason}", path.display())]
    OutputDir {
        /// The offending directory.
        path: PathBuf,
        /// Why it cannot be used.
        reason: String,
    },

    /// A batch is already running on this orchestrator.
    #[error("a batch is already running")]
    AlreadyRunning,
}

impl Error {
    /// Whether the error stems from the inpainting oracle rather than I/O or validation.
    #[must_use]
    pub fn is_oracle(&self) -> bool {
        matches!(self, Error::Oracle(_) | Error::DimensionMismatch { .. })
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
