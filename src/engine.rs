//! Single-image removal session and persistence helpers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use crate::detection::{DetectedRegion, WatermarkDetector};
use crate::error::{Error, Result};
use crate::inpaint::{BuiltinInpainter, Inpainter};
use crate::mask::{
    binarize, has_marked_region, overlay_mask, resize_mask, MaskEditor, BINARY_THRESHOLD, MARKED,
};
use crate::strategy::{resolve, InpaintMethod, InpaintStrategy};
use crate::viewport::{CoordinateMapper, FitPolicy};

/// Brush radius bounds in image pixels.
pub const BRUSH_RANGE: (u32, u32) = (1, 100);

/// JPEG quality used when none is given.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Suffix appended to output file stems.
pub const DEFAULT_SUFFIX: &str = "cleaned";

/// A finished inpainting run.
#[derive(Debug, Clone)]
pub struct Inpainted {
    /// The result, same size as the input image.
    pub image: RgbImage,
    /// Method the oracle actually ran.
    pub method: InpaintMethod,
    /// Whether a patch-based request was downgraded.
    pub fell_back: bool,
    /// Whether this was a reduced-resolution preview.
    pub preview: bool,
    /// Wall-clock time spent, including preview resampling.
    pub elapsed: Duration,
}

/// Result of [`process`].
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The oracle produced a new image.
    Inpainted(Inpainted),
    /// The mask was empty; the original image is handed back unchanged.
    NothingToDo(RgbImage),
}

impl ProcessOutcome {
    /// The resulting image, inpainted or original.
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        match self {
            ProcessOutcome::Inpainted(done) => &done.image,
            ProcessOutcome::NothingToDo(original) => original,
        }
    }

    /// The inpainting run, treating an empty mask as an error.
    ///
    /// # Errors
    ///
    /// [`Error::NoMaskMarked`] for [`ProcessOutcome::NothingToDo`].
    pub fn into_inpainted(self) -> Result<Inpainted> {
        match self {
            ProcessOutcome::Inpainted(done) => Ok(done),
            ProcessOutcome::NothingToDo(_) => Err(Error::NoMaskMarked),
        }
    }
}

/// Inpaint `image` under `mask` with `strategy`.
///
/// Preview runs downscale image and mask by the strategy's preview scale,
/// inpaint the small copy and upscale the filled pixels back over the
/// original, leaving unmarked pixels bit-identical. When the reduced mask
/// would leave nothing to sample from, the run happens at full resolution.
///
/// Mask values above 127 count as marked everywhere.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] when the mask does not match the
/// image and propagates any oracle failure.
pub fn process(
    oracle: &dyn Inpainter,
    image: &RgbImage,
    mask: &GrayImage,
    strategy: &InpaintStrategy,
    preview: bool,
) -> Result<ProcessOutcome> {
    crate::inpaint::check_dimensions(image, mask)?;
    let mut mask = mask.clone();
    binarize(&mut mask, BINARY_THRESHOLD);
    if !has_marked_region(&mask) {
        tracing::warn!("nothing to inpaint: mask is empty");
        return Ok(ProcessOutcome::NothingToDo(image.clone()));
    }

    let start = Instant::now();
    let resolution = resolve(strategy.algorithm, &mask, oracle);
    let method = resolution.method;

    let reduced = if preview {
        downscale(image, &mask, strategy.preview_scale())
    } else {
        None
    };
    let result = if let Some((small, small_mask)) = reduced {
        let filled = oracle.inpaint(&small, &small_mask, strategy.radius, method)?;
        let (w, h) = image.dimensions();
        let upscaled = image::imageops::resize(&filled, w, h, FilterType::Lanczos3);
        composite(image, &upscaled, &mask)
    } else {
        oracle.inpaint(image, &mask, strategy.radius, method)?
    };

    let elapsed = start.elapsed();
    tracing::info!(
        %method,
        preview,
        elapsed_ms = elapsed.as_millis(),
        "inpainting finished"
    );

    Ok(ProcessOutcome::Inpainted(Inpainted {
        image: result,
        method,
        fell_back: resolution.fell_back(),
        preview,
        elapsed,
    }))
}

/// Image and mask reduced by `scale` for a preview run.
///
/// `None` when no reduction applies or when the reduced mask would cover
/// the whole reduced image.
fn downscale(image: &RgbImage, mask: &GrayImage, scale: f64) -> Option<(RgbImage, GrayImage)> {
    if scale >= 1.0 {
        return None;
    }
    let (w, h) = image.dimensions();
    let (sw, sh) = (scaled(w, scale), scaled(h, scale));
    if (sw, sh) == (w, h) {
        return None;
    }
    // any coverage counts so thin strokes survive the downscale
    let mut small_mask = image::imageops::resize(mask, sw, sh, FilterType::Triangle);
    binarize(&mut small_mask, 0);
    if small_mask.pixels().all(|p| p.0[0] == MARKED) {
        tracing::debug!(width = sw, height = sh, "preview too coarse, using full resolution");
        return None;
    }
    let small = image::imageops::resize(image, sw, sh, FilterType::Triangle);
    Some((small, small_mask))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn scaled(len: u32, scale: f64) -> u32 {
    ((f64::from(len) * scale).round() as u32).max(1)
}

/// `base` with every marked pixel taken from `filled`.
fn composite(base: &RgbImage, filled: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = base.clone();
    for ((px, src), m) in out.pixels_mut().zip(filled.pixels()).zip(mask.pixels()) {
        if m.0[0] == MARKED {
            *px = *src;
        }
    }
    out
}

/// Owned snapshot of a session's image and mask, runnable on any thread.
///
/// Hand the outcome back with [`RemovalSession::accept`]; results from a job
/// taken before the image changed are rejected.
#[derive(Clone)]
pub struct ProcessJob {
    generation: u64,
    image: RgbImage,
    mask: GrayImage,
    strategy: InpaintStrategy,
    preview: bool,
    oracle: Arc<dyn Inpainter>,
}

impl ProcessJob {
    /// Session generation this job was taken from.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the job.
    ///
    /// # Errors
    ///
    /// Propagates oracle failures from [`process`].
    pub fn run(&self) -> Result<ProcessOutcome> {
        process(
            self.oracle.as_ref(),
            &self.image,
            &self.mask,
            &self.strategy,
            self.preview,
        )
    }
}

/// The image being edited together with its mask.
///
/// Replaced as a whole so image and mask can never disagree in size.
#[derive(Debug, Clone)]
struct Active {
    image: RgbImage,
    source: Option<PathBuf>,
    editor: MaskEditor,
    result: Option<RgbImage>,
}

impl Active {
    fn new(image: RgbImage, source: Option<PathBuf>) -> Self {
        let editor = MaskEditor::new(image.width(), image.height());
        Self {
            image,
            source,
            editor,
            result: None,
        }
    }
}

/// Interactive removal of marked regions from one image at a time.
pub struct RemovalSession {
    oracle: Arc<dyn Inpainter>,
    detector: WatermarkDetector,
    strategy: InpaintStrategy,
    brush_radius: u32,
    active: Option<Active>,
    generation: u64,
}

impl Default for RemovalSession {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinInpainter))
    }
}

impl RemovalSession {
    /// Session using `oracle` for inpainting.
    #[must_use]
    pub fn new(oracle: Arc<dyn Inpainter>) -> Self {
        Self {
            oracle,
            detector: WatermarkDetector::new(),
            strategy: InpaintStrategy::default(),
            brush_radius: 10,
            active: None,
            generation: 0,
        }
    }

    /// Current inpainting strategy.
    #[must_use]
    pub fn strategy(&self) -> InpaintStrategy {
        self.strategy
    }

    /// Replace the inpainting strategy.
    pub fn set_strategy(&mut self, strategy: InpaintStrategy) {
        self.strategy = strategy;
    }

    /// Brush radius in image pixels.
    #[must_use]
    pub fn brush_radius(&self) -> u32 {
        self.brush_radius
    }

    /// Set the brush radius, clamped to [`BRUSH_RANGE`].
    pub fn set_brush_radius(&mut self, radius: u32) {
        self.brush_radius = radius.clamp(BRUSH_RANGE.0, BRUSH_RANGE.1);
    }

    /// Load an image from disk, replacing the active image and mask.
    ///
    /// # Errors
    ///
    /// Returns an I/O or decode error; the previous image stays active.
    pub fn load_path(&mut self, path: &Path) -> Result<()> {
        let image = load_image(path)?;
        self.load_image(image, Some(path.to_path_buf()));
        Ok(())
    }

    /// Make `image` the active image with a fresh, empty mask.
    pub fn load_image(&mut self, image: RgbImage, source: Option<PathBuf>) {
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            source = ?source,
            "image loaded"
        );
        self.active = Some(Active::new(image, source));
        self.generation += 1;
    }

    /// Whether an image is loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.active.is_some()
    }

    /// Counter bumped whenever the active image is replaced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn active(&self) -> Result<&Active> {
        self.active.as_ref().ok_or(Error::NoImageLoaded)
    }

    fn active_mut(&mut self) -> Result<&mut Active> {
        self.active.as_mut().ok_or(Error::NoImageLoaded)
    }

    /// The active image.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn image(&self) -> Result<&RgbImage> {
        Ok(&self.active()?.image)
    }

    /// File the active image came from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.active.as_ref()?.source.as_deref()
    }

    /// The mask editor of the active image.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn editor(&self) -> Result<&MaskEditor> {
        Ok(&self.active()?.editor)
    }

    /// Mutable mask editor of the active image.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn editor_mut(&mut self) -> Result<&mut MaskEditor> {
        Ok(&mut self.active_mut()?.editor)
    }

    /// Fresh coordinate mapper for a surface of `surface` size.
    ///
    /// `None` without an image or for a zero-sized surface.
    #[must_use]
    pub fn mapper(&self, surface: (u32, u32), policy: FitPolicy) -> Option<CoordinateMapper> {
        let image = &self.active.as_ref()?.image;
        CoordinateMapper::new(surface, image.dimensions(), policy)
    }

    /// Start a stroke at a surface point using the session brush.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn begin_stroke_at(&mut self, mapper: &CoordinateMapper, x: f64, y: f64) -> Result<()> {
        let point = image_point(mapper, x, y);
        let radius = self.brush_radius;
        self.editor_mut()?.begin_stroke(point, radius);
        Ok(())
    }

    /// Extend the stroke to a surface point using the session brush.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn continue_stroke_at(&mut self, mapper: &CoordinateMapper, x: f64, y: f64) -> Result<()> {
        let point = image_point(mapper, x, y);
        let radius = self.brush_radius;
        self.editor_mut()?.continue_stroke(point, radius);
        Ok(())
    }

    /// Finish the current stroke.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn end_stroke(&mut self) -> Result<()> {
        self.editor_mut()?.end_stroke();
        Ok(())
    }

    /// Clear the mask as an undoable step.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn clear_mask(&mut self) -> Result<()> {
        let editor = self.editor_mut()?;
        editor.clear();
        editor.commit();
        Ok(())
    }

    /// Undo the last mask edit.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn undo(&mut self) -> Result<bool> {
        Ok(self.editor_mut()?.undo())
    }

    /// Redo the last undone mask edit.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn redo(&mut self) -> Result<bool> {
        Ok(self.editor_mut()?.redo())
    }

    /// Detect watermark candidates and mark them on the mask (undoable).
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn auto_mark(&mut self) -> Result<Vec<DetectedRegion>> {
        let detector = self.detector;
        let active = self.active_mut()?;
        Ok(detector.detect_and_mark(&active.image, &mut active.editor))
    }

    /// The active image with the mask tinted red.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn masked_preview(&self) -> Result<RgbImage> {
        let active = self.active()?;
        Ok(overlay_mask(&active.image, active.editor.mask()))
    }

    /// Snapshot the current image, mask and strategy into a runnable job.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded.
    pub fn job(&self, preview: bool) -> Result<ProcessJob> {
        let active = self.active()?;
        Ok(ProcessJob {
            generation: self.generation,
            image: active.image.clone(),
            mask: active.editor.mask().clone(),
            strategy: self.strategy,
            preview,
            oracle: Arc::clone(&self.oracle),
        })
    }

    /// Store a finished full-resolution result as the session result.
    ///
    /// Previews and results from an older generation are ignored.
    /// Returns whether the result was stored.
    pub fn accept(&mut self, generation: u64, done: Inpainted) -> bool {
        if done.preview || generation != self.generation {
            return false;
        }
        match self.active.as_mut() {
            Some(active) if active.image.dimensions() == done.image.dimensions() => {
                active.result = Some(done.image);
                true
            }
            _ => false,
        }
    }

    /// Run inpainting on the calling thread.
    ///
    /// Full-resolution results are kept for [`save_result`](Self::save_result)
    /// and [`continue_editing`](Self::continue_editing).
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] before any image was loaded, otherwise any
    /// oracle failure.
    pub fn process(&mut self, preview: bool) -> Result<ProcessOutcome> {
        let job = self.job(preview)?;
        let outcome = job.run()?;
        if let ProcessOutcome::Inpainted(done) = &outcome {
            self.accept(job.generation(), done.clone());
        }
        Ok(outcome)
    }

    /// The last full-resolution result.
    #[must_use]
    pub fn result(&self) -> Option<&RgbImage> {
        self.active.as_ref()?.result.as_ref()
    }

    /// Make the last result the active image, with an empty mask and history.
    ///
    /// # Errors
    ///
    /// [`Error::NoImageLoaded`] or [`Error::NoResult`].
    pub fn continue_editing(&mut self) -> Result<()> {
        let active = self.active_mut()?;
        let result = active.result.take().ok_or(Error::NoResult)?;
        let source = active.source.clone();
        self.load_image(result, source);
        Ok(())
    }

    /// Make `image` the active image, keeping the current source path.
    pub fn continue_with(&mut self, image: RgbImage) {
        let source = self.active.as_ref().and_then(|a| a.source.clone());
        self.load_image(image, source);
    }

    /// Save the last result.
    ///
    /// # Errors
    ///
    /// [`Error::NoResult`] without a result, otherwise any save error.
    pub fn save_result(&self, path: &Path, quality: Option<u8>) -> Result<()> {
        let result = self.result().ok_or(Error::NoResult)?;
        save_image(result, path, quality)
    }
}

fn image_point(mapper: &CoordinateMapper, x: f64, y: f64) -> (i32, i32) {
    let (ix, iy) = mapper.to_image_space(x, y);
    (
        i32::try_from(ix).unwrap_or(i32::MAX),
        i32::try_from(iy).unwrap_or(i32::MAX),
    )
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp" | "tif" | "tiff"
        ),
        None => false,
    }
}

/// Load an image from disk as 8-bit RGB.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Load a mask file, resized to `size` and binarized.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_mask(path: &Path, size: Option<(u32, u32)>) -> Result<GrayImage> {
    let mask = image::open(path)?.to_luma8();
    let size = size.unwrap_or_else(|| mask.dimensions());
    Ok(resize_mask(&mask, size))
}

/// Save an RGB image, inferring the format from the extension.
///
/// JPEG output uses `quality` (default 95). Parent directories are created.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path, quality: Option<u8>) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    match format {
        ImageFormat::Jpeg => {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100);
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, quality);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp | ImageFormat::Tiff => {
            DynamicImage::ImageRgb8(img.clone()).save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// File name `{stem}_{suffix}{.ext}`, or `{stem}_{suffix}_{n}{.ext}` with a counter.
#[must_use]
pub fn suffixed_file_name(input: &Path, suffix: &str, counter: Option<u32>) -> String {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    match counter {
        Some(n) => format!("{stem}_{suffix}_{n}{ext}"),
        None => format!("{stem}_{suffix}{ext}"),
    }
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(suffixed_file_name(input, DEFAULT_SUFFIX, None))
}
