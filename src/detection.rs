//! Heuristic watermark region detection.
//!
//! Candidate regions are found structurally and then scored:
//! 1. **Adaptive threshold** (local mean, inverted): pixels darker than their
//!    neighbourhood become foreground
//! 2. **Morphological closing**: nearby strokes merge into blobs
//! 3. **External contours**: each blob yields a bounding box, boxes outside
//!    `[0.1%, 20%]` of the image area are dropped
//! 4. **Confidence**: low intensity spread plus strong edges score high, since
//!    overlays are flat but sharply outlined

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::filter::box_filter;
use imageproc::morphology::close;

use crate::mask::MaskEditor;

/// Half-size of the adaptive threshold window (11x11 block).
const BLOCK_RADIUS: u32 = 5;
/// Amount a pixel must be darker than its local mean to count as foreground.
const THRESHOLD_OFFSET: u8 = 2;
/// Closing radius: two passes of a 3x3 kernel.
const CLOSE_RADIUS: u8 = 2;
/// Smallest accepted box, as a fraction of the image area.
const MIN_AREA_FRACTION: f64 = 0.001;
/// Largest accepted box, as a fraction of the image area.
const MAX_AREA_FRACTION: f64 = 0.2;
/// Number of regions kept after ranking.
const MAX_REGIONS: usize = 5;
/// Confidence weight of the flatness term.
const FLATNESS_WEIGHT: f32 = 0.5;
/// Confidence weight of the edge-energy term.
const EDGE_WEIGHT: f32 = 0.5;
/// Mean gradient magnitude that saturates the edge term.
const EDGE_NORMALIZER: f32 = 100.0;

/// A candidate watermark box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedRegion {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Box width in pixels.
    pub width: u32,
    /// Box height in pixels.
    pub height: u32,
    /// `width * height`.
    pub area: u64,
    /// Likelihood of being a watermark, in `[0, 1]`.
    pub confidence: f32,
}

/// Proposes watermark regions and can seed a mask from them.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatermarkDetector;

impl WatermarkDetector {
    /// New detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Find up to five candidate regions, most confident first.
    ///
    /// An image without structure yields an empty list.
    #[must_use]
    #[allow(clippy::unused_self)] // method on `self` for API consistency
    pub fn detect(&self, image: &RgbImage) -> Vec<DetectedRegion> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let gray = image::imageops::grayscale(image);
        let foreground = adaptive_threshold_inv(&gray);
        let merged = close(&foreground, Norm::LInf, CLOSE_RADIUS);

        let image_area = f64::from(width) * f64::from(height);
        #[allow(clippy::cast_precision_loss)]
        let mut regions: Vec<DetectedRegion> = find_contours::<u32>(&merged)
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let min_x = c.points.iter().map(|p| p.x).min()?;
                let max_x = c.points.iter().map(|p| p.x).max()?;
                let min_y = c.points.iter().map(|p| p.y).min()?;
                let max_y = c.points.iter().map(|p| p.y).max()?;
                Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
            })
            .filter(|&(_, _, w, h)| {
                let area = u64::from(w) * u64::from(h);
                let area = area as f64;
                (MIN_AREA_FRACTION * image_area..=MAX_AREA_FRACTION * image_area).contains(&area)
            })
            .map(|(x, y, w, h)| DetectedRegion {
                x,
                y,
                width: w,
                height: h,
                area: u64::from(w) * u64::from(h),
                confidence: region_confidence(&gray, x, y, w, h),
            })
            .collect();

        regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        regions.truncate(MAX_REGIONS);

        tracing::debug!(count = regions.len(), "watermark candidates detected");
        regions
    }

    /// Detect regions and, when any are found, replace the editor's mask
    /// with their filled boxes and snapshot it into history.
    ///
    /// With no regions the mask and history are left untouched.
    pub fn detect_and_mark(&self, image: &RgbImage, editor: &mut MaskEditor) -> Vec<DetectedRegion> {
        let regions = self.detect(image);
        if regions.is_empty() {
            return regions;
        }

        editor.clear();
        for r in &regions {
            let x = i32::try_from(r.x).unwrap_or(i32::MAX);
            let y = i32::try_from(r.y).unwrap_or(i32::MAX);
            editor.fill_rect(x, y, r.width, r.height);
        }
        editor.commit();
        regions
    }
}

/// Inverse binary threshold against the local mean: `255` where a pixel is
/// at least [`THRESHOLD_OFFSET`] darker than its neighbourhood.
fn adaptive_threshold_inv(gray: &GrayImage) -> GrayImage {
    let mean = box_filter(gray, BLOCK_RADIUS, BLOCK_RADIUS);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((dst, src), m) in out.pixels_mut().zip(gray.pixels()).zip(mean.pixels()) {
        let limit = i16::from(m.0[0]) - i16::from(THRESHOLD_OFFSET);
        dst.0[0] = if i16::from(src.0[0]) <= limit { 255 } else { 0 };
    }
    out
}

/// Confidence for the box `(x, y, w, h)` of a grayscale image.
///
/// `0.5 * (1 - stddev/255) + 0.5 * (mean_gradient/100)`, clamped to `[0, 1]`.
fn region_confidence(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> f32 {
    let roi = region_values(gray, x, y, w, h);
    if roi.is_empty() {
        return 0.0;
    }
    let spread = stddev(&roi);
    let gradient = sobel_magnitude(&roi, w as usize, h as usize);
    #[allow(clippy::cast_precision_loss)]
    let mean_gradient = gradient.iter().sum::<f32>() / roi.len() as f32;

    let confidence = FLATNESS_WEIGHT * (1.0 - spread / 255.0)
        + EDGE_WEIGHT * (mean_gradient / EDGE_NORMALIZER);
    confidence.clamp(0.0, 1.0)
}

/// Copy a clipped region of a grayscale image into a flat float buffer
/// (values stay on the `0..=255` scale).
fn region_values(gray: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> Vec<f32> {
    let x2 = x.saturating_add(w).min(gray.width());
    let y2 = y.saturating_add(h).min(gray.height());
    if x >= x2 || y >= y2 {
        return Vec::new();
    }
    let mut values = Vec::with_capacity(((x2 - x) * (y2 - y)) as usize);
    for py in y..y2 {
        for px in x..x2 {
            values.push(f32::from(gray.get_pixel(px, py).0[0]));
        }
    }
    values
}

/// Compute Sobel gradient magnitude for a 2D float array.
///
/// Uses 3x3 Sobel kernels. Border pixels are set to 0.
fn sobel_magnitude(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut result = vec![0.0_f32; data.len()];
    if data.len() != width * height {
        return result;
    }

    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            // y >= 1 and x >= 1, dy/dx in {-1, 0, 1}, so indices are always valid.
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let idx = |dy: isize, dx: isize| -> f32 {
                data[((y as isize + dy) as usize) * width + (x as isize + dx) as usize]
            };

            let gx = -idx(-1, -1) + idx(-1, 1) - 2.0 * idx(0, -1) + 2.0 * idx(0, 1) - idx(1, -1)
                + idx(1, 1);

            let gy = -idx(-1, -1) - 2.0 * idx(-1, 0) - idx(-1, 1)
                + idx(1, -1)
                + 2.0 * idx(1, 0)
                + idx(1, 1);

            result[y * width + x] = (gx * gx + gy * gy).sqrt();
        }
    }

    result
}

/// Compute standard deviation of a float slice.
fn stddev(data: &[f32]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = data.len() as f32;
    let mean = data.iter().sum::<f32>() / n;
    let variance = data.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn white(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
    }

    fn dark_box(img: &mut RgbImage, x: i32, y: i32, w: u32, h: u32) {
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), Rgb([20, 20, 20]));
    }

    #[test]
    fn stddev_of_empty_slice_is_zero() {
        assert!(stddev(&[]).abs() < 1e-6);
    }

    #[test]
    fn stddev_of_known_values() {
        // stddev of [1, 2, 3, 4, 5] = sqrt(2.0)
        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let expected = 2.0_f32.sqrt();
        assert!((stddev(&data) - expected).abs() < 1e-5);
    }

    #[test]
    fn sobel_returns_zero_for_flat_image() {
        let data = vec![128.0_f32; 10 * 10];
        for &g in &sobel_magnitude(&data, 10, 10) {
            assert!(g.abs() < 1e-6, "Flat image should have zero gradient");
        }
    }

    #[test]
    fn sobel_detects_vertical_edge() {
        let mut data = vec![0.0_f32; 10 * 10];
        for y in 0..10 {
            for x in 5..10 {
                data[y * 10 + x] = 255.0;
            }
        }
        let grad = sobel_magnitude(&data, 10, 10);
        assert!(grad[5 * 10 + 5] > 100.0);
    }

    #[test]
    fn sobel_tolerates_single_row() {
        let grad = sobel_magnitude(&[1.0, 2.0, 3.0], 3, 1);
        assert_eq!(grad, vec![0.0; 3]);
    }

    #[test]
    fn adaptive_threshold_marks_dark_edges_only() {
        let mut img = white(60, 60);
        dark_box(&mut img, 20, 20, 20, 20);
        let gray = image::imageops::grayscale(&img);
        let fg = adaptive_threshold_inv(&gray);
        assert_eq!(fg.get_pixel(20, 30).0[0], 255);
        assert_eq!(fg.get_pixel(5, 5).0[0], 0);
        assert_eq!(fg.get_pixel(19, 30).0[0], 0);
    }

    #[test]
    fn blank_image_yields_nothing_and_leaves_mask() {
        let img = white(120, 80);
        let mut editor = MaskEditor::new(120, 80);
        editor.fill_rect(1, 1, 3, 3);
        let before = editor.mask().clone();
        let regions = WatermarkDetector::new().detect_and_mark(&img, &mut editor);
        assert!(regions.is_empty());
        assert_eq!(editor.mask().as_raw(), before.as_raw());
        assert_eq!(editor.history().len(), 1);
    }

    #[test]
    fn finds_dark_block() {
        let mut img = white(200, 200);
        dark_box(&mut img, 60, 80, 30, 20);
        let regions = WatermarkDetector::new().detect(&img);
        assert_eq!(regions.len(), 1);
        let r = regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (60, 80, 30, 20));
        assert_eq!(r.area, 600);
    }

    #[test]
    fn rejects_speckles_and_huge_regions() {
        let mut img = white(200, 200);
        dark_box(&mut img, 10, 10, 3, 3); // 9 px < 0.1% of 40000
        dark_box(&mut img, 20, 40, 170, 150); // > 20%
        assert!(WatermarkDetector::new().detect(&img).is_empty());
    }

    #[test]
    fn keeps_top_five_sorted_and_bounded() {
        let mut img = white(400, 400);
        for i in 0..4 {
            for j in 0..2 {
                dark_box(&mut img, 20 + i * 95, 40 + j * 180, 30 + i.unsigned_abs() * 8, 40);
            }
        }
        let regions = WatermarkDetector::new().detect(&img);
        assert_eq!(regions.len(), 5);
        for r in &regions {
            assert!((0.0..=1.0).contains(&r.confidence));
        }
        for pair in regions.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn confidence_stays_bounded_on_noisy_texture() {
        let mut img = white(160, 160);
        for (x, y, px) in img.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            let v = ((x * 37 + y * 91) % 251) as u8;
            *px = Rgb([v, v.wrapping_mul(3), v / 2]);
        }
        let regions = WatermarkDetector::new().detect(&img);
        assert!(regions.len() <= 5);
        for r in &regions {
            assert!((0.0..=1.0).contains(&r.confidence));
        }
    }

    #[test]
    fn detect_and_mark_fills_boxes_and_snapshots() {
        let mut img = white(200, 200);
        dark_box(&mut img, 60, 80, 30, 20);
        let mut editor = MaskEditor::new(200, 200);
        editor.fill_rect(0, 0, 5, 5);
        let regions = WatermarkDetector::new().detect_and_mark(&img, &mut editor);
        assert_eq!(regions.len(), 1);
        assert_eq!(editor.mask().get_pixel(0, 0).0[0], 0);
        assert_eq!(editor.mask().get_pixel(75, 90).0[0], 255);
        assert_eq!(editor.history().len(), 2);
        assert!(editor.undo());
        assert!(!editor.has_marked_region());
    }
}
