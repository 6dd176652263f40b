//! Editable removal mask with linear undo/redo history.
//!
//! The mask is a single-channel image the size of the active picture where
//! `255` marks a pixel for removal and `0` leaves it alone. Painting is
//! best-effort: points outside the image are clipped, never rejected.

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;

/// Value written for marked pixels.
pub const MARKED: u8 = 255;

/// Threshold used when binarizing masks that went through a smoothing filter.
pub const BINARY_THRESHOLD: u8 = 127;

/// Ordered mask snapshots with a cursor pointing at the active one.
///
/// Pushing while the cursor is not at the newest snapshot discards every
/// snapshot after the cursor.
#[derive(Debug, Clone, Default)]
pub struct MaskHistory {
    snapshots: Vec<GrayImage>,
    cursor: usize,
}

impl MaskHistory {
    /// History holding a single initial snapshot.
    #[must_use]
    pub fn new(initial: GrayImage) -> Self {
        Self {
            snapshots: vec![initial],
            cursor: 0,
        }
    }

    /// Append a snapshot, truncating any redo branch.
    pub fn push(&mut self, snapshot: GrayImage) {
        if self.snapshots.is_empty() {
            self.snapshots.push(snapshot);
            self.cursor = 0;
            return;
        }
        self.snapshots.truncate(self.cursor + 1);
        self.snapshots.push(snapshot);
        self.cursor = self.snapshots.len() - 1;
    }

    /// Step back one snapshot. `None` at the oldest snapshot.
    pub fn undo(&mut self) -> Option<&GrayImage> {
        if self.cursor == 0 || self.snapshots.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.snapshots.get(self.cursor)
    }

    /// Step forward one snapshot. `None` at the newest snapshot.
    pub fn redo(&mut self) -> Option<&GrayImage> {
        if self.cursor + 1 >= self.snapshots.len() {
            return None;
        }
        self.cursor += 1;
        self.snapshots.get(self.cursor)
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Index of the active snapshot.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Owns the live mask of one image and its undo history.
#[derive(Debug, Clone)]
pub struct MaskEditor {
    mask: GrayImage,
    history: MaskHistory,
    last_point: Option<(i32, i32)>,
}

impl MaskEditor {
    /// Editor with an all-zero mask of the given size.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let mask = GrayImage::new(width, height);
        Self {
            history: MaskHistory::new(mask.clone()),
            mask,
            last_point: None,
        }
    }

    /// Replace the mask with a fresh zero mask of `size` and reset history.
    pub fn load(&mut self, size: (u32, u32)) {
        *self = Self::new(size.0, size.1);
    }

    /// The live mask.
    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Mask dimensions `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    /// Undo history.
    #[must_use]
    pub fn history(&self) -> &MaskHistory {
        &self.history
    }

    /// Start a stroke with a filled disc at `point` (image space).
    pub fn begin_stroke(&mut self, point: (i32, i32), radius: u32) {
        let radius = self.limit_radius(radius);
        let point = self.clamp_point(point, radius);
        self.paint_disc(point, radius);
        self.last_point = Some(point);
    }

    /// Extend the current stroke to `point`.
    ///
    /// Paints a disc at `point` and a segment of width `2 * radius` from the
    /// previous point, so fast pointer motion leaves no gaps. Without a
    /// preceding [`begin_stroke`](Self::begin_stroke) this behaves like one.
    pub fn continue_stroke(&mut self, point: (i32, i32), radius: u32) {
        let radius = self.limit_radius(radius);
        let point = self.clamp_point(point, radius);
        if let Some(last) = self.last_point {
            self.paint_segment(last, point, radius);
            self.paint_disc(last, radius);
        }
        self.paint_disc(point, radius);
        self.last_point = Some(point);
    }

    /// Finish the stroke and snapshot the mask into history.
    pub fn end_stroke(&mut self) {
        self.last_point = None;
        self.commit();
    }

    /// Snapshot the live mask into history.
    pub fn commit(&mut self) {
        self.history.push(self.mask.clone());
    }

    /// Zero the mask. Does not touch history; call [`commit`](Self::commit)
    /// to make the clear undoable.
    pub fn clear(&mut self) {
        self.last_point = None;
        for px in self.mask.pixels_mut() {
            px.0[0] = 0;
        }
    }

    /// Mark an axis-aligned rectangle, clipped to the mask.
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        draw_filled_rect_mut(
            &mut self.mask,
            Rect::at(x, y).of_size(width, height),
            Luma([MARKED]),
        );
    }

    /// Mark every pixel marked in `other`, resized to this mask first.
    ///
    /// Like strokes, the change becomes undoable after [`commit`](Self::commit).
    pub fn apply_mask(&mut self, other: &GrayImage) {
        let other = if other.dimensions() == self.mask.dimensions() {
            let mut copy = other.clone();
            binarize(&mut copy, BINARY_THRESHOLD);
            copy
        } else {
            resize_mask(other, self.mask.dimensions())
        };
        for (px, o) in self.mask.pixels_mut().zip(other.pixels()) {
            px.0[0] = px.0[0].max(o.0[0]);
        }
    }

    /// Restore the previous snapshot. Returns `false` at the oldest snapshot.
    pub fn undo(&mut self) -> bool {
        self.last_point = None;
        match self.history.undo() {
            Some(snapshot) => {
                self.mask.clone_from(snapshot);
                true
            }
            None => false,
        }
    }

    /// Re-apply the next snapshot. Returns `false` at the newest snapshot.
    pub fn redo(&mut self) -> bool {
        self.last_point = None;
        match self.history.redo() {
            Some(snapshot) => {
                self.mask.clone_from(snapshot);
                true
            }
            None => false,
        }
    }

    /// Whether at least one pixel is marked.
    #[must_use]
    pub fn has_marked_region(&self) -> bool {
        has_marked_region(&self.mask)
    }

    // A disc wider than the mask covers all of it anyway.
    fn limit_radius(&self, radius: u32) -> u32 {
        let (w, h) = self.mask.dimensions();
        radius.min(w.max(h).max(1))
    }

    // Keeps drawing coordinates in a sane range; anything further out
    // cannot touch the mask anyway.
    fn clamp_point(&self, (x, y): (i32, i32), radius: u32) -> (i32, i32) {
        let pad = i32::try_from(radius).unwrap_or(i32::MAX / 4).saturating_add(1);
        let (w, h) = self.mask.dimensions();
        let max_x = i32::try_from(w).unwrap_or(i32::MAX / 2).saturating_add(pad);
        let max_y = i32::try_from(h).unwrap_or(i32::MAX / 2).saturating_add(pad);
        (x.clamp(-pad, max_x), y.clamp(-pad, max_y))
    }

    fn paint_disc(&mut self, center: (i32, i32), radius: u32) {
        let r = i32::try_from(radius).unwrap_or(i32::MAX / 4);
        draw_filled_circle_mut(&mut self.mask, center, r, Luma([MARKED]));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn paint_segment(&mut self, from: (i32, i32), to: (i32, i32), radius: u32) {
        if from == to || radius == 0 {
            return;
        }
        let dx = (to.0 - from.0) as f32;
        let dy = (to.1 - from.1) as f32;
        let len = (dx * dx + dy * dy).sqrt();
        let r = radius as f32;
        // unit normal scaled to the brush radius; one component always rounds to >= 1
        let nx = (-dy / len * r).round() as i32;
        let ny = (dx / len * r).round() as i32;
        let quad = [
            Point::new(from.0 + nx, from.1 + ny),
            Point::new(to.0 + nx, to.1 + ny),
            Point::new(to.0 - nx, to.1 - ny),
            Point::new(from.0 - nx, from.1 - ny),
        ];
        draw_polygon_mut(&mut self.mask, &quad, Luma([MARKED]));
    }
}

/// Whether any pixel of `mask` is non-zero.
#[must_use]
pub fn has_marked_region(mask: &GrayImage) -> bool {
    mask.pixels().any(|p| p.0[0] > 0)
}

/// Force every pixel to `0` or [`MARKED`] using `threshold` (exclusive).
pub fn binarize(mask: &mut GrayImage, threshold: u8) {
    for px in mask.pixels_mut() {
        px.0[0] = if px.0[0] > threshold { MARKED } else { 0 };
    }
}

/// Resize a mask to `size` without introducing grey fringes.
///
/// Nearest-neighbour sampling keeps hard edges; the result is binarized at
/// [`BINARY_THRESHOLD`] so non-binary inputs come out binary as well.
#[must_use]
pub fn resize_mask(mask: &GrayImage, size: (u32, u32)) -> GrayImage {
    let mut out = if mask.dimensions() == size {
        mask.clone()
    } else {
        image::imageops::resize(mask, size.0, size.1, FilterType::Nearest)
    };
    binarize(&mut out, BINARY_THRESHOLD);
    out
}

/// Number of marked pixels in a binary mask.
#[must_use]
pub fn marked_pixel_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p.0[0] > BINARY_THRESHOLD).count()
}

/// Image with marked pixels tinted 50% red, for display.
#[must_use]
pub fn overlay_mask(image: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = image.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        let marked = mask.get_pixel_checked(x, y).is_some_and(|m| m.0[0] > 0);
        if marked {
            let Rgb([r, g, b]) = *px;
            *px = Rgb([
                blend_half(r, 255),
                blend_half(g, 0),
                blend_half(b, 0),
            ]);
        }
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn blend_half(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}
