//! The inpainting oracle boundary and a built-in pure-Rust oracle.
//!
//! All methods fill the hole from its boundary inward ("onion peeling"):
//! a breadth-first sweep orders hole pixels by their distance to known
//! content, and each pixel is synthesised only from pixels that are already
//! known or filled.

use std::collections::VecDeque;

use image::{GrayImage, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::mask::BINARY_THRESHOLD;
use crate::strategy::InpaintMethod;

/// Radius used by [`InpaintMethod::Basic`] regardless of the requested one.
const BASIC_RADIUS: u32 = 3;
/// Smoothing sweeps run after the initial fill for diffusion methods.
const DIFFUSION_ITERATIONS: usize = 64;
/// Half-size of the comparison patch for exemplar search (7x7 patches).
const PATCH_HALF: i64 = 3;
/// Random candidates tried per hole pixel during exemplar search.
const PATCH_CANDIDATES: usize = 24;
/// Minimum number of overlapping valid pixels for a patch comparison.
const MIN_PATCH_OVERLAP: usize = 6;

/// Fills masked pixels of an image plausibly from their surroundings.
///
/// Implementations must reject masks whose size differs from the image with
/// [`Error::DimensionMismatch`] and must leave unmasked pixels unchanged.
pub trait Inpainter: Send + Sync {
    /// Fill every pixel of `image` whose `mask` value is above 127.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] for mismatched sizes and
    /// [`Error::Oracle`] when the hole cannot be filled.
    fn inpaint(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
        radius: u32,
        method: InpaintMethod,
    ) -> Result<RgbImage>;

    /// Whether `method` is implemented. Unsupported patch-based requests are
    /// downgraded by [`crate::strategy::resolve`].
    fn supports(&self, _method: InpaintMethod) -> bool {
        true
    }
}

/// Fail with [`Error::DimensionMismatch`] unless `image` and `mask` share a size.
///
/// # Errors
///
/// See above.
pub fn check_dimensions(image: &RgbImage, mask: &GrayImage) -> Result<()> {
    if image.dimensions() == mask.dimensions() {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            image: image.dimensions(),
            mask: mask.dimensions(),
        })
    }
}

/// Deterministic CPU inpainter supporting every [`InpaintMethod`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinInpainter;

impl Inpainter for BuiltinInpainter {
    fn inpaint(
        &self,
        image: &RgbImage,
        mask: &GrayImage,
        radius: u32,
        method: InpaintMethod,
    ) -> Result<RgbImage> {
        check_dimensions(image, mask)?;

        let mut canvas = Canvas::new(image, mask);
        if canvas.hole_count() == 0 {
            return Ok(image.clone());
        }
        if canvas.hole_count() == canvas.pixels.len() {
            return Err(Error::Oracle(
                "mask covers the whole image, nothing to sample from".to_string(),
            ));
        }

        let original_known = canvas.known.clone();
        let order = canvas.peel_order();
        match method {
            InpaintMethod::Basic => {
                canvas.fill_weighted(&order, BASIC_RADIUS);
                canvas.diffuse(&order, DIFFUSION_ITERATIONS);
            }
            InpaintMethod::NavierStokes => {
                canvas.fill_weighted(&order, radius);
                canvas.diffuse(&order, DIFFUSION_ITERATIONS);
            }
            InpaintMethod::FastMarching => canvas.fill_weighted(&order, radius),
            InpaintMethod::PatchBased => {
                canvas.fill_weighted(&order, radius);
                canvas.refine_patches(&order, &original_known, radius);
            }
        }

        Ok(canvas.into_image(image, &original_known))
    }
}

/// Float working copy of an image plus a per-pixel "known" flag.
struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 3]>,
    known: Vec<bool>,
}

impl Canvas {
    fn new(image: &RgbImage, mask: &GrayImage) -> Self {
        let pixels = image
            .pixels()
            .map(|p| [f32::from(p[0]), f32::from(p[1]), f32::from(p[2])])
            .collect();
        let known = mask.pixels().map(|m| m.0[0] <= BINARY_THRESHOLD).collect();
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            pixels,
            known,
        }
    }

    fn hole_count(&self) -> usize {
        self.known.iter().filter(|k| !**k).count()
    }

    fn neighbours4(&self, idx: usize) -> impl Iterator<Item = usize> {
        let (w, h) = (self.width, self.height);
        let (x, y) = (idx % w, idx / w);
        [
            (x > 0).then(|| idx - 1),
            (x + 1 < w).then(|| idx + 1),
            (y > 0).then(|| idx - w),
            (y + 1 < h).then(|| idx + w),
        ]
        .into_iter()
        .flatten()
    }

    /// Hole pixels ordered by 4-connected distance to known content.
    fn peel_order(&self) -> Vec<usize> {
        let mut queued = self.known.clone();
        let mut queue = VecDeque::new();
        for idx in 0..self.pixels.len() {
            if !self.known[idx] && self.neighbours4(idx).any(|n| self.known[n]) {
                queued[idx] = true;
                queue.push_back(idx);
            }
        }

        let mut order = Vec::with_capacity(self.hole_count());
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for n in self.neighbours4(idx) {
                if !queued[n] {
                    queued[n] = true;
                    queue.push_back(n);
                }
            }
        }
        order
    }

    /// Inverse-square-distance weighted mean of known pixels within `radius`.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn fill_weighted(&mut self, order: &[usize], radius: u32) {
        let r = i64::from(radius.max(1));
        let (w, h) = (self.width as i64, self.height as i64);
        for &idx in order {
            let (x, y) = ((idx % self.width) as i64, (idx / self.width) as i64);
            let mut acc = [0.0_f32; 3];
            let mut weight_sum = 0.0_f32;
            for dy in -r..=r {
                for dx in -r..=r {
                    let d2 = dx * dx + dy * dy;
                    if d2 == 0 || d2 > r * r {
                        continue;
                    }
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                    let n = (ny * w + nx) as usize;
                    if !self.known[n] {
                        continue;
                    }
                    let weight = 1.0 / d2 as f32;
                    for (a, v) in acc.iter_mut().zip(self.pixels[n]) {
                        *a += weight * v;
                    }
                    weight_sum += weight;
                }
            }
            // peel order guarantees a filled 4-neighbour, so weight_sum > 0
            if weight_sum > 0.0 {
                self.pixels[idx] = acc.map(|a| a / weight_sum);
            }
            self.known[idx] = true;
        }
    }

    /// Gauss-Seidel sweeps replacing each hole pixel with its 4-neighbour mean.
    #[allow(clippy::cast_precision_loss)]
    fn diffuse(&mut self, hole: &[usize], iterations: usize) {
        for _ in 0..iterations {
            for &idx in hole {
                let mut acc = [0.0_f32; 3];
                let mut count = 0.0_f32;
                for n in self.neighbours4(idx) {
                    for (a, v) in acc.iter_mut().zip(self.pixels[n]) {
                        *a += v;
                    }
                    count += 1.0;
                }
                if count > 0.0 {
                    self.pixels[idx] = acc.map(|a| a / count);
                }
            }
        }
    }

    /// Exemplar refinement: each hole pixel, in peel order, takes the centre
    /// of the best matching fully-known patch near the hole.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]
    fn refine_patches(&mut self, order: &[usize], original_known: &[bool], radius: u32) {
        let (w, h) = (self.width as i64, self.height as i64);
        let width = self.width;
        let coords = |idx: usize| ((idx % width) as i64, (idx / width) as i64);

        let (mut x0, mut y0, mut x1, mut y1) = (w, h, 0_i64, 0_i64);
        for &idx in order {
            let (x, y) = coords(idx);
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let margin = (i64::from(radius) * 4).max(16);
        let (sx0, sy0) = ((x0 - margin).max(0), (y0 - margin).max(0));
        let (sx1, sy1) = ((x1 + margin).min(w - 1), (y1 + margin).min(h - 1));
        let (span_x, span_y) = ((sx1 - sx0 + 1) as u64, (sy1 - sy0 + 1) as u64);

        let mut valid = original_known.to_vec();
        let mut offsets: Vec<Option<(i64, i64)>> = vec![None; self.pixels.len()];
        let mut rng: u64 = 0x9E37_79B9_7F4A_7C15;

        for &idx in order {
            let (x, y) = coords(idx);
            let mut candidates = Vec::with_capacity(PATCH_CANDIDATES + 2);
            for (nx, ny) in [(x - 1, y), (x, y - 1)] {
                if nx >= 0 && ny >= 0 {
                    if let Some((ox, oy)) = offsets[(ny * w + nx) as usize] {
                        candidates.push((x + ox, y + oy));
                    }
                }
            }
            for _ in 0..PATCH_CANDIDATES {
                rng = rng
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let cx = sx0 + ((rng >> 33) % span_x) as i64;
                rng = rng
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                let cy = sy0 + ((rng >> 33) % span_y) as i64;
                candidates.push((cx, cy));
            }

            let mut best: Option<(f32, i64, i64)> = None;
            for (cx, cy) in candidates {
                if cx < 0 || cy < 0 || cx >= w || cy >= h {
                    continue;
                }
                if !original_known[(cy * w + cx) as usize] {
                    continue;
                }
                if let Some(ssd) = self.patch_distance(&valid, (x, y), (cx, cy)) {
                    if best.is_none_or(|(b, _, _)| ssd < b) {
                        best = Some((ssd, cx, cy));
                    }
                }
            }

            if let Some((_, cx, cy)) = best {
                self.pixels[idx] = self.pixels[(cy * w + cx) as usize];
                offsets[idx] = Some((cx - x, cy - y));
            }
            valid[idx] = true;
        }
    }

    /// Mean squared difference between the patches around `a` and `b`,
    /// counting only positions valid on both sides.
    #[allow(
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn patch_distance(&self, valid: &[bool], a: (i64, i64), b: (i64, i64)) -> Option<f32> {
        let (w, h) = (self.width as i64, self.height as i64);
        let mut ssd = 0.0_f32;
        let mut count = 0_usize;
        for dy in -PATCH_HALF..=PATCH_HALF {
            for dx in -PATCH_HALF..=PATCH_HALF {
                let (ax, ay) = (a.0 + dx, a.1 + dy);
                let (bx, by) = (b.0 + dx, b.1 + dy);
                if ax < 0 || ay < 0 || ax >= w || ay >= h || bx < 0 || by < 0 || bx >= w || by >= h {
                    continue;
                }
                let ai = (ay * w + ax) as usize;
                let bi = (by * w + bx) as usize;
                if !valid[ai] || !valid[bi] {
                    continue;
                }
                for (pa, pb) in self.pixels[ai].iter().zip(self.pixels[bi]) {
                    let d = pa - pb;
                    ssd += d * d;
                }
                count += 1;
            }
        }
        (count >= MIN_PATCH_OVERLAP).then(|| ssd / count as f32)
    }

    /// Write filled pixels back; known pixels are copied from `original` untouched.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_image(self, original: &RgbImage, original_known: &[bool]) -> RgbImage {
        let mut out = original.clone();
        for ((px, value), known) in out.pixels_mut().zip(self.pixels).zip(original_known) {
            if !known {
                *px = Rgb(value.map(|v| v.round().clamp(0.0, 255.0) as u8));
            }
        }
        out
    }
}
