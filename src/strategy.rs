//! Inpainting method selection.
//!
//! The user picks either a concrete [`InpaintMethod`] or [`Algorithm::Auto`].
//! Auto is resolved from the mask geometry before the oracle is called, so
//! the oracle only ever sees a concrete method.

use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use crate::inpaint::Inpainter;
use crate::mask::{binarize, marked_pixel_count, BINARY_THRESHOLD};

/// Radius bounds accepted by [`InpaintStrategy`].
pub const RADIUS_RANGE: (u32, u32) = (1, 20);

/// Area fraction below which a mask counts as small.
const SMALL_AREA: f64 = 0.01;
/// Area fraction below which a mask counts as medium.
const MEDIUM_AREA: f64 = 0.1;
/// Complexity above which a small mask is treated as irregular.
const SMALL_COMPLEXITY: f64 = 0.2;
/// Complexity above which a medium mask is treated as irregular.
const MEDIUM_COMPLEXITY: f64 = 0.3;

/// A concrete inpainting method understood by the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InpaintMethod {
    /// Diffusion with a fixed small radius.
    Basic,
    /// Fluid-dynamics style isophote continuation.
    NavierStokes,
    /// Boundary-inward weighted averaging (Telea).
    FastMarching,
    /// Exemplar patch copying.
    PatchBased,
}

impl InpaintMethod {
    /// Every method, in menu order.
    pub const ALL: [InpaintMethod; 4] = [
        InpaintMethod::Basic,
        InpaintMethod::NavierStokes,
        InpaintMethod::FastMarching,
        InpaintMethod::PatchBased,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            InpaintMethod::Basic => "basic",
            InpaintMethod::NavierStokes => "navier-stokes",
            InpaintMethod::FastMarching => "fast-marching",
            InpaintMethod::PatchBased => "patch-based",
        }
    }
}

impl fmt::Display for InpaintMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InpaintMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(InpaintMethod::Basic),
            "ns" | "navier-stokes" | "navier_stokes" => Ok(InpaintMethod::NavierStokes),
            "telea" | "fm" | "fast-marching" | "fast_marching" => Ok(InpaintMethod::FastMarching),
            "patch" | "patchmatch" | "patch-based" | "patch_based" => Ok(InpaintMethod::PatchBased),
            other => Err(format!("unknown inpainting method: {other}")),
        }
    }
}

/// User-facing algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Choose from mask geometry.
    #[default]
    Auto,
    /// Always use this method.
    Fixed(InpaintMethod),
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Auto => f.write_str("auto"),
            Algorithm::Fixed(m) => m.fmt(f),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(Algorithm::Auto)
        } else {
            s.parse().map(Algorithm::Fixed)
        }
    }
}

/// Parameters of one inpainting invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InpaintStrategy {
    /// Method or auto.
    pub algorithm: Algorithm,
    /// Neighbourhood radius in pixels, within [`RADIUS_RANGE`].
    pub radius: u32,
    /// Preview quality `1..=100`, the linear downscale percentage for previews.
    pub preview_quality: u8,
}

impl Default for InpaintStrategy {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Auto,
            radius: 3,
            preview_quality: 80,
        }
    }
}

impl InpaintStrategy {
    /// Build a strategy, clamping radius and preview quality into range.
    #[must_use]
    pub fn new(algorithm: Algorithm, radius: u32, preview_quality: u8) -> Self {
        Self {
            algorithm,
            radius: radius.clamp(RADIUS_RANGE.0, RADIUS_RANGE.1),
            preview_quality: preview_quality.clamp(1, 100),
        }
    }

    /// Linear scale factor used for preview runs.
    #[must_use]
    pub fn preview_scale(&self) -> f64 {
        f64::from(self.preview_quality.clamp(1, 100)) / 100.0
    }
}

/// Geometry of a mask that drives auto selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskStats {
    /// Marked pixels over all pixels.
    pub area_fraction: f64,
    /// Boundary pixels (dilation XOR erosion) over marked pixels; `0` for an empty mask.
    pub complexity: f64,
}

impl MaskStats {
    /// Measure a mask. Values above 127 count as marked.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(mask: &GrayImage) -> Self {
        let total = u64::from(mask.width()) * u64::from(mask.height());
        let marked = marked_pixel_count(mask);
        if total == 0 || marked == 0 {
            return Self {
                area_fraction: 0.0,
                complexity: 0.0,
            };
        }

        let mut binary = mask.clone();
        binarize(&mut binary, BINARY_THRESHOLD);
        let grown = dilate(&binary, Norm::LInf, 1);
        let shrunk = erode(&binary, Norm::LInf, 1);
        let edge = grown
            .pixels()
            .zip(shrunk.pixels())
            .filter(|(g, s)| (g.0[0] ^ s.0[0]) > 0)
            .count();

        Self {
            area_fraction: marked as f64 / total as f64,
            complexity: edge as f64 / marked as f64,
        }
    }
}

/// The auto-selection policy table.
#[must_use]
pub fn select_method(stats: MaskStats) -> InpaintMethod {
    if stats.area_fraction < SMALL_AREA {
        if stats.complexity > SMALL_COMPLEXITY {
            InpaintMethod::FastMarching
        } else {
            InpaintMethod::NavierStokes
        }
    } else if stats.area_fraction < MEDIUM_AREA {
        if stats.complexity > MEDIUM_COMPLEXITY {
            InpaintMethod::PatchBased
        } else {
            InpaintMethod::FastMarching
        }
    } else {
        InpaintMethod::PatchBased
    }
}

/// Pick a concrete method for `mask`.
#[must_use]
pub fn select_auto(mask: &GrayImage) -> InpaintMethod {
    select_method(MaskStats::of(mask))
}

/// Outcome of resolving an [`Algorithm`] against a mask and an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Method asked for (after auto selection).
    pub requested: InpaintMethod,
    /// Method that will actually run.
    pub method: InpaintMethod,
}

impl Resolution {
    /// Whether the oracle lacked the requested method.
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.requested != self.method
    }
}

/// Resolve `algorithm` to a concrete method the oracle supports.
///
/// Patch-based requests on an oracle without patch support fall back to
/// fast-marching with a warning.
pub fn resolve(algorithm: Algorithm, mask: &GrayImage, oracle: &dyn Inpainter) -> Resolution {
    let requested = match algorithm {
        Algorithm::Auto => {
            let stats = MaskStats::of(mask);
            let method = select_method(stats);
            tracing::info!(
                %method,
                area = stats.area_fraction,
                complexity = stats.complexity,
                "auto-selected inpainting method"
            );
            method
        }
        Algorithm::Fixed(method) => method,
    };

    if requested == InpaintMethod::PatchBased && !oracle.supports(InpaintMethod::PatchBased) {
        tracing::warn!("patch-based inpainting unavailable, falling back to fast-marching");
        return Resolution {
            requested,
            method: InpaintMethod::FastMarching,
        };
    }

    Resolution {
        requested,
        method: requested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::inpaint::BuiltinInpainter;
    use image::{Luma, RgbImage};

    struct NoPatches;

    impl Inpainter for NoPatches {
        fn inpaint(
            &self,
            image: &RgbImage,
            _mask: &GrayImage,
            _radius: u32,
            _method: InpaintMethod,
        ) -> Result<RgbImage> {
            Ok(image.clone())
        }

        fn supports(&self, method: InpaintMethod) -> bool {
            method != InpaintMethod::PatchBased
        }
    }

    fn stats(area_fraction: f64, complexity: f64) -> MaskStats {
        MaskStats {
            area_fraction,
            complexity,
        }
    }

    #[test]
    fn decision_table() {
        assert_eq!(select_method(stats(0.005, 0.5)), InpaintMethod::FastMarching);
        assert_eq!(select_method(stats(0.005, 0.2)), InpaintMethod::NavierStokes);
        assert_eq!(select_method(stats(0.05, 0.31)), InpaintMethod::PatchBased);
        assert_eq!(select_method(stats(0.05, 0.3)), InpaintMethod::FastMarching);
        assert_eq!(select_method(stats(0.01, 0.0)), InpaintMethod::FastMarching);
        assert_eq!(select_method(stats(0.1, 0.0)), InpaintMethod::PatchBased);
        assert_eq!(select_method(stats(0.5, 0.9)), InpaintMethod::PatchBased);
    }

    #[test]
    fn stats_of_empty_mask_are_zero() {
        let s = MaskStats::of(&GrayImage::new(10, 10));
        assert!(s.area_fraction.abs() < f64::EPSILON);
        assert!(s.complexity.abs() < f64::EPSILON);
    }

    #[test]
    fn stats_of_square() {
        let mut mask = GrayImage::new(100, 100);
        for y in 40..50 {
            for x in 40..50 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let s = MaskStats::of(&mask);
        assert!((s.area_fraction - 0.01).abs() < 1e-12);
        // 12x12 dilated minus 8x8 eroded = 80 boundary pixels over 100 marked
        assert!((s.complexity - 0.8).abs() < 1e-12);
        assert_eq!(select_auto(&mask), InpaintMethod::PatchBased);
    }

    #[test]
    fn large_blob_is_patch_based() {
        let mut mask = GrayImage::new(20, 20);
        for y in 0..20 {
            for x in 0..10 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        assert_eq!(select_auto(&mask), InpaintMethod::PatchBased);
    }

    #[test]
    fn small_compact_mask_prefers_navier_stokes() {
        let mut mask = GrayImage::new(1000, 1000);
        for y in 100..180 {
            for x in 100..180 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let s = MaskStats::of(&mask);
        assert!(s.area_fraction < 0.01);
        assert!(s.complexity <= 0.2);
        assert_eq!(select_method(s), InpaintMethod::NavierStokes);
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("auto".parse::<Algorithm>(), Ok(Algorithm::Auto));
        assert_eq!(
            "Telea".parse::<Algorithm>(),
            Ok(Algorithm::Fixed(InpaintMethod::FastMarching))
        );
        assert_eq!("ns".parse::<InpaintMethod>(), Ok(InpaintMethod::NavierStokes));
        assert!("magic".parse::<Algorithm>().is_err());
        for m in InpaintMethod::ALL {
            assert_eq!(m.name().parse::<InpaintMethod>(), Ok(m));
        }
    }

    #[test]
    fn strategy_clamps_parameters() {
        let s = InpaintStrategy::new(Algorithm::Auto, 99, 0);
        assert_eq!(s.radius, 20);
        assert_eq!(s.preview_quality, 1);
        assert!((s.preview_scale() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn patch_request_falls_back_when_unsupported() {
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        let r = resolve(Algorithm::Fixed(InpaintMethod::PatchBased), &mask, &NoPatches);
        assert_eq!(r.method, InpaintMethod::FastMarching);
        assert!(r.fell_back());

        let r = resolve(Algorithm::Auto, &mask, &NoPatches);
        assert_eq!(r.requested, InpaintMethod::PatchBased);
        assert_eq!(r.method, InpaintMethod::FastMarching);

        let r = resolve(Algorithm::Auto, &mask, &BuiltinInpainter);
        assert!(!r.fell_back());
    }
}
