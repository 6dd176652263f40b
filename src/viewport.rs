//! Mapping between display-surface coordinates and image pixels.
//!
//! The image is fitted inside the surface preserving aspect ratio and centred.
//! A mapper is a pure function of the surface size, the image size and the
//! [`FitPolicy`]; build a new one whenever either size changes, a stale mapper
//! puts painted strokes on the wrong pixels.

/// How an image is fitted into the display surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPolicy {
    /// Factor applied to the fitted scale (e.g. `0.9` leaves a 5% border on each side).
    pub margin: f64,
    /// Allow the image to be drawn larger than its native size.
    pub allow_upscale: bool,
}

impl Default for FitPolicy {
    fn default() -> Self {
        Self {
            margin: 1.0,
            allow_upscale: false,
        }
    }
}

/// Converts surface coordinates to image-pixel coordinates and back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    image_width: u32,
    image_height: u32,
    scale: f64,
    offset_x: i64,
    offset_y: i64,
}

impl CoordinateMapper {
    /// Fit an image of `image` size into a surface of `surface` size.
    ///
    /// Returns `None` when any dimension is zero or the policy margin is not
    /// a positive finite number.
    #[must_use]
    pub fn new(surface: (u32, u32), image: (u32, u32), policy: FitPolicy) -> Option<Self> {
        let (sw, sh) = surface;
        let (iw, ih) = image;
        if sw == 0 || sh == 0 || iw == 0 || ih == 0 {
            return None;
        }
        if !(policy.margin.is_finite() && policy.margin > 0.0) {
            return None;
        }

        let fit = (f64::from(sw) / f64::from(iw)).min(f64::from(sh) / f64::from(ih));
        let mut scale = fit * policy.margin;
        if !policy.allow_upscale {
            scale = scale.min(1.0);
        }

        #[allow(clippy::cast_possible_truncation)]
        let offset = |surface: u32, image: u32| -> i64 {
            ((f64::from(surface) - f64::from(image) * scale) / 2.0)
                .floor()
                .max(0.0) as i64
        };

        Some(Self {
            image_width: iw,
            image_height: ih,
            scale,
            offset_x: offset(sw, iw),
            offset_y: offset(sh, ih),
        })
    }

    /// Surface pixels per image pixel.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Top-left corner of the drawn image on the surface.
    #[must_use]
    pub fn offset(&self) -> (i64, i64) {
        (self.offset_x, self.offset_y)
    }

    /// Size of the image as drawn on the surface, rounded down.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn displayed_size(&self) -> (u32, u32) {
        (
            (f64::from(self.image_width) * self.scale) as u32,
            (f64::from(self.image_height) * self.scale) as u32,
        )
    }

    /// Map a surface point to the image pixel beneath it.
    ///
    /// Points outside the drawn image are clamped onto the nearest edge pixel.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn to_image_space(&self, x: f64, y: f64) -> (u32, u32) {
        let map = |v: f64, offset: i64, limit: u32| -> u32 {
            let img = ((v - offset as f64) / self.scale).floor();
            if img.is_nan() {
                return 0;
            }
            img.clamp(0.0, f64::from(limit - 1)) as u32
        };
        (
            map(x, self.offset_x, self.image_width),
            map(y, self.offset_y, self.image_height),
        )
    }

    /// Map an image pixel back to the surface position of its top-left corner.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_surface_space(&self, x: u32, y: u32) -> (f64, f64) {
        (
            f64::from(x) * self.scale + self.offset_x as f64,
            f64::from(y) * self.scale + self.offset_y as f64,
        )
    }

    /// Convert a brush radius measured in surface pixels to image pixels.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn radius_to_image(&self, radius: u32) -> u32 {
        ((f64::from(radius) / self.scale).round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(CoordinateMapper::new((0, 100), (10, 10), FitPolicy::default()).is_none());
        assert!(CoordinateMapper::new((100, 100), (10, 0), FitPolicy::default()).is_none());
        let bad = FitPolicy {
            margin: 0.0,
            allow_upscale: true,
        };
        assert!(CoordinateMapper::new((100, 100), (10, 10), bad).is_none());
    }

    #[test]
    fn downscales_and_centres_wide_image() {
        let m = CoordinateMapper::new((400, 400), (800, 400), FitPolicy::default()).unwrap();
        assert!((m.scale() - 0.5).abs() < 1e-12);
        assert_eq!(m.offset(), (0, 100));
        assert_eq!(m.displayed_size(), (400, 200));
        assert_eq!(m.to_image_space(0.0, 100.0), (0, 0));
        assert_eq!(m.to_image_space(200.0, 200.0), (400, 200));
    }

    #[test]
    fn never_upscales_without_permission() {
        let m = CoordinateMapper::new((1000, 1000), (100, 50), FitPolicy::default()).unwrap();
        assert!((m.scale() - 1.0).abs() < 1e-12);
        assert_eq!(m.offset(), (450, 475));

        let up = FitPolicy {
            margin: 0.9,
            allow_upscale: true,
        };
        let m = CoordinateMapper::new((1000, 1000), (100, 50), up).unwrap();
        assert!((m.scale() - 9.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_points_outside_the_image() {
        let m = CoordinateMapper::new((300, 300), (100, 100), FitPolicy::default()).unwrap();
        assert_eq!(m.to_image_space(-50.0, -50.0), (0, 0));
        assert_eq!(m.to_image_space(10_000.0, 10_000.0), (99, 99));
        assert_eq!(m.to_image_space(f64::NAN, 150.0), (0, 50));
    }

    #[test]
    fn every_surface_point_lands_inside_the_image() {
        let cases = [
            ((640, 480), (1920, 1080)),
            ((333, 777), (17, 5)),
            ((1, 1), (4000, 3000)),
            ((1024, 768), (1024, 768)),
        ];
        for (surface, image) in cases {
            let m = CoordinateMapper::new(surface, image, FitPolicy::default()).unwrap();
            for sx in (0..surface.0).step_by(7) {
                for sy in (0..surface.1).step_by(11) {
                    let (x, y) = m.to_image_space(f64::from(sx), f64::from(sy));
                    assert!(x < image.0 && y < image.1, "{surface:?} {image:?} -> ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn surface_centre_maps_to_image_centre() {
        let cases = [((640, 480), (1920, 1080)), ((500, 500), (120, 80)), ((801, 601), (1000, 999))];
        for (surface, image) in cases {
            let m = CoordinateMapper::new(surface, image, FitPolicy::default()).unwrap();
            let (x, y) = m.to_image_space(f64::from(surface.0) / 2.0, f64::from(surface.1) / 2.0);
            // one surface pixel of tolerance, expressed in image pixels
            let tol = 1.0 / m.scale() + 1.0;
            assert!((f64::from(x) - f64::from(image.0) / 2.0).abs() <= tol);
            assert!((f64::from(y) - f64::from(image.1) / 2.0).abs() <= tol);
        }
    }

    #[test]
    fn surface_round_trip() {
        let m = CoordinateMapper::new((300, 200), (600, 400), FitPolicy::default()).unwrap();
        let (sx, sy) = m.to_surface_space(100, 50);
        assert_eq!(m.to_image_space(sx, sy), (100, 50));
        assert_eq!(m.radius_to_image(10), 20);
    }
}
