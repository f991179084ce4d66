//! Layout constraints passed down the shadow tree.
//!
//! A node is laid out with `layout(constraints) -> Size`. Measurement
//! functions see the same bounds as per-axis (value, [`MeasureMode`]) pairs.

use weft_api::{MeasureMode, Size};

use crate::style::Padding;

/// Min/max bounds a node may occupy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConstraints {
    pub min_width: f32,
    pub max_width: f32,
    pub min_height: f32,
    pub max_height: f32,
}

impl LayoutConstraints {
    /// Unbounded constraints (infinite max, zero min).
    pub const UNBOUNDED: Self = Self {
        min_width: 0.0,
        max_width: f32::INFINITY,
        min_height: 0.0,
        max_height: f32::INFINITY,
    };

    /// Exact size required.
    #[inline]
    pub fn tight(width: f32, height: f32) -> Self {
        Self {
            min_width: width,
            max_width: width,
            min_height: height,
            max_height: height,
        }
    }

    #[inline]
    pub fn loose(max_width: f32, max_height: f32) -> Self {
        Self {
            min_width: 0.0,
            max_width,
            min_height: 0.0,
            max_height,
        }
    }

    /// Pin the width, keeping it inside the current bounds.
    #[inline]
    pub fn with_width(self, width: f32) -> Self {
        let width = width.clamp(self.min_width, self.max_width);
        Self {
            min_width: width,
            max_width: width,
            ..self
        }
    }

    /// Pin the height, keeping it inside the current bounds.
    #[inline]
    pub fn with_height(self, height: f32) -> Self {
        let height = height.clamp(self.min_height, self.max_height);
        Self {
            min_height: height,
            max_height: height,
            ..self
        }
    }

    /// Constrain a size to these bounds.
    #[inline]
    pub fn constrain(&self, size: Size) -> Size {
        debug_assert!(!size.width.is_nan(), "NaN width in layout");
        debug_assert!(!size.height.is_nan(), "NaN height in layout");
        Size {
            width: size.width.clamp(self.min_width, self.max_width),
            height: size.height.clamp(self.min_height, self.max_height),
        }
    }

    /// Shrink by padding.
    #[inline]
    pub fn deflate(&self, padding: &Padding) -> Self {
        Self {
            min_width: (self.min_width - padding.horizontal()).max(0.0),
            max_width: (self.max_width - padding.horizontal()).max(0.0),
            min_height: (self.min_height - padding.vertical()).max(0.0),
            max_height: (self.max_height - padding.vertical()).max(0.0),
        }
    }

    /// Per-axis measurement input: `(width, width_mode, height, height_mode)`.
    ///
    /// An axis is `Exactly` when tight, `AtMost` when bounded, and
    /// `Undefined` (value is infinite) otherwise.
    pub fn measure_modes(&self) -> (f32, MeasureMode, f32, MeasureMode) {
        let (width, width_mode) = axis_mode(self.min_width, self.max_width);
        let (height, height_mode) = axis_mode(self.min_height, self.max_height);
        (width, width_mode, height, height_mode)
    }

    /// Bit pattern of the four bounds, for cache keys.
    pub(crate) fn key(&self) -> [u32; 4] {
        [
            self.min_width.to_bits(),
            self.max_width.to_bits(),
            self.min_height.to_bits(),
            self.max_height.to_bits(),
        ]
    }
}

fn axis_mode(min: f32, max: f32) -> (f32, MeasureMode) {
    if min == max {
        (max, MeasureMode::Exactly)
    } else if max.is_finite() {
        (max, MeasureMode::AtMost)
    } else {
        (f32::INFINITY, MeasureMode::Undefined)
    }
}

impl Default for LayoutConstraints {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tight_constraints() {
        let c = LayoutConstraints::tight(100.0, 50.0);
        assert_eq!(
            c.measure_modes(),
            (100.0, MeasureMode::Exactly, 50.0, MeasureMode::Exactly)
        );
    }

    #[test]
    fn test_measure_modes() {
        let (w, wm, h, hm) = LayoutConstraints::loose(300.0, f32::INFINITY).measure_modes();
        assert_eq!((w, wm), (300.0, MeasureMode::AtMost));
        assert_eq!(hm, MeasureMode::Undefined);
        assert!(h.is_infinite());
    }

    #[test]
    fn test_constrain() {
        let c = LayoutConstraints::loose(100.0, 50.0);
        assert_eq!(c.constrain(Size::new(50.0, 25.0)), Size::new(50.0, 25.0));
        assert_eq!(c.constrain(Size::new(200.0, 100.0)), Size::new(100.0, 50.0));
    }

    #[test]
    fn test_pin_axis_respects_bounds() {
        let c = LayoutConstraints::loose(100.0, 50.0).with_width(140.0);
        assert_eq!((c.min_width, c.max_width), (100.0, 100.0));
        assert_eq!(c.max_height, 50.0);
    }

    #[test]
    fn test_deflate() {
        let deflated = LayoutConstraints::tight(100.0, 50.0).deflate(&Padding::all(10.0));
        assert_eq!(deflated.max_width, 80.0);
        assert_eq!(deflated.max_height, 30.0);
    }
}
