//! Picture-in-picture inset geometry.

use qamrec_common::config::PipDefaults;
use serde::{Deserialize, Serialize};

/// Where and how large the overlay inset is drawn.
///
/// The inset is anchored to the bottom-right corner of the output canvas.
/// Sizes larger than the canvas are clamped when placed, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipLayout {
    pub width: u32,
    pub height: u32,
    pub offset_from_right: u32,
    pub offset_from_bottom: u32,
    pub corner_radius: u32,
}

/// A placed inset in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsetRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Corner radius, limited to half of the shorter side.
    pub radius: u32,
}

impl PipLayout {
    pub const fn new(
        width: u32,
        height: u32,
        offset_from_right: u32,
        offset_from_bottom: u32,
        corner_radius: u32,
    ) -> Self {
        Self {
            width,
            height,
            offset_from_right,
            offset_from_bottom,
            corner_radius,
        }
    }

    /// Place the inset on a canvas of the given size.
    pub fn place(&self, canvas_width: u32, canvas_height: u32) -> InsetRect {
        let width = self.width.min(canvas_width);
        let height = self.height.min(canvas_height);
        let x = canvas_width.saturating_sub(width.saturating_add(self.offset_from_right));
        let y = canvas_height.saturating_sub(height.saturating_add(self.offset_from_bottom));
        InsetRect {
            x,
            y,
            width,
            height,
            radius: self.corner_radius.min(width.min(height) / 2),
        }
    }
}

impl Default for PipLayout {
    fn default() -> Self {
        PipDefaults::default().into()
    }
}

impl From<PipDefaults> for PipLayout {
    fn from(d: PipDefaults) -> Self {
        Self::new(
            d.width,
            d.height,
            d.offset_from_right,
            d.offset_from_bottom,
            d.corner_radius,
        )
    }
}

impl InsetRect {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn places_inset_from_bottom_right() {
        let rect = PipLayout::new(100, 100, 10, 10, 8).place(1280, 720);
        assert_eq!((rect.x, rect.y), (1170, 610));
        assert_eq!((rect.width, rect.height, rect.radius), (100, 100, 8));
    }

    #[test]
    fn default_layout_is_300_square_with_20px_insets() {
        let rect = PipLayout::default().place(1920, 1080);
        assert_eq!((rect.x, rect.y), (1600, 760));
        assert_eq!(rect.radius, 10);
    }

    #[test]
    fn oversized_inset_is_clamped_to_canvas() {
        let rect = PipLayout::new(500, 500, 20, 20, 400).place(320, 240);
        assert_eq!((rect.width, rect.height), (320, 240));
        assert_eq!((rect.x, rect.y), (0, 0));
        assert_eq!(rect.radius, 120);
    }

    proptest! {
        #[test]
        fn placed_inset_stays_inside_canvas(
            w in 0u32..4000, h in 0u32..4000,
            dx in 0u32..4000, dy in 0u32..4000, r in 0u32..4000,
            cw in 1u32..4000, ch in 1u32..4000,
        ) {
            let rect = PipLayout::new(w, h, dx, dy, r).place(cw, ch);
            prop_assert!(rect.right() <= cw);
            prop_assert!(rect.bottom() <= ch);
            prop_assert!(rect.radius * 2 <= rect.width.min(rect.height));
        }
    }
}
