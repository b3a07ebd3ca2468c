//! Raster drawing primitives for the compositor canvas.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use qamrec_media_model::InsetRect;

/// Border drawn around the picture-in-picture inset: white at 30% opacity.
pub const INSET_BORDER_COLOR: Rgba<u8> = Rgba([255, 255, 255, 77]);

/// Border line width in pixels, centred on the inset outline.
pub const INSET_BORDER_WIDTH: f32 = 2.0;

const SCALE_FILTER: FilterType = FilterType::Triangle;

/// Stretch `frame` to exactly `width`×`height`.
pub fn scale_to(frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    imageops::resize(frame, width.max(1), height.max(1), SCALE_FILTER)
}

/// Draw `frame` stretched over the whole canvas.
pub fn draw_full(canvas: &mut RgbaImage, frame: &RgbaImage) {
    let (w, h) = canvas.dimensions();
    if frame.dimensions() == (w, h) {
        canvas.copy_from_slice(frame.as_raw());
    } else {
        let scaled = scale_to(frame, w, h);
        canvas.copy_from_slice(scaled.as_raw());
    }
}

/// Signed distance from a pixel centre to the outline of `rect`.
///
/// Negative inside, positive outside.
pub fn rounded_rect_distance(rect: &InsetRect, px: f32, py: f32) -> f32 {
    let half_w = rect.width as f32 / 2.0;
    let half_h = rect.height as f32 / 2.0;
    let cx = rect.x as f32 + half_w;
    let cy = rect.y as f32 + half_h;
    let r = rect.radius as f32;

    let qx = (px - cx).abs() - half_w + r;
    let qy = (py - cy).abs() - half_h + r;
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    let inside = qx.max(qy).min(0.0);
    outside + inside - r
}

/// Whether the pixel at integer coordinates lies inside the rounded clip.
pub fn rounded_rect_contains(rect: &InsetRect, x: u32, y: u32) -> bool {
    if x < rect.x || y < rect.y || x >= rect.right() || y >= rect.bottom() {
        return false;
    }
    rounded_rect_distance(rect, x as f32 + 0.5, y as f32 + 0.5) <= 0.0
}

/// Draw `frame` stretched into `rect`, clipped to its rounded outline.
pub fn draw_rounded_inset(canvas: &mut RgbaImage, frame: &RgbaImage, rect: &InsetRect) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let scaled = scale_to(frame, rect.width, rect.height);
    for (sx, sy, pixel) in scaled.enumerate_pixels() {
        let (x, y) = (rect.x + sx, rect.y + sy);
        if x < canvas.width() && y < canvas.height() && rounded_rect_contains(rect, x, y) {
            canvas.put_pixel(x, y, *pixel);
        }
    }
}

/// Stroke the rounded outline of `rect` with a line of `width` pixels.
pub fn stroke_rounded_rect(canvas: &mut RgbaImage, rect: &InsetRect, width: f32, color: Rgba<u8>) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let half = width / 2.0;
    let pad = half.ceil() as u32;
    let x0 = rect.x.saturating_sub(pad);
    let y0 = rect.y.saturating_sub(pad);
    let x1 = (rect.right() + pad).min(canvas.width());
    let y1 = (rect.bottom() + pad).min(canvas.height());

    for y in y0..y1 {
        for x in x0..x1 {
            let d = rounded_rect_distance(rect, x as f32 + 0.5, y as f32 + 0.5);
            if d.abs() <= half {
                blend(canvas.get_pixel_mut(x, y), color);
            }
        }
    }
}

/// Source-over blend of `src` onto `dst`.
pub fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let a = src[3] as u32;
    if a == 0 {
        return;
    }
    let inv = 255 - a;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * a + dst[c] as u32 * inv + 127) / 255) as u8;
    }
    dst[3] = (a + (dst[3] as u32 * inv + 127) / 255).min(255) as u8;
}
