//! Per-frame palette reduction for indexed-colour output.

use std::collections::HashMap;

use color_quant::NeuQuant;
use image::RgbaImage;

/// NeuQuant sampling factor: 1 is slowest/best, 30 fastest.
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

/// A frame mapped onto its own palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFrame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB triples, at most 256 entries.
    pub palette: Vec<u8>,
    /// One palette index per pixel, row-major.
    pub indices: Vec<u8>,
}

impl IndexedFrame {
    pub fn palette_len(&self) -> usize {
        self.palette.len() / 3
    }
}

/// Reduce `frame` to at most `max_colors` colours (clamped to 2..=256).
///
/// Frames that already fit are mapped exactly; others go through NeuQuant.
/// Alpha is ignored: output frames are opaque.
pub fn quantize(frame: &RgbaImage, max_colors: usize) -> IndexedFrame {
    let max_colors = max_colors.clamp(2, 256);
    exact_palette(frame, max_colors).unwrap_or_else(|| neuquant_palette(frame, max_colors))
}

fn exact_palette(frame: &RgbaImage, max_colors: usize) -> Option<IndexedFrame> {
    let mut lookup: HashMap<[u8; 3], u8> = HashMap::new();
    let mut palette = Vec::new();
    let mut indices = Vec::with_capacity((frame.width() * frame.height()) as usize);

    for pixel in frame.pixels() {
        let rgb = [pixel[0], pixel[1], pixel[2]];
        let index = match lookup.get(&rgb) {
            Some(&index) => index,
            None => {
                if lookup.len() == max_colors {
                    return None;
                }
                let index = lookup.len() as u8;
                lookup.insert(rgb, index);
                palette.extend_from_slice(&rgb);
                index
            }
        };
        indices.push(index);
    }

    Some(IndexedFrame {
        width: frame.width(),
        height: frame.height(),
        palette,
        indices,
    })
}

fn neuquant_palette(frame: &RgbaImage, max_colors: usize) -> IndexedFrame {
    let mut opaque = frame.as_raw().clone();
    for alpha in opaque.iter_mut().skip(3).step_by(4) {
        *alpha = 255;
    }

    let quant = NeuQuant::new(NEUQUANT_SAMPLE_FACTOR, max_colors, &opaque);
    let indices = opaque
        .chunks_exact(4)
        .map(|pixel| quant.index_of(pixel) as u8)
        .collect();

    IndexedFrame {
        width: frame.width(),
        height: frame.height(),
        palette: quant.color_map_rgb(),
        indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn few_colours_map_exactly() {
        let mut frame = RgbaImage::from_pixel(4, 2, Rgba([255, 0, 0, 255]));
        frame.put_pixel(3, 1, Rgba([0, 0, 255, 255]));
        let indexed = quantize(&frame, 256);

        assert_eq!(indexed.palette, vec![255, 0, 0, 0, 0, 255]);
        assert_eq!(indexed.indices, vec![0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn many_colours_are_bounded_by_palette_size() {
        let frame = RgbaImage::from_fn(64, 64, |x, y| Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255]));
        let indexed = quantize(&frame, 256);

        assert!(indexed.palette_len() <= 256);
        assert_eq!(indexed.indices.len(), 64 * 64);
        assert!(indexed
            .indices
            .iter()
            .all(|&i| (i as usize) < indexed.palette_len()));
    }

    #[test]
    fn small_palette_limit_falls_back_to_neuquant() {
        let frame = RgbaImage::from_fn(8, 8, |x, _| Rgba([(x * 30) as u8, 0, 0, 255]));
        let indexed = quantize(&frame, 4);
        assert!(indexed.palette_len() <= 4);
    }
}
