//! Per-frame colour reduction for the in-process GIF writer.
//!
//! Frames with few enough distinct colours get an exact palette; everything
//! else goes through NeuQuant. Pixels below the transparency threshold map to
//! a reserved index appended after the colour entries.

use color_quant::NeuQuant;
use std::collections::HashMap;

/// NeuQuant sampling factor: 1 is slowest and best, 30 fastest.
const SAMPLE_FACTOR: i32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedFrame {
    /// RGB triples, at most 256 entries including the transparent one.
    pub palette: Vec<u8>,
    pub indices: Vec<u8>,
    pub transparent: Option<u8>,
}

impl QuantizedFrame {
    pub fn color_entries(&self) -> usize {
        self.palette.len() / 3
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuantizeSettings {
    /// Palette budget including the transparent slot, 2..=256.
    pub colors: u16,
    /// Alpha below this is fully transparent.
    pub alpha_threshold: u8,
    /// Partially transparent pixels are flattened onto this colour.
    pub background: Option<[u8; 3]>,
}

enum Pixel {
    Transparent,
    Opaque([u8; 3]),
}

fn classify(px: &[u8], settings: &QuantizeSettings) -> Pixel {
    let alpha = px[3];
    if alpha < settings.alpha_threshold {
        return Pixel::Transparent;
    }
    match settings.background {
        Some(bg) if alpha < 255 => {
            let a = alpha as u32;
            let mix = |fg: u8, bg: u8| ((fg as u32 * a + bg as u32 * (255 - a) + 127) / 255) as u8;
            Pixel::Opaque([mix(px[0], bg[0]), mix(px[1], bg[1]), mix(px[2], bg[2])])
        }
        _ => Pixel::Opaque([px[0], px[1], px[2]]),
    }
}

/// Reduces one RGBA frame to an indexed frame.
pub fn quantize_frame(rgba: &[u8], settings: &QuantizeSettings) -> QuantizedFrame {
    let pixels: Vec<Pixel> = rgba
        .chunks_exact(4)
        .map(|px| classify(px, settings))
        .collect();

    let has_transparency = pixels.iter().any(|p| matches!(p, Pixel::Transparent));
    let colors = settings.colors.clamp(2, 256) as usize;
    let budget = if has_transparency { colors - 1 } else { colors };

    let mut distinct: HashMap<[u8; 3], u8> = HashMap::new();
    let mut order: Vec<[u8; 3]> = Vec::new();
    for p in &pixels {
        if let Pixel::Opaque(rgb) = p {
            if !distinct.contains_key(rgb) {
                if order.len() == budget {
                    order.push(*rgb);
                    break;
                }
                distinct.insert(*rgb, order.len() as u8);
                order.push(*rgb);
            }
        }
    }

    let (mut palette, indices) = if order.len() <= budget {
        exact_palette(&pixels, &order, &distinct)
    } else if budget >= 2 {
        neuquant_palette(&pixels, budget)
    } else {
        mean_palette(&pixels)
    };

    let transparent = if has_transparency {
        let slot = (palette.len() / 3) as u8;
        palette.extend_from_slice(&[0, 0, 0]);
        Some(slot)
    } else {
        None
    };

    let indices = indices
        .into_iter()
        .map(|i| i.or(transparent).unwrap_or(0))
        .collect();

    QuantizedFrame {
        palette,
        indices,
        transparent,
    }
}

fn exact_palette(
    pixels: &[Pixel],
    order: &[[u8; 3]],
    lookup: &HashMap<[u8; 3], u8>,
) -> (Vec<u8>, Vec<Option<u8>>) {
    let palette = order.iter().flatten().copied().collect();
    let indices = pixels
        .iter()
        .map(|p| match p {
            Pixel::Transparent => None,
            Pixel::Opaque(rgb) => lookup.get(rgb).copied(),
        })
        .collect();
    (palette, indices)
}

fn neuquant_palette(pixels: &[Pixel], budget: usize) -> (Vec<u8>, Vec<Option<u8>>) {
    let opaque: Vec<u8> = pixels
        .iter()
        .filter_map(|p| match p {
            Pixel::Opaque(rgb) => Some([rgb[0], rgb[1], rgb[2], 255]),
            Pixel::Transparent => None,
        })
        .flatten()
        .collect();
    let nq = NeuQuant::new(SAMPLE_FACTOR, budget, &opaque);
    let indices = pixels
        .iter()
        .map(|p| match p {
            Pixel::Transparent => None,
            Pixel::Opaque(rgb) => Some(nq.index_of(&[rgb[0], rgb[1], rgb[2], 255]) as u8),
        })
        .collect();
    (nq.color_map_rgb(), indices)
}

/// Single-entry palette: the average of every opaque pixel.
fn mean_palette(pixels: &[Pixel]) -> (Vec<u8>, Vec<Option<u8>>) {
    let mut sum = [0u64; 3];
    let mut count = 0u64;
    for p in pixels {
        if let Pixel::Opaque(rgb) = p {
            for (acc, c) in sum.iter_mut().zip(rgb) {
                *acc += *c as u64;
            }
            count += 1;
        }
    }
    let count = count.max(1);
    let palette = sum.iter().map(|s| (s / count) as u8).collect();
    let indices = pixels
        .iter()
        .map(|p| match p {
            Pixel::Transparent => None,
            Pixel::Opaque(_) => Some(0),
        })
        .collect();
    (palette, indices)
}
