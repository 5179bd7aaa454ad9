//! In-memory PNG / APNG builders for tests.

use crate::decode::{DecodedImage, Frame};

pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect()
}

/// Distinct, fully opaque colour for frame `index`.
pub fn frame_color(index: usize) -> [u8; 4] {
    let shade = (index as u8).wrapping_mul(60);
    [shade, 255 - shade, 40, 255]
}

pub fn static_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&solid(width, height, rgba)).unwrap();
        writer.finish().unwrap();
    }
    out
}

/// APNG with one solid frame per `(delay_num, delay_den)` pair.
pub fn apng(width: u32, height: u32, delays: &[(u16, u16)]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_animated(delays.len() as u32, 0).unwrap();
        let mut writer = encoder.write_header().unwrap();
        for (i, &(num, den)) in delays.iter().enumerate() {
            writer.set_frame_delay(num, den).unwrap();
            writer
                .write_image_data(&solid(width, height, frame_color(i)))
                .unwrap();
        }
        writer.finish().unwrap();
    }
    out
}

/// `(offset, data length)` of every chunk of `kind`; offset is the chunk's
/// length field.
fn chunks(bytes: &[u8], kind: &[u8; 4]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        if &bytes[pos + 4..pos + 8] == kind {
            found.push((pos, len));
        }
        pos += 12 + len;
    }
    found
}

/// Rewrites acTL `num_frames` and recomputes the chunk CRC.
pub fn with_declared_frames(mut bytes: Vec<u8>, num_frames: u32) -> Vec<u8> {
    let (pos, len) = chunks(&bytes, b"acTL")[0];
    bytes[pos + 8..pos + 12].copy_from_slice(&num_frames.to_be_bytes());
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[pos + 4..pos + 8 + len]);
    let crc = hasher.finalize();
    bytes[pos + 8 + len..pos + 12 + len].copy_from_slice(&crc.to_be_bytes());
    bytes
}

/// The stream up to its last fdAT chunk: the final frame's control chunk
/// survives, its pixel data does not.
pub fn cut_last_frame_data(bytes: &[u8]) -> Vec<u8> {
    let (pos, _) = *chunks(bytes, b"fdAT").last().unwrap();
    bytes[..pos].to_vec()
}

/// Already-decoded image with `count` solid frames of `duration_ms`.
pub fn decoded(width: u32, height: u32, count: usize, duration_ms: u32) -> DecodedImage {
    DecodedImage {
        width,
        height,
        frames: (0..count)
            .map(|i| Frame {
                pixels: solid(width, height, frame_color(i)),
                duration_ms,
            })
            .collect(),
    }
}

/// Frame count, size and loop setting of a GIF file.
pub fn read_gif(path: &std::path::Path) -> (usize, u16, u16, gif::Repeat, Vec<u16>) {
    let file = std::fs::File::open(path).unwrap();
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options.read_info(file).unwrap();
    let (width, height) = (decoder.width(), decoder.height());
    let mut delays = Vec::new();
    while let Some(frame) = decoder.read_next_frame().unwrap() {
        delays.push(frame.delay);
    }
    (delays.len(), width, height, decoder.repeat(), delays)
}
