//! Frame decoder: APNG / PNG bytes → full-canvas RGBA frames with durations.
//!
//! Sub-frames are composited onto the canvas (dispose and blend ops applied),
//! so every emitted frame buffer is exactly `width * height * 4` bytes.

use crate::errors::AttemptFailure;
use crate::timing::{delay_fraction_to_ms, DEFAULT_FRAME_DURATION_MS};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<Frame>,
}

impl DecodedImage {
    /// Byte length every frame buffer must have.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.frames.iter().map(|f| u64::from(f.duration_ms)).sum()
    }

    pub fn average_frame_duration_ms(&self) -> f64 {
        if self.frames.is_empty() {
            return f64::from(DEFAULT_FRAME_DURATION_MS);
        }
        self.total_duration_ms() as f64 / self.frames.len() as f64
    }
}

pub fn has_png_signature(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

pub fn decode_file(path: &Path) -> Result<DecodedImage, AttemptFailure> {
    let bytes = std::fs::read(path)
        .map_err(|e| AttemptFailure::io(&format!("reading {}", path.display()), &e))?;
    decode(&bytes)
}

pub fn decode(bytes: &[u8]) -> Result<DecodedImage, AttemptFailure> {
    if !has_png_signature(bytes) {
        let head = &bytes[..bytes.len().min(PNG_SIGNATURE.len())];
        return Err(AttemptFailure::decode(format!(
            "not a PNG stream (leading bytes {:02x?})",
            head
        )));
    }

    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| AttemptFailure::decode(format!("PNG header: {}", e)))?;

    let (width, height) = {
        let info = reader.info();
        (info.width, info.height)
    };
    let animation = reader.info().animation_control().cloned();
    let mut buf = vec![0u8; reader.output_buffer_size()];

    let control = match animation {
        Some(control) if control.num_frames > 0 => control,
        _ => {
            let out = reader
                .next_frame(&mut buf)
                .map_err(|e| AttemptFailure::decode(format!("PNG image data: {}", e)))?;
            let pixels = expand_to_rgba(&buf[..out.buffer_size()], out.width, out.height, out.color_type)?;
            debug!(width, height, "decoded static PNG");
            return Ok(DecodedImage {
                width,
                height,
                frames: vec![Frame {
                    pixels,
                    duration_ms: DEFAULT_FRAME_DURATION_MS,
                }],
            });
        }
    };

    // IDAT without a preceding fcTL is a fallback image, not part of the animation.
    if reader.info().frame_control().is_none() {
        reader
            .next_frame(&mut buf)
            .map_err(|e| AttemptFailure::decode(format!("default image: {}", e)))?;
    }

    let declared = control.num_frames as usize;
    let mut canvas = Canvas::new(width, height);
    let mut frames = Vec::with_capacity(declared);

    for index in 0..declared {
        let out = match reader.next_frame(&mut buf) {
            Ok(out) => out,
            Err(e) if index == 0 => {
                return Err(AttemptFailure::decode(format!("first frame: {}", e)));
            }
            Err(e) => {
                debug!(frame = index, error = %e, "codec stopped before declared frame count");
                break;
            }
        };
        let region = match reader.info().frame_control().cloned() {
            Some(fc) => Region {
                x: fc.x_offset,
                y: fc.y_offset,
                width: out.width,
                height: out.height,
                duration_ms: delay_fraction_to_ms(fc.delay_num, fc.delay_den),
                dispose: fc.dispose_op,
                blend: fc.blend_op,
            },
            None => Region {
                x: 0,
                y: 0,
                width: out.width,
                height: out.height,
                duration_ms: DEFAULT_FRAME_DURATION_MS,
                dispose: png::DisposeOp::None,
                blend: png::BlendOp::Source,
            },
        };
        let rgba = expand_to_rgba(&buf[..out.buffer_size()], out.width, out.height, out.color_type)?;
        let pixels = canvas.render(index, &region, &rgba)?;
        frames.push(Frame {
            pixels,
            duration_ms: region.duration_ms,
        });
    }

    if frames.len() != declared {
        return Err(AttemptFailure::frame(format!(
            "animation declares {} frames but the codec returned {}",
            declared,
            frames.len()
        )));
    }

    debug!(
        width,
        height,
        frames = frames.len(),
        plays = control.num_plays,
        "decoded animated PNG"
    );

    Ok(DecodedImage {
        width,
        height,
        frames,
    })
}

struct Region {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    duration_ms: u32,
    dispose: png::DisposeOp,
    blend: png::BlendOp,
}

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Draws one sub-frame and returns the visible canvas, then applies the
    /// sub-frame's dispose op for the next frame.
    fn render(&mut self, index: usize, region: &Region, rgba: &[u8]) -> Result<Vec<u8>, AttemptFailure> {
        let fits_x = region.x.checked_add(region.width).is_some_and(|r| r <= self.width);
        let fits_y = region.y.checked_add(region.height).is_some_and(|b| b <= self.height);
        if !fits_x || !fits_y {
            return Err(AttemptFailure::frame(format!(
                "frame {} region {}x{}+{}+{} exceeds canvas {}x{}",
                index, region.width, region.height, region.x, region.y, self.width, self.height
            )));
        }

        // Previous on the first frame behaves like Background.
        let dispose = match (index, region.dispose) {
            (0, png::DisposeOp::Previous) => png::DisposeOp::Background,
            (_, op) => op,
        };
        let saved = matches!(dispose, png::DisposeOp::Previous).then(|| self.pixels.clone());

        for row in 0..region.height as usize {
            for col in 0..region.width as usize {
                let src = (row * region.width as usize + col) * 4;
                let dst = self.offset(region.x as usize + col, region.y as usize + row);
                let pixel = [rgba[src], rgba[src + 1], rgba[src + 2], rgba[src + 3]];
                let out = match region.blend {
                    png::BlendOp::Source => pixel,
                    png::BlendOp::Over => blend_over(pixel, self.pixel_at(dst)),
                };
                self.pixels[dst..dst + 4].copy_from_slice(&out);
            }
        }

        let visible = self.pixels.clone();

        match dispose {
            png::DisposeOp::Background => {
                for row in 0..region.height as usize {
                    let start = self.offset(region.x as usize, region.y as usize + row);
                    let end = start + region.width as usize * 4;
                    self.pixels[start..end].fill(0);
                }
            }
            png::DisposeOp::Previous => {
                if let Some(saved) = saved {
                    self.pixels = saved;
                }
            }
            _ => {}
        }

        Ok(visible)
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.width as usize + x) * 4
    }

    fn pixel_at(&self, offset: usize) -> [u8; 4] {
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
            self.pixels[offset + 3],
        ]
    }
}

/// Porter-Duff "source over destination" on straight (non-premultiplied) RGBA.
fn blend_over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let sa = u32::from(src[3]);
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = u32::from(dst[3]);
    let out_a = sa * 255 + da * (255 - sa);
    if out_a == 0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let value = (u32::from(src[c]) * sa * 255 + u32::from(dst[c]) * da * (255 - sa)) / out_a;
        out[c] = value.min(255) as u8;
    }
    out[3] = ((out_a + 127) / 255).min(255) as u8;
    out
}

fn expand_to_rgba(
    buf: &[u8],
    width: u32,
    height: u32,
    color_type: png::ColorType,
) -> Result<Vec<u8>, AttemptFailure> {
    let pixels = width as usize * height as usize;
    let channels = match color_type {
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Indexed => {
            return Err(AttemptFailure::decode("indexed output after palette expansion"));
        }
    };
    if buf.len() < pixels * channels {
        return Err(AttemptFailure::frame(format!(
            "frame buffer holds {} bytes, {}x{} {:?} needs {}",
            buf.len(),
            width,
            height,
            color_type,
            pixels * channels
        )));
    }

    let src = &buf[..pixels * channels];
    let rgba = match channels {
        4 => src.to_vec(),
        3 => src
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        2 => src
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        _ => src.iter().flat_map(|&g| [g, g, g, 255]).collect(),
    };
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureCategory;
    use crate::fixtures::{apng, cut_last_frame_data, static_png, with_declared_frames};
    use crate::timing::MIN_FRAME_DURATION_MS;

    #[test]
    fn test_rejects_missing_signature() {
        let err = decode(b"not a png").unwrap_err();
        assert_eq!(err.category, FailureCategory::DecodeError);
    }

    #[test]
    fn test_rejects_truncated_stream() {
        let bytes = static_png(4, 4, [1, 2, 3, 255]);
        let err = decode(&bytes[..20]).unwrap_err();
        assert_eq!(err.category, FailureCategory::DecodeError);
    }

    #[test]
    fn test_static_png_has_one_default_frame() {
        let image = decode(&static_png(5, 3, [10, 20, 30, 255])).unwrap();
        assert_eq!((image.width, image.height), (5, 3));
        assert_eq!(image.frames.len(), 1);
        assert_eq!(image.frames[0].duration_ms, DEFAULT_FRAME_DURATION_MS);
        assert_eq!(image.frames[0].pixels.len(), image.frame_len());
        assert_eq!(&image.frames[0].pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_animated_png_frames_and_durations() {
        let image = decode(&apng(8, 8, &[(1, 10), (0, 100), (25, 0)])).unwrap();
        assert_eq!(image.frames.len(), 3);
        let durations: Vec<u32> = image.frames.iter().map(|f| f.duration_ms).collect();
        assert_eq!(durations, vec![100, MIN_FRAME_DURATION_MS, 250]);
        assert!(image.frames.iter().all(|f| f.pixels.len() == image.frame_len()));
        assert_ne!(image.frames[0].pixels, image.frames[1].pixels);
        assert!(image.is_animated());
    }

    #[test]
    fn test_overdeclared_frame_count_is_frame_error() {
        let bytes = with_declared_frames(apng(4, 4, &[(1, 10), (1, 10)]), 3);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.category, FailureCategory::FrameValidationError);
        assert!(err.message.contains("declares 3"));
    }

    #[test]
    fn test_missing_last_frame_is_frame_error() {
        let bytes = cut_last_frame_data(&apng(4, 4, &[(1, 10), (1, 10), (1, 10)]));
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.category, FailureCategory::FrameValidationError);
    }

    #[test]
    fn test_grayscale_expands_to_rgba() {
        let rgba = expand_to_rgba(&[7, 9], 2, 1, png::ColorType::Grayscale).unwrap();
        assert_eq!(rgba, vec![7, 7, 7, 255, 9, 9, 9, 255]);
        let rgba = expand_to_rgba(&[7, 100], 1, 1, png::ColorType::GrayscaleAlpha).unwrap();
        assert_eq!(rgba, vec![7, 7, 7, 100]);
    }

    #[test]
    fn test_blend_over() {
        assert_eq!(blend_over([1, 2, 3, 255], [9, 9, 9, 255]), [1, 2, 3, 255]);
        assert_eq!(blend_over([1, 2, 3, 0], [9, 9, 9, 255]), [9, 9, 9, 255]);
        let half = blend_over([255, 0, 0, 128], [0, 0, 255, 255]);
        assert_eq!(half[3], 255);
        assert!(half[0] > 100 && half[2] > 100);
    }

    #[test]
    fn test_average_duration() {
        let image = DecodedImage {
            width: 1,
            height: 1,
            frames: vec![
                Frame { pixels: vec![0; 4], duration_ms: 100 },
                Frame { pixels: vec![0; 4], duration_ms: 300 },
            ],
        };
        assert_eq!(image.total_duration_ms(), 400);
        assert!((image.average_frame_duration_ms() - 200.0).abs() < f64::EPSILON);
    }
}
