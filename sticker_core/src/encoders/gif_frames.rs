//! In-process GIF writer: decoded frames, per-frame palettes, `gif` crate.

use super::palette::{quantize_frame, QuantizeSettings};
use super::{commit_partial, discard_partial, partial_for, valid_frames, AttemptContext, Encoder};
use crate::decode::{DecodedImage, Frame};
use crate::errors::{AttemptFailure, EncodeAttemptResult};
use crate::request::{ConversionRequest, ConvertOptions};
use crate::timing::ms_to_centiseconds;
use gif::{DisposalMethod, Repeat};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy)]
pub struct GifFrameEncoder;

impl GifFrameEncoder {
    pub fn new() -> Self {
        Self
    }
}

/// Zero loops forever; anything else plays that many extra times.
pub fn gif_repeat(loop_count: u32) -> Repeat {
    match loop_count {
        0 => Repeat::Infinite,
        n => Repeat::Finite(n.min(u16::MAX as u32) as u16),
    }
}

impl Encoder for GifFrameEncoder {
    fn name(&self) -> &'static str {
        "gif-frames"
    }

    fn attempt(&self, request: &ConversionRequest, ctx: &mut AttemptContext) -> EncodeAttemptResult {
        let image = ctx.decoded(&request.source)?;
        let (width, height) = match (u16::try_from(image.width), u16::try_from(image.height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(AttemptFailure::encode(format!(
                    "{}x{} exceeds the GIF canvas limit",
                    image.width, image.height
                )))
            }
        };
        let frames = valid_frames(image, request.options.on_frame_error, self.name())?;

        let temp = partial_for(request);
        match write_gif(&temp, (width, height), image, &frames, &request.options) {
            Ok(()) => {
                info!(
                    output = %request.destination.display(),
                    frames = frames.len(),
                    "wrote GIF"
                );
                commit_partial(&temp, &request.destination)
            }
            Err(failure) => {
                discard_partial(&temp);
                Err(failure)
            }
        }
    }
}

fn write_gif(
    temp: &Path,
    (width, height): (u16, u16),
    image: &DecodedImage,
    frames: &[(usize, &Frame)],
    options: &ConvertOptions,
) -> Result<(), AttemptFailure> {
    let file = File::create(temp)
        .map_err(|e| AttemptFailure::io(&format!("creating {}", temp.display()), &e))?;
    let mut encoder = gif::Encoder::new(BufWriter::new(file), width, height, &[])
        .map_err(|e| AttemptFailure::encode(format!("GIF header: {}", e)))?;
    encoder
        .set_repeat(gif_repeat(options.loop_count))
        .map_err(|e| AttemptFailure::encode(format!("GIF loop extension: {}", e)))?;

    let settings = QuantizeSettings {
        colors: options.color_count,
        alpha_threshold: options.transparency_threshold(),
        background: options.background_rgb(),
    };

    for &(index, frame) in frames {
        let quantized = quantize_frame(&frame.pixels, &settings);
        let delay = ms_to_centiseconds(frame.duration_ms, options.max_frame_duration_ms);
        debug!(
            frame = index,
            colors = quantized.color_entries(),
            delay_cs = delay,
            "quantized frame"
        );
        let gif_frame = gif::Frame {
            width,
            height,
            delay,
            dispose: DisposalMethod::Background,
            transparent: quantized.transparent,
            palette: Some(quantized.palette),
            buffer: Cow::Owned(quantized.indices),
            ..gif::Frame::default()
        };
        encoder
            .write_frame(&gif_frame)
            .map_err(|e| AttemptFailure::encode(format!("frame {}: {}", index, e)))?;
    }

    let mut writer = encoder
        .into_inner()
        .map_err(|e| AttemptFailure::io("finishing GIF", &e))?;
    writer
        .flush()
        .map_err(|e| AttemptFailure::io("flushing GIF", &e))?;
    debug!(width = image.width, height = image.height, "GIF trailer written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureCategory;
    use crate::fixtures::{decoded, read_gif};
    use crate::request::{FrameErrorPolicy, TargetFormat};

    fn request_in(dir: &Path, options: ConvertOptions) -> ConversionRequest {
        ConversionRequest::new(
            dir.join("in.png"),
            dir.join("out.gif"),
            TargetFormat::Gif,
            options,
        )
    }

    #[test]
    fn test_gif_repeat_mapping() {
        assert_eq!(gif_repeat(0), Repeat::Infinite);
        assert_eq!(gif_repeat(3), Repeat::Finite(3));
        assert_eq!(gif_repeat(u32::MAX), Repeat::Finite(u16::MAX));
    }

    #[test]
    fn test_writes_every_frame_with_delays() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), ConvertOptions::default().with_loop_count(2));
        let mut ctx = AttemptContext::with_decoded(decoded(8, 6, 3, 70));

        let out = GifFrameEncoder::new().attempt(&request, &mut ctx).unwrap();
        assert_eq!(out, request.destination);

        let (count, w, h, repeat, delays) = read_gif(&out);
        assert_eq!((count, w, h), (3, 8, 6));
        assert_eq!(repeat, Repeat::Finite(2));
        assert_eq!(delays, vec![7, 7, 7]);
    }

    #[test]
    fn test_fail_policy_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), ConvertOptions::default());
        let mut image = decoded(4, 4, 2, 100);
        image.frames[0].pixels.truncate(3);
        let mut ctx = AttemptContext::with_decoded(image);

        let err = GifFrameEncoder::new().attempt(&request, &mut ctx).unwrap_err();
        assert_eq!(err.category, FailureCategory::FrameValidationError);
        assert!(!request.destination.exists());
    }

    #[test]
    fn test_skip_policy_drops_bad_frame() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(
            dir.path(),
            ConvertOptions::default().with_frame_error_policy(FrameErrorPolicy::Skip),
        );
        let mut image = decoded(4, 4, 4, 100);
        image.frames[2].pixels.clear();
        let mut ctx = AttemptContext::with_decoded(image);

        let out = GifFrameEncoder::new().attempt(&request, &mut ctx).unwrap();
        assert_eq!(read_gif(&out).0, 3);
    }

    #[test]
    fn test_oversized_canvas_is_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = request_in(dir.path(), ConvertOptions::default());
        let mut image = decoded(1, 1, 1, 100);
        image.width = 70_000;
        let mut ctx = AttemptContext::with_decoded(image);

        let err = GifFrameEncoder::new().attempt(&request, &mut ctx).unwrap_err();
        assert_eq!(err.category, FailureCategory::EncodeError);
    }
}
