//! Last-resort GIF path through the `image` crate's own codecs.
//!
//! Reads anything `image` understands: APNGs via its animation decoder, every
//! other supported format as a single 100 ms frame. A damaged APNG keeps the
//! frames read before the damage; if none survive, the default image is used.
//! No palette tuning and no loop control: the output always loops forever.

use super::{write_atomically, AttemptContext, Encoder};
use crate::errors::{AttemptFailure, EncodeAttemptResult};
use crate::request::{ConversionRequest, ConvertOptions, TargetFormat};
use crate::timing::{effective_duration_ms, DEFAULT_FRAME_DURATION_MS};
use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, Delay, Frame, ImageError};
use std::io::Cursor;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl PassthroughEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn decode_error(e: ImageError) -> AttemptFailure {
    AttemptFailure::decode(e.to_string())
}

/// Animation frames up to the first one the codec cannot read. `None` when
/// the source is not an APNG or not even its first frame decodes.
fn read_apng_frames(bytes: &[u8]) -> Option<Vec<Frame>> {
    let decoder = PngDecoder::new(Cursor::new(bytes)).ok()?;
    if !decoder.is_apng().ok()? {
        return None;
    }
    let mut frames = Vec::new();
    for (index, frame) in decoder.apng().ok()?.into_frames().enumerate() {
        match frame {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                warn!(frame = index, error = %e, "keeping frames decoded before the codec error");
                break;
            }
        }
    }
    (!frames.is_empty()).then_some(frames)
}

fn read_frames(bytes: &[u8]) -> Result<Vec<Frame>, AttemptFailure> {
    if let Some(frames) = read_apng_frames(bytes) {
        return Ok(frames);
    }
    let still = image::load_from_memory(bytes).map_err(decode_error)?;
    Ok(vec![Frame::from_parts(
        still.to_rgba8(),
        0,
        0,
        Delay::from_numer_denom_ms(DEFAULT_FRAME_DURATION_MS, 1),
    )])
}

/// Re-times a frame with the clamp/floor rule applied.
fn retime(frame: Frame, options: &ConvertOptions) -> Frame {
    let (num, den) = frame.delay().numer_denom_ms();
    let ms = if den == 0 { DEFAULT_FRAME_DURATION_MS } else { num / den };
    let (left, top) = (frame.left(), frame.top());
    Frame::from_parts(
        frame.into_buffer(),
        left,
        top,
        Delay::from_numer_denom_ms(effective_duration_ms(ms, options.max_frame_duration_ms), 1),
    )
}

impl Encoder for PassthroughEncoder {
    fn name(&self) -> &'static str {
        "image-passthrough"
    }

    fn attempt(&self, request: &ConversionRequest, ctx: &mut AttemptContext) -> EncodeAttemptResult {
        if request.format != TargetFormat::Gif {
            return Err(AttemptFailure::encode(format!(
                "{} cannot write {}",
                self.name(),
                request.format
            )));
        }
        let bytes = ctx.source_bytes(&request.source)?;
        let frames = read_frames(bytes)?;
        if frames.is_empty() {
            return Err(AttemptFailure::frame("source produced no frames"));
        }
        let count = frames.len();
        debug!(frames = count, "passthrough decoded source");

        let mut encoded = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut encoded);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| AttemptFailure::encode(e.to_string()))?;
            encoder
                .encode_frames(frames.into_iter().map(|f| retime(f, &request.options)))
                .map_err(|e| AttemptFailure::encode(e.to_string()))?;
        }
        let output = write_atomically(&request.destination, &encoded)?;
        info!(output = %output.display(), frames = count, "wrote GIF via passthrough");
        Ok(output)
    }
}
