//! Lossy animated WebP through libwebp's animation encoder.

use super::{valid_frames, write_atomically, AttemptContext, Encoder};
use crate::errors::{AttemptFailure, EncodeAttemptResult};
use crate::request::ConversionRequest;
use crate::timing::effective_duration_ms;
use tracing::info;
use webp_animation::{AnimParams, EncoderOptions, EncodingConfig, EncodingType, LossyEncodingConfig};

#[derive(Debug, Default, Clone, Copy)]
pub struct WebpAnimEncoder;

impl WebpAnimEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn encode_error(context: &str, e: webp_animation::Error) -> AttemptFailure {
    AttemptFailure::encode(format!("{}: {:?}", context, e))
}

impl Encoder for WebpAnimEncoder {
    fn name(&self) -> &'static str {
        "webp-animation"
    }

    fn attempt(&self, request: &ConversionRequest, ctx: &mut AttemptContext) -> EncodeAttemptResult {
        let options = &request.options;
        let image = ctx.decoded(&request.source)?;
        let frames = valid_frames(image, options.on_frame_error, self.name())?;

        let encoder_options = EncoderOptions {
            anim_params: AnimParams {
                loop_count: options.loop_count.min(i32::MAX as u32) as i32,
            },
            encoding_config: Some(EncodingConfig {
                quality: options.webp_quality,
                encoding_type: EncodingType::Lossy(LossyEncodingConfig::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut encoder = webp_animation::Encoder::new_with_options(
            (image.width, image.height),
            encoder_options,
        )
        .map_err(|e| encode_error("creating WebP encoder", e))?;

        let mut timestamp: i32 = 0;
        for &(index, frame) in &frames {
            encoder
                .add_frame(&frame.pixels, timestamp)
                .map_err(|e| encode_error(&format!("frame {}", index), e))?;
            let duration = effective_duration_ms(frame.duration_ms, options.max_frame_duration_ms);
            timestamp = i32::try_from(duration)
                .ok()
                .and_then(|d| timestamp.checked_add(d))
                .ok_or_else(|| AttemptFailure::encode("animation longer than the WebP timeline allows"))?;
        }
        let data = encoder
            .finalize(timestamp)
            .map_err(|e| encode_error("assembling WebP", e))?;

        let output = write_atomically(&request.destination, &data)?;
        info!(
            output = %output.display(),
            frames = frames.len(),
            duration_ms = timestamp,
            "wrote WebP"
        );
        Ok(output)
    }
}
