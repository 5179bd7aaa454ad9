//! Animated sticker transcoding.
//!
//! APNG stickers are decoded into full-canvas RGBA frames and re-encoded as
//! GIF or animated WebP through an ordered chain of strategies:
//! - `encoders::FfmpegPaletteEncoder`: two-pass external transcode
//! - `encoders::GifFrameEncoder`: in-process quantize and write
//! - `encoders::PassthroughEncoder`: the `image` crate's own codecs
//! - `encoders::WebpAnimEncoder`: libwebp animation encoder
//!
//! [`Orchestrator`] runs them in order and reports the last failure only when
//! all of them fail.

pub mod decode;
pub mod encoders;
pub mod errors;
pub mod fetch;
pub mod ffmpeg_process;
pub mod logging;
pub mod orchestrator;
pub mod request;
pub mod timing;

#[cfg(test)]
mod fixtures;

pub use decode::{decode, decode_file, DecodedImage, Frame};
pub use encoders::{AttemptContext, Encoder};
pub use errors::{AttemptFailure, ConvertError, EncodeAttemptResult, FailureCategory};
pub use fetch::{convert_url, download_to, fetch_bytes, FetchConfig};
pub use logging::{init_logging, LogConfig};
pub use orchestrator::{convert, ConversionOutcome, Orchestrator};
pub use request::{
    sibling_destination, ConversionRequest, ConvertOptions, FrameErrorPolicy, SourceRef,
    TargetFormat, ToolConfig,
};
