//! Encoding strategies.
//!
//! Every strategy implements [`Encoder`]. Strategies never leave a partial
//! destination: they write to [`temp_path_for_output`] and rename on success.

use crate::decode::{decode, DecodedImage, Frame};
use crate::errors::{AttemptFailure, EncodeAttemptResult};
use crate::request::{temp_path_for_output, ConversionRequest, FrameErrorPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod ffmpeg_palette;
pub mod gif_frames;
pub mod palette;
pub mod passthrough;
pub mod webp_anim;

pub use ffmpeg_palette::FfmpegPaletteEncoder;
pub use gif_frames::GifFrameEncoder;
pub use passthrough::PassthroughEncoder;
pub use webp_anim::WebpAnimEncoder;

/// One way of producing the requested output file.
pub trait Encoder {
    /// Stable name used in logs and aggregated errors.
    fn name(&self) -> &'static str;

    fn attempt(&self, request: &ConversionRequest, ctx: &mut AttemptContext) -> EncodeAttemptResult;
}

/// Per-conversion cache shared by the strategies of one request: the source is
/// read and decoded at most once, and a decode failure is remembered too.
#[derive(Debug, Default)]
pub struct AttemptContext {
    bytes: Option<Result<Vec<u8>, AttemptFailure>>,
    decoded: Option<Result<DecodedImage, AttemptFailure>>,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose source bytes are already in memory.
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(Ok(bytes)),
            decoded: None,
        }
    }

    /// Context with a pre-decoded image.
    #[cfg(test)]
    pub(crate) fn with_decoded(image: DecodedImage) -> Self {
        Self {
            bytes: None,
            decoded: Some(Ok(image)),
        }
    }

    pub fn source_bytes(&mut self, source: &Path) -> Result<&[u8], AttemptFailure> {
        let entry = self.bytes.get_or_insert_with(|| {
            fs::read(source)
                .map_err(|e| AttemptFailure::io(&format!("reading {}", source.display()), &e))
        });
        match entry {
            Ok(bytes) => Ok(bytes.as_slice()),
            Err(failure) => Err(failure.clone()),
        }
    }

    pub fn decoded(&mut self, source: &Path) -> Result<&DecodedImage, AttemptFailure> {
        if self.decoded.is_none() {
            let result = self.source_bytes(source).and_then(decode);
            if let Err(ref failure) = result {
                debug!(source = %source.display(), %failure, "source decode failed");
            }
            self.decoded = Some(result);
        }
        match self.decoded.as_ref() {
            Some(Ok(image)) => Ok(image),
            Some(Err(failure)) => Err(failure.clone()),
            None => Err(AttemptFailure::decode("decode result missing")),
        }
    }

    /// Frame count of a successful decode, if one happened.
    pub fn frame_count(&self) -> Option<usize> {
        match &self.decoded {
            Some(Ok(image)) => Some(image.frames.len()),
            _ => None,
        }
    }
}

/// Writes `bytes` to the partial path then moves it over `destination`.
pub(crate) fn write_atomically(destination: &Path, bytes: &[u8]) -> EncodeAttemptResult {
    let temp = temp_path_for_output(destination);
    if let Err(e) = fs::write(&temp, bytes) {
        discard_partial(&temp);
        return Err(AttemptFailure::io(&format!("writing {}", temp.display()), &e));
    }
    commit_partial(&temp, destination)
}

/// Renames a finished partial file into place.
pub(crate) fn commit_partial(temp: &Path, destination: &Path) -> EncodeAttemptResult {
    match fs::rename(temp, destination) {
        Ok(()) => Ok(destination.to_path_buf()),
        Err(e) => {
            discard_partial(temp);
            Err(AttemptFailure::io(
                &format!("moving output into {}", destination.display()),
                &e,
            ))
        }
    }
}

/// Best-effort removal; a leftover temp file never turns into an error.
pub(crate) fn discard_partial(temp: &Path) {
    if let Err(e) = fs::remove_file(temp) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %temp.display(), error = %e, "could not remove partial output");
        }
    }
}

/// Frames that pass the `width * height * 4` length check, with their original
/// index. Malformed frames are skipped or fail the attempt per the request's policy.
pub(crate) fn valid_frames<'a>(
    image: &'a DecodedImage,
    policy: FrameErrorPolicy,
    strategy: &str,
) -> Result<Vec<(usize, &'a Frame)>, AttemptFailure> {
    let expected = image.frame_len();
    let mut valid = Vec::with_capacity(image.frames.len());
    for (index, frame) in image.frames.iter().enumerate() {
        if frame.pixels.len() == expected {
            valid.push((index, frame));
            continue;
        }
        let message = format!(
            "frame {} has {} bytes, expected {} ({}x{} RGBA)",
            index,
            frame.pixels.len(),
            expected,
            image.width,
            image.height
        );
        match policy {
            FrameErrorPolicy::Fail => return Err(AttemptFailure::frame(message)),
            FrameErrorPolicy::Skip => {
                tracing::warn!(strategy, frame = index, "skipping malformed frame: {}", message);
            }
        }
    }
    if valid.is_empty() {
        return Err(AttemptFailure::frame(format!(
            "no valid frames out of {}",
            image.frames.len()
        )));
    }
    Ok(valid)
}

/// Output location a strategy should write to before committing.
pub(crate) fn partial_for(request: &ConversionRequest) -> PathBuf {
    temp_path_for_output(&request.destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureCategory;
    use crate::fixtures::decoded;

    #[test]
    fn test_valid_frames_skip_and_fail() {
        let mut image = decoded(4, 4, 3, 100);
        image.frames[1].pixels.truncate(10);

        let err = valid_frames(&image, FrameErrorPolicy::Fail, "test").unwrap_err();
        assert_eq!(err.category, FailureCategory::FrameValidationError);
        assert!(err.message.contains("frame 1"));

        let kept = valid_frames(&image, FrameErrorPolicy::Skip, "test").unwrap();
        let indices: Vec<usize> = kept.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_all_frames_malformed_is_frame_error() {
        let mut image = decoded(2, 2, 2, 100);
        for frame in &mut image.frames {
            frame.pixels.pop();
        }
        let err = valid_frames(&image, FrameErrorPolicy::Skip, "test").unwrap_err();
        assert_eq!(err.category, FailureCategory::FrameValidationError);
    }

    #[test]
    fn test_context_caches_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bad.png");
        fs::write(&src, b"not a png").unwrap();

        let mut ctx = AttemptContext::new();
        assert_eq!(ctx.decoded(&src).unwrap_err().category, FailureCategory::DecodeError);
        fs::remove_file(&src).unwrap();
        // Still the cached decode failure, not an IO error for the missing file.
        assert_eq!(ctx.decoded(&src).unwrap_err().category, FailureCategory::DecodeError);
    }

    #[test]
    fn test_write_atomically_leaves_no_partial() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.gif");
        write_atomically(&dest, b"GIF89a").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"GIF89a");
        assert!(!temp_path_for_output(&dest).exists());
    }
}
