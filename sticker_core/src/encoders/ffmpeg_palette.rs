//! Two-pass external transcode: `palettegen` into an intermediate palette
//! image, then `paletteuse` with Bayer dithering into the GIF.

use super::{commit_partial, discard_partial, partial_for, AttemptContext, Encoder};
use crate::errors::{AttemptFailure, EncodeAttemptResult, FailureCategory};
use crate::ffmpeg_process::{check_tool_run, locate_tool, run_tool};
use crate::request::{palette_path_for, ConversionRequest, ConvertOptions, TargetFormat};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BAYER_SCALE: u8 = 5;

#[derive(Debug, Clone)]
pub struct FfmpegPaletteEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegPaletteEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegPaletteEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

fn palettegen_args(source: &Path, palette: &Path, options: &ConvertOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-y", "-f", "apng", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.into());
    args.push("-vf".into());
    args.push(format!("palettegen=reserve_transparent=1:max_colors={}", options.color_count).into());
    args.push(palette.into());
    args
}

fn paletteuse_args(
    source: &Path,
    palette: &Path,
    output: &Path,
    options: &ConvertOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-y", "-f", "apng", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(source.into());
    args.push("-i".into());
    args.push(palette.into());
    args.push("-lavfi".into());
    args.push(
        format!(
            "[0:v][1:v]paletteuse=dither=bayer:bayer_scale={}:alpha_threshold={}",
            BAYER_SCALE,
            options.transparency_threshold()
        )
        .into(),
    );
    args.push("-loop".into());
    args.push(options.loop_count.to_string().into());
    args.push("-f".into());
    args.push("gif".into());
    args.push(output.into());
    args
}

/// Removes the intermediate palette; failure to remove is only logged.
struct PaletteGuard(PathBuf);

impl Drop for PaletteGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed palette image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "could not remove palette image"),
        }
    }
}

impl Encoder for FfmpegPaletteEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg-palette"
    }

    fn attempt(&self, request: &ConversionRequest, _ctx: &mut AttemptContext) -> EncodeAttemptResult {
        if request.format != TargetFormat::Gif {
            return Err(AttemptFailure::new(
                FailureCategory::ToolRejectedInput,
                format!("{} output is not produced by {}", request.format, self.name()),
            ));
        }
        let program = locate_tool(&self.ffmpeg)?;
        if !request.source.is_file() {
            return Err(AttemptFailure::new(
                FailureCategory::IoError,
                format!("source {} is not a file", request.source.display()),
            ));
        }

        let palette = palette_path_for(&request.destination);
        let _guard = PaletteGuard(palette.clone());
        let options = &request.options;

        let run = run_tool(&program, &palettegen_args(&request.source, &palette, options))?;
        check_tool_run("palettegen", &run)?;

        let temp = partial_for(request);
        let run = match run_tool(
            &program,
            &paletteuse_args(&request.source, &palette, &temp, options),
        ) {
            Ok(run) => run,
            Err(failure) => {
                discard_partial(&temp);
                return Err(failure);
            }
        };
        if let Err(failure) = check_tool_run("paletteuse", &run) {
            discard_partial(&temp);
            return Err(failure);
        }
        if !temp.is_file() {
            return Err(AttemptFailure::encode(format!(
                "paletteuse reported success but wrote no {}",
                temp.display()
            )));
        }
        commit_partial(&temp, &request.destination)
    }
}
