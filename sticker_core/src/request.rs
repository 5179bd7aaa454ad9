//! Conversion requests and the sibling-path resolver.
//!
//! Everything here is pure path algebra: no network or filesystem access.

use crate::errors::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output animation format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Gif,
    Webp,
}

impl TargetFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Gif => "gif",
            TargetFormat::Webp => "webp",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Gif => "GIF",
            TargetFormat::Webp => "WebP (lossy)",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gif" => Ok(TargetFormat::Gif),
            "webp" => Ok(TargetFormat::Webp),
            other => Err(ConvertError::InvalidOptions(format!(
                "unknown target format '{}', expected gif or webp",
                other
            ))),
        }
    }
}

/// What the in-process encoders do with a frame whose buffer is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameErrorPolicy {
    #[default]
    Fail,
    Skip,
}

impl FromStr for FrameErrorPolicy {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(FrameErrorPolicy::Fail),
            "skip" => Ok(FrameErrorPolicy::Skip),
            other => Err(ConvertError::InvalidOptions(format!(
                "unknown frame error policy '{}', expected fail or skip",
                other
            ))),
        }
    }
}

pub const DEFAULT_COLOR_COUNT: u16 = 256;
pub const DEFAULT_TRANSPARENCY_THRESHOLD: u8 = 128;
pub const DEFAULT_WEBP_QUALITY: f32 = 75.0;

/// Options recognised by every strategy. Unknown keys are rejected when
/// deserializing so typos in option files do not silently fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConvertOptions {
    /// 0 = loop forever.
    pub loop_count: u32,
    pub max_frame_duration_ms: Option<u32>,
    pub on_frame_error: FrameErrorPolicy,
    /// Palette size bound, 2..=256.
    pub color_count: u16,
    /// `#rrggbb`, used to flatten partially transparent pixels.
    pub background_color: Option<String>,
    /// Alpha below this value becomes fully transparent.
    pub transparency_threshold: Option<u8>,
    pub webp_quality: f32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            loop_count: 0,
            max_frame_duration_ms: None,
            on_frame_error: FrameErrorPolicy::Fail,
            color_count: DEFAULT_COLOR_COUNT,
            background_color: None,
            transparency_threshold: None,
            webp_quality: DEFAULT_WEBP_QUALITY,
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(2..=256).contains(&self.color_count) {
            return Err(ConvertError::InvalidOptions(format!(
                "colorCount must be within 2..=256, got {}",
                self.color_count
            )));
        }
        if self.max_frame_duration_ms == Some(0) {
            return Err(ConvertError::InvalidOptions(
                "maxFrameDurationMs must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.webp_quality) {
            return Err(ConvertError::InvalidOptions(format!(
                "webpQuality must be within 0..=100, got {}",
                self.webp_quality
            )));
        }
        if let Some(ref color) = self.background_color {
            parse_hex_color(color)?;
        }
        Ok(())
    }

    pub fn transparency_threshold(&self) -> u8 {
        self.transparency_threshold
            .unwrap_or(DEFAULT_TRANSPARENCY_THRESHOLD)
    }

    pub fn background_rgb(&self) -> Option<[u8; 3]> {
        self.background_color
            .as_deref()
            .and_then(|c| parse_hex_color(c).ok())
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_frame_error_policy(mut self, policy: FrameErrorPolicy) -> Self {
        self.on_frame_error = policy;
        self
    }

    pub fn with_max_frame_duration(mut self, ms: u32) -> Self {
        self.max_frame_duration_ms = Some(ms);
        self
    }

    pub fn with_color_count(mut self, colors: u16) -> Self {
        self.color_count = colors;
        self
    }
}

/// Parses `#rrggbb` / `rrggbb`.
pub fn parse_hex_color(s: &str) -> Result<[u8; 3], ConvertError> {
    let hex = s.trim().trim_start_matches('#');
    let invalid = || ConvertError::InvalidOptions(format!("invalid color '{}', expected #rrggbb", s));
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// External tool locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub ffmpeg: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

/// Where a conversion's input comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    Path(PathBuf),
    Url(String),
}

/// One desired transcode job.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub format: TargetFormat,
    pub options: ConvertOptions,
}

impl ConversionRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        format: TargetFormat,
        options: ConvertOptions,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            format,
            options,
        }
    }

    /// Request whose destination is the sibling of `source` with the format's extension.
    pub fn from_source_path(
        source: impl Into<PathBuf>,
        format: TargetFormat,
        options: ConvertOptions,
    ) -> Self {
        let source = source.into();
        let destination = sibling_destination(&source, format);
        Self {
            source,
            destination,
            format,
            options,
        }
    }
}

/// `.../foo_animation.png` → `.../foo_animation.gif`
pub fn sibling_destination(source: &Path, format: TargetFormat) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    let mut name = stem;
    name.push(".");
    name.push(format.extension());
    match source.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// File name carried by a URL: last path segment with query, fragment and
/// `;compress=true`-style parameters removed.
pub fn url_file_name(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let without_params = without_query.split(';').next().unwrap_or(without_query);
    let after_scheme = without_params
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_params);
    let (_, path) = after_scheme.split_once('/')?;
    let name = path.rsplit('/').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Destination for a remote source: where the downloaded bytes land and
/// the sibling output next to them.
pub fn resolve_source(source: &SourceRef, dir: &Path, format: TargetFormat) -> (PathBuf, PathBuf) {
    let local = match source {
        SourceRef::Path(p) => p.clone(),
        SourceRef::Url(url) => {
            let name = url_file_name(url).unwrap_or_else(|| "download.png".to_string());
            dir.join(name)
        }
    };
    let destination = sibling_destination(&local, format);
    (local, destination)
}

/// Partial file a strategy writes before renaming into place.
pub fn temp_path_for_output(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "output".into());
    name.push(".part");
    output.with_file_name(name)
}

/// Intermediate palette image for the two-pass external tool encoder.
pub fn palette_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output.with_file_name(format!(".{}.palette.png", stem))
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Sibling resolution keeps the directory and stem, only swapping the extension.
        #[test]
        fn prop_sibling_keeps_dir_and_stem(
            dir in "[a-z]{1,8}(/[a-z0-9_]{1,8}){0,3}",
            stem in "[a-z0-9_]{1,16}",
            ext in "(png|apng|bin)",
        ) {
            let src = PathBuf::from(format!("/{}/{}.{}", dir, stem, ext));
            let dest = sibling_destination(&src, TargetFormat::Gif);
            prop_assert_eq!(dest.parent(), src.parent());
            prop_assert_eq!(dest.file_stem(), src.file_stem());
            prop_assert_eq!(dest.extension().and_then(|e| e.to_str()), Some("gif"));
        }
    }
}
