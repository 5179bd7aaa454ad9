//! Spritesheet rendering: every frame of an animation laid out row-major on
//! one PNG, plus a JSON descriptor players can use to step through it.

use crate::errors::{PackError, Result};
use image::{imageops, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use sticker_core::{decode_file, DecodedImage};
use tracing::info;

#[derive(Debug, Clone)]
pub struct SpriteSheet {
    pub image: RgbaImage,
    pub columns: u32,
    pub rows: u32,
    pub frame_width: u32,
    pub frame_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UriRef {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

/// Sidecar JSON written next to the sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDescriptor {
    pub frame_count: usize,
    /// Average delay between frames in milliseconds.
    pub frame_rate: f64,
    pub frames_per_column: u32,
    pub frames_per_row: u32,
    pub label: String,
    pub pack: NameRef,
    pub sprite_image: UriRef,
    /// The source animation and its frame size.
    pub image: ImageRef,
}

/// `ceil(sqrt(n))`, at least 1.
pub fn default_columns(frames: usize) -> u32 {
    let mut columns = 1u32;
    while (columns as usize) * (columns as usize) < frames {
        columns += 1;
    }
    columns
}

pub fn build_spritesheet(image: &DecodedImage, columns: Option<u32>) -> Result<SpriteSheet> {
    let count = image.frames.len();
    if count == 0 {
        return Err(PackError::InvalidRecord("animation has no frames".to_string()));
    }
    let columns = columns
        .filter(|&c| c > 0)
        .unwrap_or_else(|| default_columns(count))
        .min(count as u32);
    let rows = (count as u32).div_ceil(columns);
    let (w, h) = (image.width, image.height);

    let mut sheet = RgbaImage::new(columns * w, rows * h);
    for (index, frame) in image.frames.iter().enumerate() {
        let tile = RgbaImage::from_raw(w, h, frame.pixels.clone()).ok_or_else(|| {
            PackError::InvalidRecord(format!(
                "frame {} has {} bytes, expected {}",
                index,
                frame.pixels.len(),
                image.frame_len()
            ))
        })?;
        let (col, row) = (index as u32 % columns, index as u32 / columns);
        imageops::replace(&mut sheet, &tile, i64::from(col * w), i64::from(row * h));
    }

    Ok(SpriteSheet {
        image: sheet,
        columns,
        rows,
        frame_width: w,
        frame_height: h,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `<stem>_sheet.png` and `<stem>.json` beside `source`.
pub fn spritesheet_paths(source: &Path) -> (PathBuf, PathBuf) {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sticker".to_string());
    (
        source.with_file_name(format!("{}_sheet.png", stem)),
        source.with_file_name(format!("{}.json", stem)),
    )
}

/// Decodes `source`, writes the sheet and its descriptor at
/// [`spritesheet_paths`]. Returns both paths.
pub fn write_spritesheet(
    source: &Path,
    label: &str,
    pack_name: &str,
    columns: Option<u32>,
) -> Result<(PathBuf, PathBuf)> {
    let decoded = decode_file(source).map_err(|failure| PackError::Decode {
        path: source.to_path_buf(),
        failure,
    })?;
    let sheet = build_spritesheet(&decoded, columns)?;

    let (sheet_path, json_path) = spritesheet_paths(source);

    sheet.image.save_with_format(&sheet_path, ImageFormat::Png)?;

    let descriptor = SheetDescriptor {
        frame_count: decoded.frames.len(),
        frame_rate: decoded.average_frame_duration_ms(),
        frames_per_column: sheet.rows,
        frames_per_row: sheet.columns,
        label: label.to_string(),
        pack: NameRef {
            name: pack_name.to_string(),
        },
        sprite_image: UriRef {
            uri: file_name(&sheet_path),
        },
        image: ImageRef {
            uri: file_name(source),
            width: sheet.frame_width,
            height: sheet.frame_height,
        },
    };
    fs::write(&json_path, serde_json::to_string_pretty(&descriptor)?)?;

    info!(
        sheet = %sheet_path.display(),
        frames = descriptor.frame_count,
        columns = sheet.columns,
        rows = sheet.rows,
        "wrote spritesheet"
    );
    Ok((sheet_path, json_path))
}
