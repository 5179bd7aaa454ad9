//! Bulk pack download.
//!
//! Records are deduplicated, then processed on a bounded rayon pool. One
//! sticker failing never stops the rest; failures are collected in
//! [`BatchResult`].

use crate::errors::{PackError, Result};
use crate::layout::{PackLayout, SaveLocation};
use crate::records::{dedupe_by_id, StickerRecord};
use crate::spritesheet::{spritesheet_paths, write_spritesheet};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressDrawTarget, ProgressStyle};
use rayon::prelude::*;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use sticker_core::{
    download_to, AttemptContext, ConversionRequest, ConvertOptions, FetchConfig, Orchestrator,
    TargetFormat, ToolConfig,
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Concurrent downloads per pack.
pub const DEFAULT_JOBS: usize = 6;

const BATCH_TEMPLATE: &str =
    "{spinner:.green} {prefix:.cyan.bold} ▕{bar:35.green/black}▏ {pos}/{len} • {elapsed_precise} • {msg}";

#[derive(Debug, Clone)]
pub struct PackConfig {
    pub out_dir: PathBuf,
    pub jobs: usize,
    /// Convert animations to this format after download.
    pub format: Option<TargetFormat>,
    pub options: ConvertOptions,
    pub emit_spritesheet: bool,
    pub fetch: FetchConfig,
    pub tools: ToolConfig,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            jobs: DEFAULT_JOBS,
            format: None,
            options: ConvertOptions::default(),
            emit_spritesheet: false,
            fetch: FetchConfig::default(),
            tools: ToolConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<(PathBuf, String)>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn success(&mut self) {
        self.total += 1;
        self.succeeded += 1;
    }

    pub fn fail(&mut self, path: PathBuf, error: String) {
        self.total += 1;
        self.failed += 1;
        self.errors.push((path, error));
    }

    pub fn skip(&mut self) {
        self.total += 1;
        self.skipped += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl Default for BatchResult {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum StickerOutcome {
    Saved(Vec<PathBuf>),
    Skipped,
}

fn converted_path(primary: &Path, format: TargetFormat) -> PathBuf {
    sticker_core::sibling_destination(primary, format)
}

/// Every file a finished sticker has on disk. A key frame only counts when
/// the record has somewhere to fetch it from.
fn expected_outputs(record: &StickerRecord, layout: &dyn SaveLocation, config: &PackConfig) -> Vec<PathBuf> {
    let primary = layout.primary_path(record);
    let mut expected = Vec::new();
    if let Some(key) = layout.key_path(record) {
        if record.key_urls().next().is_some() {
            expected.push(key);
        }
    }
    if record.is_animated() {
        if let Some(format) = config.format {
            expected.push(converted_path(&primary, format));
        }
        if config.emit_spritesheet {
            let (sheet, json) = spritesheet_paths(&primary);
            expected.push(sheet);
            expected.push(json);
        }
    }
    expected.push(primary);
    expected
}

fn process_sticker(
    record: &StickerRecord,
    layout: &dyn SaveLocation,
    pack_name: &str,
    config: &PackConfig,
) -> Result<StickerOutcome> {
    let primary = layout.primary_path(record);
    if expected_outputs(record, layout, config).iter().all(|p| p.is_file()) {
        debug!(id = %record.id, path = %primary.display(), "already downloaded");
        return Ok(StickerOutcome::Skipped);
    }
    let conversion = config.format.filter(|_| record.is_animated());

    let bytes = if primary.is_file() {
        debug!(id = %record.id, path = %primary.display(), "reusing downloaded sticker");
        std::fs::read(&primary)?
    } else {
        download_to(&record.primary_url, &primary, &config.fetch)?
    };
    let mut written = vec![primary.clone()];

    if let Some(key) = layout.key_path(record).filter(|k| !k.is_file()) {
        let mut saved = false;
        for url in record.key_urls() {
            match download_to(url, &key, &config.fetch) {
                Ok(_) => {
                    written.push(key.clone());
                    saved = true;
                    break;
                }
                Err(e) => debug!(id = %record.id, url, error = %e, "key frame URL failed"),
            }
        }
        if !saved {
            warn!(id = %record.id, "no key frame saved");
        }
    }

    if let Some(format) = conversion {
        let request = ConversionRequest::new(
            &primary,
            converted_path(&primary, format),
            format,
            config.options.clone(),
        );
        let outcome = Orchestrator::for_format(format, &config.tools)
            .convert_with(&request, AttemptContext::with_bytes(bytes))?;
        written.push(outcome.output);
    }

    if config.emit_spritesheet && record.is_animated() {
        let (sheet, json) = write_spritesheet(&primary, &record.id, pack_name, None)?;
        written.push(sheet);
        written.push(json);
    }

    Ok(StickerOutcome::Saved(written))
}

fn progress_bar(total: usize, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if !std::io::stderr().is_terminal() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return pb;
    }
    if let Ok(style) = ProgressStyle::default_bar().template(BATCH_TEMPLATE) {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

/// Downloads every sticker of one pack into `<out_dir>/<pack_name>/`.
pub fn download_pack(
    records: Vec<StickerRecord>,
    pack_name: &str,
    config: &PackConfig,
) -> Result<BatchResult> {
    config.options.validate()?;
    let records = dedupe_by_id(records);
    let layout = PackLayout::new(&config.out_dir, pack_name);
    std::fs::create_dir_all(layout.pack_dir())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.max(1))
        .build()
        .map_err(|e| PackError::ThreadPool(e.to_string()))?;

    info!(
        pack = pack_name,
        stickers = records.len(),
        jobs = config.jobs,
        dir = %layout.pack_dir().display(),
        "downloading pack"
    );

    let pb = progress_bar(records.len(), pack_name);
    let outcomes: Vec<(PathBuf, Result<StickerOutcome>)> = pool.install(|| {
        records
            .par_iter()
            .progress_with(pb.clone())
            .map(|record| {
                let outcome = process_sticker(record, &layout, pack_name, config);
                (layout.primary_path(record), outcome)
            })
            .collect()
    });
    pb.finish_with_message("done");

    let mut result = BatchResult::new();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(StickerOutcome::Saved(files)) => {
                debug!(path = %path.display(), files = files.len(), "sticker saved");
                result.success();
            }
            Ok(StickerOutcome::Skipped) => result.skip(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "sticker failed");
                result.fail(path, e.to_string());
            }
        }
    }

    info!(
        pack = pack_name,
        succeeded = result.succeeded,
        skipped = result.skipped,
        failed = result.failed,
        "pack finished"
    );
    Ok(result)
}

/// A single file, or every `.png` under a directory.
pub fn collect_sources(input: &Path, recursive: bool) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let walker = if recursive {
        WalkDir::new(input).follow_links(true)
    } else {
        WalkDir::new(input).max_depth(1)
    };
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false)
        })
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::StickerKind;
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    fn apng_bytes(w: u32, h: u32, frames: u32) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, w, h);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_animated(frames, 0).unwrap();
            let mut writer = encoder.write_header().unwrap();
            for i in 0..frames {
                writer.set_frame_delay(1, 10).unwrap();
                let px = [i as u8 * 70, 30, 200, 255];
                let data: Vec<u8> = px.iter().copied().cycle().take((w * h * 4) as usize).collect();
                writer.write_image_data(&data).unwrap();
            }
            writer.finish().unwrap();
        }
        out
    }

    /// Tiny HTTP server: serves `routes`, 404 for anything else.
    fn serve(routes: HashMap<&'static str, Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut head = Vec::new();
                let mut byte = [0u8; 1];
                while !head.ends_with(b"\r\n\r\n") {
                    match stream.read(&mut byte) {
                        Ok(1) => head.push(byte[0]),
                        _ => break,
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match routes.get(path.as_str()) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", Vec::new()),
                };
                let reply = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{}", addr)
    }

    fn record(id: &str, kind: StickerKind, primary: String, key: Option<String>) -> StickerRecord {
        StickerRecord {
            id: id.to_string(),
            primary_url: primary,
            static_url: key,
            fallback_static_url: None,
            kind,
        }
    }

    #[test]
    fn test_batch_result_counts() {
        let mut result = BatchResult::new();
        result.success();
        result.skip();
        result.fail(PathBuf::from("a.png"), "boom".to_string());
        assert_eq!((result.total, result.succeeded, result.skipped, result.failed), (3, 1, 1, 1));
        assert!(!result.is_clean());
        assert!((result.success_rate() - 33.333).abs() < 0.01);
        assert!((BatchResult::default().success_rate() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_download_pack_end_to_end() {
        let still = sticker_still();
        let base = serve(HashMap::from([
            ("/1/sticker.png", still.clone()),
            ("/2/sticker_animation.png", apng_bytes(6, 6, 3)),
            ("/2/sticker.png", still),
        ]));
        let out = tempfile::tempdir().unwrap();
        let config = PackConfig {
            out_dir: out.path().to_path_buf(),
            jobs: 2,
            format: Some(TargetFormat::Webp),
            emit_spritesheet: true,
            ..PackConfig::default()
        };
        let records = vec![
            record("1", StickerKind::Static, format!("{}/1/sticker.png", base), None),
            record("2", StickerKind::Static, format!("{}/2/sticker.png", base), None),
            record(
                "2",
                StickerKind::Animated,
                format!("{}/2/sticker_animation.png", base),
                Some(format!("{}/2/sticker.png", base)),
            ),
            record("3", StickerKind::Static, format!("{}/3/missing.png", base), None),
        ];

        let result = download_pack(records, "Test Pack", &config).unwrap();
        assert_eq!((result.total, result.succeeded, result.failed), (3, 2, 1));
        assert!(result.errors[0].0.ends_with("3.png"));

        let dir = out.path().join("Test Pack");
        for name in [
            "1.png",
            "2_animation.png",
            "2_key.png",
            "2_animation.webp",
            "2_animation_sheet.png",
            "2_animation.json",
        ] {
            assert!(dir.join(name).is_file(), "missing {}", name);
        }
        assert!(!dir.join("2.png").exists());

        // Second run finds everything in place.
        let again = download_pack(
            vec![record("1", StickerKind::Static, format!("{}/1/sticker.png", base), None)],
            "Test Pack",
            &config,
        )
        .unwrap();
        assert_eq!(again.skipped, 1);
    }

    #[test]
    fn test_key_frame_falls_back_to_second_url() {
        let base = serve(HashMap::from([
            ("/5/anim.png", apng_bytes(4, 4, 2)),
            ("/5/fallback.png", sticker_still()),
        ]));
        let out = tempfile::tempdir().unwrap();
        let config = PackConfig {
            out_dir: out.path().to_path_buf(),
            ..PackConfig::default()
        };
        let sticker = StickerRecord {
            fallback_static_url: Some(format!("{}/5/fallback.png", base)),
            ..record(
                "5",
                StickerKind::Animated,
                format!("{}/5/anim.png", base),
                Some(format!("{}/5/gone.png", base)),
            )
        };

        let result = download_pack(vec![sticker], "Keys", &config).unwrap();
        assert_eq!(result.succeeded, 1);
        let key = out.path().join("Keys").join("5_key.png");
        assert_eq!(std::fs::read(key).unwrap(), sticker_still());
    }

    #[test]
    fn test_rerun_fills_in_missing_outputs() {
        let base = serve(HashMap::from([
            ("/7/anim.png", apng_bytes(4, 4, 3)),
            ("/7/key.png", sticker_still()),
        ]));
        let out = tempfile::tempdir().unwrap();
        let dir = out.path().join("Repair");
        let sticker = |primary: &str| {
            record(
                "7",
                StickerKind::Animated,
                format!("{}{}", base, primary),
                Some(format!("{}/7/key.png", base)),
            )
        };

        let plain = PackConfig {
            out_dir: out.path().to_path_buf(),
            ..PackConfig::default()
        };
        assert_eq!(download_pack(vec![sticker("/7/anim.png")], "Repair", &plain).unwrap().succeeded, 1);
        std::fs::remove_file(dir.join("7_key.png")).unwrap();

        // The primary URL is gone now; the file already on disk is reused.
        let with_sheet = PackConfig {
            emit_spritesheet: true,
            ..plain
        };
        let result = download_pack(vec![sticker("/7/moved.png")], "Repair", &with_sheet).unwrap();
        assert_eq!((result.succeeded, result.skipped, result.failed), (1, 0, 0));
        for name in ["7_key.png", "7_animation_sheet.png", "7_animation.json"] {
            assert!(dir.join(name).is_file(), "missing {}", name);
        }

        let again = download_pack(vec![sticker("/7/moved.png")], "Repair", &with_sheet).unwrap();
        assert_eq!(again.skipped, 1);
    }

    fn sticker_still() -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, 2, 2);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[255u8; 16]).unwrap();
            writer.finish().unwrap();
        }
        out
    }

    #[test]
    fn test_invalid_options_fail_before_download() {
        let out = tempfile::tempdir().unwrap();
        let config = PackConfig {
            out_dir: out.path().to_path_buf(),
            options: ConvertOptions::default().with_color_count(0),
            ..PackConfig::default()
        };
        assert!(download_pack(Vec::new(), "p", &config).is_err());
    }

    #[test]
    fn test_collect_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["b.png", "a.PNG", "c.gif", ".a.palette.png", "sub/d.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names = |files: Vec<PathBuf>| -> Vec<String> {
            files
                .iter()
                .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
                .collect()
        };
        assert_eq!(names(collect_sources(dir.path(), false)), vec!["a.PNG", "b.png"]);
        assert_eq!(
            names(collect_sources(dir.path(), true)),
            vec!["a.PNG", "b.png", "sub/d.png"]
        );
        assert_eq!(collect_sources(&dir.path().join("b.png"), true).len(), 1);
    }
}
