use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use sticker_core::logging::{init_logging, LogConfig};
use sticker_core::{
    ConversionRequest, ConvertOptions, FetchConfig, FrameErrorPolicy, Orchestrator, TargetFormat,
    ToolConfig,
};
use tracing::{error, info, Level};

use sticker_pack::{collect_sources, download_pack, parse_records, write_spritesheet, PackConfig, DEFAULT_JOBS};

#[derive(Parser)]
#[command(name = "sticker-pack")]
#[command(version, about = "Download sticker packs and convert animated stickers to GIF or WebP", long_about = None)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that converts.
#[derive(Args, Debug, Clone)]
struct ConvertArgs {
    /// 0 loops forever
    #[arg(long, default_value_t = 0)]
    loop_count: u32,
    #[arg(long)]
    max_frame_duration_ms: Option<u32>,
    #[arg(long, default_value = "fail")]
    on_frame_error: FrameErrorPolicy,
    /// Palette size, 2..=256
    #[arg(long, default_value_t = 256)]
    colors: u16,
    /// #rrggbb used to flatten partially transparent pixels
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    transparency_threshold: Option<u8>,
    #[arg(long, default_value_t = 75.0)]
    webp_quality: f32,
    /// External transcoder binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl ConvertArgs {
    fn options(&self) -> ConvertOptions {
        ConvertOptions {
            loop_count: self.loop_count,
            max_frame_duration_ms: self.max_frame_duration_ms,
            on_frame_error: self.on_frame_error,
            color_count: self.colors,
            background_color: self.background.clone(),
            transparency_threshold: self.transparency_threshold,
            webp_quality: self.webp_quality,
        }
    }

    fn tools(&self) -> ToolConfig {
        ToolConfig {
            ffmpeg: self.ffmpeg.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an APNG file, or every .png under a directory
    Convert {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,
        #[arg(short, long, default_value = "gif")]
        format: TargetFormat,
        /// Write outputs here instead of next to each source
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
        #[command(flatten)]
        convert: ConvertArgs,
    },

    /// Download every sticker listed in a records JSON file
    Pack {
        #[arg(value_name = "RECORDS")]
        records: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_JOBS)]
        jobs: usize,
        /// Also convert animated stickers
        #[arg(short, long)]
        format: Option<TargetFormat>,
        #[arg(long)]
        spritesheet: bool,
        #[arg(long)]
        referer: Option<String>,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
        #[command(flatten)]
        convert: ConvertArgs,
    },

    /// Render an APNG's frames into a spritesheet with a JSON descriptor
    Sheet {
        #[arg(value_name = "APNG")]
        source: PathBuf,
        #[arg(long)]
        columns: Option<u32>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "")]
        pack_name: String,
    },
}

fn destination_for(source: &Path, format: TargetFormat, out_dir: Option<&Path>) -> PathBuf {
    let sibling = sticker_core::sibling_destination(source, format);
    match (out_dir, sibling.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => sibling,
    }
}

fn run_convert(
    source: &Path,
    format: TargetFormat,
    out_dir: Option<&Path>,
    recursive: bool,
    args: &ConvertArgs,
) -> anyhow::Result<bool> {
    let files = collect_sources(source, recursive);
    if files.is_empty() {
        anyhow::bail!("no .png sources found under {}", source.display());
    }
    let options = args.options();
    options.validate()?;
    let orchestrator = Orchestrator::for_format(format, &args.tools());

    let mut failed = 0usize;
    for file in &files {
        let request = ConversionRequest::new(
            file,
            destination_for(file, format, out_dir),
            format,
            options.clone(),
        );
        match orchestrator.convert(&request) {
            Ok(outcome) => info!(
                source = %file.display(),
                output = %outcome.output.display(),
                strategy = outcome.strategy,
                "converted"
            ),
            Err(e) => {
                error!(source = %file.display(), "{}", e);
                failed += 1;
            }
        }
    }
    info!(total = files.len(), failed, "convert finished");
    Ok(failed == 0)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let _ = init_logging("sticker_pack", LogConfig::default().with_level(level));

    let ok = match cli.command {
        Commands::Convert {
            source,
            format,
            out_dir,
            recursive,
            convert,
        } => run_convert(&source, format, out_dir.as_deref(), recursive, &convert)?,

        Commands::Pack {
            records,
            name,
            out,
            jobs,
            format,
            spritesheet,
            referer,
            timeout_secs,
            convert,
        } => {
            let json = std::fs::read_to_string(&records)?;
            let records = parse_records(&json)?;
            let config = PackConfig {
                out_dir: out,
                jobs,
                format,
                options: convert.options(),
                emit_spritesheet: spritesheet,
                fetch: FetchConfig {
                    referer,
                    timeout_secs,
                    ..FetchConfig::default()
                },
                tools: convert.tools(),
            };
            let result = download_pack(records, &name, &config)?;
            println!(
                "{}: {} saved, {} skipped, {} failed ({:.1}% success)",
                name,
                result.succeeded,
                result.skipped,
                result.failed,
                result.success_rate()
            );
            for (path, message) in &result.errors {
                eprintln!("  {}: {}", path.display(), message);
            }
            result.is_clean()
        }

        Commands::Sheet {
            source,
            columns,
            label,
            pack_name,
        } => {
            let label = label.unwrap_or_else(|| {
                source
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let (sheet, json) = write_spritesheet(&source, &label, &pack_name, columns)?;
            println!("{}\n{}", sheet.display(), json.display());
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
