//! Fallback orchestration over an ordered strategy list.
//!
//! Strategies run strictly one after another. The first success wins; every
//! failure is logged and recorded, and only running out of strategies turns
//! into an error for the caller.

use crate::encoders::{
    AttemptContext, Encoder, FfmpegPaletteEncoder, GifFrameEncoder, PassthroughEncoder,
    WebpAnimEncoder,
};
use crate::errors::{AttemptFailure, ConvertError, Result};
use crate::request::{ConversionRequest, TargetFormat, ToolConfig};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

pub type Strategy = Box<dyn Encoder + Send + Sync>;

/// Result of a conversion that produced an output file.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub output: PathBuf,
    /// Name of the strategy that wrote `output`.
    pub strategy: &'static str,
    /// Failures of the strategies tried before it, in order.
    pub failures: Vec<(&'static str, AttemptFailure)>,
    /// Known only when an in-process decode happened.
    pub frame_count: Option<usize>,
}

pub struct Orchestrator {
    strategies: Vec<Strategy>,
}

impl Orchestrator {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    /// GIF: external tool, then in-process, then passthrough. WebP: one strategy.
    pub fn for_format(format: TargetFormat, tools: &ToolConfig) -> Self {
        let strategies: Vec<Strategy> = match format {
            TargetFormat::Gif => vec![
                Box::new(FfmpegPaletteEncoder::new(tools.ffmpeg.clone())),
                Box::new(GifFrameEncoder::new()),
                Box::new(PassthroughEncoder::new()),
            ],
            TargetFormat::Webp => vec![Box::new(WebpAnimEncoder::new())],
        };
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn convert(&self, request: &ConversionRequest) -> Result<ConversionOutcome> {
        self.convert_with(request, AttemptContext::new())
    }

    /// Like [`convert`](Self::convert) with a caller-primed context, e.g. bytes
    /// that were just downloaded.
    pub fn convert_with(
        &self,
        request: &ConversionRequest,
        mut ctx: AttemptContext,
    ) -> Result<ConversionOutcome> {
        request.options.validate()?;
        if self.strategies.is_empty() {
            return Err(ConvertError::InvalidOptions(
                "no encoding strategies configured".to_string(),
            ));
        }
        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let started = Instant::now();
        let mut failures: Vec<(&'static str, AttemptFailure)> = Vec::new();
        for strategy in &self.strategies {
            let name = strategy.name();
            match strategy.attempt(request, &mut ctx) {
                Ok(output) => {
                    info!(
                        strategy = name,
                        output = %output.display(),
                        format = %request.format,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "conversion succeeded"
                    );
                    return Ok(ConversionOutcome {
                        output,
                        strategy: name,
                        failures,
                        frame_count: ctx.frame_count(),
                    });
                }
                Err(failure) => {
                    if failure.category.is_fallback_signal() {
                        info!(
                            strategy = name,
                            category = %failure.category,
                            source = %request.source.display(),
                            "strategy declined input: {}",
                            failure.message
                        );
                    } else {
                        warn!(
                            strategy = name,
                            category = %failure.category,
                            source = %request.source.display(),
                            "strategy failed: {}",
                            failure.message
                        );
                    }
                    failures.push((name, failure));
                }
            }
        }

        let strategies = failures.len();
        match failures.pop() {
            Some((last_strategy, last)) => Err(ConvertError::Exhausted {
                strategies,
                last_strategy: last_strategy.to_string(),
                last,
            }),
            None => Err(ConvertError::InvalidOptions(
                "no encoding strategies configured".to_string(),
            )),
        }
    }
}

/// One-shot convenience: the documented chain for `request.format`.
pub fn convert(request: &ConversionRequest, tools: &ToolConfig) -> Result<ConversionOutcome> {
    Orchestrator::for_format(request.format, tools).convert(request)
}
