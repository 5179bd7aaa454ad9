//! Single-attempt remote retrieval of sticker assets.
//!
//! No retries: a failed fetch is reported once and the caller decides.

use crate::encoders::AttemptContext;
use crate::errors::{ConvertError, Result};
use crate::orchestrator::{ConversionOutcome, Orchestrator};
use crate::request::{resolve_source, ConversionRequest, ConvertOptions, SourceRef, TargetFormat, ToolConfig};
use reqwest::blocking::Client;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Request headers and timeout for asset downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub referer: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    fn client(&self) -> std::result::Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
    }
}

fn fetch_error(url: &str, message: impl ToString) -> ConvertError {
    ConvertError::Fetch {
        url: url.to_string(),
        message: message.to_string(),
    }
}

/// GETs `url` once. Any non-2xx status is an error.
pub fn fetch_bytes(url: &str, config: &FetchConfig) -> Result<Vec<u8>> {
    let client = config.client().map_err(|e| fetch_error(url, e))?;
    let mut request = client
        .get(url)
        .header(header::ACCEPT, "image/apng,image/png,image/*,*/*;q=0.8");
    if let Some(referer) = &config.referer {
        request = request.header(header::REFERER, referer);
    }

    let response = request.send().map_err(|e| fetch_error(url, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(fetch_error(url, format!("HTTP {}", status)));
    }
    let bytes = response.bytes().map_err(|e| fetch_error(url, e))?;
    debug!(url, bytes = bytes.len(), "fetched asset");
    Ok(bytes.to_vec())
}

/// Fetches `url` into `path`, creating parent directories.
pub fn download_to(url: &str, path: &Path, config: &FetchConfig) -> Result<Vec<u8>> {
    let bytes = fetch_bytes(url, config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &bytes)?;
    info!(url, path = %path.display(), "saved asset");
    Ok(bytes)
}

/// Remote source end to end: download next to the output, then run the
/// chain for `format` on the downloaded file.
pub fn convert_url(
    url: &str,
    dir: &Path,
    format: TargetFormat,
    options: &ConvertOptions,
    config: &FetchConfig,
    tools: &ToolConfig,
) -> Result<ConversionOutcome> {
    options.validate()?;
    let (local, destination) = resolve_source(&SourceRef::Url(url.to_string()), dir, format);
    let bytes = download_to(url, &local, config)?;
    let request = ConversionRequest::new(local, destination, format, options.clone());
    Orchestrator::for_format(format, tools).convert_with(&request, AttemptContext::with_bytes(bytes))
}
