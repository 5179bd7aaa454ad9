//! Failure taxonomy for conversion attempts and the crate-level error type.
//!
//! A single strategy reports an [`AttemptFailure`]; only exhaustion of the whole
//! strategy chain surfaces as [`ConvertError::Exhausted`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    ToolUnavailable,
    ToolRejectedInput,
    DecodeError,
    FrameValidationError,
    EncodeError,
    IoError,
}

impl FailureCategory {
    /// True for failures that only mean "this strategy cannot handle the input".
    /// The orchestrator advances on every category; this only shapes log levels.
    pub fn is_fallback_signal(&self) -> bool {
        matches!(
            self,
            FailureCategory::ToolUnavailable | FailureCategory::ToolRejectedInput
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ToolUnavailable => "ToolUnavailable",
            FailureCategory::ToolRejectedInput => "ToolRejectedInput",
            FailureCategory::DecodeError => "DecodeError",
            FailureCategory::FrameValidationError => "FrameValidationError",
            FailureCategory::EncodeError => "EncodeError",
            FailureCategory::IoError => "IOError",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `Failure` arm of one strategy invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{category}: {message}")]
pub struct AttemptFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::DecodeError, message)
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::FrameValidationError, message)
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::EncodeError, message)
    }

    pub fn io(context: &str, err: &std::io::Error) -> Self {
        Self::new(FailureCategory::IoError, format!("{}: {}", context, err))
    }
}

/// Outcome of one strategy: the written destination or a classified failure.
pub type EncodeAttemptResult = std::result::Result<PathBuf, AttemptFailure>;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("all {strategies} strategies failed; last was {last_strategy} ({last})")]
    Exhausted {
        strategies: usize,
        last_strategy: String,
        last: AttemptFailure,
    },

    #[error("Invalid conversion options: {0}")]
    InvalidOptions(String),

    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Category of the terminal failure, if the chain was exhausted.
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            ConvertError::Exhausted { last, .. } => Some(last.category),
            ConvertError::Io(_) => Some(FailureCategory::IoError),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
