//! Error taxonomy shared by every stage of the forensic pipeline.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    EngineUnavailable,
    Processing,
    ResourceRelease,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidInput => "invalid input",
            Self::EngineUnavailable => "engine unavailable",
            Self::Processing => "processing error",
            Self::ResourceRelease => "resource release error",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForensicError {
    /// Zero-size or unreadable source image, or out-of-range parameters.
    /// Raised before anything is allocated.
    InvalidInput(String),
    /// The transform engine has not signalled readiness yet.
    EngineUnavailable,
    /// A pipeline stage failed mid-pass.
    Processing(String),
    /// Releasing an intermediate buffer failed. Logged, never returned from a pass.
    ResourceRelease(String),
}

impl ForensicError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn processing(reason: impl Into<String>) -> Self {
        Self::Processing(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::EngineUnavailable => ErrorKind::EngineUnavailable,
            Self::Processing(_) => ErrorKind::Processing,
            Self::ResourceRelease(_) => ErrorKind::ResourceRelease,
        }
    }
}

impl fmt::Display for ForensicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(reason) => write!(f, "invalid input: {reason}"),
            Self::EngineUnavailable => f.write_str("transform engine is not ready yet"),
            Self::Processing(reason) => write!(f, "processing failed: {reason}"),
            Self::ResourceRelease(reason) => write!(f, "failed to release buffer: {reason}"),
        }
    }
}

impl std::error::Error for ForensicError {}

pub type Result<T, E = ForensicError> = std::result::Result<T, E>;
