use std::process::ExitStatus;
use thiserror::Error;

/// Failure categories of a signing run.
///
/// Functions in this crate return `anyhow::Result`; these variants sit at the
/// root of the error chain so callers can `downcast_ref::<SignError>()`.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("bad archive {archive}: {reason}")]
    Archive { archive: String, reason: String },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("failed to start signing tool {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("signing tool exited with {0}")]
    SignToolFailed(ExitStatus),

    #[error("invalid package identity: {0}")]
    InvalidPackage(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SignError {
    pub(crate) fn download(url: &str, reason: impl ToString) -> Self {
        SignError::Download {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn archive(archive: impl ToString, reason: impl ToString) -> Self {
        SignError::Archive {
            archive: archive.to_string(),
            reason: reason.to_string(),
        }
    }
}
