//! Error type shared by the whole pipeline.
//!
//! Only conditions that abort a manual build live here. Degraded conditions
//! (missing fallback font, unresolved anchors, slow images) are logged where
//! they occur and never become an [`Error`].

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Fatal failures of a manual build.
#[derive(Debug, Error)]
pub enum Error {
    /// The renderer did not produce output within its hard timeout.
    #[error("renderer did not finish within {0:?}")]
    RenderTimeout(Duration),

    /// The renderer failed for a reason other than the timeout.
    #[error("renderer failed: {0}")]
    Render(String),

    /// The rendered bytes could not be read back as a document.
    #[error("failed to parse rendered document: {0}")]
    Parse(#[source] lopdf::Error),

    /// The object model rejected an edit or could not serialise the result.
    #[error("document error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid configuration file or option value.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed DOM query result: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
