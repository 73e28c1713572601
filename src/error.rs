use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the resolver, subtitle catalog and downloader.
///
/// Only [`Error::Network`] is ever retried; everything else is either
/// deterministic (`Crypto`, `Parse`) or a terminal outcome in its own right.
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no subtitle available")]
    NoSubtitle,

    #[error("playlist contains no variants")]
    NoVariant,

    #[error("download cancelled")]
    Cancelled,

    #[error("ffmpeg exited with an error:\n{0}")]
    Transcode(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retry policy may re-attempt the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
