//! Crate-wide error types.

use std::path::PathBuf;

use thiserror::Error;

pub type LensResult<T> = Result<T, LensError>;

#[derive(Debug, Error)]
pub enum LensError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("collapsed stack parse error at line {line}: {reason}")]
    CollapsedParse { line: usize, reason: String },

    #[error("no data: {0} has a zero total")]
    NoData(String),

    #[error("unknown session {0}")]
    UnknownSession(uuid::Uuid),

    #[error("zip error: {0}")]
    Zip(String),

    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<LensError>,
    },
}

impl LensError {
    /// Attaches the failing input path.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        match self {
            err @ Self::File { .. } => err,
            other => Self::File {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

impl From<zip::result::ZipError> for LensError {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Zip(value.to_string())
    }
}
