use std::path::PathBuf;
use thiserror::Error;

/// Pipeline-level failures. Only the entry file can make a run fail;
/// everything below that degrades to "leave as-is" (unexpanded includes,
/// unevaluated expressions, unmodified nodes).
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("cannot read entry file {path}: {source}")]
    EntryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse entry file {path}: {message}")]
    EntryUnparseable { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pass '{pass}' failed: {message}")]
    Pass {
        pass: &'static str,
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
