use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open segment {}: {source}", path.display())]
    SegmentOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("invalid segment key: {0}")]
    InvalidKey(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown record kind: {0}")]
    UnknownKind(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    /// Removal of a key whose suffix maps to no reduction tier.
    #[error("unknown file {0}: no reduction tier matches its suffix")]
    UntrackedFile(String),

    /// Removal of a key that is not a member of its tier's set.
    #[error("file {key} is not registered in {set}")]
    NotRegistered { set: String, key: String },

    #[error("tier {0} has no reduction set")]
    UntrackedTier(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("trim of {topic} failed: {reason}")]
    Trim { topic: String, reason: String },

    #[error("corrupt data: {0}")]
    Corrupt(&'static str),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
