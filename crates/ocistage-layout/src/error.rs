use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while driving an image layout.
#[derive(Debug, Error)]
pub enum StageError {
    /// An image store primitive exited nonzero or could not be started.
    #[error("store command failed: {command}: {detail}")]
    StoreCommand { command: String, detail: String },

    /// A snapshot backend primitive failed for `tag`.
    #[error("error {operation} tag: {tag}: {detail}")]
    BackendCommand {
        operation: SnapshotOperation,
        tag: String,
        detail: String,
    },

    #[error("failed to enter directory {}: {source}", .path.display())]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Tag listing failed; only surfaced by `try_list_tags`.
    #[error("tag listing unavailable: {detail}")]
    ListTagsUnavailable { detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid command line: {0}")]
    InvalidCommand(String),

    #[error("invalid path inside root filesystem: {0}")]
    InvalidRootPath(String),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl StageError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for failures that came from the snapshot backend's checkout or
    /// checkin, which callers report by naming the tag and exiting.
    pub fn is_backend_command(&self) -> bool {
        matches!(self, Self::BackendCommand { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOperation {
    Checkout,
    Checkin,
    CreateVolume,
}

impl SnapshotOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkout => "checkout",
            Self::Checkin => "checkin",
            Self::CreateVolume => "subvolume-create",
        }
    }
}

impl fmt::Display for SnapshotOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Checkout => f.write_str("checking out base"),
            Self::Checkin => f.write_str("checking in"),
            Self::CreateVolume => f.write_str("creating baseline volume for"),
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
