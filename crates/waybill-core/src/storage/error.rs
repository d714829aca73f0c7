//! Local storage failures
//!
//! Anything that goes wrong in the store means the queues may no longer be
//! durable, so these errors are never swallowed. They propagate to whoever
//! triggered the write or read.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::OperationKind;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The data directory could not be prepared
    #[error("Cannot prepare data directory '{path}': {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Access to '{path}' was denied")]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of disk space writing '{path}'")]
    NoSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("SQLite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A queued operation row no longer decodes
    #[error("Corrupt {kind} queue entry '{id}': {details}")]
    CorruptEntry {
        kind: OperationKind,
        id: String,
        details: String,
    },

    /// A cached entity row no longer decodes
    #[error("Corrupt cached entity '{key}': {details}")]
    CorruptCache { key: String, details: String },

    /// Payload could not be encoded; nothing was written
    #[error("Cannot encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store connection lock was poisoned")]
    Poisoned,

    #[error("I/O: {0}")]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Attach a path to an I/O failure, picking the most specific variant
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        if error.kind() == io::ErrorKind::PermissionDenied {
            return StorageError::AccessDenied {
                path,
                source: error,
            };
        }
        if out_of_space(&error) {
            return StorageError::NoSpace {
                path,
                source: error,
            };
        }
        StorageError::DataDir {
            path,
            source: error,
        }
    }

    /// True when the operator can fix the cause without losing queued work
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::NoSpace { .. } | StorageError::AccessDenied { .. }
        )
    }

    /// What to tell the operator, if there is anything useful to say
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        Some(match self {
            StorageError::NoSpace { .. } => "Free disk space, then retry. Queued work is intact.",
            StorageError::AccessDenied { .. } => {
                "Make the data directory readable and writable by this user."
            }
            StorageError::DataDir { .. } => {
                "Point data_dir at a writable location: `waybill config set data_dir <path>`."
            }
            StorageError::CorruptEntry { .. } => {
                "Drop the corrupt entry with `waybill discard <kind> <id>`."
            }
            StorageError::CorruptCache { .. } => {
                "Run `waybill sync` to rebuild the cache from the server."
            }
            _ => return None,
        })
    }
}

fn out_of_space(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::StorageFull {
        return true;
    }
    let msg = error.to_string().to_lowercase();
    ["no space left", "disk full", "quota exceeded"]
        .iter()
        .any(|needle| msg.contains(needle))
}

pub type StorageResult<T> = Result<T, StorageError>;
