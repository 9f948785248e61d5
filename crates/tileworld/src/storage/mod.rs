use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub(crate) mod atomic_io;
pub mod chunk_format;
pub mod documents;
pub mod layout;
pub mod palette;
mod persistence;
mod save_queue;

pub use chunk_format::{ChunkFormatError, DecodeReport};
pub use documents::{
    DocumentError, EntityDocument, EntityRef, RegionDocument, SubRegionDocument, WorldMetadata,
};
pub use layout::{DataCategory, SaveLayout};
pub use palette::{Palette, PaletteError};
pub use persistence::PersistenceManager;
pub use save_queue::{SaveJob, SaveQueue, SaveReceipt, SaveTarget, SaveTicket};

/// Result of reading one save file.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome<T> {
    Loaded(T),
    /// No file in any folder the load mode allows.
    NotFound,
    /// The file was unreadable and has been deleted.
    Corrupt { reason: String },
}

impl<T> LoadOutcome<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded(_))
    }

    pub fn loaded(self) -> Option<T> {
        match self {
            LoadOutcome::Loaded(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read/write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ChunkFormatError,
    },
    #[error("failed to encode {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
