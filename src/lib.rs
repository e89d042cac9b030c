use std::path::PathBuf;

pub mod analyzers;
pub mod audio;
pub mod cli;
pub mod codec;
pub mod model;
pub mod sync;
pub mod tiers;
pub mod utils;

/// On-disk format version written into every committed/published tier header.
pub const FORMAT_VERSION: &str = "0.1";

#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Invalid tier at {}: {reason}", path.display())]
    InvalidTier { path: PathBuf, reason: String },
    #[error("Unknown or unsupported tag format in {}", path.display())]
    UnknownTagFormat { path: PathBuf },
    #[error("Invalid lyric line {line:?} in {}", path.display())]
    InvalidLyricLine { line: String, path: PathBuf },
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("Invalid language tag {0:?}: expected letters, digits and '-'")]
    InvalidLanguageTag(String),

    #[error("File or directory already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("No item with id {0}")]
    ItemNotFound(String),
    #[error("Header not found: {0}")]
    HeaderNotFound(String),
    #[error("Header is protected: {0}")]
    ProtectedHeader(String),
    #[error("Item {id} has more than one lyric track for language {language}")]
    DuplicateLyricLanguage { id: String, language: String },

    #[error("Tier identity mismatch: target is {target}, source is {source_id}")]
    IdentityMismatch { target: String, source_id: String },
    #[error("Tier version {found} is newer than supported version {supported}")]
    IncompatibleVersion { found: String, supported: String },
    #[error("Tier last update {last_update} is later than now ({now})")]
    FutureTimestamp { last_update: i64, now: i64 },
    #[error("Nothing to commit in {}", .0.display())]
    NoChanges(PathBuf),

    #[error("Corrupt store data in {}: {reason}", path.display())]
    CorruptStoreData { path: PathBuf, reason: String },
    #[error("Checksum mismatch for {}: expected {expected}, found {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("Unsupported quality: {0}")]
    UnsupportedQuality(String),

    #[error("Metadata extraction error: {0}")]
    Metadata(String),
    #[error("Transcoding error: {0}")]
    Transcode(String),
}

pub type Result<T> = std::result::Result<T, DepotError>;

// Re-exports for convenience
pub use audio::metadata::{SymphoniaTagReader, TagReader, Tags};
pub use audio::rendition::RenditionManager;
pub use audio::transcode::{FfmpegTranscoder, Transcoder};
pub use model::identifier::Identifier;
pub use model::item::{Cover, MediaItem, Quality, RenditionLadder};
pub use model::lyric::LyricTrack;
pub use sync::engine::{SyncEngine, SyncReport};
pub use tiers::file_tier::{CommittedTier, FileTier, PublishedTier};
pub use tiers::staging::StagingTier;
pub use tiers::{EditKind, EditLogEntry, SyncSource, Tier};
