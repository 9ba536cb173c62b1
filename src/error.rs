use std::path::PathBuf;

use thiserror::Error;

/// Main error type for scour operations
#[derive(Error, Debug)]
pub enum ScourError {
    // --- Integrity ---
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid checksum format: {0}")]
    InvalidChecksum(String),

    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("schema corrupt: {0}")]
    SchemaCorrupt(String),

    #[error("segment corrupt: {0}")]
    SegmentCorrupt(String),

    #[error("recovery impossible: no valid manifest with intact segments found")]
    RecoveryImpossible,

    // --- Structural ---
    #[error("manifest not found for generation {0}")]
    ManifestNotFound(u64),

    #[error("index not found at {0}")]
    IndexNotFound(PathBuf),

    #[error("index already exists at {0}")]
    IndexExists(PathBuf),

    #[error("schema validation failed: {0}")]
    SchemaValidation(String),

    // --- Concurrency ---
    #[error("writer is already held for this index")]
    WriterLocked,

    #[error("writer is not active")]
    WriterNotActive,

    #[error("duplicate document id in buffer: {0}")]
    DuplicateDocInBuffer(String),

    #[error("cannot commit an empty write buffer")]
    IndexEmpty,

    // --- Limits / resources ---
    #[error("write buffer memory or document limit reached")]
    BufferFull,

    #[error("DFA state limit exceeded during construction")]
    DfaStateLimitExceeded,

    #[error("wildcard pattern exceeds maximum length of {0} bytes")]
    WildcardPatternTooLong(usize),

    #[error("edit distance {0} exceeds maximum of 2")]
    EditDistanceTooLarge(u32),

    #[error("term too short for fuzzy matching (minimum {0} characters)")]
    TermTooShort(usize),

    #[error("query execution timeout")]
    QueryTimeout,

    #[error("automaton state limit exceeded")]
    StateLimitExceeded,

    #[error("term match limit exceeded")]
    MatchLimitExceeded,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // --- Operational ---
    #[error("commit cancelled")]
    CommitCancelled,

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for scour operations
pub type Result<T> = std::result::Result<T, ScourError>;

impl ScourError {
    /// Wrap an I/O error together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScourError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that recovery treats as corruption and falls back on.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ScourError::ChecksumMismatch { .. }
                | ScourError::InvalidChecksum(_)
                | ScourError::ManifestCorrupt(_)
                | ScourError::SchemaCorrupt(_)
                | ScourError::SegmentCorrupt(_)
                | ScourError::ManifestNotFound(_)
        )
    }
}
