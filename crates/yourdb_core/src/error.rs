//! Error types for the storage engine.

use std::io;
use thiserror::Error;
use yourdb_codec::{CodecError, ValueKind};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in YourDB engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A record does not conform to its entity's schema.
    #[error("schema violation on field '{field}': expected {expected}, got {got}")]
    SchemaViolation {
        /// The offending field.
        field: String,
        /// What the schema requires.
        expected: String,
        /// What was found.
        got: String,
    },

    /// A filter operand's kind does not match the field's declared kind.
    #[error("kind mismatch on field '{field}': expected {expected}, got {got}")]
    KindMismatch {
        /// The filtered field.
        field: String,
        /// The declared kind.
        expected: ValueKind,
        /// The operand kind.
        got: ValueKind,
    },

    /// An insert collided with a live record's primary key.
    #[error("duplicate primary key {pk}")]
    DuplicatePrimaryKey {
        /// Display form of the conflicting key.
        pk: String,
    },

    /// An update transform changed the primary-key value.
    #[error("update may not change the primary key (record {pk})")]
    PrimaryKeyImmutable {
        /// Display form of the original key.
        pk: String,
    },

    /// An entity with this name already exists.
    #[error("entity already exists: {name}")]
    EntityExists {
        /// Name of the entity.
        name: String,
    },

    /// No entity with this name exists.
    #[error("entity not found: {name}")]
    EntityNotFound {
        /// Name of the entity.
        name: String,
    },

    /// A schema definition is unusable.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// A stored record's version has no registered path to the current
    /// schema version.
    #[error("no upgrade step from version {from} toward version {target}")]
    UpgradeChainBroken {
        /// Version the stored record carries.
        from: u32,
        /// Version the schema requires.
        target: u32,
    },

    /// A non-trailing log frame failed validation.
    #[error("corrupt frame at seq {seq}: {message}")]
    CorruptFrame {
        /// Ordinal of the frame within the segment.
        seq: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the database directory lock.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record payload encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl EngineError {
    /// Creates a schema violation error.
    pub fn schema_violation(
        field: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a corrupt frame error.
    pub fn corrupt_frame(seq: u64, message: impl Into<String>) -> Self {
        Self::CorruptFrame {
            seq,
            message: message.into(),
        }
    }
}
