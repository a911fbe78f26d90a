//! Error types for opening, decoding and entity access.

use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::EntityKind;

/// Error while opening a source or driving a stream to completion.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Malformed source content. Fatal to the stream that produced it.
///
/// Every variant carries the byte offset of the record or frame being
/// decoded when the problem was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("invalid value {value:?} for attribute `{attribute}` of <{element}> at byte {position}")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
        position: u64,
    },

    #[error("missing attribute `{attribute}` on <{element}> at byte {position}")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
        position: u64,
    },

    #[error("{kind} {id} has version {version}, expected >= 1 (byte {position})")]
    InvalidVersion {
        kind: EntityKind,
        id: i64,
        version: i64,
        position: u64,
    },

    #[error("{kind} {id} repeats tag key {key:?} (byte {position})")]
    DuplicateTag {
        kind: EntityKind,
        id: i64,
        key: String,
        position: u64,
    },

    #[error("unexpected end of input inside {context} at byte {position}")]
    Truncated {
        context: &'static str,
        position: u64,
    },

    #[error("I/O error at byte {position}: {message}")]
    Io { position: u64, message: String },

    #[error("malformed PBF data at byte {position}: {message}")]
    Pbf { position: u64, message: String },

    #[error("{context} size {size} exceeds limit {max} at byte {position}")]
    SizeLimit {
        context: &'static str,
        size: usize,
        max: usize,
        position: u64,
    },

    #[error("unsupported required feature {feature:?} at byte {position}")]
    UnsupportedFeature { feature: String, position: u64 },

    #[error("unsupported blob compression `{compression}` at byte {position}")]
    UnsupportedCompression {
        compression: &'static str,
        position: u64,
    },

    #[error("string table index {index} out of bounds (size: {size}) at byte {position}")]
    StringIndex {
        index: i64,
        size: usize,
        position: u64,
    },
}

impl DecodeError {
    /// Byte offset in the (decompressed) source where decoding failed.
    pub fn position(&self) -> u64 {
        match self {
            DecodeError::Xml { position, .. }
            | DecodeError::InvalidAttribute { position, .. }
            | DecodeError::MissingAttribute { position, .. }
            | DecodeError::InvalidVersion { position, .. }
            | DecodeError::DuplicateTag { position, .. }
            | DecodeError::Truncated { position, .. }
            | DecodeError::Io { position, .. }
            | DecodeError::Pbf { position, .. }
            | DecodeError::SizeLimit { position, .. }
            | DecodeError::UnsupportedFeature { position, .. }
            | DecodeError::UnsupportedCompression { position, .. }
            | DecodeError::StringIndex { position, .. } => *position,
        }
    }

    pub(crate) fn io(err: io::Error, position: u64) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return DecodeError::Truncated {
                context: "input",
                position,
            };
        }
        DecodeError::Io {
            position,
            message: err.to_string(),
        }
    }
}

/// Broad class of an [`AccessError`], mirrored as `TypeError` / `RangeError`
/// by scripting bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessErrorKind {
    Type,
    Range,
    Deleted,
}

/// Caller mistake when reading an entity. Never affects stream state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    #[error("{operation}() takes at most {max} argument(s), {given} given")]
    Arity {
        operation: &'static str,
        max: usize,
        given: usize,
    },

    #[error("{operation}() expects {expected}, got {found}")]
    ArgumentType {
        operation: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("index {index} out of range for {len} node references")]
    OutOfRange { index: i64, len: usize },

    #[error("{field} of {len} does not fit in 32 bits")]
    CountOverflow { field: &'static str, len: usize },

    #[error("{field} is not available on deleted {kind} {id}")]
    Deleted {
        kind: EntityKind,
        id: i64,
        field: &'static str,
    },
}

impl AccessError {
    pub fn kind(&self) -> AccessErrorKind {
        match self {
            AccessError::Arity { .. } | AccessError::ArgumentType { .. } => AccessErrorKind::Type,
            AccessError::OutOfRange { .. } | AccessError::CountOverflow { .. } => {
                AccessErrorKind::Range
            }
            AccessError::Deleted { .. } => AccessErrorKind::Deleted,
        }
    }
}
