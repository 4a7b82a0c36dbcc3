//! Errors reported by tree operations and the binary codec.

use std::fmt;

/// Errors from the name-keyed tree operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TreeError {
    #[error("operation requires a non-empty tree")]
    EmptyTree,
    #[error("file `{0}` is already present in the tree")]
    DuplicateFileName(String),
    #[error("file `{0}` was not found in the tree")]
    UnknownFile(String),
    #[error("no files specified for deletion")]
    NoFilesSpecified,
}

/// Low-level deserialization errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeserializeErrorKind {
    /// Tree file is too short for the data it claims to contain.
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("format version {0} is not supported")]
    UnsupportedVersion(u32),
    /// String field contains invalid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Utf8(#[source] std::str::Utf8Error),
    #[error("failed to parse BSON payload: {0}")]
    Bson(#[source] bson::de::Error),
    #[error("invalid flag byte {0}; expected 0 or 1")]
    InvalidFlag(u8),
    /// A node claims more descendants than the flattened array provides.
    #[error("node counts are inconsistent with the flattened node array")]
    MalformedNodeArray,
}

/// Context in which a deserialization error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorContext {
    Version,
    DatabaseMetadata,
    TreeId,
    TreeTotals,
    NodeHash,
    NodeCounts,
    FileName,
    LastModified,
    DeletedFlag,
    NodeRef,
    Timestamps,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Version => "format version",
            Self::DatabaseMetadata => "database metadata payload",
            Self::TreeId => "tree UUID",
            Self::TreeTotals => "tree totals",
            Self::NodeHash => "node hash",
            Self::NodeCounts => "node counts",
            Self::FileName => "leaf file name",
            Self::LastModified => "leaf timestamp",
            Self::DeletedFlag => "deletion flag",
            Self::NodeRef => "sorted index entry",
            Self::Timestamps => "creation timestamps",
        };
        formatter.write_str(s)
    }
}

/// Error deserializing a tree or one of its parts, with the context in which
/// the error has occurred.
#[derive(Debug)]
pub struct DeserializeError {
    kind: DeserializeErrorKind,
    context: Option<ErrorContext>,
}

impl DeserializeError {
    pub fn kind(&self) -> &DeserializeErrorKind {
        &self.kind
    }

    pub fn context(&self) -> Option<ErrorContext> {
        self.context
    }
}

impl From<DeserializeErrorKind> for DeserializeError {
    fn from(kind: DeserializeErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }
}

impl DeserializeErrorKind {
    pub fn with_context(self, context: ErrorContext) -> DeserializeError {
        DeserializeError {
            kind: self,
            context: Some(context),
        }
    }
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Some(context) => write!(formatter, "failed reading {context}: {}", self.kind),
            None => write!(formatter, "failed deserializing tree: {}", self.kind),
        }
    }
}

impl std::error::Error for DeserializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}
