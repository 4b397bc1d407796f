//! Error and warning types shared by every layer of the engine.
//!
//! Errors carry the dotted path of the atom that failed (`hdr.entries[3].name`). Paths are
//! assembled on the unhappy path only: a failing child returns an error with an empty or
//! partial path, and each enclosing container prepends its own segment through
//! [`Error::within`] while the error propagates.

use crate::source::SourceError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: {source}")]
    Source {
        path: String,
        #[source]
        source: SourceError,
    },
    #[error("{path}: consumed {got:#x} of {desired:#x} bytes at offset {offset:#x}")]
    Consume {
        path: String,
        offset: u64,
        desired: u64,
        got: u64,
    },
    #[error("{path}: initialization failed: {message}")]
    Initialization { path: String, message: String },
    #[error("{path}: decode failed: {message}")]
    Decode { path: String, message: String },
    #[error("{path}: dereferenced a null pointer")]
    NullDereference { path: String },
    #[error("{path}: no terminator after {count} elements")]
    UnterminatedArray { path: String, count: usize },
    #[error("Schema: {0}")]
    Schema(String),
    #[error("{path}: not found: {key}")]
    NotFound { path: String, key: String },
    #[error("{path}: {message}")]
    Value { path: String, message: String },
}

impl Error {
    pub fn init(message: impl Into<String>) -> Self {
        Error::Initialization {
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn value(message: impl Into<String>) -> Self {
        Error::Value {
            path: String::new(),
            message: message.into(),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound {
            path: String::new(),
            key: key.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    /// Path of the atom the error refers to, if the variant carries one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::Source { path, .. }
            | Error::Consume { path, .. }
            | Error::Initialization { path, .. }
            | Error::Decode { path, .. }
            | Error::NullDereference { path }
            | Error::UnterminatedArray { path, .. }
            | Error::NotFound { path, .. }
            | Error::Value { path, .. } => Some(path.as_str()),
            Error::Schema(_) => None,
        }
    }

    fn path_mut(&mut self) -> Option<&mut String> {
        match self {
            Error::Source { path, .. }
            | Error::Consume { path, .. }
            | Error::Initialization { path, .. }
            | Error::Decode { path, .. }
            | Error::NullDereference { path }
            | Error::UnterminatedArray { path, .. }
            | Error::NotFound { path, .. }
            | Error::Value { path, .. } => Some(path),
            Error::Schema(_) => None,
        }
    }

    /// Prepend `segment` to the error path. Index segments (`[3]`) attach without a dot.
    pub fn within(mut self, segment: &str) -> Self {
        if segment.is_empty() {
            return self;
        }
        if let Some(path) = self.path_mut() {
            *path = join_path(segment, path);
        }
        self
    }

    pub fn is_consume(&self) -> bool {
        matches!(self, Error::Consume { .. })
    }

    /// Re-tag a user callback failure as an initialization failure, keeping its message.
    pub(crate) fn into_initialization(self) -> Self {
        match self {
            Error::Initialization { .. } | Error::Schema(_) => self,
            other => Error::Initialization {
                path: String::new(),
                message: other.to_string(),
            },
        }
    }
}

pub(crate) fn join_path(head: &str, tail: &str) -> String {
    if tail.is_empty() {
        head.to_string()
    } else if head.is_empty() {
        tail.to_string()
    } else if tail.starts_with('[') {
        format!("{head}{tail}")
    } else {
        format!("{head}.{tail}")
    }
}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Consume {
                offset,
                desired,
                got,
            } => Error::Consume {
                path: String::new(),
                offset,
                desired,
                got,
            },
            other => Error::Source {
                path: String::new(),
                source: other,
            },
        }
    }
}

/// Non-fatal conditions recorded while loading. They are kept on the tree and logged at
/// `warn` level; the load itself succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A scalar's bytes were read but do not decode under its encoding.
    Decode { path: String, message: String },
    /// A terminated array reached the end of a bounded source before its terminator.
    UnterminatedArray { path: String, count: usize },
    /// A constant field read bytes other than the expected ones.
    ConstantMismatch {
        path: String,
        expected: Vec<u8>,
        found: Vec<u8>,
    },
    /// A block array kept bytes that did not fit another element.
    Leftover { path: String, bytes: u64 },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::Decode { path, message } => write!(f, "{path}: decode failed: {message}"),
            Warning::UnterminatedArray { path, count } => {
                write!(f, "{path}: source ended after {count} elements without a terminator")
            }
            Warning::ConstantMismatch {
                path,
                expected,
                found,
            } => write!(f, "{path}: expected {expected:02x?}, found {found:02x?}"),
            Warning::Leftover { path, bytes } => {
                write!(f, "{path}: {bytes} trailing bytes kept as raw data")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_builds_dotted_and_indexed_paths() {
        let e = Error::init("boom").within("name").within("[3]").within("entries");
        assert_eq!(e.path(), Some("entries[3].name"));
    }

    #[test]
    fn schema_errors_have_no_path() {
        let e = Error::schema("duplicate field").within("hdr");
        assert_eq!(e.path(), None);
    }

    #[test]
    fn consume_source_error_maps_to_consume() {
        let e: Error = SourceError::Consume {
            offset: 4,
            desired: 2,
            got: 1,
        }
        .into();
        assert!(e.is_consume());
    }
}
