use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Which side of a migration was executing when a statement failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Apply,
    Revert,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Apply => f.write_str("apply"),
            Phase::Revert => f.write_str("revert"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration {version} failed during {phase}: {source}")]
    StatementExecution {
        version: i64,
        phase: Phase,
        #[source]
        source: rusqlite::Error,
    },

    #[error("migration {version} was already applied by another runner")]
    DuplicateApplication { version: i64 },

    #[error("migration {version} has no reverse action defined")]
    NoReverseActionDefined { version: i64 },

    #[error("no applied migration to revert")]
    NotApplied,

    #[error("duplicate migration version: {0}")]
    DuplicateVersion(i64),

    #[error("applied migration {0} is not among the known migrations")]
    UnknownVersion(i64),

    #[error("invalid migration {version}: {reason}")]
    InvalidMigration { version: i64, reason: String },

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid table definition: {0}")]
    InvalidDefinition(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The migration version this error is attributed to, if any.
    pub fn version(&self) -> Option<i64> {
        match self {
            Error::StatementExecution { version, .. }
            | Error::DuplicateApplication { version }
            | Error::NoReverseActionDefined { version }
            | Error::InvalidMigration { version, .. } => Some(*version),
            Error::DuplicateVersion(version) | Error::UnknownVersion(version) => Some(*version),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Phase};

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::NoReverseActionDefined { version: 42 };
        assert_eq!(e.to_string(), "migration 42 has no reverse action defined");

        let e = Error::NotApplied;
        assert_eq!(e.to_string(), "no applied migration to revert");
    }

    #[test]
    fn statement_error_names_version_and_phase() {
        let e = Error::StatementExecution {
            version: 20220220104732,
            phase: Phase::Revert,
            source: rusqlite::Error::InvalidQuery,
        };
        let message = e.to_string();
        assert!(message.starts_with("migration 20220220104732 failed during revert"));
        assert_eq!(e.version(), Some(20220220104732));
    }

    #[test]
    fn errors_without_unit_have_no_version() {
        assert_eq!(Error::NotApplied.version(), None);
        assert_eq!(Error::Connection("refused".into()).version(), None);
    }
}
