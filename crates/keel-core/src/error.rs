use std::fmt;

use crate::dag::DagError;
use crate::model::ItemKind;
use crate::storage::StorageError;
use crate::validate::ValidationError;

/// Machine-readable error codes for scripted callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ItemNotFound,
    VersionNotFound,
    SuccessorNotFound,
    ValidationFailed,
    InvalidRequest,
    DuplicateSourceKey,
    UnknownParent,
    StoreWriteFailed,
    LockContention,
    BackendFault,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::VersionNotFound => "E2002",
            Self::SuccessorNotFound => "E2003",
            Self::ValidationFailed => "E3001",
            Self::InvalidRequest => "E3002",
            Self::DuplicateSourceKey => "E4001",
            Self::UnknownParent => "E4002",
            Self::StoreWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::BackendFault => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Catalog not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Item not found",
            Self::VersionNotFound => "Version not found",
            Self::SuccessorNotFound => "Version successor not found",
            Self::ValidationFailed => "Tags do not satisfy their declared types or structure version",
            Self::InvalidRequest => "Invalid request",
            Self::DuplicateSourceKey => "Source key already exists",
            Self::UnknownParent => "Parent version is not in the item's history",
            Self::StoreWriteFailed => "Store file write failed",
            Self::LockContention => "Lock contention",
            Self::BackendFault => "Storage backend fault",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `keel init` to initialize a catalog here."),
            Self::ConfigParseError => Some("Fix syntax in .keel/config.toml and retry."),
            Self::ItemNotFound | Self::VersionNotFound | Self::SuccessorNotFound => None,
            Self::ValidationFailed => {
                Some("Match every tag key and type to the structure version's attributes.")
            }
            Self::InvalidRequest => None,
            Self::DuplicateSourceKey => Some("Source keys are immutable; pick a new key."),
            Self::UnknownParent => {
                Some("List current heads with `keel item leaves` and use those as parents.")
            }
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `keel` process exits."),
            Self::BackendFault => Some("Check that the store is reachable and not corrupt."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The four failure classes every public operation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    NotFound,
    Validation,
    Conflict,
    BackendFault,
}

/// Errors returned by catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{kind} item not found: {key}")]
    ItemNotFound { kind: ItemKind, key: String },

    #[error("{kind} version {id} not found")]
    VersionNotFound { kind: ItemKind, id: i64 },

    /// A referenced version of unspecified kind does not exist.
    #[error("version {0} not found")]
    UnknownVersion(i64),

    #[error("version successor {0} not found")]
    SuccessorNotFound(i64),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{kind} item with source key '{source_key}' already exists")]
    DuplicateSourceKey { kind: ItemKind, source_key: String },

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CatalogError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ItemNotFound { .. } => ErrorCode::ItemNotFound,
            Self::VersionNotFound { .. } | Self::UnknownVersion(_) => ErrorCode::VersionNotFound,
            Self::SuccessorNotFound(_) => ErrorCode::SuccessorNotFound,
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::InvalidRequest(_) | Self::Dag(DagError::InvalidHeight(_)) => {
                ErrorCode::InvalidRequest
            }
            Self::DuplicateSourceKey { .. } => ErrorCode::DuplicateSourceKey,
            Self::Dag(DagError::UnknownParent { .. }) => ErrorCode::UnknownParent,
            Self::Storage(StorageError::Lock(lock)) => lock.code(),
            Self::Storage(StorageError::Io { .. }) => ErrorCode::StoreWriteFailed,
            Self::Storage(StorageError::EmptyResult { .. }) => ErrorCode::InternalUnexpected,
            Self::Storage(_) => ErrorCode::BackendFault,
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::ItemNotFound { .. }
            | Self::VersionNotFound { .. }
            | Self::UnknownVersion(_)
            | Self::SuccessorNotFound(_)
            | Self::Storage(StorageError::EmptyResult { .. }) => ErrorClass::NotFound,
            Self::Validation(_)
            | Self::InvalidRequest(_)
            | Self::Dag(DagError::InvalidHeight(_)) => ErrorClass::Validation,
            Self::DuplicateSourceKey { .. } | Self::Dag(DagError::UnknownParent { .. }) => {
                ErrorClass::Conflict
            }
            Self::Storage(_) => ErrorClass::BackendFault,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::{CatalogError, ErrorClass, ErrorCode};
    use crate::dag::DagError;
    use crate::model::ItemKind;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::ItemNotFound,
            ErrorCode::VersionNotFound,
            ErrorCode::SuccessorNotFound,
            ErrorCode::ValidationFailed,
            ErrorCode::InvalidRequest,
            ErrorCode::DuplicateSourceKey,
            ErrorCode::UnknownParent,
            ErrorCode::StoreWriteFailed,
            ErrorCode::LockContention,
            ErrorCode::BackendFault,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::DuplicateSourceKey.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn errors_fall_into_the_four_classes() {
        let duplicate = CatalogError::DuplicateSourceKey {
            kind: ItemKind::Structure,
            source_key: "k".into(),
        };
        assert_eq!(duplicate.class(), ErrorClass::Conflict);

        let parent = CatalogError::Dag(DagError::UnknownParent {
            item_id: 1,
            parent_id: 99,
        });
        assert_eq!(parent.class(), ErrorClass::Conflict);
        assert_eq!(parent.code(), ErrorCode::UnknownParent);

        let missing = CatalogError::VersionNotFound {
            kind: ItemKind::Node,
            id: 4,
        };
        assert_eq!(missing.class(), ErrorClass::NotFound);
        assert_eq!(missing.to_string(), "node version 4 not found");
    }
}
