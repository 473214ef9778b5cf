use crate::outcome::IssueType;
use thiserror::Error;

/// Errors raised by the version ledger, search builder and patch engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FhirError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource deleted: {0}")]
    Gone(String),

    #[error("Version conflict on {key}: expected {expected}, current {}", display_version(.current))]
    VersionConflict {
        key: String,
        expected: u32,
        current: Option<u32>,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Malformed patch{}: {message}", display_index(.index))]
    MalformedPatch {
        index: Option<usize>,
        message: String,
    },

    #[error("Patch operation {index}: path not found: {path}")]
    PathNotFound { index: usize, path: String },

    #[error("Patch operation {index}: test failed at {path}")]
    TestFailed { index: usize, path: String },

    #[error("Type mismatch{}: {message}", display_index(.index))]
    TypeMismatch {
        index: Option<usize>,
        message: String,
    },

    #[error("Invalid search parameter '{name}': {message}")]
    InvalidSearchParam { name: String, message: String },

    #[error("Invalid resource: {0}")]
    Invalid(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

fn display_version(version: &Option<u32>) -> String {
    match version {
        Some(v) => v.to_string(),
        None => "none (deleted)".to_string(),
    }
}

fn display_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (operation {})", i),
        None => String::new(),
    }
}

impl FhirError {
    pub fn invalid_search_param(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSearchParam {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn malformed_patch(index: Option<usize>, message: impl Into<String>) -> Self {
        Self::MalformedPatch {
            index,
            message: message.into(),
        }
    }

    pub fn type_mismatch(index: Option<usize>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            index,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, carried in OperationOutcome details.
    pub fn code(&self) -> &'static str {
        match self {
            FhirError::NotFound(_) => "not-found",
            FhirError::Gone(_) => "gone",
            FhirError::VersionConflict { .. } => "version-conflict",
            FhirError::AlreadyExists(_) => "already-exists",
            FhirError::MalformedPatch { .. } => "malformed-patch",
            FhirError::PathNotFound { .. } => "path-not-found",
            FhirError::TestFailed { .. } => "test-failed",
            FhirError::TypeMismatch { .. } => "type-mismatch",
            FhirError::InvalidSearchParam { .. } => "invalid-search-param",
            FhirError::Invalid(_) => "invalid",
            FhirError::Cancelled(_) => "cancelled",
            FhirError::StorageUnavailable(_) => "storage-unavailable",
        }
    }

    /// OperationOutcome issue type for this error
    pub fn issue_type(&self) -> IssueType {
        match self {
            FhirError::NotFound(_) => IssueType::NotFound,
            FhirError::Gone(_) => IssueType::Deleted,
            FhirError::VersionConflict { .. } => IssueType::Conflict,
            FhirError::AlreadyExists(_) => IssueType::Duplicate,
            FhirError::MalformedPatch { .. } => IssueType::Structure,
            FhirError::PathNotFound { .. } => IssueType::Processing,
            FhirError::TestFailed { .. } => IssueType::Processing,
            FhirError::TypeMismatch { .. } => IssueType::Processing,
            FhirError::InvalidSearchParam { .. } => IssueType::Invalid,
            FhirError::Invalid(_) => IssueType::Invalid,
            FhirError::Cancelled(_) => IssueType::Timeout,
            FhirError::StorageUnavailable(_) => IssueType::Exception,
        }
    }

    /// Whether the error comes from applying a patch to a resource
    /// (as opposed to the patch document itself being unreadable).
    pub fn is_patch_semantic(&self) -> bool {
        matches!(
            self,
            FhirError::PathNotFound { .. }
                | FhirError::TestFailed { .. }
                | FhirError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_versions() {
        let err = FhirError::VersionConflict {
            key: "Condition/c1".into(),
            expected: 1,
            current: Some(2),
        };
        assert_eq!(
            err.to_string(),
            "Version conflict on Condition/c1: expected 1, current 2"
        );

        let err = FhirError::VersionConflict {
            key: "Condition/c1".into(),
            expected: 3,
            current: None,
        };
        assert!(err.to_string().ends_with("current none (deleted)"));
    }

    #[test]
    fn patch_errors_name_the_operation() {
        let err = FhirError::TestFailed {
            index: 0,
            path: "/a/b".into(),
        };
        assert_eq!(err.to_string(), "Patch operation 0: test failed at /a/b");
        assert_eq!(err.code(), "test-failed");
        assert!(err.is_patch_semantic());

        let err = FhirError::malformed_patch(Some(2), "missing 'path'");
        assert_eq!(
            err.to_string(),
            "Malformed patch (operation 2): missing 'path'"
        );
        assert!(!err.is_patch_semantic());
    }
}
