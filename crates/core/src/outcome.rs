use serde::{Deserialize, Serialize};

use crate::error::FhirError;

/// System URI for the machine-readable error codes placed in issue details
pub const ERROR_CODE_SYSTEM: &str = "urn:ehr:error-code";

/// Severity of the issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// Type of issue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Structure,
    Required,
    Value,
    Invariant,
    Security,
    Unknown,
    Forbidden,
    Processing,
    NotSupported,
    Duplicate,
    NotFound,
    Deleted,
    TooLong,
    CodeInvalid,
    BusinessRule,
    Conflict,
    Transient,
    LockError,
    Exception,
    Timeout,
    Throttled,
    Informational,
}

/// FHIR OperationOutcome resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
}

impl OperationOutcome {
    fn single(severity: IssueSeverity, code: IssueType, diagnostics: &str) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                details: None,
                diagnostics: Some(diagnostics.to_string()),
            }],
        }
    }

    /// Error outcome with the given issue type
    pub fn error(code: IssueType, diagnostics: &str) -> Self {
        Self::single(IssueSeverity::Error, code, diagnostics)
    }

    pub fn invalid(diagnostics: &str) -> Self {
        Self::error(IssueType::Invalid, diagnostics)
    }

    /// Attach a machine-readable error code to the first issue
    pub fn with_error_code(mut self, code: &str) -> Self {
        if let Some(issue) = self.issue.first_mut() {
            issue.details = Some(CodeableConcept {
                coding: vec![Coding {
                    system: ERROR_CODE_SYSTEM.to_string(),
                    code: code.to_string(),
                }],
                text: None,
            });
        }
        self
    }

    /// Machine-readable error code of the first issue, if any
    pub fn error_code(&self) -> Option<&str> {
        self.issue
            .first()
            .and_then(|i| i.details.as_ref())
            .and_then(|d| d.coding.first())
            .map(|c| c.code.as_str())
    }
}

impl From<&FhirError> for OperationOutcome {
    fn from(err: &FhirError) -> Self {
        OperationOutcome::error(err.issue_type(), &err.to_string()).with_error_code(err.code())
    }
}
