//! ehr-core: resource-agnostic core of the EHR FHIR server
//!
//! Version history with optimistic concurrency, FHIR search to SQL,
//! JSON Patch / Merge Patch, and the Bundle, OperationOutcome and
//! CapabilityStatement shapes the server responds with.

pub mod bundle;
pub mod capability;
pub mod error;
pub mod ledger;
pub mod outcome;
pub mod patch;
pub mod pointer;
pub mod search;
pub mod version;

pub use bundle::{Bundle, BundleEntry, BundleLink, BundleType, SearchPage};
pub use capability::{CapabilityResource, CapabilityStatement};
pub use error::FhirError;
pub use ledger::InMemoryVersionStore;
pub use outcome::{IssueSeverity, IssueType, OperationOutcome, OperationOutcomeIssue};
pub use patch::{PatchDialect, PatchOperation, apply_json_patch, apply_merge_patch, apply_patch};
pub use search::{
    BuiltQuery, Paging, SearchParamConfig, SearchParamType, SearchRequest, SqlParam, build_search,
};
pub use version::{ResourceKey, VersionAction, VersionId, VersionRecord, VersionStore};
