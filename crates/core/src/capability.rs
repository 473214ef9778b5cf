use serde::{Deserialize, Serialize};

use crate::patch::{JSON_PATCH_CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE};
use crate::search::SearchParamType;

/// FHIR CapabilityStatement resource (simplified)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    pub resource_type: String,
    pub status: String,
    pub date: String,
    pub kind: String,
    pub fhir_version: String,
    pub format: Vec<String>,
    pub patch_format: Vec<String>,
    pub rest: Vec<CapabilityRest>,
}

impl CapabilityStatement {
    /// Capability statement for a server exposing the given resources
    pub fn new(resources: Vec<CapabilityResource>) -> Self {
        Self {
            resource_type: "CapabilityStatement".to_string(),
            status: "active".to_string(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            kind: "instance".to_string(),
            fhir_version: "4.0.1".to_string(),
            format: vec!["json".to_string()],
            patch_format: vec![
                JSON_PATCH_CONTENT_TYPE.to_string(),
                MERGE_PATCH_CONTENT_TYPE.to_string(),
            ],
            rest: vec![CapabilityRest {
                mode: "server".to_string(),
                resource: resources,
            }],
        }
    }
}

/// REST capability declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRest {
    pub mode: String,
    pub resource: Vec<CapabilityResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub interaction: Vec<Interaction>,
    pub versioning: String,
    pub read_history: bool,
    pub update_create: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_param: Vec<CapabilitySearchParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySearchParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
}

const INTERACTIONS: [&str; 8] = [
    "read",
    "vread",
    "update",
    "patch",
    "delete",
    "history-instance",
    "create",
    "search-type",
];

impl CapabilityResource {
    /// A versioned resource supporting every interaction this server implements
    pub fn versioned<'a>(
        resource_type: &str,
        search_params: impl IntoIterator<Item = (&'a str, SearchParamType)>,
    ) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            interaction: INTERACTIONS
                .iter()
                .map(|code| Interaction {
                    code: code.to_string(),
                })
                .collect(),
            versioning: "versioned-update".to_string(),
            read_history: true,
            update_create: false,
            search_param: search_params
                .into_iter()
                .map(|(name, param_type)| CapabilitySearchParam {
                    name: name.to_string(),
                    param_type: match param_type {
                        SearchParamType::Token => "token",
                        SearchParamType::Reference => "reference",
                        SearchParamType::Date => "date",
                    }
                    .to_string(),
                })
                .collect(),
        }
    }
}
