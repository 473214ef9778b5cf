//! Registry of the clinical resource types the server exposes.
//!
//! Each type is declared once: its table, and for every search parameter
//! the column it is matched against plus where its value lives in the
//! resource JSON. The registry drives the search projection written by the
//! ledger, the table DDL and the search configuration handed to the query
//! builder.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ehr_core::search::parse_fhir_date;
use ehr_core::{CapabilityResource, SearchParamConfig, SearchParamType};
use serde_json::Value;

/// Where a search parameter's value is read from
#[derive(Debug, Clone)]
enum Extract {
    /// Primitive at a JSON pointer (string, boolean or number)
    Text(&'static str),
    /// `Reference.reference` at a JSON pointer, reduced to the target id
    Reference(&'static str),
    /// A `Coding` object at a JSON pointer, projected to system and code
    Coding(&'static str),
    /// date / dateTime / instant at a JSON pointer
    Date(&'static str),
}

#[derive(Debug, Clone)]
pub struct SearchParamDefinition {
    pub name: &'static str,
    pub config: SearchParamConfig,
    extract: Extract,
}

/// A projected column value. `None` is written as SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(Option<String>),
    Timestamp(Option<DateTime<Utc>>),
}

#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    pub resource_type: &'static str,
    pub table: &'static str,
    pub search_params: Vec<SearchParamDefinition>,
}

impl ResourceDefinition {
    fn new(resource_type: &'static str, table: &'static str) -> Self {
        Self {
            resource_type,
            table,
            search_params: Vec::new(),
        }
    }

    fn param(mut self, name: &'static str, config: SearchParamConfig, extract: Extract) -> Self {
        self.search_params.push(SearchParamDefinition {
            name,
            config,
            extract,
        });
        self
    }

    fn token(self, name: &'static str, column: &str, pointer: &'static str) -> Self {
        self.param(
            name,
            SearchParamConfig::token(column),
            Extract::Text(pointer),
        )
    }

    fn coded(self, name: &'static str, column: &str, pointer: &'static str) -> Self {
        let system_column = format!("{}_system", column);
        self.param(
            name,
            SearchParamConfig::coded(column, &system_column),
            Extract::Coding(pointer),
        )
    }

    fn reference(self, name: &'static str, column: &str, pointer: &'static str) -> Self {
        self.param(
            name,
            SearchParamConfig::reference(column),
            Extract::Reference(pointer),
        )
    }

    fn date(self, name: &'static str, column: &str, pointer: &'static str) -> Self {
        self.param(
            name,
            SearchParamConfig::date(column),
            Extract::Date(pointer),
        )
    }

    /// Search configuration, including `_id` and `_lastUpdated`
    pub fn search_config(&self) -> HashMap<String, SearchParamConfig> {
        let mut config: HashMap<String, SearchParamConfig> = self
            .search_params
            .iter()
            .map(|p| (p.name.to_string(), p.config.clone()))
            .collect();
        config.insert("_id".to_string(), SearchParamConfig::token("id"));
        config.insert(
            "_lastUpdated".to_string(),
            SearchParamConfig::date("last_updated"),
        );
        config
    }

    /// Search columns in declaration order, with their SQL types
    fn columns(&self) -> Vec<(&str, &'static str)> {
        let mut columns = Vec::new();
        for p in &self.search_params {
            match p.extract {
                Extract::Date(_) => columns.push((p.config.column.as_str(), "TIMESTAMPTZ")),
                _ => columns.push((p.config.column.as_str(), "TEXT")),
            }
            if let Some(system) = &p.config.system_column {
                columns.push((system.as_str(), "TEXT"));
            }
        }
        columns
    }

    /// DDL for the search projection table
    pub fn create_table_sql(&self) -> String {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id TEXT PRIMARY KEY,\n    version_id INTEGER NOT NULL,\n    last_updated TIMESTAMPTZ NOT NULL,\n    resource JSONB NOT NULL",
            self.table
        );
        for (column, sql_type) in self.columns() {
            sql.push_str(&format!(",\n    {} {}", column, sql_type));
        }
        sql.push_str("\n);\n");

        for p in &self.search_params {
            if p.config.param_type == SearchParamType::Reference {
                sql.push_str(&format!(
                    "CREATE INDEX IF NOT EXISTS {table}_{column}_idx ON {table} ({column});\n",
                    table = self.table,
                    column = p.config.column
                ));
            }
        }
        sql
    }

    /// Insert-or-replace statement for the projection row.
    ///
    /// Parameters: `$1` id, `$2` version_id, `$3` last_updated, `$4` resource,
    /// then the search columns in the order of [`Self::project`].
    pub fn upsert_sql(&self) -> String {
        let columns: Vec<&str> = self.columns().into_iter().map(|(c, _)| c).collect();
        let mut all = vec!["id", "version_id", "last_updated", "resource"];
        all.extend(columns.iter().copied());

        let placeholders: Vec<String> = (1..=all.len()).map(|i| format!("${}", i)).collect();
        let updates: Vec<String> = all[1..]
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) DO UPDATE SET {}",
            self.table,
            all.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    }

    /// Extract the search column values from a resource
    pub fn project(&self, resource: &Value) -> Vec<ColumnValue> {
        let mut values = Vec::new();
        for p in &self.search_params {
            match p.extract {
                Extract::Text(pointer) => {
                    values.push(ColumnValue::Text(resource.pointer(pointer).and_then(text)))
                }
                Extract::Reference(pointer) => values.push(ColumnValue::Text(
                    resource
                        .pointer(pointer)
                        .and_then(Value::as_str)
                        .and_then(|r| r.rsplit('/').next())
                        .map(String::from),
                )),
                Extract::Coding(pointer) => {
                    let coding = resource.pointer(pointer);
                    let field = |name: &str| coding.and_then(|c| c.get(name)).and_then(text);
                    values.push(ColumnValue::Text(field("code")));
                    values.push(ColumnValue::Text(field("system")));
                }
                Extract::Date(pointer) => values.push(ColumnValue::Timestamp(
                    resource
                        .pointer(pointer)
                        .and_then(Value::as_str)
                        .and_then(parse_fhir_date),
                )),
            }
        }
        values
    }

    pub fn capability(&self) -> CapabilityResource {
        CapabilityResource::versioned(
            self.resource_type,
            self.search_params
                .iter()
                .map(|p| (p.name, p.config.param_type))
                .chain([
                    ("_id", SearchParamType::Token),
                    ("_lastUpdated", SearchParamType::Date),
                ]),
        )
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// All resource types served, keyed by FHIR type name
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    definitions: HashMap<&'static str, ResourceDefinition>,
}

impl ResourceRegistry {
    pub fn new(definitions: impl IntoIterator<Item = ResourceDefinition>) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.resource_type, d))
                .collect(),
        }
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceDefinition> {
        self.definitions.get(resource_type)
    }

    /// Definitions sorted by resource type
    pub fn definitions(&self) -> Vec<&ResourceDefinition> {
        let mut defs: Vec<_> = self.definitions.values().collect();
        defs.sort_by_key(|d| d.resource_type);
        defs
    }

    /// The twelve clinical resource types
    pub fn clinical() -> Self {
        Self::new([
            ResourceDefinition::new("Condition", "conditions")
                .reference("patient", "patient_id", "/subject/reference")
                .coded(
                    "clinical-status",
                    "clinical_status",
                    "/clinicalStatus/coding/0",
                )
                .coded("code", "code", "/code/coding/0")
                .date("onset-date", "onset_at", "/onsetDateTime")
                .date("recorded-date", "recorded_at", "/recordedDate"),
            ResourceDefinition::new("Observation", "observations")
                .reference("patient", "patient_id", "/subject/reference")
                .token("status", "status", "/status")
                .coded("code", "code", "/code/coding/0")
                .coded("category", "category", "/category/0/coding/0")
                .date("date", "effective_at", "/effectiveDateTime"),
            ResourceDefinition::new("AllergyIntolerance", "allergy_intolerances")
                .reference("patient", "patient_id", "/patient/reference")
                .coded(
                    "clinical-status",
                    "clinical_status",
                    "/clinicalStatus/coding/0",
                )
                .coded("code", "code", "/code/coding/0")
                .token("criticality", "criticality", "/criticality")
                .date("date", "recorded_at", "/recordedDate"),
            ResourceDefinition::new("Procedure", "procedures")
                .reference("patient", "patient_id", "/subject/reference")
                .token("status", "status", "/status")
                .coded("code", "code", "/code/coding/0")
                .date("date", "performed_at", "/performedDateTime"),
            ResourceDefinition::new("Flag", "flags")
                .reference("patient", "patient_id", "/subject/reference")
                .token("status", "status", "/status")
                .date("date", "period_start", "/period/start"),
            ResourceDefinition::new("DetectedIssue", "detected_issues")
                .reference("patient", "patient_id", "/patient/reference")
                .token("status", "status", "/status")
                .coded("code", "code", "/code/coding/0")
                .date("identified", "identified_at", "/identifiedDateTime"),
            ResourceDefinition::new("AdverseEvent", "adverse_events")
                .reference("subject", "subject_id", "/subject/reference")
                .token("actuality", "actuality", "/actuality")
                .coded("event", "event_code", "/event/coding/0")
                .date("date", "occurred_at", "/date"),
            ResourceDefinition::new("ClinicalImpression", "clinical_impressions")
                .reference("patient", "patient_id", "/subject/reference")
                .token("status", "status", "/status")
                .date("date", "assessed_at", "/date"),
            ResourceDefinition::new("RiskAssessment", "risk_assessments")
                .reference("patient", "patient_id", "/subject/reference")
                .token("status", "status", "/status")
                .coded("method", "method", "/method/coding/0")
                .date("date", "occurrence_at", "/occurrenceDateTime"),
            ResourceDefinition::new("NutritionOrder", "nutrition_orders")
                .reference("patient", "patient_id", "/patient/reference")
                .token("status", "status", "/status")
                .date("datetime", "ordered_at", "/dateTime"),
            ResourceDefinition::new("Device", "devices")
                .reference("patient", "patient_id", "/patient/reference")
                .token("status", "status", "/status")
                .coded("type", "type_code", "/type/coding/0"),
            ResourceDefinition::new("RelatedPerson", "related_persons")
                .reference("patient", "patient_id", "/patient/reference")
                .token("active", "active", "/active")
                .coded("relationship", "relationship", "/relationship/0/coding/0"),
        ])
    }
}
