//! FHIR search parameters to parameterized SQL.
//!
//! The builder only emits column names that come from the caller-supplied
//! [`SearchParamConfig`] map; request text is always bound as a positional
//! argument.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::FhirError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Supported FHIR search parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchParamType {
    Token,
    Reference,
    Date,
}

/// How a logical search parameter maps onto table columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParamConfig {
    pub param_type: SearchParamType,
    pub column: String,
    /// Column holding the coding system, for `system|code` token searches
    pub system_column: Option<String>,
}

impl SearchParamConfig {
    pub fn token(column: &str) -> Self {
        Self {
            param_type: SearchParamType::Token,
            column: column.to_string(),
            system_column: None,
        }
    }

    /// Token over a coded value stored as separate system and code columns
    pub fn coded(column: &str, system_column: &str) -> Self {
        Self {
            param_type: SearchParamType::Token,
            column: column.to_string(),
            system_column: Some(system_column.to_string()),
        }
    }

    pub fn reference(column: &str) -> Self {
        Self {
            param_type: SearchParamType::Reference,
            column: column.to_string(),
            system_column: None,
        }
    }

    pub fn date(column: &str) -> Self {
        Self {
            param_type: SearchParamType::Date,
            column: column.to_string(),
            system_column: None,
        }
    }
}

/// Search parameters in request order. Repeated names are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchRequest {
    params: Vec<(String, String)>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string
    pub fn from_query(query: &str) -> Self {
        Self {
            params: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    /// Append all parameters of `other` after this request's own
    pub fn extend(&mut self, other: SearchRequest) {
        self.params.extend(other.params);
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Re-encode as a query string, without the leading `?`
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A bound SQL argument
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

/// COUNT and SELECT statements sharing one WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub count_sql: String,
    pub count_args: Vec<SqlParam>,
    /// SELECT statement ending in `LIMIT $n OFFSET $n+1`
    pub data_sql: String,
}

impl BuiltQuery {
    /// Arguments for `data_sql`: the filter arguments followed by limit and offset.
    pub fn data_args(&self, limit: i64, offset: i64) -> Vec<SqlParam> {
        let mut args = self.count_args.clone();
        args.push(SqlParam::Integer(limit));
        args.push(SqlParam::Integer(offset));
        args
    }
}

/// Build the COUNT and paginated SELECT statements for a search.
///
/// Request entries without a matching config are skipped, as are empty
/// values. Only malformed date searches are errors.
pub fn build_search(
    table: &str,
    select_columns: &[&str],
    request: &SearchRequest,
    config: &HashMap<String, SearchParamConfig>,
    order_by: &str,
) -> Result<BuiltQuery, FhirError> {
    let mut where_clause = String::from("WHERE 1=1");
    let mut args: Vec<SqlParam> = Vec::new();

    for (name, raw) in request.iter() {
        let Some(param) = config.get(name) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }

        match param.param_type {
            SearchParamType::Token => push_token(&mut where_clause, &mut args, param, raw),
            SearchParamType::Reference => {
                let id = raw.rsplit('/').next().unwrap_or(raw);
                args.push(SqlParam::Text(id.to_string()));
                where_clause.push_str(&format!(" AND {} = ${}", param.column, args.len()));
            }
            SearchParamType::Date => {
                let (op, instant) = parse_date_value(name, raw)?;
                args.push(SqlParam::Timestamp(instant));
                where_clause.push_str(&format!(" AND {} {} ${}", param.column, op, args.len()));
            }
        }
    }

    let count_sql = format!("SELECT COUNT(*) FROM {} {}", table, where_clause);
    let data_sql = format!(
        "SELECT {} FROM {} {} ORDER BY {} LIMIT ${} OFFSET ${}",
        select_columns.join(", "),
        table,
        where_clause,
        order_by,
        args.len() + 1,
        args.len() + 2
    );

    Ok(BuiltQuery {
        count_sql,
        count_args: args,
        data_sql,
    })
}

fn push_token(
    where_clause: &mut String,
    args: &mut Vec<SqlParam>,
    param: &SearchParamConfig,
    raw: &str,
) {
    let split = param
        .system_column
        .as_deref()
        .and_then(|sys| raw.split_once('|').map(|(s, c)| (sys, s, c)));

    match split {
        Some((sys_col, "", code)) => {
            args.push(SqlParam::Text(code.to_string()));
            where_clause.push_str(&format!(
                " AND {} IS NULL AND {} = ${}",
                sys_col,
                param.column,
                args.len()
            ));
        }
        Some((sys_col, system, "")) => {
            args.push(SqlParam::Text(system.to_string()));
            where_clause.push_str(&format!(" AND {} = ${}", sys_col, args.len()));
        }
        Some((sys_col, system, code)) => {
            args.push(SqlParam::Text(system.to_string()));
            args.push(SqlParam::Text(code.to_string()));
            where_clause.push_str(&format!(
                " AND {} = ${} AND {} = ${}",
                sys_col,
                args.len() - 1,
                param.column,
                args.len()
            ));
        }
        None => {
            args.push(SqlParam::Text(raw.to_string()));
            where_clause.push_str(&format!(" AND {} = ${}", param.column, args.len()));
        }
    }
}

/// Split a date search value into its SQL operator and instant.
fn parse_date_value(name: &str, raw: &str) -> Result<(&'static str, DateTime<Utc>), FhirError> {
    let has_prefix = raw.len() >= 2 && raw.as_bytes()[..2].iter().all(u8::is_ascii_lowercase);
    let (op, value) = if has_prefix {
        let op = match &raw[..2] {
            "eq" => "=",
            "ne" => "<>",
            "lt" => "<",
            "le" => "<=",
            "gt" => ">",
            "ge" => ">=",
            other => {
                return Err(FhirError::invalid_search_param(
                    name,
                    format!("unsupported date prefix '{}'", other),
                ));
            }
        };
        (op, &raw[2..])
    } else {
        ("=", raw)
    };

    let instant = parse_fhir_date(value).ok_or_else(|| {
        FhirError::invalid_search_param(name, format!("'{}' is not a valid date", value))
    })?;
    Ok((op, instant))
}

/// Parse `YYYY`, `YYYY-MM`, `YYYY-MM-DD` (UTC midnight) or an RFC 3339 instant.
/// A date-time without an offset is taken as UTC.
pub fn parse_fhir_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    let date = match value.len() {
        4 => NaiveDate::parse_from_str(&format!("{}-01-01", value), "%Y-%m-%d").ok()?,
        7 => NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").ok()?,
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?,
        _ => return None,
    };
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// `_count` / `_offset` paging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub limit: i64,
    pub offset: i64,
}

impl Paging {
    pub fn from_request(request: &SearchRequest) -> Result<Self, FhirError> {
        let limit = match request.get("_count") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| FhirError::invalid_search_param("_count", "must be an integer"))?
                .clamp(1, MAX_PAGE_SIZE),
            None => DEFAULT_PAGE_SIZE,
        };
        let offset = match request.get("_offset") {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| FhirError::invalid_search_param("_offset", "must be an integer"))?
                .max(0),
            None => 0,
        };
        Ok(Self { limit, offset })
    }
}

/// Translate `_sort=a,-b` into an ORDER BY list over configured columns.
///
/// A caller-supplied order always ends with `id` so that paging is stable
/// when sort keys tie.
pub fn sort_clause(
    request: &SearchRequest,
    config: &HashMap<String, SearchParamConfig>,
    default: &str,
) -> String {
    let Some(raw) = request.get("_sort") else {
        return default.to_string();
    };

    let terms: Vec<String> = raw
        .split(',')
        .filter_map(|field| {
            let (name, direction) = match field.trim().strip_prefix('-') {
                Some(name) => (name, "DESC"),
                None => (field.trim(), "ASC"),
            };
            config
                .get(name)
                .map(|param| format!("{} {}", param.column, direction))
        })
        .collect();

    if terms.is_empty() {
        default.to_string()
    } else {
        format!("{}, id", terms.join(", "))
    }
}
