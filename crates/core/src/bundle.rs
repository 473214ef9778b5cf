use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::version::{VersionAction, VersionRecord};

/// FHIR Bundle types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Searchset,
    History,
}

/// FHIR Bundle resource (simplified for search and history responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub resource_type: String,

    #[serde(rename = "type")]
    pub bundle_type: BundleType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

impl BundleLink {
    pub fn new(relation: &str, url: impl Into<String>) -> Self {
        Self {
            relation: relation.to_string(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleEntrySearch>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

impl BundleEntry {
    pub fn new(full_url: Option<String>, resource: Value) -> Self {
        Self {
            full_url,
            resource: Some(resource),
            search: None,
            request: None,
            response: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntrySearch {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryResponse {
    pub status: String,
    pub etag: String,
    pub last_modified: String,
}

/// Paging context of one searchset page
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Search endpoint without query string, e.g. `http://host/fhir/Condition`
    pub base_url: String,
    /// Query string of the current request, without the leading `?`
    pub query_string: String,
    pub limit: i64,
    pub offset: i64,
    /// Total matches, from the COUNT query
    pub total: u64,
}

impl SearchPage {
    fn url_with_offset(&self, offset: i64) -> String {
        let mut pairs: Vec<(String, String)> =
            url::form_urlencoded::parse(self.query_string.as_bytes())
                .filter(|(k, _)| k != "_offset")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
        if !pairs.iter().any(|(k, _)| k == "_count") {
            pairs.push(("_count".to_string(), self.limit.to_string()));
        }
        pairs.push(("_offset".to_string(), offset.to_string()));

        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("{}?{}", self.base_url, query)
    }

    fn self_url(&self) -> String {
        if self.query_string.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}?{}", self.base_url, self.query_string)
        }
    }
}

impl Bundle {
    fn empty(bundle_type: BundleType) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: Vec::new(),
        }
    }

    /// Searchset bundle with `self`, `next` and `previous` links.
    ///
    /// `next` is present only while `offset + limit < total`.
    pub fn searchset_with_links(entries: Vec<BundleEntry>, page: &SearchPage) -> Self {
        let mut link = vec![BundleLink::new("self", page.self_url())];

        let next_offset = page.offset.saturating_add(page.limit);
        if u64::try_from(next_offset).is_ok_and(|next| next < page.total) {
            link.push(BundleLink::new("next", page.url_with_offset(next_offset)));
        }
        if page.offset > 0 {
            let previous = page.offset.saturating_sub(page.limit).max(0);
            link.push(BundleLink::new("previous", page.url_with_offset(previous)));
        }

        let entry = entries
            .into_iter()
            .map(|mut e| {
                e.search = Some(BundleEntrySearch {
                    mode: "match".to_string(),
                });
                e
            })
            .collect();

        Self {
            total: Some(page.total),
            link,
            entry,
            ..Self::empty(BundleType::Searchset)
        }
    }

    /// History bundle for one resource, records ordered newest first.
    ///
    /// `base_url` is the FHIR base, e.g. `http://host/fhir`.
    pub fn history(records: &[VersionRecord], total: u64, base_url: &str) -> Self {
        let mut bundle = Self::empty(BundleType::History);
        bundle.total = Some(total);

        if let Some(first) = records.first() {
            bundle.link.push(BundleLink::new(
                "self",
                format!("{}/{}/_history", base_url, first.key),
            ));
        }

        bundle.entry = records
            .iter()
            .map(|record| {
                let key = &record.key;
                let (url, status) = match record.action {
                    VersionAction::Create => (key.resource_type.clone(), "201 Created"),
                    VersionAction::Update => (key.to_string(), "200 OK"),
                    VersionAction::Delete => (key.to_string(), "204 No Content"),
                };
                BundleEntry {
                    full_url: Some(format!("{}/{}", base_url, key)),
                    resource: record.resource(),
                    search: None,
                    request: Some(BundleEntryRequest {
                        method: record.action.http_method().to_string(),
                        url,
                    }),
                    response: Some(BundleEntryResponse {
                        status: status.to_string(),
                        etag: record.etag(),
                        last_modified: record.last_updated(),
                    }),
                }
            })
            .collect();

        bundle
    }
}
