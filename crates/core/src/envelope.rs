//! Result envelopes returned by the remote source.

use serde::{Deserialize, Serialize};

use crate::Ticket;

/// Paged ticket fetch result: `{data, totalCount, totalPages, pageIndex, pageSize, filterType, message, success}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    #[serde(rename = "data", default)]
    pub items: Vec<Ticket>,
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub total_pages: i64,
    #[serde(default)]
    pub page_index: i64,
    #[serde(default)]
    pub page_size: i64,
    #[serde(default)]
    pub filter_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub success: bool,
}

impl TicketPage {
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

/// Generic `{status, data, success}` wrapper used by the profile and manifest endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub status: i32,
    pub data: Option<T>,
    #[serde(default)]
    pub success: bool,
}

impl<T> ApiEnvelope<T> {
    /// Payload of a successful envelope; unsuccessful envelopes yield `None`.
    pub fn into_data(self) -> Option<T> {
        if self.success { self.data } else { None }
    }
}

/// Latest deployed manifest for an application code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub application_id: i64,
    #[serde(default)]
    pub app_code: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub version: String,
}

/// Patron profile keyed by player id; persisted as one JSON file per patron.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatronRecord {
    #[serde(rename = "patronID", alias = "playerID", alias = "patronId", default)]
    pub patron_id: i64,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub id_card: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(alias = "sex", default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub patron_image_base64: Option<String>,
    #[serde(default)]
    pub patron_primary_image_base64: Option<String>,
    #[serde(default)]
    pub patron_second_image_base64: Option<String>,
}

impl PatronRecord {
    /// Stand-in record shown when the profile cannot be produced.
    pub fn placeholder(patron_id: i64, text: &str) -> Self {
        Self { patron_id, full_name: Some(text.to_string()), ..Default::default() }
    }

    /// `F` becomes `Female`; anything else (including missing) becomes `Male`.
    pub fn normalize_gender(&mut self) {
        let female = matches!(self.gender.as_deref().map(str::trim), Some("F") | Some("Female"));
        self.gender = Some(if female { "Female" } else { "Male" }.to_string());
    }
}
