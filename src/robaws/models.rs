/*!
 * Robaws v2 wire types.
 *
 * Robaws answers in camelCase and is inconsistent about which phone
 * fields are filled, so most fields are optional.
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One page of a list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub total_items: Option<u64>,
}

impl<T> Page<T> {
    /// Whether another page may follow
    pub fn has_more(&self, requested_size: u32) -> bool {
        match self.total_items {
            Some(total) => u64::from(self.page + 1) * u64::from(requested_size) < total,
            None => self.items.len() as u32 >= requested_size && !self.items.is_empty(),
        }
    }
}

/// Customer record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobawsClient {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone")]
    pub tel: Option<String>,
    #[serde(default, alias = "mobile")]
    pub gsm: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub contacts: Vec<RobawsContact>,
}

impl RobawsClient {
    /// Every phone number on the client and its contacts
    pub fn phones(&self) -> impl Iterator<Item = &str> {
        self.tel
            .iter()
            .chain(self.gsm.iter())
            .chain(self.contacts.iter().flat_map(|c| c.tel.iter().chain(c.gsm.iter())))
            .map(String::as_str)
    }

    /// Every email address on the client and its contacts
    pub fn emails(&self) -> impl Iterator<Item = &str> {
        self.email
            .iter()
            .chain(self.contacts.iter().flat_map(|c| c.email.iter()))
            .map(String::as_str)
    }
}

/// Contact person of a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobawsContact {
    pub id: i64,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default, alias = "surname")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone")]
    pub tel: Option<String>,
    #[serde(default, alias = "mobile")]
    pub gsm: Option<String>,
}

/// Client to create
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClient {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tel: Option<String>,
}

/// Contact to create under a client
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tel: Option<String>,
}

impl NewContact {
    /// Split a full name on the first space
    pub fn from_full_name(name: Option<&str>, email: Option<String>, tel: Option<String>) -> Self {
        let (first_name, last_name) = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(full) => match full.split_once(' ') {
                Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
                None => (Some(full.to_string()), None),
            },
            None => (None, None),
        };
        Self {
            first_name,
            last_name,
            email,
            tel,
        }
    }
}

/// Value of an extra field on an offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraFieldValue {
    pub string_value: String,
}

/// Offer create/update body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub client_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<i64>,
    pub title: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `YYYY-MM-DD`
    pub validity_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_reference: Option<String>,
    pub extra_fields: BTreeMap<String, ExtraFieldValue>,
}

/// Offer as returned by the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobawsOffer {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    /// Human-facing offer number
    #[serde(default)]
    pub logic_id: Option<String>,
}

/// Uploaded document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobawsDocument {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}
