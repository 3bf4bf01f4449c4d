//! API request and response models for contacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::contacts::{Contact, ContactCreateDBRequest, ContactUpdateDBRequest, OptInStatus};
use crate::types::ContactId;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ContactCreate {
    /// Phone number, ideally in E.164 (`+14155550100`); national numbers are accepted and
    /// normalized with the configured default country code at precheck time
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Defaults to `unknown`
    #[serde(default)]
    pub opt_in_status: Option<OptInStatus>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Arbitrary values usable as template variables
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom_fields: Map<String, Value>,
}

impl From<ContactCreate> for ContactCreateDBRequest {
    fn from(create: ContactCreate) -> Self {
        Self {
            phone: create.phone.trim().to_string(),
            name: create.name,
            email: create.email,
            opt_in_status: create.opt_in_status.unwrap_or(OptInStatus::Unknown),
            tags: create.tags,
            custom_fields: create.custom_fields,
        }
    }
}

/// Partial update. Omitted fields are left unchanged; `null` clears `name` or `email`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ContactUpdate {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<String>)]
    pub name: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    #[schema(value_type = Option<String>)]
    pub email: Option<Option<String>>,
    /// Replaces the tag list
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Merged into the stored fields; a `null` value removes that key
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub custom_fields: Option<Map<String, Value>>,
}

impl From<ContactUpdate> for ContactUpdateDBRequest {
    fn from(update: ContactUpdate) -> Self {
        let request = ContactUpdateDBRequest {
            phone: update.phone.map(|p| p.trim().to_string()),
            name: update.name,
            email: update.email,
            tags: update.tags,
            ..Default::default()
        };
        match update.custom_fields {
            Some(patch) => request.with_custom_fields_patch(patch),
            None => request,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContactResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ContactId,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub opt_in_status: OptInStatus,
    pub tags: Vec<String>,
    #[schema(value_type = Object)]
    pub custom_fields: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Contact> for ContactResponse {
    fn from(contact: Contact) -> Self {
        Self {
            id: contact.id,
            opt_in_status: contact.opt_in(),
            phone: contact.phone,
            name: contact.name,
            email: contact.email,
            tags: contact.tags,
            custom_fields: contact.custom_fields,
            created_at: contact.created_at,
            updated_at: contact.updated_at,
        }
    }
}

/// Query parameters for listing contacts.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListContactsQuery {
    /// Only contacts carrying this tag
    pub tag: Option<String>,
    pub opt_in_status: Option<OptInStatus>,
    /// Case-insensitive match on name or phone
    pub search: Option<String>,
}
