//! API request and response models for message templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::db::models::templates::{Template, TemplateCategory, TemplateStatus};
use crate::types::TemplateId;

/// Register a template locally. It starts as `DRAFT` until submitted to Meta, unless it already
/// exists there and `external_id` is given.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TemplateCreate {
    /// Lowercase letters, digits and underscores, as Meta requires
    pub name: String,
    /// Language code, e.g. `en_US`
    pub language: String,
    pub category: TemplateCategory,
    /// Component array in the Graph API shape
    #[schema(value_type = Vec<Object>)]
    pub components: Value,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Only honoured together with `external_id` (default `PENDING`); otherwise the template is a `DRAFT`
    #[serde(default)]
    pub status: Option<TemplateStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TemplateId,
    pub name: String,
    pub language: String,
    pub category: String,
    pub status: TemplateStatus,
    #[schema(value_type = Vec<Object>)]
    pub components: Value,
    /// Placeholder keys found in the components, e.g. `body.1`
    pub placeholders: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Template> for TemplateResponse {
    fn from(template: Template) -> Self {
        Self {
            id: template.id,
            status: template.template_status(),
            placeholders: crate::precheck::variables::placeholder_keys(&template.components),
            name: template.name,
            language: template.language,
            category: template.category,
            components: template.components,
            external_id: template.external_id,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTemplatesQuery {
    pub status: Option<TemplateStatus>,
}

/// Outcome of pulling templates from Meta.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TemplateSyncResponse {
    /// Templates inserted or refreshed
    pub synced: usize,
    /// Remote templates with a category this service does not handle
    pub skipped: usize,
}

pub(crate) fn is_valid_template_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 512
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
