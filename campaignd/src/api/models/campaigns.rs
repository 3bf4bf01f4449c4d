//! API request and response models for campaigns and their recipients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::campaigns::{Campaign, CampaignStatus};
use crate::db::models::recipients::{Recipient, RecipientStatus};
use crate::precheck::{self, Binding, Bindings};
use crate::types::{CampaignId, ContactId, RecipientId, TemplateId};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CampaignCreate {
    pub name: String,
    #[schema(value_type = String, format = "uuid")]
    pub template_id: TemplateId,
    /// Placeholder key (`body.1`, `header.1`, `button.0.1`, `body.first_name`) → binding
    #[serde(default)]
    #[schema(value_type = HashMap<String, Binding>)]
    pub variable_bindings: Bindings,
}

/// Partial update, allowed while the campaign is `draft`, `scheduled` or `cancelled`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CampaignUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub template_id: Option<TemplateId>,
    /// Replaces all bindings
    #[serde(default)]
    #[schema(value_type = Option<HashMap<String, Binding>>)]
    pub variable_bindings: Option<Bindings>,
}

/// Delivery progress, refreshed from recipient rows on every status change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct CampaignCounters {
    pub total: i32,
    pub sent: i32,
    pub delivered: i32,
    pub read: i32,
    pub failed: i32,
    pub skipped: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CampaignResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CampaignId,
    pub name: String,
    #[schema(value_type = String, format = "uuid")]
    pub template_id: TemplateId,
    #[schema(value_type = HashMap<String, Binding>)]
    pub variable_bindings: Bindings,
    pub status: CampaignStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the dispatcher paused the campaign, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_reason: Option<String>,
    pub counters: CampaignCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        // Bindings are validated on write; a row that no longer parses shows as unbound
        let variable_bindings = precheck::parse_bindings(&campaign.variable_bindings).unwrap_or_default();

        Self {
            id: campaign.id,
            status: campaign.campaign_status(),
            name: campaign.name,
            template_id: campaign.template_id,
            variable_bindings,
            scheduled_at: campaign.scheduled_at,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
            pause_reason: campaign.pause_reason,
            counters: CampaignCounters {
                total: campaign.total_count,
                sent: campaign.sent_count,
                delivered: campaign.delivered_count,
                read: campaign.read_count,
                failed: campaign.failed_count,
                skipped: campaign.skipped_count,
            },
            created_at: campaign.created_at,
            updated_at: campaign.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCampaignsQuery {
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    /// When the dispatcher should start sending; must be in the future
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PauseRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Add recipients either by explicit contact ids or by tag (exactly one of the two).
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AddRecipients {
    ContactIds(Vec<uuid::Uuid>),
    Tag(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddRecipientsResponse {
    /// Rows inserted; contacts already in the campaign are not counted
    pub added: u64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecipientResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: RecipientId,
    #[schema(value_type = String, format = "uuid")]
    pub contact_id: ContactId,
    pub status: RecipientStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<Recipient> for RecipientResponse {
    fn from(recipient: Recipient) -> Self {
        Self {
            id: recipient.id,
            status: recipient.recipient_status(),
            contact_id: recipient.contact_id,
            skip_code: recipient.skip_code,
            message_id: recipient.message_id,
            attempt_count: recipient.attempt_count,
            last_error_code: recipient.last_error_code,
            last_error: recipient.last_error,
            sent_at: recipient.sent_at,
            delivered_at: recipient.delivered_at,
            read_at: recipient.read_at,
            failed_at: recipient.failed_at,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListRecipientsQuery {
    pub status: Option<RecipientStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precheck::BindingSource;
    use serde_json::json;

    #[test]
    fn test_add_recipients_shapes() {
        let id = uuid::Uuid::new_v4();
        let by_ids: AddRecipients = serde_json::from_value(json!({"contact_ids": [id]})).unwrap();
        assert!(matches!(by_ids, AddRecipients::ContactIds(ids) if ids == vec![id]));

        let by_tag: AddRecipients = serde_json::from_value(json!({"tag": "vip"})).unwrap();
        assert!(matches!(by_tag, AddRecipients::Tag(tag) if tag == "vip"));

        assert!(serde_json::from_value::<AddRecipients>(json!({})).is_err());
    }

    #[test]
    fn test_create_parses_bindings() {
        let create: CampaignCreate = serde_json::from_value(json!({
            "name": "Spring sale",
            "template_id": uuid::Uuid::new_v4(),
            "variable_bindings": {
                "body.1": {"source": "contact_field", "value": "name", "fallback": "there"},
                "body.2": {"source": "fixed", "value": "20%"}
            }
        }))
        .unwrap();

        assert_eq!(create.variable_bindings.len(), 2);
        assert_eq!(create.variable_bindings["body.1"].source, BindingSource::ContactField);
        assert_eq!(create.variable_bindings["body.1"].fallback.as_deref(), Some("there"));
    }
}
