//! API request and response models for WhatsApp Flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::models::flows::{Flow, FlowStatus, FlowSubmission};
use crate::types::FlowId;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FlowCreate {
    pub name: String,
    /// Flow JSON (`{"version": ..., "screens": [...]}`)
    #[schema(value_type = Object)]
    pub definition: Value,
}

/// Partial update, only while the flow is a draft.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct FlowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub definition: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FlowResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: FlowId,
    pub name: String,
    pub status: FlowStatus,
    #[schema(value_type = Object)]
    pub definition: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Flow> for FlowResponse {
    fn from(flow: Flow) -> Self {
        Self {
            id: flow.id,
            status: flow.flow_status(),
            name: flow.name,
            definition: flow.definition,
            external_id: flow.external_id,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FlowSubmissionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub contact_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_token: Option<String>,
    /// Field values the user submitted
    #[schema(value_type = Object)]
    pub response: Value,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
}

impl From<FlowSubmission> for FlowSubmissionResponse {
    fn from(submission: FlowSubmission) -> Self {
        Self {
            id: submission.id,
            contact_phone: submission.contact_phone,
            flow_token: submission.flow_token,
            response: submission.response,
            message_id: submission.message_id,
            received_at: submission.received_at,
        }
    }
}
