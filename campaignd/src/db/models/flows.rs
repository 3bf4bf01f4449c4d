//! Database models for WhatsApp Flows and collected submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::FlowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Draft,
    Published,
    Deprecated,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Deprecated => "deprecated",
        }
    }
}

impl std::str::FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "deprecated" => Ok(Self::Deprecated),
            _ => Err(format!("Unknown flow status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub status: String,
    pub definition: serde_json::Value,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn flow_status(&self) -> FlowStatus {
        self.status.parse().unwrap_or(FlowStatus::Draft)
    }
}

#[derive(Debug, Clone)]
pub struct FlowCreateDBRequest {
    pub name: String,
    pub definition: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct FlowUpdateDBRequest {
    pub name: Option<String>,
    pub definition: Option<serde_json::Value>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FlowSubmission {
    pub id: uuid::Uuid,
    /// `None` when the flow token did not reference a known flow, or the flow was deleted
    pub flow_id: Option<FlowId>,
    pub contact_phone: String,
    pub flow_token: Option<String>,
    pub response: serde_json::Value,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlowSubmissionCreateDBRequest {
    pub flow_id: Option<FlowId>,
    pub contact_phone: String,
    pub flow_token: Option<String>,
    pub response: serde_json::Value,
    pub message_id: String,
}
