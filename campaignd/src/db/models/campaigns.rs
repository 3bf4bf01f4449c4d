//! Database models for campaigns and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::{CampaignId, TemplateId};

/// Campaign lifecycle.
///
/// ```text
/// draft ──► scheduled ──► sending ──► completed | failed
///   ▲           │            ▲ │
///   └───────────┘            │ ▼
///   (unschedule)            paused
///
/// draft | scheduled | paused ──► cancelled
/// ```
///
/// A draft may also go straight to `sending` when started manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Draft)
                | (Draft | Scheduled, Sending)
                | (Sending, Paused)
                | (Paused, Sending)
                | (Sending, Completed | Failed)
                | (Draft | Scheduled | Paused, Cancelled)
        )
    }

    /// Statuses from which `next` is reachable.
    pub fn sources_of(next: CampaignStatus) -> Vec<CampaignStatus> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(next)).collect()
    }

    /// Name, bindings and recipients can only change before sending starts or after cancellation.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Scheduled | Self::Cancelled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const ALL: [CampaignStatus; 7] = [
        Self::Draft,
        Self::Scheduled,
        Self::Sending,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown campaign status: {}", s))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub template_id: TemplateId,
    /// Placeholder key → binding, see [`crate::precheck::Binding`]
    pub variable_bindings: serde_json::Value,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub total_count: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub read_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn campaign_status(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Draft)
    }
}

#[derive(Debug, Clone)]
pub struct CampaignCreateDBRequest {
    pub name: String,
    pub template_id: TemplateId,
    pub variable_bindings: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct CampaignUpdateDBRequest {
    pub name: Option<String>,
    pub template_id: Option<TemplateId>,
    pub variable_bindings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct CampaignFilter {
    pub skip: i64,
    pub limit: i64,
    pub status: Option<CampaignStatus>,
}
