//! Database models for message templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::TemplateId;

/// Review state of a template at Meta. Only `APPROVED` templates can be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Paused,
    Disabled,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Paused => "PAUSED",
            Self::Disabled => "DISABLED",
        }
    }

    /// Map a status string reported by the Graph API. Meta also reports states such as
    /// `IN_APPEAL` or `PENDING_DELETION`; anything under review maps to `Pending`.
    pub fn from_graph(s: &str) -> Self {
        match s {
            "APPROVED" => Self::Approved,
            "REJECTED" => Self::Rejected,
            "PAUSED" => Self::Paused,
            "DISABLED" | "DELETED" | "PENDING_DELETION" => Self::Disabled,
            _ => Self::Pending,
        }
    }
}

impl std::str::FromStr for TemplateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            "PAUSED" => Ok(Self::Paused),
            "DISABLED" => Ok(Self::Disabled),
            _ => Err(format!("Unknown template status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateCategory {
    Marketing,
    Utility,
    Authentication,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marketing => "MARKETING",
            Self::Utility => "UTILITY",
            Self::Authentication => "AUTHENTICATION",
        }
    }
}

impl std::str::FromStr for TemplateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKETING" => Ok(Self::Marketing),
            "UTILITY" => Ok(Self::Utility),
            "AUTHENTICATION" => Ok(Self::Authentication),
            _ => Err(format!("Unknown template category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub language: String,
    pub category: String,
    pub status: String,
    /// Component array in the Graph API shape (`HEADER`, `BODY`, `FOOTER`, `BUTTONS`)
    pub components: serde_json::Value,
    /// Template id assigned by Meta once submitted or synced
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn template_status(&self) -> TemplateStatus {
        self.status.parse().unwrap_or(TemplateStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct TemplateCreateDBRequest {
    pub name: String,
    pub language: String,
    pub category: TemplateCategory,
    pub status: TemplateStatus,
    pub components: serde_json::Value,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub skip: i64,
    pub limit: i64,
    pub status: Option<TemplateStatus>,
}
