//! Database models for contacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::types::ContactId;

/// Marketing consent recorded for a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OptInStatus {
    OptedIn,
    OptedOut,
    Unknown,
}

impl OptInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedIn => "opted_in",
            Self::OptedOut => "opted_out",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for OptInStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opted_in" => Ok(Self::OptedIn),
            "opted_out" => Ok(Self::OptedOut),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Unknown opt-in status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Contact {
    pub id: ContactId,
    /// Phone number as entered; normalized to E.164 only when a campaign is prechecked
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub opt_in_status: String,
    pub tags: Vec<String>,
    pub custom_fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn opt_in(&self) -> OptInStatus {
        self.opt_in_status.parse().unwrap_or(OptInStatus::Unknown)
    }
}

#[derive(Debug, Clone)]
pub struct ContactCreateDBRequest {
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub opt_in_status: OptInStatus,
    pub tags: Vec<String>,
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

/// Partial update. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct ContactUpdateDBRequest {
    pub phone: Option<String>,
    pub name: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    /// Keys merged into `custom_fields`
    pub custom_fields_set: serde_json::Map<String, serde_json::Value>,
    /// Keys removed from `custom_fields`
    pub custom_fields_remove: Vec<String>,
}

impl ContactUpdateDBRequest {
    /// Split a JSON merge patch for `custom_fields` into keys to set and keys to remove.
    pub fn with_custom_fields_patch(mut self, patch: serde_json::Map<String, serde_json::Value>) -> Self {
        for (key, value) in patch {
            if value.is_null() {
                self.custom_fields_remove.push(key);
            } else {
                self.custom_fields_set.insert(key, value);
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContactFilter {
    pub skip: i64,
    pub limit: i64,
    pub tag: Option<String>,
    pub opt_in_status: Option<OptInStatus>,
    /// Case-insensitive match on name or phone
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_custom_fields_patch_split() {
        let patch = json!({"city": "Lagos", "tier": null, "visits": 3});
        let request = ContactUpdateDBRequest::default().with_custom_fields_patch(patch.as_object().unwrap().clone());

        assert_eq!(request.custom_fields_remove, vec!["tier".to_string()]);
        assert_eq!(request.custom_fields_set.len(), 2);
        assert_eq!(request.custom_fields_set["city"], json!("Lagos"));
    }

    #[test]
    fn test_opt_in_round_trip() {
        for status in [OptInStatus::OptedIn, OptInStatus::OptedOut, OptInStatus::Unknown] {
            assert_eq!(status.as_str().parse::<OptInStatus>().unwrap(), status);
        }
        assert!("subscribed".parse::<OptInStatus>().is_err());
    }
}
