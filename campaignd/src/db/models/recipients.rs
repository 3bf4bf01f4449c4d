//! Database models for per-recipient dispatch state (`campaign_contacts`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::db::models::contacts::Contact;
use crate::types::{CampaignId, ContactId, RecipientId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    /// Waiting to be claimed, either for the first attempt or a scheduled retry
    Pending,
    /// Claimed by a dispatcher and handed to the sender
    Sending,
    Sent,
    Delivered,
    Read,
    /// Terminal: rejected by WhatsApp or retries exhausted
    Failed,
    /// Terminal: excluded by precheck
    Skipped,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Statuses a delivery callback may move a row out of, to reach `self`.
    ///
    /// Delivery progress is monotonic (`sent` < `delivered` < `read`), and a failure report
    /// only lands on a message that has not yet been delivered. Callbacks that overtake the
    /// dispatcher recording the send are parked and replayed once the row is `sent`.
    pub fn callback_sources(&self) -> &'static [RecipientStatus] {
        use RecipientStatus::*;
        match self {
            Sent => &[Sending],
            Delivered => &[Sending, Sent],
            Read => &[Sending, Sent, Delivered],
            Failed => &[Sending, Sent],
            Pending | Sending | Skipped => &[],
        }
    }

    pub const ALL: [RecipientStatus; 7] = [
        Self::Pending,
        Self::Sending,
        Self::Sent,
        Self::Delivered,
        Self::Read,
        Self::Failed,
        Self::Skipped,
    ];
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown recipient status: {}", s))
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Recipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub status: String,
    pub skip_code: Option<String>,
    /// WhatsApp message id (`wamid.…`) once accepted
    pub message_id: Option<String>,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error_code: Option<i32>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recipient {
    pub fn recipient_status(&self) -> RecipientStatus {
        self.status.parse().unwrap_or(RecipientStatus::Pending)
    }
}

/// A status callback held back until its message id is recorded on a recipient.
#[derive(Debug, Clone, FromRow)]
pub struct ParkedCallback {
    pub message_id: String,
    pub status: String,
    pub campaign_id: Option<CampaignId>,
    pub occurred_at: DateTime<Utc>,
    pub error_code: Option<i32>,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl ParkedCallback {
    pub fn callback_status(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }
}

/// A campaign recipient joined with its contact, as loaded for precheck.
#[derive(Debug, Clone, FromRow)]
pub struct RecipientContact {
    pub recipient_id: RecipientId,
    #[sqlx(flatten)]
    pub contact: Contact,
}

/// A recipient claimed for sending, with everything needed to build the message.
#[derive(Debug, Clone, FromRow)]
pub struct ClaimedRecipient {
    pub recipient_id: RecipientId,
    pub campaign_id: CampaignId,
    pub attempt_count: i32,
    pub template_name: String,
    pub template_language: String,
    pub template_components: serde_json::Value,
    pub variable_bindings: serde_json::Value,
    #[sqlx(flatten)]
    pub contact: Contact,
}

#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    pub skip: i64,
    pub limit: i64,
    pub status: Option<RecipientStatus>,
}

/// Per-status row counts for one campaign.
#[derive(Debug, Clone, Default, FromRow, PartialEq, Eq)]
pub struct RecipientCounts {
    pub total: i64,
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
    pub skipped: i64,
}

#[cfg(test)]
mod tests {
    use super::RecipientStatus::*;

    #[test]
    fn test_callback_sources_are_monotonic() {
        assert!(Delivered.callback_sources().contains(&Sent));
        assert!(!Delivered.callback_sources().contains(&Read));
        assert!(!Sent.callback_sources().contains(&Delivered));
        assert!(Read.callback_sources().contains(&Delivered));
    }

    #[test]
    fn test_failed_only_before_delivery() {
        assert!(Failed.callback_sources().contains(&Sent));
        assert!(!Failed.callback_sources().contains(&Delivered));
        assert!(!Failed.callback_sources().contains(&Read));
    }

    #[test]
    fn test_internal_states_are_not_callback_targets() {
        for status in [Pending, Sending, Skipped] {
            assert!(status.callback_sources().is_empty(), "{status:?}");
        }
    }

    #[test]
    fn test_terminal_rows_are_never_sources() {
        for status in super::RecipientStatus::ALL {
            assert!(!status.callback_sources().contains(&Skipped));
            assert!(!status.callback_sources().contains(&Failed));
            assert!(!status.callback_sources().contains(&Pending));
        }
    }
}
