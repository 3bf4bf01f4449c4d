//! Inbound webhook payloads for the `whatsapp_business_account` object.
//!
//! Only the parts the service acts on are modelled: message status updates and interactive
//! `nfm_reply` messages (completed Flows). Everything else deserializes into defaults and is
//! ignored. Lists are read element by element: an entry, status or message that does not match
//! its shape is dropped and the rest of the batch still applies.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use serde_with::{VecSkipError, serde_as};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::db::models::recipients::RecipientStatus;
use crate::types::CampaignId;

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub entry: Vec<Entry>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub statuses: Vec<StatusUpdate>,
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub messages: Vec<InboundMessage>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdate {
    /// The `wamid` returned when the message was sent
    pub id: String,
    #[serde(default)]
    pub status: String,
    /// Unix seconds, as a string
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub biz_opaque_callback_data: Option<String>,
    #[serde(default)]
    #[serde_as(as = "VecSkipError<_>")]
    pub errors: Vec<StatusError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub interactive: Option<Interactive>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interactive {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub nfm_reply: Option<NfmReply>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NfmReply {
    /// The flow's final payload, JSON-encoded as a string
    #[serde(default)]
    pub response_json: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A delivery status callback, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub message_id: String,
    pub status: RecipientStatus,
    pub at: DateTime<Utc>,
    /// From `biz_opaque_callback_data`, when it holds a campaign id
    pub campaign_id: Option<CampaignId>,
    pub error_code: Option<i32>,
    pub error: Option<String>,
}

/// A completed WhatsApp Flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowReply {
    pub message_id: String,
    pub from: String,
    pub flow_token: Option<String>,
    pub response: Value,
}

impl StatusUpdate {
    /// `None` for statuses that do not affect delivery tracking (e.g. `deleted`, `warning`).
    pub fn to_event(&self) -> Option<StatusEvent> {
        let status = match self.status.as_str() {
            "sent" => RecipientStatus::Sent,
            "delivered" => RecipientStatus::Delivered,
            "read" => RecipientStatus::Read,
            "failed" => RecipientStatus::Failed,
            _ => return None,
        };

        let at = self
            .timestamp
            .as_deref()
            .and_then(|t| t.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        let first_error = self.errors.first();
        let error = first_error.map(|e| {
            let detail = e
                .error_data
                .as_ref()
                .and_then(|d| d.get("details"))
                .and_then(Value::as_str)
                .or(e.message.as_deref())
                .or(e.title.as_deref())
                .unwrap_or("unknown error");
            match e.code {
                Some(code) => format!("({code}) {detail}"),
                None => detail.to_string(),
            }
        });

        Some(StatusEvent {
            message_id: self.id.clone(),
            status,
            at,
            campaign_id: self
                .biz_opaque_callback_data
                .as_deref()
                .and_then(|d| Uuid::parse_str(d.trim()).ok()),
            error_code: first_error.and_then(|e| e.code).and_then(|c| i32::try_from(c).ok()),
            error,
        })
    }
}

impl InboundMessage {
    pub fn to_flow_reply(&self) -> Option<FlowReply> {
        let reply = self.interactive.as_ref().filter(|i| i.kind == "nfm_reply")?.nfm_reply.as_ref()?;
        let raw = reply.response_json.as_deref()?;
        let response: Value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        let flow_token = response.get("flow_token").and_then(Value::as_str).map(str::to_string);

        Some(FlowReply {
            message_id: self.id.clone(),
            from: self.from.clone(),
            flow_token,
            response,
        })
    }
}

impl WebhookPayload {
    fn values(&self) -> impl Iterator<Item = &ChangeValue> {
        self.entry.iter().flat_map(|e| e.changes.iter()).map(|c| &c.value)
    }

    pub fn status_events(&self) -> Vec<StatusEvent> {
        self.values()
            .flat_map(|v| v.statuses.iter())
            .filter_map(StatusUpdate::to_event)
            .collect()
    }

    pub fn flow_replies(&self) -> Vec<FlowReply> {
        self.values()
            .flat_map(|v| v.messages.iter())
            .filter_map(InboundMessage::to_flow_reply)
            .collect()
    }
}

/// Query string of the subscription handshake.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

impl VerifyQuery {
    /// The challenge to echo back, if the handshake is valid for `expected_token`.
    pub fn accept(&self, expected_token: Option<&str>) -> Option<&str> {
        let expected = expected_token.filter(|t| !t.is_empty())?;
        (self.mode.as_deref() == Some("subscribe") && self.verify_token.as_deref() == Some(expected))
            .then_some(self.challenge.as_deref())
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "WABA1", "changes": [{"field": "messages", "value": value}]}]
        }))
        .unwrap()
    }

    #[test]
    fn test_status_events() {
        let campaign = Uuid::new_v4();
        let payload = payload(json!({
            "messaging_product": "whatsapp",
            "metadata": {"display_phone_number": "15550001111", "phone_number_id": "PHONE1"},
            "statuses": [
                {"id": "wamid.A", "status": "delivered", "timestamp": "1700000000", "recipient_id": "14155550123",
                 "biz_opaque_callback_data": campaign.to_string()},
                {"id": "wamid.B", "status": "failed", "timestamp": "1700000001",
                 "errors": [{"code": 131026, "title": "Message undeliverable",
                             "error_data": {"details": "Receiver is incapable"}}]},
                {"id": "wamid.C", "status": "deleted", "timestamp": "1700000002"}
            ]
        }));

        let events = payload.status_events();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].message_id, "wamid.A");
        assert_eq!(events[0].status, RecipientStatus::Delivered);
        assert_eq!(events[0].campaign_id, Some(campaign));
        assert_eq!(events[0].at.timestamp(), 1_700_000_000);

        assert_eq!(events[1].status, RecipientStatus::Failed);
        assert_eq!(events[1].campaign_id, None);
        assert_eq!(events[1].error_code, Some(131026));
        assert_eq!(events[1].error.as_deref(), Some("(131026) Receiver is incapable"));
    }

    #[test]
    fn test_flow_replies() {
        let payload = payload(json!({
            "messages": [
                {"from": "14155550123", "id": "wamid.F1", "timestamp": "1700000000", "type": "interactive",
                 "interactive": {"type": "nfm_reply", "nfm_reply": {
                     "name": "flow", "body": "Sent",
                     "response_json": "{\"flow_token\":\"abc:1\",\"first_name\":\"Ada\"}"}}},
                {"from": "14155550123", "id": "wamid.T1", "type": "text", "text": {"body": "hi"}}
            ]
        }));

        let replies = payload.flow_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message_id, "wamid.F1");
        assert_eq!(replies[0].flow_token.as_deref(), Some("abc:1"));
        assert_eq!(replies[0].response["first_name"], "Ada");
    }

    #[test]
    fn test_malformed_elements_do_not_drop_the_batch() {
        let payload = payload(json!({
            "statuses": [
                {"id": "wamid.GOOD", "status": "delivered", "timestamp": "1700000000"},
                {"status": "read", "timestamp": "1700000001"},
                {"id": "wamid.NOSTATUS", "timestamp": "1700000002"},
                {"id": "wamid.BADERR", "status": "failed", "errors": [{"title": "no code"}, "not an object"]}
            ],
            "messages": [
                {"from": "14155550123", "id": "wamid.F1", "type": "interactive",
                 "interactive": {"type": "nfm_reply", "nfm_reply": {"name": "flow"}}},
                {"from": "14155550123", "type": "interactive"},
                {"from": "14155550123", "id": "wamid.F2", "type": "interactive",
                 "interactive": {"type": "nfm_reply", "nfm_reply": {"response_json": "{\"flow_token\":\"t\"}"}}}
            ]
        }));

        let events = payload.status_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message_id, "wamid.GOOD");
        assert_eq!(events[0].status, RecipientStatus::Delivered);
        assert_eq!(events[1].message_id, "wamid.BADERR");
        assert_eq!(events[1].status, RecipientStatus::Failed);
        assert_eq!(events[1].error_code, None);
        assert_eq!(events[1].error.as_deref(), Some("no code"));

        let replies = payload.flow_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message_id, "wamid.F2");
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [
                "garbage",
                {"id": "WABA1", "changes": [
                    {"field": "messages", "value": {"statuses": [{"id": "wamid.A", "status": "sent"}]}}
                ]}
            ]
        }))
        .unwrap();

        assert_eq!(payload.status_events().len(), 1);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let payload = payload(json!({"something_new": [1, 2, 3]}));
        assert!(payload.status_events().is_empty());
        assert!(payload.flow_replies().is_empty());
    }

    #[test]
    fn test_verify_handshake() {
        let query = VerifyQuery {
            mode: Some("subscribe".to_string()),
            verify_token: Some("secret".to_string()),
            challenge: Some("1158201444".to_string()),
        };

        assert_eq!(query.accept(Some("secret")), Some("1158201444"));
        assert_eq!(query.accept(Some("other")), None);
        assert_eq!(query.accept(None), None);

        let unsubscribe = VerifyQuery {
            mode: Some("unsubscribe".to_string()),
            ..query
        };
        assert_eq!(unsubscribe.accept(Some("secret")), None);
    }
}
