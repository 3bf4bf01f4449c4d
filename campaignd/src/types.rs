//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for readability:
//!
//! - [`ContactId`]: Contact (recipient) identifier
//! - [`TemplateId`]: Message template identifier
//! - [`CampaignId`]: Campaign identifier
//! - [`RecipientId`]: Row in `campaign_contacts`
//! - [`FlowId`]: WhatsApp Flow identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use uuid::Uuid;

pub type ContactId = Uuid;
pub type TemplateId = Uuid;
pub type CampaignId = Uuid;
pub type RecipientId = Uuid;
pub type FlowId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Mask all but the last four digits of a phone number for logs.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let visible: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 4), visible)
}
