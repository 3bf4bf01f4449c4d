//! Recipient precheck.
//!
//! Before a campaign sends, every recipient is checked against the template and the campaign's
//! variable bindings. The check is read-only and never stops at the first problem: it returns a
//! verdict for every recipient plus a summary, so a whole list can be reviewed and fixed in one
//! pass (see [`batch_fix`]).
//!
//! Checks run in a fixed order and the first failure decides the skip code:
//!
//! 1. `opted_out`: the contact withdrew marketing consent
//! 2. `invalid_phone`: the number cannot be normalized to E.164
//! 3. `duplicate_phone`: an earlier recipient already has the same normalized number
//! 4. `unbound_variable`: a template placeholder has no binding at all
//! 5. `missing_contact_field`: a bound contact field is empty and has no fallback
//! 6. `missing_custom_field`: a bound custom field is absent and has no fallback

pub mod batch_fix;
pub mod phone;
pub mod variables;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::models::contacts::{Contact, OptInStatus};
use crate::db::models::templates::{Template, TemplateStatus};
use crate::types::{ContactId, RecipientId};

/// Where a placeholder's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BindingSource {
    /// A built-in contact column: `name`, `phone` or `email`
    ContactField,
    /// A key in the contact's `custom_fields`
    CustomField,
    /// The same literal for every recipient
    Fixed,
}

/// Binding for one placeholder.
///
/// `value` is the contact field name, the custom field key, or the literal, depending on
/// `source`. `fallback` is used when the contact has no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Binding {
    pub source: BindingSource,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Placeholder key → binding.
pub type Bindings = BTreeMap<String, Binding>;

const CONTACT_FIELDS: &[&str] = &["name", "phone", "email"];

impl Binding {
    pub fn contact_field(field: &str) -> Self {
        Self {
            source: BindingSource::ContactField,
            value: field.to_string(),
            fallback: None,
        }
    }

    pub fn custom_field(key: &str) -> Self {
        Self {
            source: BindingSource::CustomField,
            value: key.to_string(),
            fallback: None,
        }
    }

    pub fn fixed(value: &str) -> Self {
        Self {
            source: BindingSource::Fixed,
            value: value.to_string(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }
}

/// Structural checks on a binding map, independent of any recipient.
pub fn validate_bindings(bindings: &Bindings) -> Result<(), String> {
    for (key, binding) in bindings {
        match binding.source {
            BindingSource::ContactField if !CONTACT_FIELDS.contains(&binding.value.as_str()) => {
                return Err(format!(
                    "binding '{key}': unknown contact field '{}' (expected one of: {})",
                    binding.value,
                    CONTACT_FIELDS.join(", ")
                ));
            }
            BindingSource::CustomField if binding.value.trim().is_empty() => {
                return Err(format!("binding '{key}': custom field key is empty"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse a stored `variable_bindings` column.
pub fn parse_bindings(value: &Value) -> Result<Bindings, serde_json::Error> {
    if value.is_null() {
        return Ok(Bindings::new());
    }
    serde_json::from_value(value.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipCode {
    OptedOut,
    InvalidPhone,
    DuplicatePhone,
    UnboundVariable,
    MissingContactField,
    MissingCustomField,
}

impl SkipCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::InvalidPhone => "invalid_phone",
            Self::DuplicatePhone => "duplicate_phone",
            Self::UnboundVariable => "unbound_variable",
            Self::MissingContactField => "missing_contact_field",
            Self::MissingCustomField => "missing_custom_field",
        }
    }

    /// Whether editing the contact can clear this skip.
    pub fn is_fixable(&self) -> bool {
        matches!(self, Self::InvalidPhone | Self::MissingContactField | Self::MissingCustomField)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SkipReason {
    pub code: SkipCode,
    /// Human-readable explanation
    pub reason: String,
    /// Contact field to edit (`phone`, `name`, `custom_fields.<key>`, ...) or the unbound placeholder
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecipientVerdict {
    #[schema(value_type = String, format = "uuid")]
    pub contact_id: ContactId,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub recipient_id: Option<RecipientId>,
    pub ok: bool,
    /// Normalized E.164 number when the phone check passed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Resolved placeholder values, present only for valid recipients
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrecheckSummary {
    pub total: usize,
    pub valid: usize,
    pub skipped: usize,
    pub by_code: BTreeMap<SkipCode, usize>,
    /// Template placeholders with no binding; every recipient is skipped while this is non-empty
    pub unbound_placeholders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PrecheckReport {
    pub placeholders: Vec<String>,
    pub summary: PrecheckSummary,
    pub recipients: Vec<RecipientVerdict>,
}

impl PrecheckReport {
    /// `(recipient id, skip code)` for every skipped recipient that came from a campaign.
    pub fn skips(&self) -> Vec<(RecipientId, String)> {
        self.recipients
            .iter()
            .filter_map(|v| match (&v.recipient_id, &v.skip) {
                (Some(id), Some(skip)) => Some((*id, skip.code.as_str().to_string())),
                _ => None,
            })
            .collect()
    }
}

/// The subset of a contact the checks read.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub contact_id: ContactId,
    pub recipient_id: Option<RecipientId>,
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub opted_out: bool,
    pub custom_fields: serde_json::Map<String, Value>,
}

impl Candidate {
    pub fn from_contact(contact: &Contact, recipient_id: Option<RecipientId>) -> Self {
        Self {
            contact_id: contact.id,
            recipient_id,
            phone: contact.phone.clone(),
            name: contact.name.clone(),
            email: contact.email.clone(),
            opted_out: contact.opt_in() == OptInStatus::OptedOut,
            custom_fields: contact.custom_fields.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// Only approved templates can be sent.
pub fn ensure_sendable(template: &Template) -> Result<(), String> {
    match template.template_status() {
        TemplateStatus::Approved => Ok(()),
        other => Err(format!(
            "template '{}' ({}) is {} at WhatsApp; only APPROVED templates can be sent",
            template.name,
            template.language,
            other.as_str()
        )),
    }
}

/// Check every candidate. Candidate order matters for duplicate detection: the first recipient
/// with a given number is kept.
pub fn evaluate(
    components: &Value,
    bindings: &Bindings,
    candidates: &[Candidate],
    default_country_code: Option<&str>,
) -> PrecheckReport {
    let placeholders = variables::placeholder_keys(components);
    let unbound: Vec<String> = placeholders.iter().filter(|k| !bindings.contains_key(*k)).cloned().collect();

    let mut seen_phones: HashSet<String> = HashSet::new();
    let mut summary = PrecheckSummary {
        total: candidates.len(),
        unbound_placeholders: unbound.clone(),
        ..Default::default()
    };

    let recipients: Vec<RecipientVerdict> = candidates
        .iter()
        .map(|candidate| {
            let verdict = check_candidate(candidate, &placeholders, &unbound, bindings, default_country_code, &mut seen_phones);
            match &verdict.skip {
                Some(skip) => {
                    summary.skipped += 1;
                    *summary.by_code.entry(skip.code).or_default() += 1;
                }
                None => summary.valid += 1,
            }
            verdict
        })
        .collect();

    PrecheckReport {
        placeholders,
        summary,
        recipients,
    }
}

fn check_candidate(
    candidate: &Candidate,
    placeholders: &[String],
    unbound: &[String],
    bindings: &Bindings,
    default_country_code: Option<&str>,
    seen_phones: &mut HashSet<String>,
) -> RecipientVerdict {
    let skipped = |phone: Option<String>, code: SkipCode, reason: String, field: String| RecipientVerdict {
        contact_id: candidate.contact_id,
        recipient_id: candidate.recipient_id,
        ok: false,
        phone,
        variables: BTreeMap::new(),
        skip: Some(SkipReason { code, reason, field }),
    };

    if candidate.opted_out {
        return skipped(
            None,
            SkipCode::OptedOut,
            "contact has opted out of marketing messages".to_string(),
            "opt_in_status".to_string(),
        );
    }

    let phone = match phone::normalize_e164(&candidate.phone, default_country_code) {
        Ok(phone) => phone,
        Err(e) => {
            return skipped(None, SkipCode::InvalidPhone, format!("{e}: '{}'", candidate.phone), "phone".to_string());
        }
    };

    if !seen_phones.insert(phone.clone()) {
        return skipped(
            Some(phone.clone()),
            SkipCode::DuplicatePhone,
            format!("{phone} already appears earlier in the recipient list"),
            "phone".to_string(),
        );
    }

    if let Some(key) = unbound.first() {
        return skipped(
            Some(phone),
            SkipCode::UnboundVariable,
            format!("template placeholder '{key}' has no binding"),
            key.clone(),
        );
    }

    let mut values = BTreeMap::new();
    let mut missing_contact: Option<(String, String)> = None;
    let mut missing_custom: Option<(String, String)> = None;

    for key in placeholders {
        let Some(binding) = bindings.get(key) else {
            continue;
        };
        match resolve(binding, candidate, &phone) {
            Some(value) => {
                values.insert(key.clone(), value);
            }
            None => match binding.source {
                BindingSource::ContactField if missing_contact.is_none() => {
                    missing_contact = Some((
                        binding.value.clone(),
                        format!("contact {} is empty (needed for '{key}')", binding.value),
                    ));
                }
                BindingSource::CustomField if missing_custom.is_none() => {
                    missing_custom = Some((
                        format!("custom_fields.{}", binding.value),
                        format!("custom field '{}' is missing (needed for '{key}')", binding.value),
                    ));
                }
                _ => {}
            },
        }
    }

    if let Some((field, reason)) = missing_contact {
        return skipped(Some(phone), SkipCode::MissingContactField, reason, field);
    }
    if let Some((field, reason)) = missing_custom {
        return skipped(Some(phone), SkipCode::MissingCustomField, reason, field);
    }

    RecipientVerdict {
        contact_id: candidate.contact_id,
        recipient_id: candidate.recipient_id,
        ok: true,
        phone: Some(phone),
        variables: values,
        skip: None,
    }
}

/// Resolve one binding for a candidate. Empty strings count as missing.
fn resolve(binding: &Binding, candidate: &Candidate, normalized_phone: &str) -> Option<String> {
    let direct = match binding.source {
        BindingSource::Fixed => return Some(binding.value.clone()),
        BindingSource::ContactField => match binding.value.as_str() {
            "name" => candidate.name.clone(),
            "email" => candidate.email.clone(),
            "phone" => Some(normalized_phone.to_string()),
            _ => None,
        },
        BindingSource::CustomField => candidate.custom_fields.get(&binding.value).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }),
    };

    direct
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| binding.fallback.clone())
}

/// Resolve bindings for a single contact at send time, after precheck has already passed.
/// Returns the first placeholder that cannot be resolved as the error.
pub fn resolve_for_send(
    components: &Value,
    bindings: &Bindings,
    candidate: &Candidate,
    default_country_code: Option<&str>,
) -> Result<(String, BTreeMap<String, String>), SkipReason> {
    let mut seen = HashSet::new();
    let placeholders = variables::placeholder_keys(components);
    let unbound: Vec<String> = placeholders.iter().filter(|k| !bindings.contains_key(*k)).cloned().collect();

    let verdict = check_candidate(candidate, &placeholders, &unbound, bindings, default_country_code, &mut seen);
    match (verdict.skip, verdict.phone) {
        (None, Some(phone)) => Ok((phone, verdict.variables)),
        (Some(skip), _) => Err(skip),
        (None, None) => Err(SkipReason {
            code: SkipCode::InvalidPhone,
            reason: "phone number could not be normalized".to_string(),
            field: "phone".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn components() -> Value {
        json!([
            {"type": "BODY", "text": "Hi {{1}}, your code is {{2}}"}
        ])
    }

    fn bindings() -> Bindings {
        Bindings::from([
            ("body.1".to_string(), Binding::contact_field("name").with_fallback("there")),
            ("body.2".to_string(), Binding::custom_field("code")),
        ])
    }

    fn candidate(phone: &str) -> Candidate {
        Candidate {
            contact_id: Uuid::new_v4(),
            recipient_id: Some(Uuid::new_v4()),
            phone: phone.to_string(),
            name: Some("Ada".to_string()),
            email: None,
            opted_out: false,
            custom_fields: json!({"code": "SPRING10"}).as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_valid_recipient_resolves_variables() {
        let report = evaluate(&components(), &bindings(), &[candidate("+1 415 555 0123")], None);

        assert_eq!(report.placeholders, vec!["body.1", "body.2"]);
        assert_eq!(report.summary.valid, 1);
        let verdict = &report.recipients[0];
        assert!(verdict.ok);
        assert_eq!(verdict.phone.as_deref(), Some("+14155550123"));
        assert_eq!(verdict.variables["body.1"], "Ada");
        assert_eq!(verdict.variables["body.2"], "SPRING10");
    }

    #[test]
    fn test_fallback_used_for_empty_name() {
        let mut c = candidate("+14155550123");
        c.name = Some("   ".to_string());

        let report = evaluate(&components(), &bindings(), &[c], None);
        assert_eq!(report.recipients[0].variables["body.1"], "there");
    }

    #[test]
    fn test_check_order_first_failure_wins() {
        // Opted out and an invalid phone: opted_out wins
        let mut c = candidate("not a phone");
        c.opted_out = true;
        let report = evaluate(&components(), &bindings(), &[c], None);
        assert_eq!(report.recipients[0].skip.as_ref().unwrap().code, SkipCode::OptedOut);

        // Invalid phone and missing custom field: invalid_phone wins
        let mut c = candidate("12");
        c.custom_fields.clear();
        let report = evaluate(&components(), &bindings(), &[c], None);
        let skip = report.recipients[0].skip.as_ref().unwrap();
        assert_eq!(skip.code, SkipCode::InvalidPhone);
        assert_eq!(skip.field, "phone");
    }

    #[test]
    fn test_duplicate_phone_keeps_first() {
        let first = candidate("+14155550123");
        let second = candidate("+1 (415) 555-0123");
        let report = evaluate(&components(), &bindings(), &[first.clone(), second.clone()], None);

        assert!(report.recipients[0].ok);
        assert_eq!(report.recipients[0].contact_id, first.contact_id);
        assert_eq!(report.recipients[1].skip.as_ref().unwrap().code, SkipCode::DuplicatePhone);
        assert_eq!(report.summary.by_code[&SkipCode::DuplicatePhone], 1);
    }

    #[test]
    fn test_opted_out_does_not_claim_phone() {
        let mut opted_out = candidate("+14155550123");
        opted_out.opted_out = true;
        let report = evaluate(&components(), &bindings(), &[opted_out, candidate("+14155550123")], None);

        assert!(report.recipients[1].ok);
    }

    #[test]
    fn test_unbound_placeholder_skips_everyone() {
        let mut partial = bindings();
        partial.remove("body.2");

        let report = evaluate(&components(), &partial, &[candidate("+14155550123"), candidate("+14155550124")], None);

        assert_eq!(report.summary.unbound_placeholders, vec!["body.2"]);
        assert_eq!(report.summary.by_code[&SkipCode::UnboundVariable], 2);
        assert_eq!(report.recipients[0].skip.as_ref().unwrap().field, "body.2");
    }

    #[test]
    fn test_missing_contact_field_before_custom_field() {
        let mut b = bindings();
        b.insert("body.1".to_string(), Binding::contact_field("email"));
        let mut c = candidate("+14155550123");
        c.custom_fields.clear();

        let report = evaluate(&components(), &b, &[c], None);
        let skip = report.recipients[0].skip.as_ref().unwrap();
        assert_eq!(skip.code, SkipCode::MissingContactField);
        assert_eq!(skip.field, "email");
    }

    #[test]
    fn test_missing_custom_field_names_key() {
        let mut c = candidate("+14155550123");
        c.custom_fields.clear();

        let report = evaluate(&components(), &bindings(), &[c], None);
        let skip = report.recipients[0].skip.as_ref().unwrap();
        assert_eq!(skip.code, SkipCode::MissingCustomField);
        assert_eq!(skip.field, "custom_fields.code");
    }

    #[test]
    fn test_numeric_custom_field_and_default_country() {
        let mut c = candidate("0415 555 0123");
        c.custom_fields = json!({"code": 42}).as_object().unwrap().clone();

        let report = evaluate(&components(), &bindings(), &[c], Some("61"));
        let verdict = &report.recipients[0];
        assert!(verdict.ok);
        assert_eq!(verdict.phone.as_deref(), Some("+614155550123"));
        assert_eq!(verdict.variables["body.2"], "42");
    }

    #[test]
    fn test_summary_totals_and_skips() {
        let mut bad = candidate("x");
        bad.recipient_id = Some(Uuid::new_v4());
        let report = evaluate(&components(), &bindings(), &[candidate("+14155550123"), bad.clone()], None);

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.valid, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.skips(), vec![(bad.recipient_id.unwrap(), "invalid_phone".to_string())]);
    }

    #[test]
    fn test_validate_bindings() {
        assert!(validate_bindings(&bindings()).is_ok());

        let bad = Bindings::from([("body.1".to_string(), Binding::contact_field("nickname"))]);
        assert!(validate_bindings(&bad).unwrap_err().contains("nickname"));
    }

    #[test]
    fn test_binding_json_shape() {
        let parsed = parse_bindings(&json!({
            "body.1": {"source": "contact_field", "value": "name", "fallback": "there"},
            "body.2": {"source": "fixed", "value": "SPRING10"}
        }))
        .unwrap();

        assert_eq!(parsed["body.1"], Binding::contact_field("name").with_fallback("there"));
        assert_eq!(parsed["body.2"], Binding::fixed("SPRING10"));
        assert!(parse_bindings(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_for_send() {
        let (phone, vars) = resolve_for_send(&components(), &bindings(), &candidate("+14155550123"), None).unwrap();
        assert_eq!(phone, "+14155550123");
        assert_eq!(vars.len(), 2);

        let mut c = candidate("+14155550123");
        c.opted_out = true;
        let err = resolve_for_send(&components(), &bindings(), &c, None).unwrap_err();
        assert_eq!(err.code, SkipCode::OptedOut);
    }
}
