//! Batch-fix queue.
//!
//! After a precheck, recipients skipped for a reason that editing the contact can clear are
//! queued in report order. A client walks the queue one item at a time: edit the contact, then
//! [`BatchFixQueue::resolve`] it, or [`BatchFixQueue::skip_current`] to leave it as is. When the
//! queue runs out the precheck should be run again to pick up the edits.
//!
//! The HTTP layer is stateless: precheck responses carry the queue's items
//! ([`BatchFixQueue::into_items`]) and the client keeps the cursor. The cursor operations here
//! define the order a client walks them in.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::{PrecheckReport, SkipCode};
use crate::types::ContactId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FixItem {
    #[schema(value_type = String, format = "uuid")]
    pub contact_id: ContactId,
    pub code: SkipCode,
    /// Contact field to edit
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next(FixItem),
    /// Nothing left; re-run the precheck
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchFixError {
    #[error("no recipients are waiting to be fixed")]
    NothingPending,
    #[error("contact {got} is not the current item (expected {expected})")]
    NotCurrent { expected: ContactId, got: ContactId },
}

#[derive(Debug, Clone, Default)]
pub struct BatchFixQueue {
    items: Vec<FixItem>,
    cursor: usize,
    resolved: usize,
}

impl BatchFixQueue {
    pub fn from_precheck(report: &PrecheckReport) -> Self {
        let items = report
            .recipients
            .iter()
            .filter_map(|verdict| {
                let skip = verdict.skip.as_ref()?;
                skip.code.is_fixable().then(|| FixItem {
                    contact_id: verdict.contact_id,
                    code: skip.code,
                    field: skip.field.clone(),
                    reason: skip.reason.clone(),
                })
            })
            .collect();

        Self {
            items,
            cursor: 0,
            resolved: 0,
        }
    }

    pub fn current(&self) -> Option<&FixItem> {
        self.items.get(self.cursor)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items not yet resolved or skipped, including the current one.
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.cursor)
    }

    /// How many items were marked fixed so far.
    pub fn resolved(&self) -> usize {
        self.resolved
    }

    pub fn skip_current(&mut self) -> Advance {
        if self.cursor < self.items.len() {
            self.cursor += 1;
        }
        self.advance()
    }

    /// Mark the current item fixed. The cursor does not move on error.
    pub fn resolve(&mut self, contact_id: ContactId) -> Result<Advance, BatchFixError> {
        let current = self.current().ok_or(BatchFixError::NothingPending)?;
        if current.contact_id != contact_id {
            return Err(BatchFixError::NotCurrent {
                expected: current.contact_id,
                got: contact_id,
            });
        }
        self.cursor += 1;
        self.resolved += 1;
        Ok(self.advance())
    }

    pub fn into_items(self) -> Vec<FixItem> {
        self.items
    }

    fn advance(&self) -> Advance {
        match self.current() {
            Some(item) => Advance::Next(item.clone()),
            None => Advance::Exhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precheck::{Binding, Bindings, Candidate, evaluate};
    use serde_json::json;
    use uuid::Uuid;

    fn candidate(phone: &str, code: Option<&str>, opted_out: bool) -> Candidate {
        let mut custom_fields = serde_json::Map::new();
        if let Some(code) = code {
            custom_fields.insert("code".to_string(), json!(code));
        }
        Candidate {
            contact_id: Uuid::new_v4(),
            recipient_id: None,
            phone: phone.to_string(),
            name: Some("Ada".to_string()),
            email: None,
            opted_out,
            custom_fields,
        }
    }

    /// valid, invalid phone, opted out, missing custom field, duplicate
    fn report() -> (PrecheckReport, Vec<Candidate>) {
        let components = json!([{"type": "BODY", "text": "Code {{1}}"}]);
        let bindings = Bindings::from([("body.1".to_string(), Binding::custom_field("code"))]);
        let candidates = vec![
            candidate("+14155550100", Some("A"), false),
            candidate("555", Some("B"), false),
            candidate("+14155550102", Some("C"), true),
            candidate("+14155550103", None, false),
            candidate("+14155550100", Some("D"), false),
        ];
        (evaluate(&components, &bindings, &candidates, None), candidates)
    }

    #[test]
    fn test_queue_holds_only_fixable_items_in_order() {
        let (report, candidates) = report();
        let queue = BatchFixQueue::from_precheck(&report);

        assert_eq!(queue.len(), 2);
        let items = queue.clone().into_items();
        assert_eq!(items[0].contact_id, candidates[1].contact_id);
        assert_eq!(items[0].code, SkipCode::InvalidPhone);
        assert_eq!(items[0].field, "phone");
        assert_eq!(items[1].contact_id, candidates[3].contact_id);
        assert_eq!(items[1].field, "custom_fields.code");
    }

    #[test]
    fn test_resolve_walks_to_exhaustion() {
        let (report, candidates) = report();
        let mut queue = BatchFixQueue::from_precheck(&report);

        match queue.resolve(candidates[1].contact_id).unwrap() {
            Advance::Next(item) => assert_eq!(item.contact_id, candidates[3].contact_id),
            Advance::Exhausted => panic!("expected another item"),
        }
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.resolve(candidates[3].contact_id).unwrap(), Advance::Exhausted);
        assert_eq!(queue.resolved(), 2);
        assert_eq!(queue.resolve(candidates[3].contact_id), Err(BatchFixError::NothingPending));
    }

    #[test]
    fn test_resolve_wrong_contact_keeps_cursor() {
        let (report, candidates) = report();
        let mut queue = BatchFixQueue::from_precheck(&report);

        let err = queue.resolve(candidates[3].contact_id).unwrap_err();
        assert_eq!(
            err,
            BatchFixError::NotCurrent {
                expected: candidates[1].contact_id,
                got: candidates[3].contact_id,
            }
        );
        assert_eq!(queue.current().unwrap().contact_id, candidates[1].contact_id);
    }

    #[test]
    fn test_skip_current() {
        let (report, _) = report();
        let mut queue = BatchFixQueue::from_precheck(&report);

        assert!(matches!(queue.skip_current(), Advance::Next(_)));
        assert_eq!(queue.skip_current(), Advance::Exhausted);
        assert_eq!(queue.skip_current(), Advance::Exhausted);
        assert_eq!(queue.remaining(), 0);
        assert_eq!(queue.resolved(), 0);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = BatchFixQueue::default();
        assert!(queue.is_empty());
        assert!(queue.current().is_none());
        assert_eq!(queue.skip_current(), Advance::Exhausted);
    }
}
