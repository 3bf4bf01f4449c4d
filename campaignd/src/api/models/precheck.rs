//! API request and response models for precheck and the batch-fix loop.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::precheck::batch_fix::{BatchFixQueue, FixItem};
use crate::precheck::{Binding, Bindings, PrecheckReport};
use crate::types::{ContactId, TemplateId};

/// Precheck arbitrary contacts against a template without creating a campaign.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AdhocPrecheckRequest {
    #[schema(value_type = String, format = "uuid")]
    pub template_id: TemplateId,
    #[serde(default)]
    #[schema(value_type = HashMap<String, Binding>)]
    pub variable_bindings: Bindings,
    #[schema(value_type = Vec<String>)]
    pub contact_ids: Vec<ContactId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PrecheckResponse {
    #[serde(flatten)]
    pub report: PrecheckReport,
    /// Flagged recipients that a contact edit can fix, in the order a client should walk them.
    /// Fix each through `PATCH /contacts/{id}`, then precheck again.
    pub fix_queue: Vec<FixItem>,
}

impl From<PrecheckReport> for PrecheckResponse {
    fn from(report: PrecheckReport) -> Self {
        let fix_queue = BatchFixQueue::from_precheck(&report).into_items();
        Self { report, fix_queue }
    }
}
