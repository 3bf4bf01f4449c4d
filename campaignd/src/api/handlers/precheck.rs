//! Ad-hoc precheck: validate contacts against a template before a campaign exists.

use std::collections::HashSet;

use axum::{extract::State, response::Json};
use tracing::instrument;

use crate::{
    AppState,
    api::models::precheck::{AdhocPrecheckRequest, PrecheckResponse},
    auth::ApiCaller,
    db::handlers::{Contacts, Repository, Templates},
    errors::{Error, Result},
    precheck::{self, Candidate},
};

/// Upper bound on contacts per ad-hoc request; campaigns have no such limit.
pub const MAX_ADHOC_CONTACTS: usize = 1000;

#[utoipa::path(
    post,
    path = "/precheck",
    tag = "precheck",
    summary = "Precheck contacts",
    description = "Run the recipient precheck for a template, bindings and a list of contacts without creating a campaign. \
                   Unlike a campaign precheck, the template does not need to be approved yet.",
    request_body = AdhocPrecheckRequest,
    responses(
        (status = 200, description = "Precheck report", body = PrecheckResponse),
        (status = 400, description = "Invalid bindings, too many contacts or unknown contacts"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Template not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn precheck_contacts(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Json(request): Json<AdhocPrecheckRequest>,
) -> Result<Json<PrecheckResponse>> {
    precheck::validate_bindings(&request.variable_bindings).map_err(|message| Error::BadRequest { message })?;

    let mut seen = HashSet::new();
    let contact_ids: Vec<_> = request.contact_ids.iter().copied().filter(|id| seen.insert(*id)).collect();
    if contact_ids.is_empty() {
        return Err(Error::BadRequest {
            message: "contact_ids cannot be empty".to_string(),
        });
    }
    if contact_ids.len() > MAX_ADHOC_CONTACTS {
        return Err(Error::BadRequest {
            message: format!("At most {MAX_ADHOC_CONTACTS} contacts can be prechecked at once; use a campaign for more"),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let template = Templates::new(&mut conn)
        .get_by_id(request.template_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Template".to_string(),
            id: request.template_id.to_string(),
        })?;

    let contacts = Contacts::new(&mut conn).get_bulk(&contact_ids).await?;
    let missing: Vec<String> = contact_ids
        .iter()
        .filter(|id| !contacts.contains_key(id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::BadRequest {
            message: format!("Unknown contact ids: {}", missing.join(", ")),
        });
    }

    // Request order decides which of two duplicate numbers is kept
    let candidates: Vec<Candidate> = contact_ids
        .iter()
        .filter_map(|id| contacts.get(id))
        .map(|contact| Candidate::from_contact(contact, None))
        .collect();

    let report = precheck::evaluate(
        &template.components,
        &request.variable_bindings,
        &candidates,
        state.config.whatsapp.default_country_code.as_deref(),
    );
    Ok(Json(report.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_AUTH, create_lazy_test_server, create_test_config};
    use serde_json::json;

    #[tokio::test]
    async fn test_rejects_bad_requests_before_querying() {
        let server = create_lazy_test_server(create_test_config());
        let template_id = uuid::Uuid::new_v4();
        let too_many: Vec<uuid::Uuid> = (0..=MAX_ADHOC_CONTACTS).map(|_| uuid::Uuid::new_v4()).collect();

        for body in [
            json!({"template_id": template_id, "contact_ids": []}),
            json!({"template_id": template_id, "contact_ids": too_many}),
            json!({"template_id": template_id, "contact_ids": [uuid::Uuid::new_v4()],
                   "variable_bindings": {"body.1": {"source": "contact_field", "value": "nickname"}}}),
        ] {
            server
                .post("/api/v1/precheck")
                .add_header("authorization", TEST_AUTH)
                .json(&body)
                .await
                .assert_status_bad_request();
        }
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod db_tests {
    use super::*;
    use crate::precheck::SkipCode;
    use crate::test_utils::{create_test_app, create_test_contact, create_test_template};
    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_adhoc_precheck_flags_duplicates_in_request_order(pool: PgPool) {
        let template = create_test_template(&pool, "PENDING").await;
        let first = create_test_contact(&pool, "+14155550100").await;
        let second = create_test_contact(&pool, "+1 (415) 555-0100").await;
        let server = create_test_app(pool).await;

        let response: PrecheckResponse = server
            .post("/api/v1/precheck")
            .add_header("authorization", crate::test_utils::TEST_AUTH)
            .json(&json!({
                "template_id": template.id,
                "contact_ids": [second.id, first.id, second.id],
                "variable_bindings": {"body.1": {"source": "fixed", "value": "friend"}}
            }))
            .await
            .json();

        assert_eq!(response.report.summary.total, 2);
        assert_eq!(response.report.summary.by_code.get(&SkipCode::DuplicatePhone), Some(&1));
        let flagged = response.report.recipients.iter().find(|r| !r.ok).unwrap();
        assert_eq!(flagged.contact_id, first.id);
        // Duplicates cannot be fixed by editing one contact
        assert!(response.fix_queue.is_empty());
    }
}
