//! HTTP handlers for WhatsApp Flow definitions and their submissions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        flows::{FlowCreate, FlowResponse, FlowSubmissionResponse, FlowUpdate},
        pagination::{PaginatedResponse, Pagination},
    },
    auth::ApiCaller,
    db::{
        errors::DbError,
        handlers::{Flows, Repository, flows::FlowFilter},
        models::flows::{Flow, FlowCreateDBRequest, FlowStatus, FlowUpdateDBRequest},
    },
    errors::{Error, Result},
    flows::validate_definition,
    types::FlowId,
};

fn not_found(id: FlowId) -> Error {
    Error::NotFound {
        resource: "Flow".to_string(),
        id: id.to_string(),
    }
}

fn not_draft(flow: &Flow, action: &str) -> Error {
    Error::Conflict {
        message: format!("Cannot {action} flow {} while it is {}", flow.id, flow.status),
    }
}

fn check_definition(definition: &serde_json::Value) -> Result<()> {
    validate_definition(definition).map_err(|e| Error::BadRequest {
        message: format!("Invalid flow definition: {e}"),
    })
}

async fn load_flow(conn: &mut sqlx::PgConnection, id: FlowId) -> Result<Flow> {
    Flows::new(conn).get_by_id(id).await?.ok_or_else(|| not_found(id))
}

#[utoipa::path(
    get,
    path = "/flows",
    tag = "flows",
    summary = "List flows",
    params(Pagination),
    responses(
        (status = 200, description = "Page of flows", body = PaginatedResponse<FlowResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_flows(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<FlowResponse>>> {
    let (skip, limit) = pagination.params();
    let filter = FlowFilter { skip, limit };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Flows::new(&mut conn);
    let flows = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        flows.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/flows",
    tag = "flows",
    summary = "Create flow",
    description = "Store a draft flow. The definition must have at least one screen, unique screen ids, navigation only to \
                   existing screens, a terminal screen, and unique field names within each screen.",
    request_body = FlowCreate,
    responses(
        (status = 201, description = "Flow created", body = FlowResponse),
        (status = 400, description = "Invalid definition"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "A flow with this name already exists"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn create_flow(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Json(request): Json<FlowCreate>,
) -> Result<(StatusCode, Json<FlowResponse>)> {
    if request.name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Flow name cannot be empty".to_string(),
        });
    }
    check_definition(&request.definition)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let flow = Flows::new(&mut conn)
        .create(&FlowCreateDBRequest {
            name: request.name.trim().to_string(),
            definition: request.definition,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(flow.into())))
}

#[utoipa::path(
    get,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Get flow",
    params(("id" = uuid::Uuid, Path, description = "Flow ID")),
    responses(
        (status = 200, description = "Flow details", body = FlowResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Flow not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(flow_id = %id))]
pub async fn get_flow(State(state): State<AppState>, Path(id): Path<FlowId>, _caller: ApiCaller) -> Result<Json<FlowResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Ok(Json(load_flow(&mut conn, id).await?.into()))
}

#[utoipa::path(
    patch,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Update flow",
    description = "Edit a draft flow. Published flows are immutable.",
    params(("id" = uuid::Uuid, Path, description = "Flow ID")),
    request_body = FlowUpdate,
    responses(
        (status = 200, description = "Flow updated", body = FlowResponse),
        (status = 400, description = "Invalid definition"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Flow not found"),
        (status = 409, description = "Flow is not a draft"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(flow_id = %id))]
pub async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<FlowId>,
    _caller: ApiCaller,
    Json(request): Json<FlowUpdate>,
) -> Result<Json<FlowResponse>> {
    if let Some(definition) = &request.definition {
        check_definition(definition)?;
    }
    if request.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(Error::BadRequest {
            message: "Flow name cannot be empty".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let flow = load_flow(&mut conn, id).await?;
    if flow.flow_status() != FlowStatus::Draft {
        return Err(not_draft(&flow, "edit"));
    }

    let update = FlowUpdateDBRequest {
        name: request.name.map(|n| n.trim().to_string()),
        definition: request.definition,
    };
    let updated = Flows::new(&mut conn).update(id, &update).await.map_err(|e| match e {
        DbError::NotFound => not_draft(&flow, "edit"),
        other => other.into(),
    })?;

    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Delete flow",
    description = "Delete a flow. Its submissions are kept, detached from the flow.",
    params(("id" = uuid::Uuid, Path, description = "Flow ID")),
    responses(
        (status = 204, description = "Flow deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Flow not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(flow_id = %id))]
pub async fn delete_flow(State(state): State<AppState>, Path(id): Path<FlowId>, _caller: ApiCaller) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Flows::new(&mut conn).delete(id).await? {
        return Err(not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/flows/{id}/publish",
    tag = "flows",
    summary = "Publish flow",
    description = "`draft → published`. The definition is validated again before publishing.",
    params(("id" = uuid::Uuid, Path, description = "Flow ID")),
    responses(
        (status = 200, description = "Flow published", body = FlowResponse),
        (status = 400, description = "Invalid definition"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Flow not found"),
        (status = 409, description = "Flow is not a draft"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(flow_id = %id))]
pub async fn publish_flow(State(state): State<AppState>, Path(id): Path<FlowId>, _caller: ApiCaller) -> Result<Json<FlowResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let flow = load_flow(&mut conn, id).await?;
    check_definition(&flow.definition)?;

    let published = Flows::new(&mut conn)
        .publish(id)
        .await?
        .ok_or_else(|| not_draft(&flow, "publish"))?;

    tracing::info!(flow_id = %id, name = %published.name, "Flow published");
    Ok(Json(published.into()))
}

#[utoipa::path(
    get,
    path = "/flows/{id}/submissions",
    tag = "flows",
    summary = "List flow submissions",
    description = "Responses collected from completed flows, newest first.",
    params(("id" = uuid::Uuid, Path, description = "Flow ID"), Pagination),
    responses(
        (status = 200, description = "Page of submissions", body = PaginatedResponse<FlowSubmissionResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Flow not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(flow_id = %id))]
pub async fn list_submissions(
    State(state): State<AppState>,
    Path(id): Path<FlowId>,
    Query(pagination): Query<Pagination>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<FlowSubmissionResponse>>> {
    let (skip, limit) = pagination.params();

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    load_flow(&mut conn, id).await?;
    let mut repo = Flows::new(&mut conn);
    let submissions = repo.list_submissions(id, skip, limit).await?;
    let total_count = repo.count_submissions(id).await?;

    Ok(Json(PaginatedResponse::new(
        submissions.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}


#[cfg(all(test, feature = "postgres-tests"))]
mod db_tests {
    use super::*;
    use crate::test_utils::{TEST_AUTH, create_test_app};
    use serde_json::json;
    use sqlx::PgPool;

    fn definition() -> serde_json::Value {
        json!({"version": "6.0", "screens": [
            {"id": "DONE", "terminal": true, "layout": {"type": "SingleColumnLayout", "children": [
                {"type": "TextInput", "name": "email", "label": "Email"},
                {"type": "Footer", "label": "Submit", "on-click-action": {"name": "complete"}}
            ]}}
        ]})
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_publish_freezes_flow(pool: PgPool) {
        let server = create_test_app(pool).await;

        let created: FlowResponse = server
            .post("/api/v1/flows")
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"name": "signup", "definition": definition()}))
            .await
            .json();
        assert_eq!(created.status, FlowStatus::Draft);

        let published: FlowResponse = server
            .post(&format!("/api/v1/flows/{}/publish", created.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(published.status, FlowStatus::Published);

        server
            .patch(&format!("/api/v1/flows/{}", created.id))
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"name": "renamed"}))
            .await
            .assert_status(StatusCode::CONFLICT);
        server
            .post(&format!("/api/v1/flows/{}/publish", created.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .assert_status(StatusCode::CONFLICT);

        let submissions: PaginatedResponse<FlowSubmissionResponse> = server
            .get(&format!("/api/v1/flows/{}/submissions", created.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(submissions.total_count, 0);
    }
}
