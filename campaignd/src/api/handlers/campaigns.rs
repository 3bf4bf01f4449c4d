//! HTTP handlers for campaigns: CRUD, recipients, precheck and lifecycle transitions.
//!
//! Transitions the campaign's current status does not allow answer 409. Starting goes through
//! [`lifecycle::start_campaign`], the same path the dispatcher uses for due scheduled campaigns.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        campaigns::{
            AddRecipients, AddRecipientsResponse, CampaignCreate, CampaignResponse, CampaignUpdate, ListCampaignsQuery,
            ListRecipientsQuery, PauseRequest, RecipientResponse, ScheduleRequest,
        },
        pagination::{PaginatedResponse, Pagination},
        precheck::PrecheckResponse,
    },
    auth::ApiCaller,
    db::{
        errors::DbError,
        handlers::{Campaigns, Recipients, Repository, Templates},
        models::{
            campaigns::{CampaignCreateDBRequest, CampaignFilter, CampaignStatus, CampaignUpdateDBRequest},
            recipients::RecipientFilter,
        },
    },
    dispatch::lifecycle::{self, conflict, load_campaign},
    errors::{Error, Result},
    precheck::{self, Bindings},
    types::{CampaignId, TemplateId},
};

const DEFAULT_PAUSE_REASON: &str = "Paused by operator";

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Campaign name cannot be empty".to_string(),
        });
    }
    Ok(())
}

async fn ensure_template_exists(conn: &mut sqlx::PgConnection, id: TemplateId) -> Result<()> {
    match Templates::new(conn).get_by_id(id).await? {
        Some(_) => Ok(()),
        None => Err(Error::BadRequest {
            message: format!("Template {id} does not exist"),
        }),
    }
}

fn bindings_json(bindings: &Bindings) -> Result<serde_json::Value> {
    precheck::validate_bindings(bindings).map_err(|message| Error::BadRequest { message })?;
    serde_json::to_value(bindings).map_err(|e| Error::Other(e.into()))
}

#[utoipa::path(
    get,
    path = "/campaigns",
    tag = "campaigns",
    summary = "List campaigns",
    params(Pagination, ListCampaignsQuery),
    responses(
        (status = 200, description = "Page of campaigns", body = PaginatedResponse<CampaignResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(query): Query<ListCampaignsQuery>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<CampaignResponse>>> {
    let (skip, limit) = pagination.params();
    let filter = CampaignFilter {
        skip,
        limit,
        status: query.status,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Campaigns::new(&mut conn);
    let campaigns = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        campaigns.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/campaigns",
    tag = "campaigns",
    summary = "Create campaign",
    description = "Create a draft campaign for a template. Bindings map each template placeholder to a contact field, \
                   a custom field or a fixed value.",
    request_body = CampaignCreate,
    responses(
        (status = 201, description = "Campaign created", body = CampaignResponse),
        (status = 400, description = "Invalid bindings or unknown template"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn create_campaign(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Json(request): Json<CampaignCreate>,
) -> Result<(StatusCode, Json<CampaignResponse>)> {
    validate_name(&request.name)?;
    let variable_bindings = bindings_json(&request.variable_bindings)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    ensure_template_exists(&mut conn, request.template_id).await?;
    let campaign = Campaigns::new(&mut conn)
        .create(&CampaignCreateDBRequest {
            name: request.name.trim().to_string(),
            template_id: request.template_id,
            variable_bindings,
        })
        .await?;

    tracing::info!(campaign_id = %campaign.id, template_id = %campaign.template_id, "Campaign created");
    Ok((StatusCode::CREATED, Json(campaign.into())))
}

#[utoipa::path(
    get,
    path = "/campaigns/{id}",
    tag = "campaigns",
    summary = "Get campaign",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign details with delivery counters", body = CampaignResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn get_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<CampaignResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;

    Ok(Json(campaign.into()))
}

#[utoipa::path(
    patch,
    path = "/campaigns/{id}",
    tag = "campaigns",
    summary = "Update campaign",
    description = "Edit name, template or bindings. Only `draft`, `scheduled` and `cancelled` campaigns can be edited.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    request_body = CampaignUpdate,
    responses(
        (status = 200, description = "Campaign updated", body = CampaignResponse),
        (status = 400, description = "Invalid bindings"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not editable in its current status"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    _caller: ApiCaller,
    Json(request): Json<CampaignUpdate>,
) -> Result<Json<CampaignResponse>> {
    if let Some(name) = &request.name {
        validate_name(name)?;
    }
    let variable_bindings = request.variable_bindings.as_ref().map(bindings_json).transpose()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    if !campaign.campaign_status().is_editable() {
        return Err(conflict(&campaign, "edit"));
    }
    if let Some(template_id) = request.template_id {
        ensure_template_exists(&mut conn, template_id).await?;
    }

    let update = CampaignUpdateDBRequest {
        name: request.name.map(|n| n.trim().to_string()),
        template_id: request.template_id,
        variable_bindings,
    };
    let updated = Campaigns::new(&mut conn).update(id, &update).await.map_err(|e| match e {
        // Started between the check and the update
        DbError::NotFound => conflict(&campaign, "edit"),
        other => other.into(),
    })?;

    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/campaigns/{id}",
    tag = "campaigns",
    summary = "Delete campaign",
    description = "Delete a campaign and its recipients. Only `draft`, `scheduled` and `cancelled` campaigns can be deleted.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 204, description = "Campaign deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not deletable in its current status"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn delete_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    if !campaign.campaign_status().is_editable() || !Campaigns::new(&mut conn).delete(id).await? {
        return Err(conflict(&campaign, "delete"));
    }

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/campaigns/{id}/recipients",
    tag = "campaigns",
    summary = "List recipients",
    description = "Per-recipient dispatch state: skip code, message id, attempts and delivery timestamps.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID"), Pagination, ListRecipientsQuery),
    responses(
        (status = 200, description = "Page of recipients", body = PaginatedResponse<RecipientResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn list_recipients(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    Query(pagination): Query<Pagination>,
    Query(query): Query<ListRecipientsQuery>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<RecipientResponse>>> {
    let (skip, limit) = pagination.params();
    let filter = RecipientFilter {
        skip,
        limit,
        status: query.status,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    load_campaign(&mut conn, id).await?;
    let mut repo = Recipients::new(&mut conn);
    let recipients = repo.list(id, &filter).await?;
    let total_count = repo.count(id, &filter).await?;

    Ok(Json(PaginatedResponse::new(
        recipients.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/recipients",
    tag = "campaigns",
    summary = "Add recipients",
    description = "Add contacts by id or every contact with a tag. Contacts already in the campaign and unknown ids are ignored. \
                   Opted-out contacts are added and then skipped by precheck. Only `draft` and `scheduled` campaigns accept recipients.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    request_body = AddRecipients,
    responses(
        (status = 200, description = "Recipients added", body = AddRecipientsResponse),
        (status = 400, description = "Empty contact list or tag"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign has already started"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn add_recipients(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    _caller: ApiCaller,
    Json(request): Json<AddRecipients>,
) -> Result<Json<AddRecipientsResponse>> {
    match &request {
        AddRecipients::ContactIds(ids) if ids.is_empty() => {
            return Err(Error::BadRequest {
                message: "contact_ids cannot be empty".to_string(),
            });
        }
        AddRecipients::Tag(tag) if tag.trim().is_empty() => {
            return Err(Error::BadRequest {
                message: "tag cannot be empty".to_string(),
            });
        }
        _ => {}
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut tx, id).await?;
    if !matches!(campaign.campaign_status(), CampaignStatus::Draft | CampaignStatus::Scheduled) {
        return Err(conflict(&campaign, "add recipients to"));
    }

    let added = match &request {
        AddRecipients::ContactIds(ids) => Recipients::new(&mut tx).add_contacts(id, ids).await?,
        AddRecipients::Tag(tag) => Recipients::new(&mut tx).add_by_tag(id, tag.trim()).await?,
    };
    let campaign = Campaigns::new(&mut tx).refresh_counters(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(AddRecipientsResponse {
        added,
        total: i64::from(campaign.total_count),
    }))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/precheck",
    tag = "campaigns",
    summary = "Precheck campaign",
    description = "Validate every recipient against the template and bindings without changing anything. The response lists a \
                   verdict per recipient and the queue of recipients fixable by editing the contact.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Precheck report", body = PrecheckResponse),
        (status = 400, description = "Template is not approved or bindings are invalid"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn precheck_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<PrecheckResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let (_, report) = lifecycle::precheck_campaign(&mut conn, &campaign, state.config.whatsapp.default_country_code.as_deref()).await?;

    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/schedule",
    tag = "campaigns",
    summary = "Schedule campaign",
    description = "`draft → scheduled`. The dispatcher starts the campaign once `scheduled_at` has passed.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Campaign scheduled", body = CampaignResponse),
        (status = 400, description = "Start time is in the past"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not a draft"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn schedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    _caller: ApiCaller,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<CampaignResponse>> {
    if request.scheduled_at <= Utc::now() {
        return Err(Error::BadRequest {
            message: "scheduled_at must be in the future".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let scheduled = Campaigns::new(&mut conn)
        .schedule(id, request.scheduled_at)
        .await?
        .ok_or_else(|| conflict(&campaign, "schedule"))?;

    tracing::info!(campaign_id = %id, scheduled_at = %request.scheduled_at, "Campaign scheduled");
    Ok(Json(scheduled.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/unschedule",
    tag = "campaigns",
    summary = "Unschedule campaign",
    description = "`scheduled → draft`.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign returned to draft", body = CampaignResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not scheduled"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn unschedule_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<CampaignResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let draft = Campaigns::new(&mut conn)
        .unschedule(id)
        .await?
        .ok_or_else(|| conflict(&campaign, "unschedule"))?;

    Ok(Json(draft.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/start",
    tag = "campaigns",
    summary = "Start campaign",
    description = "`draft | scheduled → sending`. Runs the precheck, marks failing recipients `skipped`, and hands the rest \
                   to the dispatcher.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign sending", body = CampaignResponse),
        (status = 400, description = "Template is not approved or bindings are invalid"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign cannot start from its current status"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn start_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<CampaignResponse>> {
    let campaign = lifecycle::start_campaign(&state.db, id, state.config.whatsapp.default_country_code.as_deref()).await?;
    Ok(Json(campaign.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/pause",
    tag = "campaigns",
    summary = "Pause campaign",
    description = "`sending → paused`. Messages already handed to WhatsApp are not recalled.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    request_body(content = PauseRequest, description = "Optional reason", content_type = "application/json"),
    responses(
        (status = 200, description = "Campaign paused", body = CampaignResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not sending"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<CampaignId>,
    _caller: ApiCaller,
    request: Option<Json<PauseRequest>>,
) -> Result<Json<CampaignResponse>> {
    let reason = request
        .and_then(|Json(r)| r.reason)
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PAUSE_REASON.to_string());

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let paused = Campaigns::new(&mut conn)
        .pause(id, &reason)
        .await?
        .ok_or_else(|| conflict(&campaign, "pause"))?;

    tracing::info!(campaign_id = %id, reason = %reason, "Campaign paused");
    Ok(Json(paused.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/resume",
    tag = "campaigns",
    summary = "Resume campaign",
    description = "`paused → sending`. Recipients are not prechecked again; contacts that opted out meanwhile are skipped at send time.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign sending", body = CampaignResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign is not paused"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn resume_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<CampaignResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let resumed = Campaigns::new(&mut conn)
        .resume(id)
        .await?
        .ok_or_else(|| conflict(&campaign, "resume"))?;

    tracing::info!(campaign_id = %id, "Campaign resumed");
    Ok(Json(resumed.into()))
}

#[utoipa::path(
    post,
    path = "/campaigns/{id}/cancel",
    tag = "campaigns",
    summary = "Cancel campaign",
    description = "`draft | scheduled | paused → cancelled`. A sending campaign must be paused first.",
    params(("id" = uuid::Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign cancelled", body = CampaignResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Campaign not found"),
        (status = 409, description = "Campaign cannot be cancelled from its current status"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(campaign_id = %id))]
pub async fn cancel_campaign(State(state): State<AppState>, Path(id): Path<CampaignId>, _caller: ApiCaller) -> Result<Json<CampaignResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let campaign = load_campaign(&mut conn, id).await?;
    let cancelled = Campaigns::new(&mut conn)
        .cancel(id)
        .await?
        .ok_or_else(|| conflict(&campaign, "cancel"))?;

    tracing::info!(campaign_id = %id, "Campaign cancelled");
    Ok(Json(cancelled.into()))
}


#[cfg(all(test, feature = "postgres-tests"))]
mod db_tests {
    use super::*;
    use crate::db::models::recipients::RecipientStatus;
    use crate::precheck::SkipCode;
    use crate::test_utils::{TEST_AUTH, create_test_app, create_test_contact, create_test_template};
    use serde_json::json;
    use sqlx::PgPool;

    async fn draft_campaign(server: &axum_test::TestServer, pool: &PgPool, template_status: &str) -> CampaignResponse {
        let template = create_test_template(pool, template_status).await;
        server
            .post("/api/v1/campaigns")
            .add_header("authorization", TEST_AUTH)
            .json(&json!({
                "name": "Launch",
                "template_id": template.id,
                "variable_bindings": {"body.1": {"source": "contact_field", "value": "name", "fallback": "there"}}
            }))
            .await
            .json()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_precheck_start_and_lifecycle(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let campaign = draft_campaign(&server, &pool, "APPROVED").await;
        let good = create_test_contact(&pool, "+14155550100").await;
        let bad = create_test_contact(&pool, "12").await;

        let added: AddRecipientsResponse = server
            .post(&format!("/api/v1/campaigns/{}/recipients", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"contact_ids": [good.id, bad.id, uuid::Uuid::new_v4()]}))
            .await
            .json();
        assert_eq!(added.added, 2);
        assert_eq!(added.total, 2);

        let precheck: PrecheckResponse = server
            .post(&format!("/api/v1/campaigns/{}/precheck", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(precheck.report.summary.valid, 1);
        assert_eq!(precheck.report.summary.by_code.get(&SkipCode::InvalidPhone), Some(&1));
        assert_eq!(precheck.fix_queue.len(), 1);
        assert_eq!(precheck.fix_queue[0].contact_id, bad.id);

        let started: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/start", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(started.status, CampaignStatus::Sending);
        assert_eq!(started.counters.skipped, 1);

        let skipped: PaginatedResponse<RecipientResponse> = server
            .get(&format!("/api/v1/campaigns/{}/recipients?status=skipped", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(skipped.total_count, 1);
        assert_eq!(skipped.data[0].status, RecipientStatus::Skipped);
        assert_eq!(skipped.data[0].skip_code.as_deref(), Some("invalid_phone"));

        // Sending campaigns can be neither edited, cancelled nor started again
        for (method, path) in [("patch", ""), ("post", "/cancel"), ("post", "/start"), ("post", "/resume")] {
            let url = format!("/api/v1/campaigns/{}{}", campaign.id, path);
            let request = match method {
                "patch" => server.patch(&url).json(&json!({"name": "Renamed"})),
                _ => server.post(&url),
            };
            request.add_header("authorization", TEST_AUTH).await.assert_status(StatusCode::CONFLICT);
        }

        let paused: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/pause", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(paused.status, CampaignStatus::Paused);
        assert_eq!(paused.pause_reason.as_deref(), Some(DEFAULT_PAUSE_REASON));

        let resumed: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/resume", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(resumed.status, CampaignStatus::Sending);
        assert_eq!(resumed.pause_reason, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_start_requires_approved_template(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let campaign = draft_campaign(&server, &pool, "PENDING").await;

        server
            .post(&format!("/api/v1/campaigns/{}/precheck", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .assert_status_bad_request();
        server
            .post(&format!("/api/v1/campaigns/{}/start", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .assert_status_bad_request();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_schedule_unschedule_cancel(pool: PgPool) {
        let server = create_test_app(pool.clone()).await;
        let campaign = draft_campaign(&server, &pool, "APPROVED").await;
        let at = Utc::now() + chrono::Duration::hours(1);

        let scheduled: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/schedule", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"scheduled_at": at}))
            .await
            .json();
        assert_eq!(scheduled.status, CampaignStatus::Scheduled);
        assert!(scheduled.scheduled_at.is_some());

        server
            .post(&format!("/api/v1/campaigns/{}/schedule", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"scheduled_at": at}))
            .await
            .assert_status(StatusCode::CONFLICT);

        let draft: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/unschedule", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(draft.status, CampaignStatus::Draft);
        assert_eq!(draft.scheduled_at, None);

        let cancelled: CampaignResponse = server
            .post(&format!("/api/v1/campaigns/{}/cancel", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .json();
        assert_eq!(cancelled.status, CampaignStatus::Cancelled);

        server
            .delete(&format!("/api/v1/campaigns/{}", campaign.id))
            .add_header("authorization", TEST_AUTH)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_template_rejected(pool: PgPool) {
        let server = create_test_app(pool).await;

        server
            .post("/api/v1/campaigns")
            .add_header("authorization", TEST_AUTH)
            .json(&json!({"name": "Launch", "template_id": uuid::Uuid::new_v4()}))
            .await
            .assert_status_bad_request();
    }
}
