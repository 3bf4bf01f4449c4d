//! HTTP handlers for message template endpoints, including sync with Meta.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        pagination::{PaginatedResponse, Pagination},
        templates::{ListTemplatesQuery, TemplateCreate, TemplateResponse, TemplateSyncResponse, is_valid_template_name},
    },
    auth::ApiCaller,
    db::{
        errors::DbError,
        handlers::{Repository, Templates, templates::TemplateUpdateDBRequest},
        models::templates::{TemplateCategory, TemplateCreateDBRequest, TemplateFilter, TemplateStatus},
    },
    errors::{Error, Result},
    types::TemplateId,
    whatsapp::payloads::CreateTemplate,
};

fn not_found(id: TemplateId) -> Error {
    Error::NotFound {
        resource: "Template".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/templates",
    tag = "templates",
    summary = "List templates",
    params(Pagination, ListTemplatesQuery),
    responses(
        (status = 200, description = "Page of templates", body = PaginatedResponse<TemplateResponse>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_templates(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(query): Query<ListTemplatesQuery>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<TemplateResponse>>> {
    let (skip, limit) = pagination.params();
    let filter = TemplateFilter {
        skip,
        limit,
        status: query.status,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Templates::new(&mut conn);
    let templates = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        templates.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/templates",
    tag = "templates",
    summary = "Create template",
    description = "Register a template. Without `external_id` it is stored as a `DRAFT`; submit it to Meta for review with \
                   `POST /templates/{id}/submit`.",
    request_body = TemplateCreate,
    responses(
        (status = 201, description = "Template created", body = TemplateResponse),
        (status = 400, description = "Invalid name or components"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "A template with this name and language already exists"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn create_template(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Json(request): Json<TemplateCreate>,
) -> Result<(StatusCode, Json<TemplateResponse>)> {
    if !is_valid_template_name(&request.name) {
        return Err(Error::BadRequest {
            message: "Template name may only contain lowercase letters, digits and underscores".to_string(),
        });
    }
    if request.language.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Template language cannot be empty".to_string(),
        });
    }
    if !request.components.is_array() {
        return Err(Error::BadRequest {
            message: "Template components must be an array".to_string(),
        });
    }

    let status = match request.external_id {
        Some(_) => request.status.unwrap_or(TemplateStatus::Pending),
        None => TemplateStatus::Draft,
    };
    let db_request = TemplateCreateDBRequest {
        name: request.name,
        language: request.language,
        category: request.category,
        status,
        components: request.components,
        external_id: request.external_id,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let template = Templates::new(&mut conn).create(&db_request).await?;

    Ok((StatusCode::CREATED, Json(template.into())))
}

#[utoipa::path(
    get,
    path = "/templates/{id}",
    tag = "templates",
    summary = "Get template",
    params(("id" = uuid::Uuid, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template details", body = TemplateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Template not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(template_id = %id))]
pub async fn get_template(State(state): State<AppState>, Path(id): Path<TemplateId>, _caller: ApiCaller) -> Result<Json<TemplateResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let template = Templates::new(&mut conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    Ok(Json(template.into()))
}

#[utoipa::path(
    delete,
    path = "/templates/{id}",
    tag = "templates",
    summary = "Delete template",
    description = "Delete a local template. Templates referenced by a campaign cannot be deleted. The template is not removed at Meta.",
    params(("id" = uuid::Uuid, Path, description = "Template ID")),
    responses(
        (status = 204, description = "Template deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "Template is used by a campaign"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(template_id = %id))]
pub async fn delete_template(State(state): State<AppState>, Path(id): Path<TemplateId>, _caller: ApiCaller) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Templates::new(&mut tx);

    if repo.is_in_use(id).await? {
        return Err(Error::Conflict {
            message: format!("Template {id} is used by at least one campaign"),
        });
    }
    if !repo.delete(id).await? {
        return Err(not_found(id));
    }
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/templates/sync",
    tag = "templates",
    summary = "Sync templates from Meta",
    description = "Pull every template of the business account and upsert it by name and language, refreshing status and components.",
    responses(
        (status = 200, description = "Sync finished", body = TemplateSyncResponse),
        (status = 400, description = "WhatsApp integration is not configured"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "WhatsApp API error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn sync_templates(State(state): State<AppState>, _caller: ApiCaller) -> Result<Json<TemplateSyncResponse>> {
    let remote = state.whatsapp.list_templates().await?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Templates::new(&mut tx);
    let mut synced = 0;
    let mut skipped = 0;

    for template in remote {
        let Ok(category) = template.category.parse::<TemplateCategory>() else {
            tracing::debug!(name = %template.name, category = %template.category, "Skipping template with unsupported category");
            skipped += 1;
            continue;
        };

        repo.upsert(&TemplateCreateDBRequest {
            status: TemplateStatus::from_graph(&template.status),
            name: template.name,
            language: template.language,
            category,
            components: template.components,
            external_id: Some(template.id),
        })
        .await?;
        synced += 1;
    }
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    tracing::info!(synced, skipped, "Synced templates from WhatsApp");
    Ok(Json(TemplateSyncResponse { synced, skipped }))
}

#[utoipa::path(
    post,
    path = "/templates/{id}/submit",
    tag = "templates",
    summary = "Submit template for review",
    description = "Create the template at Meta and store the id and review status it returns. Only drafts and rejected templates can be submitted.",
    params(("id" = uuid::Uuid, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template submitted", body = TemplateResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "Template was already submitted"),
        (status = 502, description = "WhatsApp API error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(template_id = %id))]
pub async fn submit_template(State(state): State<AppState>, Path(id): Path<TemplateId>, _caller: ApiCaller) -> Result<Json<TemplateResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let template = Templates::new(&mut conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    let status = template.template_status();
    if !matches!(status, TemplateStatus::Draft | TemplateStatus::Rejected) {
        return Err(Error::Conflict {
            message: format!("Template {id} is {} and cannot be submitted again", status.as_str()),
        });
    }

    let created = state
        .whatsapp
        .create_template(&CreateTemplate {
            name: &template.name,
            language: &template.language,
            category: &template.category,
            components: &template.components,
        })
        .await?;

    let update = TemplateUpdateDBRequest {
        status: Some(TemplateStatus::from_graph(&created.status)),
        external_id: Some(created.id),
        components: None,
    };
    let template = Templates::new(&mut conn).update(id, &update).await.map_err(|e| match e {
        DbError::NotFound => not_found(id),
        other => other.into(),
    })?;

    tracing::info!(template_id = %id, status = %template.status, "Template submitted for review");
    Ok(Json(template.into()))
}
