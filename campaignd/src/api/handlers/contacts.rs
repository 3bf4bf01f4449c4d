//! HTTP handlers for contact management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::{
        contacts::{ContactCreate, ContactResponse, ContactUpdate, ListContactsQuery},
        pagination::{PaginatedResponse, Pagination},
    },
    auth::ApiCaller,
    db::{
        handlers::{Contacts, Repository},
        models::contacts::{ContactFilter, OptInStatus},
    },
    errors::{Error, Result},
    types::ContactId,
};

fn not_found(id: ContactId) -> Error {
    Error::NotFound {
        resource: "Contact".to_string(),
        id: id.to_string(),
    }
}

fn validate_phone(phone: &str) -> Result<()> {
    if phone.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "Phone number cannot be empty".to_string(),
        });
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/contacts",
    tag = "contacts",
    summary = "List contacts",
    description = "List contacts, optionally filtered by tag, opt-in status or a name/phone search.",
    params(Pagination, ListContactsQuery),
    responses(
        (status = 200, description = "Page of contacts", body = PaginatedResponse<ContactResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(query): Query<ListContactsQuery>,
    _caller: ApiCaller,
) -> Result<Json<PaginatedResponse<ContactResponse>>> {
    let (skip, limit) = pagination.params();
    let filter = ContactFilter {
        skip,
        limit,
        tag: query.tag,
        opt_in_status: query.opt_in_status,
        search: query.search,
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Contacts::new(&mut conn);
    let contacts = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        contacts.into_iter().map(Into::into).collect(),
        total_count,
        skip,
        limit,
    )))
}

#[utoipa::path(
    post,
    path = "/contacts",
    tag = "contacts",
    summary = "Create contact",
    request_body = ContactCreate,
    responses(
        (status = 201, description = "Contact created", body = ContactResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn create_contact(
    State(state): State<AppState>,
    _caller: ApiCaller,
    Json(request): Json<ContactCreate>,
) -> Result<(StatusCode, Json<ContactResponse>)> {
    validate_phone(&request.phone)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let contact = Contacts::new(&mut conn).create(&request.into()).await?;

    Ok((StatusCode::CREATED, Json(contact.into())))
}

#[utoipa::path(
    get,
    path = "/contacts/{id}",
    tag = "contacts",
    summary = "Get contact",
    params(("id" = uuid::Uuid, Path, description = "Contact ID")),
    responses(
        (status = 200, description = "Contact details", body = ContactResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Contact not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(contact_id = %id))]
pub async fn get_contact(State(state): State<AppState>, Path(id): Path<ContactId>, _caller: ApiCaller) -> Result<Json<ContactResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let contact = Contacts::new(&mut conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    Ok(Json(contact.into()))
}

#[utoipa::path(
    patch,
    path = "/contacts/{id}",
    tag = "contacts",
    summary = "Update contact",
    description = "Partial update. `custom_fields` is merged into the stored fields; a `null` value removes that key. \
                   This is how flagged recipients from a precheck are fixed.",
    params(("id" = uuid::Uuid, Path, description = "Contact ID")),
    request_body = ContactUpdate,
    responses(
        (status = 200, description = "Contact updated", body = ContactResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Contact not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(contact_id = %id))]
pub async fn update_contact(
    State(state): State<AppState>,
    Path(id): Path<ContactId>,
    _caller: ApiCaller,
    Json(request): Json<ContactUpdate>,
) -> Result<Json<ContactResponse>> {
    if let Some(phone) = &request.phone {
        validate_phone(phone)?;
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let contact = Contacts::new(&mut conn).update(id, &request.into()).await.map_err(|e| match e {
        crate::db::errors::DbError::NotFound => not_found(id),
        other => other.into(),
    })?;

    Ok(Json(contact.into()))
}

#[utoipa::path(
    delete,
    path = "/contacts/{id}",
    tag = "contacts",
    summary = "Delete contact",
    description = "Delete a contact. It is removed from every campaign it was a recipient of.",
    params(("id" = uuid::Uuid, Path, description = "Contact ID")),
    responses(
        (status = 204, description = "Contact deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Contact not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(contact_id = %id))]
pub async fn delete_contact(State(state): State<AppState>, Path(id): Path<ContactId>, _caller: ApiCaller) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Contacts::new(&mut conn).delete(id).await? {
        return Err(not_found(id));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn set_opt_in(state: &AppState, id: ContactId, status: OptInStatus) -> Result<Json<ContactResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let contact = Contacts::new(&mut conn).set_opt_in(id, status).await.map_err(|e| match e {
        crate::db::errors::DbError::NotFound => not_found(id),
        other => other.into(),
    })?;

    tracing::info!(contact_id = %id, status = status.as_str(), "Contact opt-in changed");
    Ok(Json(contact.into()))
}

#[utoipa::path(
    post,
    path = "/contacts/{id}/opt-out",
    tag = "contacts",
    summary = "Opt contact out",
    description = "Record that the contact does not want marketing messages. Campaigns skip opted-out contacts at precheck and at send time.",
    params(("id" = uuid::Uuid, Path, description = "Contact ID")),
    responses(
        (status = 200, description = "Contact updated", body = ContactResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Contact not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(contact_id = %id))]
pub async fn opt_out_contact(State(state): State<AppState>, Path(id): Path<ContactId>, _caller: ApiCaller) -> Result<Json<ContactResponse>> {
    set_opt_in(&state, id, OptInStatus::OptedOut).await
}

#[utoipa::path(
    post,
    path = "/contacts/{id}/opt-in",
    tag = "contacts",
    summary = "Opt contact in",
    params(("id" = uuid::Uuid, Path, description = "Contact ID")),
    responses(
        (status = 200, description = "Contact updated", body = ContactResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Contact not found"),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all, fields(contact_id = %id))]
pub async fn opt_in_contact(State(state): State<AppState>, Path(id): Path<ContactId>, _caller: ApiCaller) -> Result<Json<ContactResponse>> {
    set_opt_in(&state, id, OptInStatus::OptedIn).await
}
