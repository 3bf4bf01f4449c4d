//! WhatsApp Cloud API webhook: subscription handshake, delivery statuses and flow replies.
//!
//! Meta retries a delivery until it gets a 2xx, so anything that failed for a transient reason
//! (the database) answers 500 and is applied again on redelivery. Applying twice is harmless:
//! statuses only move forward and submissions are unique per message id.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::instrument;

use crate::{
    AppState,
    db::{handlers::Flows, models::flows::FlowSubmissionCreateDBRequest},
    dispatch::reconcile::{self, ReconcileOutcome},
    errors::{Error, Result},
    flows::flow_id_from_token,
    whatsapp::{
        signing::{SIGNATURE_HEADER, verify_signature},
        webhook::{VerifyQuery, WebhookPayload},
    },
};

const BUSINESS_ACCOUNT_OBJECT: &str = "whatsapp_business_account";

#[utoipa::path(
    get,
    path = "/webhooks/whatsapp",
    tag = "webhooks",
    summary = "Webhook verification",
    description = "Subscription handshake. Echoes `hub.challenge` when `hub.mode` is `subscribe` and `hub.verify_token` \
                   matches the configured verify token.",
    params(VerifyQuery),
    responses(
        (status = 200, description = "Challenge echoed", body = String, content_type = "text/plain"),
        (status = 403, description = "Token mismatch or no verify token configured"),
    )
)]
#[instrument(skip_all)]
pub async fn verify_webhook(State(state): State<AppState>, Query(query): Query<VerifyQuery>) -> Response {
    match query.accept(state.config.whatsapp.verify_token.as_deref()) {
        Some(challenge) => {
            tracing::info!("WhatsApp webhook subscription verified");
            (StatusCode::OK, challenge.to_string()).into_response()
        }
        None => {
            tracing::warn!(mode = ?query.mode, "Rejected WhatsApp webhook verification");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/whatsapp",
    tag = "webhooks",
    summary = "Webhook notifications",
    description = "Delivery status callbacks and inbound messages. When an app secret is configured the body must carry a \
                   valid `X-Hub-Signature-256`. Statuses are applied to campaign recipients; completed flows are stored \
                   as submissions. Everything else is acknowledged and ignored.",
    request_body(content = Object, content_type = "application/json"),
    responses(
        (status = 200, description = "Notification processed"),
        (status = 400, description = "Body is not a webhook payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 500, description = "Processing failed; Meta will redeliver"),
    )
)]
#[instrument(skip_all)]
pub async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode> {
    if let Some(secret) = state.config.whatsapp.app_secret.as_deref() {
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            counter!("campaignd_webhook_requests_total", "outcome" => "bad_signature").increment(1);
            return Err(Error::Unauthenticated {
                message: Some("Invalid webhook signature".to_string()),
            });
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        counter!("campaignd_webhook_requests_total", "outcome" => "malformed").increment(1);
        Error::BadRequest {
            message: format!("Invalid webhook payload: {e}"),
        }
    })?;

    if payload.object != BUSINESS_ACCOUNT_OBJECT {
        tracing::debug!(object = %payload.object, "Ignoring webhook for another object type");
        counter!("campaignd_webhook_requests_total", "outcome" => "ignored").increment(1);
        return Ok(StatusCode::OK);
    }

    let events = payload.status_events();
    let replies = payload.flow_replies();
    if events.is_empty() && replies.is_empty() {
        counter!("campaignd_webhook_requests_total", "outcome" => "ignored").increment(1);
        return Ok(StatusCode::OK);
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let mut applied = 0;
    for event in &events {
        if let ReconcileOutcome::Applied(_) = reconcile::apply_status(&mut conn, event).await? {
            applied += 1;
        }
    }

    let mut stored = 0;
    for reply in replies {
        let flow_id = reply.flow_token.as_deref().and_then(flow_id_from_token);
        let contact_phone = if reply.from.starts_with('+') {
            reply.from
        } else {
            format!("+{}", reply.from)
        };

        let request = FlowSubmissionCreateDBRequest {
            flow_id,
            contact_phone,
            flow_token: reply.flow_token,
            response: reply.response,
            message_id: reply.message_id,
        };
        if Flows::new(&mut conn).record_submission(&request).await?.is_some() {
            stored += 1;
        } else {
            tracing::debug!(message_id = %request.message_id, "Duplicate flow submission ignored");
        }
    }

    counter!("campaignd_webhook_requests_total", "outcome" => "processed").increment(1);
    tracing::debug!(statuses = events.len(), applied, submissions = stored, "Processed WhatsApp webhook");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_lazy_test_server, create_test_config};
    use crate::whatsapp::signing::{SIGNATURE_HEADER, sign};
    use axum::http::StatusCode;
    use serde_json::json;

    fn server_with_secrets() -> axum_test::TestServer {
        let mut config = create_test_config();
        config.whatsapp.verify_token = Some("verify-me".to_string());
        config.whatsapp.app_secret = Some("app-secret".to_string());
        create_lazy_test_server(config)
    }

    #[tokio::test]
    async fn test_handshake() {
        let server = server_with_secrets();

        let response = server
            .get("/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
            .await;
        response.assert_status_ok();
        response.assert_text("1158201444");

        server
            .get("/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=1")
            .await
            .assert_status(StatusCode::FORBIDDEN);
        server
            .get("/webhooks/whatsapp?hub.mode=unsubscribe&hub.verify_token=verify-me&hub.challenge=1")
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_handshake_without_configured_token() {
        let server = create_lazy_test_server(create_test_config());

        server
            .get("/webhooks/whatsapp?hub.mode=subscribe&hub.verify_token=&hub.challenge=1")
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_signature_required_when_secret_configured() {
        let server = server_with_secrets();
        let body = json!({"object": "whatsapp_business_account", "entry": []}).to_string();

        server
            .post("/webhooks/whatsapp")
            .content_type("application/json")
            .text(body.clone())
            .await
            .assert_status_unauthorized();

        server
            .post("/webhooks/whatsapp")
            .content_type("application/json")
            .add_header(SIGNATURE_HEADER, sign("other-secret", body.as_bytes()))
            .text(body.clone())
            .await
            .assert_status_unauthorized();

        // No statuses or messages, so nothing touches the database
        server
            .post("/webhooks/whatsapp")
            .content_type("application/json")
            .add_header(SIGNATURE_HEADER, sign("app-secret", body.as_bytes()))
            .text(body)
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_payloads() {
        let server = create_lazy_test_server(create_test_config());

        server
            .post("/webhooks/whatsapp")
            .content_type("application/json")
            .text("not json")
            .await
            .assert_status_bad_request();

        server
            .post("/webhooks/whatsapp")
            .json(&json!({"object": "page", "entry": [{"id": "1", "changes": []}]}))
            .await
            .assert_status_ok();
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod db_tests {
    use crate::db::handlers::{Campaigns, Flows, Recipients, Repository};
    use crate::db::models::flows::FlowCreateDBRequest;
    use crate::db::models::recipients::RecipientStatus;
    use crate::dispatch::lifecycle::start_campaign;
    use crate::test_utils::{create_test_app, create_test_campaign, create_test_contact, create_test_template};
    use serde_json::json;
    use sqlx::PgPool;

    fn envelope(value: serde_json::Value) -> serde_json::Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{"id": "WABA1", "changes": [{"field": "messages", "value": value}]}]
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delivery_status_updates_recipient(pool: PgPool) {
        let template = create_test_template(&pool, "APPROVED").await;
        let campaign = create_test_campaign(&pool, template.id).await;
        let contact = create_test_contact(&pool, "+14155550100").await;
        let mut conn = pool.acquire().await.unwrap();
        Recipients::new(&mut conn).add_contacts(campaign.id, &[contact.id]).await.unwrap();
        start_campaign(&pool, campaign.id, None).await.unwrap();
        let claimed = Recipients::new(&mut conn).claim(10, 60).await.unwrap();
        Recipients::new(&mut conn).mark_sent(claimed[0].recipient_id, "wamid.W1").await.unwrap();

        let server = create_test_app(pool.clone()).await;
        let body = envelope(json!({"statuses": [
            {"id": "wamid.W1", "status": "delivered", "timestamp": "1700000000",
             "biz_opaque_callback_data": campaign.id.to_string()},
            {"id": "wamid.W1", "status": "delivered", "timestamp": "1700000000"}
        ]}));
        server.post("/webhooks/whatsapp").json(&body).await.assert_status_ok();

        let recipient = Recipients::new(&mut conn).get_by_message_id("wamid.W1").await.unwrap().unwrap();
        assert_eq!(recipient.recipient_status(), RecipientStatus::Delivered);
        let campaign = Campaigns::new(&mut conn).get_by_id(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.delivered_count, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_flow_reply_stored_once(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let flow = Flows::new(&mut conn)
            .create(&FlowCreateDBRequest {
                name: "signup".to_string(),
                definition: json!({"screens": [{"id": "DONE", "terminal": true}]}),
            })
            .await
            .unwrap();

        let server = create_test_app(pool.clone()).await;
        let response_json = json!({"flow_token": format!("{}:contact-1", flow.id), "email": "ada@example.com"}).to_string();
        let body = envelope(json!({"messages": [
            {"from": "14155550100", "id": "wamid.F1", "type": "interactive",
             "interactive": {"type": "nfm_reply", "nfm_reply": {"name": "flow", "response_json": response_json}}}
        ]}));

        for _ in 0..2 {
            server.post("/webhooks/whatsapp").json(&body).await.assert_status_ok();
        }

        let submissions = Flows::new(&mut conn).list_submissions(flow.id, 0, 10).await.unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].contact_phone, "+14155550100");
        assert_eq!(submissions[0].response["email"], "ada@example.com");
    }
}
