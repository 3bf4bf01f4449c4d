//! Campaign dispatch: promote, claim, send, process results, finalize.
//!
//! ```text
//! dispatcher.tick()
//!   ├─ promote_scheduled()
//!   │    └─ for each due scheduled campaign: lifecycle::start_campaign()
//!   ├─ drain_results()
//!   │    ├─ result_rx.try_recv() ◄──────────────────────────────────┐
//!   │    └─ for each result (and drop it from in_flight):            │
//!   │         ├─ Sent                 → mark_sent() + replay_parked()│
//!   │         ├─ rate limited/transient → mark_retry() or mark_failed() when out of attempts
//!   │         ├─ recipient/template   → mark_failed()                │
//!   │         ├─ auth                 → halt + pause campaign + release()
//!   │         └─ halted               → release()                    │
//!   ├─ refresh_halted()                                              │
//!   │    └─ DB: campaigns with in-flight sends that left `sending` ─► halted set
//!   ├─ claim_and_send()                                              │
//!   │    ├─ DB: Recipients::claim()            // at most the free channel slots,
//!   │    │                                     // FOR UPDATE SKIP LOCKED
//!   │    └─ for each claimed recipient not already in flight:        │
//!   │         ├─ CPU: precheck::resolve_for_send()                   │
//!   │         ├─ DB: skip_claimed()             // only if the contact no longer passes
//!   │         └─ send_tx.try_send(request) ─────────────────────┐    │
//!   │                                                            │    │
//!   │              ┌─────────────────────────────────────────────┘    │
//!   │              ▼                                                  │
//!   │         run_sender (spawned task):                              │
//!   │              ├─ recv from send_rx                               │
//!   │              ├─ acquire semaphore permit (caps concurrency)     │
//!   │              ├─ throttle.acquire()       (caps rate)            │
//!   │              ├─ halted campaign? report Halted without sending  │
//!   │              ├─ spawn WhatsAppClient::send_template()           │
//!   │              └─ result_tx.send(result) ─────────────────────────┘
//!   └─ finalize()
//!        ├─ refresh_counters() for every campaign touched this tick
//!        ├─ replay parked callbacks whose message id is now recorded, prune stale ones
//!        └─ finalize_finished()
//! ```
//!
//! The sender task has no DB access; it learns about paused or cancelled campaigns through the
//! shared halted set, refreshed every tick. A recipient is queued at most once per process: a
//! claim that lapses while the recipient waits in the channel is extended but not re-queued.
//! On shutdown, rows left in `sending` become claimable again once their claim window passes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashSet;
use metrics::counter;
use sqlx::PgPool;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::db::handlers::{Campaigns, Recipients};
use crate::db::models::recipients::ClaimedRecipient;
use crate::dispatch::{lifecycle, reconcile};
use crate::dispatch::throttle::AdaptiveThrottle;
use crate::precheck::{self, Candidate};
use crate::types::{CampaignId, RecipientId, abbrev_uuid};
use crate::whatsapp::WhatsAppClient;
use crate::whatsapp::errors::SendErrorKind;
use crate::whatsapp::payloads::{TemplateMessage, template_message};

/// How many due scheduled campaigns to promote per tick.
const PROMOTE_BATCH_SIZE: i64 = 10;

/// How many message ids with parked callbacks to replay per tick.
const REPLAY_BATCH_SIZE: i64 = 100;

// --- Channel types ---

#[derive(Debug)]
struct SendRequest {
    recipient_id: RecipientId,
    campaign_id: CampaignId,
    attempt_count: i32,
    message: TemplateMessage,
}

#[derive(Debug)]
enum SendOutcome {
    Sent { message_id: String },
    Failed { kind: SendErrorKind, code: Option<i64>, error: String },
    /// Not sent: the campaign stopped `sending` while the request was queued
    Halted,
}

#[derive(Debug)]
struct SendResult {
    recipient_id: RecipientId,
    campaign_id: CampaignId,
    attempt_count: i32,
    outcome: SendOutcome,
}

/// Delay before the next attempt, given how many attempts were made before the one that just
/// failed. `None` when the schedule is exhausted.
pub fn next_retry_delay(schedule: &[i64], attempt_count: i32) -> Option<i64> {
    let attempts_made = usize::try_from(attempt_count).unwrap_or(0) + 1;
    schedule.get(attempts_made).copied()
}

// --- Dispatcher ---

pub struct Dispatcher {
    pool: PgPool,
    send_tx: mpsc::Sender<SendRequest>,
    result_rx: mpsc::Receiver<SendResult>,
    retry_schedule: Vec<i64>,
    claim_batch_size: i64,
    claim_timeout_secs: i64,
    default_country_code: Option<String>,
    /// Recipients handed to the sender whose result has not come back yet
    in_flight: HashMap<RecipientId, CampaignId>,
    /// Campaigns whose queued sends must not go out; read by the sender before each send
    halted: Arc<DashSet<CampaignId>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its sender task.
    pub fn spawn(
        pool: PgPool,
        client: WhatsAppClient,
        config: &DispatchConfig,
        default_country_code: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        let (send_tx, send_rx) = mpsc::channel::<SendRequest>(config.channel_capacity);
        let (result_tx, result_rx) = mpsc::channel(config.channel_capacity);
        let throttle = Arc::new(AdaptiveThrottle::new(config.throttle.clone()));
        let halted = Arc::new(DashSet::new());

        tokio::spawn(run_sender(
            send_rx,
            result_tx,
            client,
            throttle,
            halted.clone(),
            config.max_concurrent_sends,
            shutdown,
        ));

        Self {
            pool,
            send_tx,
            result_rx,
            retry_schedule: config.retry_schedule_secs.clone(),
            claim_batch_size: config.claim_batch_size,
            claim_timeout_secs: i64::try_from(config.claim_timeout.as_secs()).unwrap_or(i64::MAX),
            default_country_code,
            in_flight: HashMap::new(),
            halted,
        }
    }

    /// Run one dispatch cycle.
    pub async fn tick(&mut self) {
        tracing::debug!("Campaign dispatcher tick");
        let mut touched = HashSet::new();
        self.promote_scheduled().await;
        self.drain_results(&mut touched).await;
        self.refresh_halted().await;
        self.claim_and_send(&mut touched).await;
        self.finalize(touched).await;
    }

    async fn promote_scheduled(&self) {
        let due = {
            let mut conn = match self.pool.acquire().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to acquire connection for scheduled campaigns");
                    return;
                }
            };
            match Campaigns::new(&mut conn).list_due_scheduled(PROMOTE_BATCH_SIZE).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to list due scheduled campaigns");
                    return;
                }
            }
        };

        for campaign_id in due {
            match lifecycle::start_campaign(&self.pool, campaign_id, self.default_country_code.as_deref()).await {
                Ok(_) => {
                    counter!("campaignd_campaigns_started_total", "trigger" => "schedule").increment(1);
                }
                Err(e) => {
                    // Stays scheduled; retried next tick until fixed or unscheduled
                    tracing::warn!(campaign_id = %campaign_id, error = %e, "Failed to start scheduled campaign");
                }
            }
        }
    }

    /// Publish which campaigns with queued sends have left `sending`.
    async fn refresh_halted(&self) {
        if self.in_flight.is_empty() {
            self.halted.clear();
            return;
        }

        let ids: Vec<CampaignId> = self.in_flight.values().copied().collect::<HashSet<_>>().into_iter().collect();
        let halted = {
            let mut conn = match self.pool.acquire().await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to acquire connection for campaign status check");
                    return;
                }
            };
            match Campaigns::new(&mut conn).halted_among(&ids).await {
                Ok(halted) => halted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to check status of campaigns with queued sends");
                    return;
                }
            }
        };

        self.halted.retain(|id| halted.contains(id));
        for campaign_id in halted {
            if self.halted.insert(campaign_id) {
                tracing::info!(campaign_id = %campaign_id, "Campaign stopped sending, dropping its queued sends");
            }
        }
    }

    /// Claim due recipients, build their messages, and push them to the sender.
    async fn claim_and_send(&mut self, touched: &mut HashSet<CampaignId>) {
        // Never claim more than the channel can take right now, so nothing claimed waits for
        // a slot while its claim runs out
        let room = self.send_tx.capacity();
        if room == 0 {
            tracing::debug!(in_flight = self.in_flight.len(), "Sender channel full, not claiming");
            return;
        }
        let limit = self.claim_batch_size.min(i64::try_from(room).unwrap_or(i64::MAX));

        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for recipient claims");
                return;
            }
        };

        let claimed = match Recipients::new(&mut conn).claim(limit, self.claim_timeout_secs).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to claim recipients");
                return;
            }
        };

        if claimed.is_empty() {
            tracing::debug!("No recipients to claim");
            return;
        }

        counter!("campaignd_recipients_claimed_total").increment(claimed.len() as u64);
        tracing::debug!(count = claimed.len(), "Claimed recipients for sending");

        for recipient in claimed {
            if self.in_flight.contains_key(&recipient.recipient_id) {
                // Claim lapsed while queued here; the queued request still owns the send
                tracing::debug!(
                    recipient_id = %abbrev_uuid(&recipient.recipient_id),
                    "Recipient already queued, extending claim only"
                );
                continue;
            }

            let message = match self.build_message(&recipient) {
                Ok(message) => message,
                Err(skip_code) => {
                    touched.insert(recipient.campaign_id);
                    tracing::info!(
                        recipient_id = %abbrev_uuid(&recipient.recipient_id),
                        skip_code,
                        "Recipient no longer passes precheck, skipping"
                    );
                    if let Err(e) = Recipients::new(&mut conn).skip_claimed(recipient.recipient_id, skip_code).await {
                        tracing::warn!(error = %e, recipient_id = %recipient.recipient_id, "Failed to skip recipient");
                    }
                    continue;
                }
            };

            let request = SendRequest {
                recipient_id: recipient.recipient_id,
                campaign_id: recipient.campaign_id,
                attempt_count: recipient.attempt_count,
                message,
            };

            match self.send_tx.try_send(request) {
                Ok(()) => {
                    self.in_flight.insert(recipient.recipient_id, recipient.campaign_id);
                }
                Err(e) => {
                    tracing::warn!(
                        recipient_id = %recipient.recipient_id,
                        "Failed to push to sender channel, releasing: {}",
                        e
                    );
                    if let Err(e) = Recipients::new(&mut conn).release(recipient.recipient_id).await {
                        // Reclaimed after the claim window instead
                        tracing::warn!(error = %e, recipient_id = %recipient.recipient_id, "Failed to release recipient");
                    }
                }
            }
        }
    }

    /// Resolve the recipient's variables against the contact as it is now.
    fn build_message(&self, recipient: &ClaimedRecipient) -> Result<TemplateMessage, &'static str> {
        let bindings = precheck::parse_bindings(&recipient.variable_bindings).map_err(|_| "unbound_variable")?;
        let candidate = Candidate::from_contact(&recipient.contact, Some(recipient.recipient_id));

        let (phone, variables): (String, BTreeMap<String, String>) = precheck::resolve_for_send(
            &recipient.template_components,
            &bindings,
            &candidate,
            self.default_country_code.as_deref(),
        )
        .map_err(|skip| skip.code.as_str())?;

        Ok(template_message(
            &phone,
            &recipient.template_name,
            &recipient.template_language,
            &recipient.template_components,
            &variables,
            Some(recipient.campaign_id.to_string()),
        ))
    }

    /// Drain completed send results and record them.
    async fn drain_results(&mut self, touched: &mut HashSet<CampaignId>) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for result drain");
                return;
            }
        };

        let mut drained = 0u32;
        while let Ok(result) = self.result_rx.try_recv() {
            drained += 1;
            touched.insert(result.campaign_id);
            let id = result.recipient_id;
            self.in_flight.remove(&id);

            match result.outcome {
                SendOutcome::Sent { ref message_id } => {
                    counter!("campaignd_sends_total", "outcome" => "sent").increment(1);
                    match Recipients::new(&mut conn).mark_sent(id, message_id).await {
                        Ok(true) => {
                            // Callbacks that raced the send; finalize() retries on failure
                            if let Err(e) = reconcile::replay_parked(&mut conn, message_id).await {
                                tracing::warn!(error = %e, message_id, "Failed to replay parked status callbacks");
                            }
                        }
                        Ok(false) => tracing::warn!(recipient_id = %id, message_id, "Recipient left sending before its result arrived"),
                        Err(e) => tracing::warn!(error = %e, recipient_id = %id, "Failed to mark recipient sent"),
                    }
                }
                SendOutcome::Failed { kind, code, ref error } => {
                    let error_code = code.and_then(|c| i32::try_from(c).ok());
                    let outcome = self.record_failure(&mut conn, &result, kind, error_code, error).await;
                    counter!("campaignd_sends_total", "outcome" => outcome).increment(1);
                    tracing::warn!(
                        recipient_id = %id,
                        campaign_id = %result.campaign_id,
                        kind = kind.as_str(),
                        code = ?code,
                        error = %error,
                        outcome,
                        "Send failed"
                    );
                }
                SendOutcome::Halted => {
                    counter!("campaignd_sends_total", "outcome" => "halted").increment(1);
                    tracing::debug!(recipient_id = %id, campaign_id = %result.campaign_id, "Queued send dropped for halted campaign");
                    if let Err(e) = Recipients::new(&mut conn).release(id).await {
                        tracing::warn!(error = %e, recipient_id = %id, "Failed to release recipient");
                    }
                }
            }
        }

        if drained > 0 {
            tracing::debug!(count = drained, in_flight = self.in_flight.len(), "Drained send results");
        }
    }

    /// Apply a failed send. Returns the outcome label.
    async fn record_failure(
        &self,
        conn: &mut sqlx::PgConnection,
        result: &SendResult,
        kind: SendErrorKind,
        error_code: Option<i32>,
        error: &str,
    ) -> &'static str {
        let id = result.recipient_id;

        let outcome = match kind {
            SendErrorKind::Auth => {
                // Stop the rest of this campaign's queue before the next status refresh
                self.halted.insert(result.campaign_id);
                let reason = format!("WhatsApp rejected the credentials: {error}");
                if let Err(e) = Campaigns::new(conn).pause(result.campaign_id, &reason).await {
                    tracing::warn!(error = %e, campaign_id = %result.campaign_id, "Failed to pause campaign");
                }
                Recipients::new(conn).release(id).await.map(|_| "paused")
            }
            kind if kind.is_retryable() => match next_retry_delay(&self.retry_schedule, result.attempt_count) {
                Some(delay) => Recipients::new(conn).mark_retry(id, error_code, error, delay).await.map(|_| "retry"),
                None => Recipients::new(conn).mark_failed(id, error_code, error).await.map(|_| "failed"),
            },
            _ => Recipients::new(conn).mark_failed(id, error_code, error).await.map(|_| "failed"),
        };

        outcome.unwrap_or_else(|e| {
            tracing::warn!(error = %e, recipient_id = %id, "Failed to record send failure");
            "error"
        })
    }

    async fn finalize(&self, touched: HashSet<CampaignId>) {
        let mut conn = match self.pool.acquire().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire connection for campaign finalization");
                return;
            }
        };

        for campaign_id in touched {
            if let Err(e) = Campaigns::new(&mut conn).refresh_counters(campaign_id).await {
                tracing::warn!(error = %e, campaign_id = %campaign_id, "Failed to refresh campaign counters");
            }
        }

        self.replay_recorded_callbacks(&mut conn).await;

        match Campaigns::new(&mut conn).finalize_finished().await {
            Ok(finished) => {
                for campaign in finished {
                    counter!("campaignd_campaigns_finished_total", "status" => campaign.status.clone()).increment(1);
                    tracing::info!(
                        campaign_id = %campaign.id,
                        status = %campaign.status,
                        sent = campaign.sent_count,
                        failed = campaign.failed_count,
                        skipped = campaign.skipped_count,
                        "Campaign finished"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to finalize campaigns"),
        }
    }

    /// Replay parked callbacks whose message id has since been recorded, and drop the ones that
    /// never matched a send.
    async fn replay_recorded_callbacks(&self, conn: &mut sqlx::PgConnection) {
        let message_ids = Recipients::new(conn)
            .parked_with_recipient(REPLAY_BATCH_SIZE)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to list parked status callbacks");
                Vec::new()
            });
        for message_id in message_ids {
            if let Err(e) = reconcile::replay_parked(conn, &message_id).await {
                tracing::warn!(error = %e, message_id, "Failed to replay parked status callbacks");
            }
        }

        match Recipients::new(conn).prune_parked(reconcile::PARKED_RETENTION_SECS).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!(pruned, "Dropped status callbacks that never matched a send"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune parked status callbacks"),
        }
    }
}

// --- Sender task ---

/// Long-lived task that receives built messages and sends them. Has no DB access.
async fn run_sender(
    mut rx: mpsc::Receiver<SendRequest>,
    result_tx: mpsc::Sender<SendResult>,
    client: WhatsAppClient,
    throttle: Arc<AdaptiveThrottle>,
    halted: Arc<DashSet<CampaignId>>,
    max_concurrent_sends: usize,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_sends));

    loop {
        let request = tokio::select! {
            req = rx.recv() => {
                match req {
                    Some(r) => r,
                    None => {
                        tracing::debug!("Sender channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("Sender received shutdown signal");
                break;
            }
        };

        if halted.contains(&request.campaign_id) {
            report_halted(&result_tx, request).await;
            continue;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("Sender semaphore closed");
                break;
            }
        };

        tokio::select! {
            _ = throttle.acquire() => {}
            _ = shutdown.cancelled() => {
                tracing::debug!("Sender received shutdown signal while throttled");
                break;
            }
        }

        // The campaign may have been paused while this request waited for its slot
        if halted.contains(&request.campaign_id) {
            drop(permit);
            report_halted(&result_tx, request).await;
            continue;
        }

        let client = client.clone();
        let throttle = throttle.clone();
        let tx = result_tx.clone();

        tokio::spawn(async move {
            let _permit = permit;

            tracing::debug!(
                recipient_id = %request.recipient_id,
                attempt = request.attempt_count,
                "Sending template message"
            );

            let outcome = match client.send_template(&request.message).await {
                Ok(message_id) => {
                    throttle.on_success();
                    SendOutcome::Sent { message_id }
                }
                Err(e) => {
                    let kind = e.kind();
                    if kind == SendErrorKind::RateLimited {
                        throttle.on_rate_limited();
                    }
                    SendOutcome::Failed {
                        kind,
                        code: e.code(),
                        error: e.to_string(),
                    }
                }
            };

            let result = SendResult {
                recipient_id: request.recipient_id,
                campaign_id: request.campaign_id,
                attempt_count: request.attempt_count,
                outcome,
            };

            if let Err(e) = tx.send(result).await {
                tracing::warn!(recipient_id = %request.recipient_id, "Failed to send result back: {}", e);
            }
        });
    }

    tracing::debug!("Sender task exited");
}

async fn report_halted(result_tx: &mpsc::Sender<SendResult>, request: SendRequest) {
    let result = SendResult {
        recipient_id: request.recipient_id,
        campaign_id: request.campaign_id,
        attempt_count: request.attempt_count,
        outcome: SendOutcome::Halted,
    };
    if let Err(e) = result_tx.send(result).await {
        tracing::warn!(recipient_id = %request.recipient_id, "Failed to send result back: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ThrottleConfig, WhatsAppConfig};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> WhatsAppClient {
        WhatsAppClient::new(&WhatsAppConfig {
            base_url: server.uri().parse().unwrap(),
            phone_number_id: Some("PHONE1".to_string()),
            access_token: Some("token".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    async fn start_sender(server: &MockServer) -> (mpsc::Sender<SendRequest>, mpsc::Receiver<SendResult>, Arc<AdaptiveThrottle>, CancellationToken) {
        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, result_rx) = mpsc::channel(10);
        let throttle = Arc::new(AdaptiveThrottle::new(ThrottleConfig {
            initial_rate: 50.0,
            max_rate: 100.0,
            ..Default::default()
        }));
        let shutdown = CancellationToken::new();

        tokio::spawn(run_sender(
            send_rx,
            result_tx,
            client(server),
            throttle.clone(),
            Arc::new(DashSet::new()),
            4,
            shutdown.clone(),
        ));
        (send_tx, result_rx, throttle, shutdown)
    }

    fn request(attempt: i32) -> SendRequest {
        let components = json!([{"type": "BODY", "text": "Hi"}]);
        SendRequest {
            recipient_id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            attempt_count: attempt,
            message: template_message("+14155550123", "hello", "en", &components, &BTreeMap::new(), None),
        }
    }

    #[test]
    fn test_next_retry_delay() {
        let schedule = [0, 30, 120];
        assert_eq!(next_retry_delay(&schedule, 0), Some(30));
        assert_eq!(next_retry_delay(&schedule, 1), Some(120));
        assert_eq!(next_retry_delay(&schedule, 2), None);
        assert_eq!(next_retry_delay(&[0], 0), None);
    }

    #[tokio::test]
    async fn test_successful_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v21.0/PHONE1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.OK"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let (send_tx, mut result_rx, _, shutdown) = start_sender(&server).await;
        let req = request(0);
        let (recipient_id, campaign_id) = (req.recipient_id, req.campaign_id);
        send_tx.send(req).await.unwrap();

        let result = result_rx.recv().await.unwrap();
        assert_eq!(result.recipient_id, recipient_id);
        assert_eq!(result.campaign_id, campaign_id);
        assert!(matches!(result.outcome, SendOutcome::Sent { ref message_id } if message_id == "wamid.OK"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_rate_limited_send_slows_throttle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "(#130429) Rate limit hit", "code": 130429}
            })))
            .mount(&server)
            .await;

        let (send_tx, mut result_rx, throttle, shutdown) = start_sender(&server).await;
        send_tx.send(request(2)).await.unwrap();

        let result = result_rx.recv().await.unwrap();
        assert_eq!(result.attempt_count, 2);
        assert!(matches!(
            result.outcome,
            SendOutcome::Failed {
                kind: SendErrorKind::RateLimited,
                code: Some(130429),
                ..
            }
        ));
        assert_eq!(throttle.rate(), 25.0);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_network_error_is_transient() {
        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, mut result_rx) = mpsc::channel(10);
        let client = WhatsAppClient::new(&WhatsAppConfig {
            base_url: "http://127.0.0.1:1".parse().unwrap(),
            phone_number_id: Some("PHONE1".to_string()),
            access_token: Some("token".to_string()),
            ..Default::default()
        })
        .unwrap();
        let throttle = Arc::new(AdaptiveThrottle::new(ThrottleConfig::default()));
        let shutdown = CancellationToken::new();
        tokio::spawn(run_sender(send_rx, result_tx, client, throttle, Arc::new(DashSet::new()), 4, shutdown.clone()));

        send_tx.send(request(0)).await.unwrap();
        let result = result_rx.recv().await.unwrap();
        assert!(matches!(
            result.outcome,
            SendOutcome::Failed {
                kind: SendErrorKind::Transient,
                code: None,
                ..
            }
        ));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_halted_campaign_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "wamid.OK"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, mut result_rx) = mpsc::channel(10);
        let throttle = Arc::new(AdaptiveThrottle::new(ThrottleConfig {
            initial_rate: 50.0,
            max_rate: 100.0,
            ..Default::default()
        }));
        let halted = Arc::new(DashSet::new());
        let shutdown = CancellationToken::new();
        tokio::spawn(run_sender(send_rx, result_tx, client(&server), throttle, halted.clone(), 4, shutdown.clone()));

        let paused = request(0);
        let running = request(0);
        halted.insert(paused.campaign_id);
        let (paused_id, running_id) = (paused.recipient_id, running.recipient_id);
        send_tx.send(paused).await.unwrap();
        send_tx.send(running).await.unwrap();

        let mut outcomes = HashMap::new();
        for _ in 0..2 {
            let result = result_rx.recv().await.unwrap();
            outcomes.insert(result.recipient_id, result.outcome);
        }
        assert!(matches!(outcomes[&paused_id], SendOutcome::Halted));
        assert!(matches!(outcomes[&running_id], SendOutcome::Sent { .. }));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_sender_exits_on_channel_close() {
        let server = MockServer::start().await;
        let (send_tx, send_rx) = mpsc::channel(10);
        let (result_tx, _result_rx) = mpsc::channel(10);
        let throttle = Arc::new(AdaptiveThrottle::new(ThrottleConfig::default()));

        let handle = tokio::spawn(run_sender(
            send_rx,
            result_tx,
            client(&server),
            throttle,
            Arc::new(DashSet::new()),
            4,
            CancellationToken::new(),
        ));
        drop(send_tx);

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sender should exit when channel closes")
            .expect("sender should not panic");
    }
}
