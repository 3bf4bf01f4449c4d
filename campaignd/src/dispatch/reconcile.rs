//! Delivery status reconciliation.
//!
//! Status callbacks arrive out of order, duplicated, and sometimes before the dispatcher has
//! recorded the message id. Each one is applied only if it moves the recipient forward. A
//! callback for a message id no recipient carries yet is parked and replayed by
//! [`replay_parked`] once the send is recorded.

use metrics::counter;
use sqlx::{Connection, PgConnection};

use crate::db::errors::Result;
use crate::db::handlers::{Campaigns, Recipients};
use crate::types::{CampaignId, abbrev_uuid};
use crate::whatsapp::webhook::StatusEvent;

/// How long a parked callback waits for its message id before it is dropped.
pub const PARKED_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The recipient moved forward; counters were refreshed
    Applied(CampaignId),
    /// Known message, but a duplicate or a regression
    Ignored,
    /// No recipient carries this message id yet
    Parked,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Ignored => "ignored",
            Self::Parked => "parked",
        }
    }
}

pub async fn apply_status(conn: &mut PgConnection, event: &StatusEvent) -> Result<ReconcileOutcome> {
    let outcome = match apply(conn, event).await? {
        Some(campaign_id) => ReconcileOutcome::Applied(campaign_id),
        None if Recipients::new(conn).get_by_message_id(&event.message_id).await?.is_some() => ReconcileOutcome::Ignored,
        None => park(conn, event).await?,
    };

    counter!("campaignd_status_callbacks_total", "outcome" => outcome.label()).increment(1);
    match outcome {
        ReconcileOutcome::Applied(campaign_id) => tracing::debug!(
            message_id = %event.message_id,
            campaign_id = %abbrev_uuid(&campaign_id),
            status = event.status.as_str(),
            "Applied status callback"
        ),
        ReconcileOutcome::Ignored => tracing::debug!(
            message_id = %event.message_id,
            status = event.status.as_str(),
            "Ignored duplicate or out-of-order status callback"
        ),
        ReconcileOutcome::Parked => tracing::info!(
            message_id = %event.message_id,
            status = event.status.as_str(),
            "Parked status callback for a message not recorded yet"
        ),
    }

    Ok(outcome)
}

async fn apply(conn: &mut PgConnection, event: &StatusEvent) -> Result<Option<CampaignId>> {
    let applied = Recipients::new(conn)
        .apply_callback(
            &event.message_id,
            event.campaign_id,
            event.status,
            event.at,
            event.error_code,
            event.error.as_deref(),
        )
        .await?;

    if let Some(campaign_id) = applied {
        Campaigns::new(conn).refresh_counters(campaign_id).await?;
    }
    Ok(applied)
}

/// Park the callback, then look for the message again. If the send was recorded in between,
/// its replay may have run before the park was visible, so replay here instead.
async fn park(conn: &mut PgConnection, event: &StatusEvent) -> Result<ReconcileOutcome> {
    Recipients::new(conn)
        .park_callback(
            &event.message_id,
            event.campaign_id,
            event.status,
            event.at,
            event.error_code,
            event.error.as_deref(),
        )
        .await?;

    let Some(recipient) = Recipients::new(conn).get_by_message_id(&event.message_id).await? else {
        return Ok(ReconcileOutcome::Parked);
    };

    Ok(if replay_parked(conn, &event.message_id).await? > 0 {
        ReconcileOutcome::Applied(recipient.campaign_id)
    } else {
        ReconcileOutcome::Ignored
    })
}

/// Apply the callbacks parked for `message_id`, oldest first. Returns how many moved the
/// recipient forward.
pub async fn replay_parked(conn: &mut PgConnection, message_id: &str) -> Result<usize> {
    let mut tx = conn.begin().await?;
    let parked = Recipients::new(&mut tx).take_parked(message_id).await?;
    if parked.is_empty() {
        return Ok(0);
    }

    let mut applied = 0;
    let mut touched = None;
    for callback in &parked {
        let Some(status) = callback.callback_status() else {
            continue;
        };
        let updated = Recipients::new(&mut tx)
            .apply_callback(
                &callback.message_id,
                callback.campaign_id,
                status,
                callback.occurred_at,
                callback.error_code,
                callback.error.as_deref(),
            )
            .await?;
        if updated.is_some() {
            applied += 1;
            touched = updated;
        }
    }

    if let Some(campaign_id) = touched {
        Campaigns::new(&mut tx).refresh_counters(campaign_id).await?;
    }
    tx.commit().await?;

    counter!("campaignd_status_callbacks_total", "outcome" => "replayed").increment(applied as u64);
    tracing::debug!(message_id, parked = parked.len(), applied, "Replayed parked status callbacks");
    Ok(applied)
}
