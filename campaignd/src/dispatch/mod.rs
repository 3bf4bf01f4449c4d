//! Campaign dispatch and delivery reconciliation.
//!
//! - [`dispatcher`]: claim/send/result loop over `campaign_contacts`
//! - [`throttle`]: adaptive send-rate limiter shared by all sends of a process
//! - [`lifecycle`]: campaign start (precheck + skips + transition)
//! - [`reconcile`]: folding delivery status callbacks onto recipients

pub mod dispatcher;
pub mod lifecycle;
pub mod reconcile;
pub mod throttle;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use dispatcher::Dispatcher;

/// Tick the dispatcher every `poll_interval` until shutdown.
pub async fn run_dispatcher(mut dispatcher: Dispatcher, poll_interval: Duration, shutdown: CancellationToken) {
    tracing::info!(poll_interval = ?poll_interval, "Starting campaign dispatcher");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Campaign dispatcher shutting down");
                return;
            }
        }

        dispatcher.tick().await;
    }
}
