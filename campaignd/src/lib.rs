//! # campaignd: WhatsApp campaign service
//!
//! `campaignd` manages outbound WhatsApp template campaigns on top of the Cloud API. Operators
//! keep a contact book, register message templates, bind template placeholders to contact data,
//! and run campaigns that a background dispatcher sends at an adaptive rate. Meta's delivery
//! callbacks fold back onto each recipient so campaign counters track sent, delivered, read and
//! failed messages.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum) and all state lives in PostgreSQL.
//!
//! ### Request Flow
//!
//! #### Management API (`/api/v1/*`)
//!
//! Every request carries one of the configured API keys as a bearer token ([`auth`]). Handlers
//! ([`api::handlers`]) validate the request, talk to the database through repositories
//! ([`db::handlers`]) and return JSON models ([`api::models`]).
//!
//! #### Webhook (`/webhooks/whatsapp`)
//!
//! Meta calls this endpoint for the subscription handshake and for notifications. Status
//! callbacks are applied to recipients forward-only ([`dispatch::reconcile`]), or parked until
//! the dispatcher records their message id; completed Flows are stored as submissions.
//!
//! ### Core Components
//!
//! **Precheck** ([`precheck`]) resolves every template placeholder for every recipient and
//! normalizes phone numbers, without sending anything. Recipients skipped for a fixable reason
//! are listed in report order as a batch-fix queue, with the field to edit for each.
//!
//! **Dispatch** ([`dispatch`]) claims due recipients in batches, sends them through a bounded
//! worker pool behind an AIMD throttle, and records results with a retry schedule. Claims carry a
//! timeout so rows held by a crashed replica are picked up again. Sends still queued for a
//! campaign that is paused or cancelled are dropped.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use campaignd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = campaignd::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     campaignd::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod flows;
mod openapi;
pub mod precheck;
pub mod telemetry;
mod types;
pub mod whatsapp;

#[cfg(test)]
pub mod test_utils;

use crate::config::CorsOrigin;
use crate::dispatch::Dispatcher;
use crate::whatsapp::WhatsAppClient;
use axum::http::HeaderValue;
use axum::{
    Router, http,
    routing::{get, patch, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa_scalar::{Scalar, Servable};

pub use types::{CampaignId, ContactId, FlowId, RecipientId, TemplateId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .whatsapp(client)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Graph API client for template management
    pub whatsapp: WhatsAppClient,
}

/// Get the campaignd database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect the main pool and run migrations.
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(&settings.url)
        .await?;

    migrator().run(&pool).await?;
    info!("Database migrations applied");

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: `/api/v1`, the WhatsApp webhook, health, docs and, when
/// enabled, Prometheus metrics at `/internal/metrics`.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{campaigns, contacts, flows, precheck, templates, whatsapp_webhook};

    let api_routes = Router::new()
        // Contacts
        .route("/contacts", get(contacts::list_contacts).post(contacts::create_contact))
        .route(
            "/contacts/{id}",
            get(contacts::get_contact)
                .patch(contacts::update_contact)
                .delete(contacts::delete_contact),
        )
        .route("/contacts/{id}/opt-out", post(contacts::opt_out_contact))
        .route("/contacts/{id}/opt-in", post(contacts::opt_in_contact))
        // Templates
        .route("/templates", get(templates::list_templates).post(templates::create_template))
        .route("/templates/sync", post(templates::sync_templates))
        .route("/templates/{id}", get(templates::get_template).delete(templates::delete_template))
        .route("/templates/{id}/submit", post(templates::submit_template))
        // Campaigns
        .route("/campaigns", get(campaigns::list_campaigns).post(campaigns::create_campaign))
        .route(
            "/campaigns/{id}",
            get(campaigns::get_campaign)
                .patch(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route(
            "/campaigns/{id}/recipients",
            get(campaigns::list_recipients).post(campaigns::add_recipients),
        )
        .route("/campaigns/{id}/precheck", post(campaigns::precheck_campaign))
        .route("/campaigns/{id}/schedule", post(campaigns::schedule_campaign))
        .route("/campaigns/{id}/unschedule", post(campaigns::unschedule_campaign))
        .route("/campaigns/{id}/start", post(campaigns::start_campaign))
        .route("/campaigns/{id}/pause", post(campaigns::pause_campaign))
        .route("/campaigns/{id}/resume", post(campaigns::resume_campaign))
        .route("/campaigns/{id}/cancel", post(campaigns::cancel_campaign))
        // Ad-hoc precheck
        .route("/precheck", post(precheck::precheck_contacts))
        // Flows
        .route("/flows", get(flows::list_flows).post(flows::create_flow))
        .route(
            "/flows/{id}",
            get(flows::get_flow).patch(flows::update_flow).delete(flows::delete_flow),
        )
        .route("/flows/{id}/publish", post(flows::publish_flow))
        .route("/flows/{id}/submissions", get(flows::list_submissions))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        // Called by Meta, not part of the bearer-authenticated API
        .route(
            "/webhooks/whatsapp",
            get(whatsapp_webhook::verify_webhook).post(whatsapp_webhook::receive_webhook),
        )
        .with_state(state.clone())
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", openapi::api_doc()))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(openapi::api_doc()) }));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping this cancels the shutdown token through `drop_guard`, so tasks never outlive the
/// application even if [`shutdown`](BackgroundServices::shutdown) is not awaited.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Start the campaign dispatcher unless it is disabled in configuration.
fn setup_background_services(
    pool: PgPool,
    client: WhatsAppClient,
    config: &Config,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.dispatch.enabled {
        let dispatcher = Dispatcher::spawn(
            pool,
            client,
            &config.dispatch,
            config.whatsapp.default_country_code.clone(),
            shutdown_token.clone(),
        );
        let handle = tokio::spawn(dispatch::run_dispatcher(
            dispatcher,
            config.dispatch.poll_interval,
            shutdown_token.clone(),
        ));
        background_tasks.push(handle);
    } else {
        info!("Campaign dispatcher disabled by configuration");
    }

    BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    }
}

/// Owns the router, the pool and the background services.
///
/// 1. **Create**: [`Application::new`] connects, migrates and starts background services
/// 2. **Serve**: [`Application::serve`] binds and handles requests until the shutdown future resolves
/// 3. **Shutdown**: background tasks are stopped, the pool is closed and telemetry is flushed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = setup_database(&config).await?;
        Self::new_with_pool(config, pool)
    }

    /// Like [`Application::new`] with an existing, already migrated pool.
    pub fn new_with_pool(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        debug!("Starting campaignd with configuration: {:#?}", config);

        let whatsapp = WhatsAppClient::new(&config.whatsapp)?;
        let bg_services = setup_background_services(pool.clone(), whatsapp.clone(), &config, CancellationToken::new());

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .whatsapp(whatsapp)
            .build();
        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "campaignd listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
