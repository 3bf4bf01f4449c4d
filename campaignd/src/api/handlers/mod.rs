//! HTTP request handlers, one module per resource.
//!
//! - [`contacts`]: contact book CRUD and opt-in/opt-out
//! - [`templates`]: template registry, Graph API sync and submission
//! - [`campaigns`]: campaign CRUD, recipients, precheck and lifecycle transitions
//! - [`precheck`]: ad-hoc precheck of a template against arbitrary contacts
//! - [`flows`]: WhatsApp Flow definitions and their submissions
//! - [`whatsapp_webhook`]: Cloud API webhook handshake and notifications
//!
//! Everything under `/api/v1` takes an [`crate::auth::ApiCaller`] extractor. The webhook
//! authenticates with the app secret signature instead.
//!
//! Handlers return [`crate::errors::Result`], which renders as a JSON error body with the
//! matching status code.

pub mod campaigns;
pub mod contacts;
pub mod flows;
pub mod precheck;
pub mod templates;
pub mod whatsapp_webhook;
