//! Database record models matching table schemas.
//!
//! Each struct derives `sqlx::FromRow` and mirrors one table (or one joined projection, for
//! the dispatcher's claim query). API representations live in [`crate::api::models`] and convert
//! from these with `From`.
//!
//! - [`contacts`]: recipients and their opt-in state
//! - [`templates`]: WhatsApp message templates mirrored from Meta
//! - [`campaigns`]: campaigns and the lifecycle state machine
//! - [`recipients`]: per-contact dispatch state (`campaign_contacts`)
//! - [`flows`]: WhatsApp Flow definitions and submissions

pub mod campaigns;
pub mod contacts;
pub mod flows;
pub mod recipients;
pub mod templates;
