//! API request and response data models.
//!
//! API models are distinct from database models ([`crate::db::models`]) so the wire contract
//! can evolve independently of storage. Responses convert from database rows with `From`; status
//! columns are parsed into their enums on the way out.
//!
//! - [`contacts`]: contact create/update payloads (with `custom_fields` merge patches)
//! - [`templates`]: template registration and sync results
//! - [`campaigns`]: campaigns, lifecycle requests and recipients
//! - [`precheck`]: precheck reports with the batch-fix queue
//! - [`flows`]: flow definitions and collected submissions
//! - [`pagination`]: `skip`/`limit` query parameters and the paged response wrapper

pub mod campaigns;
pub mod contacts;
pub mod flows;
pub mod pagination;
pub mod precheck;
pub mod templates;
