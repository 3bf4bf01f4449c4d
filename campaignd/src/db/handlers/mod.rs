//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection or transaction and returns models from
//! [`crate::db::models`]:
//!
//! - [`Contacts`]: contact CRUD, opt-in state, custom field merges
//! - [`Templates`]: template CRUD and upsert from Meta sync
//! - [`Campaigns`]: campaign CRUD, guarded lifecycle transitions, counter refresh
//! - [`Recipients`]: recipient membership, precheck skips, dispatch claims and delivery updates
//! - [`Flows`]: flow definitions and submissions
//!
//! ```ignore
//! let mut conn = pool.acquire().await?;
//! let contact = Contacts::new(&mut conn).get_by_id(id).await?;
//! ```

pub mod campaigns;
pub mod contacts;
pub mod flows;
pub mod recipients;
pub mod repository;
pub mod templates;

pub use campaigns::Campaigns;
pub use contacts::Contacts;
pub use flows::Flows;
pub use recipients::Recipients;
pub use repository::Repository;
pub use templates::Templates;
