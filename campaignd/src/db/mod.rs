//! Database layer for data persistence and access.
//!
//! SQLx over PostgreSQL, organised as:
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, dispatcher)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries and state transitions)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! Repositories borrow a `&mut PgConnection`, so the same code runs on a pooled connection or
//! inside a transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let campaign = Campaigns::new(&mut tx).start(id).await?;
//! Recipients::new(&mut tx).apply_skips(id, &skips).await?;
//! tx.commit().await?;
//! ```
//!
//! Status columns are stored as `TEXT` with `CHECK` constraints and parsed into enums at the edge.
//! Migrations live in `migrations/` and are embedded through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
