//! REST API: route handlers and their request/response models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: request/response bodies and query parameters
//!
//! # API Structure
//!
//! - **Contacts** (`/api/v1/contacts/*`)
//! - **Templates** (`/api/v1/templates/*`)
//! - **Campaigns** (`/api/v1/campaigns/*`), including recipients, precheck and lifecycle actions
//! - **Precheck** (`/api/v1/precheck`)
//! - **Flows** (`/api/v1/flows/*`)
//! - **Webhook** (`/webhooks/whatsapp`): called by Meta, not by API clients
//!
//! The OpenAPI document is served at `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
