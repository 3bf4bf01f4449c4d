//! API authentication.
//!
//! Every route under `/api/v1` requires `Authorization: Bearer <key>`, where the key is one of
//! `auth.api_keys` from the configuration. Handlers opt in by taking an [`ApiCaller`] argument;
//! the WhatsApp webhook is authenticated by signature instead (see [`crate::whatsapp::signing`]).

pub mod api_key;

pub use api_key::ApiCaller;
