//! WhatsApp Cloud API integration: outbound client, message payloads, and the inbound webhook
//! codec with signature verification.

pub mod client;
pub mod errors;
pub mod payloads;
pub mod signing;
pub mod webhook;

pub use client::WhatsAppClient;
