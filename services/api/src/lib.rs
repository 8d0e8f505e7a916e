//! Call Agent API Library Crate
//!
//! This library contains the web-facing half of the phone agent: configuration,
//! the Postgres transcript store, speech synthesis, TwiML rendering, the
//! telephony webhooks and JSON handlers, and routing. The `api` binary is a
//! thin wrapper around this library.

pub mod audio;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod twiml;
pub mod voice;
