//! Startup wiring: logger, HTTP client, crypto provider.

mod client;
mod logger;

pub use client::{init_client, init_client_with, init_crypto_provider};
pub use logger::init_logger;
