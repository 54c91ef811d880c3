//! # parley-client
//!
//! Client-side wiring of the sync engine for one signed-in user:
//! [`ChatClient`] ties the message reconciler, the chat list and presence
//! together, and [`events`] turns engine notifications into JSON payloads
//! for a native UI.

pub mod client;
pub mod events;
pub mod state;

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::ChatClient;
pub use state::ClientState;

static LOGGING: Once = Once::new();

/// Install the global tracing subscriber. Respects `RUST_LOG`; later calls
/// are no-ops.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("parley_client=debug,parley_sync=debug,parley_store=info,warn")
        });

        let installed = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init();

        if installed.is_ok() {
            tracing::info!("Starting {} client", parley_shared::constants::APP_NAME);
        }
    });
}
