//! Adhera — medication adherence and inventory engine.
//!
//! The engine compiles declarative reminders into a dose-event ledger,
//! runs the adherence state machine over it, keeps the inventory ledger
//! in step, and answers the overview and "what is due" queries that
//! external collaborators (notification dispatcher, OCR importer,
//! subscription system) plug into.

pub mod adherence;
pub mod authorization;
pub mod config;
pub mod db;
pub mod engine;
pub mod entitlement;
pub mod error;
pub mod import;
pub mod inventory;
pub mod models;
pub mod overview;
pub mod scheduler;

#[cfg(test)]
pub mod test_support;

pub use engine::{ActorContext, DoseAction, Engine};
pub use error::EngineError;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding applications. Respects RUST_LOG.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
