//! Secrets handling: env-backed loading, payload scrubbing, and the
//! advisory prompt-injection scanner.

mod injection;
mod loader;
mod scrubber;

pub use injection::{InjectionScanner, ScanReport};
pub use loader::SecretsLoader;
pub use scrubber::Scrubber;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("required env var '{0}' is not set")]
    NotFound(String),

    #[error("env var '{key}' appears invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("scrubber build failed: {0}")]
    ScrubberBuild(String),
}
