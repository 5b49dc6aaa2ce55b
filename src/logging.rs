//! Structured diagnostics via `tracing`.
//!
//! Events go to stderr so stdout stays reserved for the JSON envelope.
//! Filtering follows `DECKHAND_LOG` (an `EnvFilter` directive, e.g.
//! `deckhand=debug`); without it only warnings and errors are shown.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "DECKHAND_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

pub fn init_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let directive = log_directive(std::env::var(LOG_ENV).ok());
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(std::io::stderr().is_terminal())
                .with_filter(filter),
        );

        // A host application may already have installed a subscriber.
        if subscriber.try_init().is_err() {
            tracing::debug!("global tracing subscriber already initialized");
        }
    });
}

fn log_directive(from_env: Option<String>) -> String {
    from_env
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}
