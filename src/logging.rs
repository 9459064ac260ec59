//! # Logging
//!
//! Structured logging built on `tracing`. Call [`init_logging`] once during
//! startup; repeated calls are no-ops, so tests and embedding applications
//! can both initialize without coordinating.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global `tracing` subscriber from [`LoggingSettings`].
///
/// The filter honors `RUST_LOG` when present and falls back to the configured
/// level otherwise. With `json_format` set, events are emitted as one JSON
/// object per line for log shippers; the default output is human readable.
pub fn init_logging(settings: &LoggingSettings) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.level));

        // try_init tolerates a subscriber installed by the host application.
        if settings.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .ok();
        } else {
            let layer = tracing_subscriber::fmt::layer().with_target(true);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .ok();
        }

        tracing::info!(
            level = %settings.level,
            json = settings.json_format,
            "logging initialized"
        );
    });
}
