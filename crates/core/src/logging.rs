//! Logging and observability
//!
//! Structured logging through `tracing`, with text or JSON output selected at
//! runtime. All output goes to stderr so stdout stays free for command output
//! and for the stdio of foreground task containers.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system with an optional format specification.
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// ## Arguments
///
/// * `format` - `None` or `"text"` for human-readable output, `"json"` for
///   one JSON object per event.
///
/// ## Environment Variables
///
/// * `VESSEL_LOG_FORMAT` - Output format when `format` is `None`
/// * `VESSEL_LOG` - Filter directives (falls back to `RUST_LOG`, then `info`)
/// * `VESSEL_LOG_SPAN_EVENTS` - Span lifecycle events (`new,close`, `full`, ...)
///
/// ## Example
///
/// ```rust
/// use vessel_core::logging;
///
/// logging::init(None).expect("Failed to initialize logging");
/// ```
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("VESSEL_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter based on environment variables
fn create_env_filter() -> EnvFilter {
    if let Ok(vessel_log) = std::env::var("VESSEL_LOG") {
        EnvFilter::try_new(&vessel_log).unwrap_or_else(|_| {
            tracing::warn!(
                "Invalid VESSEL_LOG specification '{}', using default 'info'",
                vessel_log
            );
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Determine span lifecycle event configuration based on env var and format
fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    if let Ok(raw) = std::env::var("VESSEL_LOG_SPAN_EVENTS") {
        let mut acc = FmtSpan::NONE;
        for token in raw.split(&[',', '|'][..]).map(|t| t.trim().to_lowercase()) {
            acc |= match token.as_str() {
                "new" => FmtSpan::NEW,
                "close" => FmtSpan::CLOSE,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            };
        }
        return acc;
    }

    match format {
        "json" => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_multiple_calls_safe() {
        assert!(init(None).is_ok());
        assert!(init(Some("json")).is_ok());
        assert!(init(Some("invalid")).is_ok());
        assert!(is_initialized());
    }

    #[test]
    #[serial]
    fn test_span_events_env_override() {
        use fmt::format::FmtSpan;

        std::env::set_var("VESSEL_LOG_SPAN_EVENTS", "new,close");
        assert_eq!(span_events_for_format("text"), FmtSpan::NEW | FmtSpan::CLOSE);
        std::env::remove_var("VESSEL_LOG_SPAN_EVENTS");

        assert_eq!(span_events_for_format("text"), FmtSpan::NONE);
        assert_eq!(span_events_for_format("json"), FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    #[serial]
    fn test_env_filter_with_invalid_spec() {
        std::env::set_var("VESSEL_LOG", "invalid_spec_@@[");
        let _filter = create_env_filter();
        std::env::remove_var("VESSEL_LOG");
    }
}
