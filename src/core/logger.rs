// Structured Logging for the Order-Flow Hunt System
// tracing + tracing-subscriber, plain or JSON lines

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Transport crates that log every frame at debug.
const QUIET_TARGETS: [&str; 5] = [
    "tokio_tungstenite=warn",
    "tungstenite=warn",
    "hyper=warn",
    "reqwest=warn",
    "rustls=warn",
];

pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber once. `RUST_LOG` directives are honoured on
/// top of the configured level.
pub fn setup_logging(log_level: Option<&str>, json_format: Option<bool>) {
    let log_level_str = log_level.unwrap_or("INFO");
    let json_format = json_format.unwrap_or(false);
    let level = parse_level(log_level_str);

    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        for target in QUIET_TARGETS {
            if let Ok(directive) = target.parse::<Directive>() {
                filter = filter.add_directive(directive);
            }
        }

        // try_init: a test harness may already own the global subscriber
        let installed = if json_format {
            tracing_subscriber::fmt()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_env_filter(filter)
                .try_init()
                .is_ok()
        } else {
            tracing_subscriber::fmt()
                .with_target(true)
                .with_env_filter(filter)
                .try_init()
                .is_ok()
        };

        if installed {
            tracing::info!(
                log_level = %log_level_str,
                json = json_format,
                "Logging initialized"
            );
        }
    });
}
