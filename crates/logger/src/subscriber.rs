use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

pub fn init() {
    initialize_tracing(LevelFilter::INFO, None);
}

/// Initialize tracing with a default level and format taken from configuration.
///
/// `RUST_LOG` still wins over `level`, and `RUST_LOG_FORMAT` over `format`.
pub fn init_with(level: &str, format: Option<LogFormat>) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    initialize_tracing(level, format);
}

/// Initialize tracing subscriber with default configuration.
fn initialize_tracing(level: LevelFilter, configured: Option<LogFormat>) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = match var("RUST_LOG_FORMAT") {
        Ok(raw) => raw.parse().unwrap_or_else(|error| {
            warn!("Ignoring RUST_LOG_FORMAT: {error}");
            configured.unwrap_or_default()
        }),
        Err(_) => configured.unwrap_or_default(),
    };

    let log_layer = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(log_layer).try_init();
}
