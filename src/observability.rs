//! Tracing initialization shared by both binaries.
//!
//! Grounded on `dashflow-registry/src/bin/registry_server.rs`'s
//! `init_tracing`: an `EnvFilter` seeded from `RUST_LOG` (falling back to
//! `info`), with a human-readable or JSON formatter selected by
//! [`LogFormat`].

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "pretty" | "text" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}")),
        }
    }
}

/// Install the global tracing subscriber. Call once at binary startup,
/// before any other module logs.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = Registry::default().with(filter);
    match format {
        LogFormat::Human => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        LogFormat::Json => {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        }
    }
}
