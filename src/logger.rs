//! Tracing setup for the agent.
//!
//! Precedence: `RUST_LOG` from the environment wins, then the level from the
//! `[log]` config table (or a CLI override), then a plain `info` fallback so a
//! bad directive never silences pipeline output.

use crate::config::LogConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(config: &LogConfig, override_level: Option<&str>) -> anyhow::Result<()> {
    let level = override_level.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
