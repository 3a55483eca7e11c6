//! Tracing setup
//!
//! Components log through `tracing` with structured fields. This module
//! turns [`LoggingConfig`] into an `EnvFilter` and installs the
//! subscriber once at startup.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build filter directives string from LoggingConfig
///
/// Produces the base level followed by one `meridian::<component>=<level>`
/// directive per configured component, sorted by component name.
///
/// # Examples
///
/// ```
/// use meridian::config::{LogFormat, LoggingConfig};
/// use meridian::logging::build_filter_directives;
/// use std::collections::HashMap;
///
/// let mut component_levels = HashMap::new();
/// component_levels.insert("routing".to_string(), "debug".to_string());
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Pretty,
///     component_levels: Some(component_levels),
/// };
///
/// assert_eq!(build_filter_directives(&config), "info,meridian::routing=debug");
/// ```
pub fn build_filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.level.clone();

    if let Some(component_levels) = &config.component_levels {
        let mut components: Vec<_> = component_levels.iter().collect();
        components.sort();
        for (component, level) in components {
            filter_str.push_str(&format!(",meridian::{}={}", component, level));
        }
    }

    filter_str
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured directives when set.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter_str = build_filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    match config.format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
    }

    Ok(())
}
