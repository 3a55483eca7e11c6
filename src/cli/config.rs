//! Config command handlers

use crate::cli::{ConfigInitArgs, ConfigValidateArgs};
use crate::config::GatewayConfig;
use anyhow::{bail, Context};
use std::fs;

const EXAMPLE_CONFIG: &str = include_str!("../../meridian.example.toml");

/// Handle `meridian config init` command
pub fn handle_config_init(args: &ConfigInitArgs) -> anyhow::Result<()> {
    if args.output.exists() && !args.force {
        bail!(
            "File already exists: {}. Use --force to overwrite.",
            args.output.display()
        );
    }

    fs::write(&args.output, EXAMPLE_CONFIG)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("✓ Configuration file created: {}", args.output.display());
    println!("  Edit this file to add your providers.");

    Ok(())
}

/// Handle `meridian config validate` command
///
/// Environment overrides are applied before validation so the result
/// matches what `serve` would see.
pub fn handle_config_validate(args: &ConfigValidateArgs) -> anyhow::Result<String> {
    let config = GatewayConfig::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?
        .with_env_overrides();
    config.validate()?;

    let semantic = if config.embedding.url.is_some() {
        "semantic"
    } else {
        "exact-key only"
    };
    Ok(format!(
        "✓ Configuration valid: {}\n  providers: {}\n  cache: {} (threshold {})\n  store: {}",
        args.config.display(),
        config.providers.len(),
        semantic,
        config.cache.similarity_threshold,
        if config.store.enabled {
            config.store.path.display().to_string()
        } else {
            "disabled".to_string()
        }
    ))
}
