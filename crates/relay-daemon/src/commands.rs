// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the `stream-relay` binary.
//!
//! These are library-level so they can be tested without spawning the
//! binary. Failures are [`RelayError`]s wrapped in `anyhow`, which lets the
//! binary pick an exit code from the error's category.

use crate::components::Components;
use crate::shutdown::wait_for_shutdown;
use crate::supervisor::{Supervisor, SupervisorSettings};
use anyhow::{Context, Result};
use relay_config::{ConfigWarning, RelayConfig, load_config, validate_config};
use relay_core::{RuleFileError, RuleSet, load_rules};
use relay_error::{Classify, RelayError};
use relay_provider::RuleSynchronizer;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Classify a component error for the final diagnostic.
pub fn classified<E>(err: E) -> RelayError
where
    E: Classify + std::error::Error + Send + Sync + 'static,
{
    RelayError::new(err.code(), err.to_string()).with_source(err)
}

/// Exit code for a command failure: the classified code when the chain
/// carries a [`RelayError`], 1 otherwise.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RelayError>())
        .map_or(1, |relay| relay.code.exit_code())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `--rules`
    pub rules: Option<PathBuf>,
    /// `--reset`
    pub reset: bool,
}

/// Load, override, and validate the configuration.
///
/// Warnings are logged and returned alongside the configuration.
pub fn prepare_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<(RelayConfig, Vec<ConfigWarning>)> {
    let mut config = load_config(path).map_err(classified)?;
    if let Some(rules) = &overrides.rules {
        config.rules_file = Some(rules.display().to_string());
    }
    if overrides.reset {
        config.reset_rules = true;
    }
    let warnings = validate_config(&config).map_err(classified)?;
    for w in &warnings {
        warn!(target: "relay.config", "{w}");
    }
    Ok((config, warnings))
}

/// The desired rules from the configured file. A missing setting is an
/// error, as is an unreadable or malformed file.
pub fn desired_rules(config: &RelayConfig) -> Result<RuleSet> {
    let path = config
        .rules_file
        .as_deref()
        .ok_or_else(|| classified(RuleFileError::NotConfigured))?;
    let rules = load_rules(Path::new(path)).map_err(classified)?;
    info!(target: "relay.config", path = %path, rules = rules.len(), "loaded rules");
    Ok(rules)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Relay until SIGINT/SIGTERM or a stream failure.
pub async fn cmd_run(config_path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let (config, _) = prepare_config(config_path, overrides)?;
    let desired = desired_rules(&config)?;
    let components = Components::from_config(&config)?;
    let mut supervisor =
        Supervisor::new(components, SupervisorSettings::from_config(&config), desired);

    let report = supervisor
        .run(wait_for_shutdown())
        .await
        .map_err(RelayError::from)?;
    info!(
        target: "relay.supervisor",
        created = report.sync.created,
        skipped = report.sync.skipped.len(),
        forwarded = report.stats.forwarded,
        delivered = report.stats.delivered,
        "run complete"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// rules
// ---------------------------------------------------------------------------

async fn synchronizer(config: &RelayConfig) -> Result<RuleSynchronizer> {
    let components = Components::from_config(config)?;
    let token = components.provider.authenticate().await.map_err(classified)?;
    Ok(RuleSynchronizer::new(components.provider.rule_store(&token)))
}

/// Submit the rule file as a dry run and print the store's verdict.
pub async fn cmd_rules_validate(config_path: Option<&Path>, rules: &Path) -> Result<()> {
    let overrides = Overrides {
        rules: Some(rules.to_path_buf()),
        reset: false,
    };
    let (config, _) = prepare_config(config_path, &overrides)?;
    let desired = desired_rules(&config)?;
    let sync = synchronizer(&config).await?;
    let summary = sync.apply(&desired, true).await.map_err(classified)?;
    println!(
        "{} rule(s) accepted, {} already registered (dry run)",
        summary.created,
        summary.skipped.len()
    );
    Ok(())
}

/// Print the registered rules, one JSON object per line.
pub async fn cmd_rules_list(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = prepare_config(config_path, &Overrides::default())?;
    let sync = synchronizer(&config).await?;
    for rule in sync.list().await.map_err(classified)? {
        println!("{}", serde_json::to_string(&rule).context("serialize rule")?);
    }
    Ok(())
}

/// Delete every registered rule.
pub async fn cmd_rules_reset(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = prepare_config(config_path, &Overrides::default())?;
    let sync = synchronizer(&config).await?;
    let summary = sync.reset_all().await.map_err(classified)?;
    println!("deleted {} rule(s)", summary.deleted);
    Ok(())
}

// ---------------------------------------------------------------------------
// topic
// ---------------------------------------------------------------------------

/// Create the configured topic if it does not exist.
pub async fn cmd_topic_create(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = prepare_config(config_path, &Overrides::default())?;
    let components = Components::from_config(&config)?;
    components
        .admin
        .create_topic(&config.log.topic)
        .await
        .map_err(classified)?;
    println!("topic {} ready", config.log.topic);
    Ok(())
}

/// Delete the configured topic if it exists.
pub async fn cmd_topic_delete(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = prepare_config(config_path, &Overrides::default())?;
    let components = Components::from_config(&config)?;
    components
        .admin
        .delete_topic(&config.log.topic)
        .await
        .map_err(classified)?;
    println!("topic {} deleted", config.log.topic);
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

/// Validated configuration as TOML with secrets redacted, preceded by any
/// warnings as `# warning:` comments.
pub fn config_check(config_path: Option<&Path>) -> Result<String> {
    let (config, warnings) = prepare_config(config_path, &Overrides::default())?;
    let mut out = String::new();
    for w in &warnings {
        out.push_str(&format!("# warning: {w}\n"));
    }
    out.push_str(&toml::to_string_pretty(&config).context("serialize config")?);
    Ok(out)
}

/// JSON schema of the configuration file.
pub fn config_schema() -> Result<String> {
    serde_json::to_string_pretty(&relay_config::json_schema()).context("serialize schema")
}
