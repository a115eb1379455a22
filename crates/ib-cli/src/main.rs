//! ioc-bridge CLI
//!
//! Runs the threat-intel plugins from the command line: validate a
//! configuration, pull records, share indicators and retract them.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use ib_observability::{plugin_span, LogFormat, LoggingConfig};
use ib_plugins::{
    Action, ApplicationRecord, Indicator, IndicatorSink, ModifiedIndicators, Plugin,
    PullCheckpoint, PushResult, RecordSource, Retractable, ValidationResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, Instrument};

mod config;
mod registry;
mod state;

use config::AppConfig;
use registry::PluginInstance;
use state::CheckpointStore;

#[derive(Parser)]
#[command(name = "ioc-bridge")]
#[command(version)]
#[command(about = "Share threat indicators between security platforms", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured plugins
    Plugins,

    /// Validate a plugin configuration against its platform
    Validate {
        /// Plugin name
        name: String,
    },

    /// Pull records from a plugin, resuming from the last checkpoint
    Pull {
        /// Plugin name
        name: String,

        /// Write the records to a JSON file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Push records from a JSON file to a plugin
    Push {
        /// Plugin name
        name: String,

        /// JSON file with the records to push
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Action value (defaults to the first configured action)
        #[arg(short, long)]
        action: Option<String>,

        /// Name of the configuration the records came from
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Retract indicators that are no longer active at the source
    Retract {
        /// Plugin name
        name: String,

        /// JSON file with the indicators, as one batch or a list of batches
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Only report which indicators would be retracted
        #[arg(long)]
        check_only: bool,
    },

    /// Show current configuration
    Config {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = match cli.format {
        OutputFormat::Json => LogFormat::Json,
        OutputFormat::Text => LogFormat::Text,
    };
    ib_observability::init(&LoggingConfig::for_cli(cli.verbose, log_format))?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e),
        Err(_) => {
            if cli.verbose {
                eprintln!("Using default configuration (no config file found)");
            }
            AppConfig::default()
        }
    };

    match cli.command {
        Commands::Plugins => cmd_plugins(&config, cli.format),
        Commands::Validate { name } => {
            cmd_validate(&config, &name, cli.format)
                .instrument(plugin_span!(name, "validate"))
                .await
        }
        Commands::Pull { name, output } => {
            cmd_pull(&config, &name, output.as_deref(), cli.format)
                .instrument(plugin_span!(name, "pull"))
                .await
        }
        Commands::Push {
            name,
            input,
            action,
            source,
        } => {
            cmd_push(
                &config,
                &name,
                &input,
                action.as_deref(),
                source.as_deref(),
                cli.format,
            )
            .instrument(plugin_span!(name, "push"))
            .await
        }
        Commands::Retract {
            name,
            input,
            check_only,
        } => {
            cmd_retract(&config, &name, &input, check_only, cli.format)
                .instrument(plugin_span!(name, "retract"))
                .await
        }
        Commands::Config { show_secrets } => cmd_config(config, show_secrets, cli.format),
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("com", "ioc-bridge", "ioc-bridge") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/default.yaml")
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))
}

fn cmd_plugins(config: &AppConfig, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let plugins: Vec<_> = config
            .plugins
            .iter()
            .map(|(name, entry)| {
                serde_json::json!({
                    "name": name,
                    "kind": entry.kind.to_string(),
                    "enabled": entry.enabled,
                    "actions": entry.actions.iter().map(|a| &a.value).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&plugins);
    }

    println!("{}", "Configured Plugins".bold());
    println!("──────────────────");
    if config.plugins.is_empty() {
        println!("No plugins configured");
    }
    for (name, entry) in &config.plugins {
        let status = if entry.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("  {} ({}) - {}", name.cyan(), entry.kind, status);
        for action in &entry.actions {
            println!("      action: {} ({})", action.label, action.value);
        }
    }
    Ok(())
}

fn print_validation(name: &str, result: &ValidationResult, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(result);
    }
    if result.success {
        println!("{} {}: {}", "✓".green(), name.cyan(), result.message);
    } else {
        println!("{} {}: {}", "✗".red(), name.cyan(), result.message);
    }
    Ok(())
}

async fn cmd_validate(config: &AppConfig, name: &str, format: OutputFormat) -> Result<()> {
    let instance = PluginInstance::from_config(config, name)?;
    let result = instance.as_plugin().validate().await;
    print_validation(name, &result, format)?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Pulls every page, saving the checkpoint after each one.
async fn pull_all<P>(plugin: &P, store: &CheckpointStore) -> Result<Vec<P::Record>>
where
    P: RecordSource,
{
    let name = plugin.name();
    let started_at = Utc::now();
    let mut checkpoint = store.load(name)?;
    if checkpoint.sub_checkpoint.is_some() {
        info!(plugin = %name, "Resuming interrupted pull");
    }

    let mut records = Vec::new();
    loop {
        let page = plugin.pull_page(&checkpoint).await?;
        records.extend(page.records);
        match page.next {
            Some(next) => {
                checkpoint = checkpoint.resume(next);
                store.save(name, &checkpoint)?;
            }
            None => break,
        }
    }

    store.save(
        name,
        &PullCheckpoint {
            last_run_at: Some(started_at),
            sub_checkpoint: None,
        },
    )?;
    Ok(records)
}

fn write_records<T: Serialize>(
    name: &str,
    records: &[T],
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, serde_json::to_string_pretty(records)?)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            if format == OutputFormat::Text {
                println!(
                    "Pulled {} record(s) from {} into {}",
                    records.len().to_string().green(),
                    name.cyan(),
                    path.display()
                );
            }
            Ok(())
        }
        None => print_json(records),
    }
}

async fn cmd_pull(
    config: &AppConfig,
    name: &str,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let instance = PluginInstance::from_config(config, name)?;
    let store = CheckpointStore::new(config.state_dir());

    match &instance {
        PluginInstance::Misp(plugin) => {
            let records = pull_all(plugin, &store).await?;
            write_records(name, &records, output, format)
        }
        PluginInstance::Forescout(plugin) => {
            let records = pull_all(plugin, &store).await?;
            write_records(name, &records, output, format)
        }
        PluginInstance::VisoTrust(plugin) => {
            let records = pull_all(plugin, &store).await?;
            write_records(name, &records, output, format)
        }
        PluginInstance::Syslog(_) => bail!("Plugin '{}' does not support pulling", name),
    }
}

/// Picks the action to run: configured actions first, then the plugin's own.
fn resolve_action(
    entry_actions: &[Action],
    plugin: &dyn Plugin,
    value: Option<&str>,
) -> Result<Action> {
    let configured = match value {
        Some(value) => entry_actions.iter().find(|a| a.value == value),
        None => entry_actions.first(),
    };
    if let Some(action) = configured {
        return Ok(action.clone());
    }

    let available = plugin.get_actions();
    let action = match value {
        Some(value) => available.into_iter().find(|a| a.value == value),
        None => available.into_iter().next(),
    };
    action.with_context(|| {
        format!(
            "No action '{}' available for plugin '{}'",
            value.unwrap_or("<default>"),
            plugin.name()
        )
    })
}

fn print_push(name: &str, result: &PushResult, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(result);
    }
    let mark = if result.success && result.failed == 0 {
        "✓".green()
    } else if result.success {
        "!".yellow()
    } else {
        "✗".red()
    };
    println!("{} {}: {}", mark, name.cyan(), result.message);
    Ok(())
}

async fn cmd_push(
    config: &AppConfig,
    name: &str,
    input: &Path,
    action: Option<&str>,
    source: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let entry = config.plugin(name)?;
    let instance = PluginInstance::from_config(config, name)?;
    let plugin = instance.as_plugin();

    let action = resolve_action(&entry.actions, plugin, action)?;
    let check = plugin.validate_action(&action);
    if !check.success {
        bail!("{}", check.message);
    }

    let result = match &instance {
        PluginInstance::Misp(plugin) => {
            let indicators: Vec<Indicator> = read_json(input)?;
            plugin.push(&indicators, &action, source).await?
        }
        PluginInstance::Syslog(plugin) => {
            let indicators: Vec<Indicator> = read_json(input)?;
            plugin.push(&indicators, &action, source).await?
        }
        PluginInstance::VisoTrust(plugin) => {
            let apps: Vec<ApplicationRecord> = read_json(input)?;
            plugin.push_applications(&apps, &action).await?
        }
        PluginInstance::Forescout(_) => bail!("Plugin '{}' does not support pushing", name),
    };

    print_push(name, &result, format)?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Retraction input: a single batch or a list of batches.
#[derive(Deserialize)]
#[serde(untagged)]
enum RetractInput {
    Batches(Vec<Vec<Indicator>>),
    Batch(Vec<Indicator>),
}

impl RetractInput {
    fn into_batches(self) -> Vec<Vec<Indicator>> {
        match self {
            RetractInput::Batches(batches) => batches,
            RetractInput::Batch(batch) => vec![batch],
        }
    }
}

fn print_modified(name: &str, modified: &[ModifiedIndicators], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        let batches: Vec<_> = modified
            .iter()
            .map(|m| serde_json::json!({"values": m.values, "disabled": m.disabled}))
            .collect();
        return print_json(&batches);
    }
    println!("{}", format!("Modified indicators for {}", name).bold());
    for (i, batch) in modified.iter().enumerate() {
        if batch.disabled {
            println!("  batch {}: {}", i + 1, "retraction disabled".yellow());
            continue;
        }
        println!("  batch {}: {} indicator(s)", i + 1, batch.values.len());
        for value in &batch.values {
            println!("    {}", value);
        }
    }
    Ok(())
}

async fn cmd_retract(
    config: &AppConfig,
    name: &str,
    input: &Path,
    check_only: bool,
    format: OutputFormat,
) -> Result<()> {
    let entry = config.plugin(name)?;
    let instance = PluginInstance::from_config(config, name)?;
    let PluginInstance::Misp(plugin) = &instance else {
        bail!("Plugin '{}' does not support retraction", name);
    };

    let batches = read_json::<RetractInput>(input)?.into_batches();
    if check_only {
        let modified = plugin.get_modified_indicators(&batches).await?;
        return print_modified(name, &modified, format);
    }

    let results = plugin.retract_indicators(&batches, &entry.actions).await?;
    if format == OutputFormat::Json {
        return print_json(&results);
    }
    for result in &results {
        print_validation(name, result, format)?;
    }
    if results.iter().any(|r| !r.success && !r.disabled) {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_config(config: AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        return print_json(&display_config);
    }

    println!("{}", "Current Configuration".bold());
    println!("─────────────────────────");
    println!("State directory: {}", display_config.state_dir().display());
    println!("Verify TLS: {}", display_config.verify_tls);
    if let Some(proxy) = &display_config.proxy {
        println!("Proxy: {}", proxy);
    }
    println!(
        "Timeout: {}s, attempts: {}, retry wait: {}s",
        display_config.timeout_secs, display_config.max_attempts, display_config.retry_wait_secs
    );
    println!("\nPlugins:");
    for (name, entry) in &display_config.plugins {
        println!("  - {}: {} ({})", name, entry.kind, entry.enabled);
        println!("{}", indent(&serde_yaml::to_string(&entry.config)?, 6));
    }
    Ok(())
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ib_plugins::IndicatorType;

    #[test]
    fn test_output_format_parse() {
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_parses_push() {
        let cli = Cli::try_parse_from([
            "ioc-bridge",
            "--format",
            "json",
            "push",
            "misp-prod",
            "--input",
            "iocs.json",
            "--action",
            "event",
        ])
        .unwrap();
        assert!(cli.format == OutputFormat::Json);
        match cli.command {
            Commands::Push { name, action, .. } => {
                assert_eq!(name, "misp-prod");
                assert_eq!(action.as_deref(), Some("event"));
            }
            _ => panic!("expected push"),
        }
    }

    #[test]
    fn test_retract_input_accepts_batch_or_batches() {
        let single: RetractInput =
            serde_json::from_str(r#"[{"value": "1.2.3.4", "type": "ipv4"}]"#).unwrap();
        assert_eq!(single.into_batches().len(), 1);

        let nested: RetractInput = serde_json::from_str(
            r#"[[{"value": "1.2.3.4", "type": "ipv4"}], [{"value": "x.example", "type": "domain"}]]"#,
        )
        .unwrap();
        let batches = nested.into_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].ioc_type, IndicatorType::Domain);
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a: 1\nb: 2\n", 2), "  a: 1\n  b: 2");
    }
}
