// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::Result;
use clap::{Parser, Subcommand};
use relay_config::load_config;
use relay_daemon::commands::{self, Overrides};
use relay_daemon::logging::{self, LogOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "stream-relay",
    version,
    about = "Relay a filtered real-time stream into a log topic"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ensure the topic, sync rules, and relay until SIGINT/SIGTERM.
    Run {
        /// Rule file (TOML or JSON); overrides `rules_file`.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Delete every registered rule before applying the rule file.
        #[arg(long)]
        reset: bool,
    },

    /// Inspect or change the registered rules.
    #[command(subcommand)]
    Rules(RulesCommand),

    /// Create or delete the destination topic.
    #[command(subcommand)]
    Topic(TopicCommand),

    /// Check or describe the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Submit a rule file as a dry run.
    Validate {
        /// Rule file (TOML or JSON).
        #[arg(long)]
        rules: PathBuf,
    },
    /// Print the registered rules.
    List,
    /// Delete every registered rule.
    Reset,
}

#[derive(Subcommand, Debug)]
enum TopicCommand {
    /// Create the configured topic; an existing topic is fine.
    Create,
    /// Delete the configured topic; a missing topic is fine.
    Delete,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate the configuration and print it with secrets redacted.
    Check,
    /// Print the JSON schema of the configuration file.
    Schema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Only the level is needed here; a broken config is reported by the command.
    let level = load_config(cli.config.as_deref())
        .ok()
        .and_then(|c| c.log_level);
    logging::init(&LogOptions {
        debug: cli.debug,
        json: cli.json_logs,
        level,
    });

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(commands::exit_code_for(&e) as u8)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run { rules, reset } => {
            commands::cmd_run(config, &Overrides { rules, reset }).await
        }
        Commands::Rules(RulesCommand::Validate { rules }) => {
            commands::cmd_rules_validate(config, &rules).await
        }
        Commands::Rules(RulesCommand::List) => commands::cmd_rules_list(config).await,
        Commands::Rules(RulesCommand::Reset) => commands::cmd_rules_reset(config).await,
        Commands::Topic(TopicCommand::Create) => commands::cmd_topic_create(config).await,
        Commands::Topic(TopicCommand::Delete) => commands::cmd_topic_delete(config).await,
        Commands::Config(ConfigCommand::Check) => {
            print!("{}", commands::config_check(config)?);
            Ok(())
        }
        Commands::Config(ConfigCommand::Schema) => {
            println!("{}", commands::config_schema()?);
            Ok(())
        }
    }
}
