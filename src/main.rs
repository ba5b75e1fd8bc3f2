use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mermaid_fix::cli_commands::{CommandRunner, FixOptions};
use mermaid_fix::config::Config;
use mermaid_fix::mermaid::EngineKind;
use mermaid_fix::OutputHandler;

#[derive(Parser)]
#[command(name = "mermaid-fix")]
#[command(version, about = "Validate Mermaid diagrams in markdown and repair broken ones with AI", long_about = None)]
struct Cli {
    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.mermaid-fix/config.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Diagram engine: native or mmdc
    #[arg(long, global = true)]
    engine: Option<EngineKind>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate every Mermaid block in the given files or directories
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Repair invalid Mermaid blocks in one file
    Fix {
        file: PathBuf,

        /// Model used for the repair
        #[arg(short, long)]
        model: Option<String>,

        /// Instructions replacing the built-in repair rules
        #[arg(short, long)]
        prompt: Option<String>,

        /// Skip the confirmation dialog
        #[arg(short, long)]
        yes: bool,

        /// Show the result without writing it
        #[arg(long)]
        dry_run: bool,

        /// Write the result here instead of in place
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Provider (openai, claude, ollama, zai, custom)
        #[arg(long)]
        provider: Option<String>,

        /// API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Per-diagram repair timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show the active configuration
    Config {
        /// Write a default config file first
        #[arg(long)]
        init: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::get_config_path);
    let mut config = Config::load_or_default_from(Some(&config_path));
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }

    let output = OutputHandler::new().with_json(cli.json);

    match cli.command {
        Commands::Check { paths } => {
            let mut runner = CommandRunner::new(config, output);
            if !runner.check(&paths).await? {
                std::process::exit(1);
            }
        }
        Commands::Fix {
            file,
            model,
            prompt,
            yes,
            dry_run,
            output: out,
            provider,
            api_url,
            timeout,
        } => {
            if let Some(provider) = provider {
                config.ai.provider = provider;
            }
            if let Some(api_url) = api_url {
                config.ai.api_url = api_url;
            }
            if let Some(timeout) = timeout {
                config.repair.timeout_secs = timeout;
            }

            let mut runner = CommandRunner::new(config, output);
            let outcome = runner
                .fix(FixOptions {
                    file,
                    model,
                    prompt,
                    yes,
                    dry_run,
                    output: out,
                })
                .await?;
            if matches!(outcome, mermaid_fix::FixSessionOutcome::Failed) {
                std::process::exit(1);
            }
        }
        Commands::Config { init } => {
            let mut runner = CommandRunner::new(config, output);
            runner.show_config(&config_path, init)?;
        }
    }

    Ok(())
}
