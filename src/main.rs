use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tierpass::registry::{MemorySheet, Registry, ResilientRegistry, SheetRegistry};
use tierpass::{init_telemetry, Bot, ConsoleTransport, InboundEvent, ShutdownCoordinator, TierpassConfig};

#[derive(Parser)]
#[command(name = "tierpass")]
#[command(about = "Paid-tier access workflow: plan, payment proof, admin approval")]
#[command(long_about = "Tierpass walks users through choosing a plan and uploading payment proof, \
                       then lets administrators approve or reject the request. The `run` command \
                       reads chat events as JSON lines on stdin and writes replies as JSON lines on stdout.")]
struct Cli {
    /// Configuration file (defaults to ./tierpass.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process inbound events from stdin until input ends or Ctrl-C
    Run {
        /// JSON file backing the registry (overrides registry.data_file)
        #[arg(long, help = "Persist the registry table to this JSON file")]
        data_file: Option<PathBuf>,
    },
    /// Print the configured plans and payment methods
    Catalog,
    /// Validate the configuration and exit
    CheckConfig,
    /// Write a starter configuration file
    InitConfig {
        #[arg(long, default_value = "tierpass.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    TierpassConfig::load_env_file()?;

    match cli.command {
        Commands::Run { data_file } => run(cli.config, data_file).await,
        Commands::Catalog => show_catalog(cli.config),
        Commands::CheckConfig => check_config(cli.config),
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

async fn run(config_path: Option<PathBuf>, data_file: Option<PathBuf>) -> Result<()> {
    let config = TierpassConfig::load(config_path.as_deref())?;
    init_telemetry(&config.observability)?;
    config.validate()?;

    let sheet = match data_file.or_else(|| config.registry.data_file.clone().map(PathBuf::from)) {
        Some(path) => MemorySheet::open(&path)
            .await
            .with_context(|| format!("opening registry file {}", path.display()))?,
        None => {
            warn!("No registry data file configured; approvals will not survive a restart");
            MemorySheet::new()
        }
    };
    let registry: Arc<dyn Registry> = Arc::new(ResilientRegistry::new(
        SheetRegistry::new(sheet),
        config.retry_config(),
    ));

    let bot = Arc::new(Bot::new(&config, registry, Arc::new(ConsoleTransport::stdout()))?);
    let (tx, rx) = mpsc::channel::<InboundEvent>(256);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match serde_json::from_str::<InboundEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed event line"),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Stopped reading stdin");
                    break;
                }
            }
        }
    });

    let shutdown = ShutdownCoordinator::default();
    bot.run(rx, &shutdown, ShutdownCoordinator::wait_for_signal()).await;
    info!("Tierpass stopped");
    Ok(())
}

fn show_catalog(config_path: Option<PathBuf>) -> Result<()> {
    let config = TierpassConfig::load(config_path.as_deref())?;
    let catalog = config.catalog()?;

    println!("Plans:");
    for plan in catalog.plans() {
        println!(
            "  {:<10} {:<20} {:>12}  {} days",
            plan.id, plan.name, plan.price, plan.duration_days
        );
        for feature in &plan.features {
            println!("             • {feature}");
        }
    }
    println!("\nPayment methods:");
    for method in catalog.methods() {
        println!("  {:<10} {:<20} {}", method.id, method.name, method.account);
    }
    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = TierpassConfig::load(config_path.as_deref())?;
    config.validate()?;
    println!(
        "Configuration OK: {} admin(s), {} plan(s), {} payment method(s)",
        config.admins.ids.len(),
        config.catalog.plans.len(),
        config.catalog.payment_methods.len()
    );
    Ok(())
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; use --force to overwrite", path.display());
    }
    TierpassConfig::default().save_to_file(&path)?;
    println!("Wrote starter configuration to {}", path.display());
    println!("Add your administrator ids under [admins] before running.");
    Ok(())
}
