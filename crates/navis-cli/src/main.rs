//! Navis CLI
//!
//! Command-line interface for running and inspecting a Navis validator.

mod simulate;

use clap::{Parser, Subcommand};
use navis_node::{ArchiveStore, FileArchive, LogFormat, NodeConfig, PhaseOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "navis")]
#[command(author = "Navis Contributors")]
#[command(version)]
#[command(about = "Navis - validator weight consensus, slashing and miner rewards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "NAVIS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the epoch pipeline against simulated validators and miners
    Simulate {
        /// Number of epochs to run
        #[arg(short, long, default_value = "5")]
        epochs: u64,

        /// Validators in the active set, including this node
        #[arg(long, default_value = "5")]
        validators: usize,

        /// Validators that submit random vectors
        #[arg(long, default_value = "1")]
        outliers: usize,

        /// Active miners (UIDs 0..miners)
        #[arg(short, long, default_value = "40")]
        miners: u16,

        /// RNG seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Archive epochs to this directory instead of memory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration as TOML
    Config,

    /// List archived epochs
    Archive {
        /// Data directory holding epochs.jsonl
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

fn init_logging(verbose: bool, level: &str, format: LogFormat) {
    let default_level = if verbose { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    Ok(NodeConfig::load(path)?)
}

fn phase_label(outcome: &PhaseOutcome) -> &'static str {
    match outcome {
        PhaseOutcome::Completed => "ok",
        PhaseOutcome::Skipped { .. } => "skipped",
    }
}

fn list_archive(data_dir: &Path) -> anyhow::Result<()> {
    let archive = FileArchive::open(data_dir)?;
    let epochs = archive.epochs()?;
    if epochs.is_empty() {
        println!("No archived epochs in {}", data_dir.display());
        return Ok(());
    }

    println!(
        "{:>6}  {:<9} {:>5} {:>4} {:>7}  {:<9} {:>6} {:>6} {:>6}",
        "epoch", "consensus", "part", "dev", "slashes", "rewards", "miners", "gini", "top10"
    );
    for report in &epochs {
        let (miners, gini, top10) = report
            .distribution
            .as_ref()
            .map(|d| (d.miner_profiles.len(), d.gini_coefficient, d.top10_concentration))
            .unwrap_or((0, 0.0, 0.0));
        println!(
            "{:>6}  {:<9} {:>5} {:>4} {:>7}  {:<9} {:>6} {:>6.3} {:>6.3}",
            report.epoch_id.0,
            phase_label(&report.consensus),
            report.participants,
            report.deviations.len(),
            report.slashes.len(),
            phase_label(&report.rewarding),
            miners,
            gini,
            top10,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level, config.logging.format);

    match cli.command {
        Commands::Simulate {
            epochs,
            validators,
            outliers,
            miners,
            seed,
            data_dir,
            metrics,
        } => {
            let params = simulate::Params {
                epochs,
                validators,
                outliers,
                miners,
                seed,
                data_dir,
                print_metrics: metrics && config.metrics.enabled,
            };
            simulate::run(config, params).await?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }

        Commands::Archive { data_dir } => {
            list_archive(&data_dir)?;
        }
    }

    Ok(())
}
