//! vupbake CLI: bake the visualization dataset and maintain the avatar directory.
//!
//! Commands:
//! - `bake`: whitelist + raw series → baked CSV with avatars and colors
//! - `retry-avatars`: re-download placeholder avatars through the entity directory
//! - `avatars`: report valid, placeholder and corrupt avatar counts
//! - `config`: print the effective configuration as TOML

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use vupbake_core::avatar::{
    CircuitBreaker, EntityDirectory, HttpTransport, ImageTransport, NoDirectory, OfflineTransport,
    VtbsDirectory,
};
use vupbake_core::color::ImageColorExtractor;
use vupbake_core::config::AvatarConfig;
use vupbake_core::{
    avatar_status, bake, repair_avatars, AvatarStatus, BakeConfig, BakeDeps, BakeSummary,
    RepairSummary, TracingProgress,
};

#[derive(Parser)]
#[command(
    name = "vupbake",
    version,
    about = "Bake follower-count time series into a bar-chart-race dataset"
)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write the baked dataset.
    Bake {
        #[command(flatten)]
        common: CommonArgs,

        /// Whitelist CSV (mid,name,follower,face).
        #[arg(long)]
        whitelist: Option<PathBuf>,

        /// Raw series CSV (date,name,value).
        #[arg(long)]
        series: Option<PathBuf>,

        /// Output dataset CSV.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Daily ranking cutoff for target selection.
        #[arg(long)]
        top_k: Option<usize>,

        /// Offline mode: no network access, missing avatars become placeholders.
        #[arg(long, default_value_t = false)]
        offline: bool,
    },
    /// Re-download placeholder avatars via the entity directory.
    RetryAvatars {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Report the state of the avatar directory.
    Avatars {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the effective configuration as TOML.
    Config {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Avatar directory.
    #[arg(long)]
    avatar_dir: Option<PathBuf>,

    /// Print the result as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl CommonArgs {
    fn load_config(&self) -> Result<BakeConfig> {
        let mut config = load_config(self.config.as_ref())?;
        if let Some(dir) = &self.avatar_dir {
            config.paths.avatar_dir = dir.clone();
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Bake {
            common,
            whitelist,
            series,
            output,
            top_k,
            offline,
        } => {
            let mut config = common.load_config()?;
            if let Some(path) = whitelist {
                config.paths.whitelist = path;
            }
            if let Some(path) = series {
                config.paths.series = path;
            }
            if let Some(path) = output {
                config.paths.output = path;
            }
            if let Some(k) = top_k {
                config.selection.top_k = k;
            }
            run_bake(&config, offline, common.json)
        }
        Commands::RetryAvatars { common } => run_retry_avatars(&common.load_config()?, common.json),
        Commands::Avatars { common } => run_avatar_status(&common.load_config()?, common.json),
        Commands::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<BakeConfig> {
    match path {
        Some(path) => BakeConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(BakeConfig::default()),
    }
}

/// Network collaborators, or their offline stand-ins.
struct Network {
    transport: Box<dyn ImageTransport>,
    directory: Box<dyn EntityDirectory>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Network {
    fn connect(config: &AvatarConfig, offline: bool) -> Result<Self> {
        if offline {
            return Ok(Self {
                transport: Box::new(OfflineTransport),
                directory: Box::new(NoDirectory),
                breaker: None,
            });
        }

        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_threshold,
            config.breaker_cooldown(),
        ));
        let transport = HttpTransport::new(config, Arc::clone(&breaker))
            .context("failed to set up image transport")?;
        let directory = VtbsDirectory::new(config).context("failed to set up directory client")?;
        Ok(Self {
            transport: Box::new(transport),
            directory: Box::new(directory),
            breaker: Some(breaker),
        })
    }

    fn deps<'a>(&'a self, extractor: &'a ImageColorExtractor) -> BakeDeps<'a> {
        BakeDeps {
            transport: self.transport.as_ref(),
            directory: self.directory.as_ref(),
            extractor,
        }
    }

    fn report_breaker(&self) {
        if let Some(breaker) = &self.breaker {
            if !breaker.is_allowed() {
                warn!(
                    "image host blocked this run; retry after {}s or run `vupbake retry-avatars`",
                    breaker.remaining_cooldown().as_secs()
                );
            }
        }
    }
}

fn run_bake(config: &BakeConfig, offline: bool, json: bool) -> Result<()> {
    let network = Network::connect(&config.avatar, offline)?;
    let extractor = ImageColorExtractor::default();

    let summary = bake(config, network.deps(&extractor), &TracingProgress)?;
    network.report_breaker();

    if json {
        print_json(&summary)
    } else {
        print_bake_summary(&summary);
        Ok(())
    }
}

fn run_retry_avatars(config: &BakeConfig, json: bool) -> Result<()> {
    let network = Network::connect(&config.avatar, false)?;
    let extractor = ImageColorExtractor::default();

    let summary = repair_avatars(config, network.deps(&extractor), &TracingProgress)?;
    network.report_breaker();

    if json {
        print_json(&summary)
    } else {
        print_repair_summary(&summary);
        Ok(())
    }
}

fn run_avatar_status(config: &BakeConfig, json: bool) -> Result<()> {
    let status = avatar_status(config)?;
    if json {
        return print_json(&status);
    }
    print_avatar_status(config, &status);
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize result")?;
    println!("{json}");
    Ok(())
}

fn print_bake_summary(s: &BakeSummary) {
    println!("Baked: {}", s.output.display());
    println!("{}", "-".repeat(48));
    println!("  Whitelist entries:   {}", s.whitelist_entries);
    println!(
        "  Series rows:         {} read, {} kept, {} malformed, {} not whitelisted",
        s.load.rows_read, s.load.rows_kept, s.load.rows_malformed, s.load.rows_not_whitelisted
    );
    println!("  Days:                {}", s.days);
    println!("  Target entities:     {}", s.targets);
    println!("  Forward-filled:      {}", s.filled);
    println!(
        "  Avatars:             {} kept, {} downloaded, {} via directory, {} placeholder",
        s.avatars.existing, s.avatars.downloaded, s.avatars.fallback, s.avatars.placeholder
    );
    println!(
        "  Colors:              {} override, {} extracted, {} default",
        s.colors.overridden, s.colors.extracted, s.colors.defaulted
    );
    println!("  Rows written:        {}", s.rows_written);
    println!("  Dataset hash:        {}", s.dataset_hash);
}

fn print_repair_summary(s: &RepairSummary) {
    if s.placeholders == 0 {
        println!("No placeholder avatars among {} files.", s.scanned);
        return;
    }
    println!("Repaired: {} of {} placeholder(s)", s.fixed.len(), s.placeholders);
    for name in &s.fixed {
        println!("  fixed:  {name}");
    }
    for name in &s.still_failed {
        println!("  failed: {name}");
    }
}

fn print_avatar_status(config: &BakeConfig, s: &AvatarStatus) {
    println!("Avatars: {}", config.paths.avatar_dir.display());
    println!("  Valid:       {}", s.valid);
    println!("  Placeholder: {}", s.placeholder);
    println!("  Corrupt:     {}", s.corrupt);
    for name in &s.corrupt_names {
        println!("    corrupt: {name}");
    }
}
