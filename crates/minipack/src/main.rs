use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use minipack::{Config, DedupeMode, config::CONFIG_FILE};

/// Bundle a JavaScript entry module and everything it imports into one file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; `minipack.toml` is used when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry module, overriding the configuration
    #[arg(short, long)]
    entry: Option<PathBuf>,

    /// Output path, overriding the configuration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build each resolved path once instead of once per import
    #[arg(long)]
    dedupe: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command-line values take precedence over the configuration file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(entry) = &self.entry {
            config.entry = Some(entry.clone());
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }
        if self.dedupe {
            config.dedupe = DedupeMode::ByPath;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);

    let bundler = config
        .into_bundler()
        .context("Failed to set up the build")?;
    let output = bundler.run().context("Build failed")?;

    info!(
        "Bundled {} modules ({} bytes) into {}",
        output.summary.modules,
        output.summary.bytes,
        output.summary.output_path.display()
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None if Path::new(CONFIG_FILE).is_file() => {
            Config::load(Path::new(CONFIG_FILE)).context("Failed to load minipack.toml")
        }
        None => Ok(Config::default()),
    }
}
