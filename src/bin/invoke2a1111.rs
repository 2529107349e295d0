//! invoke2a1111 CLI
//!
//! Converts InvokeAI generated PNGs to Automatic1111 format, for easy upload
//! to Civitai. Writes `<name>_a1111.png` next to each input.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use invoke2a1111::{
    config::DEFAULT_CONFIG_FILE, hashing::DEFAULT_HASH_CACHE_FILE, Config, Converter, HashCache,
};

#[derive(Parser)]
#[command(name = "invoke2a1111", version)]
#[command(about = "Convert InvokeAI generated images to Automatic1111 format")]
struct Cli {
    /// PNG files generated by InvokeAI
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to the config file with model and output folders
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Path to the model hash cache
    #[arg(long, default_value = DEFAULT_HASH_CACHE_FILE)]
    hash_cache: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let cache = match HashCache::load(&cli.hash_cache) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load hash cache");
            return ExitCode::FAILURE;
        }
    };

    let mut converter = Converter::new(config, cache);
    match converter.run(cli.files.as_slice()) {
        Ok(report) => {
            println!("Work complete. {}", report.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Aborting batch");
            ExitCode::FAILURE
        }
    }
}
