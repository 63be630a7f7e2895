use anyhow::Result;
use clap::Parser;
use tracing::error;

mod cli;
#[cfg(unix)]
mod foreground;
#[cfg(windows)]
mod service;

use cli::Args;

fn main() {
    let args = Args::parse();

    if let Err(e) = initialize_logging(args.debug) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("svcbatch: {:#}", e);
            cli::error_code(&e)
        }
    };
    std::process::exit(code as i32);
}

#[cfg(unix)]
fn run(args: Args) -> Result<u32> {
    foreground::run(args)
}

#[cfg(windows)]
fn run(args: Args) -> Result<u32> {
    service::run(args)
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
