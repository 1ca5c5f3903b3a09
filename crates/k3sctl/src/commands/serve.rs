use anyhow::Result;
use clap::Args;
use k3sctl::config::DEFAULT_LISTEN_ADDR;
use k3sctl::{App, daemon, logging};
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

pub async fn run(
    config: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    args: ServeArgs,
    verbose: u8,
) -> Result<()> {
    let app = App::open(config, state_dir).await?;

    let log_file = args.log_file.or_else(|| app.config.log_file.clone());
    let _guard = match &log_file {
        Some(path) => Some(logging::init_file(verbose, path)?),
        None => {
            logging::init(verbose);
            None
        }
    };

    let addr = args
        .listen
        .or_else(|| app.config.listen_addr.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

    info!("Starting k3sctl API server");
    info!("State directory: {}", app.orchestrator.config().state_dir.display());
    println!("k3sctl API starting on ws://{addr}");
    if let Some(path) = &log_file {
        println!("Log file: {}", path.display());
    }

    daemon::run(app.orchestrator, &addr).await
}
