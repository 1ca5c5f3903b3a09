use anyhow::Result;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use cluster_orchestration::ProviderRegistry;
use k3sctl::{App, flags, logging};
use std::path::PathBuf;

mod commands;

use commands::OutputFormat;
use commands::create::CreateArgs;
use commands::delete::DeleteArgs;
use commands::join::JoinArgs;
use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "k3sctl")]
#[command(about = "Provision and manage k3s clusters")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ~/.k3sctl/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cluster state records
    #[arg(long, global = true, env = "K3SCTL_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a cluster
    Create(CreateArgs),

    /// Add nodes to a running cluster
    Join(JoinArgs),

    /// Delete a cluster and its infrastructure
    Delete(DeleteArgs),

    /// List clusters, dropping the ones gone from their provider
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Show the nodes of a cluster
    Describe {
        /// Cluster ID (name.region.provider or name.provider)
        id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Run the WebSocket API server
    Serve(ServeArgs),
}

/// Parse the command line, adding the flags of the provider named by `--provider`
fn parse() -> (Cli, ArgMatches) {
    let args: Vec<String> = std::env::args().collect();
    let mut command = Cli::command();
    if let Some(name) = flags::provider_from_args(&args) {
        if let Ok(provider) = ProviderRegistry::with_defaults().build(&name) {
            command = flags::augment(command, provider.as_ref());
        }
    }

    let matches = command.get_matches_from(&args);
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    (cli, matches)
}

async fn dispatch(app: &mut App, command: Commands, sub: &ArgMatches) -> Result<()> {
    match command {
        Commands::Create(args) => commands::create::run(app, args, sub).await,
        Commands::Join(args) => commands::join::run(app, args, sub).await,
        Commands::Delete(args) => commands::delete::run(app, args, sub).await,
        Commands::List { output } => commands::list::run(app, output).await,
        Commands::Describe { id, output } => commands::describe::run(app, &id, output).await,
        Commands::Serve(_) => unreachable!("serve is handled before the state is opened"),
    }
}

fn main() -> Result<()> {
    let (cli, matches) = parse();
    let sub = matches
        .subcommand()
        .map(|(_, sub)| sub.clone())
        .unwrap_or_default();

    smol::block_on(async {
        match cli.command {
            Commands::Serve(args) => {
                commands::serve::run(cli.config, cli.state_dir, args, cli.verbose).await
            }
            command => {
                logging::init(cli.verbose);
                let mut app = App::open(cli.config, cli.state_dir).await?;
                dispatch(&mut app, command, &sub).await
            }
        }
    })
}
