use super::{TargetArgs, provider_options};
use anyhow::Result;
use clap::{ArgMatches, Args};
use cluster_orchestration::DeleteOutcome;
use cluster_state::ClusterDescriptor;
use k3sctl::App;
use std::io::{self, BufRead, Write};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Skip confirmation and keep going when cleanup steps fail
    #[arg(short, long)]
    pub force: bool,
}

fn confirm_on_stdin(prompt: &str) -> bool {
    print!("{prompt} ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

pub async fn run(app: &mut App, args: DeleteArgs, matches: &ArgMatches) -> Result<()> {
    let (options, _) = provider_options(app, &args.target.provider, matches)?;
    let mut overrides = ClusterDescriptor::new(&args.target.name, &args.target.provider);
    overrides.options = options;

    match app
        .orchestrator
        .delete(overrides, args.force, &confirm_on_stdin)
        .await?
    {
        DeleteOutcome::Deleted => println!("Cluster {} deleted", args.target.name),
        DeleteOutcome::Cancelled => println!("Delete cancelled"),
        DeleteOutcome::NotFound => {
            println!("Cluster {} not found, nothing to delete", args.target.name)
        }
    }
    Ok(())
}
