use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use voxelwright::{AgentCommand, BuildConfig, BuildingManager, OutcomeStatus, load_config};

#[derive(Parser)]
#[command(
    name = "voxelwright",
    version,
    about = "Inspect structure files and persisted build state",
    long_about = None
)]
pub struct Cli {
    /// JSON config file (missing file means defaults)
    #[arg(long, default_value = "voxelwright.json")]
    pub config: PathBuf,
    /// Override the schematics root
    #[arg(long)]
    pub schematics: Option<PathBuf>,
    /// Override the build state root
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
    /// Agent whose build state to inspect
    #[arg(long, default_value = "builder")]
    pub agent: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List registered structures
    List {
        /// Only this category (buildings, decorations, farms, utility, misc)
        #[arg(long)]
        category: Option<String>,
    },
    /// Show size and block counts for a structure
    Describe { name: String },
    /// Show the materials a structure needs
    Materials { name: String },
    /// Show the persisted build state
    State,
    /// Drop the persisted build state
    Cancel,
}

impl Command {
    fn into_agent_command(self) -> AgentCommand {
        match self {
            Command::List { category } => AgentCommand::ListStructures { category },
            Command::Describe { name } => AgentCommand::DescribeStructure { name },
            Command::Materials { name } => AgentCommand::PreviewMaterials { name },
            Command::State => AgentCommand::GetBuildState,
            Command::Cancel => AgentCommand::CancelBuild,
        }
    }
}

pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = dispatch(cli) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<BuildConfig, String> {
    let mut config = load_config(&cli.config).map_err(|e| e.to_string())?;
    if let Some(dir) = &cli.schematics {
        config.schematics_dir = dir.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }
    Ok(config)
}

fn dispatch(cli: Cli) -> Result<(), String> {
    let config = resolve_config(&cli)?;
    let manager = BuildingManager::new(config, &cli.agent);
    let command = cli.command.into_agent_command();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {}", e))?;
    let outcome = runtime.block_on(manager.execute(command));

    match outcome.status {
        OutcomeStatus::Error => Err(outcome.message),
        _ => {
            println!("{}", outcome.render());
            Ok(())
        }
    }
}
