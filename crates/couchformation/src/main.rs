mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;

#[derive(Parser)]
#[command(name = "cloudmgr")]
#[command(about = "Couch Formation: provision Couchbase clusters on any cloud", long_about = None)]
struct Cli {
    /// Run node work on tasks in this process instead of spawning subprocesses
    #[arg(long, global = true)]
    serial: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a service and add a node group to it (repeat to add groups)
    Create {
        /// Project name
        #[arg(short, long)]
        project: String,
        /// Service name
        #[arg(short, long)]
        name: String,
        /// Cloud (aws, azure, gcp, docker, capella)
        #[arg(short, long)]
        cloud: String,
        /// Region (defaults to default_region from settings.yaml)
        #[arg(short, long)]
        region: Option<String>,
        /// Number of nodes in the group
        #[arg(short, long, default_value = "1")]
        quantity: u32,
        /// Machine type, e.g. 4x16
        #[arg(short, long, default_value = "4x16")]
        machine_type: String,
        /// Image override
        #[arg(long)]
        image: Option<String>,
        /// Data volume size in GiB
        #[arg(long)]
        volume_size: Option<u32>,
        /// Tags applied to the nodes
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Create the network and every node of a service
    Deploy {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        name: String,
    },
    /// Delete every node of a service and release its network
    Destroy {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        name: String,
    },
    /// List the services of a project, or the nodes of one service
    List {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Forget a service that has been destroyed
    Remove {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        name: String,
    },
    /// Destroy every service of a project and delete it
    Clean {
        #[arg(short, long)]
        project: String,
        /// Drop services whose teardown fails and release their network anyway
        #[arg(long)]
        force: bool,
    },
    /// Dump the recorded state of a project as JSON
    Show {
        #[arg(short, long)]
        project: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show version information
    Version,
    /// Run one work unit read from stdin
    #[command(hide = true)]
    Worker,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries worker replies and command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let serial = cli.serial;
    match cli.command {
        Commands::Create {
            project,
            name,
            cloud,
            region,
            quantity,
            machine_type,
            image,
            volume_size,
            tags,
        } => commands::create::handle(commands::create::CreateArgs {
            project,
            name,
            cloud,
            region,
            quantity,
            machine_type,
            image,
            volume_size,
            tags,
        }),
        Commands::Deploy { project, name } => {
            commands::deploy::handle(&project, &name, serial).await
        }
        Commands::Destroy { project, name } => {
            commands::destroy::handle(&project, &name, serial).await
        }
        Commands::List { project, name } => {
            commands::list::handle(&project, name.as_deref(), serial).await
        }
        Commands::Remove { project, name } => commands::remove::handle(&project, &name),
        Commands::Clean { project, force } => {
            commands::clean::handle(&project, force, serial).await
        }
        Commands::Show { project, name } => commands::show::handle(&project, name.as_deref()),
        Commands::Version => {
            println!("cloudmgr {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Worker => commands::worker::handle().await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
