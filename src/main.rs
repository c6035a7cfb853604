use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

#[derive(Parser)]
#[command(name = "flowsync")]
#[command(
    about = "Keeps flow specifications and their generated implementations in sync",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, default_value = ".", help = "Project root directory")]
    project: PathBuf,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,

    #[arg(long, global = true, help = "Show what would change without writing anything")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the implementation command for one flow and record the result")]
    Implement {
        #[arg(help = "Flow key as <domain>/<flow>")]
        flow: String,

        #[arg(long, help = "Use this file as the prompt instead of building one from the spec")]
        prompt_file: Option<PathBuf>,
    },

    #[command(about = "Run the configured test command and summarize the results")]
    Test,

    #[command(about = "Detect drift between specs, implementations and the mapping")]
    Drift,

    #[command(about = "Show the sync score")]
    Status,

    #[command(about = "Resolve the drift of one flow")]
    Resolve {
        #[arg(help = "Flow key as <domain>/<flow>")]
        flow: String,

        #[arg(help = "accept, reimplement or ignore")]
        action: String,
    },

    #[command(about = "Resolve every drifted flow at once")]
    ResolveAll {
        #[arg(help = "accept or ignore")]
        action: String,
    },

    #[command(about = "Print recorded mappings as YAML")]
    Mapping {
        #[arg(help = "Optional flow key; prints every mapping when omitted")]
        flow: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine
    let _ = dotenvy::dotenv();
    init_logging(cli.verbose);

    let config = cli::Config {
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        project: cli.project,
    };

    match cli.command {
        Commands::Implement { flow, prompt_file } => {
            cli::implement(&flow, prompt_file, &config).await?;
        }
        Commands::Test => {
            cli::test(&config).await?;
        }
        Commands::Drift => {
            cli::drift(&config)?;
        }
        Commands::Status => {
            cli::status(&config)?;
        }
        Commands::Resolve { flow, action } => {
            cli::resolve(&flow, &action, &config).await?;
        }
        Commands::ResolveAll { action } => {
            cli::resolve_all(&action, &config)?;
        }
        Commands::Mapping { flow } => {
            cli::mapping(flow.as_deref(), &config)?;
        }
    }

    Ok(())
}
