//! share-hub command line
//!
//! Browse, fetch and upload files in an access-controlled share.

use anyhow::Result;
use clap::{Parser, Subcommand};
use share_hub::{Fetched, Session};
use share_hub_core::config::{ShareConfig, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "share-hub")]
#[command(about = "Access-controlled file sharing")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// User to act as; anonymous when omitted
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download a file, or a directory as .tar.gz
    Get {
        path: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a local file into a directory
    Put {
        local: PathBuf,

        #[arg(default_value = "/")]
        dir: String,
    },

    /// Show read/write permissions for a path
    Check { path: String },

    /// Validate the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ShareConfig::read(&cli.config)?;
    init_tracing(&config.log_level);
    config.validate()?;

    if let Commands::Validate = cli.command {
        println!(
            "{}: ok ({} users, {} default rules)",
            cli.config.display(),
            config.users.len(),
            config.default_acl.len()
        );
        return Ok(());
    }

    let session = Session::open(&config, cli.user.as_deref())?;
    info!(user = session.principal().name(), "session opened");

    tokio::task::spawn_blocking(move || run(session, cli.command)).await??;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(session: Session, command: Commands) -> Result<()> {
    match command {
        Commands::Ls { path, json } => {
            let entries = session.list(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    let kind = if entry.is_dir { "d" } else { "-" };
                    let modified = entry
                        .modified
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!("{kind} {:>10} {:>16} {}", entry.size, modified, entry.name);
                }
            }
        }
        Commands::Get { path, output } => match session.fetch(&path, output.as_deref())? {
            Fetched::File(p) => println!("saved {}", p.display()),
            Fetched::Archive(p) => println!("exported {}", p.display()),
        },
        Commands::Put { local, dir } => {
            let stored = session.upload(&local, &dir)?;
            println!("stored {stored}");
        }
        Commands::Check { path } => {
            let perms = session.check(&path);
            println!("read: {}, write: {}", perms.read, perms.write);
        }
        Commands::Validate => {}
    }
    Ok(())
}
