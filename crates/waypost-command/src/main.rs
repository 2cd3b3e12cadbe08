use std::sync::Arc;

use clap::{Parser, Subcommand};
use waypost_core::prefix::directory_key;
use waypost_core::{DirectoryStore, time};
use waypost_db::DbStore;

#[derive(Parser)]
#[command(name = "waypost")]
#[command(about = "Waypost Local Administrative CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL", default_value = "waypost.db")]
    db: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or edit a persisted agent directory
    Directory {
        #[command(subcommand)]
        sub: DirectoryCommands,
    },
    /// Show an overview of every stored directory
    Status,
}

#[derive(Subcommand)]
enum DirectoryCommands {
    /// List the agents registered under a prefix
    Show {
        #[arg(long)]
        prefix: Option<String>,
        /// Print the raw stored document
        #[arg(long)]
        json: bool,
    },
    /// Drop every agent registered under a prefix (offline only)
    ///
    /// Writes the stored document directly. Run it only while no registry is
    /// serving this database, or the registry may overwrite the change.
    Clear {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Remove a single agent by id (offline only)
    ///
    /// Writes the stored document directly. Run it only while no registry is
    /// serving this database, or the registry may overwrite the change.
    Remove {
        #[arg(long)]
        id: String,
        #[arg(long)]
        prefix: Option<String>,
    },
}

fn format_idle(millis: u64) -> String {
    let secs = millis / 1000;
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let directories = DirectoryStore::new(Arc::new(DbStore::new(&cli.db)?));
    let now = time::now();

    match cli.command {
        Commands::Directory { sub } => match sub {
            DirectoryCommands::Show { prefix, json } => {
                let prefix = waypost_core::prefix::normalize(prefix);
                let directory = directories.load(prefix.as_deref())?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&directory)?);
                    return Ok(());
                }

                println!("Directory {}:", directory_key(prefix.as_deref()));
                println!("{:<38} {:<20} {:<12} {:<14}", "ID", "Name", "Prefix", "Idle");
                println!("{}", "-".repeat(86));
                for record in directory.records() {
                    println!(
                        "{:<38} {:<20} {:<12} {:<14}",
                        record.id,
                        record.name,
                        record.environment_prefix.as_deref().unwrap_or("-"),
                        format_idle(record.idle_for(now))
                    );
                }
            }
            DirectoryCommands::Clear { prefix } => {
                let prefix = waypost_core::prefix::normalize(prefix);
                directories.clear(prefix.as_deref())?;
                println!("Directory cleared: {}", directory_key(prefix.as_deref()));
            }
            DirectoryCommands::Remove { id, prefix } => {
                let prefix = waypost_core::prefix::normalize(prefix);
                let removed = directories.update_if(prefix.as_deref(), |directory| {
                    directory.remove(&id)
                })?;
                match removed {
                    Some(record) => println!("Agent removed: {} ({})", record.id, record.name),
                    None => return Err(format!("No agent with id {id}").into()),
                }
            }
        },
        Commands::Status => {
            println!("Waypost Directory Status Overview");
            println!("{}", "=".repeat(35));
            let prefixes = directories.prefixes()?;
            if prefixes.is_empty() {
                println!("No directories stored.");
            }

            for prefix in prefixes {
                let directory = directories.load(prefix.as_deref())?;
                let oldest = directory
                    .records()
                    .map(|record| record.idle_for(now))
                    .max()
                    .unwrap_or(0);
                println!("{}:", directory_key(prefix.as_deref()));
                println!("  Agents:        {}", directory.len());
                println!("  Longest idle:  {}", format_idle(oldest));
            }
        }
    }

    Ok(())
}
