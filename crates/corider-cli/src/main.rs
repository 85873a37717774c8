//! Command-line rider and driver client for the ride dispatch backend

use anyhow::Result;
use clap::{Parser, Subcommand};
use corider_cli::commands::{account, drive, ride};
use corider_cli::{Client, ClientConfig};
use corider_core::Profile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "corider")]
#[command(about = "Corider - campus ride sharing from the terminal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true, default_value = ".corider/config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login(account::LoginArgs),
    /// End the session
    Logout,
    /// Switch between the rider and driver profiles
    Switch { profile: Profile },
    /// Show session and endpoint status
    Status,
    /// Rider operations
    #[command(subcommand)]
    Ride(ride::RideCommand),
    /// Go online as a driver and handle offers interactively
    Drive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = ClientConfig::load(&cli.config)?;
    let client = Client::build(&config)?;

    let outcome = match cli.command {
        Commands::Login(args) => account::login(&client, args).await,
        Commands::Logout => account::logout(&client).await,
        Commands::Switch { profile } => account::switch(&client, profile).await,
        Commands::Status => {
            account::status(&client, &config);
            Ok(())
        }
        Commands::Ride(command) => ride::run(&client, command).await,
        Commands::Drive => drive::run(&client).await,
    };

    client.close()?;
    outcome
}
