//! Account commands

use crate::client::Client;
use crate::config::ClientConfig;
use anyhow::Result;
use clap::Args;
use corider_core::{Profile, SessionStatus};
use tracing::info;

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub password: String,

    /// Profile to log in as
    #[arg(long, default_value = "rider")]
    pub profile: Profile,
}

pub async fn login(client: &Client, args: LoginArgs) -> Result<()> {
    let session = client
        .session
        .login(&args.email, &args.password, args.profile)
        .await?;
    client.save_session()?;
    println!(
        "Logged in as user {} ({})",
        session.user_id, session.profile
    );
    Ok(())
}

pub async fn logout(client: &Client) -> Result<()> {
    client.session.logout().await;
    client.save_session()?;
    println!("Logged out");
    Ok(())
}

pub async fn switch(client: &Client, profile: Profile) -> Result<()> {
    let session = client.session.switch_profile(profile).await?;
    client.save_session()?;
    info!(profile = %session.profile, "Profile switched");
    println!("Active profile: {}", session.profile);
    Ok(())
}

pub fn status(client: &Client, config: &ClientConfig) {
    println!("=== Corider Status ===");
    println!("API:          {}", config.transport.base_url);
    println!("Channel:      {}", config.transport.channel_url);
    println!("Session file: {}", config.session_file.display());
    match client.status() {
        SessionStatus::Active { profile, user_id } => {
            println!("Session:      active, user {user_id} as {profile}");
            if let Some(session) = client.session.current() {
                println!("Token expiry: {}", session.expires_at.to_rfc3339());
            }
        }
        SessionStatus::RequiresLogin => println!("Session:      expired, log in again"),
        SessionStatus::LoggedOut => println!("Session:      logged out"),
    }
}
