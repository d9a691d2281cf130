use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use std::sync::Arc;
use std::time::Duration;

mod auth;
mod config;
mod error;
mod http_client;

use auth::{CredentialStore, HttpAuthGateway, LoginOutcome, SessionCoordinator};
use config::{CliArgs, Command, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::from_args(&args)?;
    config.validate()?;

    // Initialize logging with the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    tracing::debug!(api_url = %config.api_url, db = %config.session_db.display(), "starting");

    let store = CredentialStore::open(&config.session_db)
        .with_context(|| format!("Failed to open session db: {}", config.session_db.display()))?;
    let gateway = Arc::new(HttpAuthGateway::new(
        &config.api_url,
        Duration::from_secs(config.request_timeout),
    )?);
    let coordinator = SessionCoordinator::new(
        store,
        gateway,
        Duration::from_secs(config.refresh_margin),
    );

    match args.command {
        Command::Register { name, email } => {
            let password = Password::new()
                .with_prompt("Password")
                .with_confirmation("Confirm password", "Passwords do not match")
                .interact()?;
            coordinator.register(&name, &email, &password).await?;
            println!("Registered and signed in as {email}");
        }

        Command::Login { email } => {
            let password = Password::new().with_prompt("Password").interact()?;
            match coordinator.login(&email, &password).await? {
                LoginOutcome::Authenticated(_) => println!("Signed in as {email}"),
                LoginOutcome::VerificationRequired => {
                    println!("A verification code was sent to {email}");
                    let otp: String = Input::new().with_prompt("Verification code").interact()?;
                    coordinator.verify_signup_email(&email, otp.trim()).await?;
                    println!("Email verified, signed in as {email}");
                }
            }
        }

        Command::Otp { email } => {
            coordinator.send_otp(&email).await?;
            println!("A one-time code was sent to {email}");
            let otp: String = Input::new().with_prompt("Code").interact()?;
            coordinator.verify_otp(&email, otp.trim()).await?;
            println!("Signed in as {email}");
        }

        Command::Status => {
            let session = coordinator.session()?;
            if coordinator.is_authenticated() {
                println!("Session: authenticated");
                match session.expires_at {
                    Some(expires_at) => println!("Access token expires: {}", expires_at.to_rfc3339()),
                    None => println!("Access token expires: unknown"),
                }
                println!(
                    "Refresh token: {}",
                    if session.refresh_token.is_some() { "present" } else { "absent" }
                );
            } else {
                println!("Session: not authenticated");
            }
        }

        Command::Refresh => {
            coordinator.fresh_access_token(None).await?;
            let session = coordinator.session()?;
            match session.expires_at {
                Some(expires_at) => println!("Token refreshed, expires {}", expires_at.to_rfc3339()),
                None => println!("Token refreshed"),
            }
        }

        Command::Logout => {
            coordinator.logout();
            // Give the best-effort server-side revocation a moment before exit
            tokio::time::sleep(Duration::from_millis(200)).await;
            println!("Signed out");
        }

        Command::Watch => {
            if !coordinator.is_authenticated() {
                anyhow::bail!("No session to watch; sign in first");
            }
            coordinator.resume();
            let mut cleared = coordinator.subscribe_cleared();
            println!("Watching session; ctrl-c to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        println!("Stopped watching");
                        break;
                    }
                    reason = cleared.recv() => {
                        match reason {
                            Ok(reason) => {
                                println!("Session cleared: {reason:?}");
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        if let Ok(session) = coordinator.session() {
                            if let Some(expires_at) = session.expires_at {
                                tracing::info!(expires_at = %expires_at.to_rfc3339(), "session alive");
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
