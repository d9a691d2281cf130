use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ClockWork session manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the ClockWork backend
    #[arg(short = 'u', long, env = "CLOCKWORK_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Path to the session credential database
    #[arg(short = 'd', long, env = "CLOCKWORK_SESSION_DB")]
    pub session_db: Option<String>,

    /// Seconds before expiry at which the proactive refresh fires
    #[arg(long, env = "TOKEN_REFRESH_MARGIN", default_value = "300")]
    pub refresh_margin: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and start a session
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
    },
    /// Sign in with a one-time code sent by email
    Otp {
        #[arg(long)]
        email: String,
    },
    /// Show the current session state
    Status,
    /// Force a token refresh now
    Refresh,
    /// Clear the session and revoke the refresh token
    Logout,
    /// Keep the session alive and report lifecycle events
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub session_db: PathBuf,
    pub refresh_margin: u64,
    pub log_level: String,
    pub connect_timeout: u64,
    pub request_timeout: u64,
}

impl Config {
    /// Resolve configuration from parsed CLI arguments (CLI > ENV >
    /// defaults; the session db falls back to the platform data dir).
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let session_db = match &args.session_db {
            Some(path) => expand_tilde(path),
            None => default_session_db()?,
        };

        Ok(Config {
            api_url: args.api_url.trim_end_matches('/').to_string(),
            session_db,
            refresh_margin: args.refresh_margin,
            log_level: args.log_level.clone(),
            connect_timeout: args.connect_timeout,
            request_timeout: args.request_timeout,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!(
                "CLOCKWORK_API_URL must start with http:// or https:// (got: {})",
                self.api_url
            );
        }
        if self.refresh_margin == 0 {
            anyhow::bail!("TOKEN_REFRESH_MARGIN must be greater than zero");
        }
        if let Some(parent) = self.session_db.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create session db directory: {}", parent.display())
            })?;
        }
        Ok(())
    }
}

fn default_session_db() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not determine the platform data directory")?;
    Ok(base.join("clockwork").join("session.db"))
}

/// Expand a leading ~ to the home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            api_url: "http://localhost:8080".to_string(),
            session_db: std::env::temp_dir().join("clockwork-test").join("session.db"),
            refresh_margin: 300,
            log_level: "info".to_string(),
            connect_timeout: 10,
            request_timeout: 30,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = test_config();
        config.api_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_margin() {
        let mut config = test_config();
        config.refresh_margin = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/clockwork/session.db");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("clockwork/session.db"));
        }

        let absolute = expand_tilde("/var/lib/clockwork/session.db");
        assert_eq!(absolute, PathBuf::from("/var/lib/clockwork/session.db"));
    }
}
