//! readmark - command-line front end for the read-tracking client
//!
//! Configuration and the auth session persist in a JSON file, so successive
//! invocations behave like one long-lived extension process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use readmark_sync::logging::{self, LogFormat};
use readmark_sync::{
    BackendConfig, ClientSettings, ConnectionCache, JsonFileStore, ReadStateClient,
    RestConnectionFactory, SignInError, ToggleOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "readmark")]
#[command(about = "Track read/unread state of URLs in a remote backend")]
#[command(version)]
struct Args {
    /// JSON file holding configuration and session
    #[arg(long, env = "READMARK_STORE", default_value = "readmark.json")]
    store: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "READMARK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log output format
    #[arg(long, env = "READMARK_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Request timeout in seconds
    #[arg(long, env = "READMARK_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set backend URL and anon key (omit both to clear)
    Configure {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        key: Option<String>,
        /// Do not send page titles to the backend
        #[arg(long)]
        privacy: bool,
    },
    /// Show the stored status of a URL
    Status { url: String },
    /// Flip the read status of a URL
    Toggle {
        url: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// List recently read records
    List {
        #[arg(default_value = "")]
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Sign in with email and password
    Login {
        email: String,
        #[arg(long, env = "READMARK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Check that a backend connection can be built
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    let settings = ClientSettings {
        timeout_secs: args.timeout_secs,
        ..ClientSettings::default()
    };
    let store = Arc::new(JsonFileStore::new(&args.store));
    let factory = Arc::new(RestConnectionFactory::new(Duration::from_secs(
        settings.timeout_secs,
    )));
    let client = ReadStateClient::new(Arc::new(ConnectionCache::new(store, factory)), settings);
    info!("Using store {}", args.store.display());

    match args.command {
        Command::Configure { url, key, privacy } => {
            let config = BackendConfig {
                url,
                anon_key: key,
                privacy,
            };
            client
                .configure(&config)
                .await
                .context("failed to write configuration")?;
            let stored = client.config().await?;
            println!(
                "configured: {} (privacy {})",
                if stored.credentials().is_some() { "yes" } else { "no" },
                if stored.privacy { "on" } else { "off" }
            );
        }
        Command::Status { url } => {
            let lookup = client.get_status_for_url(&url).await?;
            if lookup.auth_error {
                anyhow::bail!("not signed in or session expired");
            }
            println!("{}", lookup.status.as_deref().unwrap_or("none"));
        }
        Command::Toggle { url, title } => {
            match client.toggle_read_for_url(&url, title.as_deref()).await? {
                outcome @ ToggleOutcome::Toggled(_) => {
                    println!("{}", outcome.status().unwrap_or("toggled"))
                }
                ToggleOutcome::AuthError => anyhow::bail!("not signed in or session expired"),
                ToggleOutcome::Failed => anyhow::bail!("toggle failed"),
            }
        }
        Command::List {
            query,
            page,
            page_size,
        } => {
            let result = client.list_recent(&query, page, page_size).await;
            if result.auth_error {
                anyhow::bail!("not signed in or session expired");
            }
            for record in &result.items {
                let when = record
                    .last_read_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<6} {:<16} {:<24} {}",
                    record.status,
                    when,
                    record.domain,
                    record.title.as_deref().unwrap_or(&record.url)
                );
            }
            if result.has_more {
                println!("(more: --page {})", page.max(1) + 1);
            }
        }
        Command::Login { email, password } => {
            let outcome = client.sign_in_with_password(&email, &password).await;
            match outcome.error {
                None => println!("signed in"),
                Some(SignInError::NoClient) => anyhow::bail!("backend not configured"),
                Some(SignInError::Backend(e)) => anyhow::bail!("sign-in failed: {e}"),
            }
        }
        Command::Logout => {
            client.sign_out().await;
            println!("signed out");
        }
        Command::Whoami => match client.get_user().await {
            Some(user) => println!("{}", user.email.unwrap_or(user.id)),
            None => println!("not signed in"),
        },
        Command::Check => {
            if !client.test_connection().await {
                anyhow::bail!("backend not configured or unreachable");
            }
            println!("ok");
        }
    }

    Ok(())
}
