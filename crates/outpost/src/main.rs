//! `outpost` - operator CLI for the outbound mail queue.
//!
//! Runs dispatch passes (once, or periodically) and administers accounts,
//! the blacklist and the delivery log.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod commands;
mod settings;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outpost_core::{Priority, Security, Store};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Durable outbound email queue.
#[derive(Parser, Debug)]
#[command(name = "outpost")]
#[command(about = "Queue outbound email and dispatch it through rate-limited accounts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file. Defaults to <config dir>/outpost/settings.json
    #[arg(long, env = "OUTPOST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the settings file.
    #[arg(long, env = "OUTPOST_DATABASE", global = true)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single dispatch pass
    Dispatch,
    /// Run dispatch passes periodically until interrupted
    Run {
        /// Seconds between passes, overriding the settings file
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Store a message and queue it for sending
    Enqueue {
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Sender address; defaults to the sending account's address
        #[arg(long)]
        from: Option<String>,
        /// Subject, for listings only; the payload is sent as-is
        #[arg(long)]
        subject: Option<String>,
        /// high, normal or low
        #[arg(long, default_value = "normal")]
        priority: Priority,
        /// File holding the encoded message
        payload: PathBuf,
    },
    /// Show queue, account and log counts
    Status,
    /// Manage sending accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Manage suppressed recipients
    #[command(subcommand)]
    Blacklist(BlacklistCommand),
    /// Show delivery history
    Log {
        /// Only this message's history
        #[arg(long)]
        message: Option<i64>,
        /// Number of recent entries
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Add a sending account
    Add {
        /// Login identity on the SMTP server
        host_user: String,
        /// Login secret
        #[arg(long, env = "OUTPOST_SMTP_PASSWORD", hide_env_values = true)]
        password: String,
        /// Default sender address
        #[arg(long)]
        from: Option<String>,
        /// SMTP server; guessed from the host user's domain if omitted
        #[arg(long)]
        host: Option<String>,
        /// SMTP port
        #[arg(long)]
        port: Option<u16>,
        /// none, tls or starttls
        #[arg(long, value_parser = parse_security)]
        security: Option<Security>,
        /// Messages per UTC day
        #[arg(long)]
        daily_cap: Option<u32>,
    },
    /// List accounts
    List,
    /// Enable an account
    Enable { id: i64 },
    /// Disable an account
    Disable { id: i64 },
}

#[derive(Subcommand, Debug)]
enum BlacklistCommand {
    /// Suppress an address
    Add { address: String },
    /// List suppressed addresses
    List,
    /// Stop suppressing an address
    Remove { address: String },
}

fn parse_security(s: &str) -> Result<Security, String> {
    match s.to_lowercase().as_str() {
        "none" | "tls" | "ssl" | "starttls" => Ok(Security::parse(s)),
        other => Err(format!("unknown security mode '{other}' (expected none, tls or starttls)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = cli.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("outpost={level},outpost_core={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings_path = cli.config.clone().unwrap_or_else(settings::default_path);
    let settings = settings::load(&settings_path).await?;
    let database = cli.database.clone().unwrap_or_else(|| settings.database_path());
    let config = settings.dispatch.to_config();

    info!(database = %database.display(), "Opening store");
    let store = Store::new(&database).await?;

    let result = execute(cli.command, &store, &settings, config).await;
    store.close().await;
    result
}

async fn execute(
    command: Command,
    store: &Store,
    settings: &settings::Settings,
    config: outpost_core::DispatchConfig,
) -> anyhow::Result<()> {
    match command {
        Command::Dispatch => commands::dispatch(store, config).await,
        Command::Run { interval } => {
            let interval = interval.map_or_else(
                || settings.poll_interval(),
                std::time::Duration::from_secs,
            );
            commands::run(store, config, interval).await
        }
        Command::Enqueue {
            to,
            from,
            subject,
            priority,
            payload,
        } => {
            commands::enqueue(
                store,
                commands::Enqueue {
                    to,
                    from,
                    subject,
                    priority,
                    payload: &payload,
                },
            )
            .await
        }
        Command::Status => commands::status(store).await,
        Command::Account(AccountCommand::Add {
            host_user,
            password,
            from,
            host,
            port,
            security,
            daily_cap,
        }) => {
            commands::account_add(
                store,
                commands::NewAccount {
                    host_user,
                    password,
                    default_from: from,
                    smtp_host: host,
                    smtp_port: port,
                    security,
                    daily_cap,
                },
            )
            .await
        }
        Command::Account(AccountCommand::List) => commands::account_list(store).await,
        Command::Account(AccountCommand::Enable { id }) => {
            commands::account_set_enabled(store, id, true).await
        }
        Command::Account(AccountCommand::Disable { id }) => {
            commands::account_set_enabled(store, id, false).await
        }
        Command::Blacklist(BlacklistCommand::Add { address }) => {
            commands::blacklist_add(store, &address).await
        }
        Command::Blacklist(BlacklistCommand::List) => commands::blacklist_list(store).await,
        Command::Blacklist(BlacklistCommand::Remove { address }) => {
            commands::blacklist_remove(store, &address).await
        }
        Command::Log { message, limit } => commands::log(store, message, limit).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_enqueue() {
        let cli = Cli::parse_from([
            "outpost",
            "enqueue",
            "--to",
            "a@example.com",
            "--priority",
            "high",
            "msg.eml",
        ]);
        match cli.command {
            Command::Enqueue { to, priority, .. } => {
                assert_eq!(to, "a@example.com");
                assert_eq!(priority, Priority::High);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn security_parser_rejects_unknown_modes() {
        assert_eq!(parse_security("SSL"), Ok(Security::Tls));
        assert!(parse_security("plain").is_err());
    }
}
