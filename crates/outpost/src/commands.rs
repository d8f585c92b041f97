//! Subcommand handlers.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use outpost_core::{
    Account, AccountId, DispatchConfig, Dispatcher, MessageId, NewMessage, PassReport, Priority,
    Security, SmtpConfig, SmtpTransport, Store, Transport,
};
use tracing::{error, info};

/// Fields for `account add`.
pub struct NewAccount {
    pub host_user: String,
    pub password: String,
    pub default_from: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub security: Option<Security>,
    pub daily_cap: Option<u32>,
}

/// Fields for `enqueue`.
pub struct Enqueue<'a> {
    pub to: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub priority: Priority,
    pub payload: &'a Path,
}

fn dispatcher(store: &Store, config: DispatchConfig) -> anyhow::Result<Dispatcher<SmtpTransport>> {
    let transport = SmtpTransport::new(config.transport_timeout);
    Ok(Dispatcher::new(store.clone(), transport, config)?)
}

fn print_report(report: &PassReport) {
    println!(
        "sent {}, skipped {}, failed {}, abandoned {}, waiting {}",
        report.sent, report.skipped, report.failed, report.abandoned, report.waiting_for_capacity
    );
    if report.capacity_exhausted {
        println!("all sending accounts are at their daily cap");
    }
    if report.lease_lost > 0 {
        println!("{} entries were taken over by another dispatcher", report.lease_lost);
    }
}

/// Run a single dispatch pass.
pub async fn dispatch(store: &Store, config: DispatchConfig) -> anyhow::Result<()> {
    let dispatcher = dispatcher(store, config)?;
    let report = dispatcher.run_pass(Utc::now()).await?;
    print_report(&report);
    Ok(())
}

/// Run passes every `interval` until Ctrl-C.
///
/// Stopping mid-pass leaves the entry in flight leased; it becomes ready
/// again once the lease expires.
pub async fn run(store: &Store, config: DispatchConfig, interval: Duration) -> anyhow::Result<()> {
    let dispatcher = dispatcher(store, config)?;
    run_until(&dispatcher, interval, ctrl_c()).await
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run passes every `interval` until `shutdown` completes, whether the loop
/// is idle or in the middle of a pass.
async fn run_until<T: Transport>(
    dispatcher: &Dispatcher<T>,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs(), "Dispatcher running");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = &mut shutdown => {
                info!("Received shutdown signal, exiting...");
                return Ok(());
            }
        }

        tokio::select! {
            result = dispatcher.run_pass(Utc::now()) => {
                if let Err(e) = result {
                    if e.is_storage() {
                        error!(error = %e, "Store unavailable, stopping");
                        return Err(e.into());
                    }
                    error!(error = %e, "Dispatch pass failed");
                }
            }
            () = &mut shutdown => {
                info!("Received shutdown signal during a pass, exiting...");
                return Ok(());
            }
        }
    }
}

/// Store a message read from a file and queue it.
pub async fn enqueue(store: &Store, request: Enqueue<'_>) -> anyhow::Result<()> {
    let payload = tokio::fs::read(request.payload)
        .await
        .with_context(|| format!("reading {}", request.payload.display()))?;

    let mut message = NewMessage::new(request.to, payload);
    if let Some(from) = request.from {
        message = message.from(from);
    }
    if let Some(subject) = request.subject {
        message = message.subject(subject);
    }

    let now = Utc::now();
    let message = store.messages().create(message, now).await?;
    let id = store.queue().enqueue(message.id, request.priority, now).await?;
    println!("queued message {} as entry {id} ({})", message.id, request.priority);
    Ok(())
}

/// Print queue and account usage.
pub async fn status(store: &Store) -> anyhow::Result<()> {
    let now = Utc::now();
    let stats = store.queue().stats(now).await?;
    println!(
        "queue: {} total, {} ready, {} deferred",
        stats.total, stats.ready, stats.deferred
    );

    for (account, sent) in store.account_pool().usage(now).await? {
        let state = if account.enabled { "" } else { " (disabled)" };
        println!(
            "account {}: {} sent today of {}{state}",
            account.host_user, sent, account.daily_cap
        );
    }

    let counts = store.log().count_by_result().await?;
    let mut counts: Vec<_> = counts.into_iter().collect();
    counts.sort_by_key(|(code, _)| code.as_str());
    for (code, count) in counts {
        println!("log {}: {count}", code.as_str());
    }
    Ok(())
}

/// Add a sending account.
pub async fn account_add(store: &Store, request: NewAccount) -> anyhow::Result<()> {
    let mut account = Account::with_host_user(&request.host_user);
    account.host_password = request.password;
    if let Some(from) = request.default_from {
        account.default_from = from;
    }
    if let Some(security) = request.security {
        account.smtp.security = security;
        account.smtp.port = SmtpConfig::default_port(security);
    }
    if let Some(host) = request.smtp_host {
        account.smtp.host = host;
    }
    if let Some(port) = request.smtp_port {
        account.smtp.port = port;
    }
    if let Some(cap) = request.daily_cap {
        account.daily_cap = cap;
    }

    store.accounts().save(&mut account, Utc::now()).await?;
    if let Some(id) = account.id {
        println!("added account {id}: {}", account.host_user);
    }
    Ok(())
}

/// List sending accounts.
pub async fn account_list(store: &Store) -> anyhow::Result<()> {
    for account in store.accounts().list().await? {
        let id = account.id.map(|id| id.to_string()).unwrap_or_default();
        println!(
            "{id}\t{}\t{}:{} {}\tcap {}\t{}",
            account.host_user,
            account.smtp.host,
            account.smtp.port,
            account.smtp.security.display_name(),
            account.daily_cap,
            if account.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}

/// Enable or disable an account.
pub async fn account_set_enabled(store: &Store, id: i64, enabled: bool) -> anyhow::Result<()> {
    store
        .accounts()
        .set_enabled(AccountId::new(id), enabled, Utc::now())
        .await?;
    println!("account {id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

/// Add an address to the blacklist.
pub async fn blacklist_add(store: &Store, address: &str) -> anyhow::Result<()> {
    if store.blacklist().add(address, Utc::now()).await? {
        println!("blacklisted {address}");
    } else {
        println!("{address} was already blacklisted");
    }
    Ok(())
}

/// List blacklisted addresses.
pub async fn blacklist_list(store: &Store) -> anyhow::Result<()> {
    for entry in store.blacklist().list().await? {
        println!("{}\t{}", entry.email, entry.date_added.to_rfc3339());
    }
    Ok(())
}

/// Remove an address from the blacklist.
pub async fn blacklist_remove(store: &Store, address: &str) -> anyhow::Result<()> {
    if !store.blacklist().remove(address).await? {
        bail!("{address} is not blacklisted");
    }
    println!("removed {address}");
    Ok(())
}

/// Print the delivery log, for one message or the most recent entries.
pub async fn log(store: &Store, message: Option<i64>, limit: u32) -> anyhow::Result<()> {
    let entries = match message {
        Some(id) => store.log().for_message(MessageId::new(id)).await?,
        None => store.log().recent(limit).await?,
    };

    for entry in entries {
        println!(
            "{}\tmessage {}\t{}\t{}",
            entry.created_at.to_rfc3339(),
            entry.message_id,
            entry.result.description(),
            entry.detail
        );
    }
    Ok(())
}
