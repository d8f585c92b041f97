//! The dispatch pass.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::DispatchConfig;
use crate::Result;
use crate::account::AccountId;
use crate::log::ResultCode;
use crate::message::MessageId;
use crate::queue::{BackoffPolicy, ExponentialBackoff, QueuedMessage};
use crate::store::{Store, after};
use crate::transport::{Transport, TransportError};

/// What happened to one claimed queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered; the entry is gone and `Sent` was logged.
    Sent {
        /// Account the message went out through.
        account: AccountId,
    },
    /// Recipient is blacklisted; the entry is gone and `Skipped` was logged.
    Skipped,
    /// No account had headroom. The entry stays queued with its retries unchanged.
    WaitingForCapacity,
    /// Delivery failed and will be retried.
    Deferred {
        /// Failed attempts so far.
        retries: u32,
        /// Earliest time of the next attempt.
        until: DateTime<Utc>,
    },
    /// Delivery failed with no retries left; the entry is gone and
    /// `Abandoned` was logged.
    Abandoned,
    /// The entry pointed at a message that no longer exists and was dropped.
    Missing,
    /// The lease expired while the entry was in flight and another pass now
    /// holds the entry. Nothing was written for this attempt.
    LeaseLost,
}

/// Summary of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Messages delivered.
    pub sent: u32,
    /// Messages skipped because the recipient is blacklisted.
    pub skipped: u32,
    /// Failed attempts that were deferred for a retry.
    pub failed: u32,
    /// Messages given up on.
    pub abandoned: u32,
    /// Entries left queued because no account had headroom.
    pub waiting_for_capacity: u32,
    /// Entries dropped because their message was gone.
    pub missing: u32,
    /// Entries whose lease was taken over before the outcome was stored.
    pub lease_lost: u32,
    /// True if at least one entry could not be sent for lack of capacity.
    pub capacity_exhausted: bool,
    /// Every claimed entry in processing order.
    pub outcomes: Vec<(MessageId, Outcome)>,
}

impl PassReport {
    /// Number of entries the pass claimed.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    fn record(&mut self, message_id: MessageId, outcome: Outcome) {
        match outcome {
            Outcome::Sent { .. } => self.sent += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::WaitingForCapacity => {
                self.waiting_for_capacity += 1;
                self.capacity_exhausted = true;
            }
            Outcome::Deferred { .. } => self.failed += 1,
            Outcome::Abandoned => self.abandoned += 1,
            Outcome::Missing => self.missing += 1,
            Outcome::LeaseLost => self.lease_lost += 1,
        }
        self.outcomes.push((message_id, outcome));
    }
}

/// Wall clock for one pass: the caller's `now` advanced by the time the pass
/// has been running, so leases and backoff start from when each step happens.
#[derive(Debug, Clone, Copy)]
struct PassClock {
    start: DateTime<Utc>,
    started: Instant,
}

impl PassClock {
    fn start(now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        after(self.start, self.started.elapsed())
    }
}

/// Drains the queue through a [`Transport`].
///
/// Passes are safe to run concurrently, from one process or several sharing
/// a database: entries are leased atomically before they are processed.
#[derive(Debug)]
pub struct Dispatcher<T, B = ExponentialBackoff> {
    store: Store,
    transport: T,
    backoff: B,
    config: DispatchConfig,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher using the configuration's exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the configuration is invalid.
    pub fn new(store: Store, transport: T, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            transport,
            backoff: config.backoff,
            config,
        })
    }
}

impl<T: Transport, B: BackoffPolicy> Dispatcher<T, B> {
    /// Replace the retry curve.
    #[must_use]
    pub fn with_backoff<P: BackoffPolicy>(self, backoff: P) -> Dispatcher<T, P> {
        Dispatcher {
            store: self.store,
            transport: self.transport,
            backoff,
            config: self.config,
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Run one pass starting at `now`: claim up to `batch_size` ready entries
    /// and move each through exactly one transition.
    ///
    /// Time advances from `now` as the pass runs, so an entry claimed late in
    /// a long pass still gets a full lease.
    ///
    /// Entries waiting for capacity keep their lease until the pass ends and
    /// are then made ready again, so one pass never revisits an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails. The pass stops at that point;
    /// entries already handled stay handled and the entry in flight keeps its
    /// lease until it expires.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let clock = PassClock::start(now);
        let mut report = PassReport::default();
        let mut waiting = Vec::new();

        let drained = self.drain(&clock, &mut report, &mut waiting).await;
        let released = self.release_all(&waiting).await;
        drained?;
        released?;

        if report.capacity_exhausted {
            warn!(
                waiting = report.waiting_for_capacity,
                "No sending account has capacity left"
            );
        }
        if report.processed() > 0 {
            info!(
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                abandoned = report.abandoned,
                waiting = report.waiting_for_capacity,
                lease_lost = report.lease_lost,
                "Dispatch pass complete"
            );
        } else {
            debug!("Dispatch pass found nothing ready");
        }

        Ok(report)
    }

    async fn drain(
        &self,
        clock: &PassClock,
        report: &mut PassReport,
        waiting: &mut Vec<QueuedMessage>,
    ) -> Result<()> {
        let queue = self.store.queue();

        for _ in 0..self.config.batch_size {
            let Some(entry) = queue.claim(clock.now(), self.config.lease).await? else {
                break;
            };

            let outcome = self.process(&entry, clock).await?;
            report.record(entry.message_id, outcome.clone());
            if outcome == Outcome::WaitingForCapacity {
                waiting.push(entry);
            }
        }

        Ok(())
    }

    async fn release_all(&self, waiting: &[QueuedMessage]) -> Result<()> {
        let queue = self.store.queue();
        for entry in waiting {
            if !queue.release(entry).await? {
                debug!(id = %entry.id, "Lease already taken over, not released");
            }
        }
        Ok(())
    }

    async fn process(&self, entry: &QueuedMessage, clock: &PassClock) -> Result<Outcome> {
        let queue = self.store.queue();

        let Some(message) = self.store.messages().get(entry.message_id).await? else {
            warn!(id = %entry.id, message_id = %entry.message_id, "Dropping entry for missing message");
            queue.remove(entry.id).await?;
            return Ok(Outcome::Missing);
        };

        if self.store.blacklist().is_blacklisted(&message.to_address).await? {
            let skipped = queue
                .finish(entry, ResultCode::Skipped, "recipient is blacklisted", clock.now())
                .await?;
            if !skipped {
                return Ok(lease_lost(entry));
            }
            info!(message_id = %message.id, to = %message.to_address, "Skipped blacklisted recipient");
            return Ok(Outcome::Skipped);
        }

        let accounts = self.store.account_pool();
        let Some(reservation) = accounts.reserve(message.id, clock.now()).await? else {
            debug!(message_id = %message.id, "Waiting for account capacity");
            return Ok(Outcome::WaitingForCapacity);
        };

        let account = &reservation.account;
        let from = account.sender_for(&message.from_address);
        let attempt = self
            .send_with_timeout(
                self.transport
                    .send(account, &message.to_address, from, &message.encoded_message),
            )
            .await;

        match attempt {
            Ok(()) => {
                let detail = format!("sent via {}", account.host_user);
                let finished = match queue
                    .finish(entry, ResultCode::Sent, &detail, clock.now())
                    .await
                {
                    Ok(finished) => finished,
                    Err(err) => {
                        // The entry stays queued, so the send must not count.
                        if let Err(release) = accounts.release(&reservation).await {
                            warn!(message_id = %message.id, error = %release, "Could not release send slot");
                        }
                        return Err(err);
                    }
                };
                if !finished {
                    return Ok(lease_lost(entry));
                }
                info!(
                    message_id = %message.id,
                    to = %message.to_address,
                    account = %reservation.account_id,
                    "Sent message"
                );
                Ok(Outcome::Sent {
                    account: reservation.account_id,
                })
            }
            Err(err) => {
                accounts.release(&reservation).await?;
                self.handle_failure(entry, clock.now(), &err).await
            }
        }
    }

    async fn send_with_timeout(
        &self,
        send: impl Future<Output = std::result::Result<(), TransportError>>,
    ) -> std::result::Result<(), TransportError> {
        let limit: Duration = self.config.transport_timeout;
        tokio::time::timeout(limit, send)
            .await
            .unwrap_or(Err(TransportError::Timeout(limit)))
    }

    async fn handle_failure(
        &self,
        entry: &QueuedMessage,
        now: DateTime<Utc>,
        err: &TransportError,
    ) -> Result<Outcome> {
        let queue = self.store.queue();
        let detail = err.to_string();

        if entry.retries >= self.config.max_retries {
            if !queue.finish(entry, ResultCode::Abandoned, &detail, now).await? {
                return Ok(lease_lost(entry));
            }
            warn!(
                message_id = %entry.message_id,
                retries = entry.retries,
                error = %detail,
                "Abandoned message"
            );
            return Ok(Outcome::Abandoned);
        }

        let delay = self.backoff.delay(entry.retries);
        let Some(updated) = queue.fail(entry, now, delay, &detail).await? else {
            return Ok(lease_lost(entry));
        };

        let until = updated.deferred_until.unwrap_or(now);
        warn!(
            message_id = %entry.message_id,
            retries = updated.retries,
            %until,
            error = %detail,
            "Delivery failed, deferred"
        );
        Ok(Outcome::Deferred {
            retries: updated.retries,
            until,
        })
    }
}

fn lease_lost(entry: &QueuedMessage) -> Outcome {
    warn!(
        id = %entry.id,
        message_id = %entry.message_id,
        "Lease expired before the outcome was stored; another pass owns the entry"
    );
    Outcome::LeaseLost
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::account::Account;
    use crate::message::NewMessage;
    use crate::queue::Priority;

    struct Accept;

    impl Transport for Accept {
        async fn send(
            &self,
            _account: &Account,
            _to: &str,
            _from: &str,
            _payload: &[u8],
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    struct Refuse;

    impl Transport for Refuse {
        async fn send(
            &self,
            _account: &Account,
            _to: &str,
            _from: &str,
            _payload: &[u8],
        ) -> std::result::Result<(), TransportError> {
            Err(TransportError::Rejected("550 mailbox unavailable".to_string()))
        }
    }

    /// Runs `sql` against the store in the middle of a send, then answers
    /// with `accept`.
    struct Interfere {
        store: Store,
        sql: &'static str,
        accept: bool,
    }

    impl Transport for Interfere {
        async fn send(
            &self,
            _account: &Account,
            _to: &str,
            _from: &str,
            _payload: &[u8],
        ) -> std::result::Result<(), TransportError> {
            sqlx::query(self.sql).execute(&self.store.pool).await.unwrap();
            if self.accept {
                Ok(())
            } else {
                Err(TransportError::Connection("reset by peer".to_string()))
            }
        }
    }

    struct SlowRefuse(Duration);

    impl Transport for SlowRefuse {
        async fn send(
            &self,
            _account: &Account,
            _to: &str,
            _from: &str,
            _payload: &[u8],
        ) -> std::result::Result<(), TransportError> {
            tokio::time::sleep(self.0).await;
            Err(TransportError::Connection("refused".to_string()))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 9, 10, 0, 0).unwrap()
    }

    async fn sent_today(store: &Store) -> u32 {
        let account = store.accounts().list().await.unwrap()[0].id.unwrap();
        store.account_pool().sent_today(account, now()).await.unwrap()
    }

    async fn setup(cap: u32) -> Store {
        let store = Store::in_memory().await.unwrap();
        let mut account = Account::with_host_user("sender@example.com");
        account.daily_cap = cap;
        store.accounts().save(&mut account, now()).await.unwrap();
        store
    }

    async fn enqueue(store: &Store, to: &str) -> MessageId {
        let message = store
            .messages()
            .create(NewMessage::new(to, b"payload".to_vec()), now())
            .await
            .unwrap();
        store
            .queue()
            .enqueue(message.id, Priority::Normal, now())
            .await
            .unwrap();
        message.id
    }

    #[tokio::test]
    async fn test_empty_queue_pass() {
        let store = setup(10).await;
        let dispatcher = Dispatcher::new(store, Accept, DispatchConfig::default()).unwrap();
        let report = dispatcher.run_pass(now()).await.unwrap();
        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let store = setup(10).await;
        let config = DispatchConfig {
            batch_size: 0,
            ..DispatchConfig::default()
        };
        assert!(Dispatcher::new(store, Accept, config).is_err());
    }

    #[tokio::test]
    async fn test_batch_size_limits_pass() {
        let store = setup(10).await;
        for i in 0..3 {
            enqueue(&store, &format!("r{i}@example.com")).await;
        }
        let config = DispatchConfig {
            batch_size: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(store.clone(), Accept, config).unwrap();

        let report = dispatcher.run_pass(now()).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(store.queue().len().await.unwrap(), 1);

        let report = dispatcher.run_pass(now()).await.unwrap();
        assert_eq!(report.sent, 1);
        assert!(store.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_uses_custom_backoff() {
        let store = setup(10).await;
        let id = enqueue(&store, "to@example.com").await;
        let dispatcher = Dispatcher::new(store.clone(), Refuse, DispatchConfig::default())
            .unwrap()
            .with_backoff(|retries: u32| Duration::from_secs(5 * u64::from(retries + 1)));

        let report = dispatcher.run_pass(now()).await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        let (message_id, Outcome::Deferred { retries, until }) = &report.outcomes[0] else {
            panic!("expected a deferral, got {:?}", report.outcomes);
        };
        assert_eq!(*message_id, id);
        assert_eq!(*retries, 1);
        assert!(*until >= now() + TimeDelta::seconds(5));
        assert!(*until < now() + TimeDelta::seconds(6));

        let history = store.log().for_message(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, ResultCode::Failed);
        assert_eq!(history[0].detail, "Rejected by server: 550 mailbox unavailable");
    }

    #[tokio::test]
    async fn test_failed_send_does_not_use_quota() {
        let store = setup(1).await;
        enqueue(&store, "to@example.com").await;
        let dispatcher = Dispatcher::new(store.clone(), Refuse, DispatchConfig::default()).unwrap();

        dispatcher.run_pass(now()).await.unwrap();

        let account = store.account_pool().select_available(now()).await.unwrap();
        assert!(account.is_some());
    }

    #[tokio::test]
    async fn test_missing_message_entry_dropped() {
        let store = setup(10).await;
        let id = enqueue(&store, "to@example.com").await;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id.0)
            .execute(&store.pool)
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(store.clone(), Accept, DispatchConfig::default()).unwrap();

        let report = dispatcher.run_pass(now()).await.unwrap();
        assert_eq!(report.missing, 1);
        assert!(store.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_pass_clock_advances_with_sends() {
        let store = setup(10).await;
        let first = enqueue(&store, "a@example.com").await;
        let second = enqueue(&store, "b@example.com").await;
        let dispatcher = Dispatcher::new(
            store.clone(),
            SlowRefuse(Duration::from_millis(30)),
            DispatchConfig::default(),
        )
        .unwrap()
        .with_backoff(|_: u32| Duration::ZERO);

        dispatcher.run_pass(now()).await.unwrap();

        let first = store.queue().get_by_message(first).await.unwrap().unwrap();
        let second = store.queue().get_by_message(second).await.unwrap().unwrap();
        // Each failure is stamped when it happens, not when the pass began.
        assert!(first.deferred_until.unwrap() >= now() + TimeDelta::milliseconds(30));
        assert!(second.deferred_until.unwrap() >= now() + TimeDelta::milliseconds(60));

        let history = store.log().for_message(second.message_id).await.unwrap();
        assert!(history[0].created_at >= now() + TimeDelta::milliseconds(60));
    }

    #[tokio::test]
    async fn test_store_failure_after_delivery_aborts_pass() {
        let store = setup(10).await;
        let id = enqueue(&store, "to@example.com").await;
        let transport = Interfere {
            store: store.clone(),
            sql: "DROP TABLE log_entries",
            accept: true,
        };
        let dispatcher = Dispatcher::new(store.clone(), transport, DispatchConfig::default()).unwrap();

        let err = dispatcher.run_pass(now()).await.unwrap_err();
        assert!(err.is_storage());

        let entry = store.queue().get_by_message(id).await.unwrap().unwrap();
        assert_eq!(entry.retries, 0);
        assert_eq!(sent_today(&store).await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_after_refusal_aborts_pass() {
        let store = setup(10).await;
        let id = enqueue(&store, "to@example.com").await;
        let transport = Interfere {
            store: store.clone(),
            sql: "DROP TABLE log_entries",
            accept: false,
        };
        let dispatcher = Dispatcher::new(store.clone(), transport, DispatchConfig::default()).unwrap();

        let err = dispatcher.run_pass(now()).await.unwrap_err();
        assert!(err.is_storage());

        let entry = store.queue().get_by_message(id).await.unwrap().unwrap();
        assert_eq!(entry.retries, 0);
        assert_eq!(sent_today(&store).await, 0);
    }

    #[tokio::test]
    async fn test_taken_over_lease_is_left_alone() {
        for accept in [true, false] {
            let store = setup(10).await;
            let id = enqueue(&store, "to@example.com").await;
            // Another pass re-claims the entry while this one is sending.
            let transport = Interfere {
                store: store.clone(),
                sql: "UPDATE queued_messages SET deferred_until = deferred_until + 1",
                accept,
            };
            let dispatcher =
                Dispatcher::new(store.clone(), transport, DispatchConfig::default()).unwrap();

            let report = dispatcher.run_pass(now()).await.unwrap();
            assert_eq!(report.outcomes, vec![(id, Outcome::LeaseLost)]);
            assert_eq!(report.lease_lost, 1);

            let entry = store.queue().get_by_message(id).await.unwrap().unwrap();
            assert_eq!(entry.retries, 0);
            assert!(store.log().for_message(id).await.unwrap().is_empty());
            // A delivery that happened still counts against the cap.
            assert_eq!(sent_today(&store).await, u32::from(accept));
        }
    }
}
