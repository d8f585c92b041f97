//! Shared fixtures for dispatch integration tests.
#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use outpost_core::{
    Account, AccountId, MessageId, NewMessage, Priority, Store, Transport, TransportError,
};

/// A delivery the mock transport accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub host_user: String,
    pub to: String,
    pub from: String,
    pub payload: Vec<u8>,
}

/// How the mock transport answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Accept,
    Reject,
    Hang(Duration),
}

/// Transport that records what it was asked to send.
#[derive(Debug)]
pub struct MockTransport {
    behavior: Behavior,
    delay: Duration,
    deliveries: Mutex<Vec<Delivery>>,
    attempts: Mutex<u32>,
}

impl MockTransport {
    pub fn accepting() -> Self {
        Self::new(Behavior::Accept)
    }

    pub fn rejecting() -> Self {
        Self::new(Behavior::Reject)
    }

    pub fn hanging(duration: Duration) -> Self {
        Self::new(Behavior::Hang(duration))
    }

    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            deliveries: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    /// Yield for `delay` before answering, so concurrent passes interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|d| d.to).collect()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        account: &Account,
        to: &str,
        from: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior {
            Behavior::Accept => {
                self.deliveries.lock().unwrap().push(Delivery {
                    host_user: account.host_user.clone(),
                    to: to.to_string(),
                    from: from.to_string(),
                    payload: payload.to_vec(),
                });
                Ok(())
            }
            Behavior::Reject => Err(TransportError::Rejected(
                "451 temporary local problem".to_string(),
            )),
            Behavior::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

/// Fixed reference time for scenarios.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap()
}

pub async fn add_account(store: &Store, host_user: &str, cap: u32) -> AccountId {
    let mut account = Account::with_host_user(host_user);
    account.host_password = "app-password".to_string();
    account.daily_cap = cap;
    store.accounts().save(&mut account, t0()).await.unwrap();
    account.id.unwrap()
}

/// Create and queue a message, returning its id.
pub async fn queue_message(
    store: &Store,
    to: &str,
    priority: Priority,
    queued_at: DateTime<Utc>,
) -> MessageId {
    let message = store
        .messages()
        .create(
            NewMessage::new(to, format!("To: {to}\r\n\r\nhello").into_bytes())
                .from("app@example.com")
                .subject("hello"),
            queued_at,
        )
        .await
        .unwrap();
    store
        .queue()
        .enqueue(message.id, priority, queued_at)
        .await
        .unwrap();
    message.id
}
