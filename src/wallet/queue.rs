//! Wallet that hands transactions to an external transaction manager
//!
//! Instead of broadcasting, [`QueueWallet`] publishes a transaction record on a
//! pool channel and returns a ticket. The manager prices, signs and sends the
//! transaction, then publishes a [`Completion`] on `"{pool}:done:{id}"`.

use super::{PublicKey, SendHints, WaitParams, Wallet};
use crate::constants::{DEFAULT_PRIORITY, MAX_WAITING_TIME};
use crate::error::{QueueError, TxError};
use crate::types::{Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::hex;
use alloy::primitives::{keccak256, Address, Signature, TxHash, B256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Messages received on one channel
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Next message, `None` once the broker dropped the channel
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Publish/subscribe transport between wallets and the transaction manager
pub trait TxBroker: Send + Sync {
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, QueueError>> + Send;

    /// Publish `payload`, returning how many subscribers received it
    fn publish(
        &self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<usize, QueueError>> + Send;

    /// Forget subscriptions on `channel` whose [`Subscription`] was dropped
    fn unsubscribe(&self, channel: &str) -> impl Future<Output = Result<(), QueueError>> + Send;
}

/// In-process broker
#[derive(Clone, Default)]
pub struct ChannelBroker {
    subscribers: Arc<DashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels with at least one live subscriber entry
    pub fn channel_count(&self) -> usize {
        self.subscribers.len()
    }

    fn prune(&self, channel: &str) {
        self.subscribers.remove_if_mut(channel, |_, senders| {
            senders.retain(|tx| !tx.is_closed());
            senders.is_empty()
        });
    }
}

impl TxBroker for ChannelBroker {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, QueueError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(channel.to_string()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<usize, QueueError> {
        let delivered = match self.subscribers.get_mut(channel) {
            Some(mut senders) => {
                senders.retain(|tx| tx.send(payload.clone()).is_ok());
                senders.len()
            }
            None => return Ok(0),
        };
        if delivered == 0 {
            self.prune(channel);
        }
        Ok(delivered)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), QueueError> {
        self.prune(channel);
        Ok(())
    }
}

/// Why the manager gave up on a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "kebab-case")]
pub enum QueueFailure {
    NotSent(String),
    NotFound(String),
    Failed(String),
}

/// Message the manager publishes on `"{pool}:done:{id}"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub tx_hash: Option<TxHash>,
    #[serde(default)]
    pub error: Option<QueueFailure>,
}

impl Completion {
    pub fn into_result(self) -> Result<TxHash, QueueError> {
        let id = self.id;
        match (self.error, self.tx_hash) {
            (Some(QueueFailure::NotSent(message)), _) => Err(QueueError::NotSent { id, message }),
            (Some(QueueFailure::NotFound(message)), _) => Err(QueueError::NotFound { id, message }),
            (Some(QueueFailure::Failed(message)), _) => Err(QueueError::Failed { id, message }),
            (None, Some(tx_hash)) => Ok(tx_hash),
            (None, None) => Err(QueueError::Failed {
                message: format!("completed with status {} but no hash", self.status),
                id,
            }),
        }
    }
}

/// Queue score: higher priority first, older first within a priority
pub fn score(priority: u32, timestamp: u64) -> u64 {
    let digits = timestamp.checked_ilog10().map_or(1, |d| d + 1);
    u64::from(priority)
        .saturating_mul(10u64.saturating_pow(digits))
        .saturating_add(timestamp)
}

/// Ticket handed out by `sign_and_send` and not yet waited on
struct PendingTicket {
    channel: String,
    subscription: Subscription,
    queued_at: Instant,
}

/// Wallet that queues transactions for a transaction manager
///
/// Identity and signing are delegated to `base`; receipts for completed
/// tickets are fetched through it as well. Tickets nobody waits on are
/// dropped after `ticket_ttl` (one hour by default).
pub struct QueueWallet<W, B = ChannelBroker> {
    base: Arc<W>,
    broker: B,
    pool: String,
    pending: DashMap<String, PendingTicket>,
    ticket_ttl: Duration,
    counter: AtomicU64,
}

impl<W: Wallet, B: TxBroker> QueueWallet<W, B> {
    pub fn new(base: Arc<W>, broker: B, pool: impl Into<String>) -> Self {
        Self {
            base,
            broker,
            pool: pool.into(),
            pending: DashMap::new(),
            ticket_ttl: MAX_WAITING_TIME,
            counter: AtomicU64::new(0),
        }
    }

    /// How long an unclaimed ticket stays waitable
    pub fn with_ticket_ttl(mut self, ticket_ttl: Duration) -> Self {
        self.ticket_ttl = ticket_ttl;
        self
    }

    /// Tickets handed out and not yet resolved
    pub fn pending_tickets(&self) -> usize {
        self.pending.len()
    }

    pub fn base(&self) -> &W {
        &self.base
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    fn next_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let seed = format!("{}:{nanos}:{counter}", self.base.address());
        format!("tx-{}", hex::encode(&keccak256(seed)[..8]))
    }

    fn record(&self, id: &str, tx: &UnsignedTx, hints: &SendHints) -> Result<Value, QueueError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let priority = hints.priority.unwrap_or(DEFAULT_PRIORITY);

        let mut record = serde_json::to_value(tx)
            .map_err(|e| QueueError::Broker(format!("Failed to serialize transaction: {e}")))?;
        let Some(fields) = record.as_object_mut() else {
            return Err(QueueError::Broker("transaction is not a JSON object".to_string()));
        };

        // the manager re-estimates gas itself
        fields.insert("gas".into(), Value::Null);
        fields.insert("id".into(), id.into());
        fields.insert("status".into(), "PROPOSED".into());
        fields.insert("score".into(), score(priority, timestamp).into());
        fields.insert("multiplier".into(), hints.multiplier.into());
        fields.insert("method".into(), hints.operation.clone().into());
        fields.insert("meta".into(), hints.meta.clone().unwrap_or(Value::Null));

        Ok(record)
    }

    async fn await_completion(&self, id: &str, timeout: Duration) -> Result<TxHash, QueueError> {
        let (_, mut ticket) = self.pending.remove(id).ok_or_else(|| QueueError::NotFound {
            id: id.to_string(),
            message: "no pending submission with this id".to_string(),
        })?;

        let started = Instant::now();
        let received = match tokio::time::timeout(timeout, ticket.subscription.next()).await {
            Ok(received) => received,
            Err(_) => {
                // keep the ticket waitable
                self.pending.insert(id.to_string(), ticket);
                return Err(QueueError::Timeout {
                    id: id.to_string(),
                    waited: started.elapsed(),
                });
            }
        };
        self.release(ticket).await;

        let payload =
            received.ok_or_else(|| QueueError::Broker(format!("completion channel for {id} closed")))?;
        let completion: Completion = serde_json::from_str(&payload)
            .map_err(|e| QueueError::Broker(format!("malformed completion for {id}: {e}")))?;
        completion.into_result()
    }

    /// Drop the ticket's subscription and let the broker forget the channel
    async fn release(&self, ticket: PendingTicket) {
        let PendingTicket {
            channel,
            subscription,
            ..
        } = ticket;
        drop(subscription);

        if let Err(error) = self.broker.unsubscribe(&channel).await {
            tracing::warn!(%channel, %error, "Failed to unsubscribe completion channel");
        }
    }

    async fn evict_expired(&self) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.queued_at.elapsed() >= self.ticket_ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            if let Some((_, ticket)) = self.pending.remove(&id) {
                tracing::warn!(id = %id, "Dropping unclaimed queue ticket");
                self.release(ticket).await;
            }
        }
    }
}

impl<W: Wallet, B: TxBroker> Wallet for QueueWallet<W, B> {
    fn address(&self) -> Address {
        self.base.address()
    }

    fn public_key(&self) -> PublicKey {
        self.base.public_key()
    }

    async fn sign(&self, tx: &UnsignedTx) -> Result<SignedTransaction, TxError> {
        self.base.sign(tx).await
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature, TxError> {
        self.base.sign_hash(hash).await
    }

    async fn sign_and_send(&self, tx: &UnsignedTx, hints: &SendHints) -> Result<TxRef, TxError> {
        self.evict_expired().await;

        let id = self.next_id();
        let record = self.record(&id, tx, hints)?;

        // subscribe first so a fast manager cannot complete before we listen
        let channel = format!("{}:done:{}", self.pool, id);
        let subscription = self.broker.subscribe(&channel).await?;

        let ticket = PendingTicket {
            channel,
            subscription,
            queued_at: Instant::now(),
        };

        let receivers = match self.broker.publish(&self.pool, record.to_string()).await {
            Ok(receivers) => receivers,
            Err(e) => {
                self.release(ticket).await;
                return Err(e.into());
            }
        };
        if receivers == 0 {
            self.release(ticket).await;
            return Err(QueueError::NotSent {
                id,
                message: format!("no transaction manager listening on {}", self.pool),
            }
            .into());
        }

        self.pending.insert(id.clone(), ticket);
        tracing::info!(id = %id, pool = %self.pool, nonce = tx.nonce, "Queued transaction");

        Ok(TxRef::Ticket(id))
    }

    async fn wait(&self, tx: &TxRef, params: &WaitParams) -> Result<Receipt, TxError> {
        match tx {
            TxRef::Hash(_) => self.base.wait(tx, params).await,
            TxRef::Ticket(id) => {
                // the completion and the receipt share one timeout
                let started = Instant::now();
                let tx_hash = self.await_completion(id, params.timeout).await?;
                tracing::info!(id = %id, tx_hash = %tx_hash, "Transaction manager sent transaction");

                let params = params.remaining_after(started.elapsed());
                self.base.wait(&TxRef::Hash(tx_hash), &params).await
            }
        }
    }
}
