//! In-process broker.
//!
//! Implements the transport traits without a network: hosts are marked reachable,
//! refused or unresponsive, queues hold messages in memory, and each consumer gets
//! at most `prefetch` unsettled deliveries. Used by the test suites and handy for
//! running the services without RabbitMQ.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use super::endpoint::BrokerAddress;
use super::transport::{
    BrokerChannel, BrokerConnection, Connector, Delivery, DeliveryStream, MessageEnvelope,
};
use crate::error::MessagingError;

/// Shared handle to an in-process broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    changed: Notify,
    next_tag: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    reachable: HashSet<String>,
    unresponsive: HashSet<String>,
    attempts: Vec<String>,
    connections: Vec<Arc<AtomicBool>>,
    queues: HashMap<String, QueueState>,
    prefetch_settings: Vec<u16>,
    unroutable: usize,
}

#[derive(Default)]
struct QueueState {
    durable: bool,
    declarations: usize,
    ready: VecDeque<Vec<u8>>,
    published: Vec<MessageEnvelope>,
    acked: Vec<Vec<u8>>,
    discarded: Vec<Vec<u8>>,
    requeued: usize,
    unacked: usize,
    max_unacked: usize,
}

impl MemoryBroker {
    /// A broker no host can reach yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryBroker::set_reachable`].
    pub fn with_reachable_host(self, host: &str) -> Self {
        self.set_reachable(host, true);
        self
    }

    /// Accept or refuse connections addressed to `host`.
    pub fn set_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.reachable.insert(host.to_string());
        } else {
            state.reachable.remove(host);
        }
    }

    /// Connections to `host` never complete.
    pub fn set_unresponsive(&self, host: &str) {
        self.state().unresponsive.insert(host.to_string());
    }

    /// Connector dialling this broker.
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            broker: self.clone(),
        })
    }

    /// Every address dialled, in order.
    pub fn connection_attempts(&self) -> Vec<String> {
        self.state().attempts.clone()
    }

    /// Connections that are still open.
    pub fn open_connections(&self) -> usize {
        self.state()
            .connections
            .iter()
            .filter(|alive| alive.load(Ordering::SeqCst))
            .count()
    }

    /// Drop every connection as if the transport broke.
    pub fn sever_connections(&self) {
        for alive in &self.state().connections {
            alive.store(false, Ordering::SeqCst);
        }
        self.inner.changed.notify_waiters();
    }

    /// Put a raw message on a queue, declaring it if needed.
    pub fn inject(&self, queue: &str, payload: &[u8]) {
        {
            let mut state = self.state();
            let q = state.queues.entry(queue.to_string()).or_default();
            q.durable = true;
            q.ready.push_back(payload.to_vec());
        }
        self.inner.changed.notify_waiters();
    }

    pub fn declarations(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.declarations).unwrap_or(0)
    }

    pub fn is_durable(&self, queue: &str) -> Option<bool> {
        self.with_queue(queue, |q| q.durable)
    }

    /// Envelopes published to `queue` through a channel.
    pub fn published(&self, queue: &str) -> Vec<MessageEnvelope> {
        self.with_queue(queue, |q| q.published.clone())
            .unwrap_or_default()
    }

    /// Messages waiting for a consumer.
    pub fn ready(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len()).unwrap_or(0)
    }

    pub fn acked(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.acked.clone()).unwrap_or_default()
    }

    pub fn discarded(&self, queue: &str) -> Vec<Vec<u8>> {
        self.with_queue(queue, |q| q.discarded.clone())
            .unwrap_or_default()
    }

    pub fn requeued(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.requeued).unwrap_or(0)
    }

    /// Deliveries handed out and not yet settled.
    pub fn unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked).unwrap_or(0)
    }

    /// Highest number of unsettled deliveries seen at once.
    pub fn max_unacked(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.max_unacked).unwrap_or(0)
    }

    /// Prefetch values requested by channels, in order.
    pub fn prefetch_settings(&self) -> Vec<u16> {
        self.state().prefetch_settings.clone()
    }

    /// Messages published to queues nobody declared.
    pub fn unroutable(&self) -> usize {
        self.state().unroutable
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> Option<T> {
        self.state().queues.get(queue).map(f)
    }

    fn settle(&self, queue: &str, payload: &[u8], outcome: Settlement) {
        {
            let mut state = self.state();
            let q = state.queues.entry(queue.to_string()).or_default();
            q.unacked = q.unacked.saturating_sub(1);
            match outcome {
                Settlement::Ack => q.acked.push(payload.to_vec()),
                Settlement::Discard => q.discarded.push(payload.to_vec()),
                Settlement::Requeue => {
                    q.requeued += 1;
                    q.ready.push_front(payload.to_vec());
                }
            }
        }
        self.inner.changed.notify_waiters();
    }
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Ack,
    Requeue,
    Discard,
}

struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &BrokerAddress,
    ) -> Result<Arc<dyn BrokerConnection>, MessagingError> {
        let host = address.host().unwrap_or_default();
        let (reachable, unresponsive) = {
            let mut state = self.broker.state();
            state.attempts.push(address.as_str().to_string());
            (
                state.reachable.contains(&host),
                state.unresponsive.contains(&host),
            )
        };

        if unresponsive {
            futures::future::pending::<()>().await;
        }
        if !reachable {
            return Err(MessagingError::connection(format!(
                "connection refused by {host}"
            )));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.broker.state().connections.push(Arc::clone(&alive));
        Ok(Arc::new(MemoryConnection {
            broker: self.broker.clone(),
            alive,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, MessagingError> {
        if !self.is_alive() {
            return Err(MessagingError::ConnectionClosed);
        }
        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            connection_alive: Arc::clone(&self.alive),
            open: Arc::new(AtomicBool::new(true)),
            prefetch: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.alive.store(false, Ordering::SeqCst);
        self.broker.inner.changed.notify_waiters();
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    connection_alive: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    prefetch: Mutex<Option<u16>>,
}

impl MemoryChannel {
    fn ensure_open(&self, operation: &str) -> Result<(), MessagingError> {
        if !self.connection_alive.load(Ordering::SeqCst) {
            return Err(MessagingError::ConnectionClosed);
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(MessagingError::channel(operation, "channel is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn set_prefetch(&self, count: u16) -> Result<(), MessagingError> {
        self.ensure_open("basic.qos")?;
        *self
            .prefetch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(count);
        self.broker.state().prefetch_settings.push(count);
        Ok(())
    }

    async fn declare_durable_queue(&self, name: &str) -> Result<(), MessagingError> {
        self.ensure_open("queue.declare")?;
        let mut state = self.broker.state();
        let q = state.queues.entry(name.to_string()).or_default();
        q.durable = true;
        q.declarations += 1;
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), MessagingError> {
        self.ensure_open("basic.publish")?;
        {
            let mut state = self.broker.state();
            match state.queues.get_mut(routing_key) {
                Some(q) => {
                    q.published.push(envelope.clone());
                    q.ready.push_back(envelope.payload.clone());
                }
                None => state.unroutable += 1,
            }
        }
        self.broker.inner.changed.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, MessagingError> {
        self.ensure_open("basic.consume")?;
        if !self.broker.state().queues.contains_key(queue) {
            return Err(MessagingError::channel(
                "basic.consume",
                format!("no queue '{queue}'"),
            ));
        }

        let requested = *self
            .prefetch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let prefetch = requested
            .filter(|n| *n > 0)
            .map(usize::from)
            .unwrap_or(Semaphore::MAX_PERMITS);

        let subscription = Subscription {
            broker: self.broker.clone(),
            queue: queue.to_string(),
            permits: Arc::new(Semaphore::new(prefetch)),
            connection_alive: Arc::clone(&self.connection_alive),
            channel_open: Arc::clone(&self.open),
        };

        Ok(futures::stream::unfold(subscription, |sub| async move {
            let delivery = sub.next_delivery().await?;
            Some((Ok(Box::new(delivery) as Box<dyn Delivery>), sub))
        })
        .boxed())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.open.store(false, Ordering::SeqCst);
        self.broker.inner.changed.notify_waiters();
        Ok(())
    }
}

struct Subscription {
    broker: MemoryBroker,
    queue: String,
    permits: Arc<Semaphore>,
    connection_alive: Arc<AtomicBool>,
    channel_open: Arc<AtomicBool>,
}

impl Subscription {
    fn is_active(&self) -> bool {
        self.connection_alive.load(Ordering::SeqCst) && self.channel_open.load(Ordering::SeqCst)
    }

    /// Wait for a prefetch slot and a ready message. `None` once the channel or
    /// connection goes away.
    async fn next_delivery(&self) -> Option<MemoryDelivery> {
        let permit = loop {
            let changed = self.broker.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if !self.is_active() {
                return None;
            }
            tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => break permit.ok()?,
                _ = changed => continue,
            }
        };

        loop {
            let changed = self.broker.inner.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if !self.is_active() {
                return None;
            }
            let payload = {
                let mut state = self.broker.state();
                state.queues.get_mut(&self.queue).and_then(|q| {
                    let payload = q.ready.pop_front()?;
                    q.unacked += 1;
                    q.max_unacked = q.max_unacked.max(q.unacked);
                    Some(payload)
                })
            };
            if let Some(payload) = payload {
                return Some(MemoryDelivery {
                    broker: self.broker.clone(),
                    queue: self.queue.clone(),
                    tag: self.broker.inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
                    payload,
                    permit: Mutex::new(Some(permit)),
                    settled: AtomicBool::new(false),
                });
            }
            changed.await;
        }
    }
}

struct MemoryDelivery {
    broker: MemoryBroker,
    queue: String,
    tag: u64,
    payload: Vec<u8>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    settled: AtomicBool,
}

impl MemoryDelivery {
    fn settle(&self, outcome: Settlement) -> Result<(), MessagingError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::channel(
                "basic.ack",
                format!("delivery {} already settled", self.tag),
            ));
        }
        self.broker.settle(&self.queue, &self.payload, outcome);
        self.permit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    async fn ack(&self) -> Result<(), MessagingError> {
        self.settle(Settlement::Ack)
    }

    async fn reject(&self, requeue: bool) -> Result<(), MessagingError> {
        self.settle(if requeue {
            Settlement::Requeue
        } else {
            Settlement::Discard
        })
    }
}

impl Drop for MemoryDelivery {
    // Unsettled deliveries go back to the queue, as when a channel closes.
    fn drop(&mut self) {
        if !self.settled.swap(true, Ordering::SeqCst) {
            self.broker
                .settle(&self.queue, &self.payload, Settlement::Requeue);
        }
    }
}
