//! The `Broker` trait seam: durable quorum-style queues with manual ack,
//! prefetch 1, and publisher confirms (spec.md §4.L).

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker publish error: {0}")]
    Publish(String),

    #[error("broker ack/nack error: {0}")]
    Acknowledge(String),
}

/// A single inbound message. `tag` identifies it to `ack`/`nack_requeue`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub tag: u64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError>;

    /// Pulls the next message for `queue`, or `None` if none is available
    /// right now. Never buffers more than `prefetch` unacked deliveries
    /// per consumer (spec.md §4.L / §5).
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&self, queue: &str, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Requeues for redelivery after `countdown`, with `headers` replacing
    /// the delivery's original headers (the runner uses this to bump the
    /// retry-count header; AMQP has no native "nack with modified
    /// headers", so this acks the original and republishes). Dropping a
    /// duplicate delivery without re-execution is modeled by calling
    /// `ack` instead.
    async fn nack_requeue(
        &self,
        queue: &str,
        delivery: &Delivery,
        countdown: Duration,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError>;
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Delivery>>,
    next_tag: u64,
}

/// In-memory `Broker` for tests: no real redelivery ordering guarantees,
/// but `nack_requeue` does push the message back after `countdown`
/// elapses, matching the AMQP implementation's observable behavior.
pub struct InMemoryBroker {
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        let tag = inner.next_tag;
        inner.next_tag += 1;
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Delivery { body, headers, tag });
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.queues.entry(queue.to_string()).or_default().pop_front())
    }

    async fn ack(&self, _queue: &str, _delivery: &Delivery) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn nack_requeue(
        &self,
        queue: &str,
        delivery: &Delivery,
        countdown: Duration,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        if !countdown.is_zero() {
            tokio::time::sleep(countdown).await;
        }
        self.publish(queue, delivery.body.clone(), headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_consume_round_trips() {
        let broker = InMemoryBroker::new();
        broker
            .publish("ml.summarize", b"payload".to_vec(), HashMap::new())
            .await
            .unwrap();
        let delivery = broker.next_delivery("ml.summarize").await.unwrap().unwrap();
        assert_eq!(delivery.body, b"payload");
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let broker = InMemoryBroker::new();
        assert!(broker.next_delivery("ml.transcribe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_requeue_makes_message_available_again() {
        let broker = InMemoryBroker::new();
        broker
            .publish("ml.embed", b"payload".to_vec(), HashMap::new())
            .await
            .unwrap();
        let delivery = broker.next_delivery("ml.embed").await.unwrap().unwrap();
        broker
            .nack_requeue("ml.embed", &delivery, Duration::ZERO, delivery.headers.clone())
            .await
            .unwrap();
        assert!(broker.next_delivery("ml.embed").await.unwrap().is_some());
    }
}
