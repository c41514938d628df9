/*!
 * # Message Queue
 *
 * Topic-keyed queue used to take secondary work (the wishlist purchase
 * check) off the submission path. Publishing never blocks; consumers poll
 * their topic from a background task.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

pub mod topics {
    pub const WISHLIST_PURCHASE_CHECK: &str = "wishlist.purchase_check";
}

#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Unknown message: {0}")]
    UnknownMessage(Uuid),
}

impl From<serde_json::Error> for MessageQueueError {
    fn from(err: serde_json::Error) -> Self {
        MessageQueueError::SerializationError(err.to_string())
    }
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn from_payload<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, MessageQueueError> {
        Ok(Self::new(topic, serde_json::to_value(payload)?))
    }
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    /// Takes the next message of `topic`; it stays in flight until acked or nacked.
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Requeues the message unless it has exhausted its retries.
    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, VecDeque<Message>>,
    in_flight: HashMap<Uuid, Message>,
}

#[derive(Debug)]
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::with_max_size(1000)
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn pending(&self, topic: &str) -> usize {
        self.lock().queues.get(topic).map(VecDeque::len).unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut state = self.lock();
        let queue = state.queues.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut state = self.lock();
        let next = state.queues.get_mut(topic).and_then(VecDeque::pop_front);
        if let Some(message) = &next {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(next)
    }

    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        self.lock()
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or(MessageQueueError::UnknownMessage(*message_id))
    }

    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let mut state = self.lock();
        let mut message = state
            .in_flight
            .remove(message_id)
            .ok_or(MessageQueueError::UnknownMessage(*message_id))?;

        if message.retry_count >= message.max_retries {
            tracing::warn!(
                message_id = %message.id,
                topic = %message.topic,
                "Dropping message after exhausting retries"
            );
            return Ok(());
        }
        message.retry_count += 1;
        state
            .queues
            .entry(message.topic.clone())
            .or_default()
            .push_back(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn publish_then_subscribe_in_order() {
        let queue = InMemoryMessageQueue::new();
        queue
            .publish(Message::new("t", serde_json::json!({"n": 1})))
            .await
            .unwrap();
        queue
            .publish(Message::new("t", serde_json::json!({"n": 2})))
            .await
            .unwrap();

        let first = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(first.payload["n"], 1);
        queue.ack(&first.id).await.unwrap();
        let second = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(second.payload["n"], 2);
        assert!(queue.subscribe("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_queue_rejects_publish() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue.publish(Message::new("t", serde_json::json!({}))).await.unwrap();
        let err = queue.publish(Message::new("t", serde_json::json!({}))).await;
        assert_matches!(err, Err(MessageQueueError::QueueFull));
    }

    #[tokio::test]
    async fn nack_requeues_until_retries_exhausted() {
        let queue = InMemoryMessageQueue::new();
        let mut message = Message::new("t", serde_json::json!({}));
        message.max_retries = 1;
        queue.publish(message).await.unwrap();

        let taken = queue.subscribe("t").await.unwrap().unwrap();
        queue.nack(&taken.id).await.unwrap();
        let retried = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(retried.retry_count, 1);

        queue.nack(&retried.id).await.unwrap();
        assert!(queue.subscribe("t").await.unwrap().is_none());
    }
}
