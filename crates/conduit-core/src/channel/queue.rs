use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{MessageChannel, PollableChannel};
use crate::endpoint::{AcknowledgementCallback, AcknowledgementStatus};
use crate::error::MessagingResult;
use crate::message::{HeaderValue, Message, MessageBuilder, headers};

/// Order in which a [`QueueChannel`] hands out buffered messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDiscipline {
    /// Oldest message first.
    #[default]
    Fifo,
    /// Newest message first.
    Lifo,
}

/// In-memory buffered channel that consumers poll.
///
/// When created with [`acknowledging`](Self::acknowledging), every received
/// message carries an acknowledgement callback whose `requeue` puts the
/// message back at the head of the queue.
pub struct QueueChannel {
    name: String,
    discipline: QueueDiscipline,
    acknowledging: bool,
    queue: Mutex<VecDeque<Message>>,
    available: Notify,
    this: Weak<QueueChannel>,
}

impl QueueChannel {
    /// Creates a FIFO queue channel.
    pub fn create(name: impl Into<String>) -> Arc<Self> {
        Self::with_discipline(name, QueueDiscipline::Fifo)
    }

    pub fn with_discipline(name: impl Into<String>, discipline: QueueDiscipline) -> Arc<Self> {
        Self::build(name.into(), discipline, false)
    }

    /// Creates a queue channel attaching acknowledgement callbacks to received messages.
    pub fn acknowledging(name: impl Into<String>, discipline: QueueDiscipline) -> Arc<Self> {
        Self::build(name.into(), discipline, true)
    }

    fn build(name: String, discipline: QueueDiscipline, acknowledging: bool) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name,
            discipline,
            acknowledging,
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            this: this.clone(),
        })
    }

    pub fn discipline(&self) -> QueueDiscipline {
        self.discipline
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    fn pop(&self) -> Option<Message> {
        let mut queue = self.queue.lock();
        match self.discipline {
            QueueDiscipline::Fifo => queue.pop_front(),
            QueueDiscipline::Lifo => queue.pop_back(),
        }
    }

    /// Puts a message back so that it is the next one received.
    fn requeue(&self, message: Message) {
        {
            let mut queue = self.queue.lock();
            match self.discipline {
                QueueDiscipline::Fifo => queue.push_front(message),
                QueueDiscipline::Lifo => queue.push_back(message),
            }
        }
        self.available.notify_one();
    }

    fn take(&self) -> MessagingResult<Option<Message>> {
        let Some(message) = self.pop() else {
            return Ok(None);
        };
        if !self.acknowledging {
            return Ok(Some(message));
        }

        let callback: Arc<dyn AcknowledgementCallback> = Arc::new(QueueAcknowledgement {
            channel: self.this.clone(),
            message: message.clone(),
            status: Mutex::new(AcknowledgementStatus::Pending),
        });
        let message = MessageBuilder::from_message(&message)
            .set_header_if_absent(
                headers::CONSUMER_ACK_HEADER_LOCATION,
                headers::CONSUMER_ACK_CALLBACK,
            )
            .set_header_value(
                headers::CONSUMER_ACK_CALLBACK,
                HeaderValue::Acknowledgement(callback),
            )
            .build()?;
        Ok(Some(message))
    }
}

#[async_trait]
impl MessageChannel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> MessagingResult<()> {
        self.queue.lock().push_back(message);
        self.available.notify_one();
        Ok(())
    }
}

#[async_trait]
impl PollableChannel for QueueChannel {
    async fn receive(&self) -> MessagingResult<Option<Message>> {
        self.take()
    }

    async fn receive_with_timeout(&self, timeout: Duration) -> MessagingResult<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take()? {
                return Ok(Some(message));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // notify_one stores a permit, so a send racing with this wait is not lost.
            if tokio::time::timeout(remaining, self.available.notified())
                .await
                .is_err()
            {
                return self.take();
            }
        }
    }
}

/// Acknowledgement handed out by an acknowledging [`QueueChannel`].
struct QueueAcknowledgement {
    channel: Weak<QueueChannel>,
    message: Message,
    status: Mutex<AcknowledgementStatus>,
}

impl AcknowledgementCallback for QueueAcknowledgement {
    fn is_auto_ack(&self) -> bool {
        true
    }

    fn accept(&self) -> MessagingResult<()> {
        *self.status.lock() = AcknowledgementStatus::Accepted;
        Ok(())
    }

    fn requeue(&self) -> MessagingResult<()> {
        let mut status = self.status.lock();
        if *status == AcknowledgementStatus::Requeued {
            return Ok(());
        }
        *status = AcknowledgementStatus::Requeued;
        if let Some(channel) = self.channel.upgrade() {
            channel.requeue(self.message.clone());
        }
        Ok(())
    }

    fn status(&self) -> AcknowledgementStatus {
        *self.status.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(payload: i64) -> Message {
        MessageBuilder::with_payload(payload).build().unwrap()
    }

    #[tokio::test]
    async fn test_fifo_receives_in_send_order() {
        let channel = QueueChannel::create("queue");
        for i in 1..=3 {
            channel.send(message(i)).await.unwrap();
        }

        let mut received = Vec::new();
        while let Some(m) = channel.receive().await.unwrap() {
            received.push(m.payload().clone());
        }
        assert_eq!(received, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_lifo_receives_newest_first() {
        let channel = QueueChannel::with_discipline("stack", QueueDiscipline::Lifo);
        channel.send(message(1)).await.unwrap();
        channel.send(message(2)).await.unwrap();

        assert_eq!(channel.receive().await.unwrap().unwrap().payload(), &json!(2));
        assert_eq!(channel.receive().await.unwrap().unwrap().payload(), &json!(1));
    }

    #[tokio::test]
    async fn test_empty_receive_returns_immediately() {
        let channel = QueueChannel::create("queue");
        assert!(channel.receive().await.unwrap().is_none());
        assert!(
            channel
                .receive_with_timeout(Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_with_timeout_waits_for_send() {
        let channel = QueueChannel::create("queue");
        let sender = Arc::clone(&channel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.send(message(7)).await.unwrap();
        });

        let received = channel
            .receive_with_timeout(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(received.unwrap().payload(), &json!(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_with_timeout_gives_up() {
        let channel = QueueChannel::create("queue");
        let received = channel
            .receive_with_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_requeue_puts_message_back_at_head() {
        let channel = QueueChannel::acknowledging("queue", QueueDiscipline::Fifo);
        channel.send(message(1)).await.unwrap();
        channel.send(message(2)).await.unwrap();

        let first = channel.receive().await.unwrap().unwrap();
        let callback = first.headers().acknowledgement_callback().unwrap();
        callback.requeue().unwrap();
        callback.requeue().unwrap();

        assert_eq!(channel.len(), 2);
        let again = channel.receive().await.unwrap().unwrap();
        assert_eq!(again.payload(), &json!(1));
    }
}
