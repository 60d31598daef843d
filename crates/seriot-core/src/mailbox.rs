//! Ordered message mailboxes.
//!
//! A mailbox is the only communication path between loops: each component
//! owns one as its inbound command queue, and the thing owns one as its
//! event queue. Multi-producer, single-consumer, bounded only by memory;
//! send order is preserved per sender and the single consumer observes one
//! total order.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::message::Message;

/// Sending half of a mailbox. Cheap to clone; hand one to every producer.
#[derive(Clone)]
pub struct MailboxSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl MailboxSender {
    /// Enqueue a message.
    ///
    /// Returns `false` if the receiving loop is gone. Senders treat that as
    /// "the consumer already shut down" rather than an error.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Error returned by [`Mailbox::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// No message arrived within the wait window.
    Timeout,
    /// All senders dropped and the queue is drained.
    Closed,
}

/// Receiving half of a mailbox.
pub struct Mailbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Mailbox {
    /// Create a connected sender/receiver pair.
    pub fn channel() -> (MailboxSender, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MailboxSender { tx }, Mailbox { rx })
    }

    /// Wait for the next message. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Wait for the next message, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvTimeoutError::Closed),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Source;

    #[tokio::test]
    async fn test_send_order_preserved() {
        let (tx, mut rx) = Mailbox::channel();
        for i in 0..5i64 {
            tx.send(Message::external("n", i));
        }
        for i in 0..5i64 {
            match rx.recv().await.unwrap() {
                Message::Update { value, .. } => assert_eq!(value.as_i64(), Some(i)),
                _ => panic!("expected update"),
            }
        }
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (tx, mut rx) = Mailbox::channel();
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );

        tx.send(Message::Exit);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Ok(Message::Exit)
        );

        drop(tx);
        assert_eq!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Closed)
        );
    }

    #[tokio::test]
    async fn test_drain_is_non_blocking() {
        let (tx, mut rx) = Mailbox::channel();
        assert!(rx.drain().is_empty());

        tx.send(Message::external("a", 1i64));
        tx.send(Message::external("b", 2i64));
        let drained = rx.drain();
        assert_eq!(drained.len(), 2);
        assert!(rx.drain().is_empty());
    }

    #[tokio::test]
    async fn test_multiple_producers() {
        let (tx, mut rx) = Mailbox::channel();
        let tx2 = tx.clone();

        tokio::spawn(async move {
            tx.send(Message::from_component("preamp", "volume", 10i64));
        });
        tokio::spawn(async move {
            tx2.send(Message::from_component("projector", "projPowerState", "ON"));
        });

        let mut sources = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                Message::Update { source, .. } => sources.push(source),
                _ => panic!("expected update"),
            }
        }
        assert!(sources.contains(&Source::Component("preamp".into())));
        assert!(sources.contains(&Source::Component("projector".into())));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = Mailbox::channel();
        drop(rx);
        assert!(!tx.send(Message::Exit));
    }
}
