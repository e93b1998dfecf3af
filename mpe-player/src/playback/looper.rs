//! Actor plumbing
//!
//! Each actor (controller, renderer) keeps its logic in a synchronous core
//! that never sleeps. Messages the core wants delivered to itself, now or
//! after a delay, are collected in an [`Outbox`]; the actor loop hands them to
//! [`dispatch`] after every handled message.

use std::time::Duration;
use tokio::sync::mpsc;

/// A message scheduled for self-delivery
#[derive(Debug)]
pub struct Scheduled<M> {
    pub delay: Duration,
    pub message: M,
}

/// Self-addressed messages produced while handling one message
#[derive(Debug)]
pub struct Outbox<M> {
    pending: Vec<Scheduled<M>>,
}

impl<M> Default for Outbox<M> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}

impl<M> Outbox<M> {
    pub fn post(&mut self, message: M) {
        self.post_delayed(message, Duration::ZERO);
    }

    pub fn post_delayed(&mut self, message: M, delay: Duration) {
        self.pending.push(Scheduled { delay, message });
    }

    pub fn take(&mut self) -> Vec<Scheduled<M>> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Deliver scheduled messages back into the actor's own mailbox.
///
/// Holds only a weak sender so pending timers never keep an actor alive.
pub fn dispatch<M: Send + 'static>(
    tx: &mpsc::WeakUnboundedSender<M>,
    scheduled: Vec<Scheduled<M>>,
) {
    for Scheduled { delay, message } in scheduled {
        if delay.is_zero() {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
            continue;
        }

        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_immediate_and_delayed_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let mut outbox = Outbox::default();
        outbox.post_delayed(2, Duration::from_millis(50));
        outbox.post(1);
        dispatch(&tx.downgrade(), outbox.take());
        assert!(outbox.is_empty());

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_dropped_when_actor_gone() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let weak = tx.downgrade();
        let mut outbox = Outbox::default();
        outbox.post_delayed(7, Duration::from_millis(10));
        dispatch(&weak, outbox.take());
        drop(tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.recv().await, None);
    }
}
