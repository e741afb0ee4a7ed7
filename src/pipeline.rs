//! Bounded inter-task queues.
//!
//! A thin wrapper over `tokio::sync::mpsc` bounded channels that unifies the
//! analog packet queue and the serial ring buffer behind one abstraction with
//! explicit try/timeout semantics:
//!
//! - Producers use [`BoundedSender::try_push`] (non-blocking) or
//!   [`BoundedSender::push_timeout`] (short bounded wait). A full queue is a
//!   backpressure signal surfaced as [`LoggerError::QueueFull`]; the caller
//!   counts the drop and moves on. Producers never block indefinitely.
//! - The single consumer uses [`BoundedReceiver::pop_timeout`] so it never
//!   stalls on one idle source, or [`BoundedReceiver::try_pop`] for
//!   zero-timeout drains.

use crate::error::{LoggerError, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

/// Create a bounded queue of the given capacity.
///
/// Capacity zero is rejected upstream by the allocating subsystem; this
/// function panics on zero like the underlying channel, so callers validate
/// first.
pub fn bounded<T>(capacity: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

/// Producer half of a bounded queue. Cloneable for multi-producer use.
#[derive(Debug)]
pub struct BoundedSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> BoundedSender<T> {
    /// Non-blocking push. The item is dropped on failure; the caller is
    /// responsible for counting it.
    pub fn try_push(&self, item: T) -> Result<()> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                Err(LoggerError::QueueFull)
            }
        }
    }

    /// Push with a short bounded wait for a free slot.
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> Result<()> {
        match self.tx.send_timeout(item, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => {
                Err(LoggerError::QueueFull)
            }
        }
    }

    /// Total capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of items currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half of a bounded queue.
#[derive(Debug)]
pub struct BoundedReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Zero-timeout pop.
    pub fn try_pop(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Pop with a bounded wait; `None` if nothing arrived in time (or all
    /// producers are gone).
    pub async fn pop_timeout(&mut self, timeout: Duration) -> Option<T> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(item) => item,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_drop_accounting_without_consumer() {
        let (tx, _rx) = bounded::<u32>(4);
        let mut successes = 0u32;
        let mut drops = 0u32;
        for i in 0..10 {
            match tx.try_push(i) {
                Ok(()) => successes += 1,
                Err(LoggerError::QueueFull) => drops += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 4);
        assert_eq!(drops, 6);
        assert_eq!(tx.queued(), 4);
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (tx, mut rx) = bounded::<u32>(8);
        for i in 0..5 {
            tx.try_push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.try_pop(), Some(i));
        }
        assert_eq!(rx.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_when_idle() {
        let (_tx, mut rx) = bounded::<u32>(2);
        let start = std::time::Instant::now();
        assert_eq!(rx.pop_timeout(Duration::from_millis(20)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn push_timeout_waits_for_consumer() {
        let (tx, mut rx) = bounded::<u32>(1);
        tx.try_push(1).unwrap();

        let tx2 = tx.clone();
        let producer = tokio::spawn(async move {
            tx2.push_timeout(2, Duration::from_millis(200)).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.try_pop(), Some(1));
        assert!(producer.await.unwrap().is_ok());
        assert_eq!(rx.pop_timeout(Duration::from_millis(50)).await, Some(2));
    }

    #[tokio::test]
    async fn push_timeout_gives_up_when_full() {
        let (tx, _rx) = bounded::<u32>(1);
        tx.try_push(1).unwrap();
        let err = tx.push_timeout(2, Duration::from_millis(20)).await;
        assert!(matches!(err, Err(LoggerError::QueueFull)));
    }
}
