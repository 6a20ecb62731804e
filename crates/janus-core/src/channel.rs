//! A bounded, cancellation-aware FIFO with direct hand-off.
//!
//! One producer and one consumer side, both async. When a consumer is
//! already parked, `publish` hands the item over directly instead of
//! enqueuing; the two paths are indistinguishable to callers. A full queue
//! suspends publishers, an empty queue suspends consumers, and either wait
//! fails with [`JanusError::Cancelled`] when its token fires.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{JanusError, Result};

struct Inner<T> {
    queue: VecDeque<T>,
    /// Parked consumers, each holding a hand-off slot. Entries whose
    /// receiver was dropped (cancelled consumers) are skipped on hand-off.
    consumers: VecDeque<oneshot::Sender<T>>,
    /// Parked publishers waiting for a free slot.
    publishers: VecDeque<oneshot::Sender<()>>,
}

/// Bounded async FIFO. Cheap to share behind an `Arc`.
pub struct Bounded<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T: Send> Bounded<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                consumers: VecDeque::new(),
                publishers: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Number of items currently enqueued (items in flight via direct
    /// hand-off are not counted).
    pub fn depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of consumers currently parked waiting for an item.
    pub fn waiting_consumers(&self) -> usize {
        self.inner
            .lock()
            .consumers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Publish an item. Hands off directly to a parked consumer when one
    /// exists; enqueues when there is room; otherwise suspends until a
    /// consume frees a slot or `cancel` fires.
    pub async fn publish(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(JanusError::Cancelled);
        }

        let mut item = item;
        loop {
            let wait = {
                let mut inner = self.inner.lock();

                while let Some(tx) = inner.consumers.pop_front() {
                    match tx.send(item) {
                        Ok(()) => return Ok(()),
                        // That consumer cancelled — reclaim the item, try the next.
                        Err(returned) => item = returned,
                    }
                }

                if inner.queue.len() < self.capacity {
                    inner.queue.push_back(item);
                    return Ok(());
                }

                let (tx, rx) = oneshot::channel();
                inner.publishers.push_back(tx);
                rx
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(JanusError::Cancelled),
                _ = wait => {
                    // Woken by a consume (or the slot was dropped) — retry.
                }
            }
        }
    }

    /// Consume the next item. Suspends until one is published or `cancel`
    /// fires; on success, wakes one parked publisher.
    pub async fn consume(&self, cancel: &CancellationToken) -> Result<T> {
        if cancel.is_cancelled() {
            return Err(JanusError::Cancelled);
        }

        let mut wait = {
            let mut inner = self.inner.lock();

            if let Some(item) = inner.queue.pop_front() {
                wake_one_publisher(&mut inner);
                return Ok(item);
            }

            let (tx, rx) = oneshot::channel();
            inner.consumers.push_back(tx);
            rx
        };

        tokio::select! {
            item = &mut wait => match item {
                Ok(item) => Ok(item),
                Err(_) => Err(JanusError::Channel("channel dropped while waiting".into())),
            },
            _ = cancel.cancelled() => {
                // A publish may have handed an item over in the same instant;
                // salvage it back onto the queue so nothing is lost.
                if let Ok(item) = wait.try_recv() {
                    let mut inner = self.inner.lock();
                    inner.queue.push_front(item);
                }
                Err(JanusError::Cancelled)
            }
        }
    }
}

fn wake_one_publisher<T>(inner: &mut Inner<T>) {
    while let Some(tx) = inner.publishers.pop_front() {
        if tx.send(()).is_ok() {
            break;
        }
    }
}
