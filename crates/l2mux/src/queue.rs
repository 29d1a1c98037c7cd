//! Bounded, non-blocking queues connecting the scheduler to its collaborators
//!
//! Queues are the only structures shared between execution contexts. Each
//! half has a single owner; neither half ever blocks. A full queue hands the
//! item back, an empty queue yields `None`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

type Shared<T> = Arc<Mutex<Inner<T>>>;

fn lock<T>(shared: &Shared<T>) -> MutexGuard<'_, Inner<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returned by [`QueueProducer::try_enqueue`] when the queue is saturated
#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue is full")
    }
}

/// Create a bounded queue and return its two halves
pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let shared = Arc::new(Mutex::new(Inner {
        items: VecDeque::with_capacity(capacity),
        capacity,
    }));

    (
        QueueProducer {
            shared: Arc::clone(&shared),
        },
        QueueConsumer { shared },
    )
}

/// Enqueueing half of a bounded queue
pub struct QueueProducer<T> {
    shared: Shared<T>,
}

impl<T> QueueProducer<T> {
    /// Push an item, handing it back if the queue is full
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut inner = lock(&self.shared);
        if inner.items.len() >= inner.capacity {
            return Err(QueueFull(item));
        }

        inner.items.push_back(item);
        Ok(())
    }

    /// Whether one more item would be accepted
    pub fn has_capacity(&self) -> bool {
        let inner = lock(&self.shared);
        inner.items.len() < inner.capacity
    }

    /// Number of items waiting to be consumed
    pub fn len(&self) -> usize {
        lock(&self.shared).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.shared).capacity
    }
}

/// Dequeueing half of a bounded queue
pub struct QueueConsumer<T> {
    shared: Shared<T>,
}

impl<T> QueueConsumer<T> {
    /// Pop the oldest item, if any
    pub fn try_dequeue(&self) -> Option<T> {
        lock(&self.shared).items.pop_front()
    }

    /// Number of items waiting to be consumed
    pub fn len(&self) -> usize {
        lock(&self.shared).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything currently queued, returning how many items were removed
    pub fn clear(&self) -> usize {
        let mut inner = lock(&self.shared);
        let dropped = inner.items.len();
        inner.items.clear();
        dropped
    }
}

impl<T> fmt::Debug for QueueProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared);
        f.debug_struct("QueueProducer")
            .field("len", &inner.items.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

impl<T> fmt::Debug for QueueConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared);
        f.debug_struct("QueueConsumer")
            .field("len", &inner.items.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

/// One end of a bidirectional queue: sends `Tx` items, receives `Rx` items
#[derive(Debug)]
pub struct BidiQueueEnd<Tx, Rx> {
    producer: QueueProducer<Tx>,
    consumer: QueueConsumer<Rx>,
}

impl<Tx, Rx> BidiQueueEnd<Tx, Rx> {
    /// Reassemble an end from its halves
    pub fn from_parts(producer: QueueProducer<Tx>, consumer: QueueConsumer<Rx>) -> Self {
        Self { producer, consumer }
    }

    /// Split into the sending and receiving halves
    pub fn into_parts(self) -> (QueueProducer<Tx>, QueueConsumer<Rx>) {
        (self.producer, self.consumer)
    }

    pub fn try_enqueue(&self, item: Tx) -> Result<(), QueueFull<Tx>> {
        self.producer.try_enqueue(item)
    }

    pub fn try_dequeue(&self) -> Option<Rx> {
        self.consumer.try_dequeue()
    }

    pub fn has_capacity(&self) -> bool {
        self.producer.has_capacity()
    }

    /// Number of items waiting on the receiving side
    pub fn pending(&self) -> usize {
        self.consumer.len()
    }

    pub fn producer(&self) -> &QueueProducer<Tx> {
        &self.producer
    }

    pub fn consumer(&self) -> &QueueConsumer<Rx> {
        &self.consumer
    }
}

/// Create a bidirectional queue.
///
/// The first end sends `Up` items and receives `Down` items, the second end
/// the reverse. `up_capacity` bounds items travelling from the first end to
/// the second.
pub fn bidi<Up, Down>(
    up_capacity: usize,
    down_capacity: usize,
) -> (BidiQueueEnd<Up, Down>, BidiQueueEnd<Down, Up>) {
    let (up_tx, up_rx) = bounded(up_capacity);
    let (down_tx, down_rx) = bounded(down_capacity);

    (
        BidiQueueEnd::from_parts(up_tx, down_rx),
        BidiQueueEnd::from_parts(down_tx, up_rx),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_queue_rejects_when_full() {
        let (tx, rx) = bounded(2);

        assert!(tx.try_enqueue(1).is_ok());
        assert!(tx.try_enqueue(2).is_ok());
        assert!(!tx.has_capacity());
        assert_eq!(tx.try_enqueue(3), Err(QueueFull(3)));

        assert_eq!(rx.try_dequeue(), Some(1));
        assert!(tx.has_capacity());
        assert_eq!(rx.try_dequeue(), Some(2));
        assert_eq!(rx.try_dequeue(), None);
    }

    #[test]
    fn test_clear_drops_pending_items() {
        let (tx, rx) = bounded(4);
        tx.try_enqueue("a").unwrap();
        tx.try_enqueue("b").unwrap();

        assert_eq!(rx.clear(), 2);
        assert!(rx.is_empty());
        assert!(tx.is_empty());
    }

    #[test]
    fn test_bidi_directions() {
        let (upper, lower) = bidi::<u8, &str>(1, 1);

        upper.try_enqueue(7).unwrap();
        assert!(!upper.has_capacity());
        assert_eq!(lower.pending(), 1);
        assert_eq!(lower.try_dequeue(), Some(7));

        lower.try_enqueue("up").unwrap();
        assert_eq!(upper.try_dequeue(), Some("up"));
    }

    #[test]
    fn test_halves_work_across_threads() {
        let (tx, rx) = bounded(100);

        let handle = std::thread::spawn(move || {
            for i in 0..100u32 {
                tx.try_enqueue(i).unwrap();
            }
        });
        handle.join().unwrap();

        let drained: Vec<u32> = std::iter::from_fn(|| rx.try_dequeue()).collect();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
    }
}
