//! Bounded Queue Concurrency Tests
//!
//! - Every item put is delivered exactly once
//! - Each producer's items reach any one consumer in put order
//! - After `end` every consumer sees exactly one unsuccessful get
//! - Parked producers never exceed `producers_max`

use aerotx::op::{Op, OpState};
use aerotx::queue::{BoundedQueue, QueueConfig, QueueError, QueueSlot};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// =============================================================================
// Test Utilities
// =============================================================================

fn put_blocking(queue: &BoundedQueue<(usize, usize)>, item: (usize, usize)) {
    let op = Op::new();
    queue.lock().put(&op, item).expect("put");
    op.wait().expect("wait put");
    op.fini().expect("fini put");
}

fn get_blocking<T>(queue: &BoundedQueue<T>) -> Option<T> {
    let op = Op::new();
    let slot = QueueSlot::new();
    queue.lock().get(&op, &slot).expect("get");
    op.wait().expect("wait get");
    op.fini().expect("fini get");
    slot.take()
}

// =============================================================================
// Threaded Delivery
// =============================================================================

#[test]
fn test_mpmc_delivers_every_item_exactly_once() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: usize = 500;

    let queue = Arc::new(
        BoundedQueue::new(QueueConfig::new(4, PRODUCERS, CONSUMERS)).expect("queue"),
    );
    let misses = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let misses = Arc::clone(&misses);
            thread::spawn(move || {
                let mut received = Vec::new();
                loop {
                    match get_blocking(&queue) {
                        Some(item) => received.push(item),
                        None => {
                            misses.fetch_add(1, Ordering::SeqCst);
                            return received;
                        }
                    }
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    put_blocking(&queue, (producer, seq));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    queue.lock().end().unwrap();

    let mut seen = HashSet::new();
    for consumer in consumers {
        let received = consumer.join().unwrap();
        let mut last = vec![None; PRODUCERS];
        for (producer, seq) in received {
            assert!(seen.insert((producer, seq)), "duplicate delivery");
            if let Some(prev) = last[producer] {
                assert!(seq > prev, "producer order broken");
            }
            last[producer] = Some(seq);
        }
    }

    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(misses.load(Ordering::SeqCst), CONSUMERS);

    let guard = queue.lock();
    assert_eq!(guard.enqueued(), (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(guard.dequeued(), guard.enqueued());
    drop(guard);

    let queue = Arc::try_unwrap(queue).expect("sole owner");
    queue.fini().unwrap();
}

#[test]
fn test_end_releases_parked_consumers() {
    const CONSUMERS: usize = 4;
    let queue = Arc::new(BoundedQueue::<u32>::new(QueueConfig::new(2, 1, CONSUMERS)).unwrap());

    let ops: Vec<(Op, QueueSlot<u32>)> = (0..CONSUMERS)
        .map(|_| {
            let op = Op::new();
            let slot = QueueSlot::new();
            queue.lock().get(&op, &slot).unwrap();
            (op, slot)
        })
        .collect();
    assert_eq!(queue.lock().waiting_consumers(), CONSUMERS);
    for (op, _) in &ops {
        assert_eq!(op.state().unwrap(), OpState::Active);
    }

    // One more consumer than allowed cannot park
    let extra = Op::new();
    assert!(matches!(
        queue.lock().get(&extra, &QueueSlot::new()),
        Err(QueueError::TooManyConsumers(CONSUMERS))
    ));

    queue.lock().end().unwrap();
    for (op, slot) in ops {
        assert!(op.is_done());
        assert!(slot.take().is_none());
        op.fini().unwrap();
    }
    assert!(matches!(
        queue.lock().put(&extra, 1),
        Err(QueueError::Closed)
    ));
    extra.fini().unwrap();
}

// =============================================================================
// Overflow Slots
// =============================================================================

#[test]
fn test_full_queue_parks_producers_in_order() {
    let queue = BoundedQueue::new(QueueConfig::new(1, 2, 1)).unwrap();

    let first = Op::new();
    queue.lock().put(&first, 'a').unwrap();
    assert!(first.is_done());

    let second = Op::new();
    let third = Op::new();
    queue.lock().put(&second, 'b').unwrap();
    queue.lock().put(&third, 'c').unwrap();
    assert_eq!(second.state().unwrap(), OpState::Active);
    assert_eq!(third.state().unwrap(), OpState::Active);
    assert_eq!(queue.len(), 3);

    let fourth = Op::new();
    assert!(matches!(
        queue.lock().put(&fourth, 'd'),
        Err(QueueError::TooManyProducers(2))
    ));
    assert_eq!(fourth.state().unwrap(), OpState::Init);

    assert_eq!(get_blocking(&queue), Some('a'));
    assert!(second.is_done());
    assert_eq!(third.state().unwrap(), OpState::Active);

    assert_eq!(get_blocking(&queue), Some('b'));
    assert!(third.is_done());
    assert_eq!(get_blocking(&queue), Some('c'));

    for op in [first, second, third, fourth] {
        op.fini().unwrap();
    }
    queue.fini().unwrap();
}

#[test]
fn test_closed_queue_drains_before_failing() {
    let queue = BoundedQueue::new(QueueConfig::new(4, 1, 1)).unwrap();
    for n in 0..3 {
        let op = Op::new();
        queue.lock().put(&op, n).unwrap();
        op.fini().unwrap();
    }
    queue.lock().end().unwrap();
    queue.lock().end().unwrap();

    assert_eq!(get_blocking(&queue), Some(0));
    assert_eq!(queue.lock().drain().unwrap(), vec![1, 2]);
    assert_eq!(get_blocking(&queue), None);
    queue.fini().unwrap();
}
