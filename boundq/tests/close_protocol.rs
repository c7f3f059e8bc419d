//! Close protocol checks shared by all variants.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use boundq::{
    BlockingQueue, Bounded, ClosedQueueError, MpmcQueue, Pop, Push, Timeout, TryPopError,
    TryPushError, spsc,
};

fn push_after_close<P: Push<String>, C: Pop<String>>(tx: &P, rx: &C) {
    tx.push("kept".to_owned()).unwrap();
    rx.close();
    rx.close();

    assert!(tx.is_closed());
    assert_eq!(tx.push("late".to_owned()), Err(ClosedQueueError("late".to_owned())));
    assert_eq!(
        tx.try_push("later".to_owned()),
        Err(TryPushError::Closed("later".to_owned()))
    );

    assert_eq!(rx.pop().as_deref(), Some("kept"));
    assert_eq!(rx.pop(), None);
    assert_eq!(rx.try_pop(), Err(TryPopError::Closed));
    assert_eq!(rx.pop_timeout(Timeout::Infinite), Err(TryPopError::Closed));
    assert!(rx.is_empty());
}

#[test]
fn push_after_close_returns_value() {
    let blocking = BlockingQueue::with_capacity(2);
    push_after_close(&blocking, &blocking);

    let mpmc = MpmcQueue::with_capacity(2);
    push_after_close(&mpmc, &mpmc);

    let (tx, rx) = spsc::channel(2);
    push_after_close(&tx, &rx);
}

fn pop_timeout_elapses<Q: Push<u8> + Pop<u8>>(queue: &Q) {
    let timeout = Timeout::from(Duration::from_millis(20));
    let start = std::time::Instant::now();
    assert_eq!(queue.pop_timeout(timeout), Err(TryPopError::Empty));
    assert!(start.elapsed() >= Duration::from_millis(20));

    queue.push(9).unwrap();
    assert_eq!(queue.pop_timeout(timeout), Ok(9));
}

#[test]
fn pop_timeout_elapses_when_empty() {
    pop_timeout_elapses(&BlockingQueue::with_capacity(1));
    pop_timeout_elapses(&MpmcQueue::with_capacity(1));
}

#[test]
fn blocking_close_fails_waiting_producers() {
    let queue = Arc::new(BlockingQueue::with_capacity(1));
    queue.push(0u32).unwrap();

    let waiting: Vec<_> = (1..=3)
        .map(|i| {
            let q = Arc::clone(&queue);
            thread::spawn(move || q.push(i))
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.close();

    let mut rejected: Vec<u32> = waiting
        .into_iter()
        .map(|h| h.join().unwrap().unwrap_err().into_inner())
        .collect();
    rejected.sort_unstable();
    assert_eq!(rejected, vec![1, 2, 3]);
    assert_eq!(queue.pop(), Some(0));
    assert_eq!(queue.pop(), None);
}

#[test]
fn mpmc_close_under_load_loses_nothing() {
    // Producers race the close: every push either landed (and is popped) or
    // was handed back.
    let queue = Arc::new(MpmcQueue::with_capacity(4));
    let accepted = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let q = Arc::clone(&queue);
            let accepted = Arc::clone(&accepted);
            thread::spawn(move || {
                let mut i = 0u64;
                while q.push(i).is_ok() {
                    accepted.fetch_add(1, Ordering::Relaxed);
                    i += 1;
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let q = Arc::clone(&queue);
            thread::spawn(move || q.drain().count())
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    queue.close();

    for p in producers {
        p.join().unwrap();
    }
    let popped: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
    assert_eq!(popped, accepted.load(Ordering::Relaxed));
}

#[test]
fn spsc_close_under_load_loses_nothing() {
    let (tx, rx) = spsc::channel(2);

    let producer = thread::spawn(move || {
        let mut accepted = 0usize;
        while tx.push(accepted).is_ok() {
            accepted += 1;
            if accepted == 5_000 {
                tx.close();
            }
        }
        accepted
    });

    let received: Vec<usize> = rx.drain().collect();
    let accepted = producer.join().unwrap();
    assert_eq!(received.len(), accepted);
    assert!(received.iter().copied().eq(0..accepted));
}

#[test]
fn close_is_idempotent_from_any_thread() {
    let queue = Arc::new(MpmcQueue::<u8>::with_capacity(3));
    let closers: Vec<_> = (0..4)
        .map(|_| {
            let q = Arc::clone(&queue);
            thread::spawn(move || q.close())
        })
        .collect();
    for c in closers {
        c.join().unwrap();
    }
    assert!(queue.is_closed());
    assert_eq!(queue.pop(), None);
}
