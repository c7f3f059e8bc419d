//! Producer/consumer throughput benchmark for every queue variant.
//!
//! Usage:
//!     cargo run --release --bin queue_bench
//!
//! Environment variables:
//!     PRODUCERS=4      Producer threads for the shared queues (default: 4)
//!     CONSUMERS=4      Consumer threads for the shared queues (default: 4)
//!     ITEMS=1000000    Items pushed by each producer (default: 1000000)
//!     CAPACITY=1024    Queue capacity (default: 1024)
//!     PIN_CPUS=1       Pin threads round-robin to the available cores
//!
//! SPSC always runs one producer and one consumer.

use std::env;
use std::sync::{Arc, Barrier};
use std::thread;

use boundq::{BlockingQueue, MpmcQueue, Pop, Push, spsc};
use core_affinity::CoreId;
use minstant::Instant;

struct Settings {
    producers: usize,
    consumers: usize,
    items: u64,
    capacity: usize,
    cores: Vec<CoreId>,
}

impl Settings {
    fn from_env() -> Self {
        let pin = env::var("PIN_CPUS").is_ok_and(|v| v == "1");
        Self {
            producers: env_or("PRODUCERS", 4),
            consumers: env_or("CONSUMERS", 4),
            items: env_or("ITEMS", 1_000_000),
            capacity: env_or("CAPACITY", 1024),
            cores: if pin {
                core_affinity::get_core_ids().unwrap_or_default()
            } else {
                Vec::new()
            },
        }
    }

    /// Core for the `index`-th thread, round-robin.
    fn core(&self, index: usize) -> Option<CoreId> {
        (!self.cores.is_empty()).then(|| self.cores[index % self.cores.len()])
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(core: Option<CoreId>) {
    if let Some(core) = core {
        core_affinity::set_for_current(core);
    }
}

fn report(name: &str, total: u64, start: Instant) {
    let elapsed = start.elapsed();
    let ops_per_ms = u128::from(total) * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{name:>10}: {ops_per_ms} ops/ms ({total} items in {elapsed:?})");
}

/// Runs `producers` x `consumers` threads over a shared queue and checks that
/// every item arrives exactly once (by sum).
fn bench_shared<Q>(name: &str, queue: Q, settings: &Settings)
where
    Q: Push<u64> + Pop<u64> + Send + Sync + 'static,
{
    let queue = Arc::new(queue);
    let barrier = Arc::new(Barrier::new(settings.producers + settings.consumers + 1));
    let items = settings.items;

    let producers: Vec<_> = (0..settings.producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            let core = settings.core(p);
            thread::spawn(move || {
                pin_to_cpu(core);
                barrier.wait();
                let base = p as u64 * items;
                for i in 0..items {
                    queue.push(base + i).expect("queue closed during benchmark");
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..settings.consumers)
        .map(|c| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            let core = settings.core(settings.producers + c);
            thread::spawn(move || {
                pin_to_cpu(core);
                barrier.wait();
                queue.drain().fold(0u64, u64::wrapping_add)
            })
        })
        .collect();

    barrier.wait();
    let start = Instant::now();

    for p in producers {
        p.join().expect("producer panicked");
    }
    queue.close();
    let sum = consumers
        .into_iter()
        .map(|c| c.join().expect("consumer panicked"))
        .fold(0u64, u64::wrapping_add);

    let total = settings.producers as u64 * items;
    report(name, total, start);

    let expected = (0..total).fold(0u64, u64::wrapping_add);
    assert_eq!(sum, expected, "{name}: items lost or duplicated");
}

fn bench_spsc(settings: &Settings) {
    let (producer, consumer) = spsc::channel(settings.capacity);
    let barrier = Arc::new(Barrier::new(2));
    let items = settings.items;

    let consumer_barrier = Arc::clone(&barrier);
    let consumer_core = settings.core(1);
    let consumer_thread = thread::spawn(move || {
        pin_to_cpu(consumer_core);
        consumer_barrier.wait();
        for expected in 0..items {
            let value = consumer.pop();
            assert_eq!(value, Some(expected), "data corruption");
        }
    });

    pin_to_cpu(settings.core(0));
    barrier.wait();
    let start = Instant::now();

    for i in 0..items {
        producer.push(i).expect("queue closed during benchmark");
    }
    consumer_thread.join().expect("consumer panicked");

    report("spsc", items, start);
}

fn main() {
    boundq::init_tracing();
    let settings = Settings::from_env();

    println!(
        "producers={} consumers={} items/producer={} capacity={} pinned={}",
        settings.producers,
        settings.consumers,
        settings.items,
        settings.capacity,
        !settings.cores.is_empty()
    );

    bench_spsc(&settings);
    bench_shared("mpmc", MpmcQueue::with_capacity(settings.capacity), &settings);
    bench_shared("blocking", BlockingQueue::with_capacity(settings.capacity), &settings);
}
