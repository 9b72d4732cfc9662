//! Byte ring throughput and round-trip benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use raceway::channel;

const RING_CAPACITY: usize = 1 << 20;
const MESSAGE_SIZE: usize = 64;
const ITERATIONS: usize = 1 << 20;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn encode_message(seq: u64) -> [u8; MESSAGE_SIZE] {
    let mut message = [0u8; MESSAGE_SIZE];
    message[..8].copy_from_slice(&seq.to_le_bytes());
    message
}

fn bench_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (writer, reader) = channel(RING_CAPACITY);

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    // Consumer thread
    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        // Signal ready
        ready_clone.store(true, Ordering::Release);

        let mut message = [0u8; MESSAGE_SIZE];
        for expected in 0..ITERATIONS as u64 {
            loop {
                if reader.get(&mut message) {
                    let seq = u64::from_le_bytes(message[..8].try_into().unwrap());
                    if seq != expected {
                        panic!("Data corruption: expected {}, got {}", expected, seq);
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    // Wait for consumer to be ready
    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for seq in 0..ITERATIONS as u64 {
        let message = encode_message(seq);
        while !writer.put(&message) {
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let msgs_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    let mib_per_s =
        (ITERATIONS * MESSAGE_SIZE) as u128 * 1_000_000_000 / elapsed.as_nanos() / (1 << 20);
    println!("throughput: {} msgs/ms, {} MiB/s", msgs_per_ms, mib_per_s);
}

fn bench_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    const ROUND_TRIPS: usize = 1 << 16;

    let (ping_writer, ping_reader) = channel(RING_CAPACITY);
    let (pong_writer, pong_reader) = channel(RING_CAPACITY);

    // Echo thread
    let echo_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);

        let mut message = [0u8; MESSAGE_SIZE];
        for _ in 0..ROUND_TRIPS {
            while !ping_reader.get(&mut message) {
                hint::spin_loop();
            }
            while !pong_writer.put(&message) {
                hint::spin_loop();
            }
        }
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    let mut message = [0u8; MESSAGE_SIZE];
    for seq in 0..ROUND_TRIPS as u64 {
        let outgoing = encode_message(seq);
        while !ping_writer.put(&outgoing) {
            hint::spin_loop();
        }
        while !pong_reader.get(&mut message) {
            hint::spin_loop();
        }
        if message != outgoing {
            panic!("Round-trip corruption at message {}", seq);
        }
    }

    echo_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ns_per_rtt = elapsed.as_nanos() / ROUND_TRIPS as u128;
    println!("round-trip: {} ns/rtt", ns_per_rtt);
}

fn main() {
    raceway::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();
    println!(
        "pinning: producer={:?} consumer={:?}, message size {} bytes",
        producer_cpu, consumer_cpu, MESSAGE_SIZE
    );

    bench_throughput(producer_cpu, consumer_cpu);
    bench_rtt(producer_cpu, consumer_cpu);
}
