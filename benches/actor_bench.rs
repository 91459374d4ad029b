//! Benchmarks for the actor message protocol
//!
//! Every configure, hotplug and scale change crosses from the event pump
//! thread to the main thread through a protocol lane.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cinewin_core::actor::{Payload, Protocol};

fn lane_throughput_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("lane");

    for batch in [1, 16, 256] {
        group.bench_with_input(BenchmarkId::new("send_receive", batch), &batch, |b, &n| {
            let protocol = Protocol::new("bench");
            b.iter(|| {
                for signal in 0..n {
                    protocol.send_out_message(signal, Payload::Empty);
                }
                while let Some(message) = protocol.receive_out_message() {
                    black_box(message.signal);
                }
            });
        });
    }

    group.bench_function("boxed_payload", |b| {
        let protocol = Protocol::new("bench");
        b.iter(|| {
            protocol.send_out_message(0, Payload::boxed((1920_i32, 1080_i32, 60.0_f32)));
            let mut message = protocol.receive_out_message().unwrap();
            black_box(message.take_payload().downcast::<(i32, i32, f32)>())
        });
    });

    group.finish();
}

fn sync_round_trip_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    group.bench_function("reply_from_other_thread", |b| {
        let protocol = Arc::new(Protocol::new("bench"));
        let responder = Arc::clone(&protocol);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop_responder = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            while !stop_responder.load(std::sync::atomic::Ordering::Acquire) {
                match responder.receive_out_message() {
                    Some(mut message) => {
                        message.reply(1, Payload::Empty);
                    }
                    None => thread::yield_now(),
                }
            }
        });

        b.iter(|| {
            let reply = protocol
                .send_out_message_sync(0, Duration::from_secs(1), Payload::Empty)
                .unwrap();
            black_box(reply.signal)
        });

        stop.store(true, std::sync::atomic::Ordering::Release);
        worker.join().unwrap();
    });

    group.finish();
}

criterion_group!(benches, lane_throughput_benchmark, sync_round_trip_benchmark);
criterion_main!(benches);
