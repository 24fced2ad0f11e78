//! Criterion benchmark untuk queue dan framing
//!
//! Run dengan: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use iris::core::TsQueue;
use iris::protocol::{encode_frame, FrameReader, FrameWriter, Message, HEADER_SIZE};

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ts_queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop_cycle", |b| {
        let queue: TsQueue<u64> = TsQueue::new();
        let mut i = 0u64;
        b.iter(|| {
            queue.push_back(black_box(i));
            black_box(queue.pop_front());
            i = i.wrapping_add(1);
        });
    });

    group.bench_function("pop_back_prefilled", |b| {
        let queue: TsQueue<u64> = TsQueue::new();
        for i in 0..4096 {
            queue.push_back(i);
        }
        b.iter(|| {
            if let Some(v) = queue.pop_back() {
                queue.push_front(black_box(v));
            }
        });
    });

    group.finish();
}

fn bench_message_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_body");

    group.bench_function("push_pop_scalars", |b| {
        b.iter(|| {
            let mut msg = Message::new(1u32);
            msg.push(&black_box(42u32)).push(&black_box(3.5f64)).push(&black_box(7u64));
            let a: Option<u64> = msg.pop();
            let b2: Option<f64> = msg.pop();
            let c2: Option<u32> = msg.pop();
            black_box((a, b2, c2));
        });
    });

    group.throughput(Throughput::Bytes(4096));
    group.bench_function("push_4k_array", |b| {
        let payload = [0xABu8; 4096];
        b.iter(|| {
            let mut msg = Message::new(1u32);
            msg.push(black_box(&payload));
            black_box(msg.size());
        });
    });

    group.finish();
}

fn bench_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");

    for body_size in [0usize, 64, 4096] {
        let message = Message::with_body(7u32, vec![0x5Au8; body_size]);
        let batch = 1000;
        let stream: Vec<u8> = (0..batch).flat_map(|_| encode_frame(&message)).collect();

        group.throughput(Throughput::Bytes(((HEADER_SIZE + body_size) * batch) as u64));

        group.bench_function(format!("encode_{}b", body_size), |b| {
            b.iter(|| black_box(encode_frame(black_box(&message))));
        });

        group.bench_function(format!("decode_batch_{}b", body_size), |b| {
            b.iter(|| {
                let mut reader = FrameReader::<u32>::new(usize::MAX);
                let mut src: &[u8] = &stream;
                for _ in 0..batch {
                    black_box(reader.read_from(&mut src).ok().flatten());
                }
            });
        });

        group.bench_function(format!("write_batch_{}b", body_size), |b| {
            let mut sink = Vec::with_capacity(stream.len());
            b.iter(|| {
                sink.clear();
                let mut writer = FrameWriter::<u32>::new();
                for _ in 0..batch {
                    writer.start(message.clone());
                    let _ = writer.write_to(&mut sink);
                }
                black_box(sink.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue, bench_message_body, bench_framing);
criterion_main!(benches);
