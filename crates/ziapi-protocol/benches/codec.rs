//! Wire codec throughput
//!
//! - encode/decode of a demodulator burst
//! - decode of a scope shot split into blocks

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ziapi_protocol::*;

fn demod_event(samples: usize) -> ServerMessage {
    let data = (0..samples)
        .map(|i| DemodSample {
            timestamp: Timestamp(i as u64 * 60_000),
            x: 1e-3,
            y: -2e-3,
            frequency: 1e5,
            phase: 0.0,
            dio_bits: 0,
            trigger: 0,
            aux_in: [0.0; 2],
        })
        .collect();
    ServerMessage::Event {
        event: Event::new(
            NodePath::new("/dev1/demods/0/sample").unwrap(),
            Payload::DemodSample(data),
        ),
        solicited: false,
    }
}

fn scope_event(total: usize, block: usize) -> ServerMessage {
    let samples: Vec<f32> = (0..total).map(|i| (i as f32 * 0.01).sin()).collect();
    let waves = samples
        .chunks(block)
        .enumerate()
        .map(|(i, data)| ScopeWave {
            revision: ScopeRevision::Extended,
            timestamp: Timestamp(1),
            trigger_timestamp: Timestamp(1),
            dt: 1.0 / 60e6,
            channel_enable: [1, 0, 0, 0],
            channel_input: [0; 4],
            trigger_enable: 1,
            trigger_input: 0,
            channel_bw_limit: [0; 4],
            channel_math: [0; 4],
            channel_scaling: [1.0; 4],
            channel_offset: Some([0.0; 4]),
            sequence_number: 1,
            segment_number: 0,
            block_number: i as u32,
            total_samples: total as u64,
            data_transfer_mode: 0,
            block_marker: 0,
            flags: 0,
            sample_count: data.len() as u32,
            interleaved: false,
            data: ScopeData::Float(data.to_vec()),
        })
        .collect();
    ServerMessage::Event {
        event: Event::new(
            NodePath::new("/dev1/scopes/0/wave").unwrap(),
            Payload::ScopeWave(waves),
        ),
        solicited: false,
    }
}

fn bench_demod(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let mut group = c.benchmark_group("codec_demod");
    for samples in [1usize, 64, 1024] {
        let msg = demod_event(samples);
        group.throughput(Throughput::Elements(samples as u64));
        group.bench_with_input(BenchmarkId::new("encode", samples), &msg, |b, msg| {
            let mut buf = BytesMut::with_capacity(64 * 1024);
            b.iter(|| {
                buf.clear();
                codec.encode(black_box(msg), &mut buf).unwrap();
            })
        });
        let mut encoded = BytesMut::new();
        codec.encode(&msg, &mut encoded).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", samples), &encoded, |b, encoded| {
            b.iter(|| {
                let mut src = encoded.clone();
                black_box(codec.decode::<ServerMessage>(&mut src).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_scope(c: &mut Criterion) {
    let codec = FrameCodec::default();
    let msg = scope_event(16384, 1024);
    let mut encoded = BytesMut::new();
    codec.encode(&msg, &mut encoded).unwrap();
    c.bench_function("codec_scope_decode_16k", |b| {
        b.iter(|| {
            let mut src = encoded.clone();
            black_box(codec.decode::<ServerMessage>(&mut src).unwrap())
        })
    });
}

criterion_group!(benches, bench_demod, bench_scope);
criterion_main!(benches);
