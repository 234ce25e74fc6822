//! Performance benchmarks for the wsengine frame codec and handshake.
//!
//! Run with: `cargo bench`

use bytes::{Bytes, BytesMut};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsengine::codec::FrameEncoder;
use wsengine::connection::MessageFragmenter;
use wsengine::protocol::assembler::{MessageAssembler, MessageCollector};
use wsengine::protocol::handshake::{HandshakeRequest, HandshakeResponse, compute_accept_key};
use wsengine::protocol::{Frame, OpCode, apply_mask};
use wsengine::{ContentType, Role};

const MAX: usize = 16 * 1024 * 1024;
const SIZES: [(&str, usize); 3] = [("10b", 10), ("1kb", 1024), ("64kb", 64 * 1024)];

// =============================================================================
// Frame encoding / decoding
// =============================================================================

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for (name, size) in SIZES {
        let frame = Frame::new(true, OpCode::Binary, vec![0xAB; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{name}_acceptor"), |b| {
            let mut encoder = FrameEncoder::new(Role::Acceptor);
            b.iter(|| encoder.encode(black_box(&frame)))
        });
        group.bench_function(format!("{name}_initiator"), |b| {
            let mut encoder = FrameEncoder::new(Role::Initiator);
            b.iter(|| encoder.encode(black_box(&frame)))
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for (name, size) in SIZES {
        let frame = Frame::new(true, OpCode::Binary, vec![0xAB; size]);
        let unmasked = frame.to_bytes(None);
        let masked = frame.to_bytes(Some([0x37, 0xfa, 0x21, 0x3d]));
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{name}_unmasked"), |b| {
            b.iter(|| Frame::decode(black_box(&unmasked), Role::Initiator, MAX))
        });
        group.bench_function(format!("{name}_masked"), |b| {
            b.iter(|| Frame::decode(black_box(&masked), Role::Acceptor, MAX))
        });
    }

    group.finish();
}

// =============================================================================
// Masking
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for (name, size) in SIZES {
        let mut data = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| b.iter(|| apply_mask(black_box(&mut data), mask)));
    }

    group.finish();
}

// =============================================================================
// Handshake
// =============================================================================

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");

    group.bench_function("accept_key", |b| {
        b.iter(|| compute_accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")))
    });

    let request = HandshakeRequest::new("example.com", "/chat", &["chat.v2", "chat.v1"], &[])
        .unwrap();
    let mut raw = Vec::new();
    request.write(&mut raw);

    group.bench_function("parse_request", |b| {
        b.iter(|| HandshakeRequest::parse(black_box(&raw)))
    });
    group.bench_function("accept_request", |b| {
        b.iter(|| {
            let response = HandshakeResponse::accept(black_box(&request), &["chat.v1"]);
            let mut out = Vec::with_capacity(256);
            response.write(&mut out).map(|()| out)
        })
    });

    group.finish();
}

// =============================================================================
// Message chunking and reassembly
// =============================================================================

fn bench_message_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_path");
    let payload = Bytes::from(vec![0x42u8; 256 * 1024]);
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("fragment_encode_decode_reassemble_256kb", |b| {
        let mut encoder = FrameEncoder::new(Role::Initiator);
        b.iter(|| {
            let mut wire = BytesMut::new();
            for frame in MessageFragmenter::new(payload.clone(), ContentType::Binary, 16 * 1024) {
                wire.extend_from_slice(&encoder.encode(&frame));
            }

            let mut assembler = MessageAssembler::new(MAX);
            let mut offset = 0;
            while offset < wire.len() {
                let Ok((frame, used)) = Frame::decode(&wire[offset..], Role::Acceptor, MAX) else {
                    break;
                };
                offset += used;
                let _ = assembler.push(frame);
            }
            MessageCollector::new(payload.len()).poll(&mut assembler)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_masking,
    bench_handshake,
    bench_message_path
);
criterion_main!(benches);
