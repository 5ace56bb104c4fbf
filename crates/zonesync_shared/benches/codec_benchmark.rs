//! # Codec Benchmark
//!
//! Measures encode/decode cost for the three message shapes. The server
//! fans every entity out to every zone resident, so entity-info encoding
//! sits on the hot path of a zone load.
//!
//! Run with: `cargo bench --package zonesync_shared`

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use zonesync_shared::{
    decode_entity_info, decode_mini, encode_entity_info, encode_mini, EntityInfo, Message,
    MessageType,
};

fn bench_mini(c: &mut Criterion) {
    let bytes = encode_mini(MessageType::CreateEntityAcknowledge, 1234);

    c.bench_function("mini_encode", |b| {
        b.iter(|| black_box(encode_mini(MessageType::CreateEntityAcknowledge, black_box(1234))));
    });
    c.bench_function("mini_decode", |b| {
        b.iter(|| black_box(decode_mini(black_box(&bytes))));
    });
}

fn bench_entity_info(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_info");

    for payload_len in [0usize, 64, 1024] {
        let info = EntityInfo::new(3, 1)
            .with_name("crate_of_apples")
            .with_parent_path("Props/Market")
            .with_owner(7)
            .with_payload(vec![0xAB; payload_len]);
        let bytes = encode_entity_info(&info).unwrap_or_default();

        group.bench_with_input(BenchmarkId::new("encode", payload_len), &info, |b, info| {
            b.iter(|| black_box(encode_entity_info(info)));
        });
        group.bench_with_input(BenchmarkId::new("decode", payload_len), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_entity_info(bytes)));
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let frames: Vec<Vec<u8>> = [
        Message::AssignPlayerId(1),
        Message::LoadZoneAcknowledge(2),
        Message::PlayerEnteredZone {
            zone_id: 2,
            player_id: 9,
        },
        Message::CreateEntityRequest(EntityInfo::new(1, 2).with_name("door")),
    ]
    .iter()
    .filter_map(|message| message.encode().ok())
    .collect();

    c.bench_function("message_decode_mixed", |b| {
        b.iter(|| {
            for frame in &frames {
                let _ = black_box(Message::decode(black_box(frame)));
            }
        });
    });
}

criterion_group!(benches, bench_mini, bench_entity_info, bench_dispatch);
criterion_main!(benches);
