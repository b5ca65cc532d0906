use criterion::{criterion_group, criterion_main, Criterion};
use pgnindex_core::{ForwardRecord, InvertedIndex};

fn forward_bytes(games: i64, positions: i64) -> Vec<u8> {
    let mut bytes = Vec::new();
    for g in 0..games {
        let record = ForwardRecord {
            game_id: format!("[{g}]bench.pgn"),
            positions: (0..positions).map(|p| (p * 7919 + g % 97) ^ 0x5bd1_e995).collect(),
        };
        bytes.extend(record.encode().expect("encodable"));
    }
    bytes
}

fn bench_invert(c: &mut Criterion) {
    let bytes = forward_bytes(2_000, 80);
    c.bench_function("invert_2000_games", |b| {
        b.iter(|| InvertedIndex::from_reader(bytes.as_slice()).expect("valid database"))
    });
}

criterion_group!(benches, bench_invert);
criterion_main!(benches);
