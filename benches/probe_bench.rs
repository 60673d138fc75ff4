use criterion::{black_box, criterion_group, criterion_main, Criterion};
use arcprobe::descriptor::Probe;
use arcprobe::formats::builtin_registry;
use arcprobe::sizing::gap_lengths;

/// Quake PAK with `count` 1 KiB members.
fn sample_pak(count: usize) -> Vec<u8> {
    let mut out = b"PACK".to_vec();
    out.extend([0u8; 8]);
    let mut dir = Vec::new();
    for i in 0..count {
        let mut slot = [0u8; 56];
        let name = format!("maps/m{i}.bsp");
        slot[..name.len()].copy_from_slice(name.as_bytes());
        dir.extend(slot);
        dir.extend((out.len() as u32).to_le_bytes());
        dir.extend(1024u32.to_le_bytes());
        out.extend(std::iter::repeat(i as u8).take(1024));
    }
    let dir_offset = out.len() as u32;
    out[4..8].copy_from_slice(&dir_offset.to_le_bytes());
    out[8..12].copy_from_slice(&(dir.len() as u32).to_le_bytes());
    out.extend(dir);
    out
}

fn bench_rank(c: &mut Criterion) {
    let registry = builtin_registry();
    let data = sample_pak(64);

    c.bench_function("rank_builtin_pak", |b| {
        b.iter(|| {
            let mut probe = Probe::from_bytes("pak0.pak", black_box(data.clone())).unwrap();
            registry.rank(&mut probe)
        })
    });
}

fn bench_gap_lengths(c: &mut Criterion) {
    // Scattered offsets, as in a directory not written in payload order.
    let offsets: Vec<u64> = (0..10_000u64).map(|i| (i * 7919) % 10_000 * 512).collect();
    let size = 10_000 * 512;

    c.bench_function("gap_lengths_10k", |b| b.iter(|| gap_lengths(black_box(&offsets), size)));
}

criterion_group!(benches, bench_rank, bench_gap_lengths);
criterion_main!(benches);
