use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scan_format::{DirEntry, Doc, DocKey, DOC_MAGIC};

fn bench_dir_entry_decode(c: &mut Criterion) {
    // One segment's worth of directory bytes (16384 buckets x 4 entries)
    let entry = DirEntry {
        length: 8192,
        offset: 0x10_0000,
        tag: 0x5A5,
        head: true,
        next: 3,
        ..Default::default()
    }
    .encode();
    let region: Vec<u8> = entry.iter().copied().cycle().take(16384 * 4 * 10).collect();

    c.bench_function("dir_entry_decode_segment", |b| {
        b.iter(|| {
            region
                .chunks_exact(10)
                .filter(|raw| DirEntry::decode(black_box(raw)).unwrap().is_head())
                .count()
        })
    });
}

fn bench_doc_decode(c: &mut Criterion) {
    let raw = Doc {
        magic: DOC_MAGIC,
        length: 4096,
        total_length: 1 << 20,
        keys: DocKey([1, 2, 3, 4]),
        hlen: 512,
        ..Default::default()
    }
    .encode();

    c.bench_function("doc_decode", |b| {
        b.iter(|| Doc::decode(black_box(&raw)).unwrap())
    });
}

criterion_group!(benches, bench_dir_entry_decode, bench_doc_decode);
criterion_main!(benches);
