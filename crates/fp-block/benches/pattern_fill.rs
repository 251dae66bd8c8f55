#![forbid(unsafe_code)]

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use fp_block::{BlockPattern, BlockWriter, IO_CHUNK_SIZE, MemBlockStore};
use fp_types::BlockIndex;

const BLOCK: u64 = 16 * 1024 * 1024;

fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern");
    group.throughput(Throughput::Bytes(BLOCK));

    group.bench_function("fill_16mib_in_1mib_chunks", |b| {
        let pattern = BlockPattern::new(BlockIndex(17), BLOCK);
        let mut chunk = vec![0_u8; IO_CHUNK_SIZE];
        b.iter(|| {
            let mut offset = 0_u64;
            while offset < BLOCK {
                let n = pattern.fill_at(offset, &mut chunk);
                black_box(&chunk[..n]);
                offset += n as u64;
            }
        });
    });

    group.bench_function("digest_16mib", |b| {
        let pattern = BlockPattern::new(BlockIndex(17), BLOCK);
        b.iter(|| black_box(pattern.digest(IO_CHUNK_SIZE)));
    });

    group.bench_function("write_16mib_to_memory", |b| {
        let store = MemBlockStore::new();
        let writer = BlockWriter::new(&store);
        let pattern = BlockPattern::new(BlockIndex(0), BLOCK);
        b.iter(|| black_box(writer.write(BlockIndex(0), &pattern).is_success()));
    });

    group.finish();
}

criterion_group!(benches, bench_fill);
criterion_main!(benches);
