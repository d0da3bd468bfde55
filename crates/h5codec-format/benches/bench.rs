use criterion::{black_box, criterion_group, criterion_main, Criterion};
use h5codec_format::data_read::read_as_f64;
use h5codec_format::filters::{FILTER_DEFLATE, FILTER_SHUFFLE};
use h5codec_format::{
    Address, BTreeV1ChunkIndex, BTreeV2ChunkIndex, BTreeV2ChunkIndexBuilder, ChunkGeometry,
    ChunkIndex, ChunkIndexCreateProps, ChunkRecord, CompoundTypeBuilder, Datatype, FileContext,
    FilterCreateProps, FilterDescription, FilterPipeline, FilterRegistry,
};

const CHUNKS: u64 = 10_000;

fn geometry() -> ChunkGeometry {
    ChunkGeometry::new(vec![64, 64], 8).unwrap()
}

fn make_records() -> Vec<ChunkRecord> {
    let g = geometry();
    (0..CHUNKS)
        .map(|i| ChunkRecord {
            key: g.key_from_scaled(&[i / 100, i % 100]).unwrap(),
            address: Address(0x10_0000 + i * 0x8000),
            size: 0x4000 + i % 0x1000,
            filter_mask: 0,
        })
        .collect()
}

fn build_index(records: &[ChunkRecord]) -> (Vec<u8>, Address) {
    let mut builder = BTreeV2ChunkIndexBuilder::new(&FileContext::default(), geometry())
        .with_props(ChunkIndexCreateProps::new().node_size(4096))
        .filtered(true);
    builder.extend(records.iter().cloned()).unwrap();
    let built = builder.build(Address(0)).unwrap();
    (built.bytes, built.header_address)
}

/// One v1 leaf holding `n` chunk entries of a 1-D dataset.
fn build_v1_leaf(n: u64) -> Vec<u8> {
    let mut buf = b"TREE".to_vec();
    buf.extend_from_slice(&[1, 0]);
    buf.extend_from_slice(&(n as u16).to_le_bytes());
    buf.extend_from_slice(&[0xff; 16]);
    for i in 0..=n {
        buf.extend_from_slice(&4096u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(i * 512).to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        if i < n {
            buf.extend_from_slice(&(0x10_000 + i * 4096).to_le_bytes());
        }
    }
    buf
}

// ===========================================================================
// Chunk index benchmarks
// ===========================================================================

fn bench_btree_v2_build(c: &mut Criterion) {
    let records = make_records();
    c.bench_function("btree_v2_build_10k_chunks", |b| {
        b.iter(|| build_index(black_box(&records)))
    });
}

fn bench_btree_v2_lookup(c: &mut Criterion) {
    let records = make_records();
    let (file, header) = build_index(&records);
    c.bench_function("btree_v2_lookup_10k_chunks", |b| {
        b.iter(|| {
            let mut index =
                BTreeV2ChunkIndex::open(&file, header, FileContext::default(), geometry()).unwrap();
            for rec in records.iter().step_by(7) {
                black_box(index.lookup(&rec.key).unwrap());
            }
        })
    });
}

fn bench_btree_v1_scan(c: &mut Criterion) {
    let file = build_v1_leaf(500);
    c.bench_function("btree_v1_records_500", |b| {
        b.iter(|| {
            let mut index = BTreeV1ChunkIndex::new(&file, Address(0), FileContext::default(), 1);
            black_box(index.records().unwrap())
        })
    });
}

// ===========================================================================
// Datatype and element benchmarks
// ===========================================================================

fn bench_datatype_parse(c: &mut Criterion) {
    let compound = CompoundTypeBuilder::new()
        .f64_field("x")
        .f64_field("y")
        .f64_field("z")
        .i32_field("id")
        .field("tag", Datatype::fixed_string(16))
        .build();
    let bytes = compound.serialize().unwrap();
    c.bench_function("datatype_parse_compound", |b| {
        b.iter(|| Datatype::parse(black_box(&bytes)).unwrap())
    });
}

fn bench_read_as_f64(c: &mut Criterion) {
    let raw: Vec<u8> = (0..1_000_000).flat_map(|i| (i as f64).to_le_bytes()).collect();
    let dt = Datatype::f64_le();
    c.bench_function("read_as_f64_1M", |b| {
        b.iter(|| read_as_f64(black_box(&raw), &dt).unwrap())
    });
}

// ===========================================================================
// Pipeline benchmarks
// ===========================================================================

fn bench_pipeline_reverse(c: &mut Criterion) {
    let registry = FilterRegistry::new();
    let data: Vec<u8> = (0..128 * 1024)
        .flat_map(|i| ((i as f64) * 0.001).sin().to_le_bytes())
        .collect();
    let compressed = h5codec_filters::deflate_compress(
        &h5codec_filters::shuffle::shuffle(&data, 8),
        6,
    )
    .unwrap();
    let pipeline = FilterPipeline::new(vec![
        FilterDescription::new(FILTER_SHUFFLE, vec![8]),
        FilterDescription::new(FILTER_DEFLATE, vec![6]),
    ]);
    c.bench_function("pipeline_unshuffle_inflate_1MB", |b| {
        b.iter(|| {
            pipeline
                .apply_reverse(&registry, black_box(&compressed), 0, 8)
                .unwrap()
        })
    });
}

fn bench_pipeline_forward(c: &mut Criterion) {
    let registry = FilterRegistry::new();
    let geometry = ChunkGeometry::new(vec![128 * 1024], 8).unwrap();
    let data: Vec<u8> = (0..128 * 1024)
        .flat_map(|i| ((i as f64) * 0.001).sin().to_le_bytes())
        .collect();
    let pipeline = FilterCreateProps::new()
        .shuffle()
        .lzf()
        .fletcher32()
        .build_pipeline(&geometry)
        .unwrap();
    c.bench_function("pipeline_shuffle_lzf_fletcher32_1MB", |b| {
        b.iter(|| pipeline.apply_forward(&registry, black_box(&data), 8).unwrap())
    });
}

criterion_group!(
    benches,
    bench_btree_v2_build,
    bench_btree_v2_lookup,
    bench_btree_v1_scan,
    bench_datatype_parse,
    bench_read_as_f64,
    bench_pipeline_reverse,
    bench_pipeline_forward,
);
criterion_main!(benches);
