#![no_main]
use h5codec_format::{Address, BTreeV1ChunkIndex, ChunkIndex, ChunkKey, FileContext};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for &offset_size in &[4u8, 8] {
        let Ok(ctx) = FileContext::new(offset_size, 8) else {
            continue;
        };
        for rank in 1..=3 {
            let mut index = BTreeV1ChunkIndex::new(data, Address(0), ctx, rank);
            let _ = index.lookup(&ChunkKey::from_offsets(&vec![0; rank]));
            let mut index = BTreeV1ChunkIndex::new(data, Address(0), ctx, rank);
            let _ = index.records();
        }
    }
});
