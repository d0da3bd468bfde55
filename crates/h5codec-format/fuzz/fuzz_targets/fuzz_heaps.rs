#![no_main]
use h5codec_format::global_heap::GlobalHeapCollection;
use h5codec_format::{Address, FileContext, FractalHeap, LocalHeap};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let ctx = FileContext::default();
    if let Ok(heap) = LocalHeap::parse(data, Address(0), &ctx) {
        let _ = heap.read_string(data, &ctx, 0);
    }
    let _ = GlobalHeapCollection::parse(data, Address(0), &ctx);
    if let Ok(mut heap) = FractalHeap::open(data, Address(0), &ctx) {
        let _ = heap.read_object(&[0, 0, 0, 0, 0, 0, 0, 1]);
    }
});
