#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pipeline) = h5codec_format::FilterPipeline::parse(data) {
        let _ = pipeline.serialize();
    }
});
