#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((dt, used)) = h5codec_format::Datatype::parse(data) {
        assert!(used <= data.len());
        // anything that decodes must re-encode
        let _ = dt.serialize();
    }
});
