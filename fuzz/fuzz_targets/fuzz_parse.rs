#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Any JSON document must be rejected or lowered without panicking.
        let _ = cellfuse_parser::parse(source);
    }
});
