#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Algorithm specification strings arrive from user configuration, so
    // the parser must reject arbitrary input without panicking
    if let Ok(spec) = std::str::from_utf8(data) {
        let _ = heliotrack::config::Algorithm::parse(spec);
    }
});
