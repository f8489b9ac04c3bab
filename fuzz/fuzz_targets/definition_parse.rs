#![no_main]

use blockship::definition::{parse_definitions, render_definitions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(definitions) = parse_definitions(s) {
            let _ = render_definitions(&definitions);
        }
    }
});
