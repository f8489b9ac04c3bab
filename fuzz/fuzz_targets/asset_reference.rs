#![no_main]

use blockship_types::AssetReference;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(reference) = s.parse::<AssetReference>() {
            // Display output parses back to the same reference.
            let again: AssetReference = reference.to_string().parse().expect("reparse");
            assert_eq!(reference, again);
        }
        let _ = AssetReference::parse_versioned(s);
    }
});
