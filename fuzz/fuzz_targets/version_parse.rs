#![no_main]

use blockship_semver::{IncrementType, calculate_increment_type, increment_version_by, parse_version};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if parse_version(s).is_err() {
            return;
        }
        for increment in [IncrementType::Patch, IncrementType::Minor, IncrementType::Major] {
            match increment_version_by(s, increment) {
                Ok(next) => assert_eq!(calculate_increment_type(s, &next).ok(), Some(increment)),
                Err(e) => assert!(format!("{e:#}").contains("overflow")),
            }
        }
    }
});
