#![no_main]

use blockship_semver::{IncrementType, compare_definitions};
use blockship_types::AssetDefinition;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Some((new, old)) = s.split_once('\n') else {
        return;
    };
    let (Ok(new), Ok(old)) = (
        serde_json::from_str::<AssetDefinition>(new),
        serde_json::from_str::<AssetDefinition>(old),
    ) else {
        return;
    };
    // Comparing a definition with itself never requires a bump.
    if let Ok(same) = compare_definitions(&new, &new) {
        assert_eq!(same, IncrementType::None);
    }
    let _ = compare_definitions(&new, &old);
});
