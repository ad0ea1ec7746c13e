//! Fuzz target for the `[statement_cache]` TOML loader.
//!
//! Parsing arbitrary documents must never panic, and any settings that load
//! must either validate or be rejected with an error.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_cache_settings
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlstash_core::CacheSettings;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(settings) = CacheSettings::from_toml(input) {
            let _ = settings.into_config();
        }
    }
});
