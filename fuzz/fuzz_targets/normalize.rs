//! Fuzz target for SQL normalization.
//!
//! Normalizing must never panic, must be idempotent and must never grow the
//! input. Equal normalized texts must hash to equal keys.
//!
//! Run with:
//! ```bash
//! cargo +nightly fuzz run fuzz_normalize
//! ```

#![no_main]

use libfuzzer_sys::fuzz_target;
use sqlstash_core::{Fnv1aHasher, KeyHasher, Namespace, normalize};

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        let once = normalize(sql);
        let twice = normalize(&once);
        assert_eq!(once, twice, "normalize is not idempotent for {:?}", sql);
        assert!(once.len() <= sql.len());
        assert_eq!(once.trim(), once);

        let hasher = Fnv1aHasher;
        assert_eq!(
            hasher.hash(&once, Namespace::Query),
            hasher.hash(&twice, Namespace::Query)
        );
    }
});
