//! Fuzz testing for the query sanitizer.
//!
//! Checks, for arbitrary input:
//!
//! - `sanitize_value` and `sanitize_query` never panic
//! - no sanitized value contains `<` or `>`
//! - a sanitized query decodes to values that are already clean, and the
//!   set of keys survives
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_sanitize -- -max_total_time=60
//! ```

#![no_main]

use std::collections::BTreeSet;

use bookshelf_api::middleware::{sanitize_query, sanitize_value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let value = sanitize_value(input);
    assert!(!value.contains('<') && !value.contains('>'));

    let query = sanitize_query(input);
    let mut keys_after = BTreeSet::new();
    for (key, value) in form_urlencoded_pairs(&query) {
        assert!(!value.contains('<') && !value.contains('>'));
        keys_after.insert(key);
    }

    let keys_before: BTreeSet<String> = form_urlencoded_pairs(input)
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(keys_before, keys_after);
});

fn form_urlencoded_pairs(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
