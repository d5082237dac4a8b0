//! Fetch the latest release of a config repo and extract its digest from the
//! release notes.

use std::str::FromStr;

use cove_enclave::ReleaseDigest;
use serde::Deserialize;

/// The relevant subset of the release index's JSON response.
#[derive(Debug, Deserialize)]
pub(crate) struct Release {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tag_name: String,
}

/// Extract a release digest from free-form release notes.
///
/// Two literal patterns are accepted, keyed case-insensitively, in order of
/// preference:
///
/// 1. `EIF hash: <64-hex>`
/// 2. ``Digest: `<64-hex>` ``
///
/// The first occurrence of the preferred pattern that is followed by a valid
/// 64-char hex string wins.
pub(crate) fn extract_digest(body: &str) -> Option<ReleaseDigest> {
    find_digest_after_key(body, "eif hash:")
        .or_else(|| find_digest_after_key(body, "digest:"))
}

fn find_digest_after_key(body: &str, key: &str) -> Option<ReleaseDigest> {
    let haystack = body.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(found) = haystack[search_from..].find(key) {
        let value_start = search_from + found + key.len();
        if let Some(digest) = read_digest(&haystack[value_start..]) {
            return Some(digest);
        }
        search_from = value_start;
    }

    None
}

/// Read a 64-char hex digest from the start of `s`, skipping leading spaces
/// and an optional opening backtick.
fn read_digest(s: &str) -> Option<ReleaseDigest> {
    let s = s.trim_start_matches(' ');
    let s = s.strip_prefix('`').unwrap_or(s);
    let candidate = s.get(..64)?;
    ReleaseDigest::from_str(candidate).ok()
}
