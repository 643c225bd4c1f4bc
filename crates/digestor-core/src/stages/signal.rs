//! Signal Corroboration (§4.13) — optional feature flag. Defaults off per
//! `SPEC_FULL.md` §9(b).

use std::collections::HashSet;

use crate::model::ContentItem;
use crate::storage::hash_url;
use crate::url_canon::canonicalize;

use super::candidates::CandidateRow;

fn is_x_like(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("twitter.com") || lower.contains("x.com")
}

/// Every external URL a signal bundle cites as corroboration fodder, read
/// from its `raw.externalUrls` array (§4.13, glossary: "a bundle ... carries
/// a set of external URLs as corroboration fodder").
fn bundle_external_urls(bundle: &ContentItem) -> Vec<String> {
    bundle
        .raw
        .get("externalUrls")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Build the set of SHA-256 hashes of canonicalized, non-X-like external
/// URLs cited by the signal bundles in the window.
pub fn build_signal_hash_set(signal_bundles: &[ContentItem]) -> HashSet<String> {
    signal_bundles
        .iter()
        .flat_map(bundle_external_urls)
        .filter(|url| !is_x_like(url))
        .filter_map(|url| canonicalize(&url))
        .map(|canonical| hash_url(&canonical))
        .collect()
}

/// Mark each candidate's `signal_matched` field: `true` iff its primary URL
/// canonicalizes to a hash in `hashes` and is not itself an X-like URL.
pub fn apply_signal_corroboration(candidates: &mut [CandidateRow], hashes: &HashSet<String>) {
    for candidate in candidates.iter_mut() {
        let matched = candidate
            .primary_url
            .as_deref()
            .filter(|url| !is_x_like(url))
            .and_then(canonicalize)
            .map(|canonical| hashes.contains(&hash_url(&canonical)))
            .unwrap_or(false);
        candidate.signal_matched = Some(matched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JsonMap;
    use crate::stages::candidates::CandidateRef;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn bundle(urls: &[&str]) -> ContentItem {
        let mut raw = JsonMap::new();
        raw.insert("externalUrls".to_string(), json!(urls));
        ContentItem {
            id: "bundle-1".into(),
            user_id: "u1".into(),
            source_id: "s1".into(),
            source_type: "signal".into(),
            external_id: None,
            canonical_url: None,
            title: None,
            body_text: None,
            author: None,
            published_at: None,
            fetched_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            metadata: JsonMap::new(),
            raw,
            hash_url: None,
            hash_text: None,
            duplicate_of_content_item_id: None,
            deleted_at: None,
        }
    }

    fn candidate(url: Option<&str>) -> CandidateRow {
        CandidateRow {
            candidate_ref: CandidateRef::Item { content_item_id: "a".into() },
            source_type: "rss".into(),
            source_id: "s1".into(),
            candidate_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            vector: vec![1.0, 0.0],
            title: None,
            body_text: None,
            primary_url: url.map(str::to_string),
            author: None,
            member_sources: None,
            recency01: 0.5,
            engagement01: 0.5,
            heuristic_score: 0.5,
            positive_sim: None,
            negative_sim: None,
            novelty01: None,
            signal_matched: None,
            source_weight: None,
            triage: None,
        }
    }

    #[test]
    fn matches_url_cited_by_signal_bundle() {
        let bundles = vec![bundle(&["https://example.com/story"])];
        let hashes = build_signal_hash_set(&bundles);
        let mut candidates = vec![candidate(Some("https://example.com/story"))];
        apply_signal_corroboration(&mut candidates, &hashes);
        assert_eq!(candidates[0].signal_matched, Some(true));
    }

    #[test]
    fn does_not_match_x_like_urls() {
        let bundles = vec![bundle(&["https://twitter.com/foo/status/1"])];
        let hashes = build_signal_hash_set(&bundles);
        assert!(hashes.is_empty());
    }

    #[test]
    fn unrelated_url_does_not_match() {
        let bundles = vec![bundle(&["https://example.com/story"])];
        let hashes = build_signal_hash_set(&bundles);
        let mut candidates = vec![candidate(Some("https://other.com/page"))];
        apply_signal_corroboration(&mut candidates, &hashes);
        assert_eq!(candidates[0].signal_matched, Some(false));
    }
}
