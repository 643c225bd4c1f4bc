//! URL canonicalization per `SPEC_FULL.md` §6.
//!
//! Lowercase scheme and host, drop default ports, remove the fragment,
//! strip known tracking query parameters, sort remaining query keys, and
//! strip a trailing slash except on the root path. Idempotent by
//! construction: every step only removes or normalizes information, so a
//! second pass observes a fixed point (tested directly below).

use url::Url;

/// Query parameter names (or prefixes, for `utm_*`) stripped unconditionally
/// because they encode campaign/tracking provenance rather than resource
/// identity.
const TRACKING_PARAM_PREFIXES: &[&str] = &["utm_"];
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "ref", "ref_src", "igshid", "mc_cid", "mc_eid", "msclkid", "yclid",
    "_hsenc", "_hsmi", "mkt_tok", "spm",
];

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&lower.as_str())
        || TRACKING_PARAM_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Canonicalize one URL string. Returns `None` if the input does not parse
/// as an absolute URL; callers treat that as "no canonical URL" rather than
/// a pipeline-fatal error.
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let scheme = url.scheme().to_ascii_lowercase();
    url.set_scheme(&scheme).ok()?;

    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            let _ = url.set_host(Some(&lower));
        }
    }

    if let Some(port) = url.port() {
        if is_default_port(url.scheme(), port) {
            let _ = url.set_port(None);
        }
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut sorted = kept;
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &sorted {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_params_and_sorts_remaining() {
        let out = canonicalize("https://Example.com/a/?utm_source=x&b=2&a=1&fbclid=zzz").unwrap();
        assert_eq!(out, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn drops_default_port_and_fragment() {
        let out = canonicalize("https://example.com:443/path#section").unwrap();
        assert_eq!(out, "https://example.com/path");
    }

    #[test]
    fn keeps_non_default_port() {
        let out = canonicalize("https://example.com:8443/path").unwrap();
        assert_eq!(out, "https://example.com:8443/path");
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        assert_eq!(canonicalize("https://example.com/a/").unwrap(), "https://example.com/a");
        assert_eq!(canonicalize("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn is_idempotent() {
        let once = canonicalize("HTTPS://Example.COM:443/Path/?utm_campaign=x&z=1&a=2#frag").unwrap();
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_unparseable_input() {
        assert!(canonicalize("not a url").is_none());
    }
}
