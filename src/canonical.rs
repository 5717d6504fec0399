//! URL canonicalization
//!
//! Produces the identity key used for read records. Two URLs that differ
//! only in scheme/host case, default port, fragment, tracking parameters
//! or trailing slashes canonicalize to the same string.
//!
//! Whenever a query is present it is re-serialized in
//! `application/x-www-form-urlencoded` form: a bare key gains an `=` (`?flag`
//! becomes `?flag=`) and an encoded space becomes `+` (`%20` becomes `+`).
//! The rewritten form maps to itself, so canonical keys stay stable.
//!
//! Domain policy: the domain of a canonical URL is its host with a single
//! leading `www.` removed. Other subdomains stay distinct; no public
//! suffix list is consulted.

use crate::error::{Result, SyncError};
use url::Url;

/// Query keys dropped during canonicalization (besides any `utm_*` key)
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_ga",
    "ref_src",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn parse(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url =
        Url::parse(trimmed).map_err(|e| SyncError::MalformedUrl(format!("{trimmed}: {e}")))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SyncError::MalformedUrl(format!("{trimmed}: missing host")));
    }
    Ok(url)
}

/// Normalize a raw page URL into its canonical form
///
/// Fails with [`SyncError::MalformedUrl`] when the input does not parse or
/// has no host; such input must never become a record key.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = parse(raw)?;

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        url.set_path(&trimmed);
    }

    Ok(url.to_string())
}

/// Project the domain out of a canonical URL
pub fn domain_of(canonical: &str) -> Result<String> {
    let url = parse(canonical)?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    Ok(host.strip_prefix("www.").unwrap_or(&host).to_string())
}
