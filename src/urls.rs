//! URL sanitizing for scrape targets.
//!
//! Scraped pages routinely emit malformed links: doubly-encoded query
//! strings, literal ampersands inside parameter values, missing slashes.
//! A single bad link must not abort a multi-page run, so every operation
//! here degrades to a best-effort string instead of returning an error.

use log::{debug, warn};
use std::fmt;
use url::{form_urlencoded, Url};

/// A URL that went through a fails-open sanitizing operation.
///
/// `used_fallback()` records whether the degraded path was taken, so
/// callers (and tests) can tell a normalized URL from a best-effort one
/// without inspecting logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    value: String,
    fallback: bool,
}

impl Sanitized {
    fn clean(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            fallback: false,
        }
    }

    fn degraded(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            fallback: true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }

    /// True when normalization failed and the value is a best-effort
    /// string (the original input or a naive recombination).
    pub fn used_fallback(&self) -> bool {
        self.fallback
    }
}

impl fmt::Display for Sanitized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for Sanitized {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl PartialEq<&str> for Sanitized {
    fn eq(&self, other: &&str) -> bool {
        self.value == *other
    }
}

/// Parse a URL, re-encode its query defensively, and rebuild it.
///
/// Parameter values that decode to something containing both `&` and `=`
/// look like an accidentally nested query string; they are kept as
/// literal values and re-encoded, not split further. On any parse failure
/// the original string comes back unchanged.
pub fn parse(raw: &str) -> Sanitized {
    let mut url = match Url::parse(raw) {
        Ok(u) => u,
        Err(e) => {
            warn!("could not parse url {raw}: {e}; returning it unchanged");
            return Sanitized::degraded(raw);
        }
    };

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if !pairs.is_empty() {
        for (name, value) in &pairs {
            if value.contains('&') && value.contains('=') {
                debug!("possible nested query string in parameter {name}: {value}");
            }
        }
        let rebuilt = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();
        url.set_query(Some(&rebuilt));
    }

    Sanitized::clean(url.to_string())
}

/// Set `name` to a single `value` in the URL's query, replacing any
/// existing occurrences. Falls back to naive `?`/`&` concatenation when
/// the URL does not parse.
pub fn append_query_param(raw: &str, name: &str, value: &str) -> Sanitized {
    match Url::parse(raw) {
        Ok(mut url) => {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .filter(|(k, _)| k != name)
                .collect();
            pairs.push((name.to_string(), value.to_string()));

            let rebuilt = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            url.set_query(Some(&rebuilt));
            Sanitized::clean(url.to_string())
        }
        Err(e) => {
            warn!("could not parse url {raw} to set {name}: {e}; appending naively");
            let sep = if raw.contains('?') { '&' } else { '?' };
            let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
            Sanitized::degraded(format!("{raw}{sep}{name}={encoded}"))
        }
    }
}

/// `scheme://host[:port]` of a URL, or the input unchanged when it has no
/// parseable scheme and host.
pub fn base_url(raw: &str) -> Sanitized {
    match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => {
                let mut out = format!("{}://{}", url.scheme(), host);
                if let Some(port) = url.port() {
                    out.push(':');
                    out.push_str(&port.to_string());
                }
                Sanitized::clean(out)
            }
            None => {
                warn!("url {raw} has no host; returning it unchanged");
                Sanitized::degraded(raw)
            }
        },
        Err(e) => {
            warn!("could not parse url {raw} for base: {e}; returning it unchanged");
            Sanitized::degraded(raw)
        }
    }
}

/// Host of a URL, lowercased, IDNA-canonicalized, `www.` stripped.
///
/// When full parsing fails the host is carved out by splitting on `//`
/// and `/`, which is enough for the scheme-less strings link extractors
/// tend to produce.
pub fn domain(raw: &str) -> Sanitized {
    if let Some(host) = Url::parse(raw).ok().and_then(|u| u.host_str().map(canonical_host)) {
        return Sanitized::clean(host);
    }
    warn!("could not parse url {raw} for domain; splitting by hand");
    let tail = raw.split("//").last().unwrap_or(raw);
    let host = tail.split('/').next().unwrap_or(tail);
    Sanitized::degraded(canonical_host(host))
}

fn canonical_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    let ascii = idna::domain_to_ascii(&lower).unwrap_or(lower);
    match ascii.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => ascii,
    }
}

/// Resolve `relative` against `base`. Already-absolute references come
/// back unchanged; when resolution fails the two strings are joined by
/// hand with the missing `/` inserted.
pub fn join(base: &str, relative: &str) -> Sanitized {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        return Sanitized::clean(relative);
    }
    match Url::parse(base).and_then(|b| b.join(relative)) {
        Ok(joined) => Sanitized::clean(joined.to_string()),
        Err(e) => {
            warn!("could not resolve {relative} against {base}: {e}; joining by hand");
            let out = match (base.ends_with('/'), relative.starts_with('/')) {
                (true, true) => format!("{base}{}", &relative[1..]),
                (false, false) => format!("{base}/{relative}"),
                _ => format!("{base}{relative}"),
            };
            Sanitized::degraded(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_idempotent_for_well_formed_urls() {
        let urls = [
            "https://example.com/path?a=1&b=2",
            "https://example.com/search?q=hello+world&page=3",
            "http://example.com/",
            "https://example.com/x?key=%C3%A9",
        ];
        for u in urls {
            let once = parse(u);
            let twice = parse(once.as_str());
            assert_eq!(once, twice, "parse not idempotent for {u}");
            assert!(!once.used_fallback());
        }
    }

    #[test]
    fn parse_keeps_nested_query_values_literal() {
        // %26 decodes to '&' inside the value; the value must stay a
        // single parameter instead of being split again.
        let out = parse("https://example.com/?next=page%3D2%26sort%3Ddesc");
        assert!(!out.used_fallback());
        let reparsed = Url::parse(out.as_str()).unwrap();
        let pairs: Vec<(String, String)> = reparsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs, vec![("next".to_string(), "page=2&sort=desc".to_string())]);
    }

    #[test]
    fn parse_fails_open_on_garbage() {
        let out = parse("not a url");
        assert_eq!(out, "not a url");
        assert!(out.used_fallback());
    }

    #[test]
    fn parse_preserves_repeated_keys() {
        let out = parse("https://example.com/?tag=a&tag=b");
        let reparsed = Url::parse(out.as_str()).unwrap();
        let values: Vec<String> = reparsed
            .query_pairs()
            .filter(|(k, _)| k == "tag")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn append_overwrites_existing_parameter() {
        let out = append_query_param("https://example.com/?page=1&q=x", "page", "2");
        assert!(!out.used_fallback());
        let reparsed = Url::parse(out.as_str()).unwrap();
        let pages: Vec<String> = reparsed
            .query_pairs()
            .filter(|(k, _)| k == "page")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(pages, vec!["2"]);
    }

    #[test]
    fn append_adds_first_parameter() {
        let out = append_query_param("https://example.com/list", "page", "2");
        assert_eq!(out, "https://example.com/list?page=2");
    }

    #[test]
    fn append_falls_back_to_concatenation() {
        let out = append_query_param("nonsense", "page", "2");
        assert!(out.used_fallback());
        assert_eq!(out, "nonsense?page=2");

        let out = append_query_param("nonsense?a=1", "page", "a b");
        assert!(out.used_fallback());
        assert_eq!(out, "nonsense?a=1&page=a+b");
    }

    #[test]
    fn base_url_keeps_scheme_host_and_port() {
        assert_eq!(base_url("https://example.com/x/y?z=1"), "https://example.com");
        assert_eq!(base_url("http://example.com:8080/x"), "http://example.com:8080");
    }

    #[test]
    fn domain_strips_www_and_lowercases() {
        assert_eq!(domain("https://www.example.com/x"), "example.com");
        assert_eq!(domain("https://EXAMPLE.com"), "example.com");
    }

    #[test]
    fn domain_never_panics_on_garbage() {
        let out = domain("not a url");
        assert!(out.used_fallback());
        assert!(!out.as_str().is_empty());

        let out = domain("example.com/path");
        assert!(out.used_fallback());
        assert_eq!(out, "example.com");
    }

    #[test]
    fn join_resolves_relative_references() {
        assert_eq!(join("https://a.com/x/", "y"), "https://a.com/x/y");
        assert_eq!(join("https://a.com/x/", "/y"), "https://a.com/y");
    }

    #[test]
    fn join_returns_absolute_references_unchanged() {
        assert_eq!(join("https://a.com", "https://b.com/z"), "https://b.com/z");
    }

    #[test]
    fn join_falls_back_to_manual_concatenation() {
        let out = join("nonsense", "path");
        assert!(out.used_fallback());
        assert_eq!(out, "nonsense/path");
    }
}
