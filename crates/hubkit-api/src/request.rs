// Request/response value types and `Link` header parsing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use url::Url;

/// A single GET request, optionally conditional.
///
/// When `etag` or `last_modified` is set the request carries
/// `If-None-Match` / `If-Modified-Since`, and a 304 answer comes back
/// as an unchanged [`ApiResponse`] instead of an error.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub url: Url,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ApiRequest {
    /// An unconditional request.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            etag: None,
            last_modified: None,
        }
    }

    /// A conditional request revalidating previously seen freshness tokens.
    pub fn conditional(
        url: Url,
        etag: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            url,
            etag,
            last_modified,
        }
    }
}

/// The settled outcome of a request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// False when the server answered 304 Not Modified. In that case
    /// `body` is `None` and the freshness tokens echo the request's.
    pub changed: bool,
    /// Parsed JSON body. `None` on 304 or an empty 2xx body.
    pub body: Option<serde_json::Value>,
    /// `ETag` of the representation, verbatim (weak prefix and quotes kept).
    pub etag: Option<String>,
    /// `Last-Modified` of the representation.
    pub last_modified: Option<DateTime<Utc>>,
    /// Pagination links from the `Link` header, keyed by `rel` value.
    pub links: HashMap<String, Url>,
}

/// Format a timestamp as an HTTP-date for `If-Modified-Since`.
pub(crate) fn http_date(when: DateTime<Utc>) -> String {
    when.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a `Link` header into `rel -> URL`.
///
/// The header is a comma-separated list of `<url>; rel="name"` entries.
/// Entries that don't follow that shape (or whose URL doesn't parse)
/// are skipped; `rel` values are matched case-sensitively downstream.
pub(crate) fn parse_links(header: &str) -> HashMap<String, Url> {
    let mut links = HashMap::new();
    for entry in header.split(',') {
        let mut parts = entry.split(';');
        let Some(target) = parts.next() else { continue };
        let target = target.trim();
        if !(target.starts_with('<') && target.ends_with('>')) {
            continue;
        }
        let Ok(url) = Url::parse(&target[1..target.len() - 1]) else {
            continue;
        };
        for param in parts {
            if let Some(rel) = param.trim().strip_prefix("rel=") {
                let rel = rel.trim_matches('"');
                links.insert(rel.to_owned(), url);
                break;
            }
        }
    }
    links
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_next_and_last_links() {
        let header = "<https://api.github.com/events?page=2>; rel=\"next\", \
                      <https://api.github.com/events?page=10>; rel=\"last\"";
        let links = parse_links(header);

        assert_eq!(links.len(), 2);
        assert_eq!(
            links["next"].as_str(),
            "https://api.github.com/events?page=2"
        );
        assert_eq!(
            links["last"].as_str(),
            "https://api.github.com/events?page=10"
        );
    }

    #[test]
    fn parses_prev_and_first_links() {
        let header = "<https://api.github.com/events?page=9>; rel=\"prev\", \
                      <https://api.github.com/events?page=1>; rel=\"first\"";
        let links = parse_links(header);

        assert_eq!(links["prev"].as_str(), "https://api.github.com/events?page=9");
        assert_eq!(links["first"].as_str(), "https://api.github.com/events?page=1");
    }

    #[test]
    fn skips_malformed_entries() {
        let header = "garbage, <https://example.com/a?page=3>; rel=\"next\", <unbalanced; rel=\"x\"";
        let links = parse_links(header);

        assert_eq!(links.len(), 1);
        assert!(links.contains_key("next"));
    }

    #[test]
    fn empty_header_yields_no_links() {
        assert!(parse_links("").is_empty());
    }

    #[test]
    fn formats_http_date() {
        let when = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(when), "Wed, 21 Oct 2015 07:28:00 GMT");
    }
}
