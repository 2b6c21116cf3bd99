//! XHR/API endpoint probing.
//!
//! Many JS-heavy pages hydrate from a JSON or HTML-fragment endpoint that
//! follows a predictable naming convention. Probing those endpoints directly
//! is far cheaper than rendering the page, so this tier tries a fixed set of
//! candidates derived from the page URL and takes the first 200 it finds.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use tierfetch_core::error::FetchError;
use tierfetch_core::traits::{FetchedPage, XhrFetch};
use url::Url;

const XHR_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Derives candidate API endpoints for a page URL, most likely first.
///
/// Returns an empty list when the URL does not parse or has no host.
pub fn api_candidates(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    if parsed.host_str().is_none() {
        return Vec::new();
    }

    let origin = parsed.origin().ascii_serialization();
    let path = parsed.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    let mut candidates = vec![
        format!("{origin}/api{path}"),
        format!("{origin}/api/v1{path}"),
        format!("{origin}/api/v2{path}"),
        format!("{origin}/api/data{path}"),
        format!("{origin}{path}/data"),
        format!("{origin}{path}/api"),
        format!("{origin}/data{path}"),
        format!("{origin}{path}.json"),
    ];

    // Endpoints that filter by query string usually expect it passed along.
    if let Some(query) = parsed.query() {
        candidates.push(format!("{origin}/api{path}?{query}"));
        candidates.push(format!("{origin}/api/v1{path}?{query}"));
        candidates.push(format!("{origin}/api/v2{path}?{query}"));
    }

    candidates.dedup();
    candidates
}

/// Probes derived API endpoints and returns the first one that answers 200
/// with a body.
#[derive(Clone)]
pub struct XhrClient {
    client: Client,
}

impl XhrClient {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(XHR_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

impl XhrFetch for XhrClient {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedPage>, FetchError> {
        let derived = api_candidates(url);
        if derived.is_empty() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }
        // The original URL goes first: some sites serve full content to
        // XHR-flavored requests even when the plain GET came back hollow.
        let mut candidates = Vec::with_capacity(derived.len() + 1);
        candidates.push(url.to_string());
        candidates.extend(derived);

        for candidate in &candidates {
            let request = self.client.get(candidate).header(REFERER, url);
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::trace!(candidate = %candidate, error = %e, "XHR candidate unreachable");
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status != 200 {
                tracing::trace!(candidate = %candidate, status, "XHR candidate missed");
                continue;
            }

            match response.text().await {
                Ok(body) if !body.is_empty() => {
                    tracing::debug!(url, candidate = %candidate, bytes = body.len(), "XHR candidate hit");
                    return Ok(Some(FetchedPage { body, status }));
                }
                Ok(_) => {
                    tracing::trace!(candidate = %candidate, "XHR candidate returned empty body");
                }
                Err(e) => {
                    tracing::trace!(candidate = %candidate, error = %e, "XHR body read failed");
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_cover_common_conventions() {
        let candidates = api_candidates("https://shop.example.com/products/widget");
        assert_eq!(
            candidates,
            vec![
                "https://shop.example.com/api/products/widget",
                "https://shop.example.com/api/v1/products/widget",
                "https://shop.example.com/api/v2/products/widget",
                "https://shop.example.com/api/data/products/widget",
                "https://shop.example.com/products/widget/data",
                "https://shop.example.com/products/widget/api",
                "https://shop.example.com/data/products/widget",
                "https://shop.example.com/products/widget.json",
            ]
        );
    }

    #[test]
    fn test_query_string_is_preserved_for_api_variants() {
        let candidates = api_candidates("https://example.com/search?q=rust&page=2");
        assert!(candidates.contains(&"https://example.com/api/search?q=rust&page=2".to_string()));
        assert!(
            candidates.contains(&"https://example.com/api/v1/search?q=rust&page=2".to_string())
        );
        assert!(
            candidates.contains(&"https://example.com/api/v2/search?q=rust&page=2".to_string())
        );
        // The bare variants still come first.
        assert_eq!(candidates[0], "https://example.com/api/search");
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let candidates = api_candidates("https://example.com/products/");
        assert_eq!(candidates[0], "https://example.com/api/products");
    }

    #[test]
    fn test_root_path() {
        let candidates = api_candidates("https://example.com");
        assert_eq!(candidates[0], "https://example.com/api/");
    }

    #[test]
    fn test_port_is_kept_in_origin() {
        let candidates = api_candidates("http://localhost:8080/items");
        assert_eq!(candidates[0], "http://localhost:8080/api/items");
    }

    #[test]
    fn test_invalid_url_yields_nothing() {
        assert!(api_candidates("not a url").is_empty());
        assert!(api_candidates("mailto:someone@example.com").is_empty());
    }
}
