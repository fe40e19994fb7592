//! URL normalization and link classification
//!
//! This module resolves link candidates found on a page and decides which of
//! them are worth crawling. Two outcomes must not be confused:
//!
//! - **Invalid**: the candidate failed syntax parsing. Only these feed the
//!   invalid-link set.
//! - **Skipped**: the candidate parsed fine but is an image, carries
//!   `rel=nofollow`, is not http(s), or is nested deeper than the configured
//!   path depth. Skips are logged and never reported as invalid.

use regex::Regex;
use std::fmt;
use url::{ParseError, Url};

/// Why a syntactically valid link is not crawled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Image,
    NoFollow,
    TooDeep,
    NotHttp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Image => "image",
            Self::NoFollow => "nofollow",
            Self::TooDeep => "too deep",
            Self::NotHttp => "not http",
        };
        f.write_str(label)
    }
}

/// Classification of a single link candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClass {
    /// Failed syntax parsing
    Invalid,
    /// Parsed, but excluded from crawling
    Skipped(Url, SkipReason),
    /// Should be crawled
    Crawl(Url),
}

/// Link selection rules applied to every page
pub struct UrlPolicy {
    /// Maximum number of path segments a crawl candidate may have
    max_path_depth: usize,
    /// Image extensions, matched against the path
    image_pattern: Regex,
}

impl UrlPolicy {
    /// Create a policy with the given maximum path depth
    #[must_use]
    pub fn new(max_path_depth: usize) -> Self {
        Self {
            max_path_depth,
            image_pattern: Regex::new(r"(?i)\.(png|jpe?g|gif|svg|webp|bmp|ico|avif|tiff?)$")
                .expect("Invalid regex pattern"),
        }
    }

    /// Maximum crawl depth in path segments
    pub fn max_path_depth(&self) -> usize {
        self.max_path_depth
    }

    /// Check whether a resolved URL points at an image resource
    pub fn is_image(&self, url: &Url) -> bool {
        self.image_pattern.is_match(url.path())
    }

    /// Classify a link candidate found on `page`
    ///
    /// `rel` is the raw `rel` attribute of the anchor, if any.
    pub fn classify(&self, candidate: &str, rel: Option<&str>, page: &Url) -> LinkClass {
        let Some(url) = normalize_url(candidate, Some(page)) else {
            return LinkClass::Invalid;
        };

        let reason = if !matches!(url.scheme(), "http" | "https") {
            Some(SkipReason::NotHttp)
        } else if is_nofollow(rel) {
            Some(SkipReason::NoFollow)
        } else if self.is_image(&url) {
            Some(SkipReason::Image)
        } else if path_depth(&url) > self.max_path_depth {
            Some(SkipReason::TooDeep)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::debug!(url = %url, reason = %reason, "Skipping crawl candidate");
                LinkClass::Skipped(url, reason)
            }
            None => LinkClass::Crawl(url),
        }
    }
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Resolve a candidate string into an absolute URL
///
/// Absolute candidates are parsed as-is. Candidates without a scheme are
/// resolved against `page`; without a page they cannot be resolved and
/// yield `None`. Syntactically invalid input yields `None`. The fragment is
/// dropped.
///
/// # Examples
///
/// ```
/// use siteaudit::crawler::url::normalize_url;
/// use url::Url;
///
/// let page = Url::parse("http://docs.example.com/3/index.html").unwrap();
/// let resolved = normalize_url("help/Python.html", Some(&page)).unwrap();
/// assert_eq!(resolved.as_str(), "http://docs.example.com/3/help/Python.html");
///
/// assert!(normalize_url("help/Python.html", None).is_none());
/// ```
pub fn normalize_url(candidate: &str, page: Option<&Url>) -> Option<Url> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    let mut url = match Url::parse(candidate) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => page?.join(candidate).ok()?,
        Err(_) => return None,
    };

    if url.cannot_be_a_base() && matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_fragment(None);
    Some(url)
}

/// Grouping domain of a URL: lowercase host without a leading `www.`
///
/// Scheme and port are not part of the result.
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match host.strip_prefix("www.") {
        Some(bare) => bare.to_string(),
        None => host,
    })
}

/// Whether two URLs belong to the same grouping domain
pub fn is_same_domain(a: &Url, b: &Url) -> bool {
    match (domain_of(a), domain_of(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether a `rel` attribute contains the `nofollow` token
pub fn is_nofollow(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| {
        rel.split_ascii_whitespace()
            .any(|token| token.eq_ignore_ascii_case("nofollow"))
    })
}

/// Number of non-empty path segments
pub fn path_depth(url: &Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://www.example.com:8443/blog/post.html").unwrap()
    }

    #[test]
    fn test_normalize_absolute() {
        let url = normalize_url("http://Example.com/a#frag", None).unwrap();
        assert_eq!(url.as_str(), "http://example.com/a");
    }

    #[test]
    fn test_normalize_relative() {
        let url = normalize_url("../about", Some(&page())).unwrap();
        assert_eq!(url.as_str(), "https://www.example.com:8443/about");
    }

    #[test]
    fn test_normalize_invalid() {
        assert!(normalize_url("http://exa mple.com/x.js", Some(&page())).is_none());
        assert!(normalize_url("http://[::1/", Some(&page())).is_none());
        assert!(normalize_url("   ", Some(&page())).is_none());
        assert!(normalize_url("help/Python.html", None).is_none());
    }

    #[test]
    fn test_domain_strips_www_and_port() {
        assert_eq!(domain_of(&page()).as_deref(), Some("example.com"));
        let other = Url::parse("http://example.com/").unwrap();
        assert!(is_same_domain(&page(), &other));
    }

    #[test]
    fn test_resolved_url_keeps_host() {
        let url = normalize_url("/x", Some(&page())).unwrap();
        assert_eq!(url.host_str(), Some("www.example.com"));
    }

    #[test]
    fn test_nofollow_tokens() {
        assert!(is_nofollow(Some("noopener NoFollow")));
        assert!(!is_nofollow(Some("noopener")));
        assert!(!is_nofollow(None));
    }

    #[test]
    fn test_classify() {
        let policy = UrlPolicy::new(2);
        let page = page();

        assert_eq!(policy.classify("http://bad host/", None, &page), LinkClass::Invalid);
        assert!(matches!(
            policy.classify("/logo.PNG", None, &page),
            LinkClass::Skipped(_, SkipReason::Image)
        ));
        assert!(matches!(
            policy.classify("/a", Some("nofollow"), &page),
            LinkClass::Skipped(_, SkipReason::NoFollow)
        ));
        assert!(matches!(
            policy.classify("/a/b/c", None, &page),
            LinkClass::Skipped(_, SkipReason::TooDeep)
        ));
        assert!(matches!(
            policy.classify("mailto:team@example.com", None, &page),
            LinkClass::Skipped(_, SkipReason::NotHttp)
        ));
        assert!(matches!(policy.classify("/a/b", None, &page), LinkClass::Crawl(_)));
    }

    #[test]
    fn test_path_depth() {
        let url = Url::parse("http://example.com/a/b/").unwrap();
        assert_eq!(path_depth(&url), 2);
        let root = Url::parse("http://example.com/").unwrap();
        assert_eq!(path_depth(&root), 0);
    }
}
