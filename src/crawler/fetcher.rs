//! HTTP transport with rate limiting and error-shaped responses
//!
//! Every fetch resolves to a [`FetchResponse`]. Timeouts, DNS failures and
//! refused connections are folded into a response carrying the sentinel
//! status [`ERROR_STATUS`] and an error message, so callers inside a review
//! never see a fetch fault.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{redirect, Client, Method};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::config::CrawlerConfig;
use crate::utils::error::FetchError;

/// Status used for responses that never reached an HTTP status line
pub const ERROR_STATUS: u16 = 599;

/// Per-request options
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Extra request headers
    pub headers: Vec<(String, String)>,

    /// Overrides the transport's default timeout
    pub timeout: Option<Duration>,

    /// Follow 3xx responses
    pub follow_redirects: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout: None,
            follow_redirects: true,
        }
    }
}

/// A fetch to perform
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub options: FetchOptions,
}

impl FetchRequest {
    /// GET with default options
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            options: FetchOptions::default(),
        }
    }
}

/// Outcome of a fetch, successful or not
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// HTTP status, or [`ERROR_STATUS`]
    pub status: u16,

    /// Response headers with lowercase names
    pub headers: HashMap<String, String>,

    /// URL after redirects
    pub effective_url: String,

    /// Body, absent for HEAD requests and failures
    pub body: Option<String>,

    /// Transport-level failure description
    pub error: Option<String>,
}

impl FetchResponse {
    /// Build an error-shaped response for `url`
    pub fn error(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ERROR_STATUS,
            headers: HashMap::new(),
            effective_url: url.into(),
            body: None,
            error: Some(message.into()),
        }
    }

    /// 2xx/3xx response with no transport error
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status < 400
    }

    /// Transport failure or HTTP error status
    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    /// Header lookup by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Something that can perform HTTP fetches
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one fetch; never fails, failures are error-shaped responses
    async fn fetch(&self, request: FetchRequest) -> FetchResponse;
}

/// reqwest-backed transport with a global rate limit
pub struct ReqwestTransport {
    /// Client that follows redirects
    client: Client,

    /// Client that reports 3xx responses as-is
    no_redirect_client: Client,

    /// Rate limiter shared by every request of this process
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ReqwestTransport {
    /// Create a transport from crawler configuration
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if an HTTP client cannot be created
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()?;

        let no_redirect_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(timeout)
            .gzip(true)
            .redirect(redirect::Policy::none())
            .build()?;

        let rate = NonZeroU32::new(config.rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            no_redirect_client,
            rate_limiter,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        self.rate_limiter.until_ready().await;

        let client = if request.options.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.options.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.options.timeout {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(url = %request.url, method = %request.method, "Fetching URL");

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    FetchError::Timeout.to_string()
                } else {
                    FetchError::Http(e).to_string()
                };
                tracing::debug!(url = %request.url, error = %message, "Fetch failed");
                return FetchResponse::error(&request.url, message);
            }
        };

        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let (body, error) = if request.method == Method::HEAD {
            (None, None)
        } else {
            match response.text().await {
                Ok(text) => (Some(text), None),
                Err(e) => (None, Some(format!("Failed to read response body: {e}"))),
            }
        };

        FetchResponse {
            status,
            headers,
            effective_url,
            body,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_shaped_response() {
        let response = FetchResponse::error("http://example.com/", "Request timeout");
        assert_eq!(response.status, ERROR_STATUS);
        assert!(response.is_error());
        assert!(response.body.is_none());
        assert_eq!(response.effective_url, "http://example.com/");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut response = FetchResponse::error("http://example.com/", "x");
        response
            .headers
            .insert("content-type".to_string(), "text/html".to_string());
        assert_eq!(response.header("Content-Type"), Some("text/html"));
    }

    #[test]
    fn test_transport_creation() {
        let config = crate::config::Config::default();
        assert!(ReqwestTransport::new(&config.crawler).is_ok());
    }
}
