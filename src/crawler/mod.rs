//! Page fetching: URL rules, HTTP transport and fan-out fetch scheduling
//!
//! - [`url`] - normalization and crawl-candidate classification
//! - [`fetcher`] - rate-limited HTTP transport with error-shaped responses
//! - [`fanout`] - per-review fetch coordinator with a fan-in barrier

pub mod fanout;
pub mod fetcher;
pub mod url;

pub use fanout::FetchCoordinator;
pub use fetcher::{
    FetchOptions, FetchRequest, FetchResponse, HttpTransport, ReqwestTransport, ERROR_STATUS,
};
pub use url::{LinkClass, SkipReason, UrlPolicy};
