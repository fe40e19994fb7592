//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use siteaudit::crawler::{FetchRequest, FetchResponse, HttpTransport};
use siteaudit::review::{
    FactDefinition, Facter, ReviewContext, Validator, ViolationDefinition,
};

/// Canned response for one URL
#[derive(Clone)]
pub struct Page {
    pub status: u16,
    pub body: String,
    pub effective_url: Option<String>,
}

/// Transport serving canned pages; unknown URLs fail like a refused connection
#[derive(Default)]
pub struct StaticTransport {
    pages: HashMap<String, Page>,
    requests: Mutex<Vec<(String, String)>>,
    count: AtomicUsize,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200
    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                status: 200,
                body: body.to_string(),
                effective_url: None,
            },
        );
        self
    }

    /// Serve an empty body with `status`
    pub fn status(mut self, url: &str, status: u16) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                status,
                body: String::new(),
                effective_url: None,
            },
        );
        self
    }

    /// Answer `url` as if it had redirected to `target`
    pub fn redirect(mut self, url: &str, target: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            Page {
                status: 200,
                body: String::new(),
                effective_url: Some(target.to_string()),
            },
        );
        self
    }

    /// (method, url) of every request served, in arrival order
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for StaticTransport {
    async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((request.method.to_string(), request.url.clone()));

        match self.pages.get(&request.url) {
            Some(page) => FetchResponse {
                status: page.status,
                headers: HashMap::from([("content-type".to_string(), "text/html".to_string())]),
                effective_url: page.effective_url.clone().unwrap_or(request.url),
                body: (request.method != reqwest::Method::HEAD).then(|| page.body.clone()),
                error: None,
            },
            None => FetchResponse::error(request.url, "connection refused"),
        }
    }
}

// ============================================================================
// Test plugins
// ============================================================================

/// Emits `check.title` and `check.size`
pub struct TitleFacter;

#[async_trait]
impl Facter for TitleFacter {
    fn name(&self) -> &'static str {
        "title_check"
    }

    fn definitions(&self) -> Vec<FactDefinition> {
        vec![
            FactDefinition {
                key: "check.title",
                title: "Title",
                unit: None,
                category: "test",
                formatter: None,
            },
            FactDefinition {
                key: "check.size",
                title: "Size",
                unit: Some("bytes"),
                category: "test",
                formatter: None,
            },
        ]
    }

    async fn collect(&self, ctx: &ReviewContext) {
        let has_title = ctx.body().contains("<title>");
        ctx.add_fact("check.title", json!(has_title));
        ctx.add_fact("check.size", json!(ctx.body().len()));
    }
}

/// Emits `check.status` and, after a sub-fetch, `check.robots`
pub struct RobotsFacter;

#[async_trait]
impl Facter for RobotsFacter {
    fn name(&self) -> &'static str {
        "robots_check"
    }

    fn definitions(&self) -> Vec<FactDefinition> {
        vec![
            FactDefinition {
                key: "check.status",
                title: "Status",
                unit: None,
                category: "test",
                formatter: None,
            },
            FactDefinition {
                key: "check.robots",
                title: "robots.txt status",
                unit: None,
                category: "test",
                formatter: None,
            },
        ]
    }

    async fn collect(&self, ctx: &ReviewContext) {
        ctx.add_fact("check.status", json!(ctx.page().status));

        let Some(robots) = ctx.normalize_url("/robots.txt") else {
            return;
        };
        let facts = ctx.facts().clone();
        ctx.async_get(
            robots.to_string(),
            move |_, response| facts.add("check.robots", json!(response.status)),
            reqwest::Method::GET,
            Default::default(),
        );
    }
}

/// Emits `check.no_title` worth 50 points when the page has no title
pub struct NoTitleRule;

#[async_trait]
impl Validator for NoTitleRule {
    fn name(&self) -> &'static str {
        "no_title_rule"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![ViolationDefinition {
            key: "check.no_title",
            title: "No title",
            category: "test",
            description: "The page has no title element.",
            formatter: None,
            default_config: None,
        }]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        if ctx.fact("check.title") == Some(json!(false)) {
            ctx.add_violation("check.no_title", json!(null), 50);
        }
    }
}

/// A page without a title, linking its robots.txt
pub const UNTITLED_PAGE: &str = r#"<html><head></head><body><p>Hello</p></body></html>"#;
