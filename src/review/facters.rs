//! Built-in facters
//!
//! - [`HtmlFacter`] - title, meta description, heading count and size of the page
//! - [`RequestsFacter`] - number of script, stylesheet and image requests
//! - [`LinksFacter`] - link inventory, invalid links, and broken links via HEAD checks

use async_trait::async_trait;
use reqwest::Method;
use scraper::{Html, Selector};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::{FactDefinition, Facter, ReviewContext};
use crate::crawler::fetcher::FetchOptions;
use crate::crawler::url::LinkClass;

fn selector(cache: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cache.get_or_init(|| Selector::parse(css).expect("Invalid CSS selector"))
}

fn format_bytes(value: &Value) -> String {
    crate::utils::format_bytes(value.as_u64().unwrap_or(0))
}

fn format_url_list(value: &Value) -> String {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

// ============================================================================
// HTML
// ============================================================================

/// Basic document facts read from the root page
pub struct HtmlFacter;

struct HtmlSummary {
    title: Option<String>,
    meta_description: Option<String>,
    h1_count: usize,
}

fn summarize_html(body: &str) -> HtmlSummary {
    static TITLE: OnceLock<Selector> = OnceLock::new();
    static META: OnceLock<Selector> = OnceLock::new();
    static H1: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(body);

    let title = document
        .select(selector(&TITLE, "title"))
        .next()
        .map(|el| crate::utils::normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let meta_description = document
        .select(selector(&META, "meta[name][content]"))
        .find(|el| {
            el.value()
                .attr("name")
                .is_some_and(|name| name.eq_ignore_ascii_case("description"))
        })
        .and_then(|el| el.value().attr("content"))
        .map(crate::utils::normalize_whitespace)
        .filter(|d| !d.is_empty());

    let h1_count = document.select(selector(&H1, "h1")).count();

    HtmlSummary {
        title,
        meta_description,
        h1_count,
    }
}

#[async_trait]
impl Facter for HtmlFacter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn definitions(&self) -> Vec<FactDefinition> {
        vec![
            FactDefinition {
                key: "page.title",
                title: "Page title",
                unit: None,
                category: "content",
                formatter: None,
            },
            FactDefinition {
                key: "page.meta_description",
                title: "Meta description",
                unit: None,
                category: "content",
                formatter: None,
            },
            FactDefinition {
                key: "page.h1_count",
                title: "H1 headings",
                unit: Some("headings"),
                category: "content",
                formatter: None,
            },
            FactDefinition {
                key: "page.size",
                title: "Page size",
                unit: Some("bytes"),
                category: "performance",
                formatter: Some(format_bytes),
            },
        ]
    }

    async fn collect(&self, ctx: &ReviewContext) {
        let summary = summarize_html(ctx.body());

        ctx.add_fact("page.title", json!(summary.title));
        ctx.add_fact("page.meta_description", json!(summary.meta_description));
        ctx.add_fact("page.h1_count", json!(summary.h1_count));
        ctx.add_fact("page.size", json!(ctx.body().len()));
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Counts sub-resources referenced by the page
///
/// Only references that normalize to a valid URL are counted.
pub struct RequestsFacter;

struct ResourceRefs {
    scripts: Vec<String>,
    stylesheets: Vec<String>,
    images: Vec<String>,
}

fn resource_refs(body: &str) -> ResourceRefs {
    static SCRIPT: OnceLock<Selector> = OnceLock::new();
    static STYLESHEET: OnceLock<Selector> = OnceLock::new();
    static IMG: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(body);
    let attr_values = |sel: &Selector, attr: &str| -> Vec<String> {
        document
            .select(sel)
            .filter_map(|el| el.value().attr(attr).map(String::from))
            .collect()
    };

    ResourceRefs {
        scripts: attr_values(selector(&SCRIPT, "script[src]"), "src"),
        stylesheets: attr_values(
            selector(&STYLESHEET, r#"link[rel~="stylesheet"][href]"#),
            "href",
        ),
        images: attr_values(selector(&IMG, "img[src]"), "src"),
    }
}

#[async_trait]
impl Facter for RequestsFacter {
    fn name(&self) -> &'static str {
        "requests"
    }

    fn definitions(&self) -> Vec<FactDefinition> {
        vec![
            FactDefinition {
                key: "total.requests.js",
                title: "JavaScript requests",
                unit: Some("requests"),
                category: "performance",
                formatter: None,
            },
            FactDefinition {
                key: "total.requests.css",
                title: "Stylesheet requests",
                unit: Some("requests"),
                category: "performance",
                formatter: None,
            },
            FactDefinition {
                key: "total.requests.img",
                title: "Image requests",
                unit: Some("requests"),
                category: "performance",
                formatter: None,
            },
        ]
    }

    async fn collect(&self, ctx: &ReviewContext) {
        let refs = resource_refs(ctx.body());
        let count_valid = |candidates: &[String]| {
            candidates
                .iter()
                .filter(|c| ctx.normalize_url(c).is_some())
                .count()
        };

        ctx.add_fact("total.requests.js", json!(count_valid(&refs.scripts)));
        ctx.add_fact("total.requests.css", json!(count_valid(&refs.stylesheets)));
        ctx.add_fact("total.requests.img", json!(count_valid(&refs.images)));
    }
}

// ============================================================================
// Links
// ============================================================================

/// Inventories anchors and checks every crawl candidate with a HEAD request
///
/// Broken links are recorded as they are discovered, one `links.broken`
/// fact per link; the review's barrier makes them visible to validators.
pub struct LinksFacter;

fn anchors(body: &str) -> Vec<(String, Option<String>)> {
    static ANCHOR: OnceLock<Selector> = OnceLock::new();

    let document = Html::parse_document(body);
    document
        .select(selector(&ANCHOR, "a[href]"))
        .filter_map(|el| {
            let href = el.value().attr("href")?;
            Some((href.to_string(), el.value().attr("rel").map(String::from)))
        })
        .collect()
}

/// Whether a HEAD response means the link is broken
///
/// Some servers refuse HEAD outright; a 405 says nothing about the link.
fn is_broken(status: u16, failed: bool) -> bool {
    failed || (status >= 400 && status != 405)
}

#[async_trait]
impl Facter for LinksFacter {
    fn name(&self) -> &'static str {
        "links"
    }

    fn definitions(&self) -> Vec<FactDefinition> {
        vec![
            FactDefinition {
                key: "links.internal",
                title: "Internal links",
                unit: Some("links"),
                category: "links",
                formatter: None,
            },
            FactDefinition {
                key: "links.external",
                title: "External links",
                unit: Some("links"),
                category: "links",
                formatter: None,
            },
            FactDefinition {
                key: "links.invalid",
                title: "Invalid links",
                unit: None,
                category: "links",
                formatter: Some(format_url_list),
            },
            FactDefinition {
                key: "links.broken",
                title: "Broken link",
                unit: None,
                category: "links",
                formatter: None,
            },
        ]
    }

    async fn collect(&self, ctx: &ReviewContext) {
        let mut invalid = Vec::new();
        let mut candidates = BTreeSet::new();
        let mut internal = 0usize;
        let mut external = 0usize;

        for (href, rel) in anchors(ctx.body()) {
            match ctx.classify_link(&href, rel.as_deref()) {
                LinkClass::Invalid => invalid.push(href),
                LinkClass::Skipped(..) => {}
                LinkClass::Crawl(url) => {
                    if ctx.is_same_domain(&url) {
                        internal += 1;
                    } else {
                        external += 1;
                    }
                    candidates.insert(url.to_string());
                }
            }
        }

        ctx.add_fact("links.internal", json!(internal));
        ctx.add_fact("links.external", json!(external));
        ctx.add_fact("links.invalid", json!(invalid));

        tracing::debug!(
            page = %ctx.page_url(),
            candidates = candidates.len(),
            invalid = invalid.len(),
            "Checking links"
        );

        for url in candidates {
            let facts = ctx.facts().clone();
            ctx.async_get(
                url,
                move |url, response| {
                    if is_broken(response.status, response.error.is_some()) {
                        facts.add(
                            "links.broken",
                            json!({ "url": url, "status": response.status }),
                        );
                    }
                },
                Method::HEAD,
                FetchOptions::default(),
            );
        }
    }
}
