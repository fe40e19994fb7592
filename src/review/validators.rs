//! Built-in validators
//!
//! Validators run after every facter has finished and its fetches have been
//! drained. They read facts through the [`ReviewContext`] and emit scored
//! violations. [`WwwRedirectValidator`] additionally issues its own fetches
//! and blocks on the barrier before deciding.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use url::Url;

use super::{ReviewContext, Validator, ViolationDefinition};
use crate::crawler::fetcher::{FetchOptions, FetchResponse};
use crate::crawler::url::domain_of;

fn format_chars(value: &Value) -> String {
    format!("{} characters", value.as_u64().unwrap_or(0))
}

/// Text of a recorded fact; `None` when it was recorded as null or blank
fn present_text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|text| !text.is_empty())
}

fn format_link(value: &Value) -> String {
    match (value.get("url").and_then(Value::as_str), value.get("status")) {
        (Some(url), Some(status)) => format!("{url} ({status})"),
        _ => value.as_str().map(String::from).unwrap_or_default(),
    }
}

// ============================================================================
// Title
// ============================================================================

/// Flags missing and overlong titles
pub struct TitleValidator;

#[async_trait]
impl Validator for TitleValidator {
    fn name(&self) -> &'static str {
        "title"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![
            ViolationDefinition {
                key: "title.missing",
                title: "Missing title",
                category: "content",
                description: "The page has no <title>. Search engines show the title as the result headline.",
                formatter: None,
                default_config: None,
            },
            ViolationDefinition {
                key: "title.too_long",
                title: "Title too long",
                category: "content",
                description: "Long titles are truncated in search results.",
                formatter: Some(format_chars),
                default_config: Some(json!({ "max_length": 70 })),
            },
        ]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        // Nothing to judge when no facter looked at the title.
        let Some(recorded) = ctx.fact("page.title") else {
            return;
        };

        match present_text(&recorded) {
            None => ctx.add_violation("title.missing", Value::Null, 50),
            Some(title) => {
                let max = ctx.config_u64("title.too_long", "max_length", 70);
                let length = title.chars().count() as u64;
                if length > max {
                    ctx.add_violation("title.too_long", json!(length), 10);
                }
            }
        }
    }
}

// ============================================================================
// Meta
// ============================================================================

/// Flags a missing meta description
pub struct MetaValidator;

#[async_trait]
impl Validator for MetaValidator {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![ViolationDefinition {
            key: "meta.description_missing",
            title: "Missing meta description",
            category: "content",
            description: "Without a meta description search engines pick a snippet on their own.",
            formatter: None,
            default_config: None,
        }]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        let Some(recorded) = ctx.fact("page.meta_description") else {
            return;
        };
        if present_text(&recorded).is_none() {
            ctx.add_violation("meta.description_missing", Value::Null, 20);
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Penalizes pages that load too many scripts
pub struct RequestsValidator;

#[async_trait]
impl Validator for RequestsValidator {
    fn name(&self) -> &'static str {
        "requests"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![ViolationDefinition {
            key: "requests.js_too_many",
            title: "Too many JavaScript files",
            category: "performance",
            description: "Every script is a separate request; bundle them.",
            formatter: None,
            default_config: Some(json!({ "max_js": 10 })),
        }]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        let Some(count) = ctx.fact("total.requests.js").and_then(|v| v.as_u64()) else {
            return;
        };
        let max = ctx.config_u64("requests.js_too_many", "max_js", 10);
        if count > max {
            let extra = u32::try_from(count - max).unwrap_or(u32::MAX);
            ctx.add_violation("requests.js_too_many", json!(count), extra.saturating_mul(5));
        }
    }
}

// ============================================================================
// Links
// ============================================================================

/// Reports invalid and broken links found by the links facter
pub struct LinksValidator;

#[async_trait]
impl Validator for LinksValidator {
    fn name(&self) -> &'static str {
        "links"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![
            ViolationDefinition {
                key: "links.invalid",
                title: "Invalid link",
                category: "links",
                description: "The link target is not a syntactically valid URL.",
                formatter: None,
                default_config: None,
            },
            ViolationDefinition {
                key: "links.broken",
                title: "Broken link",
                category: "links",
                description: "The link target answered with an error or could not be reached.",
                formatter: Some(format_link),
                default_config: None,
            },
        ]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        for list in ctx.fact_values("links.invalid") {
            for href in list.as_array().into_iter().flatten() {
                ctx.add_violation("links.invalid", href.clone(), 2);
            }
        }

        for broken in ctx.fact_values("links.broken") {
            ctx.add_violation("links.broken", broken, 5);
        }
    }
}

// ============================================================================
// WWW redirect
// ============================================================================

/// Checks that the bare and `www.` hosts end up on the same site
///
/// Both variants are fetched concurrently, then the validator blocks on the
/// barrier and compares where each one landed.
pub struct WwwRedirectValidator;

fn host_variants(page: &Url) -> Option<(String, String)> {
    let domain = domain_of(page)?;
    if page.host().is_some_and(|h| !matches!(h, url::Host::Domain(_))) {
        return None;
    }
    let scheme = page.scheme();
    let port = page.port().map(|p| format!(":{p}")).unwrap_or_default();
    Some((
        format!("{scheme}://{domain}{port}/"),
        format!("{scheme}://www.{domain}{port}/"),
    ))
}

fn landing_host(response: &FetchResponse) -> Option<String> {
    if response.is_error() {
        return None;
    }
    Url::parse(&response.effective_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

#[async_trait]
impl Validator for WwwRedirectValidator {
    fn name(&self) -> &'static str {
        "www_redirect"
    }

    fn definitions(&self) -> Vec<ViolationDefinition> {
        vec![ViolationDefinition {
            key: "www.redirect_inconsistent",
            title: "www and bare domain serve different sites",
            category: "technical",
            description: "One of the two host variants should redirect to the other so the site has a single canonical host.",
            formatter: None,
            default_config: None,
        }]
    }

    async fn validate(&self, ctx: &ReviewContext) {
        let Some((bare, www)) = host_variants(ctx.page_url()) else {
            return;
        };

        let slots: Arc<Mutex<[Option<FetchResponse>; 2]>> = Arc::new(Mutex::new([None, None]));
        for (index, url) in [bare.clone(), www.clone()].into_iter().enumerate() {
            let slots = Arc::clone(&slots);
            ctx.async_get(
                url,
                move |_, response| {
                    if let Ok(mut slots) = slots.lock() {
                        slots[index] = Some(response);
                    }
                },
                Method::GET,
                FetchOptions::default(),
            );
        }

        ctx.wait_for_async_requests().await;

        let (bare_host, www_host) = {
            let slots = match slots.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            (
                slots[0].as_ref().and_then(landing_host),
                slots[1].as_ref().and_then(landing_host),
            )
        };

        // Cannot judge unless both variants answered.
        let (Some(bare_host), Some(www_host)) = (bare_host, www_host) else {
            tracing::debug!(bare = %bare, www = %www, "Skipping www check, a variant is unreachable");
            return;
        };

        if bare_host != www_host {
            ctx.add_violation(
                "www.redirect_inconsistent",
                json!({ "bare": bare_host, "www": www_host }),
                30,
            );
        }
    }
}
