//! Per-page review: facter/validator contract and shared capabilities
//!
//! A review runs every configured [`Facter`] to turn the page into [`Fact`]s,
//! then every configured [`Validator`] to turn facts into scored
//! [`Violation`]s. Both kinds receive a [`ReviewContext`], which bundles the
//! capabilities they share: URL normalization, link classification, fan-out
//! fetching through the review's [`FetchCoordinator`], and the fact and
//! violation sinks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   collect()    ┌──────────┐  barrier  ┌─────────────┐  validate()  ┌────────────┐
//! │ Facters  │──────────────▶│ FactSink │──────────▶│ Validators  │────────────▶│ Violations │
//! └──────────┘  async_get ▲   └──────────┘           └─────────────┘ async_get +  └────────────┘
//!                         └── FetchCoordinator ◀──────────────────── mid-step barrier
//! ```

pub mod facters;
pub mod pipeline;
pub mod registry;
pub mod validators;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use url::Url;

use crate::crawler::fetcher::{FetchOptions, FetchResponse};
use crate::crawler::url::{self as urls, LinkClass, UrlPolicy};
use crate::crawler::FetchCoordinator;
use crate::models::{Fact, Violation};
use crate::utils::error::ReviewError;

pub use pipeline::ReviewPipeline;
pub use registry::DefinitionRegistry;

/// Renders a stored value for humans
pub type ValueFormatter = fn(&Value) -> String;

/// Static metadata for one fact key
#[derive(Debug, Clone)]
pub struct FactDefinition {
    pub key: &'static str,
    pub title: &'static str,
    pub unit: Option<&'static str>,
    pub category: &'static str,
    pub formatter: Option<ValueFormatter>,
}

impl FactDefinition {
    /// Format a value with the definition's formatter, or as plain JSON
    pub fn format_value(&self, value: &Value) -> String {
        match self.formatter {
            Some(format) => format(value),
            None => plain_value(value),
        }
    }
}

/// Static metadata for one violation key
#[derive(Debug, Clone)]
pub struct ViolationDefinition {
    pub key: &'static str,
    pub title: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub formatter: Option<ValueFormatter>,
    pub default_config: Option<Value>,
}

impl ViolationDefinition {
    /// Format a value with the definition's formatter, or as plain JSON
    pub fn format_value(&self, value: &Value) -> String {
        match self.formatter {
            Some(format) => format(value),
            None => plain_value(value),
        }
    }
}

fn plain_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turns page content into facts
#[async_trait]
pub trait Facter: Send + Sync {
    /// Name used in configuration
    fn name(&self) -> &'static str;

    /// Every fact key this facter may emit
    fn definitions(&self) -> Vec<FactDefinition>;

    /// Write facts for the page; may fan out fetches without waiting for them
    async fn collect(&self, ctx: &ReviewContext);
}

/// Turns facts into scored violations
#[async_trait]
pub trait Validator: Send + Sync {
    /// Name used in configuration
    fn name(&self) -> &'static str;

    /// Every violation key this validator may emit
    fn definitions(&self) -> Vec<ViolationDefinition>;

    /// Emit zero or more violations; may fetch and block on the barrier
    async fn validate(&self, ctx: &ReviewContext);
}

// ============================================================================
// Sinks
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SinkState<T> {
    items: Vec<T>,
    defect: Option<ReviewError>,
}

/// Append-only fact collector shared with fetch handlers
#[derive(Clone)]
pub struct FactSink {
    registry: Arc<DefinitionRegistry>,
    state: Arc<Mutex<SinkState<Fact>>>,
}

impl FactSink {
    fn new(registry: Arc<DefinitionRegistry>) -> Self {
        Self {
            registry,
            state: Arc::new(Mutex::new(SinkState {
                items: Vec::new(),
                defect: None,
            })),
        }
    }

    /// Record a fact; unit and category come from its definition
    ///
    /// An unregistered key is a configuration defect: it is logged, the fact
    /// is dropped and the review will not complete.
    pub fn add(&self, key: &str, value: Value) {
        let mut state = lock(&self.state);
        match self.registry.fact(key) {
            Some(definition) => state.items.push(Fact {
                key: key.to_string(),
                value,
                unit: definition.unit.map(String::from),
                category: definition.category.to_string(),
            }),
            None => {
                tracing::error!(key = %key, "Fact emitted under unregistered key");
                state.defect.get_or_insert(ReviewError::UnregisteredKey {
                    kind: "fact",
                    key: key.to_string(),
                });
            }
        }
    }

    /// Values recorded under `key`, in emission order
    pub fn values(&self, key: &str) -> Vec<Value> {
        lock(&self.state)
            .items
            .iter()
            .filter(|f| f.key == key)
            .map(|f| f.value.clone())
            .collect()
    }

    fn take_defect(&self) -> Option<ReviewError> {
        lock(&self.state).defect.take()
    }

    fn snapshot(&self) -> Vec<Fact> {
        lock(&self.state).items.clone()
    }
}

/// Append-only violation collector shared with fetch handlers
#[derive(Clone)]
pub struct ViolationSink {
    registry: Arc<DefinitionRegistry>,
    state: Arc<Mutex<SinkState<Violation>>>,
}

impl ViolationSink {
    fn new(registry: Arc<DefinitionRegistry>) -> Self {
        Self {
            registry,
            state: Arc::new(Mutex::new(SinkState {
                items: Vec::new(),
                defect: None,
            })),
        }
    }

    /// Record a violation worth `points`
    pub fn add(&self, key: &str, value: Value, points: u32) {
        let mut state = lock(&self.state);
        if self.registry.violation(key).is_none() {
            tracing::error!(key = %key, "Violation emitted under unregistered key");
            state.defect.get_or_insert(ReviewError::UnregisteredKey {
                kind: "violation",
                key: key.to_string(),
            });
            return;
        }
        state.items.push(Violation {
            key: key.to_string(),
            value,
            points,
        });
    }

    /// Number of violations recorded so far
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_defect(&self) -> Option<ReviewError> {
        lock(&self.state).defect.take()
    }

    fn snapshot(&self) -> Vec<Violation> {
        lock(&self.state).items.clone()
    }
}

// ============================================================================
// Review Context
// ============================================================================

/// Capabilities shared by facters and validators during one review
pub struct ReviewContext {
    page_url: Url,
    page: FetchResponse,
    coordinator: FetchCoordinator,
    policy: Arc<UrlPolicy>,
    settings: Arc<HashMap<String, Value>>,
    registry: Arc<DefinitionRegistry>,
    facts: FactSink,
    violations: ViolationSink,
}

impl ReviewContext {
    pub(crate) fn new(
        page_url: Url,
        page: FetchResponse,
        coordinator: FetchCoordinator,
        policy: Arc<UrlPolicy>,
        settings: Arc<HashMap<String, Value>>,
        registry: Arc<DefinitionRegistry>,
    ) -> Self {
        Self {
            page_url,
            page,
            coordinator,
            policy,
            settings,
            facts: FactSink::new(Arc::clone(&registry)),
            violations: ViolationSink::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// URL of the page under review
    pub fn page_url(&self) -> &Url {
        &self.page_url
    }

    /// Root page response
    pub fn page(&self) -> &FetchResponse {
        &self.page
    }

    /// Root page body, empty if the response carried none
    pub fn body(&self) -> &str {
        self.page.body.as_deref().unwrap_or_default()
    }

    /// Resolve a candidate against the page URL
    pub fn normalize_url(&self, candidate: &str) -> Option<Url> {
        urls::normalize_url(candidate, Some(&self.page_url))
    }

    /// Classify an anchor found on the page
    pub fn classify_link(&self, candidate: &str, rel: Option<&str>) -> LinkClass {
        self.policy.classify(candidate, rel, &self.page_url)
    }

    /// Whether `url` shares the page's grouping domain
    pub fn is_same_domain(&self, url: &Url) -> bool {
        urls::is_same_domain(&self.page_url, url)
    }

    /// Whether `url` points at an image resource
    pub fn is_image(&self, url: &Url) -> bool {
        self.policy.is_image(url)
    }

    /// Schedule a fetch through the review's coordinator
    pub fn async_get<F>(&self, url: impl Into<String>, handler: F, method: Method, options: FetchOptions)
    where
        F: FnOnce(String, FetchResponse) + Send + 'static,
    {
        self.coordinator.async_get(url, handler, method, options);
    }

    /// Block until every fetch scheduled so far has completed
    pub async fn wait_for_async_requests(&self) {
        self.coordinator.wait_for_async_requests().await;
    }

    /// Coordinator handle for scheduling from inside handlers
    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Fact sink, cloneable into fetch handlers
    pub fn facts(&self) -> &FactSink {
        &self.facts
    }

    /// Violation sink, cloneable into fetch handlers
    pub fn violations(&self) -> &ViolationSink {
        &self.violations
    }

    /// Record a fact
    pub fn add_fact(&self, key: &str, value: Value) {
        self.facts.add(key, value);
    }

    /// First value recorded under a fact key
    pub fn fact(&self, key: &str) -> Option<Value> {
        self.facts.values(key).into_iter().next()
    }

    /// Every value recorded under a fact key
    pub fn fact_values(&self, key: &str) -> Vec<Value> {
        self.facts.values(key)
    }

    /// Record a violation
    pub fn add_violation(&self, key: &str, value: Value, points: u32) {
        self.violations.add(key, value, points);
    }

    /// Configuration for a violation key: override first, then definition default
    pub fn violation_config(&self, key: &str) -> Option<Value> {
        self.settings.get(key).cloned().or_else(|| {
            self.registry
                .violation(key)
                .and_then(|definition| definition.default_config.clone())
        })
    }

    /// Numeric setting from a violation's configuration
    pub fn config_u64(&self, key: &str, field: &str, fallback: u64) -> u64 {
        self.violation_config(key)
            .and_then(|config| config.get(field).and_then(Value::as_u64))
            .unwrap_or(fallback)
    }

    pub(crate) fn take_defect(&self) -> Option<ReviewError> {
        self.facts
            .take_defect()
            .or_else(|| self.violations.take_defect())
    }

    pub(crate) fn into_results(self) -> (Vec<Fact>, Vec<Violation>) {
        (self.facts.snapshot(), self.violations.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_value_defaults() {
        let definition = FactDefinition {
            key: "page.title",
            title: "Title",
            unit: None,
            category: "content",
            formatter: None,
        };
        assert_eq!(definition.format_value(&json!("Home")), "Home");
        assert_eq!(definition.format_value(&json!(3)), "3");
        assert_eq!(definition.format_value(&Value::Null), "");
    }

    #[test]
    fn test_format_value_custom() {
        fn kib(value: &Value) -> String {
            format!("{} KiB", value.as_u64().unwrap_or(0) / 1024)
        }
        let definition = FactDefinition {
            key: "page.size",
            title: "Size",
            unit: Some("bytes"),
            category: "performance",
            formatter: Some(kib),
        };
        assert_eq!(definition.format_value(&json!(4096)), "4 KiB");
    }
}
