//! Review pipeline: one page through facters, the barrier, and validators
//!
//! # Architecture
//!
//! ```text
//!  CREATED ──root fetch──▶ FACTS_RUNNING ──facters + barrier──▶ FACTS_DONE
//!     │                                                            │
//!     │ root fetch failed                                          ▼
//!     ▼                                                   VALIDATORS_RUNNING
//!  FAILED                                                          │
//!                                       validators (in order) ─────┘──▶ COMPLETED
//! ```
//!
//! A fresh [`FetchCoordinator`] is created for every run, so a validator that
//! blocks on the barrier only waits for fetches belonging to its own review.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use super::registry::{facters_by_names, validators_by_names, DefinitionRegistry};
use super::{Facter, ReviewContext, Validator};
use crate::config::Config;
use crate::crawler::fetcher::{FetchRequest, FetchResponse, HttpTransport};
use crate::crawler::url::{normalize_url, UrlPolicy};
use crate::crawler::FetchCoordinator;
use crate::metrics;
use crate::models::{Review, ReviewStatus};
use crate::utils::error::ReviewError;

/// Runs configured facters and validators over single pages
pub struct ReviewPipeline {
    transport: Arc<dyn HttpTransport>,
    facters: Vec<Box<dyn Facter>>,
    validators: Vec<Box<dyn Validator>>,
    registry: Arc<DefinitionRegistry>,
    policy: Arc<UrlPolicy>,
    settings: Arc<HashMap<String, Value>>,
}

impl ReviewPipeline {
    /// Build a pipeline from explicit plugins
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::DuplicateDefinition` if two plugins declare the
    /// same key.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        facters: Vec<Box<dyn Facter>>,
        validators: Vec<Box<dyn Validator>>,
        policy: UrlPolicy,
    ) -> Result<Self, ReviewError> {
        let registry = DefinitionRegistry::build(&facters, &validators)?;
        Ok(Self {
            transport,
            facters,
            validators,
            registry: Arc::new(registry),
            policy: Arc::new(policy),
            settings: Arc::new(HashMap::new()),
        })
    }

    /// Build a pipeline from the `[review]` and `[crawler]` config sections
    pub fn from_config(config: &Config, transport: Arc<dyn HttpTransport>) -> Result<Self, ReviewError> {
        let facters = facters_by_names(&config.review.facters)?;
        let validators = validators_by_names(&config.review.validators)?;
        let policy = UrlPolicy::new(config.crawler.max_path_depth);

        Ok(Self::new(transport, facters, validators, policy)?
            .with_settings(config.review.settings.clone()))
    }

    /// Replace per-violation configuration overrides
    #[must_use]
    pub fn with_settings(mut self, settings: HashMap<String, Value>) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Definitions contributed by the installed plugins
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Review one page
    ///
    /// A page that cannot be fetched yields a FAILED review, not an error.
    ///
    /// # Errors
    ///
    /// Returns `ReviewError::UnregisteredKey` when a plugin emits a key that
    /// no installed plugin declared. The review does not complete.
    pub async fn run(&self, url: &str) -> Result<Review, ReviewError> {
        let mut review = Review::new(url);

        let Some(page_url) = normalize_url(url, None) else {
            tracing::warn!(url = %url, "Refusing to review invalid URL");
            review.fail("invalid URL")?;
            metrics::record_review(review.status.as_str(), 0, 0);
            return Ok(review);
        };

        let coordinator = FetchCoordinator::new(Arc::clone(&self.transport));
        let root = coordinator.fetch(FetchRequest::get(page_url.as_str())).await;

        if let Some(reason) = root_failure(&root) {
            tracing::warn!(url = %page_url, status = root.status, reason = %reason, "Root page unavailable");
            review.fail(reason)?;
            metrics::record_review(review.status.as_str(), 0, 0);
            return Ok(review);
        }

        // Relative links resolve against where the page actually lives.
        let base = Url::parse(&root.effective_url).unwrap_or(page_url);
        let ctx = ReviewContext::new(
            base,
            root,
            coordinator.clone(),
            Arc::clone(&self.policy),
            Arc::clone(&self.settings),
            Arc::clone(&self.registry),
        );

        review.advance(ReviewStatus::FactsRunning)?;
        {
            let _timer = metrics::start_phase_timer("facts");
            for facter in &self.facters {
                tracing::debug!(review = %review.id, facter = facter.name(), "Collecting facts");
                facter.collect(&ctx).await;
            }
            ctx.wait_for_async_requests().await;
        }
        abort_on_defect(&review, &ctx)?;
        review.advance(ReviewStatus::FactsDone)?;

        review.advance(ReviewStatus::ValidatorsRunning)?;
        {
            let _timer = metrics::start_phase_timer("validators");
            for validator in &self.validators {
                tracing::debug!(review = %review.id, validator = validator.name(), "Validating");
                validator.validate(&ctx).await;
                ctx.wait_for_async_requests().await;
                abort_on_defect(&review, &ctx)?;
            }
        }

        let (facts, violations) = ctx.into_results();
        review.facts = facts;
        review.violations = violations;
        let score = review.compute_score();
        review.advance(ReviewStatus::Completed)?;

        tracing::info!(
            review = %review.id,
            url = %review.url,
            facts = review.facts.len(),
            violations = review.violations.len(),
            score,
            fetches = coordinator.issued(),
            "Review completed"
        );
        metrics::record_review(review.status.as_str(), score, coordinator.issued());

        Ok(review)
    }
}

/// Why the root page counts as unavailable, if it does
fn root_failure(root: &FetchResponse) -> Option<String> {
    if let Some(error) = &root.error {
        return Some(error.clone());
    }
    if root.status >= 400 {
        return Some(format!("HTTP status {}", root.status));
    }
    None
}

fn abort_on_defect(review: &Review, ctx: &ReviewContext) -> Result<(), ReviewError> {
    match ctx.take_defect() {
        Some(defect) => {
            tracing::error!(review = %review.id, url = %review.url, error = %defect, "Review aborted");
            Err(defect)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::ERROR_STATUS;
    use crate::review::FactDefinition;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedPage {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl HttpTransport for FixedPage {
        async fn fetch(&self, request: FetchRequest) -> FetchResponse {
            FetchResponse {
                status: self.status,
                headers: HashMap::new(),
                effective_url: request.url,
                body: Some(self.body.to_string()),
                error: None,
            }
        }
    }

    struct Unreachable;

    #[async_trait]
    impl HttpTransport for Unreachable {
        async fn fetch(&self, request: FetchRequest) -> FetchResponse {
            FetchResponse::error(request.url, "connection refused")
        }
    }

    struct RogueFacter;

    #[async_trait]
    impl Facter for RogueFacter {
        fn name(&self) -> &'static str {
            "rogue"
        }

        fn definitions(&self) -> Vec<FactDefinition> {
            Vec::new()
        }

        async fn collect(&self, ctx: &ReviewContext) {
            ctx.add_fact("undeclared.key", json!(1));
        }
    }

    fn pipeline(transport: Arc<dyn HttpTransport>, facters: Vec<Box<dyn Facter>>) -> ReviewPipeline {
        ReviewPipeline::new(transport, facters, Vec::new(), UrlPolicy::default()).unwrap()
    }

    #[test]
    fn test_root_failure() {
        assert!(root_failure(&FetchResponse::error("http://a/", "boom")).is_some());
        let mut ok = FetchResponse::error("http://a/", "x");
        ok.error = None;
        ok.status = 200;
        assert!(root_failure(&ok).is_none());
        ok.status = 404;
        assert_eq!(root_failure(&ok).as_deref(), Some("HTTP status 404"));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_review() {
        let review = pipeline(Arc::new(Unreachable), Vec::new())
            .run("not a url")
            .await
            .unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert_eq!(review.failure.as_deref(), Some("invalid URL"));
    }

    #[tokio::test]
    async fn test_unreachable_root_fails_review() {
        let review = pipeline(Arc::new(Unreachable), Vec::new())
            .run("http://example.com/")
            .await
            .unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert!(review.finished_at.is_some());
        assert_eq!(ERROR_STATUS, 599);
    }

    #[tokio::test]
    async fn test_error_status_fails_review() {
        let transport = Arc::new(FixedPage {
            status: 500,
            body: "oops",
        });
        let review = pipeline(transport, Vec::new())
            .run("http://example.com/")
            .await
            .unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert_eq!(review.failure.as_deref(), Some("HTTP status 500"));
    }

    #[tokio::test]
    async fn test_unregistered_key_aborts() {
        let transport = Arc::new(FixedPage {
            status: 200,
            body: "<html></html>",
        });
        let err = pipeline(transport, vec![Box::new(RogueFacter)])
            .run("http://example.com/")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReviewError::UnregisteredKey {
                kind: "fact",
                key: "undeclared.key".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_pipeline_completes() {
        let transport = Arc::new(FixedPage {
            status: 200,
            body: "<html></html>",
        });
        let review = pipeline(transport, Vec::new())
            .run("http://example.com/")
            .await
            .unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.score, 0);
    }
}
