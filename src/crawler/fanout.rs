//! Non-blocking fetch scheduling with a fan-in barrier
//!
//! A [`FetchCoordinator`] is created per review run. Facters and validators
//! call [`FetchCoordinator::async_get`] to schedule fetches; each completion
//! runs its handler exactly once. [`FetchCoordinator::wait_for_async_requests`]
//! suspends the caller until every scheduled fetch, including fetches
//! scheduled from inside handlers, has finished.
//!
//! ```text
//!   async_get ──▶ inflight += 1 ──▶ spawn(fetch ─▶ handler ─▶ inflight -= 1)
//!                                                     │
//!                                  may call async_get ┘ (counted before the decrement)
//!
//!   wait_for_async_requests: resolves once inflight == 0
//! ```

use reqwest::Method;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::fetcher::{FetchOptions, FetchRequest, FetchResponse, HttpTransport};

struct Inner {
    transport: Arc<dyn HttpTransport>,
    inflight: watch::Sender<usize>,
    issued: AtomicU64,
}

/// Decrements the in-flight count when a fetch task ends, even by panic
struct InflightGuard(Arc<Inner>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.inflight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Schedules fetches and tracks them until they complete
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    /// Create a coordinator over the given transport
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        let (inflight, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(Inner {
                transport,
                inflight,
                issued: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule a fetch and return immediately
    ///
    /// `handler(url, response)` runs exactly once when the fetch finishes.
    /// Failures arrive as error-shaped responses. Must be called from within
    /// a tokio runtime.
    pub fn async_get<F>(&self, url: impl Into<String>, handler: F, method: Method, options: FetchOptions)
    where
        F: FnOnce(String, FetchResponse) + Send + 'static,
    {
        let request = FetchRequest {
            url: url.into(),
            method,
            options,
        };

        self.inner.inflight.send_modify(|n| *n += 1);
        self.inner.issued.fetch_add(1, Ordering::Relaxed);

        let guard = InflightGuard(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let url = request.url.clone();
            let response = guard.0.transport.fetch(request).await;
            handler(url, response);
            drop(guard);
        });
    }

    /// Schedule a GET with default options
    pub fn get<F>(&self, url: impl Into<String>, handler: F)
    where
        F: FnOnce(String, FetchResponse) + Send + 'static,
    {
        self.async_get(url, handler, Method::GET, FetchOptions::default());
    }

    /// Wait until no scheduled fetch is outstanding
    ///
    /// Never retries; returns immediately if nothing is in flight.
    pub async fn wait_for_async_requests(&self) {
        let mut rx = self.inner.inflight.subscribe();
        // The sender is owned by `inner`, so the channel stays open while we hold `self`.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Fetch directly and await the response
    pub async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        self.inner.transport.fetch(request).await
    }

    /// Fetches currently in flight
    pub fn pending(&self) -> usize {
        *self.inner.inflight.borrow()
    }

    /// Fetches scheduled over the coordinator's lifetime
    pub fn issued(&self) -> u64 {
        self.inner.issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct SlowEcho;

    #[async_trait]
    impl HttpTransport for SlowEcho {
        async fn fetch(&self, request: FetchRequest) -> FetchResponse {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if request.url.contains("down") {
                return FetchResponse::error(&request.url, "connection refused");
            }
            FetchResponse {
                status: 200,
                headers: HashMap::new(),
                effective_url: request.url.clone(),
                body: Some(request.url),
                error: None,
            }
        }
    }

    #[tokio::test]
    async fn test_barrier_waits_for_all_fetches() {
        let coordinator = FetchCoordinator::new(Arc::new(SlowEcho));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            coordinator.get(format!("http://example.com/{i}"), move |url, _| {
                seen.lock().unwrap().push(url);
            });
        }

        coordinator.wait_for_async_requests().await;
        assert_eq!(seen.lock().unwrap().len(), 5);
        assert_eq!(coordinator.pending(), 0);
        assert_eq!(coordinator.issued(), 5);
    }

    #[tokio::test]
    async fn test_barrier_covers_nested_fetches() {
        let coordinator = FetchCoordinator::new(Arc::new(SlowEcho));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let nested = coordinator.clone();
        let outer_seen = Arc::clone(&seen);
        coordinator.get("http://example.com/outer", move |url, _| {
            outer_seen.lock().unwrap().push(url);
            let inner_seen = Arc::clone(&outer_seen);
            nested.get("http://example.com/inner", move |url, _| {
                inner_seen.lock().unwrap().push(url);
            });
        });

        coordinator.wait_for_async_requests().await;
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "http://example.com/outer".to_string(),
                "http://example.com/inner".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_reach_handler_as_responses() {
        let coordinator = FetchCoordinator::new(Arc::new(SlowEcho));
        let status = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&status);
        coordinator.get("http://down.example.com/", move |_, response| {
            *slot.lock().unwrap() = Some(response.status);
        });

        coordinator.wait_for_async_requests().await;
        assert_eq!(*status.lock().unwrap(), Some(crate::crawler::ERROR_STATUS));
    }

    #[tokio::test]
    async fn test_wait_without_fetches_returns() {
        let coordinator = FetchCoordinator::new(Arc::new(SlowEcho));
        coordinator.wait_for_async_requests().await;
        assert_eq!(coordinator.issued(), 0);
    }
}
