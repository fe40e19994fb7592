//! Integration tests for ReqwestTransport using wiremock
//!
//! These tests validate that every fetch outcome, including transport
//! failures, comes back as a response.

use reqwest::Method;
use siteaudit::config::Config;
use siteaudit::crawler::{FetchOptions, FetchRequest, HttpTransport, ReqwestTransport, ERROR_STATUS};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport() -> ReqwestTransport {
    let mut config = Config::default();
    config.crawler.rate_limit = 100;
    ReqwestTransport::new(&config.crawler).unwrap()
}

/// Test successful fetch from mock server
#[tokio::test]
async fn test_fetch_success() {
    let mock_server = MockServer::start().await;
    let html = r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body><h1>Welcome</h1></body>
</html>"#;

    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html)
                .insert_header("Content-Type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let url = format!("{}/index.html", mock_server.uri());
    let response = transport().fetch(FetchRequest::get(&url)).await;

    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert!(response.body.as_deref().unwrap().contains("Welcome"));
    assert_eq!(response.header("content-type"), Some("text/html"));
    assert_eq!(response.effective_url, url);
}

/// Test that an HTTP error status is a response, not a transport failure
#[tokio::test]
async fn test_not_found_is_plain_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&mock_server)
        .await;

    let response = transport()
        .fetch(FetchRequest::get(format!("{}/missing", mock_server.uri())))
        .await;

    assert_eq!(response.status, 404);
    assert!(response.error.is_none());
    assert!(response.is_error());
    assert_eq!(response.body.as_deref(), Some("gone"));
}

/// Test timeout handling
#[tokio::test]
async fn test_timeout_is_error_shaped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let request = FetchRequest {
        url: format!("{}/slow", mock_server.uri()),
        method: Method::GET,
        options: FetchOptions {
            timeout: Some(Duration::from_millis(200)),
            ..FetchOptions::default()
        },
    };
    let response = transport().fetch(request).await;

    assert_eq!(response.status, ERROR_STATUS);
    assert!(response.body.is_none());
    assert!(response.error.as_deref().unwrap().contains("timeout"));
}

/// Test a refused connection
#[tokio::test]
async fn test_connection_refused_is_error_shaped() {
    let mock_server = MockServer::start().await;
    let url = format!("{}/gone", mock_server.uri());
    drop(mock_server);

    let response = transport().fetch(FetchRequest::get(&url)).await;

    assert_eq!(response.status, ERROR_STATUS);
    assert!(response.error.is_some());
    assert_eq!(response.effective_url, url);
}

/// Test HEAD requests carry no body
#[tokio::test]
async fn test_head_has_no_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = FetchRequest {
        method: Method::HEAD,
        ..FetchRequest::get(format!("{}/page", mock_server.uri()))
    };
    let response = transport().fetch(request).await;

    assert_eq!(response.status, 200);
    assert!(response.body.is_none());
    assert!(response.error.is_none());
}

/// Test redirects are followed by default and the landing URL is reported
#[tokio::test]
async fn test_redirect_followed() {
    let mock_server = MockServer::start().await;
    let target = format!("{}/new", mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", target.as_str()))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
        .mount(&mock_server)
        .await;

    let response = transport()
        .fetch(FetchRequest::get(format!("{}/old", mock_server.uri())))
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.effective_url, target);
    assert_eq!(response.body.as_deref(), Some("moved here"));
}

/// Test redirects are reported as-is when following is disabled
#[tokio::test]
async fn test_redirect_not_followed() {
    let mock_server = MockServer::start().await;
    let url = format!("{}/old", mock_server.uri());

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&mock_server)
        .await;

    let request = FetchRequest {
        options: FetchOptions {
            follow_redirects: false,
            ..FetchOptions::default()
        },
        ..FetchRequest::get(&url)
    };
    let response = transport().fetch(request).await;

    assert_eq!(response.status, 302);
    assert_eq!(response.effective_url, url);
    assert_eq!(response.header("Location"), Some("/new"));
}

/// Test per-request headers are sent
#[tokio::test]
async fn test_custom_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/lang"))
        .and(header("accept-language", "en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("english"))
        .mount(&mock_server)
        .await;

    let request = FetchRequest {
        options: FetchOptions {
            headers: vec![("Accept-Language".to_string(), "en".to_string())],
            ..FetchOptions::default()
        },
        ..FetchRequest::get(format!("{}/lang", mock_server.uri()))
    };
    let response = transport().fetch(request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.body.as_deref(), Some("english"));
}
