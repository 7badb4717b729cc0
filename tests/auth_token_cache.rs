#![cfg(feature = "gateway")]

use std::sync::Arc;
use std::time::Duration;

use astro_gateway::auth::{OAuthClientCredentials, TokenCache};
use astro_gateway::clock::{ManualClock, SystemClock};
use astro_gateway::gateway::GatewayError;
use astro_gateway::utils::test_support::should_skip_httpmock;
use httpmock::{Method::POST, MockServer};

const CLIENT_ID: &str = "0b7e4f7a-52c1-4d1e-9f0a-6c2d8e3b1a90";

fn token_body(token: &str, expires_in: u64) -> String {
    format!(r#"{{"access_token":"{token}","token_type":"Bearer","expires_in":{expires_in}}}"#)
}

fn cache(server: &MockServer, clock: Arc<dyn astro_gateway::Clock>) -> TokenCache {
    let credentials = OAuthClientCredentials::new(server.url("/token"), CLIENT_ID, "s3cret")
        .expect("credentials");
    TokenCache::new(credentials, reqwest::Client::new(), clock)
        .with_safety_margin(Duration::from_secs(600))
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() -> Result<(), GatewayError> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=client_credentials");
            then.status(200)
                .header("content-type", "application/json")
                .delay(Duration::from_millis(200))
                .body(token_body("tok-shared", 3600));
        })
        .await;

    let cache = Arc::new(cache(&server, Arc::new(SystemClock)));
    let callers = (0..16).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_token().await })
    });
    let results = futures_util::future::join_all(callers).await;

    for result in results {
        assert_eq!(result.expect("task")?, "tok-shared");
    }
    mock.assert_calls(1);
    Ok(())
}

#[tokio::test]
async fn token_is_reused_until_the_safety_margin_then_refreshed() -> Result<(), GatewayError> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mut first = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-1", 3600));
        })
        .await;

    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let cache = cache(&server, clock.clone());

    assert_eq!(cache.get_token().await?, "tok-1");
    clock.advance(Duration::from_secs(2_999));
    assert_eq!(cache.get_token().await?, "tok-1");
    first.assert_calls(1);
    first.delete_async().await;

    let second = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-2", 3600));
        })
        .await;

    // 3000s in: inside the 600s margin of a 3600s token.
    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get_token().await?, "tok-2");
    second.assert_calls(1);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_keeps_previous_token_and_recovers() -> Result<(), GatewayError> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mut ok = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-old", 3600));
        })
        .await;

    let clock = Arc::new(ManualClock::new(0));
    let cache = cache(&server, clock.clone());
    assert_eq!(cache.get_token().await?, "tok-old");
    ok.delete_async().await;

    let mut down = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(503).body("maintenance");
        })
        .await;

    clock.advance(Duration::from_secs(3_500));
    let err = cache.get_token().await.unwrap_err();
    assert!(err.is_retryable());
    let kept = cache.cached().await.expect("previous token kept");
    assert_eq!(kept.value, "tok-old");
    down.delete_async().await;

    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-new", 3600));
        })
        .await;
    assert_eq!(cache.get_token().await?, "tok-new");
    Ok(())
}

#[tokio::test]
async fn invalidate_forces_a_refresh() -> Result<(), GatewayError> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok", 3600));
        })
        .await;

    let cache = cache(&server, Arc::new(ManualClock::new(0)));
    let token = cache.get_token().await?;
    assert!(cache.invalidate(&token).await);
    assert!(cache.cached().await.is_none());
    cache.get_token().await?;
    mock.assert_calls(2);
    Ok(())
}

#[tokio::test]
async fn late_invalidation_keeps_a_token_already_refreshed() -> Result<(), GatewayError> {
    if should_skip_httpmock() {
        return Ok(());
    }
    let server = MockServer::start_async().await;
    let mut first = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-1", 3600));
        })
        .await;

    let cache = cache(&server, Arc::new(ManualClock::new(0)));
    let rejected = cache.get_token().await?;
    first.delete_async().await;
    let second = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .header("content-type", "application/json")
                .body(token_body("tok-2", 3600));
        })
        .await;

    // Two callers saw a 401 for tok-1; the first one refreshes.
    assert!(cache.invalidate(&rejected).await);
    assert_eq!(cache.get_token().await?, "tok-2");
    assert!(!cache.invalidate(&rejected).await);
    assert_eq!(cache.get_token().await?, "tok-2");
    second.assert_calls(1);
    Ok(())
}
