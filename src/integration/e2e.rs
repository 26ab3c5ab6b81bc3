//! End-to-end integration tests

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::util::ServiceExt;

use super::fixtures::{fast_relay_config, read_body_prefix, test_state, wait_until, MockTranscoder};
use crate::cache::Freshness;
use crate::config::RelayConfig;
use crate::http::create_router;
use crate::refresh::tests::ScriptedResolver;
use crate::resolver::ResolutionResult;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_demo_station_streams_and_unknown_is_404() {
    let resolver = Arc::new(ScriptedResolver::default());
    resolver
        .script
        .lock()
        .push_back(ResolutionResult::Success("rtmp://resolved-A".into()));
    let transcoder = Arc::new(MockTranscoder::streaming());
    let state = test_state(
        &[("demo", "locator-A")],
        resolver.clone(),
        transcoder.clone(),
        fast_relay_config(),
    );
    let app = create_router(Arc::clone(&state));

    let response = app.clone().oneshot(get("/demo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let expected = b"MOCKMP3:rtmp://resolved-A";
    let (data, rest) = read_body_prefix(response.into_body(), expected.len()).await;
    assert_eq!(&data[..expected.len()], &expected[..]);
    assert_eq!(transcoder.urls(), vec!["rtmp://resolved-A".to_string()]);
    assert_eq!(resolver.calls(), 1);

    let response = app.oneshot(get("/unknown")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // client goes away: the transcoder is reaped, not just signalled
    drop(rest);
    wait_until("session cleanup", || state.relay.session_count() == 0).await;
    let counts = state.relay.tracker().counts();
    assert_eq!(counts.spawned, 1);
    assert_eq!(counts.reaped, 1);
    assert_eq!(counts.abandoned, 0);
    assert_eq!(counts.live, 0);
}

#[tokio::test]
async fn test_restarts_three_times_then_streams() {
    let transcoder = Arc::new(MockTranscoder::streaming().failing_first(3));
    let backoff = Duration::from_secs(1);
    let state = test_state(
        &[("demo", "locator-A")],
        Arc::new(ScriptedResolver::always(ResolutionResult::Success(
            "rtmp://resolved-A".into(),
        ))),
        transcoder.clone(),
        RelayConfig {
            restart_backoff_secs: backoff.as_secs(),
            ..fast_relay_config()
        },
    );
    let app = create_router(Arc::clone(&state));

    let started = Instant::now();
    let response = app.oneshot(get("/demo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (data, _rest) = read_body_prefix(response.into_body(), 7).await;
    let elapsed = started.elapsed();
    assert!(data.starts_with(b"MOCKMP3"));

    assert!(elapsed >= backoff * 3, "restarted too early: {elapsed:?}");
    assert!(elapsed < backoff * 3 + Duration::from_secs(3), "too slow: {elapsed:?}");

    assert_eq!(transcoder.spawns(), 4);
    let counts = state.relay.tracker().counts();
    assert_eq!(counts.reaped, 3);
    assert_eq!(counts.live, 1);
    assert_eq!(counts.abandoned, 0);

    let sessions = state.relay.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].restarts, 3);
}

#[tokio::test]
async fn test_scheduler_warmed_cache_serves_without_resolving() {
    let resolver = Arc::new(ScriptedResolver::default());
    let transcoder = Arc::new(MockTranscoder::streaming());
    let state = test_state(
        &[("alpha", "locator-alpha"), ("bravo", "locator-bravo")],
        resolver.clone(),
        transcoder.clone(),
        fast_relay_config(),
    );

    let scheduler = state.start_scheduler();
    wait_until("first scheduler pass", || state.scheduler_status.passes() >= 1).await;
    assert_eq!(resolver.calls(), 2);
    for station in ["alpha", "bravo"] {
        assert_eq!(state.cache.entry(station).unwrap().freshness, Freshness::Fresh);
    }

    let app = create_router(Arc::clone(&state));
    let response = app.oneshot(get("/play/bravo")).await.unwrap();
    let expected = b"MOCKMP3:resolved:locator-bravo";
    let (data, rest) = read_body_prefix(response.into_body(), expected.len()).await;
    assert_eq!(&data[..expected.len()], &expected[..]);

    // the session used the cached URL
    assert_eq!(resolver.calls(), 2);

    drop(rest);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_failing_station_does_not_affect_others() {
    let resolver = Arc::new(ScriptedResolver::default());
    let state = test_state(
        &[("bad", "locator-bad"), ("good", "locator-good")],
        resolver.clone(),
        Arc::new(MockTranscoder::streaming()),
        RelayConfig {
            max_resolve_attempts: 1,
            ..fast_relay_config()
        },
    );
    // first call is for "bad" since passes run in name order
    resolver
        .script
        .lock()
        .push_back(ResolutionResult::ExtractorError("ERROR: Unable to extract".into()));
    crate::scheduler::run_pass(&state.refresher).await;
    *resolver.fallback.lock() = Some(ResolutionResult::Offline);

    assert_eq!(state.cache.entry("bad").unwrap().freshness, Freshness::Failed);
    assert_eq!(state.cache.entry("good").unwrap().freshness, Freshness::Fresh);

    let app = create_router(Arc::clone(&state));

    // the unresolvable station gives up and closes an empty stream
    let response = app.clone().oneshot(get("/bad")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .unwrap();
    assert!(first.is_none());

    let response = app.oneshot(get("/good")).await.unwrap();
    let (data, _rest) = read_body_prefix(response.into_body(), 8).await;
    assert_eq!(&data[..8], b"MOCKMP3:");
}

#[tokio::test]
async fn test_debug_sessions_reports_live_session() {
    let state = test_state(
        &[("demo", "locator-A")],
        Arc::new(ScriptedResolver::default()),
        Arc::new(MockTranscoder::streaming()),
        fast_relay_config(),
    );
    let app = create_router(Arc::clone(&state));

    let response = app.clone().oneshot(get("/demo")).await.unwrap();
    let (_data, rest) = read_body_prefix(response.into_body(), 1).await;

    let response = app.oneshot(get("/debug/sessions")).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["count"], 1);
    assert_eq!(json["sessions"][0]["station"], "demo");
    assert_eq!(json["sessions"][0]["state"], "streaming");
    assert_eq!(json["processes"]["live"], 1);

    drop(rest);
    wait_until("session cleanup", || state.relay.session_count() == 0).await;
}
