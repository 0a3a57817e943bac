use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::Path,
    http::{Method, Request, StatusCode},
    middleware,
    routing::get,
};
use metrics_util::debugging::DebuggingRecorder;
use tollgate::cache::{CacheConfig, IdentityStore, ResponseCacheState, response_cache_layer};
use tollgate::domain::accounts::ResolvedIdentity;
use tollgate::infra::telemetry;
use tower::ServiceExt;

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    // Identity cache hit/miss
    let identities = IdentityStore::new(Duration::from_secs(60));
    assert!(identities.get("tok").is_none());
    identities.insert("tok", ResolvedIdentity::new("alice@example.com", "user"));
    assert!(identities.get("tok").is_some());

    // Response cache hit/miss/evict/bypass through the middleware path
    let cache_state = ResponseCacheState::new(CacheConfig {
        response_max_entries: 1,
        response_max_body_bytes: 4096,
        ..Default::default()
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);
    let app = Router::new()
        .route(
            "/tags/{slug}",
            get(move |Path(_slug): Path<String>| {
                let calls = Arc::clone(&handler_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    "tag"
                }
            })
            .post(|| async { StatusCode::CREATED }),
        )
        .layer(middleware::from_fn_with_state(
            cache_state.clone(),
            response_cache_layer,
        ));

    for (method, uri) in [
        (Method::GET, "/tags/one"),
        (Method::GET, "/tags/one"),
        (Method::GET, "/tags/two"),
        (Method::POST, "/tags/two"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        assert!(response.status().is_success());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache_state.store.len(), 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tollgate_response_cache_hit_total",
        "tollgate_response_cache_miss_total",
        "tollgate_response_cache_evict_total",
        "tollgate_response_cache_bypass_total",
        "tollgate_identity_cache_hit_total",
        "tollgate_identity_cache_miss_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
