//! Gateway router: prefix groups, guards, response cache and forwarding.

mod guard;
mod middleware;
mod proxy;
pub mod trust;

pub use guard::GuardState;
pub use middleware::RequestContext;
pub use proxy::Upstream;
pub use trust::{TrustState, TrustedUser, trusted_user};

use axum::{
    Router,
    extract::State,
    http::{HeaderValue, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use sqlx::Error as SqlxError;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::application::error::ErrorReport;
use crate::cache::{ResponseCacheState, response_cache_layer};
use crate::config::{GatewaySettings, RouteSettings};
use crate::infra::{db::PostgresRepositories, error::InfraError};

/// Email of the authenticated caller, set by the gateway only.
pub const AUTH_EMAIL_HEADER: &str = "x-auth-email";
/// Role of the authenticated caller, set by the gateway only.
pub const AUTH_ROLE_HEADER: &str = "x-auth-role";
/// Shared secret proving a request came through the gateway.
pub const GATEWAY_SECRET_HEADER: &str = "x-gateway-secret";

#[derive(Clone)]
pub struct GatewayState {
    pub guard: GuardState,
    pub response_cache: ResponseCacheState,
    /// Absent only when the gateway runs without a datastore (tests).
    pub db: Option<PostgresRepositories>,
}

pub fn build_router(
    state: GatewayState,
    routes: &[RouteSettings],
    gateway: &GatewaySettings,
) -> Result<Router, InfraError> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|err| InfraError::http_client(format!("upstream client: {err}")))?;

    let mut router = Router::new()
        .route("/_health", get(liveness))
        .route("/_health/db", get(db_health))
        .with_state(state.db.clone());

    for route in routes {
        let upstream = Upstream::new(
            route.name(),
            route.upstream.clone(),
            client.clone(),
            gateway.upstream_timeout,
            gateway.shared_secret.as_deref(),
        )?;
        info!(
            target = "tollgate::http",
            prefix = %route.prefix,
            upstream = %route.upstream,
            public_paths = ?route.public_paths,
            cache = route.cache,
            "route group registered"
        );
        // Nested as a service so `<prefix>/` reaches the group as well.
        router = router.nest_service(&route.prefix, route_group(route, upstream, &state));
    }

    Ok(router
        .layer(from_fn(guard::strip_identity_headers))
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
        .layer(cors_layer(gateway)))
}

/// Public sub-paths go straight to the upstream. Everything else runs
/// resolve → authorize → (cache) → forward.
fn route_group(route: &RouteSettings, upstream: Upstream, state: &GatewayState) -> Router {
    let mut guarded = Router::new()
        .route("/", any(proxy::forward))
        .route("/{*rest}", any(proxy::forward))
        .with_state(upstream.clone());

    if route.cache {
        guarded = guarded.layer(from_fn_with_state(
            state.response_cache.clone(),
            response_cache_layer,
        ));
    }

    let guarded = guarded
        .layer(from_fn_with_state(
            state.guard.clone(),
            guard::authorize_account,
        ))
        .layer(from_fn_with_state(
            state.guard.clone(),
            guard::resolve_identity,
        ));

    route
        .public_paths
        .iter()
        .fold(Router::new(), |public, path| {
            public.route(path, any(proxy::forward))
        })
        .with_state(upstream)
        .merge(guarded)
}

fn cors_layer(gateway: &GatewaySettings) -> CorsLayer {
    let origins = &gateway.cors_allow_origins;
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn db_health(State(db): State<Option<PostgresRepositories>>) -> Response {
    match db {
        Some(repos) => db_health_response(repos.health_check().await),
        None => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_message(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                "no datastore configured",
            )
            .attach(&mut response);
            response
        }
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
