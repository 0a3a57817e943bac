#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use time::OffsetDateTime;
use tollgate::application::{
    authorization::AuthorizationGate,
    identity::{IdentityBackend, IdentityProvider, IdentityResolver, ProviderError},
    repos::{AccountsRepo, RepoError},
};
use tollgate::cache::{CacheConfig, IdentityStore, ResponseCacheState};
use tollgate::config::{GatewaySettings, RouteSettings};
use tollgate::domain::accounts::{AccountStanding, ResolvedIdentity, UserRecord};
use tollgate::infra::http::{GatewayState, GuardState, build_router};
use url::Url;

/// In-memory `app_user` table.
#[derive(Default)]
pub struct MemoryAccounts {
    rows: Mutex<HashMap<String, Account>>,
    pub token_lookups: AtomicUsize,
    pub fail: AtomicBool,
}

#[derive(Clone)]
struct Account {
    id: i32,
    token: String,
    role: String,
    banned_till: Option<OffsetDateTime>,
}

impl MemoryAccounts {
    pub fn with_user(self, email: &str, token: &str, role: &str) -> Self {
        let id = self.rows.lock().unwrap().len() as i32 + 1;
        self.rows.lock().unwrap().insert(
            email.to_string(),
            Account {
                id,
                token: token.to_string(),
                role: role.to_string(),
                banned_till: None,
            },
        );
        self
    }

    pub fn ban(&self, email: &str, till: OffsetDateTime) {
        if let Some(account) = self.rows.lock().unwrap().get_mut(email) {
            account.banned_till = Some(till);
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountsRepo for MemoryAccounts {
    async fn find_identity_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ResolvedIdentity>, RepoError> {
        self.token_lookups.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|(_, account)| account.token == token)
            .map(|(email, account)| ResolvedIdentity::new(email.clone(), account.role.clone())))
    }

    async fn find_standing_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AccountStanding>, RepoError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(email)
            .map(|account| AccountStanding {
                role: account.role.clone(),
                banned_till: account.banned_till,
            }))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(email)
            .map(|account| UserRecord {
                id: account.id,
                email: email.to_string(),
                role: account.role.clone(),
            }))
    }
}

/// Provider that knows a fixed token → email table.
pub struct StaticProvider(pub HashMap<String, String>);

#[async_trait]
impl IdentityProvider for StaticProvider {
    async fn verify(&self, token: &str) -> Result<String, ProviderError> {
        self.0.get(token).cloned().ok_or(ProviderError::Status(401))
    }
}

/// Backend stand-in listening on loopback. Counts every request it serves.
pub struct Backend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("backend url")
    }
}

pub async fn spawn_backend() -> Backend {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move |method: Method, uri: Uri, headers: HeaderMap| {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            backend_response(n, method, uri, headers)
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind backend");
    let addr = listener.local_addr().expect("backend addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Backend { addr, hits }
}

fn backend_response(n: usize, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    let echoed = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let echo = serde_json::json!({
        "n": n,
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query().unwrap_or(""),
        "email": echoed("x-auth-email"),
        "role": echoed("x-auth-role"),
        "authorization": echoed("authorization"),
        "secret": echoed("x-gateway-secret"),
    });

    match uri.path() {
        "/nostore" => {
            let headers = [(header::CACHE_CONTROL, "no-store")];
            (headers, axum::Json(echo)).into_response()
        }
        "/missing" => (StatusCode::NOT_FOUND, axum::Json(echo)).into_response(),
        "/big" => "x".repeat(8 * 1024).into_response(),
        _ => {
            let headers = [(header::CACHE_CONTROL, "public, max-age=600")];
            (headers, axum::Json(echo)).into_response()
        }
    }
}

/// Port nothing listens on.
pub async fn closed_port_url() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    Url::parse(&format!("http://{addr}")).expect("url")
}

pub fn routes(auth: Url, comm: Url) -> Vec<RouteSettings> {
    vec![
        RouteSettings {
            prefix: "/auth".to_string(),
            upstream: auth,
            public_paths: vec!["/yandex".to_string()],
            cache: false,
        },
        RouteSettings {
            prefix: "/comm".to_string(),
            upstream: comm,
            public_paths: Vec::new(),
            cache: true,
        },
    ]
}

pub fn gateway_settings(shared_secret: Option<&str>) -> GatewaySettings {
    GatewaySettings {
        shared_secret: shared_secret.map(str::to_string),
        upstream_timeout: Duration::from_secs(5),
        cors_allow_origins: Vec::new(),
    }
}

pub fn cache_config(ttl_seconds: u64) -> CacheConfig {
    CacheConfig {
        response_ttl_seconds: ttl_seconds,
        response_max_body_bytes: 4096,
        ..Default::default()
    }
}

pub fn state_with(
    backend: IdentityBackend,
    accounts: Arc<MemoryAccounts>,
    cache: CacheConfig,
) -> GatewayState {
    let identities = Arc::new(IdentityStore::new(cache.identity_ttl()));
    let resolver = IdentityResolver::new(backend, identities);
    let gate = AuthorizationGate::new(accounts);
    GatewayState {
        guard: GuardState::new(resolver, gate, "token"),
        response_cache: ResponseCacheState::new(cache),
        db: None,
    }
}

pub fn datastore_gateway(
    accounts: Arc<MemoryAccounts>,
    routes: &[RouteSettings],
    cache: CacheConfig,
    shared_secret: Option<&str>,
) -> Router {
    let state = state_with(
        IdentityBackend::Datastore(accounts.clone()),
        accounts,
        cache,
    );
    build_router(state, routes, &gateway_settings(shared_secret)).expect("router")
}

pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    request(Method::GET, uri, headers)
}

pub fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn body_bytes(response: Response) -> bytes::Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
