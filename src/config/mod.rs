//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashSet,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tollgate";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RESPONSE_CACHE_TTL_SECS: u64 = 5;
const DEFAULT_RESPONSE_CACHE_MAX_BODY_BYTES: usize = 512 * 1024;
const DEFAULT_RESPONSE_CACHE_MAX_ENTRIES: usize = 256;
const DEFAULT_IDENTITY_TTL_SECS: u64 = 60;
const DEFAULT_IDENTITY_QUERY_PARAM: &str = "token";
const DEFAULT_IDENTITY_PROVIDER_URL: &str = "https://login.yandex.ru/info?format=json";
const DEFAULT_IDENTITY_PROVIDER_TIMEOUT_SECS: u64 = 5;
const DEFAULT_IDENTITY_PROVIDER_SCHEME: &str = "OAuth";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub response_cache: ResponseCacheSettings,
    pub identity: IdentitySettings,
    pub gateway: GatewaySettings,
    pub routes: Vec<RouteSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResponseCacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_body_bytes: NonZeroUsize,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySourceKind {
    /// `app_user.token` lookup.
    Datastore,
    /// External OAuth info endpoint.
    Provider,
}

impl FromStr for IdentitySourceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "datastore" | "database" => Ok(Self::Datastore),
            "provider" => Ok(Self::Provider),
            other => Err(format!("unknown identity source `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub source: IdentitySourceKind,
    pub ttl: Duration,
    pub query_param: String,
    pub provider_url: Url,
    pub provider_timeout: Duration,
    /// Authorization scheme sent to the provider; empty sends the bare token.
    pub provider_scheme: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub shared_secret: Option<String>,
    pub upstream_timeout: Duration,
    pub cors_allow_origins: Vec<String>,
}

/// One prefix group: everything under `prefix` is forwarded to `upstream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSettings {
    pub prefix: String,
    pub upstream: Url,
    /// Sub-paths (relative to the prefix) reachable without a credential.
    pub public_paths: Vec<String>,
    pub cache: bool,
}

impl RouteSettings {
    pub fn name(&self) -> &str {
        self.prefix.trim_start_matches('/')
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TOLLGATE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_serve_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    response_cache: RawResponseCacheSettings,
    identity: RawIdentitySettings,
    gateway: RawGatewaySettings,
    routes: Option<Vec<RawRouteSettings>>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.response_cache_enabled {
            self.response_cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.response_cache_ttl_seconds {
            self.response_cache.ttl_seconds = Some(ttl);
        }
        if let Some(limit) = overrides.response_cache_max_body_bytes {
            self.response_cache.max_body_bytes = Some(limit);
        }
        if let Some(limit) = overrides.response_cache_max_entries {
            self.response_cache.max_entries = Some(limit);
        }
        if let Some(source) = overrides.identity_source.as_ref() {
            self.identity.source = Some(source.clone());
        }
        if let Some(ttl) = overrides.identity_ttl_seconds {
            self.identity.ttl_seconds = Some(ttl);
        }
        if let Some(url) = overrides.identity_provider_url.as_ref() {
            self.identity.provider_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.gateway_upstream_timeout_seconds {
            self.gateway.upstream_timeout_seconds = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            response_cache,
            identity,
            gateway,
            routes,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            response_cache: build_response_cache_settings(response_cache)?,
            identity: build_identity_settings(identity)?,
            gateway: build_gateway_settings(gateway)?,
            routes: build_routes(routes.unwrap_or_else(default_routes))?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    Ok(ServerSettings {
        addr,
        graceful_shutdown: non_zero_secs(graceful_secs, "server.graceful_shutdown_seconds")?,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_timeout = non_zero_secs(
        database
            .acquire_timeout_seconds
            .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_SECS),
        "database.acquire_timeout_seconds",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout,
    })
}

fn build_response_cache_settings(
    cache: RawResponseCacheSettings,
) -> Result<ResponseCacheSettings, LoadError> {
    let ttl = non_zero_secs(
        cache.ttl_seconds.unwrap_or(DEFAULT_RESPONSE_CACHE_TTL_SECS),
        "response_cache.ttl_seconds",
    )?;
    let max_body_bytes = non_zero_usize(
        cache
            .max_body_bytes
            .unwrap_or(DEFAULT_RESPONSE_CACHE_MAX_BODY_BYTES),
        "response_cache.max_body_bytes",
    )?;
    let max_entries = non_zero_usize(
        cache
            .max_entries
            .unwrap_or(DEFAULT_RESPONSE_CACHE_MAX_ENTRIES),
        "response_cache.max_entries",
    )?;

    Ok(ResponseCacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl,
        max_body_bytes,
        max_entries,
    })
}

fn build_identity_settings(identity: RawIdentitySettings) -> Result<IdentitySettings, LoadError> {
    let source = match identity.source {
        Some(value) => IdentitySourceKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("identity.source", reason))?,
        None => IdentitySourceKind::Datastore,
    };

    let ttl = non_zero_secs(
        identity.ttl_seconds.unwrap_or(DEFAULT_IDENTITY_TTL_SECS),
        "identity.ttl_seconds",
    )?;

    let query_param = identity
        .query_param
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_IDENTITY_QUERY_PARAM.to_string());
    if query_param.is_empty() {
        return Err(LoadError::invalid(
            "identity.query_param",
            "must not be empty",
        ));
    }

    let provider_url = parse_http_url(
        identity
            .provider_url
            .as_deref()
            .unwrap_or(DEFAULT_IDENTITY_PROVIDER_URL),
        "identity.provider_url",
    )?;

    let provider_timeout = non_zero_secs(
        identity
            .provider_timeout_seconds
            .unwrap_or(DEFAULT_IDENTITY_PROVIDER_TIMEOUT_SECS),
        "identity.provider_timeout_seconds",
    )?;

    let provider_scheme = identity
        .provider_scheme
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_IDENTITY_PROVIDER_SCHEME.to_string());

    Ok(IdentitySettings {
        source,
        ttl,
        query_param,
        provider_url,
        provider_timeout,
        provider_scheme,
    })
}

fn build_gateway_settings(gateway: RawGatewaySettings) -> Result<GatewaySettings, LoadError> {
    let shared_secret = gateway.shared_secret.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let upstream_timeout = non_zero_secs(
        gateway
            .upstream_timeout_seconds
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        "gateway.upstream_timeout_seconds",
    )?;

    let cors_allow_origins = gateway
        .cors_allow_origins
        .unwrap_or_default()
        .into_iter()
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty())
        .collect();

    Ok(GatewaySettings {
        shared_secret,
        upstream_timeout,
        cors_allow_origins,
    })
}

fn build_routes(raw: Vec<RawRouteSettings>) -> Result<Vec<RouteSettings>, LoadError> {
    if raw.is_empty() {
        return Err(LoadError::invalid(
            "routes",
            "at least one route group is required",
        ));
    }

    let mut seen = HashSet::new();
    let mut routes = Vec::with_capacity(raw.len());

    for route in raw {
        let prefix = normalize_path(&route.prefix);
        if prefix == "/" {
            return Err(LoadError::invalid(
                "routes.prefix",
                "prefix must name a path segment, `/` is not allowed",
            ));
        }
        if !seen.insert(prefix.clone()) {
            return Err(LoadError::invalid(
                "routes.prefix",
                format!("duplicate prefix `{prefix}`"),
            ));
        }

        let upstream = parse_http_url(&route.upstream, "routes.upstream")?;

        let mut public_paths = Vec::with_capacity(route.public_paths.len());
        for path in &route.public_paths {
            let path = normalize_path(path);
            if path == "/" {
                return Err(LoadError::invalid(
                    "routes.public_paths",
                    format!("`{prefix}` cannot expose its root publicly"),
                ));
            }
            public_paths.push(path);
        }

        routes.push(RouteSettings {
            prefix,
            upstream,
            public_paths,
            cache: route.cache.unwrap_or(true),
        });
    }

    Ok(routes)
}

fn default_routes() -> Vec<RawRouteSettings> {
    vec![
        RawRouteSettings {
            prefix: "/auth".to_string(),
            upstream: "http://auth:8001".to_string(),
            public_paths: vec!["/yandex".to_string()],
            cache: Some(false),
        },
        RawRouteSettings {
            prefix: "/comm".to_string(),
            upstream: "http://comm:8002".to_string(),
            public_paths: Vec::new(),
            cache: Some(true),
        },
        RawRouteSettings {
            prefix: "/serv".to_string(),
            upstream: "http://serv:8003".to_string(),
            public_paths: Vec::new(),
            cache: Some(true),
        },
    ]
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResponseCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    max_body_bytes: Option<usize>,
    max_entries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    source: Option<String>,
    ttl_seconds: Option<u64>,
    query_param: Option<String>,
    provider_url: Option<String>,
    provider_timeout_seconds: Option<u64>,
    provider_scheme: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGatewaySettings {
    shared_secret: Option<String>,
    upstream_timeout_seconds: Option<u64>,
    cors_allow_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRouteSettings {
    prefix: String,
    upstream: String,
    #[serde(default)]
    public_paths: Vec<String>,
    #[serde(default)]
    cache: Option<bool>,
}

/// Leading slash, no trailing slash.
fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    format!("/{trimmed}")
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(raw: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{raw}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}` in `{raw}`"),
        )),
    }
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
