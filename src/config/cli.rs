use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Tollgate binary.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about = "Authenticating API gateway")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TOLLGATE_CONFIG_FILE",
        value_name = "PATH",
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the gateway.
    Serve,
    /// Resolve and validate configuration, print the route table, then exit.
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", env = "API_GATEWAY_PORT", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", env = "DATABASE_URL", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Enable or disable the response cache.
    #[arg(
        long = "response-cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
    )]
    pub response_cache_enabled: Option<bool>,

    /// Override the response cache TTL.
    #[arg(long = "response-cache-ttl-seconds", value_name = "SECONDS")]
    pub response_cache_ttl_seconds: Option<u64>,

    /// Override the largest body the response cache will store.
    #[arg(long = "response-cache-max-body-bytes", value_name = "BYTES")]
    pub response_cache_max_body_bytes: Option<usize>,

    /// Override the response cache entry limit.
    #[arg(long = "response-cache-max-entries", value_name = "COUNT")]
    pub response_cache_max_entries: Option<usize>,

    /// Where credentials are resolved (datastore|provider).
    #[arg(long = "identity-source", value_name = "SOURCE")]
    pub identity_source: Option<String>,

    /// Override the identity cache TTL.
    #[arg(long = "identity-ttl-seconds", value_name = "SECONDS")]
    pub identity_ttl_seconds: Option<u64>,

    /// Override the identity provider endpoint.
    #[arg(long = "identity-provider-url", value_name = "URL")]
    pub identity_provider_url: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "gateway-upstream-timeout-seconds", value_name = "SECONDS")]
    pub gateway_upstream_timeout_seconds: Option<u64>,
}
