use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use tokio::sync::Notify;
use tollgate::{
    application::{
        authorization::AuthorizationGate,
        error::AppError,
        identity::{IdentityBackend, IdentityProvider, IdentityResolver},
        repos::AccountsRepo,
    },
    cache::{CacheConfig, IdentityStore, ResponseCacheState},
    config::{self, IdentitySourceKind},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, GatewayState, GuardState},
        identity_provider::HttpIdentityProvider,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args.command.unwrap_or(config::Command::Serve);

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve => run_serve(settings).await,
        config::Command::CheckConfig => check_config(&settings),
    }
}

fn check_config(settings: &config::Settings) -> Result<(), AppError> {
    for route in &settings.routes {
        info!(
            prefix = %route.prefix,
            upstream = %route.upstream,
            public_paths = ?route.public_paths,
            cache = route.cache,
            "route"
        );
    }
    info!(
        addr = %settings.server.addr,
        identity_source = ?settings.identity.source,
        response_cache = settings.response_cache.enabled,
        database_configured = settings.database.url.is_some(),
        "configuration is valid"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let state = build_gateway_state(repositories, &settings)?;
    serve_http(&settings, state).await
}

async fn init_repositories(settings: &config::Settings) -> Result<PostgresRepositories, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(
        database_url,
        settings.database.max_connections.get(),
        settings.database.acquire_timeout,
    )
    .await
    .map_err(|err| InfraError::database(err.to_string()))?;

    Ok(PostgresRepositories::new(pool))
}

fn build_gateway_state(
    repositories: PostgresRepositories,
    settings: &config::Settings,
) -> Result<GatewayState, AppError> {
    let accounts: Arc<dyn AccountsRepo> = Arc::new(repositories.clone());
    let cache_config = CacheConfig::from(settings);

    let backend = match settings.identity.source {
        IdentitySourceKind::Datastore => IdentityBackend::Datastore(accounts.clone()),
        IdentitySourceKind::Provider => {
            let provider: Arc<dyn IdentityProvider> =
                Arc::new(HttpIdentityProvider::from_settings(&settings.identity)?);
            IdentityBackend::Provider(provider)
        }
    };

    let identity_cache = Arc::new(IdentityStore::new(cache_config.identity_ttl()));
    let resolver = IdentityResolver::new(backend, identity_cache);
    let gate = AuthorizationGate::new(accounts);

    Ok(GatewayState {
        guard: GuardState::new(resolver, gate, &settings.identity.query_param),
        response_cache: ResponseCacheState::new(cache_config),
        db: Some(repositories),
    })
}

async fn serve_http(settings: &config::Settings, state: GatewayState) -> Result<(), AppError> {
    let router = http::build_router(state, &settings.routes, &settings.gateway)?;

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "gateway listening");

    let draining = Arc::new(Notify::new());
    let signalled = draining.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        signalled.notify_one();
    })
    .into_future();

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out, dropping connections"
            );
        }
    }

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
