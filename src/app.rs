/*
 * Responsibility
 * - Config読み込み → trust bootstrap → Router 組み立て
 * - Middleware の適用 (gate / security headers / request-id / trace / limits)
 * - axum::serve() で起動、SIGTERM / Ctrl-C で graceful shutdown
 */
use std::{panic, process, sync::Arc};

use anyhow::Result;
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::Config;
use crate::error::AppError;
use crate::middleware::{self, http::HttpLimits};
use crate::services::auth::refresh::TrustRefresher;
use crate::services::auth::trust::{TrustSnapshot, TrustStore};
use crate::services::auth::{build_gate, build_trust_source};
use crate::state::AppState;

fn init_tracing() {
    // RUST_LOG wins if set. Ex:
    // RUST_LOG=info,gateway_auth=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // stderr can be hidden depending on how the process is launched
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env()?;
    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting gateway in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let (state, refresher) = build_state(&config).await?;
    // Dropping the handle aborts the refresh task, so keep it alive for the server's lifetime.
    let refresh = refresher.spawn();

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh.shutdown();
    tracing::info!("gateway stopped");
    Ok(())
}

async fn build_state(config: &Config) -> Result<(AppState, Arc<TrustRefresher>)> {
    let trust = TrustStore::new(TrustSnapshot::empty(config.auth_issuers.iter().cloned()));

    let source = build_trust_source(config)?;
    tracing::info!(source = source.name(), "trust source configured");

    let refresher = Arc::new(TrustRefresher::new(
        source,
        trust.clone(),
        config.refresh.clone(),
    ));
    let snapshot = refresher.bootstrap().await?;
    if snapshot.is_empty() {
        tracing::warn!("serving with an empty trust snapshot; every protected request is rejected");
    }

    let gate = build_gate(config, trust.clone());
    Ok((AppState::new(gate, trust), refresher))
}

pub fn build_router(state: AppState) -> Router {
    async fn fallback() -> AppError {
        AppError::NotFound
    }

    let router = Router::new()
        .nest("/actuator", api::actuator::routes())
        .nest("/api/v1", api::v1::routes())
        .fallback(fallback);

    // Gate after nesting so it sees full paths and also covers the fallback.
    let router = middleware::auth::access::apply(router, state.clone()).with_state(state);
    let router = middleware::security_headers::apply(router);
    middleware::http::apply(router, HttpLimits::default())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
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
    tracing::info!("shutdown signal received");
}
