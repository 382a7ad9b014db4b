//! BrainSlug bridge entrypoint wiring the game pipes, the remote console, SQLite and the HTTP API.

use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, runtime::Runtime};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainslug_bridge::{
    config::AppConfig,
    control::{ControlClient, RconConnector},
    dao::{game_tables::SqliteGameTables, player_store::SqliteSnapshotStore},
    pipe::{PipeWorkers, SupervisorHandle, SupervisorTimings},
    routes,
    services::{reconciliation::PlayerReconciler, websocket_service},
    state::{AppState, SharedState, server::ServerSession},
};

/// How long runtime teardown waits for blocking threads before leaving them behind.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    init_tracing(env::var("DEBUG").is_ok_and(|value| !value.trim().is_empty()));

    let runtime = build_runtime()?;
    let outcome = runtime.block_on(run());
    shutdown_runtime(runtime);
    outcome
}

fn build_runtime() -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
}

/// Pipe opens run on blocking threads and a FIFO open only returns once the game holds the
/// other end, so an aborted worker can leave one parked forever. Teardown must not wait on it.
fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    info!("runtime stopped");
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    let snapshots = SqliteSnapshotStore::open(&config.storage.snapshot_db)
        .await
        .context("opening snapshot store")?;
    let tables = SqliteGameTables::open(
        config.storage.sessions_db.as_deref(),
        config.storage.whitelist_db.as_deref(),
    )
    .await
    .context("opening game tables")?;
    let reconciler = PlayerReconciler::new(Arc::new(snapshots), Arc::new(tables));

    let session = ServerSession::new();
    let supervisor = SupervisorHandle::spawn(
        Arc::new(PipeWorkers::new(&config.pipes)),
        session.clone(),
        reconciler.clone(),
        SupervisorTimings::default(),
    );
    let control = ControlClient::spawn(Arc::new(RconConnector::new(&config.control)));

    let port = config.http_port;
    let app_state = AppState::new(config, reconciler, session, supervisor, control);
    app_state.supervisor().start();
    app_state.control().start();
    websocket_service::spawn_info_broadcaster(app_state.clone());

    let app = build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal(app_state.clone()))
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers; `RUST_LOG` wins over the `DEBUG` default.
fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info,tower_http=debug" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for a termination signal, then stop the control channel, the pipes and the clients
/// before the HTTP server drains.
async fn shutdown_signal(state: SharedState) {
    wait_for_signal().await;
    state.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use futures::future::select_all;
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::user_defined1(),
        SignalKind::user_defined2(),
    ];
    let mut streams = Vec::with_capacity(kinds.len());
    for kind in kinds {
        match signal(kind) {
            Ok(stream) => streams.push(stream),
            Err(err) => warn!(error = %err, ?kind, "failed to install signal handler"),
        }
    }

    if streams.is_empty() {
        let _ = tokio::signal::ctrl_c().await;
        return;
    }
    select_all(streams.iter_mut().map(|stream| Box::pin(stream.recv()))).await;
    info!("termination signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
