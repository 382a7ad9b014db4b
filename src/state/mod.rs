/// Live game server view.
pub mod server;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::AppConfig, control::ControlClient, pipe::SupervisorHandle,
    services::reconciliation::PlayerReconciler,
};

use self::server::ServerSession;

/// State handle cloned into every handler.
pub type SharedState = Arc<AppState>;

#[derive(Clone)]
/// Handle used to push messages to a connected dashboard client.
pub struct ClientConnection {
    /// Identifier assigned on connect.
    pub id: Uuid,
    /// Queue drained by the client's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Process-wide context built once at startup and torn down by [`AppState::shutdown`].
pub struct AppState {
    config: Arc<AppConfig>,
    reconciler: PlayerReconciler,
    session: ServerSession,
    supervisor: SupervisorHandle,
    control: ControlClient,
    clients: DashMap<Uuid, ClientConnection>,
    shutting_down: watch::Sender<bool>,
}

impl AppState {
    /// Wrap the already-built components in a [`SharedState`].
    pub fn new(
        config: AppConfig,
        reconciler: PlayerReconciler,
        session: ServerSession,
        supervisor: SupervisorHandle,
        control: ControlClient,
    ) -> SharedState {
        let (shutting_down, _rx) = watch::channel(false);
        Arc::new(Self {
            config: Arc::new(config),
            reconciler,
            session,
            supervisor,
            control,
            clients: DashMap::new(),
            shutting_down,
        })
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Player reconciliation engine.
    pub fn reconciler(&self) -> &PlayerReconciler {
        &self.reconciler
    }

    /// Liveness flag and merged server data.
    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Pipe supervisor.
    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    /// Remote console client.
    pub fn control(&self) -> &ControlClient {
        &self.control
    }

    /// Registry of connected websocket clients.
    pub fn clients(&self) -> &DashMap<Uuid, ClientConnection> {
        &self.clients
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutting_down.borrow()
    }

    /// Subscribe to the shutdown flag.
    pub fn shutdown_watcher(&self) -> watch::Receiver<bool> {
        self.shutting_down.subscribe()
    }

    /// Mark shutting down, stop the control channel, then the pipe workers, then close every
    /// websocket. Running it twice is harmless.
    pub async fn shutdown(&self) {
        if self.shutting_down.send_replace(true) {
            return;
        }
        info!("shutting down");

        self.control.stop().await;
        self.supervisor.stop().await;

        for client in self.clients.iter() {
            let _ = client.tx.send(Message::Close(None));
        }
        self.clients.clear();
        info!("shutdown complete");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{path::PathBuf, sync::Arc};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::{ControlConfig, PipeConfig, StorageConfig},
        control::{ControlConnection, ControlConnector, ControlError},
        dao::{game_tables::SqliteGameTables, player_store::SqliteSnapshotStore},
        pipe::{PipeWorkers, ReadMode, SupervisorTimings},
    };

    struct Unreachable;

    impl ControlConnector for Unreachable {
        fn connect(&self) -> BoxFuture<'static, Result<Box<dyn ControlConnection>, ControlError>> {
            Box::pin(async {
                Err(ControlError::Refused {
                    addr: "localhost:27015".into(),
                })
            })
        }
    }

    pub(crate) fn config(api_key: Option<&str>) -> AppConfig {
        AppConfig {
            debug: api_key.is_none(),
            http_port: 8080,
            pipes: PipeConfig {
                inpipe: PathBuf::from("/nonexistent/inpipe"),
                outpipe: PathBuf::from("/nonexistent/outpipe"),
                read_mode: ReadMode::WholeFile,
            },
            storage: StorageConfig {
                snapshot_db: PathBuf::from(":memory:"),
                sessions_db: None,
                whitelist_db: None,
            },
            control: ControlConfig {
                host: "localhost".into(),
                port: 27015,
                password: String::new(),
            },
            api_key: api_key.map(str::to_owned),
        }
    }

    /// State over in-memory stores, with workers and control channel never started.
    pub(crate) async fn state() -> (SharedState, SqliteGameTables) {
        let tables = SqliteGameTables::stand_in_for_tests().await;
        let reconciler = PlayerReconciler::new(
            Arc::new(SqliteSnapshotStore::in_memory().await.unwrap()),
            Arc::new(tables.clone()),
        );
        let config = config(Some("secret"));
        let session = ServerSession::new();
        let supervisor = SupervisorHandle::spawn(
            Arc::new(PipeWorkers::new(&config.pipes)),
            session.clone(),
            reconciler.clone(),
            SupervisorTimings::default(),
        );
        let control = ControlClient::spawn(Arc::new(Unreachable));
        (
            AppState::new(config, reconciler, session, supervisor, control),
            tables,
        )
    }
}
