//! Pipe supervisor: owns both workers, restarts them, runs the liveness handshake and the
//! `info` poll, and turns event payloads into session and Snapshot Store updates.
//!
//! All supervisor state lives inside one actor task. Callers talk to it through
//! [`SupervisorHandle`]; workers talk to it through their [`WorkerLink`].

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use super::{
    GameCommand, GameEvent, WorkerControl, WorkerEvent, WorkerFactory, WorkerKind, WorkerLink,
    refresh::RefreshTimer,
};
use crate::{
    dto::info::ServerStatus,
    error::ServiceError,
    services::reconciliation::{PlayerReconciler, now_ms},
    state::server::ServerSession,
};

/// Delays driving worker restarts and the `info` poll.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimings {
    /// Wait before respawning a worker that exited on its own.
    pub restart_delay: Duration,
    /// Period of the `info` poll once the game answered `pong`.
    pub refresh_interval: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(2_500),
            refresh_interval: Duration::from_secs(1),
        }
    }
}

/// Messages processed by the supervisor actor.
pub(crate) enum SupervisorMsg {
    Start,
    Command(GameCommand),
    Stop(oneshot::Sender<()>),
    Worker {
        kind: WorkerKind,
        generation: u64,
        event: WorkerEvent,
    },
    Exited {
        kind: WorkerKind,
        generation: u64,
        outcome: Result<(), String>,
    },
    Respawn(WorkerKind),
}

/// Cloneable handle to the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorMsg>,
}

impl SupervisorHandle {
    /// Spawn the actor idle; workers start on [`SupervisorHandle::start`].
    pub fn spawn(
        factory: Arc<dyn WorkerFactory>,
        session: ServerSession,
        reconciler: PlayerReconciler,
        timings: SupervisorTimings,
    ) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            factory,
            session,
            reconciler,
            timings,
            tx: tx.clone(),
            inbox,
            inbound: None,
            outbound: None,
            next_generation: 0,
            running: false,
            shutting_down: false,
            refresh: RefreshTimer::default(),
        };
        tokio::spawn(supervisor.run());
        Self { tx }
    }

    /// Spawn both workers. Calling it again while running does nothing.
    pub fn start(&self) {
        let _ = self.tx.send(SupervisorMsg::Start);
    }

    /// Queue a command for the inbound worker. Delivery is not acknowledged.
    pub fn send_command(&self, command: GameCommand) -> Result<(), ServiceError> {
        self.tx
            .send(SupervisorMsg::Command(command))
            .map_err(|_| ServiceError::ShuttingDown)
    }

    /// Signal both workers to stop and abort them. Does not wait for the workers to exit.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(SupervisorMsg::Stop(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

struct WorkerSlot {
    generation: u64,
    control: mpsc::UnboundedSender<WorkerControl>,
    task: AbortHandle,
}

impl WorkerSlot {
    fn terminate(self) {
        let _ = self.control.send(WorkerControl::Stop);
        self.task.abort();
    }
}

struct Supervisor {
    factory: Arc<dyn WorkerFactory>,
    session: ServerSession,
    reconciler: PlayerReconciler,
    timings: SupervisorTimings,
    tx: mpsc::UnboundedSender<SupervisorMsg>,
    inbox: mpsc::UnboundedReceiver<SupervisorMsg>,
    inbound: Option<WorkerSlot>,
    outbound: Option<WorkerSlot>,
    next_generation: u64,
    running: bool,
    shutting_down: bool,
    refresh: RefreshTimer,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    self.handle(message).await;
                    if self.shutting_down {
                        break;
                    }
                }
                _ = self.refresh.fired() => self.refresh_info(),
            }
        }
        debug!("pipe supervisor finished");
    }

    async fn handle(&mut self, message: SupervisorMsg) {
        match message {
            SupervisorMsg::Start => {
                if self.running {
                    debug!("pipe workers already running");
                    return;
                }
                self.running = true;
                self.spawn_worker(WorkerKind::Inbound);
                self.spawn_worker(WorkerKind::Outbound);
            }
            SupervisorMsg::Command(command) => self.send_to_inbound(command),
            SupervisorMsg::Worker {
                kind,
                generation,
                event,
            } => {
                if !self.is_current(kind, generation) {
                    debug!(%kind, generation, "dropping event from a replaced worker");
                    return;
                }
                self.on_worker_event(kind, event).await;
            }
            SupervisorMsg::Exited {
                kind,
                generation,
                outcome,
            } => self.on_worker_exit(kind, generation, outcome),
            SupervisorMsg::Respawn(kind) => {
                if self.shutting_down || self.slot(kind).is_some() {
                    return;
                }
                info!(%kind, "restarting pipe worker");
                self.spawn_worker(kind);
            }
            SupervisorMsg::Stop(ack) => {
                self.stop();
                let _ = ack.send(());
            }
        }
    }

    fn slot(&self, kind: WorkerKind) -> Option<&WorkerSlot> {
        match kind {
            WorkerKind::Inbound => self.inbound.as_ref(),
            WorkerKind::Outbound => self.outbound.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: WorkerKind) -> &mut Option<WorkerSlot> {
        match kind {
            WorkerKind::Inbound => &mut self.inbound,
            WorkerKind::Outbound => &mut self.outbound,
        }
    }

    fn is_current(&self, kind: WorkerKind, generation: u64) -> bool {
        self.slot(kind)
            .is_some_and(|slot| slot.generation == generation)
    }

    fn spawn_worker(&mut self, kind: WorkerKind) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let (control, control_rx) = mpsc::unbounded_channel();
        let link = WorkerLink::new(kind, generation, self.tx.clone());

        let handle = match kind {
            WorkerKind::Inbound => self.factory.spawn_inbound(control_rx, link),
            WorkerKind::Outbound => self.factory.spawn_outbound(control_rx, link),
        };
        let task = handle.abort_handle();

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = match handle.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join) => Err(join.to_string()),
            };
            let _ = tx.send(SupervisorMsg::Exited {
                kind,
                generation,
                outcome,
            });
        });

        debug!(%kind, generation, "pipe worker spawned");
        *self.slot_mut(kind) = Some(WorkerSlot {
            generation,
            control,
            task,
        });
    }

    fn on_worker_exit(&mut self, kind: WorkerKind, generation: u64, outcome: Result<(), String>) {
        if !self.is_current(kind, generation) {
            return;
        }
        *self.slot_mut(kind) = None;

        match outcome {
            Ok(()) => warn!(%kind, "pipe worker exited"),
            Err(reason) => error!(%kind, %reason, "pipe worker crashed"),
        }

        if kind == WorkerKind::Inbound {
            self.refresh.cancel();
            self.session.set_status(ServerStatus::Down);
        }

        if self.shutting_down {
            return;
        }
        let tx = self.tx.clone();
        let delay = self.timings.restart_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SupervisorMsg::Respawn(kind));
        });
    }

    async fn on_worker_event(&mut self, kind: WorkerKind, event: WorkerEvent) {
        match (kind, event) {
            (WorkerKind::Inbound, WorkerEvent::Ready) => {
                info!("pinging game server");
                self.send_to_inbound(GameCommand::bare("ping"));
            }
            (WorkerKind::Inbound, WorkerEvent::PipeError(reason)) => {
                warn!(%reason, "inbound pipe error; reopening");
                self.refresh.cancel();
                self.session.set_status(ServerStatus::Down);
            }
            (WorkerKind::Outbound, WorkerEvent::Ready) => info!("outbound pipe reading"),
            (WorkerKind::Outbound, WorkerEvent::Payload(payload)) => {
                self.handle_payload(&payload).await;
            }
            (WorkerKind::Outbound, WorkerEvent::Reopening) => info!("reopening outbound pipe"),
            (kind, event) => debug!(%kind, ?event, "ignoring worker event"),
        }
    }

    fn send_to_inbound(&mut self, command: GameCommand) {
        let Some(slot) = self.inbound.as_ref() else {
            debug!(command = %command.command, "inbound worker down; dropping command");
            return;
        };
        if slot.control.send(WorkerControl::Command(command)).is_err() {
            debug!("inbound worker gone; command dropped");
        }
    }

    /// Send `info` now and schedule the next poll, replacing any pending one.
    fn refresh_info(&mut self) {
        self.refresh.cancel();
        self.send_to_inbound(GameCommand::bare("info"));
        self.refresh.arm(self.timings.refresh_interval);
    }

    async fn handle_payload(&mut self, payload: &str) {
        for line in payload.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match serde_json::from_str::<GameEvent>(line) {
                Ok(event) => self.apply_event(event).await,
                Err(err) => warn!(error = %err, "dropping malformed event line"),
            }
        }
    }

    async fn apply_event(&mut self, event: GameEvent) {
        let GameEvent { kind, data } = event;
        match kind.as_str() {
            "info" => {
                self.session.merge_info(&data);
                if let Some(players) = data.get("players").and_then(Value::as_array) {
                    let profiles = players.iter().filter(|p| p.is_object()).cloned().collect();
                    if let Err(err) = self.reconciler.upsert_players(profiles).await {
                        error!(error = %err, "failed to store player snapshots");
                    }
                    self.session.touch(now_ms());
                }
            }
            "pong" => {
                self.session.merge_pong(&data);
                self.session.set_status(ServerStatus::Up);
                info!("game server connected");
                self.refresh_info();
            }
            "playerDied" => {
                info!(username = %username_of(&data), "player died");
                if let Err(err) = self.reconciler.mark_dead(data).await {
                    error!(error = %err, "failed to record player death");
                }
            }
            "players" => {
                let players = match data {
                    Value::Array(players) => players,
                    Value::Object(mut map) => match map.remove("players") {
                        Some(Value::Array(players)) => players,
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                if let Err(err) = self.reconciler.upsert_players(players).await {
                    error!(error = %err, "failed to store player roster");
                }
            }
            "log" => match data.as_str() {
                Some(text) => info!(target: "game", "{text}"),
                None => info!(target: "game", "{data}"),
            },
            "zombieDied" => debug!("zombie died"),
            "playerConnected" => info!(username = %username_of(&data), "player connected"),
            "playerDisconnected" => info!(username = %username_of(&data), "player disconnected"),
            other => debug!(kind = other, "ignoring unknown event"),
        }
    }

    fn stop(&mut self) {
        self.shutting_down = true;
        self.refresh.cancel();
        if let Some(slot) = self.outbound.take() {
            slot.terminate();
        }
        if let Some(slot) = self.inbound.take() {
            slot.terminate();
        }
        self.session.set_status(ServerStatus::Down);
        info!("pipe workers stopped");
    }
}

fn username_of(data: &Value) -> &str {
    data.get("username")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::{
        dao::{game_tables::SqliteGameTables, player_store::SqliteSnapshotStore},
        pipe::PipeError,
    };

    /// Records what workers receive and lets tests drive their events.
    #[derive(Default)]
    struct FakeWorkers {
        commands: Arc<Mutex<Vec<GameCommand>>>,
        stops: Arc<Mutex<Vec<WorkerKind>>>,
        spawned: Mutex<Vec<WorkerKind>>,
        links: Mutex<Vec<WorkerLink>>,
        exits: Mutex<Vec<oneshot::Sender<()>>>,
    }

    impl FakeWorkers {
        fn spawn(
            &self,
            kind: WorkerKind,
            mut control: mpsc::UnboundedReceiver<WorkerControl>,
            link: WorkerLink,
        ) -> JoinHandle<Result<(), PipeError>> {
            self.spawned.lock().unwrap().push(kind);
            self.links.lock().unwrap().push(link.clone());
            let (exit_tx, mut exit_rx) = oneshot::channel();
            self.exits.lock().unwrap().push(exit_tx);

            // The relay is not the returned task, so it still sees a Stop sent right before the
            // worker is aborted.
            let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
            let stops = self.stops.clone();
            tokio::spawn(async move {
                while let Some(message) = control.recv().await {
                    match message {
                        WorkerControl::Stop => stops.lock().unwrap().push(kind),
                        WorkerControl::Command(command) => {
                            if forward_tx.send(command).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            let commands = self.commands.clone();
            tokio::spawn(async move {
                link.emit(WorkerEvent::Ready);
                loop {
                    tokio::select! {
                        command = forward_rx.recv() => match command {
                            Some(command) => commands.lock().unwrap().push(command),
                            None => return Ok(()),
                        },
                        _ = &mut exit_rx => return Ok(()),
                    }
                }
            })
        }

        fn stopped(&self, kind: WorkerKind) -> usize {
            self.stops
                .lock()
                .unwrap()
                .iter()
                .filter(|k| **k == kind)
                .count()
        }

        fn commands(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|command| command.command.clone())
                .collect()
        }

        fn count(&self, name: &str) -> usize {
            self.commands().iter().filter(|c| *c == name).count()
        }

        fn spawned(&self, kind: WorkerKind) -> usize {
            self.spawned
                .lock()
                .unwrap()
                .iter()
                .filter(|k| **k == kind)
                .count()
        }

        fn last_link(&self, kind: WorkerKind) -> WorkerLink {
            self.links
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|link| link.kind() == kind)
                .cloned()
                .unwrap()
        }

        /// Make the first spawned, still running worker exit.
        fn crash_first(&self) {
            let exit = self.exits.lock().unwrap().remove(0);
            exit.send(()).unwrap();
        }
    }

    impl WorkerFactory for FakeWorkers {
        fn spawn_inbound(
            &self,
            control: mpsc::UnboundedReceiver<WorkerControl>,
            link: WorkerLink,
        ) -> JoinHandle<Result<(), PipeError>> {
            self.spawn(WorkerKind::Inbound, control, link)
        }

        fn spawn_outbound(
            &self,
            control: mpsc::UnboundedReceiver<WorkerControl>,
            link: WorkerLink,
        ) -> JoinHandle<Result<(), PipeError>> {
            self.spawn(WorkerKind::Outbound, control, link)
        }
    }

    async fn reconciler() -> PlayerReconciler {
        PlayerReconciler::new(
            Arc::new(SqliteSnapshotStore::in_memory().await.unwrap()),
            Arc::new(SqliteGameTables::stand_in_for_tests().await),
        )
    }

    async fn supervisor() -> (Arc<FakeWorkers>, SupervisorHandle, ServerSession) {
        let workers = Arc::new(FakeWorkers::default());
        let session = ServerSession::new();
        let handle = SupervisorHandle::spawn(
            workers.clone(),
            session.clone(),
            reconciler().await,
            SupervisorTimings::default(),
        );
        (workers, handle, session)
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    fn deliver(workers: &FakeWorkers, payload: &str) {
        workers
            .last_link(WorkerKind::Outbound)
            .emit(WorkerEvent::Payload(payload.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_spawns_both_workers_once_and_pings() {
        let (workers, handle, _session) = supervisor().await;
        handle.start();
        handle.start();
        settle().await;

        assert_eq!(workers.spawned(WorkerKind::Inbound), 1);
        assert_eq!(workers.spawned(WorkerKind::Outbound), 1);
        assert_eq!(workers.commands(), ["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_pong_leaves_status_down() {
        let (workers, handle, session) = supervisor().await;
        handle.start();
        sleep(Duration::from_secs(60)).await;

        assert_eq!(session.status(), ServerStatus::Down);
        assert_eq!(workers.commands(), ["ping"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_starts_a_single_refresh_loop() {
        let (workers, handle, session) = supervisor().await;
        handle.start();
        settle().await;

        deliver(&workers, r#"{"type":"pong","data":{"server":{"name":"pz"}}}"#);
        settle().await;
        assert_eq!(session.status(), ServerStatus::Up);
        assert_eq!(workers.count("info"), 1);

        // A second pong resets the loop instead of adding a timer.
        deliver(&workers, r#"{"type":"pong"}"#);
        settle().await;
        assert_eq!(workers.count("info"), 2);

        sleep(Duration::from_millis(4_500)).await;
        assert_eq!(workers.count("info"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_worker_is_restarted_after_the_delay() {
        let (workers, handle, _session) = supervisor().await;
        handle.start();
        settle().await;

        workers.crash_first();
        settle().await;
        handle.send_command(GameCommand::bare("lost")).unwrap();
        settle().await;
        assert_eq!(workers.spawned(WorkerKind::Inbound), 1);

        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(workers.spawned(WorkerKind::Inbound), 2);

        handle.send_command(GameCommand::bare("players")).unwrap();
        settle().await;
        assert_eq!(workers.commands(), ["ping", "ping", "players"]);
    }

    #[tokio::test(start_paused = true)]
    async fn pipe_error_stops_polling_until_the_next_pong() {
        let (workers, handle, session) = supervisor().await;
        handle.start();
        settle().await;
        deliver(&workers, r#"{"type":"pong"}"#);
        settle().await;

        workers
            .last_link(WorkerKind::Inbound)
            .emit(WorkerEvent::PipeError("broken pipe".into()));
        settle().await;
        let polled = workers.count("info");
        sleep(Duration::from_secs(5)).await;

        assert_eq!(session.status(), ServerStatus::Down);
        assert_eq!(workers.count("info"), polled);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_restarts() {
        let (workers, handle, session) = supervisor().await;
        handle.start();
        settle().await;

        handle.stop().await;
        sleep(Duration::from_secs(10)).await;

        assert_eq!(workers.spawned(WorkerKind::Inbound), 1);
        assert_eq!(workers.spawned(WorkerKind::Outbound), 1);
        assert_eq!(session.status(), ServerStatus::Down);
        assert!(handle.send_command(GameCommand::bare("info")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signals_both_workers_before_aborting_them() {
        let (workers, handle, _session) = supervisor().await;
        handle.start();
        settle().await;

        handle.stop().await;
        settle().await;

        assert_eq!(workers.stopped(WorkerKind::Outbound), 1);
        assert_eq!(workers.stopped(WorkerKind::Inbound), 1);
    }

    #[tokio::test]
    async fn info_events_update_session_and_snapshots() {
        let workers = Arc::new(FakeWorkers::default());
        let session = ServerSession::new();
        let reconciler = reconciler().await;
        let handle = SupervisorHandle::spawn(
            workers.clone(),
            session.clone(),
            reconciler.clone(),
            SupervisorTimings::default(),
        );
        handle.start();
        settle().await;

        let payload = format!(
            "{}\nnot json\n{}\n",
            json!({"type": "info", "data": {"players": [{"username": "Bob", "access_level": "None"}], "game": {"day": 3}}}),
            json!({"type": "playerDied", "data": {"username": "Alice"}}),
        );
        deliver(&workers, &payload);

        let mut attempts = 0;
        while reconciler.get_player("Alice").await.unwrap().is_none() && attempts < 100 {
            settle().await;
            attempts += 1;
        }

        let bob = reconciler.get_player("Bob").await.unwrap().unwrap();
        assert_eq!(bob.profile["access_level"], json!("player"));
        let alice = reconciler.get_player("Alice").await.unwrap().unwrap();
        assert!(alice.dead_at.is_some());

        let snapshot = session.snapshot();
        assert!(snapshot.last_updated.is_some());
        assert_eq!(snapshot.data.unwrap()["game"], json!({"day": 3}));
    }
}
