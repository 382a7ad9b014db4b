use std::path::PathBuf;

use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use super::{
    PipeError, ReadMode, WorkerControl, WorkerEvent, WorkerKind, inbound, outbound,
    supervisor::SupervisorMsg,
};
use crate::config::PipeConfig;

/// Channel a worker uses to report to the supervisor. Every event is tagged with the worker's
/// kind and generation so reports from a replaced worker can be told apart.
#[derive(Clone)]
pub struct WorkerLink {
    kind: WorkerKind,
    generation: u64,
    tx: UnboundedSender<SupervisorMsg>,
}

impl WorkerLink {
    pub(crate) fn new(kind: WorkerKind, generation: u64, tx: UnboundedSender<SupervisorMsg>) -> Self {
        Self {
            kind,
            generation,
            tx,
        }
    }

    /// Direction of the worker holding this link.
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Report an event. Returns `false` once the supervisor is gone.
    pub fn emit(&self, event: WorkerEvent) -> bool {
        self.tx
            .send(SupervisorMsg::Worker {
                kind: self.kind,
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Spawns the two pipe workers. The supervisor restarts whatever a factory spawns when the
/// returned task finishes.
pub trait WorkerFactory: Send + Sync {
    /// Spawn the worker that writes commands.
    fn spawn_inbound(
        &self,
        control: UnboundedReceiver<WorkerControl>,
        link: WorkerLink,
    ) -> JoinHandle<Result<(), PipeError>>;

    /// Spawn the worker that watches the event file.
    fn spawn_outbound(
        &self,
        control: UnboundedReceiver<WorkerControl>,
        link: WorkerLink,
    ) -> JoinHandle<Result<(), PipeError>>;
}

/// Workers bound to the configured filesystem pipes.
#[derive(Debug, Clone)]
pub struct PipeWorkers {
    inpipe: PathBuf,
    outpipe: PathBuf,
    read_mode: ReadMode,
}

impl PipeWorkers {
    /// Workers for the configured pipe pair.
    pub fn new(config: &PipeConfig) -> Self {
        Self {
            inpipe: config.inpipe.clone(),
            outpipe: config.outpipe.clone(),
            read_mode: config.read_mode,
        }
    }
}

impl WorkerFactory for PipeWorkers {
    fn spawn_inbound(
        &self,
        control: UnboundedReceiver<WorkerControl>,
        link: WorkerLink,
    ) -> JoinHandle<Result<(), PipeError>> {
        tokio::spawn(inbound::run(self.inpipe.clone(), control, link))
    }

    fn spawn_outbound(
        &self,
        control: UnboundedReceiver<WorkerControl>,
        link: WorkerLink,
    ) -> JoinHandle<Result<(), PipeError>> {
        tokio::spawn(outbound::run(
            self.outpipe.clone(),
            self.read_mode,
            control,
            link,
        ))
    }
}
