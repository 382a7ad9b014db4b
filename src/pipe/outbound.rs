//! Outbound worker: watches the event pipe and forwards what the game wrote.

use std::{path::PathBuf, time::Duration};

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::ModifyKind,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    time::sleep,
};
use tracing::{debug, error, info, warn};

use super::{PipeError, PipeReader, ReadMode, WorkerControl, WorkerEvent, WorkerLink};

const REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Forward the event pipe's content on every change notification until told to stop.
///
/// Framing is left to the supervisor. A failed read is logged and reported as `Reopening`;
/// the worker keeps watching.
pub(super) async fn run(
    path: PathBuf,
    mode: ReadMode,
    mut control: UnboundedReceiver<WorkerControl>,
    link: WorkerLink,
) -> Result<(), PipeError> {
    let (changes_tx, mut changes) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |change: notify::Result<Event>| {
            let _ = changes_tx.send(change);
        })
        .map_err(|source| PipeError::Watch {
            path: path.clone(),
            source,
        })?;
    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|source| PipeError::Watch {
            path: path.clone(),
            source,
        })?;

    let mut reader = PipeReader::new(path, mode);
    info!(path = %reader.path().display(), ?mode, "watching outbound pipe");
    link.emit(WorkerEvent::Ready);

    loop {
        tokio::select! {
            message = control.recv() => {
                if matches!(message, Some(WorkerControl::Stop) | None) {
                    debug!("outbound worker stopping");
                    break;
                }
            }
            change = changes.recv() => {
                let Some(change) = change else {
                    return Err(PipeError::WatcherClosed {
                        path: reader.path().to_path_buf(),
                    });
                };
                match change {
                    Ok(event) if changes_content(&event.kind) => {
                        forward(&mut reader, &link).await;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "file watcher reported an error"),
                }
            }
        }
    }

    drop(watcher);
    Ok(())
}

async fn forward(reader: &mut PipeReader, link: &WorkerLink) {
    match reader.read().await {
        Ok(Some(payload)) => {
            link.emit(WorkerEvent::Payload(payload));
        }
        Ok(None) => {}
        Err(err) => {
            error!(error = %err, "outbound pipe read failed");
            sleep(REOPEN_DELAY).await;
            link.emit(WorkerEvent::Reopening);
        }
    }
}

/// Reads of the pipe raise access notifications of their own; only writes count.
fn changes_content(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any => true,
        _ => false,
    }
}
