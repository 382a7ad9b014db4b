//! Inbound worker: owns the write end of the command pipe.

use std::path::{Path, PathBuf};

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::mpsc::UnboundedReceiver,
};
use tracing::{debug, info, warn};

use super::{GameCommand, PipeError, WorkerControl, WorkerEvent, WorkerLink};

/// Write every received command as one JSON line, reopening the pipe after each write.
///
/// A failed write or reopen is reported upward and followed by one more reopen; if that also
/// fails the worker returns the error and the supervisor restarts it. Dropped commands are not
/// retried.
pub(super) async fn run(
    path: PathBuf,
    mut control: UnboundedReceiver<WorkerControl>,
    link: WorkerLink,
) -> Result<(), PipeError> {
    let mut pipe = open(&path).await?;
    info!(path = %path.display(), "inbound pipe open");
    link.emit(WorkerEvent::Ready);

    while let Some(message) = control.recv().await {
        let command = match message {
            WorkerControl::Command(command) => command,
            WorkerControl::Stop => {
                debug!("inbound worker stopping");
                break;
            }
        };

        let outcome = match write_line(&mut pipe, &path, &command).await {
            Ok(()) => open(&path).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(reopened) => pipe = reopened,
            Err(err) => {
                warn!(error = %err, command = %command.command, "inbound pipe failed; reopening");
                link.emit(WorkerEvent::PipeError(err.to_string()));
                pipe = open(&path).await?;
                link.emit(WorkerEvent::Ready);
            }
        }
    }

    Ok(())
}

/// Commands are appended; on a FIFO this is a plain write, on a regular file every line is kept.
async fn open(path: &Path) -> Result<File, PipeError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| PipeError::Open {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_line(pipe: &mut File, path: &Path, command: &GameCommand) -> Result<(), PipeError> {
    let write_error = |source: std::io::Error| PipeError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut line = serde_json::to_vec(command).map_err(|err| write_error(err.into()))?;
    line.push(b'\n');
    pipe.write_all(&line).await.map_err(write_error)?;
    pipe.flush().await.map_err(write_error)
}
