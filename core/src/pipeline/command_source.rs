use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::StructurerError;

const READ_CHUNK_SIZE: usize = 4096;

/// Outcome of draining one writer's worth of the command stream.
enum StreamEnd {
    /// The writer closed its end; re-open and wait for the next one.
    WriterClosed,
    /// The command queue consumer is gone; a clean shutdown.
    QueueClosed,
    /// Hard read error; the source shuts down.
    Failed(StructurerError),
}

/// Reads newline-delimited command strings from the command FIFO.
///
/// The cooperating shell opens the FIFO, writes one or more terminated
/// lines, and closes it again for every command, so end-of-stream here is
/// routine: the source closes its handle and re-opens, blocking until the
/// next writer appears. Bytes of a line split across writer sessions are
/// kept in `pending` and joined with the remainder after re-open.
pub struct CommandSource {
    path: PathBuf,
    command_tx: mpsc::Sender<String>,
}

impl CommandSource {
    pub fn new(path: PathBuf, command_tx: mpsc::Sender<String>) -> Self {
        Self { path, command_tx }
    }

    /// Runs until the command queue closes or a hard error lands. A fault
    /// terminates only this source; later records carry empty commands.
    pub async fn run(self) -> Result<(), StructurerError> {
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let stream = File::open(&self.path)
                .await
                .map_err(|err| StructurerError::open_command_stream(self.path.clone(), err))?;
            match self.forward_lines(stream, &mut pending).await {
                StreamEnd::WriterClosed => {
                    debug!("command stream writer closed; re-opening");
                }
                StreamEnd::QueueClosed => return Ok(()),
                StreamEnd::Failed(err) => return Err(err),
            }
        }
    }

    async fn forward_lines<R>(&self, mut stream: R, pending: &mut Vec<u8>) -> StreamEnd
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match stream.read(&mut chunk).await {
                Ok(0) => return StreamEnd::WriterClosed,
                Ok(read) => read,
                Err(err) => return StreamEnd::Failed(StructurerError::command_stream_read(err)),
            };
            for &byte in &chunk[..read] {
                if byte != b'\n' {
                    pending.push(byte);
                    continue;
                }
                // Zero bytes between two newlines is no command at all.
                if pending.is_empty() {
                    continue;
                }
                let command = String::from_utf8_lossy(pending).into_owned();
                pending.clear();
                if self.command_tx.send(command).await.is_err() {
                    return StreamEnd::QueueClosed;
                }
            }
        }
    }
}
