//! The five cooperating tasks of the session structurer and their wiring.
//!
//! Data flows leaves-first: byte source → byte queue → line editor → output
//! queue → record assembler → sink, with the command source feeding the
//! assembler on the side and the control plane mutating the shared reading
//! flag and reset signals.

mod assembler;
mod byte_source;
mod command_source;
mod context;
mod control;
mod line_editor;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

pub use assembler::RecordAssembler;
pub use byte_source::ByteSource;
pub use command_source::CommandSource;
pub use context::PipelineContext;
pub use context::ResetListener;
pub use context::ResetSignal;
pub use context::reset_channel;
pub use control::ControlPlane;
pub use line_editor::END_OF_COMMAND;
pub use line_editor::LineEditor;

use crate::StructurerError;

/// Byte queue depth. Large enough to ride out a bursty `ls -R`, small
/// enough to give the session stream reader real backpressure.
const BYTE_QUEUE_DEPTH: usize = 1024;
/// The assembler takes one output at a time; the editor waits for it.
const OUTPUT_QUEUE_DEPTH: usize = 1;
/// The shell writes at most one command between two stop signals.
const COMMAND_QUEUE_DEPTH: usize = 1;

/// Filesystem endpoints of the two input streams.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the FIFO carrying the recorded session byte stream.
    pub session_stream: PathBuf,
    /// Path to the FIFO carrying newline-delimited command strings.
    pub command_stream: PathBuf,
}

/// A running structurer pipeline.
pub struct Pipeline {
    control: ControlPlane,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Opens the session stream and spawns the pipeline against it. An
    /// unusable input endpoint is the one startup-fatal error: nothing has
    /// been spawned yet and the caller should exit nonzero.
    pub async fn open<W>(config: PipelineConfig, sink: W) -> Result<Self, StructurerError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // Probe the command endpoint up front; the source itself only opens
        // it lazily, per writer, which would turn a missing FIFO into a
        // silent runtime stall instead of a startup failure.
        tokio::fs::metadata(&config.command_stream)
            .await
            .map_err(|err| {
                StructurerError::open_command_stream(config.command_stream.clone(), err)
            })?;
        let session_stream = File::open(&config.session_stream).await.map_err(|err| {
            StructurerError::open_session_stream(config.session_stream.clone(), err)
        })?;
        info!(
            session_stream = %config.session_stream.display(),
            command_stream = %config.command_stream.display(),
            "session structurer pipeline starting"
        );
        Ok(Self::spawn(session_stream, config.command_stream, sink))
    }

    /// Wires queues, context, and the five component tasks. Generic over the
    /// session stream and sink so tests can drive the pipeline in memory.
    pub fn spawn<R, W>(session_stream: R, command_stream: PathBuf, sink: W) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (byte_tx, byte_rx) = mpsc::channel(BYTE_QUEUE_DEPTH);
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (editor_reset, editor_reset_listener) = reset_channel();
        let (assembler_reset, assembler_reset_listener) = reset_channel();

        let context = Arc::new(PipelineContext::new(editor_reset, assembler_reset));
        let control = ControlPlane::new(Arc::clone(&context), byte_tx.clone());

        let byte_source = ByteSource::new(session_stream, Arc::clone(&context), byte_tx);
        let command_source = CommandSource::new(command_stream, command_tx);
        let editor = LineEditor::new(byte_rx, editor_reset_listener, output_tx);
        let assembler = RecordAssembler::new(
            output_rx,
            command_rx,
            assembler_reset_listener,
            context,
            sink,
        );

        // A failed source closes its downstream queue and the rest of the
        // pipeline drains normally; the fault itself is only reported.
        let tasks = vec![
            tokio::spawn(async move {
                if let Err(err) = byte_source.run().await {
                    error!(error = %err, "session byte source terminated");
                }
            }),
            tokio::spawn(async move {
                if let Err(err) = command_source.run().await {
                    error!(error = %err, "command source terminated");
                }
            }),
            tokio::spawn(editor.run()),
            tokio::spawn(assembler.run()),
        ];

        Self { control, tasks }
    }

    /// Handle for driving control actions without going through the
    /// operating system's signal delivery.
    pub fn control(&self) -> ControlPlane {
        self.control.clone()
    }

    /// Runs the signal listener until terminate, then tears the component
    /// tasks down. Cancellation is deliberately coarse: the process is about
    /// to exit and the sink has been flushed after every record.
    pub async fn run(self) -> Result<(), StructurerError> {
        let result = self.control.listen().await;
        for task in &self.tasks {
            task.abort();
        }
        info!("session structurer pipeline stopped");
        result
    }
}
