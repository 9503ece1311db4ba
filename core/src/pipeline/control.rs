use std::sync::Arc;

use tokio::signal::unix::Signal;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::StructurerError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::line_editor::END_OF_COMMAND;

/// Translates external control signals into pipeline actions.
///
/// This is the only component that writes the reading flag or raises the
/// reset signals; the editor and assembler never learn that an operating
/// system signal model exists.
#[derive(Clone)]
pub struct ControlPlane {
    context: Arc<PipelineContext>,
    byte_tx: tokio::sync::mpsc::Sender<u8>,
}

impl ControlPlane {
    pub fn new(context: Arc<PipelineContext>, byte_tx: tokio::sync::mpsc::Sender<u8>) -> Self {
        Self { context, byte_tx }
    }

    /// start: open the gate. Idempotent; a repeated start changes nothing.
    pub fn start(&self) {
        self.context.set_reading(true);
        debug!("reading started");
    }

    /// stop-and-flush: close the gate, then inject the end-of-command
    /// marker. The order is what makes the snapshot exact: once the flag is
    /// clear the byte source can admit nothing behind the marker, so the
    /// editor's emission covers precisely the bytes between the most recent
    /// start and this stop.
    pub async fn stop_and_flush(&self) {
        self.context.set_reading(false);
        if self.byte_tx.send(END_OF_COMMAND).await.is_err() {
            warn!("byte queue closed; end-of-command marker not delivered");
        }
        debug!("reading stopped and flush requested");
    }

    /// reset: close the gate, tell the editor and assembler to drop their
    /// state, and, when the gate had been open, flush whatever the editor
    /// holds so the interrupted command still yields a record. By the time
    /// the reset tokens are delivered the flag is already false, so nothing
    /// new is admitted while the two consumers drain.
    pub async fn reset(&self) {
        let was_reading = self.context.swap_reading(false);
        if !self.context.raise_editor_reset() {
            debug!("editor reset already pending");
        }
        if !self.context.raise_assembler_reset() {
            debug!("assembler reset already pending");
        }
        if was_reading && self.byte_tx.send(END_OF_COMMAND).await.is_err() {
            warn!("byte queue closed; end-of-command marker not delivered");
        }
        info!(was_reading, "pipeline reset");
    }

    /// Listens for control signals until a terminate arrives, then returns
    /// so the caller can run cleanup and exit with status 0.
    pub async fn listen(&self) -> Result<(), StructurerError> {
        let mut start = unix_signal(SignalKind::user_defined1(), "SIGUSR1")?;
        let mut stop = unix_signal(SignalKind::user_defined2(), "SIGUSR2")?;
        let mut reset = unix_signal(SignalKind::hangup(), "SIGHUP")?;
        let mut interrupt = unix_signal(SignalKind::interrupt(), "SIGINT")?;
        let mut terminate = unix_signal(SignalKind::terminate(), "SIGTERM")?;

        loop {
            tokio::select! {
                _ = start.recv() => self.start(),
                _ = stop.recv() => self.stop_and_flush().await,
                _ = reset.recv() => self.reset().await,
                _ = interrupt.recv() => {
                    info!("SIGINT received; terminating");
                    return Ok(());
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received; terminating");
                    return Ok(());
                }
            }
        }
    }
}

fn unix_signal(kind: SignalKind, name: &'static str) -> Result<Signal, StructurerError> {
    signal(kind).map_err(|err| StructurerError::signal_setup(name, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::reset_channel;
    use tokio::sync::mpsc;

    struct Harness {
        control: ControlPlane,
        context: Arc<PipelineContext>,
        byte_rx: mpsc::Receiver<u8>,
        editor_listener: crate::pipeline::context::ResetListener,
        assembler_listener: crate::pipeline::context::ResetListener,
    }

    fn harness() -> Harness {
        let (editor_reset, editor_listener) = reset_channel();
        let (assembler_reset, assembler_listener) = reset_channel();
        let context = Arc::new(PipelineContext::new(editor_reset, assembler_reset));
        let (byte_tx, byte_rx) = mpsc::channel(16);
        Harness {
            control: ControlPlane::new(Arc::clone(&context), byte_tx),
            context,
            byte_rx,
            editor_listener,
            assembler_listener,
        }
    }

    #[tokio::test]
    async fn start_opens_the_gate_idempotently() {
        let harness = harness();
        assert!(!harness.context.is_reading());
        harness.control.start();
        harness.control.start();
        assert!(harness.context.is_reading());
    }

    #[tokio::test]
    async fn stop_and_flush_clears_the_gate_before_the_marker_lands() {
        let mut harness = harness();
        harness.control.start();
        harness.control.stop_and_flush().await;

        assert!(!harness.context.is_reading());
        assert_eq!(harness.byte_rx.recv().await, Some(END_OF_COMMAND));
    }

    #[tokio::test]
    async fn reset_raises_both_tokens_and_flushes_only_when_reading() {
        let mut harness = harness();
        harness.control.start();
        harness.control.reset().await;

        assert!(!harness.context.is_reading());
        assert_eq!(harness.editor_listener.observed().await, Some(()));
        assert_eq!(harness.assembler_listener.observed().await, Some(()));
        assert_eq!(
            harness.byte_rx.recv().await,
            Some(END_OF_COMMAND),
            "an open gate at reset time forces a flush"
        );

        // A reset with the gate already closed raises tokens but no marker.
        harness.control.reset().await;
        assert_eq!(harness.editor_listener.observed().await, Some(()));
        assert!(
            harness.byte_rx.try_recv().is_err(),
            "no marker when the gate was closed"
        );
    }

    #[tokio::test]
    async fn back_to_back_resets_collapse_into_one_pending_token() {
        let mut harness = harness();
        harness.control.reset().await;
        harness.control.reset().await;

        assert_eq!(harness.editor_listener.observed().await, Some(()));
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            harness.editor_listener.observed(),
        )
        .await;
        assert!(second.is_err(), "second token should have been dropped");
    }
}
