use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::Record;
use crate::StructurerError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::context::ResetListener;

/// Pairs each emitted output string with the next available command, stamps
/// it, and writes one JSON line to the sink.
///
/// Command pairing is best-effort: the cooperating shell writes the command
/// just before signalling stop-and-flush, so it is ordinarily waiting in the
/// queue when the output arrives. The sink must not stall when the shell
/// failed to deliver, so an absent command becomes the empty string.
pub struct RecordAssembler<W> {
    output_rx: mpsc::Receiver<String>,
    command_rx: mpsc::Receiver<String>,
    reset: ResetListener,
    context: Arc<PipelineContext>,
    sink: W,
}

impl<W> RecordAssembler<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(
        output_rx: mpsc::Receiver<String>,
        command_rx: mpsc::Receiver<String>,
        reset: ResetListener,
        context: Arc<PipelineContext>,
        sink: W,
    ) -> Self {
        Self {
            output_rx,
            command_rx,
            reset,
            context,
            sink,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                token = self.reset.observed() => {
                    match token {
                        Some(()) => self.handle_reset(),
                        None => break,
                    }
                }
                output = self.output_rx.recv() => {
                    let Some(output) = output else {
                        break;
                    };
                    self.emit(output).await;
                }
            }
        }
        debug!("record assembler exiting");
    }

    /// A fault here is contained to the one record: it is reported and
    /// dropped, and the assembler moves on to the next output.
    async fn emit(&mut self, output: String) {
        if let Err(err) = self.try_emit(output).await {
            warn!(error = %err, "dropping record");
        }
    }

    async fn try_emit(&mut self, output: String) -> Result<(), StructurerError> {
        let command = self.command_rx.try_recv().unwrap_or_default();
        // The sequence advances even when the record is later dropped, so an
        // id can never be reused.
        let sequence = self.context.next_record_seq();
        let record = Record::new(sequence, command, output, Utc::now());

        let mut line = serde_json::to_string(&record)
            .map_err(|err| StructurerError::serialize_record(record.id.clone(), err))?;
        line.push('\n');
        self.sink
            .write_all(line.as_bytes())
            .await
            .map_err(|err| StructurerError::write_sink(record.id.clone(), err))?;
        self.sink
            .flush()
            .await
            .map_err(|err| StructurerError::write_sink(record.id, err))?;
        Ok(())
    }

    /// Discards every output and command currently pending. The sequence
    /// counter is deliberately left alone so ids stay monotonic across the
    /// recovery.
    fn handle_reset(&mut self) {
        let mut dropped_outputs = 0usize;
        while self.output_rx.try_recv().is_ok() {
            dropped_outputs += 1;
        }
        let mut dropped_commands = 0usize;
        while self.command_rx.try_recv().is_ok() {
            dropped_commands += 1;
        }
        debug!(dropped_outputs, dropped_commands, "record assembler reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::reset_channel;

    struct Harness {
        output_tx: mpsc::Sender<String>,
        command_tx: mpsc::Sender<String>,
        reset_signal: crate::pipeline::context::ResetSignal,
        sink_rx: tokio::io::BufReader<tokio::io::DuplexStream>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_assembler() -> Harness {
        let (output_tx, output_rx) = mpsc::channel(8);
        let (command_tx, command_rx) = mpsc::channel(8);
        let (editor_reset, _editor_listener) = reset_channel();
        let (reset_signal, reset_listener) = reset_channel();
        let context = Arc::new(PipelineContext::new(editor_reset, reset_signal.clone()));
        let (sink_tx, sink_rx) = tokio::io::duplex(4096);
        let assembler =
            RecordAssembler::new(output_rx, command_rx, reset_listener, context, sink_tx);
        Harness {
            output_tx,
            command_tx,
            reset_signal,
            sink_rx: tokio::io::BufReader::new(sink_rx),
            task: tokio::spawn(assembler.run()),
        }
    }

    async fn next_line(sink: &mut tokio::io::BufReader<tokio::io::DuplexStream>) -> String {
        use tokio::io::AsyncBufReadExt;
        let mut line = String::new();
        sink.read_line(&mut line).await.expect("read record line");
        line
    }

    #[tokio::test]
    async fn pairs_output_with_the_queued_command() {
        let mut harness = spawn_assembler();
        harness
            .command_tx
            .send("echo hello".to_string())
            .await
            .expect("command queue open");
        harness
            .output_tx
            .send("hello\r\n".to_string())
            .await
            .expect("output queue open");

        let line = next_line(&mut harness.sink_rx).await;
        let record: Record = serde_json::from_str(&line).expect("well-formed record line");
        assert_eq!(record.id, "1");
        assert_eq!(record.command, "echo hello");
        assert_eq!(record.output, "hello\r\n");
        harness.task.abort();
    }

    #[tokio::test]
    async fn missing_command_becomes_the_empty_string() {
        let mut harness = spawn_assembler();
        harness
            .output_tx
            .send("orphan\r\n".to_string())
            .await
            .expect("output queue open");

        let line = next_line(&mut harness.sink_rx).await;
        let record: Record = serde_json::from_str(&line).expect("well-formed record line");
        assert_eq!(record.command, "");
        assert_eq!(record.output, "orphan\r\n");
        harness.task.abort();
    }

    #[tokio::test]
    async fn ids_increase_by_one_and_timestamps_do_not_regress() {
        let mut harness = spawn_assembler();
        for output in ["a\r\n", "b\r\n", "c\r\n"] {
            harness
                .output_tx
                .send(output.to_string())
                .await
                .expect("output queue open");
        }

        let mut previous: Option<Record> = None;
        for expected_id in 1..=3u64 {
            let line = next_line(&mut harness.sink_rx).await;
            let record: Record = serde_json::from_str(&line).expect("well-formed record line");
            assert_eq!(record.id, expected_id.to_string());
            if let Some(previous) = &previous {
                assert!(record.return_timestamp >= previous.return_timestamp);
            }
            previous = Some(record);
        }
        harness.task.abort();
    }

    #[tokio::test]
    async fn reset_drains_pending_items_but_not_the_counter() {
        let mut harness = spawn_assembler();
        harness
            .output_tx
            .send("kept\r\n".to_string())
            .await
            .expect("output queue open");
        let line = next_line(&mut harness.sink_rx).await;
        let record: Record = serde_json::from_str(&line).expect("well-formed record line");
        assert_eq!(record.id, "1");

        // Leave a stale command pending, reset, then emit a fresh output.
        harness
            .command_tx
            .send("stale".to_string())
            .await
            .expect("command queue open");
        assert!(harness.reset_signal.raise());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        harness
            .output_tx
            .send("fresh\r\n".to_string())
            .await
            .expect("output queue open");
        let line = next_line(&mut harness.sink_rx).await;
        let record: Record = serde_json::from_str(&line).expect("well-formed record line");
        assert_eq!(record.id, "2", "counter must survive the reset");
        assert_eq!(record.command, "", "stale command must have been drained");
        harness.task.abort();
    }
}
