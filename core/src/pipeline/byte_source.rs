use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::StructurerError;
use crate::pipeline::context::PipelineContext;

const READ_CHUNK_SIZE: usize = 8192; // bytes per read

/// Reads the recorded session byte stream and forwards bytes into the byte
/// queue, but only those observed while the reading flag is set. Prompt
/// rendering, keystroke echo, and inter-command chatter are discarded here,
/// at the earliest point, so they can never reach the line editor's buffer.
pub struct ByteSource<R> {
    stream: R,
    context: Arc<PipelineContext>,
    byte_tx: mpsc::Sender<u8>,
}

impl<R> ByteSource<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(stream: R, context: Arc<PipelineContext>, byte_tx: mpsc::Sender<u8>) -> Self {
        Self {
            stream,
            context,
            byte_tx,
        }
    }

    /// Runs until end-of-stream or a read fault. A fault terminates only
    /// this source; the rest of the pipeline drains normally.
    pub async fn run(mut self) -> Result<(), StructurerError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = match self.stream.read(&mut chunk).await {
                Ok(0) => {
                    debug!("session stream closed by the recorder");
                    return Ok(());
                }
                Ok(read) => read,
                Err(err) => return Err(StructurerError::session_stream_read(err)),
            };
            for &byte in &chunk[..read] {
                // The gate is re-checked per byte: a stop-and-flush landing
                // mid-chunk must keep the tail of that chunk out of the queue.
                if !self.context.is_reading() {
                    continue;
                }
                if self.byte_tx.send(byte).await.is_err() {
                    debug!("byte queue closed; session source exiting");
                    return Ok(());
                }
            }
        }
    }
}
