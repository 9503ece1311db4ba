use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;

/// Capacity of a reset channel. One slot is the whole point: a reset that is
/// already pending makes a second one redundant, so the extra send is dropped.
const RESET_QUEUE_DEPTH: usize = 1;

/// Shared handles threaded through the constructors of the five pipeline
/// components. The control plane is the only writer of the reading flag and
/// the only caller of the reset signals; everything else observes.
#[derive(Debug)]
pub struct PipelineContext {
    reading: AtomicBool,
    record_seq: AtomicU64,
    editor_reset: ResetSignal,
    assembler_reset: ResetSignal,
}

impl PipelineContext {
    pub fn new(editor_reset: ResetSignal, assembler_reset: ResetSignal) -> Self {
        Self {
            reading: AtomicBool::new(false),
            record_seq: AtomicU64::new(0),
            editor_reset,
            assembler_reset,
        }
    }

    /// Observed by the byte source before forwarding each byte.
    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }

    pub(crate) fn set_reading(&self, reading: bool) {
        self.reading.store(reading, Ordering::SeqCst);
    }

    pub(crate) fn swap_reading(&self, reading: bool) -> bool {
        self.reading.swap(reading, Ordering::SeqCst)
    }

    /// Mints the next record sequence number. The counter survives resets so
    /// record ids stay globally monotonic for the lifetime of the process.
    pub fn next_record_seq(&self) -> u64 {
        self.record_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn raise_editor_reset(&self) -> bool {
        self.editor_reset.raise()
    }

    pub(crate) fn raise_assembler_reset(&self) -> bool {
        self.assembler_reset.raise()
    }
}

/// Sender half of a single-slot reset channel.
#[derive(Debug, Clone)]
pub struct ResetSignal {
    tx: mpsc::Sender<()>,
}

impl ResetSignal {
    /// Raises the reset. Returns false when a token was already pending and
    /// this one was dropped as redundant.
    pub fn raise(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Receiver half of a single-slot reset channel.
#[derive(Debug)]
pub struct ResetListener {
    rx: mpsc::Receiver<()>,
}

impl ResetListener {
    /// Resolves on the next pending token, or `None` once every
    /// [`ResetSignal`] clone has been dropped.
    pub async fn observed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

pub fn reset_channel() -> (ResetSignal, ResetListener) {
    let (tx, rx) = mpsc::channel(RESET_QUEUE_DEPTH);
    (ResetSignal { tx }, ResetListener { rx })
}
