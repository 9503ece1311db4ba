use std::sync::Mutex;
use std::sync::PoisonError;

use tokio::sync::mpsc;
use tracing::debug;

use crate::pipeline::context::ResetListener;

/// In-band marker injected into the byte queue by the control plane on
/// stop-and-flush; tells the editor to snapshot and emit its buffer.
pub const END_OF_COMMAND: u8 = 0x04;

const ESCAPE: u8 = 0x1b;
const CSI_OPEN: u8 = b'[';
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Private-mode parameter of the alternate-screen enter/leave sequences
/// (`CSI ? 1 0 4 9 h` / `CSI ? 1 0 4 9 l`).
const ALTERNATE_SCREEN_PARAM: &[u8] = b"?1049";

/// Escape-sequence progress, encoded as a sum so "inside a CSI sequence"
/// is a state rather than a pair of booleans that could disagree.
#[derive(Debug)]
enum EscapeState {
    /// Not inside any escape sequence.
    Ground,
    /// Seen ESC; the next byte decides whether a CSI sequence starts.
    Introducer,
    /// Inside `ESC [`; accumulating parameter bytes until a final byte.
    Csi(Vec<u8>),
}

/// The edited view of one command's output.
///
/// Invariants: `cursor` stays within `0..=buffer.len()`; while
/// `EscapeState::Csi` is active incoming bytes land in its parameter buffer
/// and never in `buffer`; while `alternate_screen` is set neither `buffer`
/// nor `cursor` changes.
#[derive(Debug)]
struct EditorState {
    buffer: Vec<u8>,
    cursor: usize,
    escape: EscapeState,
    alternate_screen: bool,
}

impl EditorState {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            escape: EscapeState::Ground,
            alternate_screen: false,
        }
    }

    /// Advances the state machine by one byte. Returns the finished output
    /// snapshot when the byte was the end-of-command marker.
    fn apply(&mut self, byte: u8) -> Option<String> {
        match std::mem::replace(&mut self.escape, EscapeState::Ground) {
            EscapeState::Introducer => {
                if byte == CSI_OPEN {
                    self.escape = EscapeState::Csi(Vec::new());
                }
                // Any other escape type is dropped along with this byte; a
                // cooperating shell only ever follows ESC with '['.
                None
            }
            EscapeState::Csi(mut sequence) => {
                sequence.push(byte);
                if is_csi_final(byte) {
                    self.handle_csi(&sequence);
                } else {
                    self.escape = EscapeState::Csi(sequence);
                }
                None
            }
            EscapeState::Ground => {
                if byte == ESCAPE {
                    self.escape = EscapeState::Introducer;
                    return None;
                }
                // Inside a full-screen TUI region nothing is output; only
                // the ESC above stays live so the leave sequence can be
                // recognized.
                if self.alternate_screen {
                    return None;
                }
                match byte {
                    END_OF_COMMAND => Some(self.take_snapshot()),
                    BACKSPACE | DELETE => {
                        self.delete_before_cursor();
                        None
                    }
                    b'\n' | b'\r' => {
                        // Preserved verbatim: downstream consumers depend on
                        // the line boundaries the shell produced.
                        self.insert_at_cursor(byte);
                        None
                    }
                    0x20..=0x7e => {
                        self.insert_at_cursor(byte);
                        None
                    }
                    _ => None,
                }
            }
        }
    }

    fn handle_csi(&mut self, sequence: &[u8]) {
        let Some(&final_byte) = sequence.last() else {
            return;
        };
        let alternate_screen_param = sequence
            .windows(ALTERNATE_SCREEN_PARAM.len())
            .any(|window| window == ALTERNATE_SCREEN_PARAM);
        match final_byte {
            b'h' if alternate_screen_param => self.alternate_screen = true,
            b'l' if alternate_screen_param => self.alternate_screen = false,
            _ if self.alternate_screen => {}
            b'D' => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                }
            }
            b'C' => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                }
            }
            // Color SGR, cursor addressing, scroll regions: not part of any
            // command's semantic output.
            _ => {}
        }
    }

    fn insert_at_cursor(&mut self, byte: u8) {
        if self.cursor == self.buffer.len() {
            self.buffer.push(byte);
        } else {
            self.buffer.insert(self.cursor, byte);
        }
        self.cursor += 1;
    }

    fn delete_before_cursor(&mut self) {
        if self.cursor > 0 {
            self.buffer.remove(self.cursor - 1);
            self.cursor -= 1;
        }
    }

    /// Snapshot for emission: the buffer becomes the output string and the
    /// editor returns to its initial per-command state.
    fn take_snapshot(&mut self) -> String {
        let snapshot = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.cursor = 0;
        self.alternate_screen = false;
        snapshot
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.escape = EscapeState::Ground;
        self.alternate_screen = false;
    }
}

fn is_csi_final(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_lowercase() || byte == b'~'
}

/// Consumes the byte queue and emits one output string per end-of-command
/// marker. State mutations and the reset path serialize on the state mutex;
/// the run loop prefers a pending reset over further bytes, so a reset
/// discards at most the bytes already drained out of the queue.
pub struct LineEditor {
    state: Mutex<EditorState>,
    byte_rx: mpsc::Receiver<u8>,
    reset: ResetListener,
    output_tx: mpsc::Sender<String>,
}

impl LineEditor {
    pub fn new(
        byte_rx: mpsc::Receiver<u8>,
        reset: ResetListener,
        output_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            state: Mutex::new(EditorState::new()),
            byte_rx,
            reset,
            output_tx,
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
                byte = self.byte_rx.recv() => {
                    let Some(byte) = byte else {
                        break;
                    };
                    let emitted = self
                        .state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .apply(byte);
                    if let Some(output) = emitted {
                        if self.output_tx.send(output).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        debug!("line editor exiting");
    }

    /// Clears the editor and throws away everything already queued; bytes
    /// admitted after the control plane cleared the reading flag cannot
    /// exist, so the drained prefix is exactly the desynchronized epoch.
    fn handle_reset(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.clear();
        let mut drained = 0usize;
        while self.byte_rx.try_recv().is_ok() {
            drained += 1;
        }
        debug!(drained, "line editor reset");
    }
}
