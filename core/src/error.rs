use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructurerError {
    #[error("failed to open session stream {path}: {source}")]
    OpenSessionStream {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open command stream {path}: {source}")]
    OpenCommandStream {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read the session stream: {source}")]
    SessionStreamRead {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read the command stream: {source}")]
    CommandStreamRead {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record {id}: {source}")]
    SerializeRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write record {id} to the sink: {source}")]
    WriteSink {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install handler for {signal}: {source}")]
    SignalSetup {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl StructurerError {
    pub(crate) fn open_session_stream(path: PathBuf, source: std::io::Error) -> Self {
        Self::OpenSessionStream { path, source }
    }

    pub(crate) fn open_command_stream(path: PathBuf, source: std::io::Error) -> Self {
        Self::OpenCommandStream { path, source }
    }

    pub(crate) fn session_stream_read(source: std::io::Error) -> Self {
        Self::SessionStreamRead { source }
    }

    pub(crate) fn command_stream_read(source: std::io::Error) -> Self {
        Self::CommandStreamRead { source }
    }

    pub(crate) fn serialize_record(id: String, source: serde_json::Error) -> Self {
        Self::SerializeRecord { id, source }
    }

    pub(crate) fn write_sink(id: String, source: std::io::Error) -> Self {
        Self::WriteSink { id, source }
    }

    pub(crate) fn signal_setup(signal: &'static str, source: std::io::Error) -> Self {
        Self::SignalSetup { signal, source }
    }
}
