use std::ffi::CString;
use std::io::ErrorKind;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use termscribe_core::pipeline::Pipeline;
use termscribe_core::pipeline::PipelineConfig;
use tracing::debug;
use tracing::warn;

/// Structures a `script`-recorded shell session into line-delimited JSON
/// records, one per executed command.
///
/// Runs as a long-lived companion to the recorded shell. The shell drives it
/// with signals: SIGUSR1 starts capturing output, SIGUSR2 stops and flushes
/// one record, SIGHUP resets a desynchronized pipeline, and SIGINT/SIGTERM
/// terminate. Records are written to stdout.
#[derive(Debug, Parser)]
#[command(name = "termscribe", version)]
struct Cli {
    /// FIFO carrying the raw session byte stream (created if missing).
    #[arg(long = "session-stream", value_name = "PATH")]
    session_stream: PathBuf,

    /// FIFO carrying newline-delimited command strings (created if missing).
    #[arg(long = "command-stream", value_name = "PATH")]
    command_stream: PathBuf,

    /// Write the structurer's process id to this file, removed on exit.
    #[arg(long = "pid-file", value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Log verbosity when RUST_LOG is not set.
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    ensure_fifo(&cli.session_stream)?;
    ensure_fifo(&cli.command_stream)?;

    if let Some(path) = &cli.pid_file {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        debug!(path = %path.display(), "pid file written");
    }

    // Opening the session FIFO blocks until the recorder attaches its
    // writer, so the pid file above is already in place while we wait.
    let config = PipelineConfig {
        session_stream: cli.session_stream.clone(),
        command_stream: cli.command_stream.clone(),
    };
    let run_result = match Pipeline::open(config, tokio::io::stdout()).await {
        Ok(pipeline) => pipeline.run().await.map_err(anyhow::Error::from),
        Err(err) => Err(err.into()),
    };

    if let Some(path) = &cli.pid_file {
        if let Err(err) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove pid file");
        }
    }

    run_result
}

fn setup_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Records own stdout; diagnostics go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Creates `path` as a FIFO unless something already exists there. An
/// existing FIFO from a previous run is reused as-is; any other file type is
/// refused rather than clobbered.
fn ensure_fifo(path: &Path) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_fifo() {
                bail!("{} exists but is not a FIFO", path.display());
            }
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => mkfifo(path),
        Err(err) => {
            Err(err).with_context(|| format!("failed to inspect endpoint {}", path.display()))
        }
    }
}

fn mkfifo(path: &Path) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("endpoint path {} contains a NUL byte", path.display()))?;
    // SAFETY: c_path is a valid NUL-terminated path for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("failed to create FIFO {}", path.display()));
    }
    debug!(path = %path.display(), "created FIFO endpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_full_argument_surface() {
        let cli = Cli::try_parse_from([
            "termscribe",
            "--session-stream",
            "/run/termscribe/session",
            "--command-stream",
            "/run/termscribe/commands",
            "--pid-file",
            "/run/termscribe/pid",
            "--log-level",
            "debug",
        ])
        .expect("arguments parse");
        assert_eq!(
            cli.session_stream,
            PathBuf::from("/run/termscribe/session")
        );
        assert_eq!(
            cli.command_stream,
            PathBuf::from("/run/termscribe/commands")
        );
        assert_eq!(cli.pid_file.as_deref(), Some(Path::new("/run/termscribe/pid")));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn log_level_defaults_to_info_and_pid_file_is_optional() {
        let cli = Cli::try_parse_from([
            "termscribe",
            "--session-stream",
            "/tmp/s",
            "--command-stream",
            "/tmp/c",
        ])
        .expect("arguments parse");
        assert_eq!(cli.log_level, "info");
        assert!(cli.pid_file.is_none());
    }

    #[test]
    fn both_stream_endpoints_are_required() {
        let result = Cli::try_parse_from(["termscribe", "--session-stream", "/tmp/s"]);
        assert!(result.is_err(), "command stream must be mandatory");
    }

    #[test]
    fn ensure_fifo_refuses_a_regular_file() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let result = ensure_fifo(file.path());
        assert!(result.is_err(), "a regular file is not a usable endpoint");
    }

    #[test]
    fn ensure_fifo_creates_and_then_reuses_the_endpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stream");
        ensure_fifo(&path).expect("create fifo");
        ensure_fifo(&path).expect("reuse existing fifo");
    }
}
