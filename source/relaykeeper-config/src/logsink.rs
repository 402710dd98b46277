//! Injectable log destinations. This crate never opens a log file itself;
//! the binary's bootstrap constructs concrete [`Sink`]s (rotating files in
//! production, stdout or an in-memory buffer in tests) and hands them in.

use std::fmt::Arguments;
use std::sync::Arc;

/// One line-oriented destination. Implementations must be cheap to call
/// from an async context; they should not block on their own I/O for long.
pub trait Sink: Send + Sync {
    fn write_line(&self, line: Arguments<'_>);
}

/// Discards everything. Used where a caller needs a `Sink` but has nothing
/// to attach (tests, `--quiet` runs).
pub struct NullSink;

impl Sink for NullSink {
    fn write_line(&self, _line: Arguments<'_>) {}
}

/// Writes to process stdout. Used by the CLI in non-daemonized runs.
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn write_line(&self, line: Arguments<'_>) {
        println!("{line}");
    }
}

/// Appends to a file, reopening on every write so external log rotation
/// (e.g. `logrotate`) doesn't leave the sink writing to a deleted inode.
pub struct FileSink {
    path: std::path::PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for FileSink {
    fn write_line(&self, line: Arguments<'_>) {
        use std::io::Write as _;
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// The three log destinations injected into the Supervisor (child
/// stdout/stderr), Control-Plane Client (request/response tracing), and
/// Configuration Service (main).
#[derive(Clone)]
pub struct LogSinks {
    pub main: Arc<dyn Sink>,
    pub child: Arc<dyn Sink>,
    pub control: Arc<dyn Sink>,
}

impl LogSinks {
    pub fn null() -> Self {
        Self { main: Arc::new(NullSink), child: Arc::new(NullSink), control: Arc::new(NullSink) }
    }

    pub fn stdout() -> Self {
        Self { main: Arc::new(StdoutSink), child: Arc::new(StdoutSink), control: Arc::new(StdoutSink) }
    }

    pub fn files(log_dir: &std::path::Path) -> Self {
        Self {
            main: Arc::new(FileSink::new(log_dir.join("main.log"))),
            child: Arc::new(FileSink::new(log_dir.join("core.log"))),
            control: Arc::new(FileSink::new(log_dir.join("control.log"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_sink_appends_across_writes() {
        let dir = tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("out.log"));
        sink.write_line(format_args!("first"));
        sink.write_line(format_args!("second"));

        let contents = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn null_sink_is_a_no_op() {
        NullSink.write_line(format_args!("discarded"));
    }
}
