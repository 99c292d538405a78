//! Serialized access to the shared output streams.
//!
//! Each unit's backend output is captured in per-unit buffers and flushed
//! here under a lock, so concurrent units never interleave mid-line.

use std::io::{self, Write};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::runtime::backend::BackendOutput;

/// Shared sink the orchestrator hands to the scheduler.
#[derive(Clone)]
pub struct OutputSink {
    stdout: Arc<Mutex<Box<dyn Write + Send>>>,
    stderr: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self {
            stdout: Arc::new(Mutex::new(stdout)),
            stderr: Arc::new(Mutex::new(stderr)),
        }
    }

    /// Sink wired to the process stdout/stderr.
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Sink that discards everything.
    pub fn discard() -> Self {
        Self::new(Box::new(io::sink()), Box::new(io::sink()))
    }

    /// Writes raw bytes to the shared stderr stream under its lock.
    pub(crate) async fn write_stderr(&self, bytes: &[u8]) {
        let mut stderr = self.stderr.lock().await;
        if let Err(err) = stderr.write_all(bytes).and_then(|()| stderr.flush()) {
            tracing::warn!(error = %err, "failed to write to stderr");
        }
    }

    /// Flushes one unit's captured output; holds each stream lock for the
    /// whole buffer so output stays contiguous.
    pub(crate) async fn flush_unit(&self, output: &BackendOutput) {
        if !output.stdout.is_empty() {
            let mut stdout = self.stdout.lock().await;
            if let Err(err) = stdout.write_all(&output.stdout).and_then(|()| stdout.flush()) {
                tracing::warn!(error = %err, "failed to flush unit stdout");
            }
        }

        if !output.stderr.is_empty() {
            let mut stderr = self.stderr.lock().await;
            if let Err(err) = stderr.write_all(&output.stderr).and_then(|()| stderr.flush()) {
                tracing::warn!(error = %err, "failed to flush unit stderr");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_unit_writes_both_streams() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let sink = OutputSink::new(Box::new(out.clone()), Box::new(err.clone()));

        let output = BackendOutput {
            exit_code: 0,
            stdout: b"applied".to_vec(),
            stderr: b"warned".to_vec(),
        };
        sink.flush_unit(&output).await;

        assert_eq!(out.0.lock().unwrap().as_slice(), b"applied");
        assert_eq!(err.0.lock().unwrap().as_slice(), b"warned");
    }
}
