//! Seam to the external provisioning tool invoked per unit.

use core::future::Future;
use core::pin::Pin;

use anyhow::Error as AnyError;
use tokio_util::sync::CancellationToken;

use crate::unit::Unit;

pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BackendOutput, AnyError>> + Send + 'a>>;

/// One backend invocation against a unit.
pub struct BackendInvocation<'a> {
    pub unit: &'a Unit,
    /// Backend command (`apply`, `destroy`, ...).
    pub command: &'a str,
    /// Extra CLI arguments from the unit's effective options.
    pub args: &'a [String],
    /// Run-scoped cancellation; the backend should abort promptly once
    /// cancelled, and its outcome is still honored.
    pub cancel: CancellationToken,
}

/// Captured result of a backend invocation. Output is buffered per unit and
/// flushed to the shared streams under the orchestrator's lock.
#[derive(Debug, Default)]
pub struct BackendOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl BackendOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output used for error-policy pattern matching.
    pub(crate) fn combined_text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).into_owned();
        if !self.stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

/// Trait implemented by the external provisioning tool adapter.
///
/// A non-zero exit or an error return marks the node as a Failure; the error
/// is preserved in the aggregate result.
pub trait BackendRunner: Send + Sync + 'static {
    /// Executed by scheduler workers. Always async so it can drive subprocess
    /// I/O.
    fn run<'a>(&'a self, invocation: BackendInvocation<'a>) -> BackendFuture<'a>;
}
