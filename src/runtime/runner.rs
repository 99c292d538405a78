use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::stack::Stack;

/// Coordinates one stack run and handles OS signals for graceful shutdowns.
pub struct Runner {
    stack: Stack,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that
    /// propagates through the scheduler, retries, and backend invocations.
    pub fn new(stack: Stack) -> Self {
        Self {
            stack,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Runs the stack to completion, cancelling it if a Ctrl-C (SIGINT)
    /// arrives first. In-flight units finish naturally; everything not yet
    /// started ends as an early exit.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; cancelling run");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.stack.run(self.shutdown.clone()).await;

        self.shutdown.cancel();
        let _ = signal_task.await;

        result.map_err(Into::into)
    }
}
