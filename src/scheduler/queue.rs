//! Async ready-queue feeding scheduler workers.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

struct QueueState {
    ready: VecDeque<usize>,
    closed: bool,
}

/// Queue of runnable node indices. Workers block on `pop` until a node is
/// ready or the queue is closed.
pub(crate) struct ReadyQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) async fn push(&self, idx: usize) {
        let mut state = self.state.lock().await;
        state.ready.push_back(idx);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Returns the next runnable node, or `None` once the queue is closed and
    /// drained.
    pub(crate) async fn pop(&self) -> Option<usize> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(idx) = state.ready.pop_front() {
                    return Some(idx);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Closes the queue; blocked and future `pop` calls drain what remains
    /// and then return `None`.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }
}
