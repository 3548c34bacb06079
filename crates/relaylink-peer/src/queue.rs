//! Serialized bring-up queue.
//!
//! Client construction involves awaiting a relay sync, so two concurrent
//! get-or-create calls for the same key could otherwise both miss the registry
//! and build two clients. Every bring-up goes through this queue: tasks run in
//! enqueue order and each one finishes before the next starts.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::error::{PeerError, Result};

type Task = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    busy: bool,
}

/// FIFO executor running one task at a time.
///
/// Must be used from within a tokio runtime.
#[derive(Clone, Default)]
pub struct BringUpQueue {
    state: Arc<Mutex<QueueState>>,
}

impl BringUpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Starts the drain loop if the queue was idle.
    pub fn push<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let start = {
            let mut state = self.state.lock();
            state.tasks.push_back(Box::pin(task));
            !std::mem::replace(&mut state.busy, true)
        };
        if start {
            tokio::spawn(drain(self.state.clone()));
        }
    }

    /// Append a task and wait for its own result.
    ///
    /// A failure reaches the caller unchanged and is also logged by the
    /// queue; later tasks run regardless.
    pub fn run<T, F>(&self, task: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.push(async move {
            let result = task.await;
            let failure = result
                .as_ref()
                .err()
                .map(|err| PeerError::BringUp(err.to_string()));
            // Caller may have stopped waiting.
            let _ = tx.send(result);
            failure.map_or(Ok(()), Err)
        });

        async move {
            rx.await.map_err(|_| {
                PeerError::BringUp("task dropped before completing".to_string())
            })?
        }
    }

    /// Number of tasks waiting to start.
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the drain loop is running.
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }
}

impl std::fmt::Debug for BringUpQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BringUpQueue")
            .field("queued", &state.tasks.len())
            .field("busy", &state.busy)
            .finish()
    }
}

async fn drain(state: Arc<Mutex<QueueState>>) {
    loop {
        let task = {
            let mut state = state.lock();
            match state.tasks.pop_front() {
                Some(task) => task,
                None => {
                    state.busy = false;
                    debug!("bring-up queue drained");
                    return;
                }
            }
        };

        // Spawned so a panicking task is contained to its own join handle.
        match tokio::spawn(task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "bring-up task failed"),
            Err(join_err) => error!(error = %join_err, "bring-up task aborted"),
        }
    }
}
