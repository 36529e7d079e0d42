//! Handles for batches running in the background.
//!
//! A handle owns the spawned task and, once waited on, the batch result.
//! Results are only readable after [`AsyncHandle::wait`] (or [`wait_all`]).

use std::future::Future;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::domain::{BatchResult, CommandOutcome, GatewayError, HostRole};

enum State {
    Running(JoinHandle<Result<BatchResult>>),
    Done(BatchResult),
    /// Error already handed to the first waiter; later waiters get the message.
    Failed(String),
    /// Waiting in progress (transient, never observed outside `wait`).
    Taken,
}

/// An in-flight (or finished) asynchronous batch.
pub struct AsyncHandle {
    id: String,
    role: HostRole,
    state: State,
}

impl AsyncHandle {
    /// Spawn `fut` on the runtime and track it under `id`.
    pub fn spawn<F>(role: HostRole, id: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<BatchResult>> + Send + 'static,
    {
        Self {
            id: id.into(),
            role,
            state: State::Running(tokio::spawn(fut)),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn role(&self) -> HostRole {
        self.role
    }

    /// `true` once the background task has completed (successfully or not).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Running(task) => task.is_finished(),
            _ => true,
        }
    }

    /// Block until the batch finishes.
    ///
    /// # Errors
    ///
    /// Returns the batch's own error (connection failure, truncated output,
    /// panicked task). Waiting again after a failure returns the same message.
    pub async fn wait(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Taken) {
            State::Running(task) => {
                let joined = task.await;
                match joined {
                    Ok(Ok(result)) => {
                        self.state = State::Done(result);
                        Ok(())
                    }
                    Ok(Err(err)) => {
                        self.state = State::Failed(format!("{err:#}"));
                        Err(err.context(format!("batch {} on the {} host failed", self.id, self.role)))
                    }
                    Err(join_err) => {
                        let msg = format!("batch {} task aborted: {join_err}", self.id);
                        self.state = State::Failed(msg.clone());
                        Err(anyhow::anyhow!(msg))
                    }
                }
            }
            State::Done(result) => {
                self.state = State::Done(result);
                Ok(())
            }
            State::Failed(msg) => {
                self.state = State::Failed(msg.clone());
                Err(anyhow::anyhow!("batch {} on the {} host failed: {msg}", self.id, self.role))
            }
            State::Taken => Err(GatewayError::NotWaited(self.id.clone()).into()),
        }
    }

    /// The full result.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotWaited`] before a successful `wait`.
    pub fn batch(&self) -> Result<&BatchResult> {
        match &self.state {
            State::Done(result) => Ok(result),
            _ => Err(GatewayError::NotWaited(self.id.clone()).into()),
        }
    }

    /// One command's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotWaited`] before `wait`, or
    /// [`GatewayError::UnknownLabel`] for a label the job did not contain.
    pub fn result(&self, label: &str) -> Result<&CommandOutcome> {
        Ok(self.batch()?.get(label)?)
    }

    /// Free the handle. A still-running task is detached, not cancelled.
    pub fn release(self) {
        if !self.is_finished() {
            tracing::debug!(batch = %self.id, role = %self.role, "released while still running");
        }
    }
}

/// Wait for every handle, even after one fails.
///
/// # Errors
///
/// Returns the first failure encountered, after all handles have settled.
pub async fn wait_all(handles: &mut [&mut AsyncHandle]) -> Result<()> {
    let mut first_err = None;
    for handle in handles.iter_mut() {
        if let Err(err) = handle.wait().await {
            tracing::warn!(batch = %handle.id(), error = %format!("{err:#}"), "async batch failed");
            first_err.get_or_insert(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}
