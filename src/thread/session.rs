//! # Impersonation Session
//!
//! The caller-side handle to one accepted (or rejected) task. A valid
//! session is bound to the worker that took the task and carries the
//! receiver for its result; an invalid one carries the rejection cause.
//! `get_result` blocks until the worker deposits the status and consumes
//! the session: the result is read once, by one consumer.

use eyre::Result;

use crate::error::EngineError;

use super::oneshot;
use super::worker::TaskResult;
use super::ThreadId;

pub struct ImpersonateSession {
    worker: Option<ThreadId>,
    result: Option<oneshot::Receiver<TaskResult>>,
    invalid_cause: Option<EngineError>,
}

impl ImpersonateSession {
    pub(crate) fn valid(worker: ThreadId, result: oneshot::Receiver<TaskResult>) -> Self {
        Self {
            worker: Some(worker),
            result: Some(result),
            invalid_cause: None,
        }
    }

    pub(crate) fn invalid(cause: EngineError) -> Self {
        Self {
            worker: None,
            result: None,
            invalid_cause: Some(cause),
        }
    }

    /// Whether a worker accepted the task.
    pub fn is_valid(&self) -> bool {
        self.result.is_some()
    }

    /// Why impersonation failed, for invalid sessions.
    pub fn invalid_cause(&self) -> Option<&EngineError> {
        self.invalid_cause.as_ref()
    }

    /// The worker bound to this session, for valid ones.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.worker
    }

    /// Blocks until the task completes and returns its status unchanged.
    /// On an invalid session, returns the rejection cause instead.
    pub fn get_result(mut self) -> Result<()> {
        match self.result.take() {
            Some(receiver) => receiver.recv(),
            None => {
                let cause = self
                    .invalid_cause
                    .take()
                    .unwrap_or(EngineError::NoIdleWorker);
                Err(cause.into())
            }
        }
    }
}
