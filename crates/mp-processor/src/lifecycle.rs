//! Asynchronous start signalling
//!
//! A service's `start` returns immediately; the real work runs on a
//! background task that reports through the [`StartContext`] it was given.
//! The caller keeps the paired [`StartCompletion`] and awaits it.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::{ProcessorError, Result};

/// Completion token handed to a starting service.
#[derive(Debug)]
pub struct StartContext {
    service: String,
    completion: oneshot::Sender<Result<()>>,
}

/// The caller's side of a [`StartContext`].
#[derive(Debug)]
pub struct StartCompletion {
    service: String,
    receiver: oneshot::Receiver<Result<()>>,
}

impl StartContext {
    pub fn new(service: impl Into<String>) -> (Self, StartCompletion) {
        let service = service.into();
        let (completion, receiver) = oneshot::channel();
        (
            Self {
                service: service.clone(),
                completion,
            },
            StartCompletion { service, receiver },
        )
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn complete(self) {
        self.signal(Ok(()));
    }

    pub fn failed(self, error: ProcessorError) {
        self.signal(Err(error));
    }

    fn signal(self, result: Result<()>) {
        if self.completion.send(result).is_err() {
            debug!(service = %self.service, "Start completion no longer awaited");
        }
    }
}

impl StartCompletion {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Wait for the start outcome. A context dropped without signalling is
    /// reported as [`ProcessorError::StartAborted`].
    pub async fn wait(self) -> Result<()> {
        self.receiver
            .await
            .unwrap_or(Err(ProcessorError::StartAborted(self.service)))
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Result<()> {
        let service = self.service.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ProcessorError::StartTimeout { service, timeout }),
        }
    }
}
