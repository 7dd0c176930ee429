use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;

use super::{Document, RemoteError, RemoteResult, RemoteStore, RemoteTree, WriteConfirmation};
use crate::config::RetrySettings;

/// Bounds for retrying transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let initial_delay = Duration::from_millis(settings.initial_delay_ms);
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_millis(settings.max_delay_ms).max(initial_delay),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn schedule(&self) -> impl Backoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Decorator that retries [`RemoteError::Transient`] failures of the wrapped
/// store with exponential backoff.
///
/// Every other failure class, and the last transient failure once attempts
/// run out, is returned to the caller unchanged.
pub struct Retrying<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RemoteStore> Retrying<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn run<T>(&self, what: &str, mut call: impl FnMut(&R) -> RemoteResult<T>) -> RemoteResult<T> {
        let mut attempt = 0u32;
        let operation = || {
            attempt += 1;
            match call(&self.inner) {
                Ok(value) => Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    log::debug!(
                        "{what} failed (attempt {attempt}/{}), retrying: {err}",
                        self.policy.max_attempts
                    );
                    Err(backoff::Error::transient(err))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        };

        backoff::retry(self.policy.schedule(), operation).map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}

impl<R: RemoteStore> RemoteStore for Retrying<R> {
    fn list(&self) -> RemoteResult<RemoteTree> {
        self.run("list", |r| r.list())
    }

    fn read(&self, path: &str) -> RemoteResult<Document> {
        self.run(&format!("read {path}"), |r| r.read(path))
    }

    fn write(&self, path: &str, content: &str) -> RemoteResult<WriteConfirmation> {
        self.run(&format!("write {path}"), |r| r.write(path, content))
    }

    fn delete(&self, path: &str, recursive: bool) -> RemoteResult<Option<u64>> {
        self.run(&format!("delete {path}"), |r| r.delete(path, recursive))
    }

    fn rename(&self, old_path: &str, new_path: &str) -> RemoteResult<Option<WriteConfirmation>> {
        self.run(&format!("rename {old_path}"), |r| r.rename(old_path, new_path))
    }
}
