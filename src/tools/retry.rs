// src/tools/retry.rs

//! Retry policy for external tools with unexplained, intermittent failures.
//!
//! A fresh process is built for every attempt (a `ChildProcess` never spawns
//! twice). After the configured attempts, an optional fallback command (for
//! instance the same build forced to a single job) gets one last try.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{BuildError, Result};
use crate::exec::ChildProcess;

use super::{BoxFuture, Tool, ToolOutput};

type ProcessFactory = Box<dyn Fn() -> ChildProcess + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts of the main command, at least one.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 1 }
    }
}

pub struct RetryingTool {
    name: String,
    make: ProcessFactory,
    fallback: Option<ProcessFactory>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    current: Mutex<Option<Arc<ChildProcess>>>,
    output: Mutex<ToolOutput>,
}

impl std::fmt::Debug for RetryingTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTool")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryingTool {
    pub fn new<F>(name: impl Into<String>, policy: RetryPolicy, make: F) -> Self
    where
        F: Fn() -> ChildProcess + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            make: Box::new(make),
            fallback: None,
            policy,
            cancel: CancellationToken::new(),
            current: Mutex::new(None),
            output: Mutex::new(ToolOutput::Nothing),
        }
    }

    pub fn with_fallback<F>(mut self, make: F) -> Self
    where
        F: Fn() -> ChildProcess + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(make));
        self
    }

    async fn attempt(&self, make: &ProcessFactory) -> Result<i32> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Interrupted);
        }
        let process = Arc::new(make().cancel_on(&self.cancel));
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&process));

        let result = match process.run() {
            Ok(()) => process.join().await,
            Err(e) => Err(e),
        };

        self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
        result
    }

    fn record(&self, code: i32) {
        *self.output.lock().unwrap_or_else(|e| e.into_inner()) = ToolOutput::ExitCode(code);
    }
}

impl Tool for RetryingTool {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let attempts = self.policy.attempts.max(1);
            let mut last_err = None;

            for attempt in 1..=attempts {
                match self.attempt(&self.make).await {
                    Ok(code) => {
                        self.record(code);
                        return Ok(());
                    }
                    Err(e) if e.is_interrupted() => return Err(e),
                    Err(e) => {
                        if attempt < attempts {
                            warn!(tool = %self.name, attempt, error = %e, "attempt failed; retrying");
                        }
                        last_err = Some(e);
                    }
                }
            }

            if let Some(fallback) = &self.fallback {
                warn!(tool = %self.name, attempts, "all attempts failed; trying fallback");
                let code = self.attempt(fallback).await?;
                self.record(code);
                return Ok(());
            }

            debug!(tool = %self.name, attempts, "giving up");
            Err(last_err.unwrap_or(BuildError::Interrupted))
        })
    }

    fn interrupt(&self) {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner()).clone();
        // Interrupt the live process before cancelling the parent token, so a
        // first interrupt is not mistaken for an escalation.
        if let Some(process) = current {
            process.interrupt();
        }
        self.cancel.cancel();
    }

    fn result(&self) -> ToolOutput {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
