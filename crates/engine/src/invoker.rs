//! Step invocation: dispatching operations to services with a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use definition::OperationRef;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::instance::Context;

/// A business failure reported by a service operation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ServiceFailure(pub String);

impl ServiceFailure {
    pub fn new(message: impl Into<String>) -> Self {
        ServiceFailure(message.into())
    }
}

/// Dispatches an operation call to the owning service.
///
/// Implementations carry the transport (HTTP, message bus, in-process);
/// the engine only sees the result fragment or the failure.
#[async_trait]
pub trait ServiceRouter: Send + Sync {
    /// Invokes the operation with a read-only view of the instance
    /// context and returns its result fragment.
    async fn call(
        &self,
        target: &OperationRef,
        context: &Context,
    ) -> Result<serde_json::Value, ServiceFailure>;
}

/// Outcome of one step invocation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// The operation returned a result fragment.
    Succeeded(serde_json::Value),
    /// The operation reported a business failure.
    Failed(String),
    /// No response arrived within the step's timeout.
    TimedOut,
}

/// Invokes step operations through a [`ServiceRouter`], enforcing the
/// per-attempt timeout. Each retry attempt gets a fresh timeout budget.
pub struct StepInvoker<R> {
    router: Arc<R>,
}

impl<R> Clone for StepInvoker<R> {
    fn clone(&self) -> Self {
        StepInvoker {
            router: Arc::clone(&self.router),
        }
    }
}

impl<R: ServiceRouter> StepInvoker<R> {
    pub fn new(router: Arc<R>) -> Self {
        StepInvoker { router }
    }

    /// Calls the operation, mapping timeouts and failures to a
    /// non-erroring outcome the engine can record and retry.
    pub async fn invoke(
        &self,
        target: &OperationRef,
        context: &Context,
        timeout: Duration,
    ) -> InvokeOutcome {
        match tokio::time::timeout(timeout, self.router.call(target, context)).await {
            Ok(Ok(output)) => InvokeOutcome::Succeeded(output),
            Ok(Err(failure)) => InvokeOutcome::Failed(failure.to_string()),
            Err(_) => {
                tracing::warn!(
                    service = %target.service,
                    operation = %target.operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "Operation call timed out"
                );
                InvokeOutcome::TimedOut
            }
        }
    }
}

/// Scripted behavior for one operation of the in-memory router.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Always succeed with this result fragment.
    Succeed(serde_json::Value),
    /// Always fail with this error.
    Fail(String),
    /// Fail the next `remaining` calls, then succeed with `then`.
    FailTimes {
        remaining: u32,
        error: String,
        then: serde_json::Value,
    },
    /// Sleep for `latency` before evaluating the inner behavior.
    Delay {
        latency: Duration,
        then: Box<Behavior>,
    },
}

#[derive(Default)]
struct RouterState {
    behaviors: HashMap<String, Behavior>,
    calls: Vec<String>,
}

/// In-process [`ServiceRouter`] with scripted per-operation behavior.
///
/// Used by tests and local demos to stand in for real services.
#[derive(Default)]
pub struct InMemoryServiceRouter {
    state: Mutex<RouterState>,
}

impl InMemoryServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior for `service/operation`.
    pub async fn register(&self, target: &OperationRef, behavior: Behavior) {
        let mut state = self.state.lock().await;
        state.behaviors.insert(target.to_string(), behavior);
    }

    /// Returns every call made so far, as `service/operation` strings,
    /// in invocation order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Returns how many times `target` has been called.
    pub async fn call_count(&self, target: &OperationRef) -> usize {
        let key = target.to_string();
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == key)
            .count()
    }
}

/// Resolves a behavior to (accumulated delay, result), decrementing
/// FailTimes counters in place.
fn evaluate(behavior: &mut Behavior) -> (Duration, Result<serde_json::Value, String>) {
    match behavior {
        Behavior::Succeed(output) => (Duration::ZERO, Ok(output.clone())),
        Behavior::Fail(error) => (Duration::ZERO, Err(error.clone())),
        Behavior::FailTimes {
            remaining,
            error,
            then,
        } => {
            if *remaining > 0 {
                *remaining -= 1;
                (Duration::ZERO, Err(error.clone()))
            } else {
                (Duration::ZERO, Ok(then.clone()))
            }
        }
        Behavior::Delay { latency, then } => {
            let (inner_delay, result) = evaluate(then);
            (*latency + inner_delay, result)
        }
    }
}

#[async_trait]
impl ServiceRouter for InMemoryServiceRouter {
    async fn call(
        &self,
        target: &OperationRef,
        _context: &Context,
    ) -> Result<serde_json::Value, ServiceFailure> {
        let key = target.to_string();
        let (delay, result) = {
            let mut state = self.state.lock().await;
            state.calls.push(key.clone());
            match state.behaviors.get_mut(&key) {
                Some(behavior) => evaluate(behavior),
                None => (
                    Duration::ZERO,
                    Err(format!("no handler registered for '{key}'")),
                ),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result.map_err(ServiceFailure)
    }
}
