//! The saga execution engine: drives instances from start to a
//! terminal status, retrying and compensating per their definitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::InstanceId;
use definition::{DefinitionRegistry, OperationRef, RetryDecision, RetryPolicy, WorkflowDefinition};
use futures_util::future::join_all;
use instance_store::{AppendOptions, EventEnvelope, InstanceStore, Sequence};
use tokio::sync::Mutex as TokioMutex;
use tokio::time::Instant;

use crate::compensation::{self, CompensationResult};
use crate::error::EngineError;
use crate::events::InstanceEvent;
use crate::instance::{Context, WorkflowInstance};
use crate::invoker::{InvokeOutcome, ServiceRouter, StepInvoker};
use crate::publisher::{NullPublisher, OutcomePublisher, WorkflowOutcome};
use crate::repository::{replay, InstanceRepository};
use crate::status::InstanceStatus;

/// Appends transition events to one instance's log with optimistic
/// sequence checks, tracking the tail across appends.
struct LogWriter<'a, S> {
    store: &'a S,
    instance_id: InstanceId,
    tail: Sequence,
}

impl<'a, S: InstanceStore> LogWriter<'a, S> {
    fn new(store: &'a S, instance_id: InstanceId, tail: Sequence) -> Self {
        LogWriter {
            store,
            instance_id,
            tail,
        }
    }

    async fn append(&mut self, events: &[InstanceEvent]) -> Result<(), EngineError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut sequence = self.tail;
        for event in events {
            sequence = sequence.next();
            envelopes.push(
                EventEnvelope::builder()
                    .event_type(event.event_type())
                    .instance_id(self.instance_id)
                    .sequence(sequence)
                    .payload(event)?
                    .build(),
            );
        }
        self.tail = self
            .store
            .append(envelopes, AppendOptions::expect_sequence(self.tail))
            .await?;
        Ok(())
    }
}

/// A step selected for invocation in the current drive iteration.
struct ReadyStep {
    name: String,
    attempt: u32,
    target: OperationRef,
    timeout: Duration,
    retry: RetryPolicy,
}

enum Drive {
    /// The instance reached a terminal status.
    Terminal(InstanceStatus),
    /// Work was done; re-evaluate immediately.
    Progressed,
    /// Nothing runnable until the given instant (earliest retry due).
    WaitUntil(Instant),
}

/// Orchestrates workflow instances against an instance store.
///
/// One engine serves many instances. Per-instance async locks make the
/// engine the single writer for any given instance within this process;
/// the store's sequence check catches writers in other processes.
pub struct Engine<S, R> {
    store: S,
    registry: Arc<DefinitionRegistry>,
    invoker: StepInvoker<R>,
    publisher: Arc<dyn OutcomePublisher>,
    locks: StdMutex<HashMap<InstanceId, Arc<TokioMutex<()>>>>,
}

impl<S, R> Engine<S, R>
where
    S: InstanceStore + Clone,
    R: ServiceRouter,
{
    pub fn new(store: S, registry: Arc<DefinitionRegistry>, router: Arc<R>) -> Self {
        Engine {
            store,
            registry,
            invoker: StepInvoker::new(router),
            publisher: Arc::new(NullPublisher),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Replaces the outcome publisher.
    pub fn with_publisher(mut self, publisher: Arc<dyn OutcomePublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Returns the definition registry backing this engine.
    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    /// Returns a read-side repository over the same store.
    pub fn repository(&self) -> InstanceRepository<S> {
        InstanceRepository::new(self.store.clone())
    }

    /// Starts a new instance of a registered workflow.
    ///
    /// Resolves the definition first (a specific version, or the latest
    /// when `version` is None) so that nothing is recorded when the
    /// definition is unknown. Returns the new instance's ID; the caller
    /// drives it with [`Engine::run_to_terminal`].
    pub async fn start(
        &self,
        workflow: &str,
        version: Option<u32>,
        initial_context: Context,
    ) -> Result<InstanceId, EngineError> {
        let definition = match version {
            Some(version) => self.registry.get(workflow, version)?,
            None => self.registry.latest(workflow)?,
        };

        let instance_id = InstanceId::new();
        let event = InstanceEvent::instance_started(
            instance_id,
            definition.definition_ref(),
            initial_context,
        );
        let mut writer = LogWriter::new(&self.store, instance_id, Sequence::initial());
        writer.append(std::slice::from_ref(&event)).await?;

        metrics::counter!("saga_instances_started_total").increment(1);
        tracing::info!(
            instance_id = %instance_id,
            workflow = %definition.definition_ref(),
            "Workflow instance started"
        );
        Ok(instance_id)
    }

    /// Starts an instance and drives it to a terminal status.
    pub async fn start_and_run(
        &self,
        workflow: &str,
        version: Option<u32>,
        initial_context: Context,
    ) -> Result<(InstanceId, InstanceStatus), EngineError> {
        let instance_id = self.start(workflow, version, initial_context).await?;
        let status = self.run_to_terminal(instance_id).await?;
        Ok((instance_id, status))
    }

    /// Drives an instance until it reaches Succeeded, Compensated or
    /// Failed, and returns that status.
    ///
    /// Holds the instance lock only while acting; retry waits sleep
    /// outside it, and the state is reloaded after every wake so a
    /// concurrent [`Engine::force_compensate`] wins over a pending
    /// retry.
    #[tracing::instrument(skip(self), fields(instance_id = %instance_id))]
    pub async fn run_to_terminal(
        &self,
        instance_id: InstanceId,
    ) -> Result<InstanceStatus, EngineError> {
        let lock = self.instance_lock(instance_id);
        let mut retry_due: HashMap<String, Instant> = HashMap::new();

        loop {
            let wait_until = {
                let _guard = lock.lock().await;
                match self.drive_once(instance_id, &mut retry_due).await? {
                    Drive::Terminal(status) => return Ok(status),
                    Drive::Progressed => continue,
                    Drive::WaitUntil(instant) => instant,
                }
            };
            tokio::time::sleep_until(wait_until).await;
        }
    }

    /// Abandons forward execution of a running instance and unwinds it.
    ///
    /// Valid only while the instance is `Running`; any other status
    /// yields [`EngineError::InvalidState`]. Runs the compensation walk
    /// to a terminal status and returns it.
    #[tracing::instrument(skip(self, reason), fields(instance_id = %instance_id))]
    pub async fn force_compensate(
        &self,
        instance_id: InstanceId,
        reason: impl Into<String>,
    ) -> Result<InstanceStatus, EngineError> {
        let reason = reason.into();
        let lock = self.instance_lock(instance_id);
        let _guard = lock.lock().await;

        let (mut instance, definition, mut writer, started_at) =
            self.load_for_drive(instance_id).await?;

        if instance.status() != InstanceStatus::Running {
            return Err(EngineError::InvalidState {
                instance_id,
                status: instance.status(),
            });
        }

        tracing::info!(instance_id = %instance_id, reason = %reason, "Compensation forced");
        self.begin_compensation(&definition, &mut instance, &mut writer, started_at, reason)
            .await
    }

    /// Resumes every non-terminal instance found in the store, driving
    /// each to a terminal status. Intended for process startup after a
    /// crash; replayed history makes resumption idempotent.
    pub async fn recover(&self) -> Result<Vec<(InstanceId, InstanceStatus)>, EngineError> {
        let mut resumed = Vec::new();
        for summary in self.repository().list_by_status(None).await? {
            if summary.status.is_terminal() {
                continue;
            }
            tracing::info!(
                instance_id = %summary.instance_id,
                status = %summary.status,
                "Resuming instance after restart"
            );
            let status = self.run_to_terminal(summary.instance_id).await?;
            resumed.push((summary.instance_id, status));
        }
        Ok(resumed)
    }

    fn instance_lock(&self, instance_id: InstanceId) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(instance_id).or_default())
    }

    async fn load_for_drive(
        &self,
        instance_id: InstanceId,
    ) -> Result<
        (
            WorkflowInstance,
            Arc<WorkflowDefinition>,
            LogWriter<'_, S>,
            DateTime<Utc>,
        ),
        EngineError,
    > {
        let events = self.store.events_for_instance(instance_id).await?;
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Err(EngineError::InstanceNotFound(instance_id));
        };
        let started_at = first.timestamp;
        let tail = last.sequence;

        let instance = replay(&events)?;
        let workflow = instance
            .workflow()
            .cloned()
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        let definition = self.registry.get(&workflow.name, workflow.version)?;
        let writer = LogWriter::new(&self.store, instance_id, tail);
        Ok((instance, definition, writer, started_at))
    }

    /// One drive iteration: reload state, then either invoke the ready
    /// steps, finish the instance, escalate to compensation, or report
    /// the earliest retry due time.
    async fn drive_once(
        &self,
        instance_id: InstanceId,
        retry_due: &mut HashMap<String, Instant>,
    ) -> Result<Drive, EngineError> {
        let (mut instance, definition, mut writer, started_at) =
            self.load_for_drive(instance_id).await?;

        match instance.status() {
            status if status.is_terminal() => {
                if !retry_due.is_empty() {
                    tracing::warn!(
                        instance_id = %instance_id,
                        status = %status,
                        "Discarding scheduled retries; instance left Running"
                    );
                }
                Ok(Drive::Terminal(status))
            }
            InstanceStatus::Compensating => {
                let status = self
                    .run_compensation_walk(&definition, &mut instance, &mut writer, started_at)
                    .await?;
                Ok(Drive::Terminal(status))
            }
            _ => {
                self.drive_running(&definition, &mut instance, &mut writer, started_at, retry_due)
                    .await
            }
        }
    }

    async fn drive_running(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
        started_at: DateTime<Utc>,
        retry_due: &mut HashMap<String, Instant>,
    ) -> Result<Drive, EngineError> {
        let now = Instant::now();
        let mut ready: Vec<ReadyStep> = Vec::new();
        let mut earliest_due: Option<Instant> = None;

        for name in definition.topological_order() {
            let Some(step) = definition.step(name) else {
                continue;
            };
            if instance.step_succeeded(name) {
                continue;
            }
            if !step.dependencies.iter().all(|d| instance.step_succeeded(d)) {
                continue;
            }

            if let Some(outcome) = instance.last_outcome(name)
                && outcome.is_failure()
            {
                match step.retry.next_action(instance.attempts(name)) {
                    RetryDecision::GiveUp => {
                        let error = instance
                            .latest_record(name)
                            .and_then(|r| r.error.clone())
                            .unwrap_or_else(|| "unknown error".to_string());
                        let reason = format!("step '{name}' exhausted retries: {error}");
                        let status = self
                            .begin_compensation(definition, instance, writer, started_at, reason)
                            .await?;
                        return Ok(Drive::Terminal(status));
                    }
                    RetryDecision::Retry(_) => match retry_due.get(name) {
                        Some(due) if *due > now => {
                            earliest_due =
                                Some(earliest_due.map_or(*due, |current| current.min(*due)));
                            continue;
                        }
                        // Due already, or resuming after a restart with
                        // no in-memory schedule: retry now.
                        _ => {}
                    },
                }
            }

            ready.push(ReadyStep {
                name: name.to_string(),
                attempt: instance.attempts(name) + 1,
                target: step.invoke.clone(),
                timeout: step.timeout,
                retry: step.retry.clone(),
            });
        }

        if !ready.is_empty() {
            self.invoke_ready(instance, writer, ready, retry_due).await?;
            return Ok(Drive::Progressed);
        }

        if definition.step_names().all(|n| instance.step_succeeded(n)) {
            return Ok(Drive::Terminal(
                self.finish_succeeded(instance, writer, started_at).await?,
            ));
        }

        if let Some(due) = earliest_due {
            return Ok(Drive::WaitUntil(due));
        }

        // Nothing runnable, nothing scheduled, graph incomplete: a
        // validated definition should never get here; unwind rather
        // than hang.
        tracing::warn!("Workflow cannot make progress; compensating");
        let status = self
            .begin_compensation(
                definition,
                instance,
                writer,
                started_at,
                "workflow cannot make progress".to_string(),
            )
            .await?;
        Ok(Drive::Terminal(status))
    }

    /// Invokes the ready steps concurrently, recording StepStarted
    /// before any call goes out and every outcome after the batch.
    async fn invoke_ready(
        &self,
        instance: &WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
        ready: Vec<ReadyStep>,
        retry_due: &mut HashMap<String, Instant>,
    ) -> Result<(), EngineError> {
        let started: Vec<InstanceEvent> = ready
            .iter()
            .map(|step| InstanceEvent::step_started(&step.name, step.attempt))
            .collect();
        writer.append(&started).await?;

        let context = instance.context();
        let outcomes = join_all(ready.iter().map(|step| async {
            self.invoker
                .invoke(&step.target, context, step.timeout)
                .await
        }))
        .await;

        for (step, outcome) in ready.iter().zip(outcomes) {
            match outcome {
                InvokeOutcome::Succeeded(output) => {
                    tracing::debug!(step = %step.name, attempt = step.attempt, "Step succeeded");
                    writer
                        .append(&[InstanceEvent::step_succeeded(
                            &step.name,
                            step.attempt,
                            output,
                        )])
                        .await?;
                }
                InvokeOutcome::Failed(error) => {
                    self.record_failure(writer, step, error, false, retry_due)
                        .await?;
                }
                InvokeOutcome::TimedOut => {
                    let error = timeout_error(step.timeout);
                    self.record_failure(writer, step, error, true, retry_due)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        writer: &mut LogWriter<'_, S>,
        step: &ReadyStep,
        error: String,
        timed_out: bool,
        retry_due: &mut HashMap<String, Instant>,
    ) -> Result<(), EngineError> {
        tracing::warn!(
            step = %step.name,
            attempt = step.attempt,
            error = %error,
            timed_out,
            "Step attempt failed"
        );
        writer
            .append(&[InstanceEvent::step_failed(
                &step.name,
                step.attempt,
                error,
                timed_out,
            )])
            .await?;

        if let RetryDecision::Retry(delay) = step.retry.next_action(step.attempt) {
            writer
                .append(&[InstanceEvent::retry_scheduled(
                    &step.name,
                    step.attempt,
                    delay.as_millis() as u64,
                )])
                .await?;
            retry_due.insert(step.name.clone(), Instant::now() + delay);
            metrics::counter!("saga_step_retries_total").increment(1);
        }
        Ok(())
    }

    /// Records the start of unwinding and runs the compensation walk.
    async fn begin_compensation(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
        started_at: DateTime<Utc>,
        reason: String,
    ) -> Result<InstanceStatus, EngineError> {
        let pending = compensation::plan(definition, instance);
        let event = InstanceEvent::compensation_started(reason, pending);
        writer.append(std::slice::from_ref(&event)).await?;
        instance.apply(event);

        self.run_compensation_walk(definition, instance, writer, started_at)
            .await
    }

    /// Walks the compensation plan sequentially; each compensation gets
    /// one attempt, and the first failure halts the walk.
    async fn run_compensation_walk(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
        started_at: DateTime<Utc>,
    ) -> Result<InstanceStatus, EngineError> {
        let result = self
            .compensate_pending(definition, instance, writer)
            .await?;

        match result {
            CompensationResult::Completed => {
                let event = InstanceEvent::instance_compensated();
                writer.append(std::slice::from_ref(&event)).await?;
                instance.apply(event);
                metrics::counter!("saga_instances_compensated").increment(1);
                self.finish(instance, started_at, InstanceStatus::Compensated)
                    .await;
                Ok(InstanceStatus::Compensated)
            }
            CompensationResult::Partial { failed_step, error } => {
                let reason = format!("compensation halted at '{failed_step}': {error}");
                let event = InstanceEvent::instance_failed(reason);
                writer.append(std::slice::from_ref(&event)).await?;
                instance.apply(event);
                metrics::counter!("saga_instances_failed").increment(1);
                self.finish(instance, started_at, InstanceStatus::Failed)
                    .await;
                Ok(InstanceStatus::Failed)
            }
        }
    }

    async fn compensate_pending(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
    ) -> Result<CompensationResult, EngineError> {
        // A recorded compensation failure (e.g. from a walk interrupted by
        // a crash before its terminal event) halts the resumed walk too;
        // failed compensations only re-run on manual re-trigger.
        if let Some(record) = instance.failed_compensation() {
            return Ok(CompensationResult::Partial {
                failed_step: record.step.clone(),
                error: record
                    .compensation_error
                    .clone()
                    .unwrap_or_else(|| "compensation previously failed".to_string()),
            });
        }

        for name in compensation::plan(definition, instance) {
            let Some(target) = definition.step(&name).and_then(|s| s.compensation.clone()) else {
                continue;
            };
            let timeout = definition
                .step(&name)
                .map(|s| s.timeout)
                .unwrap_or(definition::DEFAULT_STEP_TIMEOUT);

            let event = InstanceEvent::step_compensation_started(&name);
            writer.append(std::slice::from_ref(&event)).await?;
            instance.apply(event);

            match self.invoker.invoke(&target, instance.context(), timeout).await {
                InvokeOutcome::Succeeded(_) => {
                    tracing::info!(step = %name, "Step compensated");
                    let event = InstanceEvent::step_compensated(&name);
                    writer.append(std::slice::from_ref(&event)).await?;
                    instance.apply(event);
                    metrics::counter!("saga_compensations_executed").increment(1);
                }
                failure => {
                    let error = match failure {
                        InvokeOutcome::Failed(error) => error,
                        _ => timeout_error(timeout),
                    };
                    tracing::error!(step = %name, error = %error, "Compensation failed; halting walk");
                    let event = InstanceEvent::step_compensation_failed(&name, &error);
                    writer.append(std::slice::from_ref(&event)).await?;
                    instance.apply(event);
                    return Ok(CompensationResult::Partial {
                        failed_step: name,
                        error,
                    });
                }
            }
        }
        Ok(CompensationResult::Completed)
    }

    async fn finish_succeeded(
        &self,
        instance: &mut WorkflowInstance,
        writer: &mut LogWriter<'_, S>,
        started_at: DateTime<Utc>,
    ) -> Result<InstanceStatus, EngineError> {
        let event = InstanceEvent::instance_succeeded();
        writer.append(std::slice::from_ref(&event)).await?;
        instance.apply(event);
        metrics::counter!("saga_instances_completed").increment(1);
        self.finish(instance, started_at, InstanceStatus::Succeeded)
            .await;
        Ok(InstanceStatus::Succeeded)
    }

    /// Records the duration metric and publishes the terminal outcome.
    async fn finish(
        &self,
        instance: &WorkflowInstance,
        started_at: DateTime<Utc>,
        status: InstanceStatus,
    ) {
        let elapsed = (Utc::now() - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        metrics::histogram!("saga_instance_duration_seconds").record(elapsed);

        let (Some(instance_id), Some(workflow)) = (instance.id(), instance.workflow()) else {
            return;
        };
        tracing::info!(
            instance_id = %instance_id,
            workflow = %workflow,
            status = %status,
            "Workflow instance finished"
        );
        self.publisher
            .publish(WorkflowOutcome {
                instance_id,
                workflow: workflow.clone(),
                status,
                reason: instance.failure_reason().map(str::to_owned),
            })
            .await;
    }
}

fn timeout_error(timeout: Duration) -> String {
    format!("no response within {}ms", timeout.as_millis())
}
