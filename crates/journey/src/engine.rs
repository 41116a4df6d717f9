use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use carepath_core::config::EngineConfig;
use carepath_core::error::{ExecutionError, JourneyError, JourneyResult, StoreError};
use carepath_core::event_bus::{make_event, EventSink, JourneyEventType};
use carepath_core::types::{
    Journey, JourneyDraft, JourneyRun, PatientContext, RunPatch, RunStatus,
};

use crate::channel::{LogChannel, MessageChannel};
use crate::executor::NodeExecutor;
use crate::store::{JourneyStore, RunStore};
use crate::validator::validate_draft;

/// Drives journey runs: creates run records, walks each run's node graph in a
/// background task, and re-attaches unfinished runs after a restart.
#[derive(Clone)]
pub struct JourneyEngine {
    journeys: Arc<dyn JourneyStore>,
    runs: Arc<dyn RunStore>,
    executor: Arc<NodeExecutor>,
    event_sink: Arc<dyn EventSink>,
    /// Cancellation handles for runs driven by this process. Volatile; the
    /// persisted `current_node_id` is authoritative.
    active: Arc<DashMap<Uuid, CancellationToken>>,
    max_steps: Option<u64>,
}

impl std::fmt::Debug for JourneyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyEngine")
            .field("active_runs", &self.active.len())
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl JourneyEngine {
    pub fn new(
        journeys: Arc<dyn JourneyStore>,
        runs: Arc<dyn RunStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            journeys,
            runs,
            executor: Arc::new(NodeExecutor::new(Arc::new(LogChannel))),
            event_sink: carepath_core::event_bus::noop_sink(),
            active: Arc::new(DashMap::new()),
            max_steps: config.max_steps_per_run,
        }
    }

    /// Route MESSAGE nodes through a different delivery channel.
    pub fn with_channel(mut self, channel: Arc<dyn MessageChannel>) -> Self {
        self.executor = Arc::new(NodeExecutor::new(channel));
        self
    }

    /// Attach an event sink for run lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Validates and persists a journey definition.
    pub async fn submit_journey(&self, draft: JourneyDraft) -> JourneyResult<Journey> {
        validate_draft(&draft)?;
        let journey = self.journeys.create_journey(draft).await?;
        metrics::counter!("journey.submitted").increment(1);
        info!(
            journey_id = %journey.id,
            name = %journey.name,
            nodes = journey.nodes.len(),
            "Journey created"
        );
        Ok(journey)
    }

    pub async fn get_journey(&self, id: Uuid) -> JourneyResult<Journey> {
        self.journeys
            .get_journey(id)
            .await?
            .ok_or(JourneyError::JourneyNotFound(id))
    }

    pub async fn list_journeys(&self) -> JourneyResult<Vec<Journey>> {
        Ok(self.journeys.list_journeys().await?)
    }

    /// Creates a run positioned at the journey's start node and returns its
    /// id immediately; the walk continues in the background.
    pub async fn start(&self, journey_id: Uuid, context: PatientContext) -> JourneyResult<Uuid> {
        let journey = self.get_journey(journey_id).await?;
        let run = self
            .runs
            .create_run(journey.id, context, journey.start_node_id.clone())
            .await?;

        metrics::counter!("journey.runs.started").increment(1);
        info!(
            run_id = %run.id,
            journey_id = %journey.id,
            patient_id = %run.patient_context.id,
            "Journey run started"
        );
        self.event_sink.emit(make_event(
            JourneyEventType::RunStarted,
            run.id,
            journey.id,
            run.current_node_id.clone(),
        ));

        let run_id = run.id;
        self.attach(journey, run);
        Ok(run_id)
    }

    pub async fn run_status(&self, run_id: Uuid) -> JourneyResult<JourneyRun> {
        self.runs
            .get_run(run_id)
            .await?
            .ok_or(JourneyError::RunNotFound(run_id))
    }

    /// Marks the run failed, then interrupts its task (including a pending
    /// delay). Terminal runs are left untouched. If the write fails the task
    /// keeps driving the run.
    pub async fn cancel(&self, run_id: Uuid) -> JourneyResult<JourneyRun> {
        let run = self.run_status(run_id).await?;
        if run.status.is_terminal() {
            return Err(JourneyError::RunFinished {
                run_id,
                status: run.status,
            });
        }

        match self.runs.update_run(run_id, RunPatch::failed(Utc::now())).await {
            Ok(()) => {}
            Err(StoreError::RunFinalized(_)) => {
                let finished = self.run_status(run_id).await?;
                return Err(JourneyError::RunFinished {
                    run_id,
                    status: finished.status,
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(token) = self.active.get(&run_id) {
            token.cancel();
        }

        metrics::counter!("journey.runs.cancelled").increment(1);
        info!(run_id = %run_id, node_id = ?run.current_node_id, "Journey run cancelled");
        self.event_sink.emit(make_event(
            JourneyEventType::RunCancelled,
            run_id,
            run.journey_id,
            run.current_node_id.clone(),
        ));

        self.run_status(run_id).await
    }

    /// Re-attaches every `in_progress` run, oldest first, from its persisted
    /// node. Runs already driven by this process are skipped. Returns the
    /// number of runs resumed.
    pub async fn resume_active_runs(&self) -> JourneyResult<usize> {
        let pending = self
            .runs
            .list_runs_by_status(RunStatus::InProgress)
            .await?;

        let mut resumed = 0;
        for run in pending {
            if self.active.contains_key(&run.id) {
                debug!(run_id = %run.id, "Run already attached, skipping resume");
                continue;
            }

            let journey = match self.journeys.get_journey(run.journey_id).await {
                Ok(Some(journey)) => journey,
                Ok(None) => {
                    let err = ExecutionError::JourneyMissing(run.journey_id);
                    self.record_failure(run.journey_id, run.id, &err).await;
                    continue;
                }
                // An unreadable record only takes down its own runs.
                Err(e @ StoreError::Serialization(_)) => {
                    let err = ExecutionError::Store(e);
                    self.record_failure(run.journey_id, run.id, &err).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            metrics::counter!("journey.runs.resumed").increment(1);
            info!(
                run_id = %run.id,
                journey_id = %journey.id,
                node_id = ?run.current_node_id,
                "Resuming journey run"
            );
            self.event_sink.emit(make_event(
                JourneyEventType::RunResumed,
                run.id,
                journey.id,
                run.current_node_id.clone(),
            ));

            self.attach(journey, run);
            resumed += 1;
        }

        info!(resumed, "Journey run resume complete");
        Ok(resumed)
    }

    /// Stops every in-process task without writing to the store, leaving
    /// unfinished runs `in_progress` for the next resume.
    pub fn shutdown(&self) {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        info!(count, "Journey engine stopped");
    }

    pub fn active_run_count(&self) -> usize {
        self.active.len()
    }

    fn attach(&self, journey: Journey, run: JourneyRun) {
        let token = CancellationToken::new();
        self.active.insert(run.id, token.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            engine
                .drive(journey, run.id, run.patient_context, run.current_node_id, token)
                .await;
        });
    }

    async fn drive(
        self,
        journey: Journey,
        run_id: Uuid,
        context: PatientContext,
        start: Option<String>,
        cancel: CancellationToken,
    ) {
        match self.walk(&journey, run_id, &context, start, &cancel).await {
            Ok(()) => {
                metrics::counter!("journey.runs.completed").increment(1);
                info!(run_id = %run_id, journey_id = %journey.id, "Journey run completed");
                self.event_sink.emit(make_event(
                    JourneyEventType::RunCompleted,
                    run_id,
                    journey.id,
                    None,
                ));
            }
            Err(ExecutionError::Cancelled) => {
                debug!(run_id = %run_id, "Journey run task stopped");
            }
            Err(ExecutionError::Store(StoreError::RunFinalized(_))) => {
                debug!(run_id = %run_id, "Journey run finalized elsewhere, task stopped");
            }
            Err(err) => self.record_failure(journey.id, run_id, &err).await,
        }

        self.active.remove(&run_id);
    }

    async fn walk(
        &self,
        journey: &Journey,
        run_id: Uuid,
        context: &PatientContext,
        start: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let mut current = start;
        let mut steps: u64 = 0;

        while let Some(node_id) = current {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if let Some(budget) = self.max_steps {
                if steps >= budget {
                    return Err(ExecutionError::StepBudgetExceeded(budget));
                }
            }

            // Persist before executing so a restart re-runs this node, and so
            // a run that fails here keeps the node it failed on.
            self.runs
                .update_run(run_id, RunPatch::advance(node_id.clone()))
                .await?;

            let node = journey
                .node(&node_id)
                .ok_or_else(|| ExecutionError::NodeNotFound {
                    node_id: node_id.clone(),
                    journey_id: journey.id,
                })?;
            self.event_sink.emit(make_event(
                JourneyEventType::NodeEntered,
                run_id,
                journey.id,
                Some(node_id.clone()),
            ));
            debug!(run_id = %run_id, node_id = %node_id, kind = node.kind(), "Executing node");

            current = self.executor.execute(node, context, run_id, cancel).await?;
            steps += 1;

            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        self.runs
            .update_run(run_id, RunPatch::completed(Utc::now()))
            .await?;
        Ok(())
    }

    async fn record_failure(&self, journey_id: Uuid, run_id: Uuid, err: &ExecutionError) {
        error!(run_id = %run_id, journey_id = %journey_id, error = %err, "Journey run failed");

        match self.runs.update_run(run_id, RunPatch::failed(Utc::now())).await {
            Ok(()) => {
                metrics::counter!("journey.runs.failed").increment(1);
                let mut event = make_event(JourneyEventType::RunFailed, run_id, journey_id, None);
                event.detail = Some(err.to_string());
                self.event_sink.emit(event);
            }
            Err(StoreError::RunFinalized(_)) => {
                debug!(run_id = %run_id, "Run already finalized, failure not recorded");
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Could not persist run failure");
            }
        }
    }
}
