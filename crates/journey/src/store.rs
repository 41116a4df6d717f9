//! Persistence contracts consumed by the engine, plus a process-local
//! implementation backed by DashMap.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use carepath_core::error::{StoreError, StoreResult};
use carepath_core::types::{Journey, JourneyDraft, JourneyRun, PatientContext, RunPatch, RunStatus};

use crate::state_machine::RunStateMachine;

/// Durable journey definitions. Journeys are immutable once created.
#[async_trait]
pub trait JourneyStore: Send + Sync {
    /// Assigns an id and creation time, persists, and returns the journey.
    async fn create_journey(&self, draft: JourneyDraft) -> StoreResult<Journey>;

    async fn get_journey(&self, id: Uuid) -> StoreResult<Option<Journey>>;

    /// All journeys, newest first.
    async fn list_journeys(&self) -> StoreResult<Vec<Journey>>;
}

/// Durable run records. Rows are independent; each update is atomic per row.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a new `in_progress` run positioned at `start_node_id`.
    async fn create_run(
        &self,
        journey_id: Uuid,
        patient_context: PatientContext,
        start_node_id: String,
    ) -> StoreResult<JourneyRun>;

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<JourneyRun>>;

    /// Applies a field-level patch and refreshes `updated_at`. Fails with
    /// `StoreError::RunFinalized` once the run is completed or failed.
    async fn update_run(&self, id: Uuid, patch: RunPatch) -> StoreResult<()>;

    /// Runs with `status`, in creation order.
    async fn list_runs_by_status(&self, status: RunStatus) -> StoreResult<Vec<JourneyRun>>;
}

struct Sequenced<T> {
    seq: u64,
    value: T,
}

/// Process-local store for development and tests. Sharing one instance
/// between engines stands in for a durable backend across restarts.
#[derive(Default)]
pub struct MemoryStore {
    journeys: DashMap<Uuid, Sequenced<Journey>>,
    runs: DashMap<Uuid, Sequenced<JourneyRun>>,
    sequence: AtomicU64,
    lifecycle: RunStateMachine,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl JourneyStore for MemoryStore {
    async fn create_journey(&self, draft: JourneyDraft) -> StoreResult<Journey> {
        let journey = draft.into_journey(Uuid::new_v4(), Utc::now());
        self.journeys.insert(
            journey.id,
            Sequenced {
                seq: self.next_seq(),
                value: journey.clone(),
            },
        );
        Ok(journey)
    }

    async fn get_journey(&self, id: Uuid) -> StoreResult<Option<Journey>> {
        Ok(self.journeys.get(&id).map(|r| r.value.clone()))
    }

    async fn list_journeys(&self) -> StoreResult<Vec<Journey>> {
        let mut rows: Vec<(u64, Journey)> = self
            .journeys
            .iter()
            .map(|r| (r.seq, r.value.clone()))
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, journey)| journey).collect())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(
        &self,
        journey_id: Uuid,
        patient_context: PatientContext,
        start_node_id: String,
    ) -> StoreResult<JourneyRun> {
        let run = JourneyRun::new(journey_id, patient_context, start_node_id);
        self.runs.insert(
            run.id,
            Sequenced {
                seq: self.next_seq(),
                value: run.clone(),
            },
        );
        Ok(run)
    }

    async fn get_run(&self, id: Uuid) -> StoreResult<Option<JourneyRun>> {
        Ok(self.runs.get(&id).map(|r| r.value.clone()))
    }

    async fn update_run(&self, id: Uuid, patch: RunPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut row = self.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;
        let current = row.value.status;
        let next = patch.status.unwrap_or(current);
        if !self.lifecycle.accepts_updates(current) || !self.lifecycle.can_transition(current, next) {
            return Err(StoreError::RunFinalized(id));
        }

        row.value.apply(&patch, Utc::now());
        Ok(())
    }

    async fn list_runs_by_status(&self, status: RunStatus) -> StoreResult<Vec<JourneyRun>> {
        let mut rows: Vec<(u64, JourneyRun)> = self
            .runs
            .iter()
            .filter(|r| r.value.status == status)
            .map(|r| (r.seq, r.value.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, run)| run).collect())
    }
}
