//! Field-level encoding of run records as Redis hashes.
//!
//! A run lives at `{prefix}run:{id}`. Absent `current_node_id` or
//! `completed_at` fields mean `null`.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use carepath_core::error::{StoreError, StoreResult};
use carepath_core::types::{JourneyRun, RunPatch, RunStatus};

pub const FIELD_JOURNEY_ID: &str = "journey_id";
pub const FIELD_PATIENT_CONTEXT: &str = "patient_context";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_CURRENT_NODE_ID: &str = "current_node_id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";
pub const FIELD_COMPLETED_AT: &str = "completed_at";
pub const FIELD_SEQ: &str = "seq";

/// Hash writes and deletes that realize one `RunPatch`.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchFields {
    pub target_status: Option<RunStatus>,
    pub set: Vec<(&'static str, String)>,
    pub delete: Vec<&'static str>,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(run_id: Uuid, field: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("run {run_id} has malformed {field}: {e}")))
}

fn required(fields: &mut HashMap<String, String>, run_id: Uuid, field: &str) -> StoreResult<String> {
    fields
        .remove(field)
        .ok_or_else(|| StoreError::Backend(format!("run {run_id} is missing field {field}")))
}

/// All hash fields for a freshly created run.
pub fn encode_run(run: &JourneyRun, seq: u64) -> StoreResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        (FIELD_JOURNEY_ID, run.journey_id.to_string()),
        (
            FIELD_PATIENT_CONTEXT,
            serde_json::to_string(&run.patient_context)?,
        ),
        (FIELD_STATUS, run.status.as_str().to_string()),
        (FIELD_CREATED_AT, timestamp(run.created_at)),
        (FIELD_UPDATED_AT, timestamp(run.updated_at)),
        (FIELD_SEQ, seq.to_string()),
    ];
    if let Some(node_id) = &run.current_node_id {
        fields.push((FIELD_CURRENT_NODE_ID, node_id.clone()));
    }
    if let Some(at) = run.completed_at {
        fields.push((FIELD_COMPLETED_AT, timestamp(at)));
    }
    Ok(fields)
}

pub fn decode_run(run_id: Uuid, mut fields: HashMap<String, String>) -> StoreResult<JourneyRun> {
    let journey_id = required(&mut fields, run_id, FIELD_JOURNEY_ID)?;
    let journey_id = Uuid::parse_str(&journey_id)
        .map_err(|e| StoreError::Backend(format!("run {run_id} has malformed journey_id: {e}")))?;

    let patient_context =
        serde_json::from_str(&required(&mut fields, run_id, FIELD_PATIENT_CONTEXT)?)?;

    let status = required(&mut fields, run_id, FIELD_STATUS)?
        .parse::<RunStatus>()
        .map_err(StoreError::Backend)?;

    let created_at = parse_timestamp(
        run_id,
        FIELD_CREATED_AT,
        &required(&mut fields, run_id, FIELD_CREATED_AT)?,
    )?;
    let updated_at = parse_timestamp(
        run_id,
        FIELD_UPDATED_AT,
        &required(&mut fields, run_id, FIELD_UPDATED_AT)?,
    )?;
    let completed_at = fields
        .remove(FIELD_COMPLETED_AT)
        .map(|raw| parse_timestamp(run_id, FIELD_COMPLETED_AT, &raw))
        .transpose()?;

    Ok(JourneyRun {
        id: run_id,
        journey_id,
        patient_context,
        status,
        current_node_id: fields.remove(FIELD_CURRENT_NODE_ID),
        created_at,
        updated_at,
        completed_at,
    })
}

/// Translates a patch into hash operations. `updated_at` is always written.
pub fn encode_patch(patch: &RunPatch, now: DateTime<Utc>) -> PatchFields {
    let mut set = Vec::new();
    let mut delete = Vec::new();

    if let Some(status) = patch.status {
        set.push((FIELD_STATUS, status.as_str().to_string()));
    }
    match &patch.current_node_id {
        Some(Some(node_id)) => set.push((FIELD_CURRENT_NODE_ID, node_id.clone())),
        Some(None) => delete.push(FIELD_CURRENT_NODE_ID),
        None => {}
    }
    if let Some(at) = patch.completed_at {
        set.push((FIELD_COMPLETED_AT, timestamp(at)));
    }
    set.push((FIELD_UPDATED_AT, timestamp(now)));

    PatchFields {
        target_status: patch.status,
        set,
        delete,
    }
}
