//! Message delivery hook for MESSAGE nodes.
//! Real SMS/email dispatch plugs in behind `MessageChannel`.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use carepath_core::types::PatientContext;

/// Delivers a journey message to a patient.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn deliver(
        &self,
        run_id: Uuid,
        patient: &PatientContext,
        message: &str,
    ) -> anyhow::Result<()>;
}

/// Stub channel: logs the message instead of sending it.
pub struct LogChannel;

#[async_trait]
impl MessageChannel for LogChannel {
    async fn deliver(
        &self,
        run_id: Uuid,
        patient: &PatientContext,
        message: &str,
    ) -> anyhow::Result<()> {
        // In production: hand off to the SMS/email provider for `patient.language`
        info!(
            run_id = %run_id,
            patient_id = %patient.id,
            message = %message,
            "Sending message to patient"
        );
        info!(
            age = %patient.age,
            language = patient.language.as_str(),
            condition = patient.condition.as_str(),
            "Patient context"
        );
        Ok(())
    }
}

/// A message captured by `RecordingChannel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub run_id: Uuid,
    pub patient_id: String,
    pub message: String,
}

/// In-memory channel that records deliveries for testing.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Messages delivered for one run, in order.
    pub fn messages_for(&self, run_id: Uuid) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.run_id == run_id)
            .map(|m| m.message.clone())
            .collect()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn deliver(
        &self,
        run_id: Uuid,
        patient: &PatientContext,
        message: &str,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                run_id,
                patient_id: patient.id.clone(),
                message: message.to_string(),
            });
        Ok(())
    }
}
