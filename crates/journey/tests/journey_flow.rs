//! End-to-end run execution against the in-memory store, on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use carepath_core::config::EngineConfig;
use carepath_core::error::JourneyError;
use carepath_core::event_bus::{capture_sink, CaptureSink, JourneyEventType};
use carepath_core::types::{
    CareCondition, DelayNode, JourneyDraft, JourneyRun, Language, MessageNode, Node,
    PatientContext, RunStatus,
};
use carepath_journey::demo::recovery_journey_draft;
use carepath_journey::{JourneyEngine, MemoryStore, MessageChannel, RecordingChannel, RunStore};

struct Harness {
    engine: JourneyEngine,
    channel: Arc<RecordingChannel>,
    events: Arc<CaptureSink>,
}

fn harness(store: &Arc<MemoryStore>, config: EngineConfig) -> Harness {
    let channel = Arc::new(RecordingChannel::new());
    let events = capture_sink();
    let engine = JourneyEngine::new(store.clone(), store.clone(), &config)
        .with_channel(channel.clone())
        .with_event_sink(events.clone());
    Harness {
        engine,
        channel,
        events,
    }
}

fn patient(age: u32) -> PatientContext {
    PatientContext::new("patient-42", age, Language::En, CareCondition::KneeReplacement)
}

fn recovery_with_delay(seconds: f64) -> JourneyDraft {
    let mut draft = recovery_journey_draft();
    for node in &mut draft.nodes {
        if let Node::Delay(delay) = node {
            delay.duration_seconds = seconds;
        }
    }
    draft
}

/// `a -> b -> a` forever.
fn two_node_cycle(with_delay: bool) -> JourneyDraft {
    let second = if with_delay {
        Node::Delay(DelayNode {
            id: "b".to_string(),
            duration_seconds: 1.0,
            next_node_id: Some("a".to_string()),
        })
    } else {
        Node::Message(MessageNode {
            id: "b".to_string(),
            message: "again".to_string(),
            next_node_id: Some("a".to_string()),
        })
    };
    JourneyDraft {
        name: "Loop".to_string(),
        start_node_id: "a".to_string(),
        nodes: vec![
            Node::Message(MessageNode {
                id: "a".to_string(),
                message: "check in".to_string(),
                next_node_id: Some("b".to_string()),
            }),
            second,
        ],
    }
}

async fn wait_terminal(engine: &JourneyEngine, run_id: Uuid) -> JourneyRun {
    tokio::time::timeout(Duration::from_secs(24 * 3600), async {
        loop {
            let run = engine.run_status(run_id).await.unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("run did not reach a terminal status")
}

async fn wait_at_node(engine: &JourneyEngine, run_id: Uuid, node_id: &str) {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let run = engine.run_status(run_id).await.unwrap();
            if run.current_node_id.as_deref() == Some(node_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("run never reached the expected node")
}

#[tokio::test(start_paused = true)]
async fn senior_patient_takes_senior_branch() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(72)).await.unwrap();

    let run = wait_terminal(&h.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.current_node_id.is_none());
    assert!(run.completed_at.is_some());
    assert_eq!(
        h.events.node_path(run_id),
        vec![
            "welcome",
            "age_check",
            "senior_program",
            "delay_before_followup",
            "followup_message"
        ]
    );
    assert_eq!(h.channel.messages_for(run_id).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn younger_patient_takes_standard_branch() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(40)).await.unwrap();

    let run = wait_terminal(&h.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        h.events.node_path(run_id),
        vec![
            "welcome",
            "age_check",
            "standard_program",
            "delay_before_followup",
            "followup_message"
        ]
    );
    assert_eq!(
        h.channel.messages_for(run_id)[1],
        "You have been enrolled in our Standard Recovery Program."
    );
}

#[tokio::test(start_paused = true)]
async fn delay_holds_run_at_delay_node() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(5.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(72)).await.unwrap();

    wait_at_node(&h.engine, run_id, "delay_before_followup").await;
    let waiting = h.engine.run_status(run_id).await.unwrap();
    assert_eq!(waiting.status, RunStatus::InProgress);
    assert!(waiting.completed_at.is_none());

    let run = wait_terminal(&h.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.completed_at.unwrap() >= waiting.updated_at);
}

#[tokio::test(start_paused = true)]
async fn unknown_journey_creates_no_run() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let err = h.engine.start(Uuid::new_v4(), patient(72)).await.unwrap_err();
    assert!(matches!(err, JourneyError::JourneyNotFound(_)));

    for status in [RunStatus::InProgress, RunStatus::Completed, RunStatus::Failed] {
        assert!(store.list_runs_by_status(status).await.unwrap().is_empty());
    }
    assert_eq!(h.events.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_mid_delay_resumes_on_same_path() {
    let store = Arc::new(MemoryStore::new());
    let before = harness(&store, EngineConfig::default());

    let journey = before
        .engine
        .submit_journey(recovery_with_delay(3600.0))
        .await
        .unwrap();
    let run_id = before.engine.start(journey.id, patient(72)).await.unwrap();
    wait_at_node(&before.engine, run_id, "delay_before_followup").await;

    before.engine.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(before.engine.active_run_count(), 0);

    let interrupted = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(interrupted.status, RunStatus::InProgress);
    assert_eq!(
        interrupted.current_node_id.as_deref(),
        Some("delay_before_followup")
    );

    let after = harness(&store, EngineConfig::default());
    assert_eq!(after.engine.resume_active_runs().await.unwrap(), 1);

    let run = wait_terminal(&after.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.current_node_id.is_none());

    assert_eq!(
        before.events.node_path(run_id),
        vec!["welcome", "age_check", "senior_program", "delay_before_followup"]
    );
    assert_eq!(
        after.events.node_path(run_id),
        vec!["delay_before_followup", "followup_message"]
    );
    assert_eq!(after.events.count_type(JourneyEventType::RunResumed), 1);
    assert_eq!(before.channel.messages_for(run_id).len(), 2);
    assert_eq!(after.channel.messages_for(run_id).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_skips_runs_already_attached() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(3600.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(50)).await.unwrap();
    wait_at_node(&h.engine, run_id, "delay_before_followup").await;

    assert_eq!(h.engine.resume_active_runs().await.unwrap(), 0);
    assert_eq!(h.engine.active_run_count(), 1);

    let run = wait_terminal(&h.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.events.node_path(run_id).len(), 5);
}

#[tokio::test(start_paused = true)]
async fn terminal_snapshot_is_stable() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(66)).await.unwrap();
    let first = wait_terminal(&h.engine, run_id).await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.engine.run_status(run_id).await.unwrap(), first);
    }
    assert_eq!(h.engine.resume_active_runs().await.unwrap(), 0);
    assert_eq!(h.engine.run_status(run_id).await.unwrap(), first);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_pending_delay() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(3600.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(72)).await.unwrap();
    wait_at_node(&h.engine, run_id, "delay_before_followup").await;

    let cancelled = h.engine.cancel(run_id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Failed);
    assert_eq!(
        cancelled.current_node_id.as_deref(),
        Some("delay_before_followup")
    );
    assert!(cancelled.completed_at.is_some());

    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(h.engine.run_status(run_id).await.unwrap(), cancelled);
    assert_eq!(h.engine.active_run_count(), 0);
    assert!(h.channel.messages_for(run_id).len() < 3);
    assert_eq!(h.events.count_type(JourneyEventType::RunCancelled), 1);
    assert_eq!(h.events.count_type(JourneyEventType::RunFailed), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_of_finished_run_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(30)).await.unwrap();
    let done = wait_terminal(&h.engine, run_id).await;

    let err = h.engine.cancel(run_id).await.unwrap_err();
    assert!(matches!(
        err,
        JourneyError::RunFinished { status: RunStatus::Completed, .. }
    ));
    assert_eq!(h.engine.run_status(run_id).await.unwrap(), done);
}

#[tokio::test(start_paused = true)]
async fn unbounded_cycle_stays_in_progress_until_cancelled() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());

    let journey = h.engine.submit_journey(two_node_cycle(true)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(45)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let looping = h.engine.run_status(run_id).await.unwrap();
    assert_eq!(looping.status, RunStatus::InProgress);
    assert!(h.channel.messages_for(run_id).len() >= 10);

    let cancelled = h.engine.cancel(run_id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Failed);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.engine.run_status(run_id).await.unwrap(), cancelled);
}

#[tokio::test(start_paused = true)]
async fn step_budget_fails_cyclic_run() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        max_steps_per_run: Some(7),
    };
    let h = harness(&store, config);

    let journey = h.engine.submit_journey(two_node_cycle(false)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(45)).await.unwrap();

    let run = wait_terminal(&h.engine, run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert_eq!(h.channel.messages_for(run_id).len(), 7);

    let failure = h
        .events
        .events()
        .into_iter()
        .find(|e| e.event_type == JourneyEventType::RunFailed)
        .unwrap();
    assert!(failure.detail.unwrap().contains("budget of 7"));
}

#[tokio::test(start_paused = true)]
async fn step_budget_does_not_affect_short_journeys() {
    let store = Arc::new(MemoryStore::new());
    let config = EngineConfig {
        max_steps_per_run: Some(5),
    };
    let h = harness(&store, config);

    let journey = h.engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = h.engine.start(journey.id, patient(80)).await.unwrap();

    assert_eq!(wait_terminal(&h.engine, run_id).await.status, RunStatus::Completed);
}

struct BrokenChannel;

#[async_trait]
impl MessageChannel for BrokenChannel {
    async fn deliver(&self, _: Uuid, _: &PatientContext, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("sms gateway timeout")
    }
}

#[tokio::test(start_paused = true)]
async fn delivery_failure_fails_run() {
    let store = Arc::new(MemoryStore::new());
    let events = capture_sink();
    let engine = JourneyEngine::new(store.clone(), store.clone(), &EngineConfig::default())
        .with_channel(Arc::new(BrokenChannel))
        .with_event_sink(events.clone());

    let journey = engine.submit_journey(recovery_with_delay(0.0)).await.unwrap();
    let run_id = engine.start(journey.id, patient(72)).await.unwrap();

    let run = wait_terminal(&engine, run_id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.current_node_id.as_deref(), Some("welcome"));
    assert!(run.completed_at.is_some());
    assert_eq!(events.count_type(JourneyEventType::RunFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_progress_independently() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(&store, EngineConfig::default());
    let journey = h.engine.submit_journey(recovery_with_delay(2.0)).await.unwrap();

    let mut runs = Vec::new();
    for i in 0..20u32 {
        let age = 50 + i;
        let ctx = patient(age).with_attribute("ward", json!(format!("W{i}")));
        runs.push((h.engine.start(journey.id, ctx).await.unwrap(), age));
    }

    for (run_id, age) in runs {
        let run = wait_terminal(&h.engine, run_id).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.patient_context.age, serde_json::Number::from(age));

        let branch = if age >= 65 {
            "senior_program"
        } else {
            "standard_program"
        };
        assert_eq!(h.events.node_path(run_id)[2], branch);
    }
    assert_eq!(h.events.count_type(JourneyEventType::RunCompleted), 20);
}
