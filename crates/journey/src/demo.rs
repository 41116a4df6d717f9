//! Sample journey used for `--seed-demo` and in tests.

use serde_json::json;
use tracing::info;

use carepath_core::error::JourneyResult;
use carepath_core::types::{
    Condition, ConditionalNode, DelayNode, Journey, JourneyDraft, MessageNode, Node, Operator,
};

use crate::engine::JourneyEngine;

fn message(id: &str, text: &str, next: Option<&str>) -> Node {
    Node::Message(MessageNode {
        id: id.to_string(),
        message: text.to_string(),
        next_node_id: next.map(str::to_string),
    })
}

/// Hip replacement recovery: welcome, branch on age ≥ 65 into the senior or
/// standard program, wait, then follow up.
pub fn recovery_journey_draft() -> JourneyDraft {
    JourneyDraft {
        name: "Hip Replacement Recovery Journey".to_string(),
        start_node_id: "welcome".to_string(),
        nodes: vec![
            message(
                "welcome",
                "Welcome to your hip replacement recovery journey! We are here to support you.",
                Some("age_check"),
            ),
            Node::Conditional(ConditionalNode {
                id: "age_check".to_string(),
                condition: Condition {
                    field: "age".to_string(),
                    operator: Operator::Gte,
                    value: json!(65),
                },
                on_true_next_node_id: Some("senior_program".to_string()),
                on_false_next_node_id: Some("standard_program".to_string()),
            }),
            message(
                "senior_program",
                "You have been enrolled in our Senior Care Program with additional support.",
                Some("delay_before_followup"),
            ),
            message(
                "standard_program",
                "You have been enrolled in our Standard Recovery Program.",
                Some("delay_before_followup"),
            ),
            Node::Delay(DelayNode {
                id: "delay_before_followup".to_string(),
                duration_seconds: 5.0,
                next_node_id: Some("followup_message".to_string()),
            }),
            message(
                "followup_message",
                "How are you feeling today? Remember to take your medication as prescribed.",
                None,
            ),
        ],
    }
}

/// Persists the recovery journey through the engine's validation path.
pub async fn seed_demo_journey(engine: &JourneyEngine) -> JourneyResult<Journey> {
    let journey = engine.submit_journey(recovery_journey_draft()).await?;
    info!(journey_id = %journey.id, "Seeded demo journey");
    Ok(journey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::validate_draft;

    #[test]
    fn test_demo_journey_is_valid() {
        let draft = recovery_journey_draft();
        validate_draft(&draft).unwrap();
        assert_eq!(draft.nodes.len(), 6);
        assert_eq!(draft.nodes[0].id(), draft.start_node_id);
    }
}
