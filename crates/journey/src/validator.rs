//! Structural validation of journey drafts and patient contexts.
//!
//! Both validators work on raw JSON so that each check runs in a fixed order
//! and the first failure is reported with a descriptive message. A draft that
//! passes is returned in its typed form. Reachability and cycles are not
//! checked here; they only matter at run time.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use carepath_core::error::{JourneyError, JourneyResult};
use carepath_core::types::{
    CareCondition, Condition, ConditionalNode, DelayNode, JourneyDraft, Language, MessageNode,
    Node, Operator, PatientContext,
};

/// Validates a typed draft with the same rules as [`parse_journey_draft`].
pub fn validate_draft(draft: &JourneyDraft) -> JourneyResult<()> {
    let raw = serde_json::to_value(draft).map_err(|e| invalid(e.to_string()))?;
    parse_journey_draft(&raw).map(|_| ())
}

/// Checks a submitted journey and converts it to a typed draft.
pub fn parse_journey_draft(raw: &Value) -> JourneyResult<JourneyDraft> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid("Journey must be a JSON object"))?;

    let name = non_empty_str(object.get("name"))
        .ok_or_else(|| invalid("Journey name is required and must be a string"))?;

    let start_node_id = non_empty_str(object.get("start_node_id"))
        .ok_or_else(|| invalid("Journey start_node_id is required and must be a string"))?;

    let raw_nodes = match object.get("nodes") {
        Some(Value::Array(nodes)) if !nodes.is_empty() => nodes,
        _ => return Err(invalid("Journey must have at least one node")),
    };

    let known_ids: HashSet<&str> = raw_nodes
        .iter()
        .filter_map(|n| n.get("id").and_then(Value::as_str))
        .collect();
    if !known_ids.contains(start_node_id) {
        return Err(invalid("start_node_id must reference an existing node"));
    }

    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(raw_nodes.len());
    for raw_node in raw_nodes {
        let node = parse_node(raw_node)?;
        if !seen.insert(node.id().to_string()) {
            return Err(invalid(format!("Duplicate node id: {}", node.id())));
        }
        for (field, target) in node.edges() {
            if let Some(target) = target {
                if !known_ids.contains(target) {
                    return Err(invalid(format!(
                        "{} node {} references non-existent {field}: {target}",
                        node.kind(),
                        node.id()
                    )));
                }
            }
        }
        nodes.push(node);
    }

    Ok(JourneyDraft {
        name: name.to_string(),
        start_node_id: start_node_id.to_string(),
        nodes,
    })
}

fn parse_node(raw: &Value) -> JourneyResult<Node> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid("Each node must be a JSON object"))?;

    let id = non_empty_str(object.get("id"))
        .ok_or_else(|| invalid("Node id is required and must be a string"))?
        .to_string();

    let kind = object.get("type").and_then(Value::as_str);
    match kind {
        Some("MESSAGE") => {
            let message = non_empty_str(object.get("message"))
                .ok_or_else(|| invalid(format!("MESSAGE node {id} must have a message string")))?
                .to_string();
            let next_node_id = reference(object, "next_node_id", &id)?;
            Ok(Node::Message(MessageNode {
                id,
                message,
                next_node_id,
            }))
        }
        Some("DELAY") => {
            let duration_seconds = object
                .get("duration_seconds")
                .and_then(Value::as_f64)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    invalid(format!(
                        "DELAY node {id} must have a non-negative duration_seconds number"
                    ))
                })?;
            let next_node_id = reference(object, "next_node_id", &id)?;
            Ok(Node::Delay(DelayNode {
                id,
                duration_seconds,
                next_node_id,
            }))
        }
        Some("CONDITIONAL") => {
            let condition = parse_condition(object.get("condition"), &id)?;
            let on_true_next_node_id = reference(object, "on_true_next_node_id", &id)?;
            let on_false_next_node_id = reference(object, "on_false_next_node_id", &id)?;
            Ok(Node::Conditional(ConditionalNode {
                id,
                condition,
                on_true_next_node_id,
                on_false_next_node_id,
            }))
        }
        _ => Err(invalid(
            "Node type must be one of: MESSAGE, DELAY, CONDITIONAL",
        )),
    }
}

fn parse_condition(raw: Option<&Value>, node_id: &str) -> JourneyResult<Condition> {
    let object = raw.and_then(Value::as_object).ok_or_else(|| {
        invalid(format!(
            "CONDITIONAL node {node_id} must have a condition object"
        ))
    })?;

    let field = non_empty_str(object.get("field")).ok_or_else(|| {
        invalid(format!(
            "CONDITIONAL node {node_id} condition must have a field string"
        ))
    })?;

    let operator: Operator = object
        .get("operator")
        .and_then(Value::as_str)
        .and_then(|op| op.parse().ok())
        .ok_or_else(|| {
            invalid(format!(
                "CONDITIONAL node {node_id} condition must have a valid operator"
            ))
        })?;

    Ok(Condition {
        field: field.to_string(),
        operator,
        value: object.get("value").cloned().unwrap_or(Value::Null),
    })
}

/// An outgoing reference: absent or `null` means "end of journey".
fn reference(object: &Map<String, Value>, field: &str, node_id: &str) -> JourneyResult<Option<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(target)) => Ok(Some(target.clone())),
        Some(_) => Err(invalid(format!(
            "Node {node_id} {field} must be a string or null"
        ))),
    }
}

/// Checks a trigger payload and converts it to a typed patient context.
pub fn parse_patient_context(raw: &Value) -> JourneyResult<PatientContext> {
    let object = raw
        .as_object()
        .ok_or_else(|| invalid("Patient context must be a JSON object"))?;

    let id = non_empty_str(object.get("id"))
        .ok_or_else(|| invalid("Patient id is required and must be a string"))?;

    let age = match object.get("age") {
        Some(Value::Number(age)) if age.as_f64().is_some_and(|a| a >= 0.0) => age.clone(),
        _ => {
            return Err(invalid(
                "Patient age is required and must be a non-negative number",
            ))
        }
    };

    let language = match object.get("language").and_then(Value::as_str) {
        Some("en") => Language::En,
        Some("es") => Language::Es,
        _ => {
            return Err(invalid(
                "Patient language is required and must be either \"en\" or \"es\"",
            ))
        }
    };

    let condition = match object.get("condition").and_then(Value::as_str) {
        Some("liver_replacement") => CareCondition::LiverReplacement,
        Some("knee_replacement") => CareCondition::KneeReplacement,
        _ => return Err(invalid(
            "Patient condition is required and must be either \"liver_replacement\" or \"knee_replacement\"",
        )),
    };

    let attributes: BTreeMap<String, Value> = object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "id" | "age" | "language" | "condition"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(PatientContext {
        id: id.to_string(),
        age,
        language,
        condition,
        attributes,
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn invalid(message: impl Into<String>) -> JourneyError {
    JourneyError::Validation(message.into())
}
