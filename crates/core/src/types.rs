use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::openapi::schema::{AdditionalProperties, ObjectBuilder, Ref, Schema, SchemaType};
use utoipa::openapi::RefOr;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::InvalidOperator;

// ─── Journey graph ──────────────────────────────────────────────────────────

/// A persisted patient care journey. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Journey {
    pub id: Uuid,
    pub name: String,
    pub start_node_id: String,
    pub nodes: Vec<Node>,
    pub created_at: DateTime<Utc>,
}

impl Journey {
    /// Looks up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == node_id)
    }
}

/// A journey as submitted by a caller, before the store assigns its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JourneyDraft {
    #[schema(example = "Hip Replacement Recovery Journey")]
    pub name: String,
    #[schema(example = "welcome")]
    pub start_node_id: String,
    pub nodes: Vec<Node>,
}

impl JourneyDraft {
    pub fn into_journey(self, id: Uuid, created_at: DateTime<Utc>) -> Journey {
        Journey {
            id,
            name: self.name,
            start_node_id: self.start_node_id,
            nodes: self.nodes,
            created_at,
        }
    }
}

/// One step of a journey graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum Node {
    #[serde(rename = "MESSAGE")]
    Message(MessageNode),
    #[serde(rename = "DELAY")]
    Delay(DelayNode),
    #[serde(rename = "CONDITIONAL")]
    Conditional(ConditionalNode),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Message(n) => &n.id,
            Node::Delay(n) => &n.id,
            Node::Conditional(n) => &n.id,
        }
    }

    /// Wire name of the node type.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Message(_) => "MESSAGE",
            Node::Delay(_) => "DELAY",
            Node::Conditional(_) => "CONDITIONAL",
        }
    }

    /// Outgoing references, labelled with the field that holds them.
    pub fn edges(&self) -> Vec<(&'static str, Option<&str>)> {
        match self {
            Node::Message(n) => vec![("next_node_id", n.next_node_id.as_deref())],
            Node::Delay(n) => vec![("next_node_id", n.next_node_id.as_deref())],
            Node::Conditional(n) => vec![
                ("on_true_next_node_id", n.on_true_next_node_id.as_deref()),
                ("on_false_next_node_id", n.on_false_next_node_id.as_deref()),
            ],
        }
    }
}

/// Sends a message to the patient, then continues unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MessageNode {
    pub id: String,
    pub message: String,
    pub next_node_id: Option<String>,
}

/// Pauses the run for `duration_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DelayNode {
    pub id: String,
    pub duration_seconds: f64,
    pub next_node_id: Option<String>,
}

/// Branches on a condition evaluated against the patient context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConditionalNode {
    pub id: String,
    pub condition: Condition,
    pub on_true_next_node_id: Option<String>,
    pub on_false_next_node_id: Option<String>,
}

/// Compares `context[field]` against a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Condition {
    #[schema(example = "age")]
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    #[schema(value_type = Object, example = 65)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl Operator {
    pub const ALL: [Operator; 8] = [
        Operator::Eq,
        Operator::Ne,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Nin => "nin",
        }
    }
}

impl FromStr for Operator {
    type Err = InvalidOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| InvalidOperator(s.to_string()))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Patient context ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CareCondition {
    LiverReplacement,
    KneeReplacement,
}

impl CareCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            CareCondition::LiverReplacement => "liver_replacement",
            CareCondition::KneeReplacement => "knee_replacement",
        }
    }
}

/// Patient data a run evaluates conditions against. Any named field beyond
/// the four typed ones is carried verbatim in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    pub id: String,
    pub age: serde_json::Number,
    pub language: Language,
    pub condition: CareCondition,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl PatientContext {
    pub fn new(
        id: impl Into<String>,
        age: impl Into<serde_json::Number>,
        language: Language,
        condition: CareCondition,
    ) -> Self {
        Self {
            id: id.into(),
            age: age.into(),
            language,
            condition,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Resolves a data-supplied field name. Absent fields read as `Null`.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => Value::String(self.id.clone()),
            "age" => Value::Number(self.age.clone()),
            "language" => Value::String(self.language.as_str().to_string()),
            "condition" => Value::String(self.condition.as_str().to_string()),
            other => self.attributes.get(other).cloned().unwrap_or(Value::Null),
        }
    }
}

// `attributes` is flattened, which the derive cannot express as an open object.
impl<'s> ToSchema<'s> for PatientContext {
    fn schema() -> (&'s str, RefOr<Schema>) {
        let object = ObjectBuilder::new()
            .description(Some(
                "Patient data snapshot. Additional named fields are accepted and kept verbatim.",
            ))
            .property(
                "id",
                ObjectBuilder::new()
                    .schema_type(SchemaType::String)
                    .example(Some(Value::from("patient-001"))),
            )
            .required("id")
            .property(
                "age",
                ObjectBuilder::new()
                    .schema_type(SchemaType::Number)
                    .minimum(Some(0.0))
                    .example(Some(Value::from(72))),
            )
            .required("age")
            .property("language", Ref::from_schema_name("Language"))
            .required("language")
            .property("condition", Ref::from_schema_name("CareCondition"))
            .required("condition")
            .additional_properties(Some(AdditionalProperties::FreeForm(true)))
            .build();
        ("PatientContext", RefOr::T(Schema::Object(object)))
    }
}

// ─── Runs ───────────────────────────────────────────────────────────────────

/// Lifecycle status of a journey run. `Completed` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a journey against one patient's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct JourneyRun {
    pub id: Uuid,
    pub journey_id: Uuid,
    pub patient_context: PatientContext,
    pub status: RunStatus,
    pub current_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JourneyRun {
    /// A fresh run positioned at `start_node_id`.
    pub fn new(journey_id: Uuid, patient_context: PatientContext, start_node_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            journey_id,
            patient_context,
            status: RunStatus::InProgress,
            current_node_id: Some(start_node_id),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Applies a field-level patch and bumps `updated_at`.
    pub fn apply(&mut self, patch: &RunPatch, now: DateTime<Utc>) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(node) = &patch.current_node_id {
            self.current_node_id = node.clone();
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        self.updated_at = now;
    }
}

/// Partial update of a run record. `None` leaves a field untouched;
/// `current_node_id: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub current_node_id: Option<Option<String>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunPatch {
    pub fn advance(node_id: impl Into<String>) -> Self {
        Self {
            current_node_id: Some(Some(node_id.into())),
            ..Self::default()
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RunStatus::Completed),
            current_node_id: Some(None),
            completed_at: Some(at),
        }
    }

    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RunStatus::Failed),
            current_node_id: None,
            completed_at: Some(at),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.current_node_id.is_none() && self.completed_at.is_none()
    }
}
