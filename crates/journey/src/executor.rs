use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use carepath_core::error::ExecutionError;
use carepath_core::types::{ConditionalNode, DelayNode, MessageNode, Node, PatientContext};

use crate::channel::MessageChannel;
use crate::evaluator::ConditionEvaluator;

/// Performs one node's effect and returns the id of the node to run next.
///
/// The executor never touches persisted state; the engine records progress
/// around each call.
pub struct NodeExecutor {
    evaluator: ConditionEvaluator,
    channel: Arc<dyn MessageChannel>,
}

impl NodeExecutor {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
            channel,
        }
    }

    /// Executes `node` for `run_id`. Only a DELAY suspends without I/O; it
    /// returns `ExecutionError::Cancelled` when `cancel` fires first.
    pub async fn execute(
        &self,
        node: &Node,
        context: &PatientContext,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ExecutionError> {
        metrics::counter!("journey.nodes.executed", "type" => node.kind()).increment(1);

        match node {
            Node::Message(message) => self.send(message, context, run_id).await,
            Node::Delay(delay) => self.wait(delay, run_id, cancel).await,
            Node::Conditional(conditional) => Ok(self.branch(conditional, context)),
        }
    }

    async fn send(
        &self,
        node: &MessageNode,
        context: &PatientContext,
        run_id: Uuid,
    ) -> Result<Option<String>, ExecutionError> {
        self.channel
            .deliver(run_id, context, &node.message)
            .await
            .map_err(ExecutionError::Delivery)?;
        Ok(node.next_node_id.clone())
    }

    async fn wait(
        &self,
        node: &DelayNode,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ExecutionError> {
        let duration = Duration::try_from_secs_f64(node.duration_seconds).map_err(|_| {
            ExecutionError::InvalidDelay {
                node_id: node.id.clone(),
                seconds: node.duration_seconds,
            }
        })?;

        info!(
            run_id = %run_id,
            node_id = %node.id,
            seconds = node.duration_seconds,
            "Waiting before next node"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(run_id = %run_id, node_id = %node.id, "Delay interrupted");
                Err(ExecutionError::Cancelled)
            }
            _ = tokio::time::sleep(duration) => {
                info!(run_id = %run_id, node_id = %node.id, "Delay completed");
                Ok(node.next_node_id.clone())
            }
        }
    }

    fn branch(&self, node: &ConditionalNode, context: &PatientContext) -> Option<String> {
        if self.evaluator.evaluate(&node.condition, context) {
            node.on_true_next_node_id.clone()
        } else {
            node.on_false_next_node_id.clone()
        }
    }
}
