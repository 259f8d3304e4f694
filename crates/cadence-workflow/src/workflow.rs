use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::definition::WorkflowDefinition;
use crate::error::ValidationError;
use crate::graph::Graph;
use crate::node::{NodeKind, WorkflowNode};
use crate::policy::ErrorHandling;

/// A validated workflow ready for execution.
///
/// Immutable once constructed; executions share it read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDefinition", into = "WorkflowDefinition")]
pub struct Workflow {
  definition: WorkflowDefinition,
  /// Every addressable node (top-level and inline), keyed by id.
  nodes: HashMap<String, WorkflowNode>,
}

impl Workflow {
  /// Validate a definition and index its nodes.
  pub fn new(definition: WorkflowDefinition) -> Result<Self, ValidationError> {
    let mut nodes = HashMap::new();
    for node in &definition.nodes {
      index_node(node, &mut nodes)?;
    }

    if !nodes.contains_key(&definition.start_node) {
      return Err(ValidationError::MissingStartNode(
        definition.start_node.clone(),
      ));
    }

    for node in nodes.values() {
      validate_node(node)?;
      for target in node.references() {
        if !nodes.contains_key(target) {
          return Err(ValidationError::DanglingReference {
            from: node.id.clone(),
            to: target.to_string(),
          });
        }
      }
    }

    Ok(Self { definition, nodes })
  }

  /// Parse and validate a JSON definition.
  pub fn from_json(json: &str) -> Result<Self, ValidationError> {
    let definition: WorkflowDefinition = serde_json::from_str(json)?;
    Self::new(definition)
  }

  pub fn id(&self) -> &str {
    &self.definition.id
  }

  pub fn name(&self) -> &str {
    &self.definition.name
  }

  pub fn version(&self) -> &str {
    &self.definition.version
  }

  pub fn start_node(&self) -> &str {
    &self.definition.start_node
  }

  pub fn variables(&self) -> &serde_json::Map<String, serde_json::Value> {
    &self.definition.variables
  }

  pub fn definition(&self) -> &WorkflowDefinition {
    &self.definition
  }

  /// Get a node by ID, including inline switch branches.
  pub fn get_node(&self, node_id: &str) -> Option<&WorkflowNode> {
    self.nodes.get(node_id)
  }

  /// Every node, including inline switch branches.
  pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
    self.nodes.values()
  }

  /// Whether any node suspends execution.
  pub fn has_await_nodes(&self) -> bool {
    self
      .nodes
      .values()
      .any(|node| matches!(node.kind, NodeKind::Await { .. }))
  }

  /// Build the graph structure for reachability analysis.
  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes, &self.definition.start_node)
  }
}

impl TryFrom<WorkflowDefinition> for Workflow {
  type Error = ValidationError;

  fn try_from(definition: WorkflowDefinition) -> Result<Self, Self::Error> {
    Self::new(definition)
  }
}

impl From<Workflow> for WorkflowDefinition {
  fn from(workflow: Workflow) -> Self {
    workflow.definition
  }
}

fn index_node(
  node: &WorkflowNode,
  nodes: &mut HashMap<String, WorkflowNode>,
) -> Result<(), ValidationError> {
  if nodes.insert(node.id.clone(), node.clone()).is_some() {
    return Err(ValidationError::DuplicateNode(node.id.clone()));
  }
  for inline in node.inline_nodes() {
    index_node(inline, nodes)?;
  }
  Ok(())
}

fn invalid(node: &WorkflowNode, message: impl Into<String>) -> ValidationError {
  ValidationError::InvalidNode {
    node_id: node.id.clone(),
    message: message.into(),
  }
}

fn validate_node(node: &WorkflowNode) -> Result<(), ValidationError> {
  let expression_error = |source| ValidationError::Expression {
    node_id: node.id.clone(),
    source,
  };

  match &node.kind {
    NodeKind::Procedure { procedure_name } => {
      if procedure_name.is_empty() {
        return Err(invalid(node, "procedureName must not be empty"));
      }
    }
    NodeKind::Condition { condition, .. } => {
      condition.check().map_err(expression_error)?;
    }
    NodeKind::Switch { selector, .. } => {
      selector.check().map_err(expression_error)?;
    }
    NodeKind::Parallel {
      branches, parallel, ..
    } => {
      if branches.is_empty() {
        return Err(invalid(node, "parallel node needs at least one branch"));
      }
      if parallel.max_concurrency == Some(0) {
        return Err(invalid(node, "maxConcurrency must be at least 1"));
      }
    }
    NodeKind::Sequential {
      procedures,
      error_handling,
      retry_config,
      fallback_procedure_name,
    } => {
      if procedures.is_empty() {
        return Err(invalid(node, "sequential node needs at least one procedure"));
      }
      if *error_handling == ErrorHandling::Fallback && fallback_procedure_name.is_none() {
        return Err(invalid(
          node,
          "errorHandling 'fallback' requires fallbackProcedureName",
        ));
      }
      if let Some(retry) = retry_config
        && retry.max_attempts == 0
      {
        return Err(invalid(node, "retryConfig.maxAttempts must be at least 1"));
      }
    }
    NodeKind::Await { .. } => {
      if node.trigger_names().is_empty() {
        return Err(invalid(
          node,
          "await node must name at least one trigger in 'on' or 'procedureName'",
        ));
      }
    }
  }

  Ok(())
}
