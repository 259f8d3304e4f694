use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::expression::Expression;
use crate::policy::{ErrorHandling, MergeStrategy, ParallelConfig, RetryConfig};

/// A single step in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
  pub id: String,
  #[serde(flatten)]
  pub kind: NodeKind,
  /// Opaque parameters merged into the handler input.
  #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
  pub config: serde_json::Map<String, serde_json::Value>,
  #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
  pub next: Next,
  /// Node to continue at when this node fails.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_error: Option<String>,
}

/// The type of a node and its type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum NodeKind {
  /// Invoke a single registered procedure.
  Procedure { procedure_name: String },

  /// Route on a boolean expression over the workflow variables.
  Condition {
    condition: Expression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    true_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    false_branch: Option<String>,
  },

  /// Route on a discriminant computed from the node input.
  Switch {
    selector: Expression,
    #[serde(default)]
    cases: BTreeMap<String, Branch>,
    #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
    default_branch: Option<Branch>,
  },

  /// Walk several independent sub-chains concurrently.
  Parallel {
    branches: Vec<String>,
    #[serde(default)]
    parallel: ParallelConfig,
    #[serde(default)]
    error_handling: ErrorHandling,
    #[serde(default)]
    merge: MergeStrategy,
  },

  /// Run a group of procedures through the composition executor.
  Sequential {
    procedures: Vec<String>,
    #[serde(default)]
    error_handling: ErrorHandling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_config: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback_procedure_name: Option<String>,
  },

  /// Suspend the execution until a matching trigger event arrives.
  Await {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    procedure_name: Option<String>,
    #[serde(default, skip_serializing_if = "OneOrMany::is_empty")]
    on: OneOrMany,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<FilterRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout: Option<AwaitTimeout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    on_timeout: Option<String>,
  },
}

/// A switch branch target: a node id or an inline step definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Branch {
  Node(String),
  Inline(Box<WorkflowNode>),
}

impl Branch {
  /// Id of the node this branch enters.
  pub fn target(&self) -> &str {
    match self {
      Branch::Node(id) => id,
      Branch::Inline(node) => &node.id,
    }
  }
}

/// Reference to a filter registered in the host's filter catalogue.
///
/// Only the id and JSON parameters are stored so that a paused execution can
/// be persisted and resumed in another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRef {
  pub id: String,
  #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
  pub params: serde_json::Value,
}

impl FilterRef {
  pub fn new(id: impl Into<String>, params: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      params,
    }
  }
}

/// Timeout of an await node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitTimeout {
  /// Duration in milliseconds. Accepts a number of milliseconds or a string
  /// such as `"500ms"`, `"30s"`, `"5m"`, `"24h"` or `"2d"`.
  #[serde(rename = "duration", deserialize_with = "deserialize_duration_ms")]
  pub duration_ms: u64,
}

/// Successor ids of a node.
pub type Next = OneOrMany;

/// A list of names written either as a single string or as an array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneOrMany(Vec<String>);

impl OneOrMany {
  pub fn new(items: Vec<String>) -> Self {
    Self(items)
  }

  pub fn first(&self) -> Option<&str> {
    self.0.first().map(String::as_str)
  }

  pub fn as_slice(&self) -> &[String] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }
}

impl From<&str> for OneOrMany {
  fn from(item: &str) -> Self {
    Self(vec![item.to_string()])
  }
}

impl From<Vec<String>> for OneOrMany {
  fn from(items: Vec<String>) -> Self {
    Self(items)
  }
}

impl Serialize for OneOrMany {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self.0.as_slice() {
      [single] => serializer.serialize_str(single),
      items => items.serialize(serializer),
    }
  }
}

impl<'de> Deserialize<'de> for OneOrMany {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
      One(String),
      Many(Vec<String>),
    }

    Ok(match Option::<Repr>::deserialize(deserializer)? {
      None => Self::default(),
      Some(Repr::One(item)) => Self(vec![item]),
      Some(Repr::Many(items)) => Self(items),
    })
  }
}

fn deserialize_duration_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Repr {
    Millis(u64),
    Text(String),
  }

  match Repr::deserialize(deserializer)? {
    Repr::Millis(ms) => Ok(ms),
    Repr::Text(text) => parse_duration_ms(&text).map_err(serde::de::Error::custom),
  }
}

/// Parse a duration such as `"30s"` into milliseconds.
fn parse_duration_ms(text: &str) -> Result<u64, String> {
  let text = text.trim();
  let split = text
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(text.len());
  let (digits, unit) = text.split_at(split);
  let amount: u64 = digits
    .parse()
    .map_err(|_| format!("invalid duration '{}'", text))?;
  let factor = match unit.trim() {
    "" | "ms" => 1,
    "s" => 1_000,
    "m" => 60_000,
    "h" => 3_600_000,
    "d" => 86_400_000,
    other => return Err(format!("unknown duration unit '{}' in '{}'", other, text)),
  };
  amount
    .checked_mul(factor)
    .ok_or_else(|| format!("duration '{}' is too large", text))
}

impl WorkflowNode {
  fn with_kind(id: impl Into<String>, kind: NodeKind) -> Self {
    Self {
      id: id.into(),
      kind,
      config: serde_json::Map::new(),
      next: Next::default(),
      on_error: None,
    }
  }

  /// A procedure node calling `procedure_name`.
  pub fn procedure(id: impl Into<String>, procedure_name: impl Into<String>) -> Self {
    Self::with_kind(
      id,
      NodeKind::Procedure {
        procedure_name: procedure_name.into(),
      },
    )
  }

  /// An await node listening on a single trigger.
  pub fn await_trigger(id: impl Into<String>, trigger: &str) -> Self {
    Self::with_kind(
      id,
      NodeKind::Await {
        procedure_name: None,
        on: OneOrMany::from(trigger),
        filter: None,
        timeout: None,
        on_timeout: None,
      },
    )
  }

  /// A condition node routing to `true_branch` / `false_branch`.
  pub fn condition(
    id: impl Into<String>,
    condition: &str,
    true_branch: Option<&str>,
    false_branch: Option<&str>,
  ) -> Self {
    Self::with_kind(
      id,
      NodeKind::Condition {
        condition: Expression::new(condition),
        true_branch: true_branch.map(str::to_string),
        false_branch: false_branch.map(str::to_string),
      },
    )
  }

  /// A node of an arbitrary kind.
  pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
    Self::with_kind(id, kind)
  }

  pub fn with_next(mut self, next: &str) -> Self {
    self.next = Next::from(next);
    self
  }

  pub fn with_config(mut self, config: serde_json::Value) -> Self {
    if let serde_json::Value::Object(map) = config {
      self.config = map;
    }
    self
  }

  pub fn with_on_error(mut self, node_id: &str) -> Self {
    self.on_error = Some(node_id.to_string());
    self
  }

  /// Short name of the node type, as written in definitions.
  pub fn kind_name(&self) -> &'static str {
    match self.kind {
      NodeKind::Procedure { .. } => "procedure",
      NodeKind::Condition { .. } => "condition",
      NodeKind::Switch { .. } => "switch",
      NodeKind::Parallel { .. } => "parallel",
      NodeKind::Sequential { .. } => "sequential",
      NodeKind::Await { .. } => "await",
    }
  }

  /// The successor followed by non-branching node types.
  ///
  /// Only the first element of a `next` list is used; branching belongs to
  /// condition, switch and parallel nodes.
  pub fn successor(&self) -> Option<&str> {
    self.next.first()
  }

  /// Trigger names an await node listens on. Falls back to `procedureName`
  /// when `on` is absent. Empty for other node types.
  pub fn trigger_names(&self) -> Vec<String> {
    match &self.kind {
      NodeKind::Await {
        procedure_name, on, ..
      } => {
        let mut names: Vec<String> = on.iter().map(str::to_string).collect();
        if names.is_empty()
          && let Some(name) = procedure_name
        {
          names.push(name.clone());
        }
        names.dedup();
        names
      }
      _ => Vec::new(),
    }
  }

  /// All node ids this node can route to.
  pub fn references(&self) -> Vec<&str> {
    let mut refs: Vec<&str> = self.next.iter().collect();
    if let Some(on_error) = &self.on_error {
      refs.push(on_error);
    }
    match &self.kind {
      NodeKind::Condition {
        true_branch,
        false_branch,
        ..
      } => {
        refs.extend(true_branch.as_deref());
        refs.extend(false_branch.as_deref());
      }
      NodeKind::Switch {
        cases,
        default_branch,
        ..
      } => {
        refs.extend(cases.values().map(Branch::target));
        refs.extend(default_branch.as_ref().map(Branch::target));
      }
      NodeKind::Parallel { branches, .. } => {
        refs.extend(branches.iter().map(String::as_str));
      }
      NodeKind::Await { on_timeout, .. } => {
        refs.extend(on_timeout.as_deref());
      }
      NodeKind::Procedure { .. } | NodeKind::Sequential { .. } => {}
    }
    refs
  }

  /// Inline step definitions embedded in switch branches.
  pub fn inline_nodes(&self) -> Vec<&WorkflowNode> {
    match &self.kind {
      NodeKind::Switch {
        cases,
        default_branch,
        ..
      } => cases
        .values()
        .chain(default_branch.iter())
        .filter_map(|branch| match branch {
          Branch::Inline(node) => Some(node.as_ref()),
          Branch::Node(_) => None,
        })
        .collect(),
      _ => Vec::new(),
    }
  }
}
