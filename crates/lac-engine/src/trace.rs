//! # Resolution Trace
//!
//! Every evaluation records a tree of [`PathNode`]s: requirements checked,
//! actions executed, operations applied, and every reference resolved with
//! the source that satisfied it. Nested service evaluations attach their
//! own trace as a child of the node that called them.
//!
//! Traces are plain data. Presentation is a pure function over a finished
//! tree: [`render`] produces an indented text view and
//! [`extract_value_tree`] flattens the externally-sourced values into a
//! path-keyed map for explanation front-ends.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use lac_core::{Record, Value};
use serde::{Deserialize, Serialize};

/// What a trace node records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The evaluation as a whole.
    Root,
    /// The requirement conjunction.
    Requirements,
    /// One requirement or group.
    Requirement,
    /// One action producing an output.
    Action,
    /// An operation node.
    Operation,
    /// A reference resolution.
    Resolve,
    /// A call into another service.
    ServiceEvaluation,
}

impl NodeKind {
    /// The serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Requirements => "requirements",
            Self::Requirement => "requirement",
            Self::Action => "action",
            Self::Operation => "operation",
            Self::Resolve => "resolve",
            Self::ServiceEvaluation => "service_evaluation",
        }
    }
}

/// Which source satisfied a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveSource {
    /// A date derived from the calculation date.
    Date,
    /// A claim on the subject.
    Claim,
    /// The local scope of a `FOREACH` iteration.
    Local,
    /// A named constant.
    Definition,
    /// A caller parameter.
    Parameter,
    /// An output computed earlier in the same evaluation.
    Output,
    /// An explicit override.
    Overwrite,
    /// A tabular source.
    Source,
    /// Another service.
    Service,
    /// Nothing; the reference resolved to `null`.
    None,
}

impl ResolveSource {
    /// The serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "DATE",
            Self::Claim => "CLAIM",
            Self::Local => "LOCAL",
            Self::Definition => "DEFINITION",
            Self::Parameter => "PARAMETER",
            Self::Output => "OUTPUT",
            Self::Overwrite => "OVERWRITE",
            Self::Source => "SOURCE",
            Self::Service => "SERVICE",
            Self::None => "NONE",
        }
    }

    fn is_external(&self) -> bool {
        matches!(self, Self::Service | Self::Source | Self::Claim | Self::None)
    }
}

/// One node of the resolution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathNode {
    /// What this node records.
    pub kind: NodeKind,
    /// Human-readable label.
    pub name: String,
    /// The reference path, for resolve and service nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The value this node produced.
    #[serde(default)]
    pub result: Value,
    /// The source that satisfied a resolve node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_type: Option<ResolveSource>,
    /// Whether the resolved property is required.
    #[serde(default)]
    pub required: bool,
    /// Free-form diagnostics.
    #[serde(default, skip_serializing_if = "Record::is_empty")]
    pub details: Record,
    /// Nested nodes, in evaluation order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PathNode>,
}

impl PathNode {
    /// A node with no result yet.
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            path: None,
            result: Value::Null,
            resolve_type: None,
            required: false,
            details: Record::new(),
            children: Vec::new(),
        }
    }

    /// A resolve node for `path`.
    pub fn resolve(path: &str) -> Self {
        let mut node = Self::new(NodeKind::Resolve, format!("Resolving value: {path}"));
        node.path = Some(path.to_string());
        node
    }

    /// Builder: add a diagnostic detail.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Depth-first search for the first node satisfying `pred`.
    pub fn find(&self, pred: &dyn Fn(&PathNode) -> bool) -> Option<&PathNode> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(pred))
    }

    /// Number of nodes in this subtree.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(PathNode::len).sum::<usize>()
    }

    /// Always false; a node counts itself.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Render a trace as an indented tree, one node per line.
pub fn render(root: &PathNode) -> String {
    let mut out = String::new();
    render_into(root, 0, &mut out);
    out
}

fn render_into(node: &PathNode, depth: usize, out: &mut String) {
    let _ = write!(out, "{:indent$}{} {} = {}", "", node.kind.as_str(), node.name, node.result, indent = depth * 2);
    if let Some(source) = node.resolve_type {
        let _ = write!(out, " [{}]", source.as_str());
    }
    if node.required {
        out.push_str(" (required)");
    }
    out.push('\n');
    for child in &node.children {
        render_into(child, depth + 1, out);
    }
}

/// A value obtained from outside the evaluated rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueTreeEntry {
    /// The resolved value.
    pub result: Value,
    /// Whether the property was required.
    pub required: bool,
    /// Called service, for service evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Called law, for service evaluations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub law: Option<String>,
    /// Values resolved inside a service evaluation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, ValueTreeEntry>,
}

/// Flatten a trace to the values that came from claims, sources, services,
/// or resolved to nothing, keyed by path. A service evaluation replaces the
/// entry of the reference that triggered it and nests the values it
/// resolved under `children`. Otherwise the first occurrence of a path at
/// each level wins.
pub fn extract_value_tree(root: &PathNode) -> BTreeMap<String, ValueTreeEntry> {
    let mut out = BTreeMap::new();
    collect_values(root, &mut out);
    out
}

fn collect_values(node: &PathNode, out: &mut BTreeMap<String, ValueTreeEntry>) {
    match (node.kind, node.path.as_deref()) {
        (NodeKind::ServiceEvaluation, Some(path)) => {
            let mut children = BTreeMap::new();
            for child in &node.children {
                collect_values(child, &mut children);
            }
            out.insert(
                path.to_string(),
                ValueTreeEntry {
                    result: node.result.clone(),
                    required: node.required,
                    service: node.details.get("service").and_then(Value::as_str).map(str::to_string),
                    law: node.details.get("law").and_then(Value::as_str).map(str::to_string),
                    children,
                },
            );
            return;
        }
        (NodeKind::Resolve, Some(path)) if node.resolve_type.is_some_and(|s| s.is_external()) => {
            out.entry(path.to_string()).or_insert_with(|| ValueTreeEntry {
                result: node.result.clone(),
                required: node.required,
                service: None,
                law: None,
                children: BTreeMap::new(),
            });
        }
        _ => {}
    }
    for child in &node.children {
        collect_values(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(path: &str, source: ResolveSource, value: Value) -> PathNode {
        let mut node = PathNode::resolve(path);
        node.resolve_type = Some(source);
        node.result = value;
        node
    }

    fn sample() -> PathNode {
        let mut service = PathNode::new(NodeKind::ServiceEvaluation, "Service call: BELASTINGDIENST.awir")
            .with_detail("service", "BELASTINGDIENST")
            .with_detail("law", "awir");
        service.path = Some("income".into());
        service.result = Value::Int(30000);
        service.required = true;
        let mut nested_root = PathNode::new(NodeKind::Root, "awir");
        nested_root.children.push(resolved("wages", ResolveSource::Source, Value::Int(30000)));
        service.children.push(nested_root);

        let mut income = resolved("income", ResolveSource::Service, Value::Int(30000));
        income.required = true;
        income.children.push(service);

        let mut root = PathNode::new(NodeKind::Root, "zorgtoeslag");
        root.children.push(resolved("THRESHOLD", ResolveSource::Definition, Value::Int(5)));
        root.children.push(income);
        root.children.push(resolved("partner", ResolveSource::None, Value::Null));
        root
    }

    #[test]
    fn render_indents_children() {
        let text = render(&sample());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("root zorgtoeslag"));
        assert!(lines[1].starts_with("  resolve Resolving value: THRESHOLD = 5 [DEFINITION]"));
        assert!(lines.iter().any(|l| l.contains("(required)")));
        assert!(lines.iter().any(|l| l.starts_with("      root awir")));
    }

    #[test]
    fn value_tree_keeps_external_values_only() {
        let tree = extract_value_tree(&sample());
        assert!(!tree.contains_key("THRESHOLD"));
        assert_eq!(tree["partner"].result, Value::Null);
        let income = &tree["income"];
        assert!(income.required);
        assert_eq!(income.result, Value::Int(30000));
        assert_eq!(income.service.as_deref(), Some("BELASTINGDIENST"));
        assert_eq!(income.law.as_deref(), Some("awir"));
        assert_eq!(income.children["wages"].result, Value::Int(30000));
    }

    #[test]
    fn find_and_len() {
        let root = sample();
        assert_eq!(root.len(), 7);
        let hit = root.find(&|n| n.path.as_deref() == Some("wages"));
        assert!(hit.is_some());
    }

    #[test]
    fn serializes_with_snake_case_kinds() {
        let yaml = serde_yaml::to_string(&sample()).unwrap();
        assert!(yaml.contains("service_evaluation"));
        assert!(yaml.contains("SERVICE"));
    }
}
