//! Why each item became live, for `-whyareyoukeeping` and debugging.
//!
//! The first recorded reason wins; later transitions re-marking an already
//! live item do not overwrite it, so every chain ends at a root.

use rustc_hash::FxHashMap;

use crate::graph::{DexField, DexMethod, DexType};

/// A node in the reachability graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GraphNode {
    /// A type.
    Type(DexType),
    /// A field.
    Field(DexField),
    /// A method.
    Method(DexMethod),
}

impl std::fmt::Display for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphNode::Type(ty) => write!(f, "{ty}"),
            GraphNode::Field(field) => write!(f, "{field}"),
            GraphNode::Method(method) => write!(f, "{method}"),
        }
    }
}

/// Why an item became live.
#[derive(Debug, Clone)]
pub enum KeptReason {
    /// Matched by a keep rule.
    KeepRule,
    /// Matched by a conditional keep (`-if`, `-keepclassmembers`).
    ConditionalKeepRule,
    /// Invoked from a live method.
    InvokedFrom(DexMethod),
    /// Referenced from a live method.
    ReferencedFrom(DexMethod),
    /// Instantiated in a live method.
    InstantiatedIn(DexMethod),
    /// Reachable from a live type (supertype, member holder, annotation).
    ReachableFromType(DexType),
    /// Registered service implementation of a loaded service interface.
    ServiceImplementation(DexType),
    /// Matched by a reflective-use heuristic in a live method.
    ReflectiveUse(DexMethod),
    /// Referenced by a method-handle constant in a live method.
    MethodHandleUse(DexMethod),
    /// Synthesized for a lambda call site in a live method.
    SynthesizedFrom(DexMethod),
}

impl std::fmt::Display for KeptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeptReason::KeepRule => write!(f, "referenced in keep rule"),
            KeptReason::ConditionalKeepRule => write!(f, "referenced in conditional keep rule"),
            KeptReason::InvokedFrom(method) => write!(f, "invoked from {method}"),
            KeptReason::ReferencedFrom(method) => write!(f, "referenced from {method}"),
            KeptReason::InstantiatedIn(method) => write!(f, "instantiated in {method}"),
            KeptReason::ReachableFromType(ty) => write!(f, "reachable from {ty}"),
            KeptReason::ServiceImplementation(ty) => {
                write!(f, "service implementation of {ty}")
            }
            KeptReason::ReflectiveUse(method) => write!(f, "reflected upon in {method}"),
            KeptReason::MethodHandleUse(method) => write!(f, "method handle in {method}"),
            KeptReason::SynthesizedFrom(method) => write!(f, "synthesized for {method}"),
        }
    }
}

impl KeptReason {
    /// The predecessor node of this reason, if the chain continues.
    #[must_use]
    pub fn parent(&self) -> Option<GraphNode> {
        match self {
            KeptReason::KeepRule | KeptReason::ConditionalKeepRule => None,
            KeptReason::InvokedFrom(method)
            | KeptReason::ReferencedFrom(method)
            | KeptReason::InstantiatedIn(method)
            | KeptReason::ReflectiveUse(method)
            | KeptReason::MethodHandleUse(method)
            | KeptReason::SynthesizedFrom(method) => Some(GraphNode::Method(method.clone())),
            KeptReason::ReachableFromType(ty) | KeptReason::ServiceImplementation(ty) => {
                Some(GraphNode::Type(ty.clone()))
            }
        }
    }
}

/// Records the first reason each node became live.
#[derive(Debug, Clone, Default)]
pub struct ReasonGraph {
    reasons: FxHashMap<GraphNode, KeptReason>,
}

impl ReasonGraph {
    /// Records a reason; the first reason for a node wins.
    pub fn record(&mut self, node: GraphNode, reason: KeptReason) {
        self.reasons.entry(node).or_insert(reason);
    }

    /// The recorded reason for a node.
    #[must_use]
    pub fn reason_for(&self, node: &GraphNode) -> Option<&KeptReason> {
        self.reasons.get(node)
    }

    /// Formats the chain from a node back to its root, one line per hop.
    #[must_use]
    pub fn format_chain(&self, node: &GraphNode) -> String {
        let mut lines = vec![format!("{node}")];
        let mut current = node.clone();
        let mut hops = 0;
        while let Some(reason) = self.reasons.get(&current) {
            lines.push(format!("|- {reason}"));
            match reason.parent() {
                Some(parent) if parent != current && hops < 64 => {
                    hops += 1;
                    current = parent;
                }
                _ => break,
            }
        }
        lines.join("\n")
    }
}
