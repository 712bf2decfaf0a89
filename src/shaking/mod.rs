//! Rule-driven whole-program reachability.
//!
//! # Key Components
//!
//! - [`rules`] / [`parser`] - The keep-rule grammar and its parser
//! - [`matcher`] - Evaluation of rules against the loaded definitions
//! - [`RootSet`] - Reachability seeds and per-reference attributes
//! - [`Enqueuer`] - The worklist fixed point computing liveness
//! - [`TreePruner`] - Rewriting the program to drop non-live definitions
//!
//! # Data Flow
//!
//! The rule engine and root set builder produce seeds; the Enqueuer runs the
//! fixed point, tracing each newly-live method body through the use
//! registry; the tree pruner drops dead items and the `-checkdiscard`
//! verification runs against the removed set.

pub mod enqueuer;
pub mod matcher;
pub mod parser;
pub mod reasons;
pub mod root_set;
pub mod rules;
pub mod tree_pruner;

pub use enqueuer::{Enqueuer, LivenessView};
pub use matcher::{match_spec, match_spec_against_program, ClassMatch};
pub use parser::RuleParser;
pub use reasons::{GraphNode, KeptReason, ReasonGraph};
pub use root_set::{DependentMemberRule, ItemSet, RootSet, SeedEntry};
pub use rules::{
    AccessFilter, ClassNamePattern, ClassSpec, ClassTypeFilter, KeepKind, KeepModifiers, KeepRule,
    MemberNamePattern, MemberPattern, MemberPatternKind, ParametersPattern, ProguardConfig,
    ProguardRule, RepackagePolicy, TypePattern,
};
pub use tree_pruner::{verify_check_discard, PrunerResult, RemovedItems, TreePruner};
