//! Lens-producing rewrites between reachability rounds.
//!
//! Both passes follow the lens contract from [`crate::graph::lens`]: they
//! compute a delta on top of the current lens and never touch method bodies;
//! invocation sites are rewritten lazily when the writer emits through the
//! composed lens.

pub mod member_rebinding;
pub mod vertical_merger;

pub use vertical_merger::MergerResult;
