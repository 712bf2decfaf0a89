#![deny(missing_docs)]
#![allow(dead_code)]

//! # dexscope
//!
//! A whole-program shrinking, tree-shaking and renaming core for Android
//! bytecode. `dexscope` ingests class definitions produced by external
//! classfile/Dex readers, computes the transitive set of program elements
//! reachable from a set of keep-rule roots, rewrites the program to remove
//! unreachable elements, renames surviving elements, and hands the result to
//! an external writer together with a proguard-compatible mapping.
//!
//! # Architecture
//!
//! The library is organized into layers that mirror the pipeline:
//!
//! - **Graph Layer**: Interned references, definitions, the application
//!   store, the hierarchy index and the graph lens stack
//! - **Shaking Layer**: The keep-rule grammar, the root set, the Enqueuer
//!   fixed point and the tree pruner
//! - **Optimize Layer**: Lens-producing rewrites (member rebinding,
//!   vertical class merging)
//! - **Naming Layer**: The minifier and the proguard mapping format
//! - **Driver**: The staged pipeline wiring it all together
//!
//! ## Key Components
//!
//! - [`Shrinker`] - Builder-style entry point for one compilation
//! - [`graph::DexItemFactory`] - Interns names, descriptors and references
//! - [`shaking::Enqueuer`] - The reachability fixed point
//! - [`graph::GraphLens`] - Composable reference rewriting between phases
//! - [`naming::Minifier`] - Renaming under override/interface constraints
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use dexscope::prelude::*;
//!
//! let shrinker = Shrinker::new()
//!     .add_rules_text("-keep class com.example.Main { public static void main(java.lang.String[]); }");
//! # let app = dexscope::graph::DexApplication::builder(shrinker.factory()).build();
//! let output = shrinker.application(app).run()?;
//! println!("kept {} classes", output.classes.len());
//! # Ok::<(), dexscope::Error>(())
//! ```

pub mod diagnostics;
pub mod driver;
pub mod graph;
pub mod naming;
pub mod optimize;
pub mod options;
pub mod output;
pub mod prelude;
pub mod services;
pub mod shaking;

mod error;

pub use driver::{ShrinkOutput, Shrinker};
pub use error::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
