//! Convenient re-exports of the most commonly used types.
//!
//! ```rust,no_run
//! use dexscope::prelude::*;
//! ```

pub use crate::diagnostics::{Diagnostic, DiagnosticKind, Origin, Reporter, Severity};
pub use crate::driver::{ShrinkOutput, Shrinker};
pub use crate::graph::{
    AccessFlags, AppInfo, BootstrapArg, ClassKind, Code, DataEntry, DexApplication,
    DexApplicationBuilder, DexCallSite, DexClass, DexClassBuilder, DexEncodedField,
    DexEncodedMethod, DexField, DexItemFactory, DexMember, DexMethod, DexMethodHandle, DexProto,
    DexString, DexType, GraphLens, InputProvider, Instruction, InvokeKind, PinnedItems,
    UseRegistry,
};
pub use crate::naming::{Minifier, ProguardMapping};
pub use crate::options::{CancellationToken, InternalOptions};
pub use crate::output::{
    BufferConsumer, CollectingProgramConsumer, FileConsumer, OutputClass, ProgramConsumer,
    StringConsumer,
};
pub use crate::services::AppServices;
pub use crate::shaking::{Enqueuer, LivenessView, ProguardConfig, RootSet, RuleParser};
pub use crate::{Error, Result};
