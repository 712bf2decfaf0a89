//! The program model: interned references, definitions, the application
//! store, the hierarchy index and the graph lens stack.
//!
//! # Key Components
//!
//! - [`DexItemFactory`] - Interns names, descriptors, types and member
//!   references; assigns stable identity
//! - [`DexClass`] / [`DexEncodedField`] / [`DexEncodedMethod`] - Definitions
//!   carrying flags, annotations and code
//! - [`DexApplication`] - Every class known to one compilation
//! - [`AppInfo`] - Hierarchy index, subtype closure and resolution
//! - [`FieldAccessInfoCollection`] - Whole-program field usage
//! - [`GraphLens`] - Composable reference rewriting between phases
//!
//! # Architecture
//!
//! The program model is cyclic (methods reference types that contain methods
//! that reference more types). All cross-references are interned reference
//! values, not owning pointers; definitions own only the data of their
//! holder, so traversals never need ownership cycles.

pub mod app;
pub mod app_info;
pub mod code;
pub mod definitions;
pub mod factory;
pub mod field_access;
pub mod flags;
pub mod lens;
pub mod references;

pub use app::{DataEntry, DexApplication, DexApplicationBuilder, InputProvider, SERVICE_DIRECTORY};
pub use app_info::{AppInfo, FieldResolutionResult, MethodResolutionResult, SingleResolution};
pub use code::{
    BootstrapArg, Code, DexCallSite, DexMethodHandle, ExceptionHandler, Instruction, InvokeKind,
    UseRegistry,
};
pub use definitions::{
    AbstractValue, AnnotationValue, ClassKind, DexAnnotation, DexClass, DexClassBuilder,
    DexClassRc, DexEncodedField, DexEncodedMethod, FeatureId, MethodOptimizationInfo, BASE_FEATURE,
};
pub use factory::{DexItemFactory, KnownItems};
pub use field_access::{FieldAccessFlags, FieldAccessInfo, FieldAccessInfoCollection};
pub use flags::AccessFlags;
pub use lens::{
    GraphLens, MethodLookupResult, NestedLens, NestedLensBuilder, PinnedItems, PrototypeChanges,
};
pub use references::{DexField, DexMember, DexMethod, DexProto, DexString, DexType};
