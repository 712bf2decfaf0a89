//! Renaming: the minifier and the proguard-compatible mapping format.

pub mod mapping;
pub mod minifier;

pub use mapping::{ClassMapping, FieldMapping, LineRanges, MethodMapping, ProguardMapping};
pub use minifier::{Minifier, MinifierResult};
