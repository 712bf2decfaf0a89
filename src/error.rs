use thiserror::Error;

use crate::diagnostics::Origin;

macro_rules! invalid_input_error {
    // Single string version
    ($origin:expr, $msg:expr) => {
        crate::Error::InvalidInput {
            message: $msg.to_string(),
            origin: $origin.clone(),
        }
    };

    // Format string with arguments version
    ($origin:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidInput {
            message: format!($fmt, $($arg)*),
            origin: $origin.clone(),
        }
    };
}

pub(crate) use invalid_input_error;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The taxonomy follows the failure modes of the shrinking pipeline: malformed
/// inputs, unparsable or conflicting rules, unresolved references discovered
/// during tracing, post-shrinking contract violations, and internal invariant
/// failures.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::InvalidDescriptor`] - Syntactically malformed type, field or method descriptor
/// - [`Error::InvalidInput`] - Malformed class definition (self-inheritance, duplicate members)
///
/// ## Rule Errors
/// - [`Error::InvalidRule`] - Keep-rule text that cannot be parsed
/// - [`Error::RuleConflict`] - An applied mapping assigns conflicting names
///
/// ## Shaking Errors
/// - [`Error::MissingClass`] - A traced reference has no definition
/// - [`Error::ResolutionFailure`] - Method/field resolution failed structurally
/// - [`Error::CheckDiscardFailed`] - A `-checkdiscard` target survived shrinking
///
/// ## Infrastructure
/// - [`Error::FileError`] - Filesystem I/O errors from rule files and output consumers
/// - [`Error::Internal`] - An internal invariant assertion failed
#[derive(Error, Debug)]
pub enum Error {
    /// A descriptor string handed to the item factory is not well formed.
    ///
    /// Descriptors must be a primitive shorty (`V Z B S C I J F D`), a class
    /// descriptor (`Lpkg/Name;`) or an array descriptor (`[` + element).
    #[error("Invalid descriptor `{0}`")]
    InvalidDescriptor(String),

    /// A class definition violates the program model invariants.
    ///
    /// Raised for self-inheritance, duplicate members by reference, or a
    /// member whose holder is not the defining class. The origin pinpoints
    /// the offending input.
    #[error("Invalid input ({origin}): {message}")]
    InvalidInput {
        /// Description of the malformed definition
        message: String,
        /// The input the definition was read from
        origin: Origin,
    },

    /// A rule file or inline rule string could not be parsed.
    #[error("Invalid rule ({origin}, line {line}): {message}")]
    InvalidRule {
        /// Description of the parse failure
        message: String,
        /// The rule file (or inline marker) the rule came from
        origin: Origin,
        /// 1-based line of the offending token
        line: u32,
    },

    /// An applied mapping assigns two different original names to the same
    /// new name inside one namespace, or renames a pinned item.
    #[error("Mapping conflict: {0}")]
    RuleConflict(String),

    /// A reference encountered during resolution has no definition.
    ///
    /// Warned by default; becomes fatal unless the rules `-dontwarn` the
    /// pattern or `ignore_missing_classes` is configured.
    #[error("Missing class `{0}`")]
    MissingClass(String),

    /// Method or field resolution failed structurally during tracing.
    ///
    /// Downgraded to a warning when `force_compatibility` is configured.
    #[error("Resolution failure: {0}")]
    ResolutionFailure(String),

    /// After tree-pruning, an element named under `-checkdiscard` is still
    /// present in the program.
    #[error("Discard check failed for {count} item(s):\n{items}")]
    CheckDiscardFailed {
        /// Number of surviving items
        count: usize,
        /// One surviving item per line
        items: String,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors raised while reading rule files or writing
    /// through file-backed consumers.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// At least one fatal diagnostic was collected during a stage.
    ///
    /// Raised at the stage boundary; the details carry every fatal
    /// diagnostic so the user sees all of them at once.
    #[error("Compilation failed with {count} error(s):\n{details}")]
    CompilationFailed {
        /// Number of fatal diagnostics.
        count: usize,
        /// One diagnostic per line, sorted by severity and origin.
        details: String,
    },

    /// The compilation was cancelled cooperatively.
    #[error("Compilation cancelled")]
    Cancelled,

    /// An internal invariant assertion failed.
    ///
    /// Suggests a bug in the shrinker; the message includes a snapshot of
    /// the offending reference set.
    #[error("Internal invariant violated: {0}")]
    Internal(String),
}
