//! Compilation options.
//!
//! Plain configuration records; validation happens once when the final
//! options value is constructed by the driver. Rule-driven toggles
//! (`-dontshrink`, `-dontobfuscate`, `-dontoptimize`, `-repackageclasses`)
//! are merged in from the parsed configuration before validation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::shaking::rules::RepackagePolicy;
use crate::{Error, Result};

/// Cooperative cancellation flag checked between stage tasks and worklist
/// drains.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Errors out if cancellation was requested.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Options recognized by the shrinking core.
#[derive(Debug, Clone)]
pub struct InternalOptions {
    /// Run the tree pruner.
    pub tree_shaking: bool,
    /// Verify every `-checkdiscard` reference is removed.
    pub discarded_checker: bool,
    /// Run the minifier.
    pub minification: bool,
    /// Run per-method optimization style lens producers (member rebinding,
    /// vertical class merging).
    pub optimize: bool,
    /// Relax precision-vs-compatibility tie-breaks.
    pub force_compatibility: bool,
    /// Minimum API level of the produced output.
    pub min_api_level: u32,
    /// Names of configured feature splits; a program class's feature id
    /// indexes this list (zero is the base).
    pub feature_splits: Vec<String>,
    /// Externally supplied renaming seed for the minifier.
    pub apply_mapping: Option<PathBuf>,
    /// Class renaming policy.
    pub repackage: RepackagePolicy,
    /// Treat missing classes as warnings everywhere.
    pub ignore_missing_classes: bool,
    /// Keep annotations and trace the references inside them.
    pub keep_annotations: bool,
    /// Cancellation flag shared with the caller.
    pub cancellation: CancellationToken,
}

impl Default for InternalOptions {
    fn default() -> Self {
        InternalOptions {
            tree_shaking: true,
            discarded_checker: true,
            minification: true,
            optimize: true,
            force_compatibility: false,
            min_api_level: 1,
            feature_splits: Vec::new(),
            apply_mapping: None,
            repackage: RepackagePolicy::None,
            ignore_missing_classes: false,
            keep_annotations: true,
            cancellation: CancellationToken::new(),
        }
    }
}

impl InternalOptions {
    /// Validates cross-option constraints.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] for inconsistent combinations.
    pub fn validate(&self) -> Result<()> {
        if self.min_api_level == 0 {
            return Err(Error::Internal(
                "min_api_level must be at least 1".to_string(),
            ));
        }
        if let RepackagePolicy::All(package) | RepackagePolicy::Flatten(package) = &self.repackage {
            if package.contains('/') {
                return Err(Error::Internal(format!(
                    "repackage target `{package}` must be a dotted package name"
                )));
            }
        }
        Ok(())
    }
}
