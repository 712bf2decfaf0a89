//! Rewrites the program to contain only live definitions.
//!
//! Given the liveness view, the pruner builds a new application containing
//! only live classes and, within each, only live fields and methods. When a
//! surviving class's superclass was pruned, the super link is hoisted to the
//! nearest surviving ancestor; a pruned interface is replaced by its own
//! surviving superinterfaces so interface-satisfaction is preserved.
//!
//! The pruner also produces the removed-reference set that drives the
//! `pruned_copy` of every auxiliary map, the usage output, and the
//! `-checkdiscard` verification.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::graph::{
    AppInfo, DexApplication, DexClass, DexClassRc, DexField, DexMethod, DexType, GraphLens,
    PinnedItems,
};
use crate::options::InternalOptions;
use crate::shaking::enqueuer::LivenessView;
use crate::shaking::root_set::RootSet;
use crate::{Error, Result};

/// References removed by one pruning pass.
#[derive(Debug, Default)]
pub struct RemovedItems {
    /// Removed classes.
    pub classes: FxHashSet<DexType>,
    /// Removed fields.
    pub fields: FxHashSet<DexField>,
    /// Removed methods.
    pub methods: FxHashSet<DexMethod>,
}

impl RemovedItems {
    /// Whether nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }

    /// One line per removed element, sorted, for the usage output.
    #[must_use]
    pub fn usage_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for class in &self.classes {
            lines.push(class.java_name());
        }
        for field in &self.fields {
            if !self.classes.contains(field.holder()) {
                lines.push(format!(
                    "{}: {}",
                    field.holder().java_name(),
                    field.java_signature()
                ));
            }
        }
        for method in &self.methods {
            if !self.classes.contains(method.holder()) {
                lines.push(format!(
                    "{}: {}",
                    method.holder().java_name(),
                    method.java_signature()
                ));
            }
        }
        lines.sort();
        lines
    }
}

/// Result of one pruning pass.
pub struct PrunerResult {
    /// The pruned application.
    pub app: Arc<DexApplication>,
    /// Everything that was dropped.
    pub removed: RemovedItems,
    /// The stage lens; pruning removes definitions but rewrites no names,
    /// so the lens carries no deltas.
    pub lens: GraphLens,
}

/// Drops all non-live definitions from the program.
pub struct TreePruner<'a> {
    app_info: &'a AppInfo,
    liveness: &'a LivenessView,
    options: &'a InternalOptions,
}

impl<'a> TreePruner<'a> {
    /// Creates a pruner over one round's results.
    pub fn new(
        app_info: &'a AppInfo,
        liveness: &'a LivenessView,
        options: &'a InternalOptions,
    ) -> Self {
        TreePruner {
            app_info,
            liveness,
            options,
        }
    }

    /// Runs the pass.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] on cooperative cancellation.
    pub fn run(&self, previous_lens: &GraphLens, pinned: &PinnedItems) -> Result<PrunerResult> {
        let app = self.app_info.app();
        if !self.options.tree_shaking {
            return Ok(PrunerResult {
                app: app.clone(),
                removed: RemovedItems::default(),
                lens: previous_lens.clone(),
            });
        }

        let mut removed = RemovedItems::default();
        let mut surviving: Vec<DexClassRc> = Vec::new();
        for class in app.program_classes() {
            self.options.cancellation.check()?;
            if !self.liveness.live_types.contains(&class.ty) {
                removed.classes.insert(class.ty.clone());
                for field in class.fields() {
                    removed.fields.insert(field.field.clone());
                }
                for method in class.methods() {
                    removed.methods.insert(method.method.clone());
                }
                continue;
            }
            surviving.push(self.pruned_class(&class, &mut removed));
        }

        let pruned_app = Arc::new(app.rebuilt_with_program(surviving));
        // The pruner's lens is deliberately empty: names are untouched.
        let lens = previous_lens.nest().build(pinned);
        Ok(PrunerResult {
            app: pruned_app,
            removed,
            lens,
        })
    }

    /// Copies a surviving class, keeping only live members and repairing the
    /// hierarchy links.
    fn pruned_class(&self, class: &DexClassRc, removed: &mut RemovedItems) -> DexClassRc {
        let mut pruned: DexClass = (**class).clone();

        pruned.direct_methods.retain(|method| {
            let live = self.liveness.live_methods.contains(&method.method);
            if !live {
                removed.methods.insert(method.method.clone());
            }
            live
        });
        pruned.virtual_methods.retain(|method| {
            let live = self.liveness.live_methods.contains(&method.method);
            if !live {
                removed.methods.insert(method.method.clone());
            }
            live
        });
        pruned.static_fields.retain(|field| {
            let live = self.liveness.live_fields.contains(&field.field);
            if !live {
                removed.fields.insert(field.field.clone());
            }
            live
        });
        pruned.instance_fields.retain(|field| {
            let live = self.liveness.live_fields.contains(&field.field);
            if !live {
                removed.fields.insert(field.field.clone());
            }
            live
        });

        pruned.superclass = pruned
            .superclass
            .as_ref()
            .map(|superclass| self.nearest_surviving_ancestor(superclass));
        pruned.interfaces = self.surviving_interfaces(&pruned.interfaces);

        Arc::new(pruned)
    }

    /// Walks up the super chain to the nearest class that survives pruning
    /// (or is not a program class at all).
    fn nearest_surviving_ancestor(&self, ty: &DexType) -> DexType {
        let mut current = ty.clone();
        loop {
            let Some(class) = self.app_info.definition_for(&current) else {
                return current;
            };
            if !class.is_program() || self.liveness.live_types.contains(&current) {
                return current;
            }
            match &class.superclass {
                Some(superclass) => current = superclass.clone(),
                None => return current,
            }
        }
    }

    /// Replaces pruned interfaces by their surviving superinterfaces.
    fn surviving_interfaces(&self, interfaces: &[DexType]) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut worklist: Vec<DexType> = interfaces.to_vec();
        let mut seen = FxHashSet::default();
        while !worklist.is_empty() {
            let current = worklist.remove(0);
            if !seen.insert(current.clone()) {
                continue;
            }
            let survives = match self.app_info.definition_for(&current) {
                Some(class) => !class.is_program() || self.liveness.live_types.contains(&current),
                None => true,
            };
            if survives {
                if !result.contains(&current) {
                    result.push(current);
                }
            } else if let Some(class) = self.app_info.definition_for(&current) {
                // splice the dead interface's own interfaces in its place
                worklist.extend(class.interfaces.iter().cloned());
            }
        }
        result
    }
}

/// Verifies that every `-checkdiscard` reference was removed.
///
/// # Errors
///
/// [`Error::CheckDiscardFailed`] listing every surviving item, when the
/// discarded checker is enabled and at least one item survived.
pub fn verify_check_discard(
    root_set: &RootSet,
    removed: &RemovedItems,
    options: &InternalOptions,
) -> Result<()> {
    if !options.discarded_checker {
        return Ok(());
    }
    let mut survivors = Vec::new();
    for ty in &root_set.check_discard.types {
        if !removed.classes.contains(ty) {
            survivors.push(ty.java_name());
        }
    }
    for field in &root_set.check_discard.fields {
        if !removed.fields.contains(field) && !removed.classes.contains(field.holder()) {
            survivors.push(format!(
                "{}: {}",
                field.holder().java_name(),
                field.java_signature()
            ));
        }
    }
    for method in &root_set.check_discard.methods {
        if !removed.methods.contains(method) && !removed.classes.contains(method.holder()) {
            survivors.push(format!(
                "{}: {}",
                method.holder().java_name(),
                method.java_signature()
            ));
        }
    }
    if survivors.is_empty() {
        return Ok(());
    }
    survivors.sort();
    Err(Error::CheckDiscardFailed {
        count: survivors.len(),
        items: survivors.join("\n"),
    })
}
