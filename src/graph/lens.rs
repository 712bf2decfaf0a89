//! The graph lens stack: composable reference rewriting between phases.
//!
//! A lens answers, for any original reference, its current rewritten
//! reference. Lenses compose by chaining: each nested lens holds delta maps
//! and an `Arc` link to the previous lens, and a lookup queries the previous
//! lens first, then applies its own delta on top. The identity lens returns
//! its input unchanged.
//!
//! Lenses are immutable after construction; the "current" lens at each
//! pipeline stage is a single composed value the rest of the pipeline reads.
//! Pinned references are never rewritten: every lens builder filters its
//! delta maps against the pinned set.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::code::InvokeKind;
use crate::graph::factory::DexItemFactory;
use crate::graph::references::{DexField, DexMethod, DexType};

/// References whose name and signature must be preserved verbatim.
///
/// Populated by the root set builder from keep rules; pinning is monotone
/// across all phases.
#[derive(Debug, Clone, Default)]
pub struct PinnedItems {
    /// Pinned types.
    pub types: FxHashSet<DexType>,
    /// Pinned fields.
    pub fields: FxHashSet<DexField>,
    /// Pinned methods.
    pub methods: FxHashSet<DexMethod>,
}

impl PinnedItems {
    /// Whether the type is pinned.
    #[must_use]
    pub fn contains_type(&self, ty: &DexType) -> bool {
        self.types.contains(ty)
    }

    /// Whether the field is pinned.
    #[must_use]
    pub fn contains_field(&self, field: &DexField) -> bool {
        self.fields.contains(field)
    }

    /// Whether the method is pinned.
    #[must_use]
    pub fn contains_method(&self, method: &DexMethod) -> bool {
        self.methods.contains(method)
    }
}

/// How a method's prototype changed across a lens.
///
/// Invocation-site rewriters use this to adjust arguments; any removed
/// argument must be provably unused by the callee after per-method
/// optimization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrototypeChanges {
    /// Indices of removed parameters, ascending, relative to the original
    /// prototype.
    pub removed_arguments: Vec<u16>,
    /// Types appended after the surviving parameters.
    pub appended_arguments: Vec<DexType>,
    /// The new return type, when it changed.
    pub new_return_type: Option<DexType>,
}

impl PrototypeChanges {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removed_arguments.is_empty()
            && self.appended_arguments.is_empty()
            && self.new_return_type.is_none()
    }

    /// Composes `self` (applied first) with `later`.
    #[must_use]
    pub fn then(&self, later: &PrototypeChanges) -> PrototypeChanges {
        if self.is_empty() {
            return later.clone();
        }
        if later.is_empty() {
            return self.clone();
        }
        // Map the later removal indices back through the earlier removals.
        let mut removed = self.removed_arguments.clone();
        for &later_index in &later.removed_arguments {
            let mut original_index = later_index;
            for &earlier in &self.removed_arguments {
                if earlier <= original_index {
                    original_index += 1;
                }
            }
            removed.push(original_index);
        }
        removed.sort_unstable();
        removed.dedup();
        let mut appended = self.appended_arguments.clone();
        appended.extend(later.appended_arguments.iter().cloned());
        PrototypeChanges {
            removed_arguments: removed,
            appended_arguments: appended,
            new_return_type: later
                .new_return_type
                .clone()
                .or_else(|| self.new_return_type.clone()),
        }
    }
}

/// Result of a method lookup through a lens.
#[derive(Debug, Clone)]
pub struct MethodLookupResult {
    /// The rewritten method reference.
    pub method: DexMethod,
    /// The (possibly changed) invoke kind.
    pub invoke_kind: InvokeKind,
    /// Accumulated prototype changes for the reference.
    pub prototype_changes: PrototypeChanges,
}

/// A composable reference rewriter.
#[derive(Clone, Default)]
pub enum GraphLens {
    /// Rewrites nothing.
    #[default]
    Identity,
    /// A delta applied on top of a previous lens.
    Nested(Arc<NestedLens>),
}

/// One link in the lens chain.
pub struct NestedLens {
    previous: GraphLens,
    type_map: FxHashMap<DexType, DexType>,
    field_map: FxHashMap<DexField, DexField>,
    method_map: FxHashMap<DexMethod, DexMethod>,
    prototype_changes: FxHashMap<DexMethod, PrototypeChanges>,
    invoke_kind_overrides: FxHashMap<DexMethod, InvokeKind>,
    context_free: bool,
}

impl GraphLens {
    /// Starts a builder for a nested lens on top of `self`.
    #[must_use]
    pub fn nest(&self) -> NestedLensBuilder {
        NestedLensBuilder {
            lens: NestedLens {
                previous: self.clone(),
                type_map: FxHashMap::default(),
                field_map: FxHashMap::default(),
                method_map: FxHashMap::default(),
                prototype_changes: FxHashMap::default(),
                invoke_kind_overrides: FxHashMap::default(),
                context_free: true,
            },
        }
    }

    /// Whether this is the identity lens.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self, GraphLens::Identity)
    }

    /// The current reference for an original type.
    #[must_use]
    pub fn lookup_type(&self, ty: &DexType) -> DexType {
        match self {
            GraphLens::Identity => ty.clone(),
            GraphLens::Nested(lens) => {
                let current = lens.previous.lookup_type(ty);
                lens.type_map.get(&current).cloned().unwrap_or(current)
            }
        }
    }

    /// The current reference for an original field.
    #[must_use]
    pub fn lookup_field(&self, field: &DexField) -> DexField {
        match self {
            GraphLens::Identity => field.clone(),
            GraphLens::Nested(lens) => {
                let current = lens.previous.lookup_field(field);
                lens.field_map.get(&current).cloned().unwrap_or(current)
            }
        }
    }

    /// The current reference, invoke kind and prototype changes for an
    /// original method invoked with `kind` from `context`.
    #[must_use]
    pub fn lookup_method(
        &self,
        method: &DexMethod,
        _context: Option<&DexMethod>,
        kind: InvokeKind,
    ) -> MethodLookupResult {
        match self {
            GraphLens::Identity => MethodLookupResult {
                method: method.clone(),
                invoke_kind: kind,
                prototype_changes: PrototypeChanges::default(),
            },
            GraphLens::Nested(lens) => {
                let previous = lens.previous.lookup_method(method, _context, kind);
                let current = lens
                    .method_map
                    .get(&previous.method)
                    .cloned()
                    .unwrap_or_else(|| previous.method.clone());
                let invoke_kind = lens
                    .invoke_kind_overrides
                    .get(&previous.method)
                    .copied()
                    .unwrap_or(previous.invoke_kind);
                let changes = match lens.prototype_changes.get(&previous.method) {
                    Some(delta) => previous.prototype_changes.then(delta),
                    None => previous.prototype_changes,
                };
                MethodLookupResult {
                    method: current,
                    invoke_kind,
                    prototype_changes: changes,
                }
            }
        }
    }

    /// Accumulated prototype changes for an original method.
    #[must_use]
    pub fn lookup_prototype_changes(&self, method: &DexMethod) -> PrototypeChanges {
        self.lookup_method(method, None, InvokeKind::Virtual)
            .prototype_changes
    }

    /// Whether method lookup does not depend on the caller.
    ///
    /// Required to hold before the final writer runs.
    #[must_use]
    pub fn is_context_free_for_methods(&self) -> bool {
        match self {
            GraphLens::Identity => true,
            GraphLens::Nested(lens) => {
                lens.context_free && lens.previous.is_context_free_for_methods()
            }
        }
    }

    /// Rewrites a method reference completely: the mapped reference, with
    /// holder and prototype component types themselves looked up.
    ///
    /// Used by the writer so emitted signatures are consistent with renamed
    /// holders even when only the holder changed.
    #[must_use]
    pub fn fully_rewrite_method(&self, method: &DexMethod, factory: &DexItemFactory) -> DexMethod {
        let looked_up = self.lookup_method(method, None, InvokeKind::Virtual).method;
        let holder = self.lookup_type(looked_up.holder());
        let return_type = self.lookup_type(looked_up.proto().return_type());
        let parameters = looked_up
            .proto()
            .parameters()
            .iter()
            .map(|parameter| self.lookup_type(parameter))
            .collect();
        let proto = factory.create_proto(return_type, parameters);
        factory.create_method(holder, looked_up.name().clone(), proto)
    }

    /// Rewrites a field reference completely, including component types.
    #[must_use]
    pub fn fully_rewrite_field(&self, field: &DexField, factory: &DexItemFactory) -> DexField {
        let looked_up = self.lookup_field(field);
        let holder = self.lookup_type(looked_up.holder());
        let field_type = self.lookup_type(looked_up.field_type());
        factory.create_field(holder, looked_up.name().clone(), field_type)
    }
}

/// Builds one nested lens; mappings of pinned references are discarded.
pub struct NestedLensBuilder {
    lens: NestedLens,
}

impl NestedLensBuilder {
    /// Maps an original type to its rewritten reference.
    pub fn map_type(&mut self, from: DexType, to: DexType) -> &mut Self {
        if from != to {
            self.lens.type_map.insert(from, to);
        }
        self
    }

    /// Maps an original field to its rewritten reference.
    pub fn map_field(&mut self, from: DexField, to: DexField) -> &mut Self {
        if from != to {
            self.lens.field_map.insert(from, to);
        }
        self
    }

    /// Maps an original method to its rewritten reference.
    pub fn map_method(&mut self, from: DexMethod, to: DexMethod) -> &mut Self {
        if from != to {
            self.lens.method_map.insert(from, to);
        }
        self
    }

    /// Records prototype changes for a method.
    pub fn record_prototype_changes(
        &mut self,
        method: DexMethod,
        changes: PrototypeChanges,
    ) -> &mut Self {
        if !changes.is_empty() {
            self.lens.prototype_changes.insert(method, changes);
        }
        self
    }

    /// Overrides the invoke kind for call sites of a method.
    pub fn override_invoke_kind(&mut self, method: DexMethod, kind: InvokeKind) -> &mut Self {
        self.lens.invoke_kind_overrides.insert(method, kind);
        self
    }

    /// Marks the lens as context-sensitive for method lookup.
    pub fn context_sensitive(&mut self) -> &mut Self {
        self.lens.context_free = false;
        self
    }

    /// Whether the builder holds no mappings at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lens.type_map.is_empty()
            && self.lens.field_map.is_empty()
            && self.lens.method_map.is_empty()
            && self.lens.prototype_changes.is_empty()
            && self.lens.invoke_kind_overrides.is_empty()
    }

    /// Finishes the lens, discarding any mapping of a pinned reference.
    #[must_use]
    pub fn build(mut self, pinned: &PinnedItems) -> GraphLens {
        self.lens
            .type_map
            .retain(|from, _| !pinned.contains_type(from));
        self.lens
            .field_map
            .retain(|from, _| !pinned.contains_field(from));
        self.lens
            .method_map
            .retain(|from, _| !pinned.contains_method(from));
        self.lens
            .prototype_changes
            .retain(|method, _| !pinned.contains_method(method));
        GraphLens::Nested(Arc::new(self.lens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DexItemFactory;

    #[test]
    fn composition_applies_later_lens_to_earlier_result() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/A;").unwrap();
        let b = factory.create_type("La/B;").unwrap();
        let c = factory.create_type("La/C;").unwrap();
        let pinned = PinnedItems::default();

        let mut first = GraphLens::Identity.nest();
        first.map_type(a.clone(), b.clone());
        let first = first.build(&pinned);

        let mut second = first.nest();
        second.map_type(b.clone(), c.clone());
        let second = second.build(&pinned);

        assert_eq!(second.lookup_type(&a), c);
        assert_eq!(second.lookup_type(&b), c);
    }

    #[test]
    fn lookup_is_idempotent() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/A;").unwrap();
        let b = factory.create_type("Lx/B;").unwrap();
        let pinned = PinnedItems::default();

        let mut builder = GraphLens::Identity.nest();
        builder.map_type(a.clone(), b.clone());
        let lens = builder.build(&pinned);

        let once = lens.lookup_type(&a);
        let twice = lens.lookup_type(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn pinned_references_are_never_rewritten() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/A;").unwrap();
        let b = factory.create_type("La/B;").unwrap();
        let mut pinned = PinnedItems::default();
        pinned.types.insert(a.clone());

        let mut builder = GraphLens::Identity.nest();
        builder.map_type(a.clone(), b);
        let lens = builder.build(&pinned);
        assert_eq!(lens.lookup_type(&a), a);
    }

    #[test]
    fn prototype_changes_compose() {
        let factory = DexItemFactory::new();
        let int_type = factory.create_type("I").unwrap();
        let first = PrototypeChanges {
            removed_arguments: vec![1],
            appended_arguments: vec![],
            new_return_type: None,
        };
        let second = PrototypeChanges {
            // index 1 of the narrowed prototype is index 2 of the original
            removed_arguments: vec![1],
            appended_arguments: vec![int_type],
            new_return_type: None,
        };
        let composed = first.then(&second);
        assert_eq!(composed.removed_arguments, vec![1, 2]);
        assert_eq!(composed.appended_arguments.len(), 1);
    }
}
