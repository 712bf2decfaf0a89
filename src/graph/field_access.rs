//! Whole-program information about the usage of each live field.
//!
//! Generated by the reachability fixed point: every read and write records
//! the accessed reference (which may differ from the resolved field before
//! member rebinding) together with the method context it occurred in, plus
//! flags for reflective and method-handle access and reads from annotations.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::references::{DexField, DexMethod};

bitflags::bitflags! {
    /// How a field is accessed beyond plain bytecode reads and writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldAccessFlags: u8 {
        /// The field is referenced from a live annotation.
        const READ_FROM_ANNOTATION = 1 << 0;
        /// The field is read through a method handle.
        const READ_FROM_METHOD_HANDLE = 1 << 1;
        /// The field is written through a method handle.
        const WRITTEN_FROM_METHOD_HANDLE = 1 << 2;
        /// The field is accessed reflectively.
        const REFLECTIVE_ACCESS = 1 << 3;
    }
}

/// Usage record of a single field.
#[derive(Debug, Clone, Default)]
pub struct FieldAccessInfo {
    /// Every reference used in a read context, with the methods it appears in.
    reads_with_contexts: FxHashMap<DexField, FxHashSet<DexMethod>>,
    /// Every reference used in a write context, with the methods it appears in.
    writes_with_contexts: FxHashMap<DexField, FxHashSet<DexMethod>>,
    /// Reflective / method-handle / annotation access flags.
    flags: FieldAccessFlags,
}

impl FieldAccessInfo {
    /// Records a read of `reference` from `context`.
    pub fn record_read(&mut self, reference: DexField, context: DexMethod) {
        self.reads_with_contexts
            .entry(reference)
            .or_default()
            .insert(context);
    }

    /// Records a write of `reference` from `context`.
    pub fn record_write(&mut self, reference: DexField, context: DexMethod) {
        self.writes_with_contexts
            .entry(reference)
            .or_default()
            .insert(context);
    }

    /// Sets additional access flags.
    pub fn set_flags(&mut self, flags: FieldAccessFlags) {
        self.flags |= flags;
    }

    /// The access flags.
    #[must_use]
    pub fn flags(&self) -> FieldAccessFlags {
        self.flags
    }

    /// Whether the field is read anywhere.
    #[must_use]
    pub fn is_read(&self) -> bool {
        !self.reads_with_contexts.is_empty()
            || self.flags.intersects(
                FieldAccessFlags::READ_FROM_ANNOTATION
                    | FieldAccessFlags::READ_FROM_METHOD_HANDLE
                    | FieldAccessFlags::REFLECTIVE_ACCESS,
            )
    }

    /// Whether the field is written anywhere.
    #[must_use]
    pub fn is_written(&self) -> bool {
        !self.writes_with_contexts.is_empty()
            || self
                .flags
                .intersects(FieldAccessFlags::WRITTEN_FROM_METHOD_HANDLE)
    }

    /// Number of distinct read contexts.
    #[must_use]
    pub fn read_context_count(&self) -> usize {
        self.reads_with_contexts
            .values()
            .map(FxHashSet::len)
            .sum()
    }

    /// All method contexts reading or writing the field.
    pub fn all_contexts(&self) -> impl Iterator<Item = &DexMethod> {
        self.reads_with_contexts
            .values()
            .chain(self.writes_with_contexts.values())
            .flatten()
    }

    /// Collapses all indirect references onto `field`.
    ///
    /// After member rebinding every access goes through the resolved field,
    /// so the per-reference split carries no information anymore. Access
    /// flags are unaffected and survive the flattening.
    pub fn flatten_access_contexts(&mut self, field: &DexField) {
        for map in [&mut self.reads_with_contexts, &mut self.writes_with_contexts] {
            if map.is_empty() {
                continue;
            }
            let mut flattened: FxHashSet<DexMethod> = FxHashSet::default();
            for contexts in map.values() {
                flattened.extend(contexts.iter().cloned());
            }
            map.clear();
            map.insert(field.clone(), flattened);
        }
    }

    /// Drops contexts of removed methods.
    fn prune_contexts(&mut self, removed_methods: &FxHashSet<DexMethod>) {
        for map in [&mut self.reads_with_contexts, &mut self.writes_with_contexts] {
            for contexts in map.values_mut() {
                contexts.retain(|context| !removed_methods.contains(context));
            }
            map.retain(|_, contexts| !contexts.is_empty());
        }
    }
}

/// Access info for every live field.
#[derive(Debug, Clone, Default)]
pub struct FieldAccessInfoCollection {
    infos: FxHashMap<DexField, FieldAccessInfo>,
}

impl FieldAccessInfoCollection {
    /// The (mutable) record for `field`, created on first access.
    pub fn get_or_create(&mut self, field: &DexField) -> &mut FieldAccessInfo {
        self.infos.entry(field.clone()).or_default()
    }

    /// The record for `field`, if any access was recorded.
    #[must_use]
    pub fn get(&self, field: &DexField) -> Option<&FieldAccessInfo> {
        self.infos.get(field)
    }

    /// Iterates all records.
    pub fn iter(&self) -> impl Iterator<Item = (&DexField, &FieldAccessInfo)> {
        self.infos.iter()
    }

    /// Collapses indirect references in every record (post member rebinding).
    pub fn flatten_access_contexts(&mut self) {
        for (field, info) in &mut self.infos {
            info.flatten_access_contexts(field);
        }
    }

    /// A copy with removed fields dropped and removed method contexts pruned.
    ///
    /// Invariant after the final reachability round: every method context
    /// referenced is itself live.
    #[must_use]
    pub fn pruned_copy(
        &self,
        removed_fields: &FxHashSet<DexField>,
        removed_methods: &FxHashSet<DexMethod>,
    ) -> FieldAccessInfoCollection {
        let mut infos = FxHashMap::default();
        for (field, info) in &self.infos {
            if removed_fields.contains(field) {
                continue;
            }
            let mut pruned = info.clone();
            pruned.prune_contexts(removed_methods);
            infos.insert(field.clone(), pruned);
        }
        FieldAccessInfoCollection { infos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DexItemFactory;

    #[test]
    fn flattening_merges_contexts_and_keeps_flags() {
        let factory = DexItemFactory::new();
        let holder = factory.create_type("La/A;").unwrap();
        let sub = factory.create_type("La/B;").unwrap();
        let int_type = factory.create_type("I").unwrap();
        let name = factory.create_string("x");
        let field = factory.create_field(holder.clone(), name.clone(), int_type.clone());
        let indirect = factory.create_field(sub, name, int_type);
        let context = factory.create_method(
            holder.clone(),
            factory.create_string("m"),
            factory.known.void_proto.clone(),
        );
        let other_context = factory.create_method(
            holder,
            factory.create_string("n"),
            factory.known.void_proto.clone(),
        );

        let mut info = FieldAccessInfo::default();
        info.record_read(field.clone(), context);
        info.record_read(indirect, other_context);
        info.set_flags(FieldAccessFlags::REFLECTIVE_ACCESS);

        info.flatten_access_contexts(&field);
        assert_eq!(info.read_context_count(), 2);
        assert!(info.flags().contains(FieldAccessFlags::REFLECTIVE_ACCESS));
        assert_eq!(info.reads_with_contexts.len(), 1);
    }
}
