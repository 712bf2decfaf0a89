//! Class hierarchy index, subtype closure and Java-style resolution.
//!
//! [`AppInfo`] is built once per reachability round over the
//! program+classpath+library classes and answers definition lookup, subtype
//! queries, method/field resolution and virtual dispatch computation. All
//! failure modes are enumerated as tagged variants rather than dispatched
//! through capability interfaces, so callers match once over the complete set
//! of outcomes.
//!
//! Resolution follows the platform rules explicitly: the receiver class and
//! its superclasses first, then superinterfaces filtered down to the
//! maximally-specific candidates; accessibility honors package-private rules
//! with feature splits acting as package-sealing boundaries.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::app::DexApplication;
use crate::graph::definitions::{DexClass, DexClassRc, DexEncodedMethod};
use crate::graph::references::{DexField, DexMethod, DexType};

/// Successful method resolution: the class the definition was found on and
/// the resolved method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResolution {
    /// The class the resolved definition lives on.
    pub holder: DexType,
    /// The resolved method reference (holder is `holder`).
    pub method: DexMethod,
}

/// Outcome of method resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodResolutionResult {
    /// Resolution found exactly one definition.
    Single(SingleResolution),
    /// The receiver type has no definition.
    ClassNotFound(DexType),
    /// No class or interface in the search order defines the method.
    NoSuchMethod,
    /// The resolved definition is not accessible from the querying context.
    IllegalAccess(DexMethod),
    /// Multiple maximally-specific default methods apply.
    AmbiguousDefault(DexMethod),
    /// The invoke kind does not match the resolved definition
    /// (static/instance mismatch, interface bit mismatch).
    IncompatibleClassChange,
}

impl MethodResolutionResult {
    /// The resolution when it succeeded.
    #[must_use]
    pub fn as_single(&self) -> Option<&SingleResolution> {
        match self {
            MethodResolutionResult::Single(single) => Some(single),
            _ => None,
        }
    }
}

/// Outcome of field resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldResolutionResult {
    /// The class the definition lives on and the resolved field reference.
    Single {
        /// The class the resolved definition lives on.
        holder: DexType,
        /// The resolved field reference.
        field: DexField,
    },
    /// The receiver type has no definition.
    ClassNotFound(DexType),
    /// No class or interface in the search order defines the field.
    NoSuchField,
}

/// Hierarchy index over one application snapshot.
pub struct AppInfo {
    app: Arc<DexApplication>,
    /// Direct subtype edges (superclass and interface implementation),
    /// values sorted for deterministic traversal.
    direct_subtypes: FxHashMap<DexType, Vec<DexType>>,
}

impl AppInfo {
    /// Builds the index over the given application snapshot.
    #[must_use]
    pub fn new(app: Arc<DexApplication>) -> Self {
        let mut direct_subtypes: FxHashMap<DexType, Vec<DexType>> = FxHashMap::default();
        for class in app.all_classes() {
            if let Some(superclass) = &class.superclass {
                direct_subtypes
                    .entry(superclass.clone())
                    .or_default()
                    .push(class.ty.clone());
            }
            for interface in &class.interfaces {
                direct_subtypes
                    .entry(interface.clone())
                    .or_default()
                    .push(class.ty.clone());
            }
        }
        for subtypes in direct_subtypes.values_mut() {
            subtypes.sort();
            subtypes.dedup();
        }
        AppInfo {
            app,
            direct_subtypes,
        }
    }

    /// The application snapshot this index was built over.
    #[must_use]
    pub fn app(&self) -> &Arc<DexApplication> {
        &self.app
    }

    /// Uniform definition lookup across program, classpath and library.
    #[must_use]
    pub fn definition_for(&self, ty: &DexType) -> Option<DexClassRc> {
        self.app.definition_for(ty)
    }

    /// Direct subtypes of `ty` (subclasses and direct implementors), in a
    /// stable order.
    #[must_use]
    pub fn direct_subtypes(&self, ty: &DexType) -> &[DexType] {
        self.direct_subtypes
            .get(ty)
            .map_or(&[], |subtypes| subtypes.as_slice())
    }

    /// Transitive subtypes of `ty` (interfaces included), in a stable order.
    #[must_use]
    pub fn subtypes(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut seen = FxHashSet::default();
        let mut worklist = vec![ty.clone()];
        while let Some(current) = worklist.pop() {
            if let Some(children) = self.direct_subtypes.get(&current) {
                for child in children {
                    if seen.insert(child.clone()) {
                        result.push(child.clone());
                        worklist.push(child.clone());
                    }
                }
            }
        }
        result.sort();
        result
    }

    /// Whether `sub` is `sup` or a transitive subtype of it.
    #[must_use]
    pub fn is_subtype(&self, sub: &DexType, sup: &DexType) -> bool {
        if sub == sup {
            return true;
        }
        // arrays are subtypes of Object only
        if sub.is_array() {
            return sup == &self.app.factory.known.object_type;
        }
        let mut seen = FxHashSet::default();
        let mut worklist = vec![sub.clone()];
        while let Some(current) = worklist.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(class) = self.definition_for(&current) else {
                continue;
            };
            if let Some(superclass) = &class.superclass {
                if superclass == sup {
                    return true;
                }
                worklist.push(superclass.clone());
            }
            for interface in &class.interfaces {
                if interface == sup {
                    return true;
                }
                worklist.push(interface.clone());
            }
        }
        false
    }

    /// Java-style method resolution on the receiver type.
    ///
    /// Searches the receiver class and its superclasses, then the
    /// superinterfaces obeying the maximally-specific default-method rule.
    /// Array receivers resolve against `java.lang.Object`.
    #[must_use]
    pub fn resolve_method(&self, receiver: &DexType, method: &DexMethod) -> MethodResolutionResult {
        let receiver = if receiver.is_array() {
            &self.app.factory.known.object_type
        } else {
            receiver
        };
        let Some(initial) = self.definition_for(receiver) else {
            return MethodResolutionResult::ClassNotFound(receiver.clone());
        };

        // Phase 1: the class chain.
        let mut current = Some(initial.clone());
        while let Some(class) = current {
            if let Some(found) = class.lookup_method_by_signature(method) {
                return MethodResolutionResult::Single(SingleResolution {
                    holder: class.ty.clone(),
                    method: found.method.clone(),
                });
            }
            current = class
                .superclass
                .as_ref()
                .and_then(|superclass| self.definition_for(superclass));
        }

        // Phase 2: maximally-specific superinterface methods.
        let candidates = self.interface_candidates(&initial, method);
        let maximal = self.filter_maximally_specific(candidates);
        match maximal.len() {
            0 => MethodResolutionResult::NoSuchMethod,
            1 => {
                let (holder, resolved) = &maximal[0];
                MethodResolutionResult::Single(SingleResolution {
                    holder: holder.clone(),
                    method: resolved.clone(),
                })
            }
            _ => {
                // Several abstract declarations are fine; several defaults are not.
                let defaults: Vec<&(DexType, DexMethod)> = maximal
                    .iter()
                    .filter(|(holder, resolved)| {
                        self.definition_for(holder)
                            .and_then(|class| {
                                class
                                    .lookup_method_by_signature(resolved)
                                    .map(|definition| !definition.flags.is_abstract())
                            })
                            .unwrap_or(false)
                    })
                    .collect();
                match defaults.len() {
                    0 | 1 => {
                        let (holder, resolved) =
                            defaults.first().copied().unwrap_or(&maximal[0]);
                        MethodResolutionResult::Single(SingleResolution {
                            holder: holder.clone(),
                            method: resolved.clone(),
                        })
                    }
                    _ => MethodResolutionResult::AmbiguousDefault(method.clone()),
                }
            }
        }
    }

    /// All superinterface declarations of `method`, with duplicates removed.
    fn interface_candidates(
        &self,
        class: &DexClassRc,
        method: &DexMethod,
    ) -> Vec<(DexType, DexMethod)> {
        let mut candidates = Vec::new();
        let mut seen = FxHashSet::default();
        let mut worklist: Vec<DexType> = Vec::new();

        // seed with the interfaces of the whole superclass chain, in order
        let mut current = Some(class.clone());
        while let Some(class) = current {
            worklist.extend(class.interfaces.iter().cloned());
            current = class
                .superclass
                .as_ref()
                .and_then(|superclass| self.definition_for(superclass));
        }

        let mut index = 0;
        while index < worklist.len() {
            let interface_type = worklist[index].clone();
            index += 1;
            if !seen.insert(interface_type.clone()) {
                continue;
            }
            let Some(interface) = self.definition_for(&interface_type) else {
                continue;
            };
            if let Some(found) = interface.lookup_method_by_signature(method) {
                candidates.push((interface_type, found.method.clone()));
            }
            worklist.extend(interface.interfaces.iter().cloned());
        }
        candidates
    }

    /// Filters candidates down to those whose holder has no other candidate
    /// below it ("maximally specific").
    fn filter_maximally_specific(
        &self,
        candidates: Vec<(DexType, DexMethod)>,
    ) -> Vec<(DexType, DexMethod)> {
        let holders: Vec<DexType> = candidates.iter().map(|(holder, _)| holder.clone()).collect();
        candidates
            .into_iter()
            .filter(|(holder, _)| {
                !holders.iter().any(|other| {
                    other != holder && self.is_subtype(other, holder)
                })
            })
            .collect()
    }

    /// Field resolution: the class itself, then its interfaces recursively,
    /// then the superclass.
    #[must_use]
    pub fn resolve_field(&self, receiver: &DexType, field: &DexField) -> FieldResolutionResult {
        let Some(class) = self.definition_for(receiver) else {
            return FieldResolutionResult::ClassNotFound(receiver.clone());
        };
        if let Some(found) = class.lookup_field_by_signature(field) {
            return FieldResolutionResult::Single {
                holder: class.ty.clone(),
                field: found.field.clone(),
            };
        }
        for interface in &class.interfaces {
            match self.resolve_field(interface, field) {
                FieldResolutionResult::Single { holder, field } => {
                    return FieldResolutionResult::Single { holder, field };
                }
                FieldResolutionResult::ClassNotFound(_) | FieldResolutionResult::NoSuchField => {}
            }
        }
        if let Some(superclass) = &class.superclass {
            match self.resolve_field(superclass, field) {
                FieldResolutionResult::Single { holder, field } => {
                    return FieldResolutionResult::Single { holder, field };
                }
                FieldResolutionResult::ClassNotFound(_) | FieldResolutionResult::NoSuchField => {}
            }
        }
        FieldResolutionResult::NoSuchField
    }

    /// The concrete definition a virtual/interface call executes on a
    /// receiver of exact type `receiver`.
    ///
    /// Walks the receiver's class chain for an overriding virtual method,
    /// falling back to the maximally-specific default method.
    #[must_use]
    pub fn lookup_dispatch_target(
        &self,
        receiver: &DexType,
        resolved: &DexMethod,
    ) -> Option<SingleResolution> {
        let mut current = self.definition_for(receiver);
        while let Some(class) = current {
            if let Some(found) = class.lookup_virtual_method_by_signature(resolved) {
                if !found.flags.is_abstract() {
                    return Some(SingleResolution {
                        holder: class.ty.clone(),
                        method: found.method.clone(),
                    });
                }
            }
            current = class
                .superclass
                .as_ref()
                .and_then(|superclass| self.definition_for(superclass));
        }
        // No class chain override: a default method may implement it.
        let class = self.definition_for(receiver)?;
        let candidates = self.interface_candidates(&class, resolved);
        let maximal = self.filter_maximally_specific(candidates);
        maximal
            .into_iter()
            .find(|(holder, method)| {
                self.definition_for(holder)
                    .and_then(|interface| {
                        interface
                            .lookup_method_by_signature(method)
                            .map(|definition| !definition.flags.is_abstract())
                    })
                    .unwrap_or(false)
            })
            .map(|(holder, method)| SingleResolution { holder, method })
    }

    /// The set of program-method definitions a virtual call with the given
    /// resolution may actually reach, given the instantiated receiver types
    /// currently known.
    #[must_use]
    pub fn lookup_virtual_dispatch_targets(
        &self,
        resolution: &SingleResolution,
        instantiated: &FxHashSet<DexType>,
    ) -> FxHashSet<DexMethod> {
        let mut targets = FxHashSet::default();
        for receiver in instantiated {
            if !self.is_subtype(receiver, &resolution.holder) {
                continue;
            }
            if let Some(target) = self.lookup_dispatch_target(receiver, &resolution.method) {
                if self
                    .app
                    .program_definition_for(&target.holder)
                    .is_some()
                {
                    targets.insert(target.method);
                }
            }
        }
        targets
    }

    /// The definition an `invoke-super` from `context_holder` executes.
    #[must_use]
    pub fn lookup_super_target(
        &self,
        method: &DexMethod,
        context_holder: &DexType,
    ) -> Option<SingleResolution> {
        let class = self.definition_for(context_holder)?;
        let superclass = class.superclass.as_ref()?;
        self.resolve_method(superclass, method)
            .as_single()
            .cloned()
    }

    /// Whether a member with `flags` declared on `holder` is accessible from
    /// code in `context`.
    ///
    /// Package-private access additionally requires both classes to ship in
    /// the same feature split (feature boundaries seal packages).
    #[must_use]
    pub fn is_accessible(
        &self,
        flags: crate::graph::flags::AccessFlags,
        holder: &DexClass,
        context: &DexClass,
    ) -> bool {
        if flags.is_public() {
            return true;
        }
        if flags.is_private() {
            return holder.ty == context.ty;
        }
        let same_package = holder.package_name() == context.package_name();
        if flags.is_protected() {
            return (same_package && holder.feature == context.feature)
                || self.is_subtype(&context.ty, &holder.ty);
        }
        // package-private
        same_package && holder.feature == context.feature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definitions::{ClassKind, DexClassBuilder, DexEncodedMethod};
    use crate::graph::flags::AccessFlags;
    use crate::graph::DexItemFactory;

    fn method(
        factory: &DexItemFactory,
        holder: &DexType,
        name: &str,
        flags: AccessFlags,
    ) -> DexEncodedMethod {
        let reference = factory.create_method(
            holder.clone(),
            factory.create_string(name),
            factory.known.void_proto.clone(),
        );
        DexEncodedMethod::new(reference, flags, None)
    }

    fn build_diamond() -> (Arc<DexItemFactory>, AppInfo) {
        // interface I { void f(); }  interface J extends I { default void f() {} }
        // class C implements J {}
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let i = factory.create_type("Lp/I;").unwrap();
        let j = factory.create_type("Lp/J;").unwrap();
        let c = factory.create_type("Lp/C;").unwrap();

        let mut builder = DexApplication::builder(factory.clone());
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, i.clone())
                    .superclass(object.clone())
                    .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                    .virtual_method(method(
                        &factory,
                        &i,
                        "f",
                        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, j.clone())
                    .superclass(object.clone())
                    .interface(i.clone())
                    .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                    .virtual_method(method(&factory, &j, "f", AccessFlags::PUBLIC))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, c.clone())
                    .superclass(object)
                    .interface(j)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let app = Arc::new(builder.build());
        (factory.clone(), AppInfo::new(app))
    }

    #[test]
    fn subtype_closure_includes_interfaces() {
        let (factory, app_info) = build_diamond();
        let i = factory.create_type("Lp/I;").unwrap();
        let subtypes = app_info.subtypes(&i);
        let names: Vec<String> = subtypes.iter().map(|t| t.java_name()).collect();
        assert_eq!(names, ["p.C", "p.J"]);
    }

    #[test]
    fn default_method_resolution_picks_maximally_specific() {
        let (factory, app_info) = build_diamond();
        let c = factory.create_type("Lp/C;").unwrap();
        let i = factory.create_type("Lp/I;").unwrap();
        let f_on_i = factory.create_method(
            i,
            factory.create_string("f"),
            factory.known.void_proto.clone(),
        );
        // Resolving I.f on C finds J's default, the more specific declaration.
        let result = app_info.resolve_method(&c, &f_on_i);
        let single = result.as_single().expect("resolution should succeed");
        assert_eq!(single.holder.java_name(), "p.J");
    }

    #[test]
    fn dispatch_on_concrete_receiver_finds_default() {
        let (factory, app_info) = build_diamond();
        let c = factory.create_type("Lp/C;").unwrap();
        let j = factory.create_type("Lp/J;").unwrap();
        let f_on_j = factory.create_method(
            j,
            factory.create_string("f"),
            factory.known.void_proto.clone(),
        );
        let target = app_info.lookup_dispatch_target(&c, &f_on_j).unwrap();
        assert_eq!(target.holder.java_name(), "p.J");
    }

    #[test]
    fn missing_receiver_is_class_not_found() {
        let (factory, app_info) = build_diamond();
        let ghost = factory.create_type("Lp/Ghost;").unwrap();
        let method = factory.create_method(
            ghost.clone(),
            factory.create_string("f"),
            factory.known.void_proto.clone(),
        );
        assert!(matches!(
            app_info.resolve_method(&ghost, &method),
            MethodResolutionResult::ClassNotFound(_)
        ));
    }
}
