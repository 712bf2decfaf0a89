//! The minifier: computing a renaming lens.
//!
//! Classes, fields and methods that are not pinned are renamed to short
//! identifiers drawn from an ordered alphabet (`a`, `b`, …, `aa`, `ab`, …),
//! skipping reserved names. Within a class, fields and methods live in
//! disjoint namespaces; a method name must be identical along every override
//! chain and consistent across every interface-implementation pair, so
//! methods are renamed per equivalence class: the connected components of
//! the relation "overrides or co-implements", computed by union-find over
//! the hierarchy.
//!
//! `-applymapping` seeds both class and member names; a conflict (two
//! originals assigned the same new name in one namespace, or a renamed
//! pinned item) aborts with a rule-conflict error.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::diagnostics::Origin;
use crate::graph::{AppInfo, DexClassRc, DexMethod, DexProto, DexType, GraphLens};
use crate::naming::mapping::{ClassMapping, FieldMapping, MethodMapping, ProguardMapping};
use crate::options::InternalOptions;
use crate::shaking::root_set::RootSet;
use crate::shaking::rules::RepackagePolicy;
use crate::{Error, Result};

/// The minifier's output: the renaming lens and the mapping artifact.
pub struct MinifierResult {
    /// The renaming lens, composed onto the previous lens.
    pub lens: GraphLens,
    /// The proguard-style mapping.
    pub mapping: ProguardMapping,
}

/// Splits a dotted name into (package, simple name).
fn split_java_name(java_name: &str) -> (String, String) {
    match java_name.rfind('.') {
        Some(index) => (
            java_name[..index].to_string(),
            java_name[index + 1..].to_string(),
        ),
        None => (String::new(), java_name.to_string()),
    }
}

/// Generates `a`, `b`, …, `z`, `aa`, `ab`, … for increasing indices.
fn identifier(mut index: usize) -> String {
    let mut name = String::new();
    loop {
        name.insert(0, (b'a' + u8::try_from(index % 26).unwrap_or(0)) as char);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    name
}

/// Union-find over method references.
#[derive(Default)]
struct MethodEquivalence {
    parent: FxHashMap<DexMethod, DexMethod>,
}

impl MethodEquivalence {
    fn find(&mut self, method: &DexMethod) -> DexMethod {
        let parent = match self.parent.get(method) {
            Some(parent) if parent != method => parent.clone(),
            _ => return method.clone(),
        };
        let root = self.find(&parent);
        self.parent.insert(method.clone(), root.clone());
        root
    }

    fn union(&mut self, a: &DexMethod, b: &DexMethod) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // deterministic representative: the smaller reference
            if root_a < root_b {
                self.parent.insert(root_b, root_a);
            } else {
                self.parent.insert(root_a, root_b);
            }
        }
    }
}

/// Computes the renaming for one application snapshot.
pub struct Minifier<'a> {
    app_info: &'a AppInfo,
    root_set: &'a RootSet,
    options: &'a InternalOptions,
    applied: Option<&'a ProguardMapping>,
}

impl<'a> Minifier<'a> {
    /// Creates a minifier.
    pub fn new(
        app_info: &'a AppInfo,
        root_set: &'a RootSet,
        options: &'a InternalOptions,
        applied: Option<&'a ProguardMapping>,
    ) -> Self {
        Minifier {
            app_info,
            root_set,
            options,
            applied,
        }
    }

    /// Runs the renaming computation.
    ///
    /// # Errors
    ///
    /// [`Error::RuleConflict`] for applied-mapping conflicts;
    /// [`Error::Cancelled`] on cooperative cancellation.
    pub fn run(&self, previous_lens: &GraphLens) -> Result<MinifierResult> {
        if !self.options.minification {
            // Only an externally supplied mapping is applied.
            if let Some(applied) = self.applied {
                let lens = applied.to_lens(
                    &self.app_info.app().factory,
                    previous_lens,
                    &self.root_set.pinned,
                )?;
                let mapping = applied.clone();
                return Ok(MinifierResult { lens, mapping });
            }
            return Ok(MinifierResult {
                lens: previous_lens.clone(),
                mapping: ProguardMapping::default(),
            });
        }

        let classes = self.app_info.app().program_classes();
        let type_renaming = self.compute_class_renaming(&classes)?;
        let method_renaming = self.compute_method_renaming(&classes)?;
        let field_renaming = self.compute_field_renaming(&classes)?;

        self.build_result(
            previous_lens,
            &classes,
            &type_renaming,
            &method_renaming,
            &field_renaming,
        )
    }

    /// Applied class renames, keyed by original dotted name.
    fn applied_class_names(&self) -> FxHashMap<String, String> {
        self.applied
            .map(|mapping| {
                mapping
                    .classes
                    .iter()
                    .map(|class| (class.original.clone(), class.renamed.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Computes the new dotted name of every program class.
    fn compute_class_renaming(&self, classes: &[DexClassRc]) -> Result<FxHashMap<DexType, String>> {
        let applied = self.applied_class_names();
        let mut renaming: FxHashMap<DexType, String> = FxHashMap::default();
        // per target package: names already taken
        let mut used_in_package: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();
        let mut taken_targets: FxHashMap<String, String> = FxHashMap::default();

        let mut reserve = |package: &str, simple: &str| {
            used_in_package
                .entry(package.to_string())
                .or_default()
                .insert(simple.to_string());
        };

        // Reserve pinned names and applied targets first.
        for class in classes {
            let java_name = class.ty.java_name();
            if let Some(target) = applied.get(&java_name) {
                let (package, simple) = split_java_name(target);
                reserve(&package, &simple);
                if let Some(previous) = taken_targets.insert(target.clone(), java_name.clone()) {
                    if previous != java_name {
                        return Err(Error::RuleConflict(format!(
                            "classes `{previous}` and `{java_name}` both map to `{target}`"
                        )));
                    }
                }
            } else if self.root_set.pinned.contains_type(&class.ty) {
                let (package, simple) = split_java_name(&java_name);
                reserve(&package, &simple);
            }
        }

        // Flattened-package targets are generated per original package.
        let mut package_renaming: FxHashMap<String, String> = FxHashMap::default();
        if let RepackagePolicy::Flatten(target) = &self.options.repackage {
            let mut packages: Vec<String> = classes
                .iter()
                .filter(|class| !self.root_set.pinned.contains_type(&class.ty))
                .map(|class| class.ty.package_name())
                .collect();
            packages.sort();
            packages.dedup();
            for (index, package) in packages.iter().enumerate() {
                let generated = identifier(index);
                let renamed = if target.is_empty() {
                    generated
                } else {
                    format!("{target}.{generated}")
                };
                package_renaming.insert(package.clone(), renamed);
            }
        }

        for class in classes {
            self.options.cancellation.check()?;
            let java_name = class.ty.java_name();
            if let Some(target) = applied.get(&java_name) {
                if self.root_set.pinned.contains_type(&class.ty) && target != &java_name {
                    return Err(Error::RuleConflict(format!(
                        "cannot rename kept class `{java_name}`"
                    )));
                }
                renaming.insert(class.ty.clone(), target.clone());
                continue;
            }
            if self.root_set.pinned.contains_type(&class.ty) {
                continue;
            }
            let target_package = match &self.options.repackage {
                RepackagePolicy::None => class.ty.package_name(),
                RepackagePolicy::All(package) => package.clone(),
                RepackagePolicy::Flatten(_) => package_renaming
                    .get(&class.ty.package_name())
                    .cloned()
                    .unwrap_or_else(|| class.ty.package_name()),
            };
            let used = used_in_package.entry(target_package.clone()).or_default();
            let mut index = 0;
            let simple = loop {
                let candidate = identifier(index);
                if used.insert(candidate.clone()) {
                    break candidate;
                }
                index += 1;
            };
            let renamed = if target_package.is_empty() {
                simple
            } else {
                format!("{target_package}.{simple}")
            };
            renaming.insert(class.ty.clone(), renamed);
        }
        Ok(renaming)
    }

    /// Computes the new name of every program virtual and direct method.
    fn compute_method_renaming(
        &self,
        classes: &[DexClassRc],
    ) -> Result<FxHashMap<DexMethod, String>> {
        let mut equivalence = MethodEquivalence::default();
        // Union along override and interface-implementation edges.
        for class in classes {
            for method in &class.virtual_methods {
                for supertype in self.all_supertypes(&class.ty) {
                    let Some(super_class) = self.app_info.definition_for(&supertype) else {
                        continue;
                    };
                    if let Some(inherited) =
                        super_class.lookup_virtual_method_by_signature(&method.method)
                    {
                        equivalence.union(&method.method, &inherited.method);
                    }
                }
            }
        }

        // Group program virtual methods by their equivalence representative.
        let mut groups: FxHashMap<DexMethod, Vec<DexMethod>> = FxHashMap::default();
        for class in classes {
            for method in &class.virtual_methods {
                let root = equivalence.find(&method.method);
                groups.entry(root).or_default().push(method.method.clone());
            }
        }

        let applied_methods = self.applied_method_names();
        let mut renaming: FxHashMap<DexMethod, String> = FxHashMap::default();
        // (class, new name, proto) assignments, to keep dispatch unambiguous
        let mut assigned: FxHashMap<DexType, FxHashSet<(String, DexProto)>> = FxHashMap::default();

        let mut roots: Vec<DexMethod> = groups.keys().cloned().collect();
        roots.sort();
        for root in roots {
            self.options.cancellation.check()?;
            let members = &groups[&root];
            if self.group_is_name_locked(members) {
                continue;
            }
            let applied_name = members
                .iter()
                .find_map(|member| applied_methods.get(member).cloned());
            let holders: Vec<DexType> = members
                .iter()
                .map(|member| member.holder().clone())
                .collect();
            let proto = root.proto().clone();
            let name = match applied_name {
                Some(name) => {
                    if !self.name_is_free(&holders, &name, &proto, &assigned) {
                        return Err(Error::RuleConflict(format!(
                            "applied name `{name}` collides for {root}"
                        )));
                    }
                    name
                }
                None => {
                    let mut index = 0;
                    loop {
                        let candidate = identifier(index);
                        if self.name_is_free(&holders, &candidate, &proto, &assigned) {
                            break candidate;
                        }
                        index += 1;
                    }
                }
            };
            for holder in &holders {
                for related in self.hierarchy_of(holder) {
                    assigned
                        .entry(related)
                        .or_default()
                        .insert((name.clone(), proto.clone()));
                }
            }
            for member in members {
                renaming.insert(member.clone(), name.clone());
            }
        }

        // Direct methods rename per class; initializers never rename.
        for class in classes {
            let used = assigned.entry(class.ty.clone()).or_default();
            for method in &class.direct_methods {
                if method.is_instance_initializer() || method.is_class_initializer() {
                    continue;
                }
                if self.method_is_name_locked(&method.method) {
                    continue;
                }
                if let Some(name) = applied_methods.get(&method.method) {
                    used.insert((name.clone(), method.method.proto().clone()));
                    renaming.insert(method.method.clone(), name.clone());
                    continue;
                }
                let mut index = 0;
                let name = loop {
                    let candidate = identifier(index);
                    let key = (candidate.clone(), method.method.proto().clone());
                    if !used.contains(&key)
                        && !self.reserved_in_hierarchy(&class.ty, &candidate)
                    {
                        used.insert(key);
                        break candidate;
                    }
                    index += 1;
                };
                renaming.insert(method.method.clone(), name);
            }
        }
        Ok(renaming)
    }

    /// Whether a whole equivalence class must keep its original name.
    fn group_is_name_locked(&self, members: &[DexMethod]) -> bool {
        // a pinned member, or an override chain reaching outside the program
        if members.iter().any(|member| self.method_is_name_locked(member)) {
            return true;
        }
        // any equivalent definition on a non-program class locks the name
        members.iter().any(|member| {
            self.all_supertypes(member.holder()).iter().any(|supertype| {
                self.app_info
                    .definition_for(supertype)
                    .filter(|class| !class.is_program())
                    .and_then(|class| {
                        class
                            .lookup_virtual_method_by_signature(member)
                            .map(|_| ())
                    })
                    .is_some()
            })
        })
    }

    fn method_is_name_locked(&self, method: &DexMethod) -> bool {
        self.root_set.pinned.contains_method(method)
            || self.root_set.no_obfuscation.methods.contains(method)
    }

    /// Whether `name(proto)` is unassigned and unreserved in every holder's
    /// hierarchy.
    fn name_is_free(
        &self,
        holders: &[DexType],
        name: &str,
        proto: &DexProto,
        assigned: &FxHashMap<DexType, FxHashSet<(String, DexProto)>>,
    ) -> bool {
        holders.iter().all(|holder| {
            if self.reserved_in_hierarchy(holder, name) {
                return false;
            }
            self.hierarchy_of(holder).into_iter().all(|related| {
                assigned
                    .get(&related)
                    .map_or(true, |names| !names.contains(&(name.to_string(), proto.clone())))
            })
        })
    }

    /// Names that must not be taken in the hierarchy of `ty`: methods of
    /// non-program ancestors and pinned methods anywhere in the chain.
    fn reserved_in_hierarchy(&self, ty: &DexType, name: &str) -> bool {
        for supertype in self.all_supertypes_and_self(ty) {
            let Some(class) = self.app_info.definition_for(&supertype) else {
                continue;
            };
            for method in class.methods() {
                if method.method.name().as_str() != name {
                    continue;
                }
                if !class.is_program() || self.method_is_name_locked(&method.method) {
                    return true;
                }
            }
        }
        false
    }

    /// All proper supertypes, classes and interfaces, transitive.
    fn all_supertypes(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = Vec::new();
        let mut worklist = vec![ty.clone()];
        let mut seen = FxHashSet::default();
        while let Some(current) = worklist.pop() {
            let Some(class) = self.app_info.definition_for(&current) else {
                continue;
            };
            for supertype in class.superclass.iter().chain(&class.interfaces) {
                if seen.insert(supertype.clone()) {
                    result.push(supertype.clone());
                    worklist.push(supertype.clone());
                }
            }
        }
        result
    }

    fn all_supertypes_and_self(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = vec![ty.clone()];
        result.extend(self.all_supertypes(ty));
        result
    }

    /// The type, its supertypes and its subtypes: the scope in which a new
    /// method name must stay unambiguous.
    fn hierarchy_of(&self, ty: &DexType) -> Vec<DexType> {
        let mut result = self.all_supertypes_and_self(ty);
        result.extend(self.app_info.subtypes(ty));
        result
    }

    /// Applied member renames keyed by interned original reference.
    fn applied_method_names(&self) -> FxHashMap<DexMethod, String> {
        let factory = &self.app_info.app().factory;
        let mut result = FxHashMap::default();
        let Some(applied) = self.applied else {
            return result;
        };
        for class in &applied.classes {
            let Ok(holder) = factory.create_type_from_java_name(&class.original) else {
                continue;
            };
            for method in &class.methods {
                let Ok(return_type) = factory.create_type_from_java_name(&method.return_type)
                else {
                    continue;
                };
                let Ok(parameters) = method
                    .parameters
                    .iter()
                    .map(|parameter| factory.create_type_from_java_name(parameter))
                    .collect::<Result<Vec<_>>>()
                else {
                    continue;
                };
                let reference = factory.create_method(
                    holder.clone(),
                    factory.create_string(&method.original),
                    factory.create_proto(return_type, parameters),
                );
                result.insert(reference, method.renamed.clone());
            }
        }
        result
    }

    /// Computes the new name of every program field.
    fn compute_field_renaming(
        &self,
        classes: &[DexClassRc],
    ) -> Result<FxHashMap<crate::graph::DexField, String>> {
        let factory = &self.app_info.app().factory;
        let mut applied_fields: FxHashMap<crate::graph::DexField, String> = FxHashMap::default();
        if let Some(applied) = self.applied {
            for class in &applied.classes {
                let Ok(holder) = factory.create_type_from_java_name(&class.original) else {
                    continue;
                };
                for field in &class.fields {
                    let Ok(field_type) = factory.create_type_from_java_name(&field.field_type)
                    else {
                        continue;
                    };
                    let reference = factory.create_field(
                        holder.clone(),
                        factory.create_string(&field.original),
                        field_type,
                    );
                    applied_fields.insert(reference, field.renamed.clone());
                }
            }
        }

        let mut renaming: FxHashMap<crate::graph::DexField, String> = FxHashMap::default();
        for class in classes {
            self.options.cancellation.check()?;
            let mut used: FxHashSet<String> = FxHashSet::default();
            // reserve pinned and inherited non-program names
            for supertype in self.all_supertypes_and_self(&class.ty) {
                let Some(definition) = self.app_info.definition_for(&supertype) else {
                    continue;
                };
                for field in definition.fields() {
                    if !definition.is_program()
                        || self.root_set.pinned.contains_field(&field.field)
                        || self.root_set.no_obfuscation.fields.contains(&field.field)
                    {
                        used.insert(field.field.name().as_str().to_string());
                    }
                }
            }
            for field in class.fields() {
                if self.root_set.pinned.contains_field(&field.field)
                    || self.root_set.no_obfuscation.fields.contains(&field.field)
                {
                    continue;
                }
                if let Some(name) = applied_fields.get(&field.field) {
                    if !used.insert(name.clone()) {
                        return Err(Error::RuleConflict(format!(
                            "applied field name `{name}` collides in {}",
                            class.ty
                        )));
                    }
                    renaming.insert(field.field.clone(), name.clone());
                    continue;
                }
                let mut index = 0;
                let name = loop {
                    let candidate = identifier(index);
                    if used.insert(candidate.clone()) {
                        break candidate;
                    }
                    index += 1;
                };
                renaming.insert(field.field.clone(), name);
            }
        }
        Ok(renaming)
    }

    /// Assembles the lens and the mapping artifact.
    fn build_result(
        &self,
        previous_lens: &GraphLens,
        classes: &[DexClassRc],
        type_renaming: &FxHashMap<DexType, String>,
        method_renaming: &FxHashMap<DexMethod, String>,
        field_renaming: &FxHashMap<crate::graph::DexField, String>,
    ) -> Result<MinifierResult> {
        let factory = &self.app_info.app().factory;

        let renamed_type = |ty: &DexType| -> Result<DexType> {
            // arrays rename through their base element
            if ty.is_array() {
                let base = ty.base_element();
                if let Some(new_name) = type_renaming.get(base) {
                    let depth = ty.descriptor().as_str().bytes().take_while(|&b| b == b'[').count();
                    let mut descriptor = "[".repeat(depth);
                    descriptor.push_str(&crate::graph::references::java_name_to_descriptor(
                        new_name,
                    ));
                    return factory.create_type(&descriptor);
                }
                return Ok(ty.clone());
            }
            match type_renaming.get(ty) {
                Some(new_name) => factory.create_type_from_java_name(new_name),
                None => Ok(ty.clone()),
            }
        };

        let mut builder = previous_lens.nest();
        let mut mapping = ProguardMapping::default();

        for class in classes {
            let new_type = renamed_type(&class.ty)?;
            builder.map_type(class.ty.clone(), new_type.clone());

            let mut section = ClassMapping {
                original: class.ty.java_name(),
                renamed: new_type.java_name(),
                synthesized_from: match &class.origin {
                    Origin::Synthetic(parent) => Some(parent.to_string()),
                    _ => None,
                },
                fields: Vec::new(),
                methods: Vec::new(),
            };

            for field in class.fields() {
                let new_name = field_renaming
                    .get(&field.field)
                    .cloned()
                    .unwrap_or_else(|| field.field.name().as_str().to_string());
                let new_field = factory.create_field(
                    new_type.clone(),
                    factory.create_string(&new_name),
                    renamed_type(field.field.field_type())?,
                );
                builder.map_field(field.field.clone(), new_field);
                section.fields.push(FieldMapping {
                    field_type: field.field.field_type().java_name(),
                    original: field.field.name().as_str().to_string(),
                    renamed: new_name,
                });
            }

            for method in class.methods() {
                let new_name = method_renaming
                    .get(&method.method)
                    .cloned()
                    .unwrap_or_else(|| method.method.name().as_str().to_string());
                let new_parameters = method
                    .method
                    .proto()
                    .parameters()
                    .iter()
                    .map(&renamed_type)
                    .collect::<Result<Vec<_>>>()?;
                let new_method = factory.create_method(
                    new_type.clone(),
                    factory.create_string(&new_name),
                    factory.create_proto(
                        renamed_type(method.method.proto().return_type())?,
                        new_parameters,
                    ),
                );
                builder.map_method(method.method.clone(), new_method);
                if !method.is_class_initializer() {
                    section.methods.push(MethodMapping {
                        return_type: method.method.proto().return_type().java_name(),
                        original: method.method.name().as_str().to_string(),
                        parameters: method
                            .method
                            .proto()
                            .parameters()
                            .iter()
                            .map(DexType::java_name)
                            .collect(),
                        line_ranges: None,
                        renamed: new_name,
                    });
                }
            }

            mapping.classes.push(section);
        }

        Ok(MinifierResult {
            lens: builder.build(&self.root_set.pinned),
            mapping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_sequence_is_ordered_alphabet() {
        assert_eq!(identifier(0), "a");
        assert_eq!(identifier(25), "z");
        assert_eq!(identifier(26), "aa");
        assert_eq!(identifier(27), "ab");
        assert_eq!(identifier(26 + 26 * 26), "aaa");
    }
}
