//! Evaluation of parsed rules against the loaded definitions.
//!
//! Matching fans out across program classes with [`rayon`]; each class is
//! checked against a rule's annotation constraint, access filter, class-kind
//! constraint, name glob and inheritance selector, and its members against
//! the member selectors. The result records, per member selector, exactly
//! which members matched, so `keepclasseswithmembers` can enforce its
//! all-selectors-present atomicity and `-assumevalues` can re-associate
//! values with members.

use rayon::prelude::*;

use crate::graph::{
    AppInfo, DexClassRc, DexEncodedField, DexEncodedMethod, DexMember, DexType,
};
use crate::shaking::rules::{ClassSpec, MemberPattern, MemberPatternKind};

/// A class matched by a rule, with the members each selector matched.
#[derive(Debug, Clone)]
pub struct ClassMatch {
    /// The matched class.
    pub class: DexClassRc,
    /// For each member selector of the spec (by index), the matched members.
    pub members_by_pattern: Vec<Vec<DexMember>>,
}

impl ClassMatch {
    /// All matched members, across selectors, deduplicated.
    #[must_use]
    pub fn all_members(&self) -> Vec<DexMember> {
        let mut members: Vec<DexMember> = self
            .members_by_pattern
            .iter()
            .flatten()
            .cloned()
            .collect();
        members.sort();
        members.dedup();
        members
    }

    /// Whether every member selector matched at least one member.
    ///
    /// This is the atomic `keepclasseswithmembers` condition.
    #[must_use]
    pub fn all_patterns_satisfied(&self) -> bool {
        self.members_by_pattern
            .iter()
            .all(|members| !members.is_empty())
    }
}

/// Matches a spec against every program class, in parallel.
#[must_use]
pub fn match_spec_against_program(spec: &ClassSpec, app_info: &AppInfo) -> Vec<ClassMatch> {
    let classes = app_info.app().program_classes();
    classes
        .into_par_iter()
        .filter_map(|class| match_spec(spec, app_info, &class))
        .collect()
}

/// Matches a spec against one class.
#[must_use]
pub fn match_spec(spec: &ClassSpec, app_info: &AppInfo, class: &DexClassRc) -> Option<ClassMatch> {
    if !class_matches(spec, app_info, class) {
        return None;
    }
    let members_by_pattern = spec
        .members
        .iter()
        .map(|pattern| match_members(pattern, class))
        .collect();
    Some(ClassMatch {
        class: class.clone(),
        members_by_pattern,
    })
}

fn class_matches(spec: &ClassSpec, app_info: &AppInfo, class: &DexClassRc) -> bool {
    if let Some(annotation) = &spec.annotation {
        let annotated = class
            .annotations
            .iter()
            .any(|candidate| annotation.matches(&candidate.annotation_type.java_name()));
        if !annotated {
            return false;
        }
    }
    if !spec.access.matches(class.flags) {
        return false;
    }
    let kind_matches = spec.class_type.matches(class.flags);
    if spec.class_type_negated == kind_matches {
        return false;
    }
    if !spec.name.matches(&class.ty.java_name()) {
        return false;
    }
    if let Some(extends) = &spec.extends {
        if !has_matching_supertype(app_info, &class.ty, extends) {
            return false;
        }
    }
    true
}

/// Whether any proper supertype (class or interface, transitive) matches.
fn has_matching_supertype(
    app_info: &AppInfo,
    ty: &DexType,
    pattern: &crate::shaking::rules::ClassNamePattern,
) -> bool {
    let mut worklist: Vec<DexType> = Vec::new();
    if let Some(class) = app_info.definition_for(ty) {
        worklist.extend(class.superclass.iter().cloned());
        worklist.extend(class.interfaces.iter().cloned());
    }
    let mut seen = rustc_hash::FxHashSet::default();
    while let Some(current) = worklist.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        if pattern.matches(&current.java_name()) {
            return true;
        }
        if let Some(class) = app_info.definition_for(&current) {
            worklist.extend(class.superclass.iter().cloned());
            worklist.extend(class.interfaces.iter().cloned());
        }
    }
    false
}

fn match_members(pattern: &MemberPattern, class: &DexClassRc) -> Vec<DexMember> {
    let mut matched = Vec::new();
    match &pattern.kind {
        MemberPatternKind::AllMembers => {
            matched.extend(
                class
                    .fields()
                    .filter(|field| field_passes_common(pattern, field))
                    .map(|field| DexMember::Field(field.field.clone())),
            );
            matched.extend(
                class
                    .methods()
                    .filter(|method| method_passes_common(pattern, method))
                    .map(|method| DexMember::Method(method.method.clone())),
            );
        }
        MemberPatternKind::AllFields => {
            matched.extend(
                class
                    .fields()
                    .filter(|field| field_passes_common(pattern, field))
                    .map(|field| DexMember::Field(field.field.clone())),
            );
        }
        MemberPatternKind::AllMethods => {
            matched.extend(
                class
                    .methods()
                    .filter(|method| method_passes_common(pattern, method))
                    .map(|method| DexMember::Method(method.method.clone())),
            );
        }
        MemberPatternKind::Field { ty, name } => {
            matched.extend(
                class
                    .fields()
                    .filter(|field| {
                        field_passes_common(pattern, field)
                            && name.matches(field.field.name().as_str())
                            && ty.matches(field.field.field_type())
                    })
                    .map(|field| DexMember::Field(field.field.clone())),
            );
        }
        MemberPatternKind::Method {
            return_type,
            name,
            parameters,
        } => {
            matched.extend(
                class
                    .methods()
                    .filter(|method| {
                        method_passes_common(pattern, method)
                            && name.matches(method.method.name().as_str())
                            && return_type.matches(method.method.proto().return_type())
                            && parameters.matches(method.method.proto().parameters())
                    })
                    .map(|method| DexMember::Method(method.method.clone())),
            );
        }
    }
    matched
}

fn field_passes_common(pattern: &MemberPattern, field: &DexEncodedField) -> bool {
    if !pattern.access.matches(field.flags) {
        return false;
    }
    annotation_constraint_holds(pattern, field.annotations.iter().map(|a| &a.annotation_type))
}

fn method_passes_common(pattern: &MemberPattern, method: &DexEncodedMethod) -> bool {
    if !pattern.access.matches(method.flags) {
        return false;
    }
    annotation_constraint_holds(pattern, method.annotations.iter().map(|a| &a.annotation_type))
}

fn annotation_constraint_holds<'a>(
    pattern: &MemberPattern,
    mut annotations: impl Iterator<Item = &'a DexType>,
) -> bool {
    match &pattern.annotation {
        None => true,
        Some(constraint) => annotations.any(|ty| constraint.matches(&ty.java_name())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::diagnostics::Reporter;
    use crate::graph::{
        AccessFlags, ClassKind, DexApplication, DexClassBuilder, DexEncodedMethod, DexItemFactory,
    };
    use crate::shaking::parser::RuleParser;
    use crate::shaking::rules::{ProguardConfig, ProguardRule};

    fn app_with_main() -> (Arc<DexItemFactory>, AppInfo) {
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let main_type = factory.create_type("Lcom/example/Main;").unwrap();
        let string_array = factory.create_type("[Ljava/lang/String;").unwrap();
        let void_type = factory.create_type("V").unwrap();

        let main_method = factory.create_method(
            main_type.clone(),
            factory.create_string("main"),
            factory.create_proto(void_type, vec![string_array]),
        );
        let helper = factory.create_method(
            main_type.clone(),
            factory.create_string("helper"),
            factory.known.void_proto.clone(),
        );

        let mut builder = DexApplication::builder(factory.clone());
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, main_type)
                    .superclass(object)
                    .direct_method(DexEncodedMethod::new(
                        main_method,
                        AccessFlags::PUBLIC | AccessFlags::STATIC,
                        None,
                    ))
                    .virtual_method(DexEncodedMethod::new(helper, AccessFlags::PUBLIC, None))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (factory, AppInfo::new(Arc::new(builder.build())))
    }

    fn first_keep_spec(text: &str) -> ClassSpec {
        let reporter = Reporter::new();
        let parser = RuleParser::new(reporter.clone());
        let mut config = ProguardConfig::default();
        parser.parse_text(text, &mut config).unwrap();
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        match config.rules.into_iter().next().unwrap() {
            ProguardRule::Keep(rule) => rule.spec,
            other => panic!("expected keep rule, got {other:?}"),
        }
    }

    #[test]
    fn matches_main_signature() {
        let (_factory, app_info) = app_with_main();
        let spec = first_keep_spec(
            "-keep class com.example.Main { public static void main(java.lang.String[]); }",
        );
        let matches = match_spec_against_program(&spec, &app_info);
        assert_eq!(matches.len(), 1);
        let class_match = &matches[0];
        assert!(class_match.all_patterns_satisfied());
        assert_eq!(class_match.all_members().len(), 1);
    }

    #[test]
    fn access_filter_excludes_non_static() {
        let (_factory, app_info) = app_with_main();
        let spec = first_keep_spec("-keep class com.example.** { static <methods>; }");
        let matches = match_spec_against_program(&spec, &app_info);
        assert_eq!(matches.len(), 1);
        // only `main` is static
        assert_eq!(matches[0].all_members().len(), 1);
    }

    #[test]
    fn wildcard_spec_matches_all_members() {
        let (_factory, app_info) = app_with_main();
        let spec = first_keep_spec("-keep class ** { *; }");
        let matches = match_spec_against_program(&spec, &app_info);
        assert_eq!(matches[0].all_members().len(), 2);
    }
}
