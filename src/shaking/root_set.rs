//! The root set: reachability seeds and per-reference attributes computed by
//! applying the rules to the definitions.
//!
//! Every attribute set references a definition currently in the program, and
//! pinning is monotone: once a reference is pinned it remains pinned across
//! all subsequent phases (later phases only ever copy or shrink these sets,
//! never unpin).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::{
    AppInfo, DexField, DexMember, DexMethod, DexType, PinnedItems,
};
use crate::shaking::matcher::{match_spec_against_program, ClassMatch};
use crate::shaking::rules::{
    ClassSpec, KeepKind, KeepModifiers, KeepRule, MemberPatternKind, ProguardConfig, ProguardRule,
};

/// A set of type, field and method references.
#[derive(Debug, Clone, Default)]
pub struct ItemSet {
    /// Types in the set.
    pub types: FxHashSet<DexType>,
    /// Fields in the set.
    pub fields: FxHashSet<DexField>,
    /// Methods in the set.
    pub methods: FxHashSet<DexMethod>,
}

impl ItemSet {
    /// Inserts a member reference.
    pub fn insert_member(&mut self, member: &DexMember) {
        match member {
            DexMember::Field(field) => {
                self.fields.insert(field.clone());
            }
            DexMember::Method(method) => {
                self.methods.insert(method.clone());
            }
        }
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }
}

/// A `keepclassmembers` consequence, activated when its holder becomes live.
#[derive(Debug, Clone)]
pub struct DependentMemberRule {
    /// The class whose liveness triggers the rule.
    pub holder: DexType,
    /// The members to keep when triggered.
    pub members: Vec<DexMember>,
    /// The keep modifiers of the originating rule.
    pub modifiers: KeepModifiers,
}

/// A root entry for the seeds output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeedEntry {
    /// The kept class.
    pub class: DexType,
    /// The kept member, `None` for the class itself.
    pub member: Option<DexMember>,
}

/// Seeds and attribute sets driving the reachability fixed point.
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    /// Types whose existence must be preserved.
    pub live_types: Vec<DexType>,
    /// Field definitions that must be kept in place.
    pub live_fields: Vec<DexField>,
    /// Method definitions that must be kept in place.
    pub live_methods: Vec<DexMethod>,
    /// Types whose constructors are kept and may appear as dynamic receivers.
    pub instantiated_types: Vec<DexType>,
    /// References whose name and signature must be preserved verbatim.
    pub pinned: PinnedItems,
    /// Items that must not be renamed.
    pub no_obfuscation: ItemSet,
    /// Items that must not be removed even when unreachable.
    pub no_shrinking: ItemSet,
    /// Items whose access flags must not be widened.
    pub no_access_modification: ItemSet,
    /// Items that must be gone after shrinking.
    pub check_discard: ItemSet,
    /// Methods assumed to have no side effects; calls to them are not traced.
    pub assume_no_side_effects: FxHashSet<DexMethod>,
    /// Assumed constant values for members.
    pub assumed_values: FxHashMap<DexMember, i64>,
    /// Items the user asked `-whyareyoukeeping` about.
    pub reason_asked: ItemSet,
    /// Items the user asked `-whyareyounotinlining` about.
    pub no_inlining_asked: ItemSet,
    /// `keepclassmembers` consequences indexed by holder type.
    pub dependent_member_rules: FxHashMap<DexType, Vec<DependentMemberRule>>,
    /// `-if` conditionals, re-evaluated at the fixed point.
    pub if_rules: Vec<(ClassSpec, KeepRule)>,
    /// Entries for the seeds output.
    pub seeds: Vec<SeedEntry>,
}

impl RootSet {
    /// Builds the root set by matching every rule against the program.
    #[must_use]
    pub fn build(app_info: &AppInfo, config: &ProguardConfig) -> RootSet {
        let mut root_set = RootSet::default();
        for rule in &config.rules {
            match rule {
                ProguardRule::Keep(keep) => root_set.apply_keep_rule(app_info, keep),
                ProguardRule::If {
                    condition,
                    consequent,
                } => {
                    root_set
                        .if_rules
                        .push((condition.clone(), consequent.clone()));
                }
                ProguardRule::AssumeNoSideEffects(spec) => {
                    for class_match in match_spec_against_program(spec, app_info) {
                        for member in class_match.all_members() {
                            if let DexMember::Method(method) = member {
                                root_set.assume_no_side_effects.insert(method);
                            }
                        }
                        root_set.record_assumed_values(spec, &class_match);
                    }
                }
                ProguardRule::AssumeValues(spec) => {
                    for class_match in match_spec_against_program(spec, app_info) {
                        root_set.record_assumed_values(spec, &class_match);
                    }
                }
                ProguardRule::CheckDiscard(spec) => {
                    for class_match in match_spec_against_program(spec, app_info) {
                        if spec.members.is_empty() {
                            root_set
                                .check_discard
                                .types
                                .insert(class_match.class.ty.clone());
                        }
                        for member in class_match.all_members() {
                            root_set.check_discard.insert_member(&member);
                        }
                    }
                }
                ProguardRule::WhyAreYouKeeping(spec) => {
                    for class_match in match_spec_against_program(spec, app_info) {
                        root_set
                            .reason_asked
                            .types
                            .insert(class_match.class.ty.clone());
                        for member in class_match.all_members() {
                            root_set.reason_asked.insert_member(&member);
                        }
                    }
                }
                ProguardRule::WhyAreYouNotInlining(spec) => {
                    for class_match in match_spec_against_program(spec, app_info) {
                        for member in class_match.all_members() {
                            root_set.no_inlining_asked.insert_member(&member);
                        }
                    }
                }
            }
        }
        root_set
    }

    /// Applies one keep rule (also used for materialized `-if` consequents).
    pub fn apply_keep_rule(&mut self, app_info: &AppInfo, keep: &KeepRule) {
        for class_match in match_spec_against_program(&keep.spec, app_info) {
            self.apply_keep_match(keep, &class_match);
        }
    }

    fn apply_keep_match(&mut self, keep: &KeepRule, class_match: &ClassMatch) {
        match keep.kind {
            KeepKind::Keep => {
                self.keep_class(keep.modifiers, class_match);
                self.keep_members(keep.modifiers, class_match);
            }
            KeepKind::KeepClassesWithMembers => {
                // Atomic: the class enters the root set only if every member
                // selector matched.
                if class_match.all_patterns_satisfied() {
                    self.keep_class(keep.modifiers, class_match);
                    self.keep_members(keep.modifiers, class_match);
                }
            }
            KeepKind::KeepClassMembers => {
                let members = class_match.all_members();
                if !members.is_empty() {
                    self.dependent_member_rules
                        .entry(class_match.class.ty.clone())
                        .or_default()
                        .push(DependentMemberRule {
                            holder: class_match.class.ty.clone(),
                            members,
                            modifiers: keep.modifiers,
                        });
                }
            }
        }
    }

    fn keep_class(&mut self, modifiers: KeepModifiers, class_match: &ClassMatch) {
        let ty = class_match.class.ty.clone();
        if !modifiers.allow_shrinking {
            self.live_types.push(ty.clone());
            self.no_shrinking.types.insert(ty.clone());
        }
        if !modifiers.allow_obfuscation {
            self.no_obfuscation.types.insert(ty.clone());
            self.pinned.types.insert(ty.clone());
        }
        if !modifiers.allow_access_modification {
            self.no_access_modification.types.insert(ty.clone());
        }
        self.seeds.push(SeedEntry {
            class: ty,
            member: None,
        });
    }

    fn keep_members(&mut self, modifiers: KeepModifiers, class_match: &ClassMatch) {
        for member in class_match.all_members() {
            self.keep_member(modifiers, &class_match.class.ty, &member);
        }
    }

    /// Applies keep semantics to one member; shared with the Enqueuer when a
    /// dependent rule triggers.
    pub fn keep_member(&mut self, modifiers: KeepModifiers, holder: &DexType, member: &DexMember) {
        if !modifiers.allow_shrinking {
            match member {
                DexMember::Field(field) => self.live_fields.push(field.clone()),
                DexMember::Method(method) => {
                    self.live_methods.push(method.clone());
                    if method.is_instance_initializer() {
                        self.instantiated_types.push(holder.clone());
                    }
                }
            }
            self.no_shrinking.insert_member(member);
        }
        if !modifiers.allow_obfuscation {
            self.no_obfuscation.insert_member(member);
            match member {
                DexMember::Field(field) => {
                    self.pinned.fields.insert(field.clone());
                }
                DexMember::Method(method) => {
                    self.pinned.methods.insert(method.clone());
                }
            }
        }
        if !modifiers.allow_access_modification {
            self.no_access_modification.insert_member(member);
        }
        self.seeds.push(SeedEntry {
            class: holder.clone(),
            member: Some(member.clone()),
        });
    }

    fn record_assumed_values(&mut self, spec: &ClassSpec, class_match: &ClassMatch) {
        for (pattern, members) in spec.members.iter().zip(&class_match.members_by_pattern) {
            let Some(value) = pattern.assumed_value else {
                continue;
            };
            // `<methods>`/`<fields>`/`*` carry no value position in the
            // grammar, so only concrete patterns reach here.
            debug_assert!(matches!(
                pattern.kind,
                MemberPatternKind::Field { .. } | MemberPatternKind::Method { .. }
            ));
            for member in members {
                self.assumed_values.insert(member.clone(), value);
            }
        }
    }

    /// Seeds sorted for deterministic output.
    #[must_use]
    pub fn sorted_seeds(&self) -> Vec<SeedEntry> {
        let mut seeds = self.seeds.clone();
        seeds.sort();
        seeds.dedup();
        seeds
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::diagnostics::Reporter;
    use crate::graph::{
        AccessFlags, AppInfo, ClassKind, DexApplication, DexClassBuilder, DexEncodedMethod,
        DexItemFactory,
    };
    use crate::shaking::parser::RuleParser;

    fn simple_app() -> (Arc<DexItemFactory>, AppInfo) {
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let a = factory.create_type("La/A;").unwrap();
        let m1 = factory.create_method(
            a.clone(),
            factory.create_string("m1"),
            factory.known.void_proto.clone(),
        );
        let m2 = factory.create_method(
            a.clone(),
            factory.create_string("m2"),
            factory.known.void_proto.clone(),
        );
        let mut builder = DexApplication::builder(factory.clone());
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, a)
                    .superclass(object)
                    .virtual_method(DexEncodedMethod::new(m1, AccessFlags::PUBLIC, None))
                    .virtual_method(DexEncodedMethod::new(m2, AccessFlags::PUBLIC, None))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (factory, AppInfo::new(Arc::new(builder.build())))
    }

    fn config_of(text: &str) -> ProguardConfig {
        let reporter = Reporter::new();
        let parser = RuleParser::new(reporter.clone());
        let mut config = ProguardConfig::default();
        parser.parse_text(text, &mut config).unwrap();
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        config
    }

    #[test]
    fn keep_pins_class_and_member() {
        let (_factory, app_info) = simple_app();
        let config = config_of("-keep class a.A { void m1(); }");
        let root_set = RootSet::build(&app_info, &config);

        assert_eq!(root_set.live_types.len(), 1);
        assert_eq!(root_set.live_methods.len(), 1);
        assert_eq!(root_set.live_methods[0].name().as_str(), "m1");
        assert_eq!(root_set.pinned.methods.len(), 1);
        assert!(root_set.if_rules.is_empty());
    }

    #[test]
    fn keepnames_allows_shrinking_but_pins_names() {
        let (_factory, app_info) = simple_app();
        let config = config_of("-keepnames class a.A { void m1(); }");
        let root_set = RootSet::build(&app_info, &config);

        // allowshrinking: no liveness seeds, but names are pinned
        assert!(root_set.live_types.is_empty());
        assert!(root_set.live_methods.is_empty());
        assert!(!root_set.pinned.types.is_empty());
        assert!(!root_set.pinned.methods.is_empty());
    }

    #[test]
    fn keepclassmembers_is_deferred() {
        let (factory, app_info) = simple_app();
        let config = config_of("-keepclassmembers class a.A { void m2(); }");
        let root_set = RootSet::build(&app_info, &config);

        assert!(root_set.live_methods.is_empty());
        let a = factory.create_type("La/A;").unwrap();
        assert_eq!(root_set.dependent_member_rules[&a].len(), 1);
    }
}
