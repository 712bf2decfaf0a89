//! The keep/shaking rule model.
//!
//! Rules are plain configuration records produced by the parser; all
//! validation happens at parse time. Each rule has a class-name glob, an
//! optional inheritance selector, an optional annotation constraint and an
//! optional member selector with access-flag filters and descriptor globs.

use std::path::PathBuf;

use strum::Display;

use crate::graph::{AccessFlags, DexType};

/// Class-name renaming policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RepackagePolicy {
    /// Per-package renaming with locally-unique names.
    #[default]
    None,
    /// The package hierarchy is flattened into subpackages of the target.
    Flatten(String),
    /// All classes are repackaged directly into the target package.
    All(String),
}

/// The keep directive family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeepKind {
    /// `-keep`: the matched classes and members.
    Keep,
    /// `-keepclassmembers`: members, conditional on the class staying live.
    KeepClassMembers,
    /// `-keepclasseswithmembers`: classes and members, matched atomically.
    KeepClassesWithMembers,
}

/// Modifiers on a keep directive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepModifiers {
    /// The matched items may still be removed if unreachable.
    pub allow_shrinking: bool,
    /// The matched items may be renamed.
    pub allow_obfuscation: bool,
    /// The matched items' access may be widened.
    pub allow_access_modification: bool,
}

/// A glob over dotted class names.
///
/// `?` matches one character except the package separator, `*` any run
/// without a separator, `**` any run including separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNamePattern {
    pattern: String,
}

impl ClassNamePattern {
    /// Wraps a pattern string.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        ClassNamePattern {
            pattern: pattern.to_string(),
        }
    }

    /// The raw pattern text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the pattern matches everything.
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.pattern == "**" || self.pattern == "*"
    }

    /// Whether the pattern contains no wildcards at all.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        !self.pattern.contains(['*', '?'])
    }

    /// Matches a dotted Java class name.
    #[must_use]
    pub fn matches(&self, java_name: &str) -> bool {
        class_glob_match(self.pattern.as_bytes(), java_name.as_bytes())
    }

    /// Matches a type by its dotted name.
    #[must_use]
    pub fn matches_type(&self, ty: &DexType) -> bool {
        self.matches(&ty.java_name())
    }
}

/// Recursive glob matcher for dotted class names.
fn class_glob_match(pattern: &[u8], input: &[u8]) -> bool {
    match pattern.first() {
        None => input.is_empty(),
        Some(b'*') => {
            if pattern.starts_with(b"**") {
                let rest = &pattern[2..];
                (0..=input.len()).any(|i| class_glob_match(rest, &input[i..]))
            } else {
                let rest = &pattern[1..];
                (0..=input.len())
                    .take_while(|&i| i == 0 || input[i - 1] != b'.')
                    .any(|i| class_glob_match(rest, &input[i..]))
            }
        }
        Some(b'?') => {
            !input.is_empty() && input[0] != b'.' && class_glob_match(&pattern[1..], &input[1..])
        }
        Some(&c) => input.first() == Some(&c) && class_glob_match(&pattern[1..], &input[1..]),
    }
}

/// Glob matcher for member names (`*` spans anything, `?` one character).
pub(crate) fn member_glob_match(pattern: &[u8], input: &[u8]) -> bool {
    match pattern.first() {
        None => input.is_empty(),
        Some(b'*') => {
            let rest = &pattern[1..];
            (0..=input.len()).any(|i| member_glob_match(rest, &input[i..]))
        }
        Some(b'?') => !input.is_empty() && member_glob_match(&pattern[1..], &input[1..]),
        Some(&c) => input.first() == Some(&c) && member_glob_match(&pattern[1..], &input[1..]),
    }
}

/// Access-flag filter with positive and negated requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessFilter {
    /// Flags the item must carry.
    pub required: AccessFlags,
    /// Flags the item must not carry.
    pub forbidden: AccessFlags,
}

impl AccessFilter {
    /// Whether the filter accepts the given flags.
    #[must_use]
    pub fn matches(&self, flags: AccessFlags) -> bool {
        flags.contains(self.required) && !flags.intersects(self.forbidden)
    }
}

/// Constraint on the class kind (`class`, `interface`, `enum`, `@interface`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClassTypeFilter {
    /// Any class kind (`class` also matches interfaces and enums).
    #[default]
    Any,
    /// Interfaces only.
    Interface,
    /// Enums only.
    Enum,
    /// Annotation interfaces only.
    Annotation,
}

impl ClassTypeFilter {
    /// Whether the filter accepts a class with the given flags.
    #[must_use]
    pub fn matches(&self, flags: AccessFlags) -> bool {
        match self {
            ClassTypeFilter::Any => true,
            ClassTypeFilter::Interface => flags.is_interface(),
            ClassTypeFilter::Enum => flags.is_enum(),
            ClassTypeFilter::Annotation => flags.is_annotation(),
        }
    }
}

/// A pattern over member types and method return types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypePattern {
    /// `***`: any type.
    Any,
    /// `%`: any primitive type.
    AnyPrimitive,
    /// A (possibly glob) dotted name, with trailing `[]` pairs allowed.
    Name(ClassNamePattern),
}

impl TypePattern {
    /// Whether the pattern matches the given type.
    #[must_use]
    pub fn matches(&self, ty: &DexType) -> bool {
        match self {
            TypePattern::Any => true,
            TypePattern::AnyPrimitive => ty.is_primitive(),
            TypePattern::Name(pattern) => pattern.matches(&ty.java_name()),
        }
    }
}

/// A pattern over member names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberNamePattern {
    /// An exact name or glob.
    Name(String),
    /// `<init>`.
    Init,
    /// `<clinit>`.
    Clinit,
}

impl MemberNamePattern {
    /// Whether the pattern matches the given member name.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        match self {
            MemberNamePattern::Name(pattern) => {
                member_glob_match(pattern.as_bytes(), name.as_bytes())
            }
            MemberNamePattern::Init => name == "<init>",
            MemberNamePattern::Clinit => name == "<clinit>",
        }
    }
}

/// A pattern over method parameter lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParametersPattern {
    /// `...`: any number of any parameters.
    Any,
    /// An exact sequence of type patterns.
    Exact(Vec<TypePattern>),
}

impl ParametersPattern {
    /// Whether the pattern matches the given parameter types.
    #[must_use]
    pub fn matches(&self, parameters: &[DexType]) -> bool {
        match self {
            ParametersPattern::Any => true,
            ParametersPattern::Exact(patterns) => {
                patterns.len() == parameters.len()
                    && patterns
                        .iter()
                        .zip(parameters)
                        .all(|(pattern, parameter)| pattern.matches(parameter))
            }
        }
    }
}

/// The shape a member pattern selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberPatternKind {
    /// `*`: all fields and methods.
    AllMembers,
    /// `<fields>`.
    AllFields,
    /// `<methods>`.
    AllMethods,
    /// A field pattern.
    Field {
        /// The field type pattern.
        ty: TypePattern,
        /// The field name pattern.
        name: MemberNamePattern,
    },
    /// A method pattern.
    Method {
        /// The return type pattern.
        return_type: TypePattern,
        /// The method name pattern.
        name: MemberNamePattern,
        /// The parameter list pattern.
        parameters: ParametersPattern,
    },
}

/// One member selector inside a class spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPattern {
    /// Optional annotation constraint on the member.
    pub annotation: Option<ClassNamePattern>,
    /// Access-flag filter.
    pub access: AccessFilter,
    /// The selected shape.
    pub kind: MemberPatternKind,
    /// `-assumevalues` value attached to the member, if any.
    pub assumed_value: Option<i64>,
}

/// The class selector of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpec {
    /// Optional annotation constraint on the class.
    pub annotation: Option<ClassNamePattern>,
    /// Access-flag filter on the class.
    pub access: AccessFilter,
    /// Constraint on the class kind.
    pub class_type: ClassTypeFilter,
    /// Whether the class kind constraint is negated.
    pub class_type_negated: bool,
    /// The class-name glob.
    pub name: ClassNamePattern,
    /// Optional `extends`/`implements` selector (transitive).
    pub extends: Option<ClassNamePattern>,
    /// Member selectors, empty when the rule has no member block.
    pub members: Vec<MemberPattern>,
}

impl ClassSpec {
    /// A spec matching every class, with no member block.
    #[must_use]
    pub fn match_all() -> Self {
        ClassSpec {
            annotation: None,
            access: AccessFilter::default(),
            class_type: ClassTypeFilter::Any,
            class_type_negated: false,
            name: ClassNamePattern::new("**"),
            extends: None,
            members: Vec::new(),
        }
    }
}

/// A `-keep` family rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepRule {
    /// Which directive of the family.
    pub kind: KeepKind,
    /// Modifiers.
    pub modifiers: KeepModifiers,
    /// The class selector.
    pub spec: ClassSpec,
}

/// Any parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProguardRule {
    /// A keep directive.
    Keep(KeepRule),
    /// `-if condition -keep...` conditional keep.
    If {
        /// The condition spec, re-evaluated at the reachability fixed point.
        condition: ClassSpec,
        /// The keep rule applied when the condition matches.
        consequent: KeepRule,
    },
    /// `-assumenosideeffects`.
    AssumeNoSideEffects(ClassSpec),
    /// `-assumevalues`.
    AssumeValues(ClassSpec),
    /// `-checkdiscard`.
    CheckDiscard(ClassSpec),
    /// `-whyareyoukeeping`.
    WhyAreYouKeeping(ClassSpec),
    /// `-whyareyounotinlining`.
    WhyAreYouNotInlining(ClassSpec),
}

/// The whole parsed rule configuration.
#[derive(Debug, Clone, Default)]
pub struct ProguardConfig {
    /// All parsed rules, in source order.
    pub rules: Vec<ProguardRule>,
    /// `-printmapping`, with optional path (`None` = standard output sink).
    pub print_mapping: Option<Option<PathBuf>>,
    /// `-printusage`, with optional path.
    pub print_usage: Option<Option<PathBuf>>,
    /// `-printseeds`, with optional path.
    pub print_seeds: Option<Option<PathBuf>>,
    /// `-repackageclasses` / `-flattenpackagehierarchy`.
    pub repackage: RepackagePolicy,
    /// `-dontoptimize`.
    pub dont_optimize: bool,
    /// `-dontshrink`.
    pub dont_shrink: bool,
    /// `-dontobfuscate`.
    pub dont_obfuscate: bool,
    /// `-dontwarn` patterns; an empty pattern list silences nothing.
    pub dont_warn: Vec<ClassNamePattern>,
    /// `-applymapping` path.
    pub apply_mapping: Option<PathBuf>,
}

impl ProguardConfig {
    /// Whether a missing-class warning for `java_name` is silenced.
    #[must_use]
    pub fn is_dont_warned(&self, java_name: &str) -> bool {
        self.dont_warn.iter().any(|pattern| pattern.matches(java_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_globs_respect_package_separators() {
        let single = ClassNamePattern::new("com.example.*");
        assert!(single.matches("com.example.Foo"));
        assert!(!single.matches("com.example.sub.Foo"));

        let double = ClassNamePattern::new("com.example.**");
        assert!(double.matches("com.example.Foo"));
        assert!(double.matches("com.example.sub.Foo"));

        let question = ClassNamePattern::new("com.example.Fo?");
        assert!(question.matches("com.example.Foo"));
        assert!(!question.matches("com.example.Fo.o"));
    }

    #[test]
    fn member_globs_span_everything() {
        assert!(member_glob_match(b"get*", b"getValue"));
        assert!(member_glob_match(b"*", b"anything"));
        assert!(!member_glob_match(b"get*", b"setValue"));
    }
}
