//! Parser for the keep-rule grammar.
//!
//! The grammar is tokenized with a [`logos`] lexer and consumed by a
//! hand-written recursive descent. Parse errors never abort the whole parse:
//! they are collected through the [`Reporter`] so the user sees every broken
//! rule at once, and the parser resynchronizes at the next directive. Fatal
//! failure is decided at the stage boundary by the driver.
//!
//! `@file` and `-include file` splice the lexed tokens of *file* into the
//! rule stream, resolved relative to the including file.

use std::path::{Path, PathBuf};

use logos::Logos;

use crate::diagnostics::{DiagnosticKind, Origin, Reporter};
use crate::graph::AccessFlags;
use crate::shaking::rules::{
    AccessFilter, ClassNamePattern, ClassSpec, ClassTypeFilter, KeepKind, KeepModifiers, KeepRule,
    MemberNamePattern, MemberPattern, MemberPatternKind, ParametersPattern, ProguardConfig,
    ProguardRule, RepackagePolicy, TypePattern,
};
use crate::Result;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
enum RuleToken<'s> {
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("!")]
    Bang,
    #[token("@")]
    At,
    #[token("=")]
    Equals,
    #[regex(r"-[a-zA-Z]+", |lex| lex.slice())]
    Directive(&'s str),
    #[regex(r"'[^']*'", |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    Quoted(&'s str),
    #[regex(
        r"[A-Za-z0-9_$.<>\[\]*?/\\%][A-Za-z0-9_$.<>\[\]*?/\\%:+-]*",
        |lex| lex.slice()
    )]
    Word(&'s str),
}

/// Token stream with one-token lookahead and line tracking.
struct Cursor<'s> {
    tokens: Vec<(RuleToken<'s>, usize)>,
    position: usize,
    source: &'s str,
}

impl<'s> Cursor<'s> {
    fn new(source: &'s str, reporter: &Reporter, origin: &Origin) -> Self {
        let mut tokens = Vec::new();
        let mut lexer = RuleToken::lexer(source);
        while let Some(result) = lexer.next() {
            match result {
                Ok(token) => tokens.push((token, lexer.span().start)),
                Err(()) => {
                    reporter.error(
                        DiagnosticKind::InvalidRule,
                        origin.clone(),
                        format!(
                            "unrecognized character `{}` on line {}",
                            &source[lexer.span()],
                            line_of(source, lexer.span().start)
                        ),
                    );
                }
            }
        }
        Cursor {
            tokens,
            position: 0,
            source,
        }
    }

    fn peek(&self) -> Option<RuleToken<'s>> {
        self.tokens.get(self.position).map(|(token, _)| *token)
    }

    fn peek_second(&self) -> Option<RuleToken<'s>> {
        self.tokens.get(self.position + 1).map(|(token, _)| *token)
    }

    fn next(&mut self) -> Option<RuleToken<'s>> {
        let token = self.peek();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn current_line(&self) -> u32 {
        let offset = self
            .tokens
            .get(self.position.min(self.tokens.len().saturating_sub(1)))
            .map_or(self.source.len(), |(_, offset)| *offset);
        line_of(self.source, offset)
    }

    /// Skips forward to the next directive token for error recovery.
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            if matches!(token, RuleToken::Directive(_)) {
                break;
            }
            self.position += 1;
        }
    }
}

fn line_of(source: &str, offset: usize) -> u32 {
    let clamped = offset.min(source.len());
    source[..clamped].bytes().filter(|&b| b == b'\n').count() as u32 + 1
}

/// Parses rule files and inline rule strings into a [`ProguardConfig`].
pub struct RuleParser {
    reporter: Reporter,
}

impl RuleParser {
    /// Creates a parser reporting through the given reporter.
    #[must_use]
    pub fn new(reporter: Reporter) -> Self {
        RuleParser { reporter }
    }

    /// Parses a rule file, resolving includes relative to it.
    ///
    /// # Errors
    ///
    /// I/O failure reading the file. Parse errors are reported, not returned.
    pub fn parse_file(&self, path: &Path, config: &mut ProguardConfig) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().map(Path::to_path_buf);
        self.parse_text_with_base(&text, Origin::path(path), base.as_deref(), config)
    }

    /// Parses inline rule text.
    ///
    /// # Errors
    ///
    /// I/O failure reading an included file. Parse errors are reported.
    pub fn parse_text(&self, text: &str, config: &mut ProguardConfig) -> Result<()> {
        self.parse_text_with_base(text, Origin::InlineRule, None, config)
    }

    fn parse_text_with_base(
        &self,
        text: &str,
        origin: Origin,
        base: Option<&Path>,
        config: &mut ProguardConfig,
    ) -> Result<()> {
        let mut cursor = Cursor::new(text, &self.reporter, &origin);
        while let Some(token) = cursor.peek() {
            match token {
                RuleToken::Directive(directive) => {
                    cursor.next();
                    self.parse_directive(directive, &mut cursor, &origin, base, config)?;
                }
                RuleToken::At => {
                    cursor.next();
                    match cursor.next() {
                        Some(RuleToken::Word(file) | RuleToken::Quoted(file)) => {
                            self.include(file, base, config)?;
                        }
                        _ => self.rule_error(&cursor, &origin, "expected file after `@`"),
                    }
                }
                _ => {
                    self.rule_error(&cursor, &origin, "expected a directive");
                    cursor.synchronize();
                }
            }
        }
        Ok(())
    }

    fn include(&self, file: &str, base: Option<&Path>, config: &mut ProguardConfig) -> Result<()> {
        let path = match base {
            Some(base) => base.join(file),
            None => PathBuf::from(file),
        };
        self.parse_file(&path, config)
    }

    #[allow(clippy::too_many_lines)]
    fn parse_directive(
        &self,
        directive: &str,
        cursor: &mut Cursor<'_>,
        origin: &Origin,
        base: Option<&Path>,
        config: &mut ProguardConfig,
    ) -> Result<()> {
        match directive {
            "-keep" => self.parse_keep(KeepKind::Keep, false, cursor, origin, config),
            "-keepclassmembers" => {
                self.parse_keep(KeepKind::KeepClassMembers, false, cursor, origin, config);
            }
            "-keepclasseswithmembers" => {
                self.parse_keep(KeepKind::KeepClassesWithMembers, false, cursor, origin, config);
            }
            "-keepnames" => self.parse_keep(KeepKind::Keep, true, cursor, origin, config),
            "-keepclassmembernames" => {
                self.parse_keep(KeepKind::KeepClassMembers, true, cursor, origin, config);
            }
            "-keepclasseswithmembernames" => {
                self.parse_keep(KeepKind::KeepClassesWithMembers, true, cursor, origin, config);
            }
            "-if" => {
                let Some(condition) = self.parse_class_spec(cursor, origin) else {
                    cursor.synchronize();
                    return Ok(());
                };
                match cursor.next() {
                    Some(RuleToken::Directive(keep)) => {
                        let (kind, names_only) = match keep {
                            "-keep" => (KeepKind::Keep, false),
                            "-keepclassmembers" => (KeepKind::KeepClassMembers, false),
                            "-keepclasseswithmembers" => (KeepKind::KeepClassesWithMembers, false),
                            "-keepnames" => (KeepKind::Keep, true),
                            "-keepclassmembernames" => (KeepKind::KeepClassMembers, true),
                            "-keepclasseswithmembernames" => {
                                (KeepKind::KeepClassesWithMembers, true)
                            }
                            _ => {
                                self.rule_error(
                                    cursor,
                                    origin,
                                    format!("`-if` must be followed by a keep directive, found `{keep}`"),
                                );
                                cursor.synchronize();
                                return Ok(());
                            }
                        };
                        if let Some(rule) = self.parse_keep_rule(kind, names_only, cursor, origin) {
                            config.rules.push(ProguardRule::If {
                                condition,
                                consequent: rule,
                            });
                        }
                    }
                    _ => {
                        self.rule_error(cursor, origin, "`-if` must be followed by a keep directive");
                        cursor.synchronize();
                    }
                }
            }
            "-assumenosideeffects" => {
                if let Some(spec) = self.parse_class_spec(cursor, origin) {
                    config.rules.push(ProguardRule::AssumeNoSideEffects(spec));
                }
            }
            "-assumevalues" => {
                if let Some(spec) = self.parse_class_spec(cursor, origin) {
                    config.rules.push(ProguardRule::AssumeValues(spec));
                }
            }
            "-checkdiscard" => {
                if let Some(spec) = self.parse_class_spec(cursor, origin) {
                    config.rules.push(ProguardRule::CheckDiscard(spec));
                }
            }
            "-whyareyoukeeping" => {
                if let Some(spec) = self.parse_class_spec(cursor, origin) {
                    config.rules.push(ProguardRule::WhyAreYouKeeping(spec));
                }
            }
            "-whyareyounotinlining" => {
                if let Some(spec) = self.parse_class_spec(cursor, origin) {
                    config.rules.push(ProguardRule::WhyAreYouNotInlining(spec));
                }
            }
            "-printmapping" => config.print_mapping = Some(self.optional_path(cursor)),
            "-printusage" => config.print_usage = Some(self.optional_path(cursor)),
            "-printseeds" => config.print_seeds = Some(self.optional_path(cursor)),
            "-repackageclasses" => {
                config.repackage = RepackagePolicy::All(self.optional_package(cursor));
            }
            "-flattenpackagehierarchy" => {
                config.repackage = RepackagePolicy::Flatten(self.optional_package(cursor));
            }
            "-dontoptimize" => config.dont_optimize = true,
            "-dontshrink" => config.dont_shrink = true,
            "-dontobfuscate" => config.dont_obfuscate = true,
            "-dontwarn" => match cursor.peek() {
                Some(RuleToken::Word(pattern)) => {
                    cursor.next();
                    config.dont_warn.push(ClassNamePattern::new(pattern));
                }
                _ => config.dont_warn.push(ClassNamePattern::new("**")),
            },
            "-applymapping" => match cursor.next() {
                Some(RuleToken::Word(path) | RuleToken::Quoted(path)) => {
                    config.apply_mapping = Some(match base {
                        Some(base) => base.join(path),
                        None => PathBuf::from(path),
                    });
                }
                _ => self.rule_error(cursor, origin, "`-applymapping` requires a file"),
            },
            "-include" => match cursor.next() {
                Some(RuleToken::Word(file) | RuleToken::Quoted(file)) => {
                    self.include(file, base, config)?;
                }
                _ => self.rule_error(cursor, origin, "`-include` requires a file"),
            },
            unknown => {
                self.rule_error(cursor, origin, format!("unknown directive `{unknown}`"));
                cursor.synchronize();
            }
        }
        Ok(())
    }

    fn parse_keep(
        &self,
        kind: KeepKind,
        names_only: bool,
        cursor: &mut Cursor<'_>,
        origin: &Origin,
        config: &mut ProguardConfig,
    ) {
        if let Some(rule) = self.parse_keep_rule(kind, names_only, cursor, origin) {
            config.rules.push(ProguardRule::Keep(rule));
        }
    }

    fn parse_keep_rule(
        &self,
        kind: KeepKind,
        names_only: bool,
        cursor: &mut Cursor<'_>,
        origin: &Origin,
    ) -> Option<KeepRule> {
        let mut modifiers = KeepModifiers {
            allow_shrinking: names_only,
            ..KeepModifiers::default()
        };
        while cursor.peek() == Some(RuleToken::Comma) {
            cursor.next();
            match cursor.next() {
                Some(RuleToken::Word("allowshrinking")) => modifiers.allow_shrinking = true,
                Some(RuleToken::Word("allowobfuscation")) => modifiers.allow_obfuscation = true,
                Some(RuleToken::Word("allowaccessmodification")) => {
                    modifiers.allow_access_modification = true;
                }
                _ => {
                    self.rule_error(cursor, origin, "unknown keep modifier");
                    cursor.synchronize();
                    return None;
                }
            }
        }
        let spec = self.parse_class_spec(cursor, origin)?;
        Some(KeepRule {
            kind,
            modifiers,
            spec,
        })
    }

    /// Parses `[@ann] [access]* [!]kind name [extends name] [{ members }]`.
    fn parse_class_spec(&self, cursor: &mut Cursor<'_>, origin: &Origin) -> Option<ClassSpec> {
        let mut spec = ClassSpec::match_all();

        // Annotation constraint, unless this is the `@interface` kind.
        if cursor.peek() == Some(RuleToken::At) {
            if let Some(RuleToken::Word("interface")) = cursor.peek_second() {
                // handled below as the class kind
            } else {
                cursor.next();
                match cursor.next() {
                    Some(RuleToken::Word(name)) => {
                        spec.annotation = Some(ClassNamePattern::new(name));
                    }
                    _ => {
                        self.rule_error(cursor, origin, "expected annotation name after `@`");
                        return None;
                    }
                }
            }
        }

        // Access flags and the class kind keyword.
        loop {
            match cursor.peek() {
                Some(RuleToken::Bang) => {
                    cursor.next();
                    match cursor.next() {
                        Some(RuleToken::Word(word)) => {
                            if let Some(kind) = class_kind_of(word) {
                                spec.class_type = kind;
                                spec.class_type_negated = true;
                                break;
                            }
                            match class_access_flag(word) {
                                Some(flag) => spec.access.forbidden |= flag,
                                None => {
                                    self.rule_error(
                                        cursor,
                                        origin,
                                        format!("unknown access modifier `{word}`"),
                                    );
                                    return None;
                                }
                            }
                        }
                        _ => {
                            self.rule_error(cursor, origin, "dangling `!`");
                            return None;
                        }
                    }
                }
                Some(RuleToken::At) => {
                    // `@interface`
                    cursor.next();
                    match cursor.next() {
                        Some(RuleToken::Word("interface")) => {
                            spec.class_type = ClassTypeFilter::Annotation;
                            break;
                        }
                        _ => {
                            self.rule_error(cursor, origin, "expected `interface` after `@`");
                            return None;
                        }
                    }
                }
                Some(RuleToken::Word(word)) => {
                    if let Some(kind) = class_kind_of(word) {
                        cursor.next();
                        spec.class_type = kind;
                        break;
                    }
                    match class_access_flag(word) {
                        Some(flag) => {
                            cursor.next();
                            spec.access.required |= flag;
                        }
                        None => {
                            self.rule_error(
                                cursor,
                                origin,
                                format!("expected `class`, `interface` or `enum`, found `{word}`"),
                            );
                            return None;
                        }
                    }
                }
                _ => {
                    self.rule_error(cursor, origin, "expected a class specification");
                    return None;
                }
            }
        }

        // Class name.
        match cursor.next() {
            Some(RuleToken::Word(name)) => spec.name = ClassNamePattern::new(name),
            _ => {
                self.rule_error(cursor, origin, "expected a class name");
                return None;
            }
        }

        // Inheritance selector.
        if let Some(RuleToken::Word(word @ ("extends" | "implements"))) = cursor.peek() {
            let _ = word;
            cursor.next();
            // optional annotation on the supertype, ignored for matching
            if cursor.peek() == Some(RuleToken::At) {
                cursor.next();
                cursor.next();
            }
            match cursor.next() {
                Some(RuleToken::Word(name)) => spec.extends = Some(ClassNamePattern::new(name)),
                _ => {
                    self.rule_error(cursor, origin, "expected a supertype name");
                    return None;
                }
            }
        }

        // Member block.
        if cursor.peek() == Some(RuleToken::LBrace) {
            cursor.next();
            while cursor.peek() != Some(RuleToken::RBrace) {
                if cursor.peek().is_none() {
                    self.rule_error(cursor, origin, "unterminated member block");
                    return None;
                }
                let member = self.parse_member_pattern(cursor, origin)?;
                spec.members.push(member);
            }
            cursor.next(); // consume `}`
        }

        Some(spec)
    }

    /// Parses one member pattern terminated by `;`.
    fn parse_member_pattern(
        &self,
        cursor: &mut Cursor<'_>,
        origin: &Origin,
    ) -> Option<MemberPattern> {
        let mut annotation = None;
        let mut access = AccessFilter::default();

        if cursor.peek() == Some(RuleToken::At) {
            cursor.next();
            match cursor.next() {
                Some(RuleToken::Word(name)) => annotation = Some(ClassNamePattern::new(name)),
                _ => {
                    self.rule_error(cursor, origin, "expected annotation name after `@`");
                    return None;
                }
            }
        }

        // Access flags until the first non-keyword word.
        let first = loop {
            match cursor.peek() {
                Some(RuleToken::Bang) => {
                    cursor.next();
                    match cursor.next() {
                        Some(RuleToken::Word(word)) => match member_access_flag(word) {
                            Some(flag) => access.forbidden |= flag,
                            None => {
                                self.rule_error(
                                    cursor,
                                    origin,
                                    format!("unknown access modifier `{word}`"),
                                );
                                return None;
                            }
                        },
                        _ => {
                            self.rule_error(cursor, origin, "dangling `!`");
                            return None;
                        }
                    }
                }
                Some(RuleToken::Word(word)) => match member_access_flag(word) {
                    Some(flag) => {
                        cursor.next();
                        access.required |= flag;
                    }
                    None => {
                        cursor.next();
                        break word;
                    }
                },
                _ => {
                    self.rule_error(cursor, origin, "expected a member pattern");
                    return None;
                }
            }
        };

        // Shorthand member selectors.
        let kind = match first {
            "*" if cursor.peek() == Some(RuleToken::Semi) => MemberPatternKind::AllMembers,
            "<fields>" => MemberPatternKind::AllFields,
            "<methods>" => MemberPatternKind::AllMethods,
            "<init>" | "<clinit>" => {
                let name = if first == "<init>" {
                    MemberNamePattern::Init
                } else {
                    MemberNamePattern::Clinit
                };
                let parameters = self.parse_parameters(cursor, origin)?;
                MemberPatternKind::Method {
                    return_type: TypePattern::Any,
                    name,
                    parameters,
                }
            }
            type_word => {
                let ty = type_pattern_of(type_word);
                let name_word = match cursor.next() {
                    Some(RuleToken::Word(word)) => word,
                    _ => {
                        self.rule_error(cursor, origin, "expected a member name");
                        return None;
                    }
                };
                let name = member_name_pattern_of(name_word);
                if cursor.peek() == Some(RuleToken::LParen) {
                    let parameters = self.parse_parameters(cursor, origin)?;
                    MemberPatternKind::Method {
                        return_type: ty,
                        name,
                        parameters,
                    }
                } else {
                    MemberPatternKind::Field { ty, name }
                }
            }
        };

        // Assumed value: `= value` for fields, `return value` for methods.
        let mut assumed_value = None;
        match cursor.peek() {
            Some(RuleToken::Equals) => {
                cursor.next();
                assumed_value = self.parse_value(cursor, origin);
            }
            Some(RuleToken::Word("return")) => {
                cursor.next();
                assumed_value = self.parse_value(cursor, origin);
            }
            _ => {}
        }

        match cursor.next() {
            Some(RuleToken::Semi) => Some(MemberPattern {
                annotation,
                access,
                kind,
                assumed_value,
            }),
            _ => {
                self.rule_error(cursor, origin, "expected `;` after member pattern");
                None
            }
        }
    }

    fn parse_parameters(
        &self,
        cursor: &mut Cursor<'_>,
        origin: &Origin,
    ) -> Option<ParametersPattern> {
        if cursor.next() != Some(RuleToken::LParen) {
            self.rule_error(cursor, origin, "expected `(`");
            return None;
        }
        if cursor.peek() == Some(RuleToken::RParen) {
            cursor.next();
            return Some(ParametersPattern::Exact(Vec::new()));
        }
        if let Some(RuleToken::Word("...")) = cursor.peek() {
            cursor.next();
            if cursor.next() != Some(RuleToken::RParen) {
                self.rule_error(cursor, origin, "expected `)` after `...`");
                return None;
            }
            return Some(ParametersPattern::Any);
        }
        let mut parameters = Vec::new();
        loop {
            match cursor.next() {
                Some(RuleToken::Word(word)) => parameters.push(type_pattern_of(word)),
                _ => {
                    self.rule_error(cursor, origin, "expected a parameter type");
                    return None;
                }
            }
            match cursor.next() {
                Some(RuleToken::Comma) => {}
                Some(RuleToken::RParen) => break,
                _ => {
                    self.rule_error(cursor, origin, "expected `,` or `)`");
                    return None;
                }
            }
        }
        Some(ParametersPattern::Exact(parameters))
    }

    fn parse_value(&self, cursor: &mut Cursor<'_>, origin: &Origin) -> Option<i64> {
        match cursor.next() {
            Some(RuleToken::Word("true")) => Some(1),
            Some(RuleToken::Word("false")) => Some(0),
            Some(RuleToken::Word(word)) => match word.parse::<i64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    self.rule_error(cursor, origin, format!("invalid assumed value `{word}`"));
                    None
                }
            },
            _ => {
                self.rule_error(cursor, origin, "expected an assumed value");
                None
            }
        }
    }

    fn optional_path(&self, cursor: &mut Cursor<'_>) -> Option<PathBuf> {
        match cursor.peek() {
            Some(RuleToken::Word(path)) => {
                cursor.next();
                Some(PathBuf::from(path))
            }
            Some(RuleToken::Quoted(path)) => {
                cursor.next();
                Some(PathBuf::from(path))
            }
            _ => None,
        }
    }

    fn optional_package(&self, cursor: &mut Cursor<'_>) -> String {
        match cursor.peek() {
            Some(RuleToken::Quoted(package)) => {
                cursor.next();
                package.to_string()
            }
            Some(RuleToken::Word(package)) => {
                cursor.next();
                package.to_string()
            }
            _ => String::new(),
        }
    }

    fn rule_error(&self, cursor: &Cursor<'_>, origin: &Origin, message: impl Into<String>) {
        self.reporter.report(crate::diagnostics::Diagnostic {
            severity: crate::diagnostics::Severity::Error,
            kind: DiagnosticKind::InvalidRule,
            origin: origin.clone(),
            message: format!("line {}: {}", cursor.current_line(), message.into()),
        });
    }
}

fn class_kind_of(word: &str) -> Option<ClassTypeFilter> {
    match word {
        "class" => Some(ClassTypeFilter::Any),
        "interface" => Some(ClassTypeFilter::Interface),
        "enum" => Some(ClassTypeFilter::Enum),
        _ => None,
    }
}

fn class_access_flag(word: &str) -> Option<AccessFlags> {
    match word {
        "public" => Some(AccessFlags::PUBLIC),
        "final" => Some(AccessFlags::FINAL),
        "abstract" => Some(AccessFlags::ABSTRACT),
        "synthetic" => Some(AccessFlags::SYNTHETIC),
        _ => None,
    }
}

fn member_access_flag(word: &str) -> Option<AccessFlags> {
    match word {
        "public" => Some(AccessFlags::PUBLIC),
        "private" => Some(AccessFlags::PRIVATE),
        "protected" => Some(AccessFlags::PROTECTED),
        "static" => Some(AccessFlags::STATIC),
        "final" => Some(AccessFlags::FINAL),
        "synchronized" => Some(AccessFlags::SYNCHRONIZED),
        "volatile" => Some(AccessFlags::VOLATILE),
        "transient" => Some(AccessFlags::TRANSIENT),
        "native" => Some(AccessFlags::NATIVE),
        "abstract" => Some(AccessFlags::ABSTRACT),
        "strictfp" => Some(AccessFlags::STRICT),
        "synthetic" => Some(AccessFlags::SYNTHETIC),
        "bridge" => Some(AccessFlags::BRIDGE),
        "varargs" => Some(AccessFlags::VARARGS),
        _ => None,
    }
}

fn type_pattern_of(word: &str) -> TypePattern {
    match word {
        "***" => TypePattern::Any,
        "%" => TypePattern::AnyPrimitive,
        _ => TypePattern::Name(ClassNamePattern::new(word)),
    }
}

fn member_name_pattern_of(word: &str) -> MemberNamePattern {
    match word {
        "<init>" => MemberNamePattern::Init,
        "<clinit>" => MemberNamePattern::Clinit,
        _ => MemberNamePattern::Name(word.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaking::rules::KeepKind;

    fn parse(text: &str) -> (ProguardConfig, Reporter) {
        let reporter = Reporter::new();
        let parser = RuleParser::new(reporter.clone());
        let mut config = ProguardConfig::default();
        parser.parse_text(text, &mut config).unwrap();
        (config, reporter)
    }

    #[test]
    fn parses_basic_keep_rule() {
        let (config, reporter) = parse("-keep class com.example.Main { void m1(); }");
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        assert_eq!(config.rules.len(), 1);
        let ProguardRule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(rule.kind, KeepKind::Keep);
        assert!(rule.spec.name.matches("com.example.Main"));
        assert_eq!(rule.spec.members.len(), 1);
    }

    #[test]
    fn parses_modifiers_and_extends() {
        let (config, reporter) =
            parse("-keep,allowobfuscation,allowshrinking class * extends com.example.Base");
        assert!(reporter.is_empty());
        let ProguardRule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert!(rule.modifiers.allow_obfuscation);
        assert!(rule.modifiers.allow_shrinking);
        assert!(rule.spec.extends.as_ref().unwrap().matches("com.example.Base"));
    }

    #[test]
    fn parses_member_shorthands_and_init() {
        let (config, reporter) = parse(
            "-keepclassmembers class ** { <fields>; <init>(java.lang.String); public static <methods>; }",
        );
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        let ProguardRule::Keep(rule) = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(rule.spec.members.len(), 3);
        assert!(matches!(
            rule.spec.members[0].kind,
            MemberPatternKind::AllFields
        ));
        assert!(matches!(
            rule.spec.members[1].kind,
            MemberPatternKind::Method {
                name: MemberNamePattern::Init,
                ..
            }
        ));
    }

    #[test]
    fn parses_if_rule_and_outputs() {
        let (config, reporter) = parse(
            "-if class com.example.Config -keep class com.example.Impl\n-printmapping out/mapping.txt\n-repackageclasses 'pkg'",
        );
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        assert!(matches!(config.rules[0], ProguardRule::If { .. }));
        assert_eq!(
            config.print_mapping,
            Some(Some(PathBuf::from("out/mapping.txt")))
        );
        assert_eq!(config.repackage, RepackagePolicy::All("pkg".to_string()));
    }

    #[test]
    fn unknown_directive_is_collected_not_fatal() {
        let (config, reporter) = parse("-bogus thing\n-keep class A");
        assert!(reporter.has_errors());
        // the parser resynchronized and still parsed the keep rule
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn assume_values_parse() {
        let (config, reporter) =
            parse("-assumevalues class com.example.Flags { boolean DEBUG return false; }");
        assert!(reporter.is_empty(), "{:?}", reporter.sorted());
        let ProguardRule::AssumeValues(spec) = &config.rules[0] else {
            panic!("expected assumevalues");
        };
        assert_eq!(spec.members[0].assumed_value, Some(0));
    }
}
