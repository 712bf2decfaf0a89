//! The proguard-compatible mapping format.
//!
//! Each section begins `<original-class> -> <renamed-class>:` followed by
//! indented member lines `<original-return> <original-name>([params])
//! [:<line-ranges>] -> <renamed-name>`. Line ranges are either `a:b` (an
//! original line span) or `a:b:c:d` (original plus inlined caller ranges).
//! Synthetic classes carry a trailing `# synthesized from …` comment on
//! their header line.
//!
//! The same model is used in both directions: the minifier emits it, and
//! `-applymapping` parses it back as a renaming seed. Parsing a written
//! mapping yields a lens semantically equal to the minifier's.

use rustc_hash::FxHashMap;

use crate::graph::references::java_name_to_descriptor;
use crate::graph::{DexItemFactory, DexType, GraphLens, PinnedItems};
use crate::output::StringConsumer;
use crate::{Error, Result};

/// Line-range annotation on a method mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRanges {
    /// `a:b`: the original line span.
    Original(u32, u32),
    /// `a:b:c:d`: original span plus the inlined caller span.
    Inlined(u32, u32, u32, u32),
}

impl std::fmt::Display for LineRanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineRanges::Original(a, b) => write!(f, "{a}:{b}"),
            LineRanges::Inlined(a, b, c, d) => write!(f, "{a}:{b}:{c}:{d}"),
        }
    }
}

/// One renamed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Original field type, dotted.
    pub field_type: String,
    /// Original name.
    pub original: String,
    /// New name.
    pub renamed: String,
}

/// One renamed method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMapping {
    /// Original return type, dotted.
    pub return_type: String,
    /// Original name.
    pub original: String,
    /// Original parameter types, dotted.
    pub parameters: Vec<String>,
    /// Optional line-range annotation.
    pub line_ranges: Option<LineRanges>,
    /// New name.
    pub renamed: String,
}

/// One renamed class with its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassMapping {
    /// Original class name, dotted.
    pub original: String,
    /// New class name, dotted.
    pub renamed: String,
    /// The `# synthesized from …` annotation, when present.
    pub synthesized_from: Option<String>,
    /// Field mappings.
    pub fields: Vec<FieldMapping>,
    /// Method mappings.
    pub methods: Vec<MethodMapping>,
}

/// A full mapping artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProguardMapping {
    /// Class sections in file order.
    pub classes: Vec<ClassMapping>,
}

impl ProguardMapping {
    /// Writes the mapping through a string consumer.
    ///
    /// # Errors
    ///
    /// Propagates consumer failures.
    pub fn write(&self, consumer: &mut dyn StringConsumer) -> Result<()> {
        for class in &self.classes {
            let header = match &class.synthesized_from {
                Some(source) => format!(
                    "{} -> {}: # synthesized from {}",
                    class.original, class.renamed, source
                ),
                None => format!("{} -> {}:", class.original, class.renamed),
            };
            consumer.accept(&header)?;
            for field in &class.fields {
                consumer.accept(&format!(
                    "    {} {} -> {}",
                    field.field_type, field.original, field.renamed
                ))?;
            }
            for method in &class.methods {
                let ranges = method
                    .line_ranges
                    .as_ref()
                    .map(|ranges| format!(":{ranges}"))
                    .unwrap_or_default();
                consumer.accept(&format!(
                    "    {} {}({}){} -> {}",
                    method.return_type,
                    method.original,
                    method.parameters.join(","),
                    ranges,
                    method.renamed
                ))?;
            }
        }
        Ok(())
    }

    /// Parses a mapping from its textual form.
    ///
    /// # Errors
    ///
    /// [`Error::RuleConflict`] on malformed lines (the mapping is user input
    /// through `-applymapping`).
    pub fn parse(text: &str) -> Result<ProguardMapping> {
        let mut mapping = ProguardMapping::default();
        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            if raw_line.trim().is_empty() || raw_line.trim_start().starts_with('#') {
                continue;
            }
            if raw_line.starts_with(' ') || raw_line.starts_with('\t') {
                let class = mapping.classes.last_mut().ok_or_else(|| {
                    Error::RuleConflict(format!(
                        "mapping line {line_number}: member line before any class section"
                    ))
                })?;
                parse_member_line(raw_line.trim(), line_number, class)?;
            } else {
                mapping.classes.push(parse_class_header(raw_line, line_number)?);
            }
        }
        Ok(mapping)
    }

    /// Converts the mapping into a renaming lens.
    ///
    /// Every target reference is fully rewritten (renamed holder, renamed
    /// component types), so the lens is semantically equal to the one the
    /// minifier produces for the same renaming.
    ///
    /// # Errors
    ///
    /// [`Error::RuleConflict`] when two originals map to the same new name in
    /// one namespace, or a pinned item is renamed.
    pub fn to_lens(
        &self,
        factory: &DexItemFactory,
        previous: &GraphLens,
        pinned: &PinnedItems,
    ) -> Result<GraphLens> {
        // class map first so member target types can be rewritten
        let mut class_map: FxHashMap<String, String> = FxHashMap::default();
        let mut renamed_seen: FxHashMap<String, String> = FxHashMap::default();
        for class in &self.classes {
            if let Some(previous_original) =
                renamed_seen.insert(class.renamed.clone(), class.original.clone())
            {
                if previous_original != class.original {
                    return Err(Error::RuleConflict(format!(
                        "classes `{}` and `{}` both map to `{}`",
                        previous_original, class.original, class.renamed
                    )));
                }
            }
            class_map.insert(class.original.clone(), class.renamed.clone());
        }

        let rename_type_name = |name: &str| -> String {
            // arrays rename by their base element
            let (base, suffix) = match name.find("[]") {
                Some(index) => (&name[..index], &name[index..]),
                None => (name, ""),
            };
            match class_map.get(base) {
                Some(renamed) => format!("{renamed}{suffix}"),
                None => name.to_string(),
            }
        };

        let intern = |name: &str| -> Result<DexType> {
            factory.create_type(&java_name_to_descriptor(name))
        };

        let mut builder = previous.nest();
        for class in &self.classes {
            let original_type = intern(&class.original)?;
            let renamed_type = intern(&class.renamed)?;
            if pinned.contains_type(&original_type) && original_type != renamed_type {
                return Err(Error::RuleConflict(format!(
                    "cannot rename kept class `{}`",
                    class.original
                )));
            }
            builder.map_type(original_type.clone(), renamed_type.clone());

            let mut field_targets: FxHashMap<(String, String), String> = FxHashMap::default();
            for field in &class.fields {
                let key = (field.renamed.clone(), field.field_type.clone());
                if let Some(previous_original) = field_targets.insert(key, field.original.clone()) {
                    if previous_original != field.original {
                        return Err(Error::RuleConflict(format!(
                            "fields `{}` and `{}` of `{}` both map to `{}`",
                            previous_original, field.original, class.original, field.renamed
                        )));
                    }
                }
                let original_field = factory.create_field(
                    original_type.clone(),
                    factory.create_string(&field.original),
                    intern(&field.field_type)?,
                );
                if pinned.contains_field(&original_field) && field.original != field.renamed {
                    return Err(Error::RuleConflict(format!(
                        "cannot rename kept field `{}.{}`",
                        class.original, field.original
                    )));
                }
                let renamed_field = factory.create_field(
                    renamed_type.clone(),
                    factory.create_string(&field.renamed),
                    intern(&rename_type_name(&field.field_type))?,
                );
                builder.map_field(original_field, renamed_field);
            }

            let mut method_targets: FxHashMap<(String, String), String> = FxHashMap::default();
            for method in &class.methods {
                let signature = format!("({})", method.parameters.join(","));
                let key = (method.renamed.clone(), signature);
                if let Some(previous_original) = method_targets.insert(key, method.original.clone())
                {
                    if previous_original != method.original {
                        return Err(Error::RuleConflict(format!(
                            "methods `{}` and `{}` of `{}` both map to `{}`",
                            previous_original, method.original, class.original, method.renamed
                        )));
                    }
                }
                let original_parameters = method
                    .parameters
                    .iter()
                    .map(|parameter| intern(parameter))
                    .collect::<Result<Vec<_>>>()?;
                let original_method = factory.create_method(
                    original_type.clone(),
                    factory.create_string(&method.original),
                    factory.create_proto(intern(&method.return_type)?, original_parameters),
                );
                if pinned.contains_method(&original_method) && method.original != method.renamed {
                    return Err(Error::RuleConflict(format!(
                        "cannot rename kept method `{}.{}`",
                        class.original, method.original
                    )));
                }
                let renamed_parameters = method
                    .parameters
                    .iter()
                    .map(|parameter| intern(&rename_type_name(parameter)))
                    .collect::<Result<Vec<_>>>()?;
                let renamed_method = factory.create_method(
                    renamed_type.clone(),
                    factory.create_string(&method.renamed),
                    factory.create_proto(
                        intern(&rename_type_name(&method.return_type))?,
                        renamed_parameters,
                    ),
                );
                builder.map_method(original_method, renamed_method);
            }
        }
        Ok(builder.build(pinned))
    }
}

fn parse_class_header(line: &str, line_number: usize) -> Result<ClassMapping> {
    let (body, synthesized_from) = match line.find('#') {
        Some(index) => {
            let comment = line[index + 1..].trim();
            let source = comment
                .strip_prefix("synthesized from")
                .map(|rest| rest.trim().to_string());
            (line[..index].trim(), source)
        }
        None => (line.trim(), None),
    };
    let Some(body) = body.strip_suffix(':') else {
        return Err(Error::RuleConflict(format!(
            "mapping line {line_number}: class header must end with `:`"
        )));
    };
    let Some((original, renamed)) = body.split_once(" -> ") else {
        return Err(Error::RuleConflict(format!(
            "mapping line {line_number}: expected `original -> renamed:`"
        )));
    };
    Ok(ClassMapping {
        original: original.trim().to_string(),
        renamed: renamed.trim().to_string(),
        synthesized_from,
        fields: Vec::new(),
        methods: Vec::new(),
    })
}

fn parse_member_line(line: &str, line_number: usize, class: &mut ClassMapping) -> Result<()> {
    let Some((left, renamed)) = line.rsplit_once(" -> ") else {
        return Err(Error::RuleConflict(format!(
            "mapping line {line_number}: expected `signature -> renamed`"
        )));
    };
    let renamed = renamed.trim().to_string();
    let left = left.trim();
    let Some((return_or_field_type, rest)) = left.split_once(' ') else {
        return Err(Error::RuleConflict(format!(
            "mapping line {line_number}: expected `type name`"
        )));
    };
    if let Some(paren) = rest.find('(') {
        let name = rest[..paren].to_string();
        let Some(close) = rest.find(')') else {
            return Err(Error::RuleConflict(format!(
                "mapping line {line_number}: unterminated parameter list"
            )));
        };
        let parameters: Vec<String> = rest[paren + 1..close]
            .split(',')
            .map(str::trim)
            .filter(|parameter| !parameter.is_empty())
            .map(str::to_string)
            .collect();
        let line_ranges = parse_line_ranges(rest[close + 1..].trim(), line_number)?;
        class.methods.push(MethodMapping {
            return_type: return_or_field_type.to_string(),
            original: name,
            parameters,
            line_ranges,
            renamed,
        });
    } else {
        class.fields.push(FieldMapping {
            field_type: return_or_field_type.to_string(),
            original: rest.trim().to_string(),
            renamed,
        });
    }
    Ok(())
}

fn parse_line_ranges(text: &str, line_number: usize) -> Result<Option<LineRanges>> {
    if text.is_empty() {
        return Ok(None);
    }
    let Some(text) = text.strip_prefix(':') else {
        return Err(Error::RuleConflict(format!(
            "mapping line {line_number}: unexpected trailer `{text}`"
        )));
    };
    let numbers = text
        .split(':')
        .map(|part| part.trim().parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            Error::RuleConflict(format!(
                "mapping line {line_number}: invalid line range `{text}`"
            ))
        })?;
    match numbers.as_slice() {
        [a, b] => Ok(Some(LineRanges::Original(*a, *b))),
        [a, b, c, d] => Ok(Some(LineRanges::Inlined(*a, *b, *c, *d))),
        _ => Err(Error::RuleConflict(format!(
            "mapping line {line_number}: invalid line range `{text}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferConsumer;

    fn sample() -> ProguardMapping {
        ProguardMapping {
            classes: vec![ClassMapping {
                original: "com.example.Main".to_string(),
                renamed: "a.a".to_string(),
                synthesized_from: None,
                fields: vec![FieldMapping {
                    field_type: "int".to_string(),
                    original: "count".to_string(),
                    renamed: "a".to_string(),
                }],
                methods: vec![MethodMapping {
                    return_type: "void".to_string(),
                    original: "main".to_string(),
                    parameters: vec!["java.lang.String[]".to_string()],
                    line_ranges: None,
                    renamed: "a".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn round_trips_through_text() {
        let mapping = sample();
        let mut buffer = BufferConsumer::new();
        mapping.write(&mut buffer).unwrap();
        let parsed = ProguardMapping::parse(&buffer.contents()).unwrap();
        assert_eq!(parsed, mapping);
    }

    #[test]
    fn parses_line_ranges_and_synthetic_comments() {
        let text = "com.example.Main$$Lambda$0 -> b: # synthesized from com.example.Main\n    void run():1:2 -> a\n";
        let parsed = ProguardMapping::parse(text).unwrap();
        assert_eq!(
            parsed.classes[0].synthesized_from.as_deref(),
            Some("com.example.Main")
        );
        assert_eq!(
            parsed.classes[0].methods[0].line_ranges,
            Some(LineRanges::Original(1, 2))
        );
    }

    #[test]
    fn conflicting_targets_are_rejected() {
        let factory = DexItemFactory::new();
        let mapping = ProguardMapping {
            classes: vec![ClassMapping {
                original: "com.example.Main".to_string(),
                renamed: "a.a".to_string(),
                synthesized_from: None,
                fields: Vec::new(),
                methods: vec![
                    MethodMapping {
                        return_type: "void".to_string(),
                        original: "m1".to_string(),
                        parameters: Vec::new(),
                        line_ranges: None,
                        renamed: "x".to_string(),
                    },
                    MethodMapping {
                        return_type: "void".to_string(),
                        original: "m2".to_string(),
                        parameters: Vec::new(),
                        line_ranges: None,
                        renamed: "x".to_string(),
                    },
                ],
            }],
        };
        let result = mapping.to_lens(
            &factory,
            &GraphLens::Identity,
            &PinnedItems::default(),
        );
        assert!(matches!(result, Err(Error::RuleConflict(_))));
    }
}
