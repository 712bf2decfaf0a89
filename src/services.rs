//! Services discovered from `META-INF/services/` data entries.
//!
//! A mapping from a service-interface type to an ordered list of
//! implementation types, split by feature (base plus optional feature
//! splits). Read once at start-up from the program inputs; the reachability
//! stage consults it when it sees a recognized `ServiceLoader.load(...)`
//! call.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::diagnostics::{DiagnosticKind, Reporter};
use crate::graph::app::SERVICE_DIRECTORY;
use crate::graph::{DexApplication, DexType, FeatureId, GraphLens};

/// The service mapping of one compilation.
#[derive(Debug, Clone, Default)]
pub struct AppServices {
    /// Service type to per-feature implementation lists. `BTreeMap` keeps
    /// iteration deterministic for output and tests.
    services: BTreeMap<DexType, BTreeMap<FeatureId, Vec<DexType>>>,
}

impl AppServices {
    /// Decodes every `META-INF/services/` entry of the application.
    ///
    /// Entries are decoded as UTF-8; lines are trimmed, `#` starts a comment,
    /// blank lines are ignored, and remaining lines are validated as
    /// fully-qualified class names. Invalid entries produce warnings rather
    /// than failing the build.
    #[must_use]
    pub fn build(app: &DexApplication, reporter: &Reporter) -> Self {
        let mut services: BTreeMap<DexType, BTreeMap<FeatureId, Vec<DexType>>> = BTreeMap::new();
        for entry in app.data_entries() {
            let Some(service_name) = entry.name.strip_prefix(SERVICE_DIRECTORY) else {
                continue;
            };
            if !is_valid_java_type_name(service_name) {
                reporter.warning(
                    DiagnosticKind::InvalidInput,
                    entry.origin.clone(),
                    format!("invalid service name `{service_name}`"),
                );
                continue;
            }
            let Ok(service_type) = app.factory.create_type_from_java_name(service_name) else {
                continue;
            };
            let Ok(contents) = std::str::from_utf8(&entry.contents) else {
                reporter.warning(
                    DiagnosticKind::InvalidInput,
                    entry.origin.clone(),
                    format!("service entry `{}` is not UTF-8", entry.name),
                );
                continue;
            };
            let implementations = services
                .entry(service_type)
                .or_default()
                .entry(entry.feature)
                .or_default();
            for line in contents.lines() {
                let line = line.split('#').next().unwrap_or("").trim();
                if line.is_empty() {
                    continue;
                }
                if !is_valid_java_type_name(line) {
                    reporter.warning(
                        DiagnosticKind::InvalidInput,
                        entry.origin.clone(),
                        format!("invalid service implementation `{line}`"),
                    );
                    continue;
                }
                if let Ok(implementation) = app.factory.create_type_from_java_name(line) {
                    // only keep one of each implementation type
                    if !implementations.contains(&implementation) {
                        implementations.push(implementation);
                    }
                }
            }
        }
        AppServices { services }
    }

    /// Whether no services were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// All service interface types, in descriptor order.
    pub fn service_types(&self) -> impl Iterator<Item = &DexType> {
        self.services.keys()
    }

    /// Whether the given type is a known service interface.
    #[must_use]
    pub fn is_service_type(&self, ty: &DexType) -> bool {
        self.services.contains_key(ty)
    }

    /// Every implementation of a service, base feature first.
    #[must_use]
    pub fn implementations_for(&self, service: &DexType) -> Vec<DexType> {
        self.services
            .get(service)
            .map(|features| features.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// The mapping rewritten through a lens; service and implementation
    /// types both move.
    #[must_use]
    pub fn rewritten_with_lens(&self, lens: &GraphLens) -> AppServices {
        let mut services = BTreeMap::new();
        for (service, features) in &self.services {
            let mut rewritten_features = BTreeMap::new();
            for (feature, implementations) in features {
                rewritten_features.insert(
                    *feature,
                    implementations
                        .iter()
                        .map(|implementation| lens.lookup_type(implementation))
                        .collect(),
                );
            }
            services.insert(lens.lookup_type(service), rewritten_features);
        }
        AppServices { services }
    }

    /// A copy with removed classes dropped from both sides of the mapping.
    #[must_use]
    pub fn pruned_copy(&self, removed_classes: &FxHashSet<DexType>) -> AppServices {
        let mut services = BTreeMap::new();
        for (service, features) in &self.services {
            if removed_classes.contains(service) {
                continue;
            }
            let mut pruned_features = BTreeMap::new();
            for (feature, implementations) in features {
                let surviving: Vec<DexType> = implementations
                    .iter()
                    .filter(|implementation| !removed_classes.contains(implementation))
                    .cloned()
                    .collect();
                if !surviving.is_empty() {
                    pruned_features.insert(*feature, surviving);
                }
            }
            if !pruned_features.is_empty() {
                services.insert(service.clone(), pruned_features);
            }
        }
        AppServices { services }
    }
}

/// Validates a dotted, fully-qualified Java type name.
fn is_valid_java_type_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::diagnostics::Origin;
    use crate::graph::{DataEntry, DexItemFactory, BASE_FEATURE};

    #[test]
    fn parses_service_entries_with_comments_and_blanks() {
        let factory = Arc::new(DexItemFactory::new());
        let mut builder = DexApplication::builder(factory.clone());
        builder.add_data_entry(DataEntry {
            name: format!("{SERVICE_DIRECTORY}com.example.Service"),
            contents: b"# header\ncom.example.Impl\n\n  com.example.Other # trailing\n".to_vec(),
            feature: BASE_FEATURE,
            origin: Origin::memory("test"),
        });
        let app = builder.build();
        let reporter = Reporter::new();
        let services = AppServices::build(&app, &reporter);

        let service = factory.create_type("Lcom/example/Service;").unwrap();
        let implementations = services.implementations_for(&service);
        assert_eq!(implementations.len(), 2);
        assert_eq!(implementations[0].java_name(), "com.example.Impl");
        assert!(reporter.is_empty());
    }

    #[test]
    fn invalid_lines_warn_and_are_skipped() {
        let factory = Arc::new(DexItemFactory::new());
        let mut builder = DexApplication::builder(factory.clone());
        builder.add_data_entry(DataEntry {
            name: format!("{SERVICE_DIRECTORY}com.example.Service"),
            contents: b"not a class name!\ncom.example.Impl\n".to_vec(),
            feature: BASE_FEATURE,
            origin: Origin::memory("test"),
        });
        let app = builder.build();
        let reporter = Reporter::new();
        let services = AppServices::build(&app, &reporter);

        let service = factory.create_type("Lcom/example/Service;").unwrap();
        assert_eq!(services.implementations_for(&service).len(), 1);
        assert_eq!(reporter.len(), 1);
    }
}
