//! The application: every class known to one compilation.
//!
//! Program classes are held in an ordered concurrent map keyed by type
//! descriptor, so readers can populate the application from multiple worker
//! threads while every consumer that needs deterministic output simply
//! iterates in key order. Classpath and library classes are held the same
//! way; [`crate::graph::AppInfo`] gives uniform lookup across all three.

use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::diagnostics::Origin;
use crate::error::invalid_input_error;
use crate::graph::definitions::{ClassKind, DexClass, DexClassRc, FeatureId};
use crate::graph::factory::DexItemFactory;
use crate::graph::references::{DexString, DexType};
use crate::Result;

/// The conventional services directory prefix in program data entries.
pub const SERVICE_DIRECTORY: &str = "META-INF/services/";

/// A non-class resource entry shipped with the program.
#[derive(Debug, Clone)]
pub struct DataEntry {
    /// The entry name, e.g. `META-INF/services/com.example.Service`.
    pub name: String,
    /// Raw contents.
    pub contents: Vec<u8>,
    /// The feature split the entry ships in.
    pub feature: FeatureId,
    /// Where the entry was read from.
    pub origin: Origin,
}

/// The opaque reader interface the core consumes.
///
/// Classfile and Dex parsing live outside the core; a provider decodes its
/// container format and hands fully-formed definitions to the visitor,
/// interning every name through the supplied factory.
pub trait InputProvider {
    /// Visits every program class.
    ///
    /// # Errors
    ///
    /// Propagates reader failures and visitor rejections.
    fn each_program_class(
        &self,
        factory: &DexItemFactory,
        visitor: &mut dyn FnMut(DexClass) -> Result<()>,
    ) -> Result<()>;

    /// Visits every classpath class.
    ///
    /// # Errors
    ///
    /// Propagates reader failures and visitor rejections.
    fn each_classpath_class(
        &self,
        factory: &DexItemFactory,
        visitor: &mut dyn FnMut(DexClass) -> Result<()>,
    ) -> Result<()>;

    /// Visits every library class.
    ///
    /// # Errors
    ///
    /// Propagates reader failures and visitor rejections.
    fn each_library_class(
        &self,
        factory: &DexItemFactory,
        visitor: &mut dyn FnMut(DexClass) -> Result<()>,
    ) -> Result<()>;

    /// Visits every data entry.
    ///
    /// # Errors
    ///
    /// Propagates reader failures and visitor rejections.
    fn each_data_entry(&self, visitor: &mut dyn FnMut(DataEntry) -> Result<()>) -> Result<()>;
}

/// Every class and data entry known to one compilation.
pub struct DexApplication {
    /// The item factory all references were interned through.
    pub factory: Arc<DexItemFactory>,
    program: SkipMap<DexString, DexClassRc>,
    classpath: SkipMap<DexString, DexClassRc>,
    library: SkipMap<DexString, DexClassRc>,
    data_entries: Vec<DataEntry>,
}

impl DexApplication {
    /// Starts an application builder over the given factory.
    #[must_use]
    pub fn builder(factory: Arc<DexItemFactory>) -> DexApplicationBuilder {
        DexApplicationBuilder {
            app: DexApplication {
                factory,
                program: SkipMap::new(),
                classpath: SkipMap::new(),
                library: SkipMap::new(),
                data_entries: Vec::new(),
            },
        }
    }

    /// The program class defining `ty`, if any.
    #[must_use]
    pub fn program_definition_for(&self, ty: &DexType) -> Option<DexClassRc> {
        self.program
            .get(ty.descriptor())
            .map(|entry| entry.value().clone())
    }

    /// The definition of `ty`, searching program, then classpath, then
    /// library classes.
    #[must_use]
    pub fn definition_for(&self, ty: &DexType) -> Option<DexClassRc> {
        let descriptor = ty.descriptor();
        for map in [&self.program, &self.classpath, &self.library] {
            if let Some(entry) = map.get(descriptor) {
                return Some(entry.value().clone());
            }
        }
        None
    }

    /// Program classes in descriptor order.
    #[must_use]
    pub fn program_classes(&self) -> Vec<DexClassRc> {
        self.program
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Classpath classes in descriptor order.
    #[must_use]
    pub fn classpath_classes(&self) -> Vec<DexClassRc> {
        self.classpath
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Library classes in descriptor order.
    #[must_use]
    pub fn library_classes(&self) -> Vec<DexClassRc> {
        self.library
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// All classes in descriptor order within each kind.
    #[must_use]
    pub fn all_classes(&self) -> Vec<DexClassRc> {
        let mut all = self.program_classes();
        all.extend(self.classpath_classes());
        all.extend(self.library_classes());
        all
    }

    /// Number of program classes.
    #[must_use]
    pub fn program_class_count(&self) -> usize {
        self.program.len()
    }

    /// The data entries read with the program.
    #[must_use]
    pub fn data_entries(&self) -> &[DataEntry] {
        &self.data_entries
    }

    /// Adds a synthesized program class (lambda accessor classes).
    ///
    /// Synthesized classes are first-class program classes; the map is
    /// append-only during a round, so concurrent readers are unaffected.
    pub fn add_synthesized_class(&self, class: DexClassRc) {
        self.program.insert(class.ty.descriptor().clone(), class);
    }

    /// Rebuilds the application with a different program class set, keeping
    /// factory, classpath, library and data entries.
    #[must_use]
    pub fn rebuilt_with_program(&self, classes: Vec<DexClassRc>) -> DexApplication {
        let program = SkipMap::new();
        for class in classes {
            program.insert(class.ty.descriptor().clone(), class);
        }
        DexApplication {
            factory: self.factory.clone(),
            program,
            classpath: clone_class_map(&self.classpath),
            library: clone_class_map(&self.library),
            data_entries: self.data_entries.clone(),
        }
    }
}

fn clone_class_map(map: &SkipMap<DexString, DexClassRc>) -> SkipMap<DexString, DexClassRc> {
    let clone = SkipMap::new();
    for entry in map.iter() {
        clone.insert(entry.key().clone(), entry.value().clone());
    }
    clone
}

/// Accumulates classes and data entries into a [`DexApplication`].
pub struct DexApplicationBuilder {
    app: DexApplication,
}

impl DexApplicationBuilder {
    /// Adds a class of any kind.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidInput`] when a class of the same kind and type
    /// was already added, or when the definition fails validation.
    pub fn add_class(&mut self, class: DexClass) -> Result<()> {
        class.validate()?;
        let map = match class.kind {
            ClassKind::Program => &self.app.program,
            ClassKind::Classpath => &self.app.classpath,
            ClassKind::Library => &self.app.library,
        };
        let key = class.ty.descriptor().clone();
        if map.contains_key(&key) {
            return Err(invalid_input_error!(
                class.origin,
                "duplicate class {}",
                class.ty
            ));
        }
        map.insert(key, Arc::new(class));
        Ok(())
    }

    /// Adds a data entry.
    pub fn add_data_entry(&mut self, entry: DataEntry) {
        self.app.data_entries.push(entry);
    }

    /// Reads every class and data entry offered by the provider.
    ///
    /// # Errors
    ///
    /// Propagates reader failures and definition validation errors.
    pub fn read_from(&mut self, provider: &dyn InputProvider) -> Result<()> {
        let factory = self.app.factory.clone();
        provider.each_program_class(&factory, &mut |class| self.add_class(class))?;
        provider.each_classpath_class(&factory, &mut |class| self.add_class(class))?;
        provider.each_library_class(&factory, &mut |class| self.add_class(class))?;
        provider.each_data_entry(&mut |entry| {
            self.add_data_entry(entry);
            Ok(())
        })?;
        Ok(())
    }

    /// Finishes the build.
    #[must_use]
    pub fn build(self) -> DexApplication {
        self.app
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definitions::DexClassBuilder;

    #[test]
    fn duplicate_program_class_is_rejected() {
        let factory = Arc::new(DexItemFactory::new());
        let ty = factory.create_type("La/A;").unwrap();
        let object = factory.known.object_type.clone();
        let mut builder = DexApplication::builder(factory);

        let class = DexClassBuilder::new(ClassKind::Program, ty.clone())
            .superclass(object.clone())
            .build()
            .unwrap();
        builder.add_class(class).unwrap();

        let duplicate = DexClassBuilder::new(ClassKind::Program, ty)
            .superclass(object)
            .build()
            .unwrap();
        assert!(builder.add_class(duplicate).is_err());
    }

    #[test]
    fn program_classes_iterate_in_descriptor_order() {
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let mut builder = DexApplication::builder(factory.clone());
        for descriptor in ["Lc/C;", "La/A;", "Lb/B;"] {
            let ty = factory.create_type(descriptor).unwrap();
            let class = DexClassBuilder::new(ClassKind::Program, ty)
                .superclass(object.clone())
                .build()
                .unwrap();
            builder.add_class(class).unwrap();
        }
        let app = builder.build();
        let descriptors: Vec<String> = app
            .program_classes()
            .iter()
            .map(|class| class.ty.descriptor().as_str().to_string())
            .collect();
        assert_eq!(descriptors, ["La/A;", "Lb/B;", "Lc/C;"]);
    }
}
