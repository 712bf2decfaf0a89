//! The item factory: a single process-wide registry for one compilation.
//!
//! All names, descriptors, prototypes and member references pass through
//! [`DexItemFactory`], which guarantees that two references to the same
//! textual entity share identity. Identity is stable for the lifetime of one
//! compilation; the factory is discarded with it.
//!
//! The intern tables are concurrent maps with get-or-insert semantics, so
//! readers and tracing workers intern in parallel without coordination beyond
//! per-bucket locking.

use dashmap::DashMap;

use crate::graph::references::{DexField, DexMethod, DexProto, DexString, DexType};
use crate::{Error, Result};

/// Key for the proto intern table: identity-hashed components.
#[derive(PartialEq, Eq, Hash)]
struct ProtoKey(DexType, Box<[DexType]>);

/// Key for the field intern table.
#[derive(PartialEq, Eq, Hash)]
struct FieldKey(DexType, DexString, DexType);

/// Key for the method intern table.
#[derive(PartialEq, Eq, Hash)]
struct MethodKey(DexType, DexString, DexProto);

/// Interns names, descriptors, types and member references and assigns them
/// stable identity.
///
/// Every `create_*` call returns the canonical instance for its arguments.
/// The factory also materializes the well-known references (root object type,
/// boxed primitives, service loader, lambda metafactory, reflective entry
/// points) that the rest of the pipeline compares against by identity; see
/// [`KnownItems`].
pub struct DexItemFactory {
    strings: DashMap<Box<str>, DexString>,
    types: DashMap<DexString, DexType>,
    protos: DashMap<ProtoKey, DexProto>,
    fields: DashMap<FieldKey, DexField>,
    methods: DashMap<MethodKey, DexMethod>,
    /// Well-known references, materialized at construction.
    pub known: KnownItems,
}

impl DexItemFactory {
    /// Creates a factory with the well-known items materialized.
    #[must_use]
    pub fn new() -> Self {
        let strings = DashMap::new();
        let types = DashMap::new();
        let protos = DashMap::new();
        let fields = DashMap::new();
        let methods = DashMap::new();
        let mut factory = DexItemFactory {
            strings,
            types,
            protos,
            fields,
            methods,
            known: KnownItems::placeholder(),
        };
        factory.known = KnownItems::materialize(&factory);
        factory
    }

    /// Returns the canonical interned string for `text`.
    pub fn create_string(&self, text: &str) -> DexString {
        if let Some(existing) = self.strings.get(text) {
            return existing.clone();
        }
        self.strings
            .entry(Box::from(text))
            .or_insert_with(|| DexString::new(text))
            .clone()
    }

    /// Returns the canonical interned type for `descriptor`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] when the descriptor is syntactically
    /// malformed.
    pub fn create_type(&self, descriptor: &str) -> Result<DexType> {
        if !is_valid_type_descriptor(descriptor) {
            return Err(Error::InvalidDescriptor(descriptor.to_string()));
        }
        Ok(self.intern_type(descriptor))
    }

    /// Interns a descriptor known to be well formed.
    fn intern_type(&self, descriptor: &str) -> DexType {
        let key = self.create_string(descriptor);
        if let Some(existing) = self.types.get(&key) {
            return existing.clone();
        }
        let element = descriptor
            .strip_prefix('[')
            .map(|rest| self.intern_type(rest));
        self.types
            .entry(key.clone())
            .or_insert_with(|| DexType::new(key, element))
            .clone()
    }

    /// Returns the canonical prototype for the return type and parameters.
    pub fn create_proto(&self, return_type: DexType, parameters: Vec<DexType>) -> DexProto {
        let key = ProtoKey(return_type.clone(), parameters.clone().into_boxed_slice());
        if let Some(existing) = self.protos.get(&key) {
            return existing.clone();
        }
        self.protos
            .entry(key)
            .or_insert_with(|| DexProto::new(return_type, parameters))
            .clone()
    }

    /// Returns the canonical field reference for holder, name and type.
    pub fn create_field(&self, holder: DexType, name: DexString, field_type: DexType) -> DexField {
        let key = FieldKey(holder.clone(), name.clone(), field_type.clone());
        if let Some(existing) = self.fields.get(&key) {
            return existing.clone();
        }
        self.fields
            .entry(key)
            .or_insert_with(|| DexField::new(holder, name, field_type))
            .clone()
    }

    /// Returns the canonical method reference for holder, name and prototype.
    pub fn create_method(&self, holder: DexType, name: DexString, proto: DexProto) -> DexMethod {
        let key = MethodKey(holder.clone(), name.clone(), proto.clone());
        if let Some(existing) = self.methods.get(&key) {
            return existing.clone();
        }
        self.methods
            .entry(key)
            .or_insert_with(|| DexMethod::new(holder, name, proto))
            .clone()
    }

    /// Convenience: interns a type from its dotted Java name.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDescriptor`] when the name does not form a valid
    /// descriptor.
    pub fn create_type_from_java_name(&self, java_name: &str) -> Result<DexType> {
        let descriptor = crate::graph::references::java_name_to_descriptor(java_name);
        self.create_type(&descriptor)
    }

    /// Number of interned types, for diagnostics.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

impl Default for DexItemFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a single type descriptor.
fn is_valid_type_descriptor(descriptor: &str) -> bool {
    let bytes = descriptor.as_bytes();
    match bytes.first() {
        Some(b'V' | b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D') => bytes.len() == 1,
        Some(b'[') => is_valid_type_descriptor(&descriptor[1..]) && &descriptor[1..] != "V",
        Some(b'L') => {
            if !descriptor.ends_with(';') || descriptor.len() < 3 {
                return false;
            }
            let body = &descriptor[1..descriptor.len() - 1];
            !body.starts_with('/')
                && !body.ends_with('/')
                && !body.contains("//")
                && body.chars().all(|c| {
                    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '/' | '-')
                })
        }
        _ => false,
    }
}

/// Well-known references that other components compare against by identity.
///
/// Materialized once per factory; the descriptors are compile-time constants
/// and cannot be malformed.
pub struct KnownItems {
    /// `java.lang.Object`, the only class with no superclass.
    pub object_type: DexType,
    /// `java.lang.String`.
    pub string_type: DexType,
    /// `java.lang.Class`.
    pub class_type: DexType,
    /// `java.lang.Enum`.
    pub enum_type: DexType,
    /// `java.lang.Throwable`.
    pub throwable_type: DexType,
    /// The boxed primitive types, `java.lang.Boolean` through `java.lang.Double`.
    pub boxed_types: Vec<DexType>,
    /// `java.util.ServiceLoader`.
    pub service_loader_type: DexType,
    /// `ServiceLoader.load(Class)`.
    pub service_loader_load: DexMethod,
    /// `java.lang.invoke.LambdaMetafactory`.
    pub lambda_metafactory_type: DexType,
    /// `java.lang.invoke.MethodHandle`.
    pub method_handle_type: DexType,
    /// The `kotlin.Metadata` annotation type.
    pub kotlin_metadata_type: DexType,
    /// `Class.forName(String)`.
    pub class_for_name: DexMethod,
    /// `Class.getDeclaredMethod(String, Class[])`.
    pub class_get_declared_method: DexMethod,
    /// `Class.getMethod(String, Class[])`.
    pub class_get_method: DexMethod,
    /// `Class.getDeclaredField(String)`.
    pub class_get_declared_field: DexMethod,
    /// `Class.getField(String)`.
    pub class_get_field: DexMethod,
    /// The interned `<init>` name.
    pub init_name: DexString,
    /// The interned `<clinit>` name.
    pub clinit_name: DexString,
    /// The interned `metafactory` name.
    pub metafactory_name: DexString,
    /// The interned `altMetafactory` name.
    pub alt_metafactory_name: DexString,
    /// The `()V` prototype of default constructors and class initializers.
    pub void_proto: DexProto,
}

impl KnownItems {
    /// An uninitialized placeholder used only while the factory constructs
    /// itself. Every field is immediately replaced by `materialize`.
    fn placeholder() -> Self {
        let object = DexType::new(DexString::new("Ljava/lang/Object;"), None);
        let name = DexString::new("<init>");
        let proto = DexProto::new(object.clone(), Vec::new());
        KnownItems {
            object_type: object.clone(),
            string_type: object.clone(),
            class_type: object.clone(),
            enum_type: object.clone(),
            throwable_type: object.clone(),
            boxed_types: Vec::new(),
            service_loader_type: object.clone(),
            service_loader_load: DexMethod::new(object.clone(), name.clone(), proto.clone()),
            lambda_metafactory_type: object.clone(),
            method_handle_type: object.clone(),
            kotlin_metadata_type: object.clone(),
            class_for_name: DexMethod::new(object.clone(), name.clone(), proto.clone()),
            class_get_declared_method: DexMethod::new(object.clone(), name.clone(), proto.clone()),
            class_get_method: DexMethod::new(object.clone(), name.clone(), proto.clone()),
            class_get_declared_field: DexMethod::new(object.clone(), name.clone(), proto.clone()),
            class_get_field: DexMethod::new(object.clone(), name.clone(), proto),
            init_name: name.clone(),
            clinit_name: name.clone(),
            metafactory_name: name.clone(),
            alt_metafactory_name: name,
            void_proto: DexProto::new(object, Vec::new()),
        }
    }

    fn materialize(factory: &DexItemFactory) -> Self {
        let object_type = factory.intern_type("Ljava/lang/Object;");
        let string_type = factory.intern_type("Ljava/lang/String;");
        let class_type = factory.intern_type("Ljava/lang/Class;");
        let void_type = factory.intern_type("V");
        let class_array = factory.intern_type("[Ljava/lang/Class;");
        let method_type = factory.intern_type("Ljava/lang/reflect/Method;");
        let field_type = factory.intern_type("Ljava/lang/reflect/Field;");
        let service_loader_type = factory.intern_type("Ljava/util/ServiceLoader;");

        let boxed_types = [
            "Ljava/lang/Boolean;",
            "Ljava/lang/Byte;",
            "Ljava/lang/Short;",
            "Ljava/lang/Character;",
            "Ljava/lang/Integer;",
            "Ljava/lang/Long;",
            "Ljava/lang/Float;",
            "Ljava/lang/Double;",
        ]
        .iter()
        .map(|descriptor| factory.intern_type(descriptor))
        .collect();

        let service_loader_load = factory.create_method(
            service_loader_type.clone(),
            factory.create_string("load"),
            factory.create_proto(service_loader_type.clone(), vec![class_type.clone()]),
        );
        let class_for_name = factory.create_method(
            class_type.clone(),
            factory.create_string("forName"),
            factory.create_proto(class_type.clone(), vec![string_type.clone()]),
        );
        let method_lookup_proto =
            factory.create_proto(method_type, vec![string_type.clone(), class_array]);
        let class_get_declared_method = factory.create_method(
            class_type.clone(),
            factory.create_string("getDeclaredMethod"),
            method_lookup_proto.clone(),
        );
        let class_get_method = factory.create_method(
            class_type.clone(),
            factory.create_string("getMethod"),
            method_lookup_proto,
        );
        let field_lookup_proto = factory.create_proto(field_type, vec![string_type.clone()]);
        let class_get_declared_field = factory.create_method(
            class_type.clone(),
            factory.create_string("getDeclaredField"),
            field_lookup_proto.clone(),
        );
        let class_get_field = factory.create_method(
            class_type.clone(),
            factory.create_string("getField"),
            field_lookup_proto,
        );

        KnownItems {
            object_type,
            string_type,
            class_type,
            enum_type: factory.intern_type("Ljava/lang/Enum;"),
            throwable_type: factory.intern_type("Ljava/lang/Throwable;"),
            boxed_types,
            service_loader_type,
            service_loader_load,
            lambda_metafactory_type: factory.intern_type("Ljava/lang/invoke/LambdaMetafactory;"),
            method_handle_type: factory.intern_type("Ljava/lang/invoke/MethodHandle;"),
            kotlin_metadata_type: factory.intern_type("Lkotlin/Metadata;"),
            class_for_name,
            class_get_declared_method,
            class_get_method,
            class_get_declared_field,
            class_get_field,
            init_name: factory.create_string("<init>"),
            clinit_name: factory.create_string("<clinit>"),
            metafactory_name: factory.create_string("metafactory"),
            alt_metafactory_name: factory.create_string("altMetafactory"),
            void_proto: factory.create_proto(void_type, Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_identical_instances() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("Lcom/example/Foo;").unwrap();
        let b = factory.create_type("Lcom/example/Foo;").unwrap();
        assert_eq!(a, b);

        let name = factory.create_string("bar");
        let proto = factory.create_proto(a.clone(), vec![b.clone()]);
        let m1 = factory.create_method(a.clone(), name.clone(), proto.clone());
        let m2 = factory.create_method(b, name, proto);
        assert_eq!(m1, m2);
    }

    #[test]
    fn distinct_descriptors_are_distinct() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("Lcom/example/Foo;").unwrap();
        let b = factory.create_type("Lcom/example/Bar;").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_descriptors_are_rejected() {
        let factory = DexItemFactory::new();
        assert!(factory.create_type("Lcom/example/Foo").is_err());
        assert!(factory.create_type("Q").is_err());
        assert!(factory.create_type("[V").is_err());
        assert!(factory.create_type("L;").is_err());
        assert!(factory.create_type("").is_err());
    }

    #[test]
    fn array_element_is_interned() {
        let factory = DexItemFactory::new();
        let array = factory.create_type("[Ljava/lang/String;").unwrap();
        let element = array.array_element().unwrap();
        assert_eq!(element, &factory.known.string_type);
    }

    #[test]
    fn known_items_share_identity_with_created_refs() {
        let factory = DexItemFactory::new();
        let object = factory.create_type("Ljava/lang/Object;").unwrap();
        assert_eq!(object, factory.known.object_type);
    }
}
