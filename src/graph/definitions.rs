//! Class, field and method definitions.
//!
//! A *definition* carries the body of a reference: access flags, annotations,
//! code, and the reference it implements. Definitions are created by readers
//! and survive until tree-pruning removes them; each is uniquely owned by
//! exactly one class and carries a back-reference to its holder type through
//! the member reference itself (`definition.holder == containing_class.ty`).
//!
//! Classes are classified as *program* (subject to optimization), *classpath*
//! (referenced but not rewritten), or *library* (runtime, never rewritten).

use std::sync::{Arc, OnceLock};

use crate::diagnostics::Origin;
use crate::error::invalid_input_error;
use crate::graph::code::Code;
use crate::graph::flags::AccessFlags;
use crate::graph::references::{DexField, DexMethod, DexString, DexType};
use crate::Result;

/// Shared handle to a class definition.
pub type DexClassRc = Arc<DexClass>;

/// How a class participates in the compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// Subject to shrinking, rewriting and renaming.
    Program,
    /// Referenced for resolution but never rewritten.
    Classpath,
    /// Part of the runtime; never rewritten, names reserved.
    Library,
}

/// Index of the feature split a program class belongs to. Zero is the base.
pub type FeatureId = u32;

/// The base (non-split) feature.
pub const BASE_FEATURE: FeatureId = 0;

/// A value inside an annotation.
#[derive(Debug, Clone)]
pub enum AnnotationValue {
    /// A string constant.
    String(DexString),
    /// A type constant.
    Type(DexType),
    /// A field reference (e.g. an enum constant).
    Field(DexField),
    /// A method reference.
    Method(DexMethod),
    /// An integral constant.
    Int(i64),
    /// A boolean constant.
    Bool(bool),
    /// An array of values.
    Array(Vec<AnnotationValue>),
    /// A nested annotation.
    Annotation(Box<DexAnnotation>),
}

/// An annotation instance on a class, field, method or parameter.
#[derive(Debug, Clone)]
pub struct DexAnnotation {
    /// The annotation interface type.
    pub annotation_type: DexType,
    /// Named element values.
    pub elements: Vec<(DexString, AnnotationValue)>,
}

/// An abstract runtime value, used by `-assumevalues` and by the
/// optimization info of fields and methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbstractValue {
    /// Nothing is known.
    Unknown,
    /// The value is always null.
    Null,
    /// The value is a single known integral constant.
    SingleNumber(i64),
    /// The value is a single known string constant.
    SingleString(DexString),
}

/// Optimization info attached to a method by later passes.
///
/// Populated (at most once) by the per-method optimization stage; the
/// reachability and naming stages only read it.
#[derive(Debug, Clone, Default)]
pub struct MethodOptimizationInfo {
    /// The abstract return value, when a single value is proven.
    pub abstract_return_value: Option<AbstractValue>,
    /// Bitmask of parameters proven non-null at every call site.
    pub non_null_parameters: u64,
    /// Whether inlining this method is forbidden.
    pub never_inline: bool,
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct DexEncodedField {
    /// The reference this definition implements.
    pub field: DexField,
    /// Access flags.
    pub flags: AccessFlags,
    /// Annotations on the field.
    pub annotations: Vec<DexAnnotation>,
    /// Static value, for static fields with a constant initializer.
    pub static_value: Option<AbstractValue>,
}

impl DexEncodedField {
    /// Creates a field definition with no annotations or static value.
    #[must_use]
    pub fn new(field: DexField, flags: AccessFlags) -> Self {
        DexEncodedField {
            field,
            flags,
            annotations: Vec::new(),
            static_value: None,
        }
    }

    /// Whether the field is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }
}

/// A method definition.
#[derive(Debug)]
pub struct DexEncodedMethod {
    /// The reference this definition implements.
    pub method: DexMethod,
    /// Access flags.
    pub flags: AccessFlags,
    /// Annotations on the method.
    pub annotations: Vec<DexAnnotation>,
    /// Annotations per parameter.
    pub parameter_annotations: Vec<Vec<DexAnnotation>>,
    /// The body, absent for abstract and native methods.
    pub code: Option<Code>,
    /// Set once by the per-method optimization stage.
    pub optimization_info: OnceLock<MethodOptimizationInfo>,
}

impl DexEncodedMethod {
    /// Creates a method definition.
    #[must_use]
    pub fn new(method: DexMethod, flags: AccessFlags, code: Option<Code>) -> Self {
        DexEncodedMethod {
            method,
            flags,
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            code,
            optimization_info: OnceLock::new(),
        }
    }

    /// Whether this is an instance initializer.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        self.method.is_instance_initializer()
    }

    /// Whether this is the class initializer.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.method.is_class_initializer()
    }

    /// Whether the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.is_static()
    }

    /// Whether the method can be a virtual dispatch target.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_static()
            && !self.flags.is_private()
            && !self.is_instance_initializer()
            && !self.is_class_initializer()
    }

    /// The optimization info, or a default view when none was recorded.
    #[must_use]
    pub fn optimization_info(&self) -> MethodOptimizationInfo {
        self.optimization_info.get().cloned().unwrap_or_default()
    }
}

impl Clone for DexEncodedMethod {
    fn clone(&self) -> Self {
        let optimization_info = OnceLock::new();
        if let Some(info) = self.optimization_info.get() {
            let _ = optimization_info.set(info.clone());
        }
        DexEncodedMethod {
            method: self.method.clone(),
            flags: self.flags,
            annotations: self.annotations.clone(),
            parameter_annotations: self.parameter_annotations.clone(),
            code: self.code.clone(),
            optimization_info,
        }
    }
}

/// A class definition.
///
/// Holds the type reference, the superclass reference (absent only for the
/// root object type), the ordered implemented interfaces, flags, the four
/// member partitions, annotations, source file and origin.
#[derive(Debug, Clone)]
pub struct DexClass {
    /// Program / classpath / library.
    pub kind: ClassKind,
    /// The type this class defines.
    pub ty: DexType,
    /// Superclass, `None` only for `java.lang.Object`.
    pub superclass: Option<DexType>,
    /// Implemented interfaces, in declaration order (order matters for
    /// default-method selection).
    pub interfaces: Vec<DexType>,
    /// Access flags.
    pub flags: AccessFlags,
    /// Constructors, private and static methods.
    pub direct_methods: Vec<DexEncodedMethod>,
    /// Virtually dispatched methods.
    pub virtual_methods: Vec<DexEncodedMethod>,
    /// Static fields.
    pub static_fields: Vec<DexEncodedField>,
    /// Instance fields.
    pub instance_fields: Vec<DexEncodedField>,
    /// Annotations on the class.
    pub annotations: Vec<DexAnnotation>,
    /// Source file attribute, if any.
    pub source_file: Option<DexString>,
    /// Where the class was read from.
    pub origin: Origin,
    /// The feature split the class ships in.
    pub feature: FeatureId,
}

impl DexClass {
    /// Validates the class-level invariants.
    ///
    /// # Errors
    ///
    /// [`crate::Error::InvalidInput`] for self-inheritance, duplicate members
    /// by reference, or a member not holding this class as its holder.
    pub fn validate(&self) -> Result<()> {
        if self.superclass.as_ref() == Some(&self.ty) {
            return Err(invalid_input_error!(
                self.origin,
                "class {} extends itself",
                self.ty
            ));
        }
        if self.interfaces.contains(&self.ty) {
            return Err(invalid_input_error!(
                self.origin,
                "class {} implements itself",
                self.ty
            ));
        }
        let mut seen_methods = rustc_hash::FxHashSet::default();
        for method in self.direct_methods.iter().chain(&self.virtual_methods) {
            if method.method.holder() != &self.ty {
                return Err(invalid_input_error!(
                    self.origin,
                    "method {} declared in class {}",
                    method.method,
                    self.ty
                ));
            }
            if !seen_methods.insert(method.method.clone()) {
                return Err(invalid_input_error!(
                    self.origin,
                    "duplicate method {}",
                    method.method
                ));
            }
        }
        let mut seen_fields = rustc_hash::FxHashSet::default();
        for field in self.static_fields.iter().chain(&self.instance_fields) {
            if field.field.holder() != &self.ty {
                return Err(invalid_input_error!(
                    self.origin,
                    "field {} declared in class {}",
                    field.field,
                    self.ty
                ));
            }
            if !seen_fields.insert(field.field.clone()) {
                return Err(invalid_input_error!(
                    self.origin,
                    "duplicate field {}",
                    field.field
                ));
            }
        }
        Ok(())
    }

    /// Whether this is a program class.
    #[must_use]
    pub fn is_program(&self) -> bool {
        self.kind == ClassKind::Program
    }

    /// Whether this class is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.is_interface()
    }

    /// All methods, direct then virtual.
    pub fn methods(&self) -> impl Iterator<Item = &DexEncodedMethod> {
        self.direct_methods.iter().chain(&self.virtual_methods)
    }

    /// All fields, static then instance.
    pub fn fields(&self) -> impl Iterator<Item = &DexEncodedField> {
        self.static_fields.iter().chain(&self.instance_fields)
    }

    /// Looks up a method definition by reference.
    #[must_use]
    pub fn lookup_method(&self, method: &DexMethod) -> Option<&DexEncodedMethod> {
        self.methods().find(|candidate| &candidate.method == method)
    }

    /// Looks up a method definition by name and prototype, ignoring the
    /// holder of the query reference.
    #[must_use]
    pub fn lookup_method_by_signature(&self, method: &DexMethod) -> Option<&DexEncodedMethod> {
        self.methods().find(|candidate| {
            candidate.method.name() == method.name() && candidate.method.proto() == method.proto()
        })
    }

    /// Looks up a virtual method definition by name and prototype.
    #[must_use]
    pub fn lookup_virtual_method_by_signature(
        &self,
        method: &DexMethod,
    ) -> Option<&DexEncodedMethod> {
        self.virtual_methods.iter().find(|candidate| {
            candidate.method.name() == method.name() && candidate.method.proto() == method.proto()
        })
    }

    /// Looks up a field definition by reference.
    #[must_use]
    pub fn lookup_field(&self, field: &DexField) -> Option<&DexEncodedField> {
        self.fields().find(|candidate| &candidate.field == field)
    }

    /// Looks up a field definition by name and type, ignoring the holder of
    /// the query reference.
    #[must_use]
    pub fn lookup_field_by_signature(&self, field: &DexField) -> Option<&DexEncodedField> {
        self.fields().find(|candidate| {
            candidate.field.name() == field.name()
                && candidate.field.field_type() == field.field_type()
        })
    }

    /// The class initializer, if present.
    #[must_use]
    pub fn class_initializer(&self) -> Option<&DexEncodedMethod> {
        self.direct_methods
            .iter()
            .find(|method| method.is_class_initializer())
    }

    /// The dotted package this class lives in.
    #[must_use]
    pub fn package_name(&self) -> String {
        self.ty.package_name()
    }
}

/// Fluent construction of class definitions.
///
/// Used by tests and by the synthesis of lambda accessor classes; readers may
/// also use it to assemble definitions from decoded input.
pub struct DexClassBuilder {
    class: DexClass,
}

impl DexClassBuilder {
    /// Starts a builder for the given kind and type.
    #[must_use]
    pub fn new(kind: ClassKind, ty: DexType) -> Self {
        DexClassBuilder {
            class: DexClass {
                kind,
                ty,
                superclass: None,
                interfaces: Vec::new(),
                flags: AccessFlags::PUBLIC,
                direct_methods: Vec::new(),
                virtual_methods: Vec::new(),
                static_fields: Vec::new(),
                instance_fields: Vec::new(),
                annotations: Vec::new(),
                source_file: None,
                origin: Origin::Unknown,
                feature: BASE_FEATURE,
            },
        }
    }

    /// Sets the superclass.
    #[must_use]
    pub fn superclass(mut self, superclass: DexType) -> Self {
        self.class.superclass = Some(superclass);
        self
    }

    /// Appends an implemented interface.
    #[must_use]
    pub fn interface(mut self, interface: DexType) -> Self {
        self.class.interfaces.push(interface);
        self
    }

    /// Replaces the access flags.
    #[must_use]
    pub fn flags(mut self, flags: AccessFlags) -> Self {
        self.class.flags = flags;
        self
    }

    /// Appends a direct method.
    #[must_use]
    pub fn direct_method(mut self, method: DexEncodedMethod) -> Self {
        self.class.direct_methods.push(method);
        self
    }

    /// Appends a virtual method.
    #[must_use]
    pub fn virtual_method(mut self, method: DexEncodedMethod) -> Self {
        self.class.virtual_methods.push(method);
        self
    }

    /// Appends a static field.
    #[must_use]
    pub fn static_field(mut self, field: DexEncodedField) -> Self {
        self.class.static_fields.push(field);
        self
    }

    /// Appends an instance field.
    #[must_use]
    pub fn instance_field(mut self, field: DexEncodedField) -> Self {
        self.class.instance_fields.push(field);
        self
    }

    /// Appends a class annotation.
    #[must_use]
    pub fn annotation(mut self, annotation: DexAnnotation) -> Self {
        self.class.annotations.push(annotation);
        self
    }

    /// Sets the origin.
    #[must_use]
    pub fn origin(mut self, origin: Origin) -> Self {
        self.class.origin = origin;
        self
    }

    /// Sets the feature split.
    #[must_use]
    pub fn feature(mut self, feature: FeatureId) -> Self {
        self.class.feature = feature;
        self
    }

    /// Validates the invariants and returns the class.
    ///
    /// # Errors
    ///
    /// See [`DexClass::validate`].
    pub fn build(self) -> Result<DexClass> {
        self.class.validate()?;
        Ok(self.class)
    }
}
