//! Interned, identity-based references for types, fields and methods.
//!
//! A *reference* names a program element by descriptor and is always interned
//! through the [`crate::graph::DexItemFactory`]: two references created from
//! equal descriptors are the same instance. Equality and hashing are by
//! identity (pointer) and therefore O(1); ordering compares descriptor text,
//! which is consistent with identity because interning makes textual equality
//! imply pointer equality. The descriptor order is the stable sort order used
//! wherever deterministic output is required.
//!
//! References never own the definitions they name. A reference may exist
//! without a definition (a library or missing class); resolving a reference to
//! its definition is the job of [`crate::graph::AppInfo`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An interned string.
///
/// Cheap to clone; equality and hashing are by identity.
#[derive(Clone)]
pub struct DexString {
    inner: Arc<str>,
}

impl DexString {
    pub(crate) fn new(text: &str) -> Self {
        DexString {
            inner: Arc::from(text),
        }
    }

    /// The string contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    fn identity(&self) -> *const u8 {
        Arc::as_ptr(&self.inner).cast::<u8>()
    }
}

impl PartialEq for DexString {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.identity(), other.identity())
    }
}

impl Eq for DexString {}

impl Hash for DexString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.identity() as usize).hash(state);
    }
}

impl PartialOrd for DexString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexString({})", self.as_str())
    }
}

struct TypeInner {
    descriptor: DexString,
    /// For array types, the interned element type (one dimension stripped).
    element: Option<DexType>,
}

/// An interned type reference, identified by its descriptor.
///
/// Descriptors follow the Dex/JVM convention: primitive shorties
/// (`V Z B S C I J F D`), class descriptors (`Lpkg/Name;`) and array
/// descriptors (`[` followed by the element descriptor).
#[derive(Clone)]
pub struct DexType {
    inner: Arc<TypeInner>,
}

impl DexType {
    pub(crate) fn new(descriptor: DexString, element: Option<DexType>) -> Self {
        DexType {
            inner: Arc::new(TypeInner {
                descriptor,
                element,
            }),
        }
    }

    /// The raw descriptor, e.g. `Ljava/lang/String;`.
    #[must_use]
    pub fn descriptor(&self) -> &DexString {
        &self.inner.descriptor
    }

    /// Whether this is a class type (`L...;`).
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.inner.descriptor.as_str().starts_with('L')
    }

    /// Whether this is an array type (`[...`).
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.inner.descriptor.as_str().starts_with('[')
    }

    /// Whether this is a primitive type (including `void`).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        !self.is_class() && !self.is_array()
    }

    /// For an array type, the element type with one dimension stripped.
    #[must_use]
    pub fn array_element(&self) -> Option<&DexType> {
        self.inner.element.as_ref()
    }

    /// For an array type, the innermost non-array element type.
    #[must_use]
    pub fn base_element(&self) -> &DexType {
        let mut current = self;
        while let Some(element) = current.array_element() {
            current = element;
        }
        current
    }

    /// The dotted Java name, e.g. `java.lang.String`.
    ///
    /// Primitives render as their keyword, arrays with trailing `[]` pairs.
    #[must_use]
    pub fn java_name(&self) -> String {
        descriptor_to_java_name(self.inner.descriptor.as_str())
    }

    /// The dotted package of a class type, empty for the default package and
    /// for non-class types.
    #[must_use]
    pub fn package_name(&self) -> String {
        if !self.is_class() {
            return String::new();
        }
        let java = self.java_name();
        match java.rfind('.') {
            Some(index) => java[..index].to_string(),
            None => String::new(),
        }
    }

    /// The simple (unqualified) name of a class type.
    #[must_use]
    pub fn simple_name(&self) -> String {
        let java = self.java_name();
        match java.rfind('.') {
            Some(index) => java[index + 1..].to_string(),
            None => java,
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for DexType {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DexType {}

impl Hash for DexType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for DexType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.descriptor().cmp(other.descriptor())
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}

impl fmt::Debug for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexType({})", self.descriptor())
    }
}

/// Converts a descriptor to its dotted Java spelling.
pub(crate) fn descriptor_to_java_name(descriptor: &str) -> String {
    match descriptor.as_bytes().first() {
        Some(b'L') => descriptor[1..descriptor.len() - 1].replace('/', "."),
        Some(b'[') => {
            let mut dimensions = 0;
            let mut rest = descriptor;
            while rest.starts_with('[') {
                dimensions += 1;
                rest = &rest[1..];
            }
            let mut name = descriptor_to_java_name(rest);
            for _ in 0..dimensions {
                name.push_str("[]");
            }
            name
        }
        Some(b'V') => "void".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'B') => "byte".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'D') => "double".to_string(),
        _ => descriptor.to_string(),
    }
}

/// Converts a dotted Java class name to its descriptor spelling.
pub(crate) fn java_name_to_descriptor(java_name: &str) -> String {
    match java_name {
        "void" => "V".to_string(),
        "boolean" => "Z".to_string(),
        "byte" => "B".to_string(),
        "short" => "S".to_string(),
        "char" => "C".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "float" => "F".to_string(),
        "double" => "D".to_string(),
        _ => {
            if let Some(element) = java_name.strip_suffix("[]") {
                format!("[{}", java_name_to_descriptor(element))
            } else {
                format!("L{};", java_name.replace('.', "/"))
            }
        }
    }
}

struct ProtoInner {
    return_type: DexType,
    parameters: Box<[DexType]>,
}

/// An interned method prototype: return type plus ordered parameter types.
#[derive(Clone)]
pub struct DexProto {
    inner: Arc<ProtoInner>,
}

impl DexProto {
    pub(crate) fn new(return_type: DexType, parameters: Vec<DexType>) -> Self {
        DexProto {
            inner: Arc::new(ProtoInner {
                return_type,
                parameters: parameters.into_boxed_slice(),
            }),
        }
    }

    /// The return type.
    #[must_use]
    pub fn return_type(&self) -> &DexType {
        &self.inner.return_type
    }

    /// The ordered parameter types.
    #[must_use]
    pub fn parameters(&self) -> &[DexType] {
        &self.inner.parameters
    }

    /// Dex-style descriptor, e.g. `(Ljava/lang/String;I)V`.
    #[must_use]
    pub fn descriptor_string(&self) -> String {
        let mut out = String::from("(");
        for parameter in self.parameters() {
            out.push_str(parameter.descriptor().as_str());
        }
        out.push(')');
        out.push_str(self.return_type().descriptor().as_str());
        out
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for DexProto {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DexProto {}

impl Hash for DexProto {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for DexProto {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexProto {
    fn cmp(&self, other: &Self) -> Ordering {
        self.descriptor_string().cmp(&other.descriptor_string())
    }
}

impl fmt::Debug for DexProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexProto({})", self.descriptor_string())
    }
}

struct FieldInner {
    holder: DexType,
    name: DexString,
    field_type: DexType,
}

/// An interned field reference: holder type, name and field type.
#[derive(Clone)]
pub struct DexField {
    inner: Arc<FieldInner>,
}

impl DexField {
    pub(crate) fn new(holder: DexType, name: DexString, field_type: DexType) -> Self {
        DexField {
            inner: Arc::new(FieldInner {
                holder,
                name,
                field_type,
            }),
        }
    }

    /// The class that the reference names as holder.
    #[must_use]
    pub fn holder(&self) -> &DexType {
        &self.inner.holder
    }

    /// The field name.
    #[must_use]
    pub fn name(&self) -> &DexString {
        &self.inner.name
    }

    /// The declared field type.
    #[must_use]
    pub fn field_type(&self) -> &DexType {
        &self.inner.field_type
    }

    /// Holder-less Java signature, e.g. `int count`.
    #[must_use]
    pub fn java_signature(&self) -> String {
        format!("{} {}", self.field_type().java_name(), self.name())
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for DexField {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DexField {}

impl Hash for DexField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for DexField {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexField {
    fn cmp(&self, other: &Self) -> Ordering {
        self.holder()
            .cmp(other.holder())
            .then_with(|| self.name().cmp(other.name()))
            .then_with(|| self.field_type().cmp(other.field_type()))
    }
}

impl fmt::Display for DexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}",
            self.field_type(),
            self.holder(),
            self.name()
        )
    }
}

impl fmt::Debug for DexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexField({self})")
    }
}

struct MethodInner {
    holder: DexType,
    name: DexString,
    proto: DexProto,
}

/// An interned method reference: holder type, name and prototype.
#[derive(Clone)]
pub struct DexMethod {
    inner: Arc<MethodInner>,
}

impl DexMethod {
    pub(crate) fn new(holder: DexType, name: DexString, proto: DexProto) -> Self {
        DexMethod {
            inner: Arc::new(MethodInner {
                holder,
                name,
                proto,
            }),
        }
    }

    /// The class that the reference names as holder.
    #[must_use]
    pub fn holder(&self) -> &DexType {
        &self.inner.holder
    }

    /// The method name.
    #[must_use]
    pub fn name(&self) -> &DexString {
        &self.inner.name
    }

    /// The prototype.
    #[must_use]
    pub fn proto(&self) -> &DexProto {
        &self.inner.proto
    }

    /// Whether this references an instance initializer (`<init>`).
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        self.name().as_str() == "<init>"
    }

    /// Whether this references a class initializer (`<clinit>`).
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.name().as_str() == "<clinit>"
    }

    /// Holder-less Java signature, e.g. `void main(java.lang.String[])`.
    ///
    /// The form used by the seeds, usage and mapping outputs.
    #[must_use]
    pub fn java_signature(&self) -> String {
        let parameters = self
            .proto()
            .parameters()
            .iter()
            .map(DexType::java_name)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{} {}({})",
            self.proto().return_type().java_name(),
            self.name(),
            parameters
        )
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for DexMethod {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for DexMethod {}

impl Hash for DexMethod {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for DexMethod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DexMethod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.holder()
            .cmp(other.holder())
            .then_with(|| self.name().cmp(other.name()))
            .then_with(|| self.proto().cmp(other.proto()))
    }
}

impl fmt::Display for DexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parameters = self
            .proto()
            .parameters()
            .iter()
            .map(DexType::java_name)
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{} {}.{}({})",
            self.proto().return_type(),
            self.holder(),
            self.name(),
            parameters
        )
    }
}

impl fmt::Debug for DexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DexMethod({self})")
    }
}

/// A field or method reference, where either can appear.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DexMember {
    /// A field reference.
    Field(DexField),
    /// A method reference.
    Method(DexMethod),
}

impl DexMember {
    /// The holder type of the member.
    #[must_use]
    pub fn holder(&self) -> &DexType {
        match self {
            DexMember::Field(field) => field.holder(),
            DexMember::Method(method) => method.holder(),
        }
    }

    /// The member name.
    #[must_use]
    pub fn name(&self) -> &DexString {
        match self {
            DexMember::Field(field) => field.name(),
            DexMember::Method(method) => method.name(),
        }
    }
}

impl fmt::Display for DexMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexMember::Field(field) => write!(f, "{field}"),
            DexMember::Method(method) => write!(f, "{method}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::DexItemFactory;

    #[test]
    fn java_name_conversions() {
        let factory = DexItemFactory::new();
        let string = factory.create_type("Ljava/lang/String;").unwrap();
        assert_eq!(string.java_name(), "java.lang.String");
        assert_eq!(string.package_name(), "java.lang");
        assert_eq!(string.simple_name(), "String");

        let array = factory.create_type("[[I").unwrap();
        assert_eq!(array.java_name(), "int[][]");
        assert!(array.is_array());
        assert_eq!(array.base_element().descriptor().as_str(), "I");
    }

    #[test]
    fn ordering_is_by_descriptor() {
        let factory = DexItemFactory::new();
        let a = factory.create_type("La/A;").unwrap();
        let b = factory.create_type("Lb/B;").unwrap();
        assert!(a < b);
    }
}
