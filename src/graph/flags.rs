//! Access flags for classes, fields and methods.

use bitflags::bitflags;

bitflags! {
    /// Dex/JVM access flags.
    ///
    /// A single flag set covers classes, fields and methods; the overlapping
    /// bits (`VOLATILE`/`BRIDGE`, `TRANSIENT`/`VARARGS`) are disambiguated by
    /// the kind of item they sit on, as in the container formats.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only within the defining class.
        const PRIVATE = 0x0002;
        /// Accessible within package and subclasses.
        const PROTECTED = 0x0004;
        /// Static member.
        const STATIC = 0x0008;
        /// Not overridable / not assignable.
        const FINAL = 0x0010;
        /// Synchronized method.
        const SYNCHRONIZED = 0x0020;
        /// Volatile field.
        const VOLATILE = 0x0040;
        /// Bridge method (same bit as `VOLATILE`).
        const BRIDGE = 0x0040;
        /// Transient field.
        const TRANSIENT = 0x0080;
        /// Variable-arity method (same bit as `TRANSIENT`).
        const VARARGS = 0x0080;
        /// Native method.
        const NATIVE = 0x0100;
        /// Interface class.
        const INTERFACE = 0x0200;
        /// Abstract class or method.
        const ABSTRACT = 0x0400;
        /// Strict floating-point method.
        const STRICT = 0x0800;
        /// Compiler-synthesized item.
        const SYNTHETIC = 0x1000;
        /// Annotation interface.
        const ANNOTATION = 0x2000;
        /// Enum class or enum field.
        const ENUM = 0x4000;
        /// Constructor (Dex-only marker bit).
        const CONSTRUCTOR = 0x10000;
    }
}

impl AccessFlags {
    /// Whether the item is package-private (none of public/private/protected).
    #[must_use]
    pub fn is_package_private(&self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }

    /// Whether the item is visible outside its package.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.contains(AccessFlags::PUBLIC)
    }

    /// Whether the item is private.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.contains(AccessFlags::PRIVATE)
    }

    /// Whether the item is protected.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.contains(AccessFlags::PROTECTED)
    }

    /// Whether the item is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.contains(AccessFlags::STATIC)
    }

    /// Whether the item is final.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.contains(AccessFlags::FINAL)
    }

    /// Whether the item is abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.contains(AccessFlags::ABSTRACT)
    }

    /// Whether the class is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.contains(AccessFlags::INTERFACE)
    }

    /// Whether the class is an enum.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.contains(AccessFlags::ENUM)
    }

    /// Whether the class is an annotation interface.
    #[must_use]
    pub fn is_annotation(&self) -> bool {
        self.contains(AccessFlags::ANNOTATION)
    }

    /// Whether the item is compiler-synthesized.
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.contains(AccessFlags::SYNTHETIC)
    }
}
