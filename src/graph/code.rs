//! The internal method-body representation consumed by tracing.
//!
//! Readers lower classfile or Dex bodies into this reference-level
//! instruction list; the reachability stage only needs to see which
//! references a body can execute or link against, so operands that carry no
//! reference (registers, branch offsets, arithmetic) are not represented.
//! Exception handlers are retained because their guard types are linkable
//! references too.

use crate::graph::references::{DexField, DexMethod, DexProto, DexString, DexType};

/// How an invoke instruction dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// `invoke-virtual`.
    Virtual,
    /// `invoke-direct` (constructors and private methods).
    Direct,
    /// `invoke-static`.
    Static,
    /// `invoke-interface`.
    Interface,
    /// `invoke-super`.
    Super,
}

/// A method-handle constant, as used by `invoke-custom` bootstraps and by
/// `const-method-handle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DexMethodHandle {
    /// A handle invoking a method.
    Method {
        /// How the handle dispatches.
        kind: InvokeKind,
        /// The invoked method.
        method: DexMethod,
    },
    /// A handle reading a field.
    FieldRead {
        /// The accessed field.
        field: DexField,
        /// Whether the access is static.
        is_static: bool,
    },
    /// A handle writing a field.
    FieldWrite {
        /// The accessed field.
        field: DexField,
        /// Whether the access is static.
        is_static: bool,
    },
}

/// A static bootstrap argument of an `invoke-custom` call site.
#[derive(Debug, Clone)]
pub enum BootstrapArg {
    /// A method-handle constant.
    MethodHandle(DexMethodHandle),
    /// A method-type constant.
    Proto(DexProto),
    /// A type constant.
    Type(DexType),
    /// A string constant.
    String(DexString),
    /// An integral constant.
    Int(i64),
}

/// An `invoke-custom` call site: bootstrap handle, invoked name, invoked
/// type, and the static bootstrap arguments.
#[derive(Debug, Clone)]
pub struct DexCallSite {
    /// The bootstrap method handle.
    pub bootstrap: DexMethodHandle,
    /// The name the call site invokes (for lambdas, the SAM method name).
    pub method_name: DexString,
    /// The invoked type; for lambdas the return type is the functional
    /// interface being instantiated.
    pub proto: DexProto,
    /// Static bootstrap arguments.
    pub args: Vec<BootstrapArg>,
}

/// A reference-level instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// `invoke-virtual`.
    InvokeVirtual(DexMethod),
    /// `invoke-direct`.
    InvokeDirect(DexMethod),
    /// `invoke-static`.
    InvokeStatic(DexMethod),
    /// `invoke-interface`.
    InvokeInterface(DexMethod),
    /// `invoke-super`.
    InvokeSuper(DexMethod),
    /// `sget` and friends.
    StaticGet(DexField),
    /// `sput` and friends.
    StaticPut(DexField),
    /// `iget` and friends.
    InstanceGet(DexField),
    /// `iput` and friends.
    InstancePut(DexField),
    /// `new-instance` (and `new-array` of a class element).
    NewInstance(DexType),
    /// `const-class`.
    ConstClass(DexType),
    /// `const-string`.
    ConstString(DexString),
    /// `check-cast`.
    CheckCast(DexType),
    /// `instance-of`.
    InstanceOf(DexType),
    /// Any other instruction that links against a type.
    TypeReference(DexType),
    /// `invoke-custom`.
    InvokeCustom(DexCallSite),
    /// `const-method-handle`.
    MethodHandleConst(DexMethodHandle),
}

/// An exception handler; only the guard type is linkable.
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    /// The caught type.
    pub guard: DexType,
}

/// A method body.
#[derive(Debug, Clone, Default)]
pub struct Code {
    /// Instructions in execution order.
    pub instructions: Vec<Instruction>,
    /// Exception handlers.
    pub handlers: Vec<ExceptionHandler>,
}

impl Code {
    /// A body with the given instructions and no handlers.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Code {
            instructions,
            handlers: Vec::new(),
        }
    }

    /// Reports every reference this body can execute or link against to the
    /// registry, including handler guard types.
    ///
    /// Instructions are visited in execution order so that sequence-sensitive
    /// consumers (the reflective-idiom heuristics) see constants before the
    /// invokes that consume them.
    pub fn register_references(&self, registry: &mut dyn UseRegistry) {
        for instruction in &self.instructions {
            match instruction {
                Instruction::InvokeVirtual(method) => registry.register_invoke_virtual(method),
                Instruction::InvokeDirect(method) => registry.register_invoke_direct(method),
                Instruction::InvokeStatic(method) => registry.register_invoke_static(method),
                Instruction::InvokeInterface(method) => registry.register_invoke_interface(method),
                Instruction::InvokeSuper(method) => registry.register_invoke_super(method),
                Instruction::StaticGet(field) => registry.register_static_field_read(field),
                Instruction::StaticPut(field) => registry.register_static_field_write(field),
                Instruction::InstanceGet(field) => registry.register_instance_field_read(field),
                Instruction::InstancePut(field) => registry.register_instance_field_write(field),
                Instruction::NewInstance(ty) => registry.register_new_instance(ty),
                Instruction::ConstClass(ty) => registry.register_const_class(ty),
                Instruction::ConstString(value) => registry.register_const_string(value),
                Instruction::CheckCast(ty) => registry.register_check_cast(ty),
                // instance-of only links against the type
                Instruction::InstanceOf(ty) | Instruction::TypeReference(ty) => {
                    registry.register_type_reference(ty);
                }
                Instruction::InvokeCustom(call_site) => registry.register_call_site(call_site),
                Instruction::MethodHandleConst(handle) => registry.register_method_handle(handle),
            }
        }
        for handler in &self.handlers {
            registry.register_type_reference(&handler.guard);
        }
    }
}

/// Receives one callback per bytecode reference while a body is walked.
///
/// The implementation carries the tracing *context* (holder class and
/// method), which drives accessibility and package checks downstream.
pub trait UseRegistry {
    /// An `invoke-virtual` of the given method reference.
    fn register_invoke_virtual(&mut self, method: &DexMethod);
    /// An `invoke-direct` of the given method reference.
    fn register_invoke_direct(&mut self, method: &DexMethod);
    /// An `invoke-static` of the given method reference.
    fn register_invoke_static(&mut self, method: &DexMethod);
    /// An `invoke-interface` of the given method reference.
    fn register_invoke_interface(&mut self, method: &DexMethod);
    /// An `invoke-super` of the given method reference.
    fn register_invoke_super(&mut self, method: &DexMethod);
    /// A static field read.
    fn register_static_field_read(&mut self, field: &DexField);
    /// A static field write.
    fn register_static_field_write(&mut self, field: &DexField);
    /// An instance field read.
    fn register_instance_field_read(&mut self, field: &DexField);
    /// An instance field write.
    fn register_instance_field_write(&mut self, field: &DexField);
    /// A `new-instance` of the given type.
    fn register_new_instance(&mut self, ty: &DexType);
    /// A `const-class` of the given type.
    fn register_const_class(&mut self, ty: &DexType);
    /// A `const-string`; most registries ignore it.
    fn register_const_string(&mut self, _value: &DexString) {}
    /// A `check-cast` against the given type.
    fn register_check_cast(&mut self, ty: &DexType);
    /// Any other linkable type reference, including `instance-of` and
    /// exception handler guards.
    fn register_type_reference(&mut self, ty: &DexType);
    /// A method-handle constant.
    fn register_method_handle(&mut self, handle: &DexMethodHandle);
    /// An `invoke-custom` call site.
    fn register_call_site(&mut self, call_site: &DexCallSite);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DexItemFactory;

    #[derive(Default)]
    struct CountingRegistry {
        invokes: usize,
        types: usize,
    }

    impl UseRegistry for CountingRegistry {
        fn register_invoke_virtual(&mut self, _: &DexMethod) {
            self.invokes += 1;
        }
        fn register_invoke_direct(&mut self, _: &DexMethod) {
            self.invokes += 1;
        }
        fn register_invoke_static(&mut self, _: &DexMethod) {
            self.invokes += 1;
        }
        fn register_invoke_interface(&mut self, _: &DexMethod) {
            self.invokes += 1;
        }
        fn register_invoke_super(&mut self, _: &DexMethod) {
            self.invokes += 1;
        }
        fn register_static_field_read(&mut self, _: &DexField) {}
        fn register_static_field_write(&mut self, _: &DexField) {}
        fn register_instance_field_read(&mut self, _: &DexField) {}
        fn register_instance_field_write(&mut self, _: &DexField) {}
        fn register_new_instance(&mut self, _: &DexType) {
            self.types += 1;
        }
        fn register_const_class(&mut self, _: &DexType) {
            self.types += 1;
        }
        fn register_check_cast(&mut self, _: &DexType) {
            self.types += 1;
        }
        fn register_type_reference(&mut self, _: &DexType) {
            self.types += 1;
        }
        fn register_method_handle(&mut self, _: &DexMethodHandle) {}
        fn register_call_site(&mut self, _: &DexCallSite) {}
    }

    #[test]
    fn handler_guards_are_registered() {
        let factory = DexItemFactory::new();
        let throwable = factory.known.throwable_type.clone();
        let mut code = Code::new(vec![Instruction::NewInstance(throwable.clone())]);
        code.handlers.push(ExceptionHandler { guard: throwable });

        let mut registry = CountingRegistry::default();
        code.register_references(&mut registry);
        // one new-instance plus one guard type
        assert_eq!(registry.types, 2);
        assert_eq!(registry.invokes, 0);
    }
}
