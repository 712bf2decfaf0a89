//! Member rebinding: references move up the hierarchy to the defining class.
//!
//! Bytecode frequently references a member through a subclass of the class
//! that actually defines it. Rebinding rewrites every such reference to the
//! definition holder, which collapses duplicate references and lets later
//! passes reason about one canonical reference per member. The rewrite is a
//! lens; bodies are untouched and every consumer looks through the lens.
//!
//! After rebinding, the per-field access contexts are flattened onto the
//! resolved field (the indirect-reference split carries no information
//! anymore); reflective-access flags survive the flattening.

use rustc_hash::FxHashSet;

use crate::graph::{
    AppInfo, DexField, DexMethod, FieldResolutionResult, GraphLens, Instruction,
    MethodResolutionResult, PinnedItems,
};

/// Computes the member-rebinding lens for the current application.
#[must_use]
pub fn run(app_info: &AppInfo, previous_lens: &GraphLens, pinned: &PinnedItems) -> GraphLens {
    let factory = &app_info.app().factory;
    let mut method_refs: FxHashSet<DexMethod> = FxHashSet::default();
    let mut field_refs: FxHashSet<DexField> = FxHashSet::default();

    for class in app_info.app().program_classes() {
        for method in class.methods() {
            let Some(code) = &method.code else { continue };
            for instruction in &code.instructions {
                match instruction {
                    Instruction::InvokeVirtual(method)
                    | Instruction::InvokeInterface(method)
                    | Instruction::InvokeStatic(method)
                    | Instruction::InvokeSuper(method) => {
                        method_refs.insert(method.clone());
                    }
                    // direct invokes bind to the exact holder by definition
                    Instruction::InvokeDirect(_) => {}
                    Instruction::StaticGet(field)
                    | Instruction::StaticPut(field)
                    | Instruction::InstanceGet(field)
                    | Instruction::InstancePut(field) => {
                        field_refs.insert(field.clone());
                    }
                    _ => {}
                }
            }
        }
    }

    let mut builder = previous_lens.nest();
    for reference in method_refs {
        if pinned.contains_method(&reference) {
            continue;
        }
        if let MethodResolutionResult::Single(resolution) =
            app_info.resolve_method(reference.holder(), &reference)
        {
            if resolution.method != reference {
                let rebound = factory.create_method(
                    resolution.holder.clone(),
                    reference.name().clone(),
                    reference.proto().clone(),
                );
                builder.map_method(reference, rebound);
            }
        }
    }
    for reference in field_refs {
        if pinned.contains_field(&reference) {
            continue;
        }
        if let FieldResolutionResult::Single { holder, field } =
            app_info.resolve_field(reference.holder(), &reference)
        {
            if field != reference {
                let rebound = factory.create_field(
                    holder,
                    reference.name().clone(),
                    reference.field_type().clone(),
                );
                builder.map_field(reference, rebound);
            }
        }
    }

    if builder.is_empty() {
        previous_lens.clone()
    } else {
        builder.build(pinned)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::{
        AccessFlags, ClassKind, Code, DexApplication, DexClassBuilder, DexEncodedMethod,
        DexItemFactory, InvokeKind,
    };

    #[test]
    fn subclass_reference_rebinds_to_definition_holder() {
        // class Base { void m() {} }  class Sub extends Base {}
        // class Caller { void call() { new Sub().m(); /* via Sub.m */ } }
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let base = factory.create_type("Lp/Base;").unwrap();
        let sub = factory.create_type("Lp/Sub;").unwrap();
        let caller = factory.create_type("Lp/Caller;").unwrap();

        let m_on_base = factory.create_method(
            base.clone(),
            factory.create_string("m"),
            factory.known.void_proto.clone(),
        );
        let m_on_sub = factory.create_method(
            sub.clone(),
            factory.create_string("m"),
            factory.known.void_proto.clone(),
        );
        let call = factory.create_method(
            caller.clone(),
            factory.create_string("call"),
            factory.known.void_proto.clone(),
        );

        let mut builder = DexApplication::builder(factory.clone());
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, base.clone())
                    .superclass(object.clone())
                    .virtual_method(DexEncodedMethod::new(
                        m_on_base.clone(),
                        AccessFlags::PUBLIC,
                        Some(Code::default()),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, sub)
                    .superclass(base)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, caller)
                    .superclass(object)
                    .virtual_method(DexEncodedMethod::new(
                        call,
                        AccessFlags::PUBLIC,
                        Some(Code::new(vec![Instruction::InvokeVirtual(
                            m_on_sub.clone(),
                        )])),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let app_info = AppInfo::new(Arc::new(builder.build()));
        let pinned = PinnedItems::default();
        let lens = run(&app_info, &GraphLens::Identity, &pinned);

        let rebound = lens.lookup_method(&m_on_sub, None, InvokeKind::Virtual);
        assert_eq!(rebound.method, m_on_base);
    }
}
