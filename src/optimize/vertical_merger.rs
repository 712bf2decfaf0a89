//! Vertical class merging: collapsing single-subtype chains.
//!
//! A non-instantiated, non-pinned program class with exactly one program
//! subclass is collapsed into that subclass; every reference to the merged
//! class is redirected through a lens. The implementation is deliberately
//! conservative: only memberless or fully-abstract classes are merged, so no
//! definition has to move and no `invoke-super` in the subclass can change
//! meaning. The subclass inherits the merged class's super link and
//! interfaces.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::graph::{
    AppInfo, DexApplication, DexClass, DexClassRc, DexType, GraphLens, PinnedItems,
};
use crate::shaking::enqueuer::LivenessView;

/// Result of the merging pass.
pub struct MergerResult {
    /// The rewritten application.
    pub app: Arc<DexApplication>,
    /// The lens redirecting merged references.
    pub lens: GraphLens,
    /// The classes merged away, in no particular order.
    pub merged_types: Vec<DexType>,
    /// How many classes were merged away.
    pub merged_count: usize,
}

/// Runs vertical class merging over the pruned application.
#[must_use]
pub fn run(
    app_info: &AppInfo,
    liveness: &LivenessView,
    previous_lens: &GraphLens,
    pinned: &PinnedItems,
) -> MergerResult {
    let app = app_info.app();
    let factory = &app.factory;
    // merged class -> surviving subclass
    let mut merges: FxHashMap<DexType, DexType> = FxHashMap::default();

    for class in app.program_classes() {
        if !is_merge_candidate(app_info, liveness, pinned, &class) {
            continue;
        }
        let subtypes = app_info.direct_subtypes(&class.ty);
        let [target] = subtypes else { continue };
        if app.program_definition_for(target).is_none() {
            continue;
        }
        // avoid chains collapsing into a class that is itself merged away
        if merges.contains_key(target) {
            continue;
        }
        if subclass_satisfies_abstracts(app_info, &class, target) {
            merges.insert(class.ty.clone(), target.clone());
        }
    }

    // A -> B -> C chains: redirect A all the way down.
    let resolved: FxHashMap<DexType, DexType> = merges
        .iter()
        .map(|(from, to)| {
            let mut target = to.clone();
            while let Some(next) = merges.get(&target) {
                target = next.clone();
            }
            (from.clone(), target)
        })
        .collect();

    if resolved.is_empty() {
        return MergerResult {
            app: app.clone(),
            lens: previous_lens.clone(),
            merged_types: Vec::new(),
            merged_count: 0,
        };
    }

    let mut builder = previous_lens.nest();
    for (from, to) in &resolved {
        builder.map_type(from.clone(), to.clone());
        // abstract methods of the merged class bind to the subclass
        if let Some(class) = app.program_definition_for(from) {
            for method in class.methods() {
                let redirected = factory.create_method(
                    to.clone(),
                    method.method.name().clone(),
                    method.method.proto().clone(),
                );
                builder.map_method(method.method.clone(), redirected);
            }
        }
    }
    let lens = builder.build(pinned);

    // Rebuild the program: drop merged classes, splice their hierarchy links
    // into the surviving subclass.
    let mut surviving: Vec<DexClassRc> = Vec::new();
    for class in app.program_classes() {
        if resolved.contains_key(&class.ty) {
            continue;
        }
        if !class
            .superclass
            .as_ref()
            .is_some_and(|superclass| resolved.contains_key(superclass))
        {
            surviving.push(class);
            continue;
        }
        // walk past every merged ancestor, collecting its interfaces
        let mut rewritten: DexClass = (*class).clone();
        let mut superclass = rewritten.superclass.clone();
        while let Some(ty) = superclass
            .as_ref()
            .filter(|ty| resolved.contains_key(*ty))
            .cloned()
        {
            let Some(parent) = app.program_definition_for(&ty) else {
                break;
            };
            for interface in &parent.interfaces {
                if !rewritten.interfaces.contains(interface) {
                    rewritten.interfaces.push(interface.clone());
                }
            }
            superclass = parent.superclass.clone();
        }
        rewritten.superclass = superclass;
        surviving.push(Arc::new(rewritten));
    }

    let merged_types: Vec<DexType> = resolved.keys().cloned().collect();
    MergerResult {
        app: Arc::new(app.rebuilt_with_program(surviving)),
        lens,
        merged_count: merged_types.len(),
        merged_types,
    }
}

fn is_merge_candidate(
    app_info: &AppInfo,
    liveness: &LivenessView,
    pinned: &PinnedItems,
    class: &DexClassRc,
) -> bool {
    if class.is_interface() || !class.is_program() {
        return false;
    }
    if pinned.contains_type(&class.ty) {
        return false;
    }
    if liveness.instantiated_types.contains(&class.ty) {
        return false;
    }
    // only memberless or fully-abstract classes merge; nothing has to move
    if !class.static_fields.is_empty() || !class.instance_fields.is_empty() {
        return false;
    }
    if class.class_initializer().is_some() {
        return false;
    }
    let all_methods_droppable = class.methods().all(|method| {
        if method.flags.is_abstract() {
            !pinned.contains_method(&method.method)
        } else {
            // a live constructor or concrete method anchors the class
            !liveness.live_methods.contains(&method.method)
        }
    });
    if !all_methods_droppable {
        return false;
    }
    // a single direct subtype, checked by the caller as well
    app_info.direct_subtypes(&class.ty).len() == 1
}

/// Every abstract method of the merged class must resolve on the subclass.
fn subclass_satisfies_abstracts(app_info: &AppInfo, class: &DexClassRc, target: &DexType) -> bool {
    class
        .methods()
        .filter(|method| method.flags.is_abstract())
        .all(|method| {
            app_info
                .lookup_dispatch_target(target, &method.method)
                .is_some()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        AccessFlags, ClassKind, DexClassBuilder, DexEncodedMethod, DexItemFactory, InvokeKind,
    };

    #[test]
    fn abstract_single_subclass_chain_is_collapsed() {
        // abstract class Base { abstract void f(); }  class Impl extends Base { void f() {} }
        let factory = Arc::new(DexItemFactory::new());
        let object = factory.known.object_type.clone();
        let base = factory.create_type("Lp/Base;").unwrap();
        let impl_type = factory.create_type("Lp/Impl;").unwrap();

        let f_on_base = factory.create_method(
            base.clone(),
            factory.create_string("f"),
            factory.known.void_proto.clone(),
        );
        let f_on_impl = factory.create_method(
            impl_type.clone(),
            factory.create_string("f"),
            factory.known.void_proto.clone(),
        );

        let mut builder = DexApplication::builder(factory.clone());
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, base.clone())
                    .superclass(object.clone())
                    .flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
                    .virtual_method(DexEncodedMethod::new(
                        f_on_base.clone(),
                        AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                        None,
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        builder
            .add_class(
                DexClassBuilder::new(ClassKind::Program, impl_type.clone())
                    .superclass(base.clone())
                    .virtual_method(DexEncodedMethod::new(
                        f_on_impl,
                        AccessFlags::PUBLIC,
                        Some(crate::graph::Code::default()),
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let app_info = AppInfo::new(Arc::new(builder.build()));

        let mut liveness = LivenessView::default();
        liveness.live_types.insert(base.clone());
        liveness.live_types.insert(impl_type.clone());
        liveness.instantiated_types.insert(impl_type.clone());

        let result = run(
            &app_info,
            &liveness,
            &GraphLens::Identity,
            &PinnedItems::default(),
        );
        assert_eq!(result.merged_count, 1);
        assert_eq!(result.lens.lookup_type(&base), impl_type);
        let redirected = result.lens.lookup_method(&f_on_base, None, InvokeKind::Virtual);
        assert_eq!(redirected.method.holder(), &impl_type);
        // the merged class is gone from the program
        assert!(result.app.program_definition_for(&base).is_none());
        // the subclass now extends Object directly
        let rewritten = result.app.program_definition_for(&impl_type).unwrap();
        assert_eq!(rewritten.superclass.as_ref(), Some(&object));
    }
}
