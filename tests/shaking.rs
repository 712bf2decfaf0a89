//! End-to-end shrinking scenarios driven through the public API.
//!
//! Each test assembles a small program with the builder API, runs the full
//! pipeline, and checks the emitted classes, the usage output and the
//! diagnostics.

mod common;

use common::{find_class, AppFixture, DONT_WARN_PLATFORM};
use dexscope::prelude::*;

/// Dead method elimination: `-keep class A { void m1(); }` removes `m2` and
/// keeps `m1` unrenamed.
#[test]
fn dead_method_is_eliminated_and_kept_method_is_unrenamed() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);

    let a = fixture.ty("La/A;");
    let m1 = fixture.void_method(&a, "m1");
    let m2 = fixture.void_method(&a, "m2");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, a.clone())
                .superclass(fixture.factory.known.object_type.clone())
                .virtual_method(DexEncodedMethod::new(
                    m1,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .virtual_method(DexEncodedMethod::new(
                    m2,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!("-keep class a.A {{ void m1(); }}\n{DONT_WARN_PLATFORM}"))
        .run()
        .unwrap();

    // the class keeps its name; m1 survives unrenamed; m2 is gone
    let class = find_class(&output, "a.A").expect("kept class should be emitted");
    let method_names: Vec<String> = class
        .methods
        .iter()
        .map(|method| method.method.name().as_str().to_string())
        .collect();
    assert!(method_names.contains(&"m1".to_string()));
    assert!(!method_names.contains(&"m2".to_string()));
    assert!(output.usage.contains(&"a.A: void m2()".to_string()));
}

/// Interface dispatch keeps the implementation in the only instantiated
/// receiver: `C.f` lives, `D` is removed, `I.f` survives as the dispatch
/// anchor.
#[test]
fn interface_dispatch_keeps_only_instantiated_implementation() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();

    let i = fixture.ty("Lp/I;");
    let c = fixture.ty("Lp/C;");
    let d = fixture.ty("Lp/D;");
    let main_type = fixture.ty("Lp/Main;");

    let f_on_i = fixture.void_method(&i, "f");
    let f_on_c = fixture.void_method(&c, "f");
    let f_on_d = fixture.void_method(&d, "f");
    let c_init = fixture.void_method(&c, "<init>");

    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, i.clone())
                .superclass(object.clone())
                .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                .virtual_method(DexEncodedMethod::new(
                    f_on_i.clone(),
                    AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                    None,
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, c.clone())
                .superclass(object.clone())
                .interface(i.clone())
                .direct_method(fixture.default_init(&c))
                .virtual_method(DexEncodedMethod::new(
                    f_on_c,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, d.clone())
                .superclass(object.clone())
                .interface(i.clone())
                .direct_method(fixture.default_init(&d))
                .virtual_method(DexEncodedMethod::new(
                    f_on_d,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let main = fixture.main_method(&main_type);
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![
                        Instruction::NewInstance(c.clone()),
                        Instruction::InvokeDirect(c_init),
                        Instruction::InvokeInterface(f_on_i.clone()),
                    ])),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    // D is removed entirely; C and I survive with their `f`
    assert!(output.usage.contains(&"p.D".to_string()));
    let mapping_c = output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == "p.C")
        .expect("C survives");
    assert!(mapping_c.methods.iter().any(|method| method.original == "f"));
    let mapping_i = output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == "p.I")
        .expect("I survives");
    assert!(mapping_i.methods.iter().any(|method| method.original == "f"));
    assert!(!output.mapping.classes.iter().any(|class| class.original == "p.D"));
}

/// `ServiceLoader.load(S.class)` marks every registered implementation
/// instantiated and its public no-argument constructor live.
#[test]
fn service_loader_keeps_registered_implementations() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();

    let service = fixture.ty("Lp/S;");
    let implementation = fixture.ty("Lp/SImpl;");
    let main_type = fixture.ty("Lp/Main;");

    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, service.clone())
                .superclass(object.clone())
                .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                .build()
                .unwrap(),
        )
        .unwrap();
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, implementation.clone())
                .superclass(object.clone())
                .interface(service.clone())
                .direct_method(fixture.default_init(&implementation))
                .build()
                .unwrap(),
        )
        .unwrap();

    let main = fixture.main_method(&main_type);
    let load = fixture.factory.known.service_loader_load.clone();
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![
                        Instruction::ConstClass(service.clone()),
                        Instruction::InvokeStatic(load),
                    ])),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    fixture.builder.add_data_entry(DataEntry {
        name: "META-INF/services/p.S".to_string(),
        contents: b"p.SImpl\n".to_vec(),
        feature: 0,
        origin: Origin::memory("test"),
    });

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    let mapping_impl = output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == "p.SImpl")
        .expect("service implementation survives");
    assert!(mapping_impl
        .methods
        .iter()
        .any(|method| method.original == "<init>"));
}

/// A surviving `-checkdiscard` target fails the compilation.
#[test]
fn check_discard_failure_is_fatal() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();

    let dbg = fixture.ty("Lp/Dbg;");
    let main_type = fixture.ty("Lp/Main;");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, dbg.clone())
                .superclass(object.clone())
                .build()
                .unwrap(),
        )
        .unwrap();
    let main = fixture.main_method(&main_type);
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![Instruction::TypeReference(dbg)])),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let result = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n-checkdiscard class p.Dbg\n{DONT_WARN_PLATFORM}"
        ))
        .run();

    assert!(matches!(result, Err(Error::CheckDiscardFailed { .. })));
}

/// `Class.forName` with a constant name keeps the named class.
#[test]
fn reflective_class_for_name_keeps_target() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();

    let gadget = fixture.ty("Lp/Gadget;");
    let main_type = fixture.ty("Lp/Main;");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, gadget.clone())
                .superclass(object.clone())
                .build()
                .unwrap(),
        )
        .unwrap();
    let main = fixture.main_method(&main_type);
    let for_name = fixture.factory.known.class_for_name.clone();
    let gadget_name = fixture.factory.create_string("p.Gadget");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![
                        Instruction::ConstString(gadget_name),
                        Instruction::InvokeStatic(for_name),
                    ])),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    assert!(output
        .mapping
        .classes
        .iter()
        .any(|class| class.original == "p.Gadget"));
}

/// A lambda metafactory call site desugars into a synthetic accessor class
/// that keeps the implementation method alive.
#[test]
fn lambda_call_site_synthesizes_accessor_class() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let factory = fixture.factory.clone();
    let object = factory.known.object_type.clone();

    let runnable = fixture.ty("Lp/R;");
    let main_type = fixture.ty("Lp/Main;");
    let run_on_r = fixture.void_method(&runnable, "run");
    let lambda_body = fixture.void_method(&main_type, "lambda$main$0");

    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, runnable.clone())
                .superclass(object.clone())
                .flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                .virtual_method(DexEncodedMethod::new(
                    run_on_r,
                    AccessFlags::PUBLIC | AccessFlags::ABSTRACT,
                    None,
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let metafactory = factory.create_method(
        factory.known.lambda_metafactory_type.clone(),
        factory.known.metafactory_name.clone(),
        factory.known.void_proto.clone(),
    );
    let call_site = DexCallSite {
        bootstrap: DexMethodHandle::Method {
            kind: InvokeKind::Static,
            method: metafactory,
        },
        method_name: factory.create_string("run"),
        proto: factory.create_proto(runnable.clone(), Vec::new()),
        args: vec![
            BootstrapArg::Proto(factory.known.void_proto.clone()),
            BootstrapArg::MethodHandle(DexMethodHandle::Method {
                kind: InvokeKind::Static,
                method: lambda_body.clone(),
            }),
            BootstrapArg::Proto(factory.known.void_proto.clone()),
        ],
    };

    let main = fixture.main_method(&main_type);
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![Instruction::InvokeCustom(call_site)])),
                ))
                .direct_method(DexEncodedMethod::new(
                    lambda_body,
                    AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    // the synthetic class is emitted and carries its synthesized-from marker
    let synthetic = output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == "p.Main$$Lambda$0")
        .expect("synthetic lambda class is a first-class program class");
    assert!(synthetic.synthesized_from.is_some());
    // the implementation method stays alive
    let main_mapping = output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == "p.Main")
        .unwrap();
    assert!(main_mapping
        .methods
        .iter()
        .any(|method| method.original == "lambda$main$0"));
}

/// `-whyareyoukeeping` produces a reachability chain ending at a keep rule.
#[test]
fn why_are_you_keeping_reports_a_chain() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();

    let helper = fixture.ty("Lp/Helper;");
    let main_type = fixture.ty("Lp/Main;");
    let helper_method = fixture.void_method(&helper, "help");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, helper.clone())
                .superclass(object.clone())
                .direct_method(DexEncodedMethod::new(
                    helper_method.clone(),
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    let main = fixture.main_method(&main_type);
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, main_type)
                .superclass(object)
                .direct_method(DexEncodedMethod::new(
                    main,
                    AccessFlags::PUBLIC | AccessFlags::STATIC,
                    Some(Code::new(vec![Instruction::InvokeStatic(helper_method)])),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class p.Main {{ public static void main(java.lang.String[]); }}\n-whyareyoukeeping class p.Helper\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    let chain = output
        .why_are_you_keeping
        .iter()
        .find(|chain| chain.contains("p.Helper"))
        .expect("asked item appears in the report");
    assert!(chain.contains("referenced in keep rule") || chain.contains("invoked from"));
}
