//! Renaming scenarios: override consistency, applied mappings, repackaging
//! and the mapping round-trip.

mod common;

use std::io::Write;

use common::{find_class, mapping_for, AppFixture, DONT_WARN_PLATFORM};
use dexscope::naming::ProguardMapping;
use dexscope::prelude::*;

fn override_pair_app(shrinker: &Shrinker) -> DexApplication {
    // class P { void foo() {} }  class Q extends P { void foo() {} }
    let mut fixture = AppFixture::new(shrinker);
    let object = fixture.factory.known.object_type.clone();
    let p = fixture.ty("Lp/P;");
    let q = fixture.ty("Lp/Q;");
    let foo_on_p = fixture.void_method(&p, "foo");
    let foo_on_q = fixture.void_method(&q, "foo");

    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, p.clone())
                .superclass(object)
                .direct_method(fixture.default_init(&p))
                .virtual_method(DexEncodedMethod::new(
                    foo_on_p,
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
            DexClassBuilder::new(ClassKind::Program, q.clone())
                .superclass(p)
                .direct_method(fixture.default_init(&q))
                .virtual_method(DexEncodedMethod::new(
                    foo_on_q,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    fixture.build()
}

/// Minification renames an overriding pair to the same short name.
#[test]
fn override_chain_shares_one_renamed_name() {
    let shrinker = Shrinker::new();
    let app = override_pair_app(&shrinker);
    let output = shrinker
        .application(app)
        .add_rules_text(format!(
            "-keep,allowobfuscation class p.P {{ <init>(); void foo(); }}\n-keep,allowobfuscation class p.Q {{ <init>(); void foo(); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    let p_foo = mapping_for(&output, "p.P")
        .and_then(|class| class.methods.iter().find(|method| method.original == "foo"))
        .expect("P.foo is mapped");
    let q_foo = mapping_for(&output, "p.Q")
        .and_then(|class| class.methods.iter().find(|method| method.original == "foo"))
        .expect("Q.foo is mapped");
    assert_eq!(p_foo.renamed, q_foo.renamed);
    assert_ne!(p_foo.renamed, "foo");
}

/// An applied mapping seeds both class and member names, and the produced
/// map agrees with the input on those entries.
#[test]
fn apply_mapping_seeds_names() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();
    let a = fixture.ty("La/A;");
    let m1 = fixture.void_method(&a, "m1");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, a)
                .superclass(object)
                .virtual_method(DexEncodedMethod::new(
                    m1,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mapping_path = dir.path().join("applied.map");
    let mut file = std::fs::File::create(&mapping_path).unwrap();
    writeln!(file, "a.A -> X:").unwrap();
    writeln!(file, "    void m1() -> n").unwrap();
    drop(file);

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep,allowobfuscation class a.A {{ void m1(); }}\n-applymapping {}\n{DONT_WARN_PLATFORM}",
            mapping_path.display()
        ))
        .run()
        .unwrap();

    let class = find_class(&output, "X").expect("emitted under the applied name");
    assert!(class
        .methods
        .iter()
        .any(|method| method.method.name().as_str() == "n"));
    let section = mapping_for(&output, "a.A").unwrap();
    assert_eq!(section.renamed, "X");
    assert_eq!(
        section
            .methods
            .iter()
            .find(|method| method.original == "m1")
            .unwrap()
            .renamed,
        "n"
    );
}

/// An applied mapping assigning two originals the same new name in one
/// namespace is a rule conflict.
#[test]
fn conflicting_apply_mapping_aborts() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();
    let a = fixture.ty("La/A;");
    let m1 = fixture.void_method(&a, "m1");
    let m2 = fixture.void_method(&a, "m2");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, a)
                .superclass(object)
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

    let dir = tempfile::tempdir().unwrap();
    let mapping_path = dir.path().join("applied.map");
    std::fs::write(
        &mapping_path,
        "a.A -> X:\n    void m1() -> n\n    void m2() -> n\n",
    )
    .unwrap();

    let result = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep,allowobfuscation class a.A {{ void m1(); void m2(); }}\n-applymapping {}\n{DONT_WARN_PLATFORM}",
            mapping_path.display()
        ))
        .run();
    assert!(matches!(result, Err(Error::RuleConflict(_))));
}

/// Emitting the map and parsing it back yields a lens semantically equal to
/// the minifier's.
#[test]
fn mapping_round_trips_to_an_equal_lens() {
    let shrinker = Shrinker::new();
    let factory = shrinker.factory();
    let app = override_pair_app(&shrinker);
    let output = shrinker
        .application(app)
        .add_rules_text(format!(
            "-keep,allowobfuscation class p.P {{ <init>(); void foo(); }}\n-keep,allowobfuscation class p.Q {{ <init>(); void foo(); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    let mut buffer = BufferConsumer::new();
    output.mapping.write(&mut buffer).unwrap();
    let parsed = ProguardMapping::parse(&buffer.contents()).unwrap();
    assert_eq!(parsed, output.mapping);

    let parsed_lens = parsed
        .to_lens(&factory, &GraphLens::Identity, &PinnedItems::default())
        .unwrap();
    let p = factory.create_type("Lp/P;").unwrap();
    let q = factory.create_type("Lp/Q;").unwrap();
    assert_eq!(
        parsed_lens.lookup_type(&p),
        output.final_lens.lookup_type(&p)
    );
    assert_eq!(
        parsed_lens.lookup_type(&q),
        output.final_lens.lookup_type(&q)
    );
    let foo = factory.create_method(
        p,
        factory.create_string("foo"),
        factory.known.void_proto.clone(),
    );
    assert_eq!(
        parsed_lens
            .lookup_method(&foo, None, InvokeKind::Virtual)
            .method,
        output
            .final_lens
            .lookup_method(&foo, None, InvokeKind::Virtual)
            .method
    );
}

/// `-repackageclasses` moves every renamed class into the target package.
#[test]
fn repackage_all_moves_classes_into_target_package() {
    let shrinker = Shrinker::new();
    let app = override_pair_app(&shrinker);
    let output = shrinker
        .application(app)
        .add_rules_text(format!(
            "-keep,allowobfuscation class p.P {{ <init>(); void foo(); }}\n-keep,allowobfuscation class p.Q {{ <init>(); void foo(); }}\n-repackageclasses 'o'\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    for section in output
        .mapping
        .classes
        .iter()
        .filter(|class| class.original.starts_with("p."))
    {
        assert!(
            section.renamed.starts_with("o."),
            "{} was repackaged to {}",
            section.original,
            section.renamed
        );
    }
}

/// Pinned names are reserved: a minified sibling never collides with a kept
/// member in the same namespace.
#[test]
fn pinned_names_are_reserved_during_minification() {
    let shrinker = Shrinker::new();
    let mut fixture = AppFixture::new(&shrinker);
    let object = fixture.factory.known.object_type.clone();
    let a = fixture.ty("La/A;");
    // `a` is exactly the first candidate the generator would produce
    let pinned_method = fixture.void_method(&a, "a");
    let other = fixture.void_method(&a, "other");
    fixture
        .builder
        .add_class(
            DexClassBuilder::new(ClassKind::Program, a)
                .superclass(object)
                .virtual_method(DexEncodedMethod::new(
                    pinned_method,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .virtual_method(DexEncodedMethod::new(
                    other,
                    AccessFlags::PUBLIC,
                    Some(Code::default()),
                ))
                .build()
                .unwrap(),
        )
        .unwrap();

    let output = shrinker
        .application(fixture.build())
        .add_rules_text(format!(
            "-keep class a.A {{ void a(); }}\n-keepclassmembers,allowobfuscation class a.A {{ void other(); }}\n{DONT_WARN_PLATFORM}"
        ))
        .run()
        .unwrap();

    let section = mapping_for(&output, "a.A").unwrap();
    let renamed_other = &section
        .methods
        .iter()
        .find(|method| method.original == "other")
        .unwrap()
        .renamed;
    assert_ne!(renamed_other, "a", "pinned name must stay reserved");
}
