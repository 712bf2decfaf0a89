#![allow(dead_code)]

//! Shared helpers for assembling small test applications.
//!
//! Inputs are assembled programmatically through the public builder API; a
//! minimal library (`java.lang.Object`, `java.lang.String`) is always
//! present so resolution has a hierarchy root, and every test silences
//! warnings for the rest of the platform with `-dontwarn java.**`.

use std::sync::Arc;

use dexscope::prelude::*;

/// Rule line appended to every test configuration.
pub const DONT_WARN_PLATFORM: &str = "-dontwarn java.**";

/// A test application under construction.
pub struct AppFixture {
    pub factory: Arc<DexItemFactory>,
    pub builder: DexApplicationBuilder,
}

impl AppFixture {
    /// Creates a fixture over the shrinker's factory, with the minimal
    /// library classes installed.
    pub fn new(shrinker: &Shrinker) -> Self {
        let factory = shrinker.factory();
        let mut builder = DexApplication::builder(factory.clone());

        let object = factory.known.object_type.clone();
        let object_init = factory.create_method(
            object.clone(),
            factory.create_string("<init>"),
            factory.known.void_proto.clone(),
        );
        let object_class = DexClassBuilder::new(ClassKind::Library, object.clone())
            .direct_method(DexEncodedMethod::new(
                object_init,
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
                None,
            ))
            .origin(Origin::memory("library"))
            .build()
            .unwrap();
        builder.add_class(object_class).unwrap();

        let string = factory.known.string_type.clone();
        let string_class = DexClassBuilder::new(ClassKind::Library, string)
            .superclass(object)
            .flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
            .origin(Origin::memory("library"))
            .build()
            .unwrap();
        builder.add_class(string_class).unwrap();

        AppFixture { factory, builder }
    }

    /// Interns a class type from its descriptor.
    pub fn ty(&self, descriptor: &str) -> DexType {
        self.factory.create_type(descriptor).unwrap()
    }

    /// A `()V` method reference on `holder`.
    pub fn void_method(&self, holder: &DexType, name: &str) -> DexMethod {
        self.factory.create_method(
            holder.clone(),
            self.factory.create_string(name),
            self.factory.known.void_proto.clone(),
        )
    }

    /// The `public static void main(String[])` reference on `holder`.
    pub fn main_method(&self, holder: &DexType) -> DexMethod {
        let string_array = self.factory.create_type("[Ljava/lang/String;").unwrap();
        let void_type = self.factory.create_type("V").unwrap();
        self.factory.create_method(
            holder.clone(),
            self.factory.create_string("main"),
            self.factory.create_proto(void_type, vec![string_array]),
        )
    }

    /// A public default constructor definition with an empty body.
    pub fn default_init(&self, holder: &DexType) -> DexEncodedMethod {
        DexEncodedMethod::new(
            self.void_method(holder, "<init>"),
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            Some(Code::default()),
        )
    }

    /// Finishes the application.
    pub fn build(self) -> DexApplication {
        self.builder.build()
    }
}

/// The emitted class with the given (post-renaming) dotted name, if any.
pub fn find_class<'a>(output: &'a ShrinkOutput, java_name: &str) -> Option<&'a OutputClass> {
    output
        .classes
        .iter()
        .find(|class| class.ty.java_name() == java_name)
}

/// The mapping section for an original class name, if any.
pub fn mapping_for<'a>(
    output: &'a ShrinkOutput,
    original: &str,
) -> Option<&'a dexscope::naming::ClassMapping> {
    output
        .mapping
        .classes
        .iter()
        .find(|class| class.original == original)
}
