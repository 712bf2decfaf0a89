//! Output consumers and the writer glue.
//!
//! The core does not serialize container formats; it delivers program
//! classes (with the final composed lens already applied) to an external
//! [`ProgramConsumer`], and its textual artifacts (mapping, seeds, usage)
//! to [`StringConsumer`]s. File-backed consumers are opened at stage entry
//! and closed on all exit paths; an error while finishing one consumer does
//! not prevent the others from being closed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::graph::{
    AccessFlags, DexApplication, DexField, DexMethod, DexType, GraphLens,
};
use crate::Result;

/// Receives lines of a textual artifact.
pub trait StringConsumer: Send {
    /// Accepts one chunk of output (typically one line, without newline).
    ///
    /// # Errors
    ///
    /// Propagates sink failures.
    fn accept(&mut self, text: &str) -> Result<()>;

    /// Called exactly once when the artifact is complete.
    ///
    /// # Errors
    ///
    /// Propagates flush/close failures.
    fn finished(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A consumer writing lines to a file, opened eagerly.
pub struct FileConsumer {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl FileConsumer {
    /// Opens the file for writing.
    ///
    /// # Errors
    ///
    /// I/O failure creating the file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        Ok(FileConsumer {
            writer: Some(BufWriter::new(file)),
            path,
        })
    }

    /// The path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StringConsumer for FileConsumer {
    fn accept(&mut self, text: &str) -> Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.write_all(text.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn finished(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileConsumer {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// An in-memory consumer, shared so tests can read back the contents.
#[derive(Debug, Clone, Default)]
pub struct BufferConsumer {
    contents: Arc<Mutex<String>>,
}

impl BufferConsumer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated contents.
    #[must_use]
    pub fn contents(&self) -> String {
        self.contents.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StringConsumer for BufferConsumer {
    fn accept(&mut self, text: &str) -> Result<()> {
        if let Ok(mut contents) = self.contents.lock() {
            contents.push_str(text);
            contents.push('\n');
        }
        Ok(())
    }
}

/// A field as emitted through the final lens.
#[derive(Debug, Clone)]
pub struct OutputField {
    /// The (rewritten) field reference.
    pub field: DexField,
    /// Access flags.
    pub flags: AccessFlags,
}

/// A method as emitted through the final lens.
#[derive(Debug, Clone)]
pub struct OutputMethod {
    /// The (rewritten) method reference.
    pub method: DexMethod,
    /// Access flags.
    pub flags: AccessFlags,
    /// Whether a body is present.
    pub has_code: bool,
}

/// One program class as delivered to the program consumer.
///
/// Every reference reachable from an emitted class is either a live program
/// class, a classpath class, or a library class.
#[derive(Debug, Clone)]
pub struct OutputClass {
    /// The (rewritten) class type.
    pub ty: DexType,
    /// The (rewritten) superclass.
    pub superclass: Option<DexType>,
    /// The (rewritten) interfaces.
    pub interfaces: Vec<DexType>,
    /// Access flags.
    pub flags: AccessFlags,
    /// Fields in declaration order.
    pub fields: Vec<OutputField>,
    /// Methods in declaration order.
    pub methods: Vec<OutputMethod>,
}

/// Receives the final program classes.
pub trait ProgramConsumer: Send {
    /// Accepts one emitted class.
    ///
    /// # Errors
    ///
    /// Propagates sink failures.
    fn accept_class(&mut self, class: &OutputClass) -> Result<()>;
}

/// A program consumer collecting emitted classes in memory.
#[derive(Debug, Default)]
pub struct CollectingProgramConsumer {
    /// Classes in emission (descriptor) order.
    pub classes: Vec<OutputClass>,
}

impl ProgramConsumer for CollectingProgramConsumer {
    fn accept_class(&mut self, class: &OutputClass) -> Result<()> {
        self.classes.push(class.clone());
        Ok(())
    }
}

/// Emits every program class through the composed lens, sorted by the
/// original descriptor (the interned identity's stable sort order).
///
/// # Errors
///
/// Propagates consumer failures.
pub fn emit_program(
    app: &DexApplication,
    lens: &GraphLens,
    consumer: &mut dyn ProgramConsumer,
) -> Result<()> {
    debug_assert!(lens.is_context_free_for_methods());
    let factory = &app.factory;
    for class in app.program_classes() {
        let output = OutputClass {
            ty: lens.lookup_type(&class.ty),
            superclass: class
                .superclass
                .as_ref()
                .map(|superclass| lens.lookup_type(superclass)),
            interfaces: class
                .interfaces
                .iter()
                .map(|interface| lens.lookup_type(interface))
                .collect(),
            flags: class.flags,
            fields: class
                .fields()
                .map(|field| OutputField {
                    field: lens.fully_rewrite_field(&field.field, factory),
                    flags: field.flags,
                })
                .collect(),
            methods: class
                .methods()
                .map(|method| OutputMethod {
                    method: lens.fully_rewrite_method(&method.method, factory),
                    flags: method.flags,
                    has_code: method.code.is_some(),
                })
                .collect(),
        };
        consumer.accept_class(&output)?;
    }
    Ok(())
}

/// Finishes a set of consumers, closing every one even if some fail.
///
/// # Errors
///
/// The first failure, after all consumers were closed.
pub fn finish_all(consumers: &mut [&mut dyn StringConsumer]) -> Result<()> {
    let mut first_error = None;
    for consumer in consumers {
        if let Err(error) = consumer.finished() {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_consumer_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut consumer = FileConsumer::create(&path).unwrap();
        consumer.accept("line one").unwrap();
        consumer.accept("line two").unwrap();
        consumer.finished().unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }

    #[test]
    fn buffer_consumer_accumulates() {
        let mut consumer = BufferConsumer::new();
        consumer.accept("a").unwrap();
        consumer.accept("b").unwrap();
        assert_eq!(consumer.contents(), "a\nb\n");
    }
}
