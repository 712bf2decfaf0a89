//! The compilation driver: wiring the stages into the full pipeline.
//!
//! Data flow: readers populate the application through the item factory; the
//! rule engine and root set builder produce seeds; the Enqueuer runs the
//! fixed point; the tree pruner drops dead items; member rebinding and
//! vertical class merging append lenses; a second Enqueuer round recomputes
//! liveness on the rewritten program; the minifier composes the final
//! renaming lens; the writer emits through the composed lens.
//!
//! Stages are strictly sequential; fan-out happens inside stages. Every
//! file-backed consumer is opened at stage entry and closed on all exit
//! paths, and a failure finishing one consumer does not prevent the others
//! from being closed.

use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::diagnostics::{Diagnostic, Reporter, Severity};
use crate::graph::{
    AppInfo, DexApplication, DexItemFactory, GraphLens, InputProvider,
};
use crate::naming::{Minifier, ProguardMapping};
use crate::optimize::{member_rebinding, vertical_merger};
use crate::options::InternalOptions;
use crate::output::{
    emit_program, finish_all, CollectingProgramConsumer, FileConsumer, OutputClass,
    ProgramConsumer, StringConsumer,
};
use crate::services::AppServices;
use crate::shaking::reasons::GraphNode;
use crate::shaking::{
    verify_check_discard, Enqueuer, ProguardConfig, RepackagePolicy, RootSet, RuleParser,
    TreePruner,
};
use crate::{Error, Result};

/// Everything one compilation produced.
pub struct ShrinkOutput {
    /// The emitted classes, when no external program consumer was supplied.
    pub classes: Vec<OutputClass>,
    /// The renaming map.
    pub mapping: ProguardMapping,
    /// Seeds lines (`class` / `class: member`), sorted.
    pub seeds: Vec<String>,
    /// Usage lines (one per removed element), sorted.
    pub usage: Vec<String>,
    /// `-whyareyoukeeping` chains, one block per asked item.
    pub why_are_you_keeping: Vec<String>,
    /// Every collected diagnostic, sorted by severity and origin.
    pub diagnostics: Vec<Diagnostic>,
    /// The final composed lens the output was emitted through.
    pub final_lens: GraphLens,
}

/// Builder-style entry point for one compilation.
pub struct Shrinker {
    factory: Arc<DexItemFactory>,
    application: Option<DexApplication>,
    providers: Vec<Box<dyn InputProvider>>,
    rule_files: Vec<PathBuf>,
    rule_texts: Vec<String>,
    options: InternalOptions,
    program_consumer: Option<Box<dyn ProgramConsumer>>,
    mapping_consumer: Option<Box<dyn StringConsumer>>,
    seeds_consumer: Option<Box<dyn StringConsumer>>,
    usage_consumer: Option<Box<dyn StringConsumer>>,
}

impl Shrinker {
    /// Starts a compilation with a fresh item factory.
    #[must_use]
    pub fn new() -> Self {
        Shrinker {
            factory: Arc::new(DexItemFactory::new()),
            application: None,
            providers: Vec::new(),
            rule_files: Vec::new(),
            rule_texts: Vec::new(),
            options: InternalOptions::default(),
            program_consumer: None,
            mapping_consumer: None,
            seeds_consumer: None,
            usage_consumer: None,
        }
    }

    /// The item factory of this compilation, for assembling inputs.
    #[must_use]
    pub fn factory(&self) -> Arc<DexItemFactory> {
        self.factory.clone()
    }

    /// Supplies a prebuilt application. Must have been built over
    /// [`Shrinker::factory`].
    #[must_use]
    pub fn application(mut self, application: DexApplication) -> Self {
        self.application = Some(application);
        self
    }

    /// Adds an input provider.
    #[must_use]
    pub fn add_input(mut self, provider: Box<dyn InputProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adds a rule file.
    #[must_use]
    pub fn add_rules_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.rule_files.push(path.into());
        self
    }

    /// Adds inline rule text.
    #[must_use]
    pub fn add_rules_text<S: Into<String>>(mut self, text: S) -> Self {
        self.rule_texts.push(text.into());
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn options(mut self, options: InternalOptions) -> Self {
        self.options = options;
        self
    }

    /// Sends emitted classes to an external consumer instead of collecting
    /// them in the output.
    #[must_use]
    pub fn program_consumer(mut self, consumer: Box<dyn ProgramConsumer>) -> Self {
        self.program_consumer = Some(consumer);
        self
    }

    /// Overrides the mapping sink (`-printmapping` path otherwise).
    #[must_use]
    pub fn mapping_consumer(mut self, consumer: Box<dyn StringConsumer>) -> Self {
        self.mapping_consumer = Some(consumer);
        self
    }

    /// Overrides the seeds sink (`-printseeds` path otherwise).
    #[must_use]
    pub fn seeds_consumer(mut self, consumer: Box<dyn StringConsumer>) -> Self {
        self.seeds_consumer = Some(consumer);
        self
    }

    /// Overrides the usage sink (`-printusage` path otherwise).
    #[must_use]
    pub fn usage_consumer(mut self, consumer: Box<dyn StringConsumer>) -> Self {
        self.usage_consumer = Some(consumer);
        self
    }

    /// Runs the whole pipeline.
    ///
    /// # Errors
    ///
    /// [`Error::CompilationFailed`] aggregating every fatal diagnostic of a
    /// stage; [`Error::CheckDiscardFailed`]; [`Error::Cancelled`]; plus I/O
    /// failures opening inputs or consumers.
    #[allow(clippy::too_many_lines)]
    pub fn run(mut self) -> Result<ShrinkOutput> {
        let reporter = Reporter::new();

        // Stage: read inputs.
        let app = match self.application.take() {
            Some(app) => app,
            None => {
                let mut builder = DexApplication::builder(self.factory.clone());
                for provider in &self.providers {
                    builder.read_from(provider.as_ref())?;
                }
                builder.build()
            }
        };
        let app = Arc::new(app);
        self.options.cancellation.check()?;

        // Stage: parse rules; all parse errors are reported together.
        let mut config = ProguardConfig::default();
        let parser = RuleParser::new(reporter.clone());
        for path in &self.rule_files {
            parser.parse_file(path, &mut config)?;
        }
        for text in &self.rule_texts {
            parser.parse_text(text, &mut config)?;
        }
        stage_boundary(&reporter)?;

        // Rule-driven toggles land in the options before validation.
        let mut options = self.options.clone();
        if config.dont_shrink {
            options.tree_shaking = false;
        }
        if config.dont_obfuscate {
            options.minification = false;
        }
        if config.dont_optimize {
            options.optimize = false;
        }
        if options.repackage == RepackagePolicy::None {
            options.repackage = config.repackage.clone();
        }
        if options.apply_mapping.is_none() {
            options.apply_mapping = config.apply_mapping.clone();
        }
        options.validate()?;

        // Stage: decode services.
        let services = AppServices::build(&app, &reporter);

        // Stage: root set and first reachability round.
        let app_info = AppInfo::new(app.clone());
        let mut root_set = RootSet::build(&app_info, &config);
        let enqueuer = Enqueuer::new(
            &app_info,
            &options,
            &config,
            &services,
            &reporter,
            &mut root_set,
            GraphLens::Identity,
        );
        let mut liveness = enqueuer.run()?;
        stage_boundary(&reporter)?;
        // Seeds include members kept by dependent rules that fired.
        let seeds = root_set.sorted_seeds();

        // `-whyareyoukeeping` chains come from the first round's reasons.
        let mut why_lines = Vec::new();
        {
            let mut asked: Vec<GraphNode> = Vec::new();
            for ty in &root_set.reason_asked.types {
                asked.push(GraphNode::Type(ty.clone()));
            }
            for field in &root_set.reason_asked.fields {
                asked.push(GraphNode::Field(field.clone()));
            }
            for method in &root_set.reason_asked.methods {
                asked.push(GraphNode::Method(method.clone()));
            }
            asked.sort_by_key(std::string::ToString::to_string);
            for node in asked {
                why_lines.push(liveness.reasons.format_chain(&node));
            }
        }

        // Stage: first pruning round.
        let pruner = TreePruner::new(&app_info, &liveness, &options);
        let pruned = pruner.run(&GraphLens::Identity, &root_set.pinned)?;
        let mut removed = pruned.removed;
        let mut lens = pruned.lens;
        let mut current_app = pruned.app;

        // Stage: lens producers.
        if options.optimize {
            let rebind_info = AppInfo::new(current_app.clone());
            lens = member_rebinding::run(&rebind_info, &lens, &root_set.pinned);
            liveness.field_accesses.flatten_access_contexts();

            let merge_info = AppInfo::new(current_app.clone());
            let merged = vertical_merger::run(&merge_info, &liveness, &lens, &root_set.pinned);
            lens = merged.lens;
            current_app = merged.app;
            removed.classes.extend(merged.merged_types);
        }

        // Stage: second reachability round on the rewritten program. The
        // lens keeps identities stable, so the same rules re-match.
        let removed_classes: FxHashSet<_> = removed.classes.clone();
        let services = services
            .pruned_copy(&removed_classes)
            .rewritten_with_lens(&lens);
        let app_info = AppInfo::new(current_app.clone());
        let mut round2_root_set = RootSet::build(&app_info, &config);
        merge_pinned(&mut round2_root_set, &root_set);
        let enqueuer = Enqueuer::new(
            &app_info,
            &options,
            &config,
            &services,
            &reporter,
            &mut round2_root_set,
            lens.clone(),
        );
        let liveness = enqueuer.run()?;
        stage_boundary(&reporter)?;

        // Stage: final pruning.
        let pruner = TreePruner::new(&app_info, &liveness, &options);
        let pruned = pruner.run(&lens, &round2_root_set.pinned)?;
        let lens = pruned.lens;
        let final_app = pruned.app;
        removed.classes.extend(pruned.removed.classes);
        removed.fields.extend(pruned.removed.fields);
        removed.methods.extend(pruned.removed.methods);

        // Stage: discarded checker.
        verify_check_discard(&root_set, &removed, &options)?;

        // Stage: minification.
        let applied = match &options.apply_mapping {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Some(ProguardMapping::parse(&text)?)
            }
            None => None,
        };
        let final_info = AppInfo::new(final_app.clone());
        let minifier = Minifier::new(&final_info, &round2_root_set, &options, applied.as_ref());
        let minified = minifier.run(&lens)?;
        let final_lens = minified.lens;
        let mapping = minified.mapping;

        // Stage: emit everything; consumers close on all exit paths.
        let usage_lines = removed.usage_lines();
        let seed_lines: Vec<String> = seeds
            .iter()
            .map(|seed| match &seed.member {
                Some(member) => format!(
                    "{}: {}",
                    seed.class.java_name(),
                    match member {
                        crate::graph::DexMember::Field(field) => field.java_signature(),
                        crate::graph::DexMember::Method(method) => method.java_signature(),
                    }
                ),
                None => seed.class.java_name(),
            })
            .collect();

        let mut collecting = CollectingProgramConsumer::default();
        let emit_result = self.emit_outputs(
            &final_app,
            &final_lens,
            &mapping,
            &seed_lines,
            &usage_lines,
            &config,
            &mut collecting,
        );
        emit_result?;
        stage_boundary(&reporter)?;

        Ok(ShrinkOutput {
            classes: collecting.classes,
            mapping,
            seeds: seed_lines,
            usage: usage_lines,
            why_are_you_keeping: why_lines,
            diagnostics: reporter.sorted(),
            final_lens,
        })
    }

    /// Writes program, mapping, seeds and usage outputs; every consumer is
    /// finished even when an earlier one fails.
    #[allow(clippy::too_many_arguments)]
    fn emit_outputs(
        &mut self,
        app: &DexApplication,
        lens: &GraphLens,
        mapping: &ProguardMapping,
        seeds: &[String],
        usage: &[String],
        config: &ProguardConfig,
        collecting: &mut CollectingProgramConsumer,
    ) -> Result<()> {
        let program_result = match &mut self.program_consumer {
            Some(consumer) => emit_program(app, lens, consumer.as_mut()),
            None => emit_program(app, lens, collecting),
        };

        let mut mapping_consumer =
            take_or_open(self.mapping_consumer.take(), config.print_mapping.as_ref())?;
        let mut seeds_consumer =
            take_or_open(self.seeds_consumer.take(), config.print_seeds.as_ref())?;
        let mut usage_consumer =
            take_or_open(self.usage_consumer.take(), config.print_usage.as_ref())?;

        let mut write_result = Ok(());
        if let Some(consumer) = &mut mapping_consumer {
            write_result = write_result.and(mapping.write(consumer.as_mut()));
        }
        if let Some(consumer) = &mut seeds_consumer {
            for line in seeds {
                write_result = write_result.and(consumer.accept(line));
            }
        }
        if let Some(consumer) = &mut usage_consumer {
            for line in usage {
                write_result = write_result.and(consumer.accept(line));
            }
        }

        let mut open: Vec<&mut dyn StringConsumer> = Vec::new();
        if let Some(consumer) = &mut mapping_consumer {
            open.push(consumer.as_mut());
        }
        if let Some(consumer) = &mut seeds_consumer {
            open.push(consumer.as_mut());
        }
        if let Some(consumer) = &mut usage_consumer {
            open.push(consumer.as_mut());
        }
        let finish_result = finish_all(&mut open);

        program_result.and(write_result).and(finish_result)
    }
}

impl Default for Shrinker {
    fn default() -> Self {
        Self::new()
    }
}

/// Uses the caller-supplied consumer, or opens the configured path.
fn take_or_open(
    explicit: Option<Box<dyn StringConsumer>>,
    configured: Option<&Option<PathBuf>>,
) -> Result<Option<Box<dyn StringConsumer>>> {
    if explicit.is_some() {
        return Ok(explicit);
    }
    match configured {
        Some(Some(path)) => Ok(Some(Box::new(FileConsumer::create(path)?))),
        _ => Ok(None),
    }
}

/// Pinning is monotone: the second round inherits every pin of the first.
fn merge_pinned(target: &mut RootSet, source: &RootSet) {
    target
        .pinned
        .types
        .extend(source.pinned.types.iter().cloned());
    target
        .pinned
        .fields
        .extend(source.pinned.fields.iter().cloned());
    target
        .pinned
        .methods
        .extend(source.pinned.methods.iter().cloned());
}

/// Fatal errors are raised only at stage boundaries, aggregated so the user
/// sees all of them at once.
fn stage_boundary(reporter: &Reporter) -> Result<()> {
    if !reporter.has_errors() {
        return Ok(());
    }
    let fatal: Vec<String> = reporter
        .sorted()
        .into_iter()
        .filter(|diagnostic| diagnostic.severity == Severity::Error)
        .map(|diagnostic| diagnostic.to_string())
        .collect();
    Err(Error::CompilationFailed {
        count: fatal.len(),
        details: fatal.join("\n"),
    })
}
