//! The reachability fixed point.
//!
//! The Enqueuer seeds its worklist from the root set and applies transition
//! rules until closure: types become live, types become instantiated, methods
//! become live and have their bodies traced, fields accumulate access info,
//! call sites are resolved or desugared. Convergence is guaranteed because
//! the lattice is the powerset of the finitely many interned references and
//! every transition is monotone.
//!
//! Method bodies are traced in batches at worklist drain: the pending batch
//! fans out across a [`rayon`] pool against an immutable application
//! snapshot, each worker filling a local event buffer, and the buffers are
//! merged sequentially afterwards. Merge order is unobservable because the
//! live sets are monotone. Pending virtual dispatches are indexed per
//! resolved method so an instantiation arriving later completes dispatch
//! retroactively.
//!
//! Tracing errors inside one method never abort the round; they are recorded
//! against the method's context and surfaced after the round ends.

use std::collections::VecDeque;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::diagnostics::{DiagnosticKind, Origin, Reporter};
use crate::graph::{
    AccessFlags, AppInfo, BootstrapArg, Code, DexCallSite, DexClassBuilder, DexClassRc,
    DexEncodedMethod, DexField, DexItemFactory, DexMember, DexMethod, DexMethodHandle, DexString,
    DexType, FieldAccessFlags, FieldAccessInfoCollection, FieldResolutionResult, GraphLens,
    Instruction, InvokeKind, KnownItems, MethodResolutionResult, SingleResolution, UseRegistry,
};
use crate::options::InternalOptions;
use crate::services::AppServices;
use crate::shaking::reasons::{GraphNode, KeptReason, ReasonGraph};
use crate::shaking::root_set::RootSet;
use crate::shaking::rules::ProguardConfig;
use crate::Result;

/// The liveness view produced by one reachability round.
#[derive(Debug, Default)]
pub struct LivenessView {
    /// Live types.
    pub live_types: FxHashSet<DexType>,
    /// Live methods (by resolved definition reference).
    pub live_methods: FxHashSet<DexMethod>,
    /// Live fields (by resolved definition reference).
    pub live_fields: FxHashSet<DexField>,
    /// Types that may appear as dynamic receivers.
    pub instantiated_types: FxHashSet<DexType>,
    /// Per-field access info.
    pub field_accesses: FieldAccessInfoCollection,
    /// Resolved virtual/interface invokes seen during tracing.
    pub virtual_invokes: FxHashMap<DexMethod, SingleResolution>,
    /// Non-lambda call sites, with their tracing context.
    pub call_sites: Vec<(DexCallSite, DexMethod)>,
    /// Why each item became live.
    pub reasons: ReasonGraph,
    /// Lambda accessor classes synthesized during tracing.
    pub synthesized: Vec<DexClassRc>,
}

/// One unit of worklist work.
enum Action {
    MarkTypeLive(DexType, KeptReason),
    MarkInstantiated(DexType, KeptReason),
    MarkMethodLive(DexMethod, KeptReason),
    MarkFieldLive(DexField, KeptReason),
}

/// One reference reported while tracing a single body.
enum TraceEvent {
    Invoke {
        kind: InvokeKind,
        method: DexMethod,
    },
    FieldAccess {
        field: DexField,
        is_write: bool,
    },
    NewInstance(DexType),
    TypeUse(DexType),
    MethodHandleUse(DexMethodHandle),
    CallSite(DexCallSite),
    ServiceLoad(DexType),
    ReflectiveClassUse(DexType),
    ReflectiveMethodUse {
        holder: DexType,
        name: DexString,
    },
    ReflectiveFieldUse {
        holder: DexType,
        name: DexString,
    },
}

/// The recognized reflective idioms. The set varies across platform
/// versions; it is kept as a configuration constant in one place.
enum ReflectiveIdiom {
    ClassForName,
    MethodLookup,
    FieldLookup,
}

fn reflective_idiom_of(known: &KnownItems, method: &DexMethod) -> Option<ReflectiveIdiom> {
    if method == &known.class_for_name {
        Some(ReflectiveIdiom::ClassForName)
    } else if method == &known.class_get_declared_method || method == &known.class_get_method {
        Some(ReflectiveIdiom::MethodLookup)
    } else if method == &known.class_get_declared_field || method == &known.class_get_field {
        Some(ReflectiveIdiom::FieldLookup)
    } else {
        None
    }
}

/// Registry that records trace events for one method body.
///
/// Purely syntactic: resolution happens at merge time so tracing can fan out
/// against the immutable snapshot. The registry remembers the most recent
/// string and class constants to recognize reflective idioms and
/// `ServiceLoader.load(X.class)` call patterns.
struct TracingUseRegistry<'a> {
    factory: &'a DexItemFactory,
    events: Vec<TraceEvent>,
    last_const_string: Option<DexString>,
    last_const_class: Option<DexType>,
}

impl<'a> TracingUseRegistry<'a> {
    fn new(factory: &'a DexItemFactory) -> Self {
        TracingUseRegistry {
            factory,
            events: Vec::new(),
            last_const_string: None,
            last_const_class: None,
        }
    }

    fn clear_constants(&mut self) {
        self.last_const_string = None;
        self.last_const_class = None;
    }

    fn register_invoke(&mut self, kind: InvokeKind, method: &DexMethod) {
        let known = &self.factory.known;
        if method == &known.service_loader_load {
            if let Some(service) = self.last_const_class.take() {
                self.events.push(TraceEvent::ServiceLoad(service));
            }
        }
        match reflective_idiom_of(known, method) {
            Some(ReflectiveIdiom::ClassForName) => {
                if let Some(name) = &self.last_const_string {
                    if let Ok(ty) = self.factory.create_type_from_java_name(name.as_str()) {
                        self.events.push(TraceEvent::ReflectiveClassUse(ty));
                    }
                }
            }
            Some(ReflectiveIdiom::MethodLookup) => {
                if let (Some(holder), Some(name)) =
                    (self.last_const_class.clone(), self.last_const_string.clone())
                {
                    self.events
                        .push(TraceEvent::ReflectiveMethodUse { holder, name });
                }
            }
            Some(ReflectiveIdiom::FieldLookup) => {
                if let (Some(holder), Some(name)) =
                    (self.last_const_class.clone(), self.last_const_string.clone())
                {
                    self.events
                        .push(TraceEvent::ReflectiveFieldUse { holder, name });
                }
            }
            None => {}
        }
        self.events.push(TraceEvent::Invoke {
            kind,
            method: method.clone(),
        });
        self.clear_constants();
    }

    fn register_field(&mut self, field: &DexField, is_write: bool) {
        self.events.push(TraceEvent::FieldAccess {
            field: field.clone(),
            is_write,
        });
        self.clear_constants();
    }
}

impl UseRegistry for TracingUseRegistry<'_> {
    fn register_invoke_virtual(&mut self, method: &DexMethod) {
        self.register_invoke(InvokeKind::Virtual, method);
    }

    fn register_invoke_direct(&mut self, method: &DexMethod) {
        self.register_invoke(InvokeKind::Direct, method);
    }

    fn register_invoke_static(&mut self, method: &DexMethod) {
        self.register_invoke(InvokeKind::Static, method);
    }

    fn register_invoke_interface(&mut self, method: &DexMethod) {
        self.register_invoke(InvokeKind::Interface, method);
    }

    fn register_invoke_super(&mut self, method: &DexMethod) {
        self.register_invoke(InvokeKind::Super, method);
    }

    fn register_static_field_read(&mut self, field: &DexField) {
        self.register_field(field, false);
    }

    fn register_static_field_write(&mut self, field: &DexField) {
        self.register_field(field, true);
    }

    fn register_instance_field_read(&mut self, field: &DexField) {
        self.register_field(field, false);
    }

    fn register_instance_field_write(&mut self, field: &DexField) {
        self.register_field(field, true);
    }

    fn register_new_instance(&mut self, ty: &DexType) {
        self.events.push(TraceEvent::NewInstance(ty.clone()));
        self.clear_constants();
    }

    fn register_const_class(&mut self, ty: &DexType) {
        self.events.push(TraceEvent::TypeUse(ty.clone()));
        self.last_const_class = Some(ty.clone());
    }

    fn register_const_string(&mut self, value: &DexString) {
        self.last_const_string = Some(value.clone());
    }

    fn register_check_cast(&mut self, ty: &DexType) {
        self.events.push(TraceEvent::TypeUse(ty.clone()));
        self.clear_constants();
    }

    fn register_type_reference(&mut self, ty: &DexType) {
        self.events.push(TraceEvent::TypeUse(ty.clone()));
    }

    fn register_method_handle(&mut self, handle: &DexMethodHandle) {
        self.events.push(TraceEvent::MethodHandleUse(handle.clone()));
        self.clear_constants();
    }

    fn register_call_site(&mut self, call_site: &DexCallSite) {
        self.events.push(TraceEvent::CallSite(call_site.clone()));
        self.clear_constants();
    }
}

/// The worklist fixed point computing liveness of types, fields and methods.
pub struct Enqueuer<'a> {
    app_info: &'a AppInfo,
    options: &'a InternalOptions,
    config: &'a ProguardConfig,
    services: &'a AppServices,
    reporter: &'a Reporter,
    root_set: &'a mut RootSet,
    /// The lens installed by earlier rounds; traced references are looked
    /// up through it so later rounds see current identities even though
    /// method bodies are never rewritten.
    lens: GraphLens,
    worklist: VecDeque<Action>,
    pending_traces: Vec<DexMethod>,
    live_types: FxHashSet<DexType>,
    live_methods: FxHashSet<DexMethod>,
    live_fields: FxHashSet<DexField>,
    instantiated_types: FxHashSet<DexType>,
    traced_methods: FxHashSet<DexMethod>,
    virtual_invokes: FxHashMap<DexMethod, SingleResolution>,
    field_accesses: FieldAccessInfoCollection,
    call_sites: Vec<(DexCallSite, DexMethod)>,
    reasons: ReasonGraph,
    synthesized: Vec<DexClassRc>,
    reported_missing: FxHashSet<DexType>,
    fired_if_rules: FxHashSet<usize>,
    lambda_counter: u32,
}

impl<'a> Enqueuer<'a> {
    /// Creates an Enqueuer over one round's application snapshot.
    pub fn new(
        app_info: &'a AppInfo,
        options: &'a InternalOptions,
        config: &'a ProguardConfig,
        services: &'a AppServices,
        reporter: &'a Reporter,
        root_set: &'a mut RootSet,
        lens: GraphLens,
    ) -> Self {
        Enqueuer {
            app_info,
            options,
            config,
            services,
            reporter,
            root_set,
            lens,
            worklist: VecDeque::new(),
            pending_traces: Vec::new(),
            live_types: FxHashSet::default(),
            live_methods: FxHashSet::default(),
            live_fields: FxHashSet::default(),
            instantiated_types: FxHashSet::default(),
            traced_methods: FxHashSet::default(),
            virtual_invokes: FxHashMap::default(),
            field_accesses: FieldAccessInfoCollection::default(),
            call_sites: Vec::new(),
            reasons: ReasonGraph::default(),
            synthesized: Vec::new(),
            reported_missing: FxHashSet::default(),
            fired_if_rules: FxHashSet::default(),
            lambda_counter: 0,
        }
    }

    /// Runs the fixed point to completion.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Cancelled`] when the cancellation token fires between
    /// drains. Tracing problems are reported, never returned.
    pub fn run(mut self) -> Result<LivenessView> {
        self.seed_from_root_set();
        loop {
            self.options.cancellation.check()?;
            while let Some(action) = self.worklist.pop_front() {
                self.apply(action);
            }
            if !self.pending_traces.is_empty() {
                self.trace_pending_batch();
                continue;
            }
            if self.materialize_if_rules() {
                continue;
            }
            break;
        }
        Ok(LivenessView {
            live_types: self.live_types,
            live_methods: self.live_methods,
            live_fields: self.live_fields,
            instantiated_types: self.instantiated_types,
            field_accesses: self.field_accesses,
            virtual_invokes: self.virtual_invokes,
            call_sites: self.call_sites,
            reasons: self.reasons,
            synthesized: self.synthesized,
        })
    }

    fn seed_from_root_set(&mut self) {
        for ty in self.root_set.live_types.clone() {
            self.worklist
                .push_back(Action::MarkTypeLive(ty, KeptReason::KeepRule));
        }
        for ty in self.root_set.instantiated_types.clone() {
            self.worklist
                .push_back(Action::MarkInstantiated(ty, KeptReason::KeepRule));
        }
        for field in self.root_set.live_fields.clone() {
            self.worklist
                .push_back(Action::MarkFieldLive(field, KeptReason::KeepRule));
        }
        for method in self.root_set.live_methods.clone() {
            self.worklist
                .push_back(Action::MarkMethodLive(method, KeptReason::KeepRule));
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::MarkTypeLive(ty, reason) => self.handle_type_live(&ty, reason),
            Action::MarkInstantiated(ty, reason) => self.handle_instantiated(&ty, reason),
            Action::MarkMethodLive(method, reason) => self.handle_method_live(&method, reason),
            Action::MarkFieldLive(field, reason) => self.handle_field_live(&field, reason),
        }
    }

    /// Transition: a type becomes live.
    fn handle_type_live(&mut self, ty: &DexType, reason: KeptReason) {
        if ty.is_primitive() {
            return;
        }
        if ty.is_array() {
            let base = ty.base_element().clone();
            self.handle_type_live(&base, reason);
            return;
        }
        if !self.live_types.insert(ty.clone()) {
            return;
        }
        self.reasons.record(GraphNode::Type(ty.clone()), reason);

        let Some(class) = self.app_info.definition_for(ty) else {
            self.report_missing_class(ty);
            return;
        };

        // Supertype and interfaces become live.
        if let Some(superclass) = &class.superclass {
            self.worklist.push_back(Action::MarkTypeLive(
                superclass.clone(),
                KeptReason::ReachableFromType(ty.clone()),
            ));
        }
        for interface in &class.interfaces {
            self.worklist.push_back(Action::MarkTypeLive(
                interface.clone(),
                KeptReason::ReachableFromType(ty.clone()),
            ));
        }

        // Static initializers are enqueued for tracing.
        if class.is_program() {
            if let Some(clinit) = class.class_initializer() {
                self.worklist.push_back(Action::MarkMethodLive(
                    clinit.method.clone(),
                    KeptReason::ReachableFromType(ty.clone()),
                ));
            }
        }

        // Annotation scan.
        if self.options.keep_annotations {
            self.scan_annotations(&class);
        }

        // Trigger `keepclassmembers` rules predicated on this type.
        if let Some(rules) = self.root_set.dependent_member_rules.get(ty).cloned() {
            for rule in rules {
                for member in &rule.members {
                    self.root_set
                        .keep_member(rule.modifiers, &rule.holder, member);
                    if rule.modifiers.allow_shrinking {
                        continue;
                    }
                    match member {
                        DexMember::Field(field) => {
                            self.worklist.push_back(Action::MarkFieldLive(
                                field.clone(),
                                KeptReason::ConditionalKeepRule,
                            ));
                        }
                        DexMember::Method(method) => {
                            self.worklist.push_back(Action::MarkMethodLive(
                                method.clone(),
                                KeptReason::ConditionalKeepRule,
                            ));
                        }
                    }
                }
            }
        }
    }

    fn scan_annotations(&mut self, class: &DexClassRc) {
        let mut annotation_types = Vec::new();
        let mut annotation_fields = Vec::new();
        for annotation in &class.annotations {
            collect_annotation_references(annotation, &mut annotation_types, &mut annotation_fields);
        }
        for member in class.methods() {
            for annotation in &member.annotations {
                collect_annotation_references(
                    annotation,
                    &mut annotation_types,
                    &mut annotation_fields,
                );
            }
        }
        for member in class.fields() {
            for annotation in &member.annotations {
                collect_annotation_references(
                    annotation,
                    &mut annotation_types,
                    &mut annotation_fields,
                );
            }
        }
        for annotation_type in annotation_types {
            self.worklist.push_back(Action::MarkTypeLive(
                annotation_type,
                KeptReason::ReachableFromType(class.ty.clone()),
            ));
        }
        for field in annotation_fields {
            if let FieldResolutionResult::Single { field: resolved, .. } =
                self.app_info.resolve_field(field.holder(), &field)
            {
                self.field_accesses
                    .get_or_create(&resolved)
                    .set_flags(FieldAccessFlags::READ_FROM_ANNOTATION);
                self.worklist.push_back(Action::MarkFieldLive(
                    resolved,
                    KeptReason::ReachableFromType(class.ty.clone()),
                ));
            }
        }
    }

    /// Transition: a type becomes instantiated.
    fn handle_instantiated(&mut self, ty: &DexType, reason: KeptReason) {
        self.handle_type_live(ty, reason.clone());
        if ty.is_primitive() || ty.is_array() {
            return;
        }
        if !self.instantiated_types.insert(ty.clone()) {
            return;
        }
        self.reasons.record(GraphNode::Type(ty.clone()), reason);

        // Retroactively complete every recorded virtual dispatch that this
        // new receiver type participates in.
        let resolutions: Vec<SingleResolution> = self.virtual_invokes.values().cloned().collect();
        for resolution in resolutions {
            if !self.app_info.is_subtype(ty, &resolution.holder) {
                continue;
            }
            if let Some(target) = self.app_info.lookup_dispatch_target(ty, &resolution.method) {
                if self
                    .app_info
                    .app()
                    .program_definition_for(&target.holder)
                    .is_some()
                {
                    self.worklist.push_back(Action::MarkMethodLive(
                        target.method,
                        KeptReason::ReachableFromType(ty.clone()),
                    ));
                }
            }
        }
    }

    /// Transition: a method becomes live.
    fn handle_method_live(&mut self, method: &DexMethod, reason: KeptReason) {
        if !self.live_methods.insert(method.clone()) {
            return;
        }
        self.reasons
            .record(GraphNode::Method(method.clone()), reason.clone());

        self.worklist.push_back(Action::MarkTypeLive(
            method.holder().clone(),
            KeptReason::ReferencedFrom(method.clone()),
        ));
        for parameter in method.proto().parameters() {
            self.worklist.push_back(Action::MarkTypeLive(
                parameter.clone(),
                KeptReason::ReferencedFrom(method.clone()),
            ));
        }
        self.worklist.push_back(Action::MarkTypeLive(
            method.proto().return_type().clone(),
            KeptReason::ReferencedFrom(method.clone()),
        ));

        // An instance constructor makes the holder instantiated.
        if method.is_instance_initializer() {
            self.worklist.push_back(Action::MarkInstantiated(
                method.holder().clone(),
                reason,
            ));
        }

        // Enqueue the body for tracing.
        if self.traced_methods.insert(method.clone()) {
            self.pending_traces.push(method.clone());
        }
    }

    /// Transition: a field becomes live.
    fn handle_field_live(&mut self, field: &DexField, reason: KeptReason) {
        if !self.live_fields.insert(field.clone()) {
            return;
        }
        self.reasons.record(GraphNode::Field(field.clone()), reason);
        self.worklist.push_back(Action::MarkTypeLive(
            field.holder().clone(),
            KeptReason::ReachableFromType(field.holder().clone()),
        ));
        self.worklist.push_back(Action::MarkTypeLive(
            field.field_type().clone(),
            KeptReason::ReachableFromType(field.holder().clone()),
        ));
    }

    /// Drains the pending batch: parallel per-body tracing against the
    /// immutable snapshot, then a sequential merge of the event buffers.
    fn trace_pending_batch(&mut self) {
        let batch = std::mem::take(&mut self.pending_traces);
        let app_info = self.app_info;
        let factory: &DexItemFactory = &app_info.app().factory;
        let traced: Vec<(DexMethod, Vec<TraceEvent>)> = batch
            .into_par_iter()
            .filter_map(|method| {
                let class = app_info.definition_for(method.holder())?;
                if !class.is_program() {
                    return None;
                }
                let definition = class.lookup_method_by_signature(&method)?;
                let code = definition.code.as_ref()?;
                let mut registry = TracingUseRegistry::new(factory);
                code.register_references(&mut registry);
                Some((method, registry.events))
            })
            .collect();
        for (context, events) in traced {
            for event in events {
                self.apply_trace_event(&context, event);
            }
        }
    }

    /// Looks the references of one event up through the current lens.
    fn rewrite_event(&self, event: TraceEvent) -> TraceEvent {
        if self.lens.is_identity() {
            return event;
        }
        match event {
            TraceEvent::Invoke { kind, method } => {
                let lookup = self.lens.lookup_method(&method, None, kind);
                TraceEvent::Invoke {
                    kind: lookup.invoke_kind,
                    method: lookup.method,
                }
            }
            TraceEvent::FieldAccess { field, is_write } => TraceEvent::FieldAccess {
                field: self.lens.lookup_field(&field),
                is_write,
            },
            TraceEvent::NewInstance(ty) => TraceEvent::NewInstance(self.lens.lookup_type(&ty)),
            TraceEvent::TypeUse(ty) => TraceEvent::TypeUse(self.lens.lookup_type(&ty)),
            TraceEvent::ServiceLoad(ty) => TraceEvent::ServiceLoad(self.lens.lookup_type(&ty)),
            TraceEvent::ReflectiveClassUse(ty) => {
                TraceEvent::ReflectiveClassUse(self.lens.lookup_type(&ty))
            }
            TraceEvent::ReflectiveMethodUse { holder, name } => TraceEvent::ReflectiveMethodUse {
                holder: self.lens.lookup_type(&holder),
                name,
            },
            TraceEvent::ReflectiveFieldUse { holder, name } => TraceEvent::ReflectiveFieldUse {
                holder: self.lens.lookup_type(&holder),
                name,
            },
            TraceEvent::MethodHandleUse(handle) => {
                TraceEvent::MethodHandleUse(self.rewrite_handle(handle))
            }
            TraceEvent::CallSite(call_site) => TraceEvent::CallSite(call_site),
        }
    }

    fn rewrite_handle(&self, handle: DexMethodHandle) -> DexMethodHandle {
        match handle {
            DexMethodHandle::Method { kind, method } => {
                let lookup = self.lens.lookup_method(&method, None, kind);
                DexMethodHandle::Method {
                    kind: lookup.invoke_kind,
                    method: lookup.method,
                }
            }
            DexMethodHandle::FieldRead { field, is_static } => DexMethodHandle::FieldRead {
                field: self.lens.lookup_field(&field),
                is_static,
            },
            DexMethodHandle::FieldWrite { field, is_static } => DexMethodHandle::FieldWrite {
                field: self.lens.lookup_field(&field),
                is_static,
            },
        }
    }

    #[allow(clippy::too_many_lines)]
    fn apply_trace_event(&mut self, context: &DexMethod, event: TraceEvent) {
        let event = self.rewrite_event(event);
        match event {
            TraceEvent::Invoke { kind, method } => self.trace_invoke(context, kind, &method),
            TraceEvent::FieldAccess { field, is_write } => {
                self.trace_field_access(context, &field, is_write, FieldAccessFlags::empty());
            }
            TraceEvent::NewInstance(ty) => {
                self.worklist.push_back(Action::MarkInstantiated(
                    ty,
                    KeptReason::InstantiatedIn(context.clone()),
                ));
            }
            TraceEvent::TypeUse(ty) => {
                self.worklist.push_back(Action::MarkTypeLive(
                    ty,
                    KeptReason::ReferencedFrom(context.clone()),
                ));
            }
            TraceEvent::MethodHandleUse(handle) => self.trace_method_handle(context, &handle),
            TraceEvent::CallSite(call_site) => self.trace_call_site(context, call_site),
            TraceEvent::ServiceLoad(service) => self.trace_service_load(context, &service),
            TraceEvent::ReflectiveClassUse(ty) => {
                self.worklist.push_back(Action::MarkTypeLive(
                    ty,
                    KeptReason::ReflectiveUse(context.clone()),
                ));
            }
            TraceEvent::ReflectiveMethodUse { holder, name } => {
                if let Some(class) = self.app_info.definition_for(&holder) {
                    let matching: Vec<DexMethod> = class
                        .methods()
                        .filter(|candidate| candidate.method.name() == &name)
                        .map(|candidate| candidate.method.clone())
                        .collect();
                    for method in matching {
                        self.worklist.push_back(Action::MarkMethodLive(
                            method,
                            KeptReason::ReflectiveUse(context.clone()),
                        ));
                    }
                }
            }
            TraceEvent::ReflectiveFieldUse { holder, name } => {
                if let Some(class) = self.app_info.definition_for(&holder) {
                    let matching: Vec<DexField> = class
                        .fields()
                        .filter(|candidate| candidate.field.name() == &name)
                        .map(|candidate| candidate.field.clone())
                        .collect();
                    for field in matching {
                        self.field_accesses
                            .get_or_create(&field)
                            .set_flags(FieldAccessFlags::REFLECTIVE_ACCESS);
                        self.worklist.push_back(Action::MarkFieldLive(
                            field,
                            KeptReason::ReflectiveUse(context.clone()),
                        ));
                    }
                }
            }
        }
    }

    fn trace_invoke(&mut self, context: &DexMethod, kind: InvokeKind, method: &DexMethod) {
        if self.root_set.assume_no_side_effects.contains(method) {
            return;
        }
        match kind {
            InvokeKind::Static | InvokeKind::Direct => {
                match self.app_info.resolve_method(method.holder(), method) {
                    MethodResolutionResult::Single(resolution) => {
                        if self
                            .root_set
                            .assume_no_side_effects
                            .contains(&resolution.method)
                        {
                            return;
                        }
                        self.check_access(context, &resolution);
                        self.check_static_consistency(context, kind, &resolution);
                        self.worklist.push_back(Action::MarkMethodLive(
                            resolution.method,
                            KeptReason::InvokedFrom(context.clone()),
                        ));
                    }
                    MethodResolutionResult::ClassNotFound(ty) => self.report_missing_class(&ty),
                    failure => self.report_resolution_failure(context, method, &failure),
                }
            }
            InvokeKind::Super => {
                match self.app_info.lookup_super_target(method, context.holder()) {
                    Some(resolution) => {
                        self.worklist.push_back(Action::MarkMethodLive(
                            resolution.method,
                            KeptReason::InvokedFrom(context.clone()),
                        ));
                    }
                    None => self.report_resolution_failure(
                        context,
                        method,
                        &MethodResolutionResult::NoSuchMethod,
                    ),
                }
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                match self.app_info.resolve_method(method.holder(), method) {
                    MethodResolutionResult::Single(resolution) => {
                        if self
                            .root_set
                            .assume_no_side_effects
                            .contains(&resolution.method)
                        {
                            return;
                        }
                        self.check_access(context, &resolution);
                        // The resolved definition survives as the dispatch
                        // anchor even when abstract.
                        self.worklist.push_back(Action::MarkMethodLive(
                            resolution.method.clone(),
                            KeptReason::ReferencedFrom(context.clone()),
                        ));
                        // Record the resolution so future instantiations
                        // complete the dispatch retroactively.
                        self.virtual_invokes
                            .entry(resolution.method.clone())
                            .or_insert_with(|| resolution.clone());
                        // Dispatch into every receiver already instantiated.
                        let targets = self
                            .app_info
                            .lookup_virtual_dispatch_targets(&resolution, &self.instantiated_types);
                        for target in targets {
                            self.worklist.push_back(Action::MarkMethodLive(
                                target,
                                KeptReason::InvokedFrom(context.clone()),
                            ));
                        }
                    }
                    MethodResolutionResult::ClassNotFound(ty) => self.report_missing_class(&ty),
                    failure => self.report_resolution_failure(context, method, &failure),
                }
            }
        }
    }

    fn trace_field_access(
        &mut self,
        context: &DexMethod,
        field: &DexField,
        is_write: bool,
        extra_flags: FieldAccessFlags,
    ) {
        match self.app_info.resolve_field(field.holder(), field) {
            FieldResolutionResult::Single { field: resolved, .. } => {
                let info = self.field_accesses.get_or_create(&resolved);
                if is_write {
                    info.record_write(field.clone(), context.clone());
                } else {
                    info.record_read(field.clone(), context.clone());
                }
                if !extra_flags.is_empty() {
                    info.set_flags(extra_flags);
                }
                self.worklist.push_back(Action::MarkFieldLive(
                    resolved,
                    KeptReason::ReferencedFrom(context.clone()),
                ));
            }
            FieldResolutionResult::ClassNotFound(ty) => self.report_missing_class(&ty),
            FieldResolutionResult::NoSuchField => {
                self.report_field_resolution_failure(context, field);
            }
        }
    }

    fn trace_method_handle(&mut self, context: &DexMethod, handle: &DexMethodHandle) {
        match handle {
            DexMethodHandle::Method { method, .. } => {
                if let MethodResolutionResult::Single(resolution) =
                    self.app_info.resolve_method(method.holder(), method)
                {
                    self.worklist.push_back(Action::MarkMethodLive(
                        resolution.method,
                        KeptReason::MethodHandleUse(context.clone()),
                    ));
                }
            }
            DexMethodHandle::FieldRead { field, .. } => {
                self.trace_field_access(
                    context,
                    field,
                    false,
                    FieldAccessFlags::READ_FROM_METHOD_HANDLE,
                );
            }
            DexMethodHandle::FieldWrite { field, .. } => {
                self.trace_field_access(
                    context,
                    field,
                    true,
                    FieldAccessFlags::WRITTEN_FROM_METHOD_HANDLE,
                );
            }
        }
    }

    /// Lambda call sites desugar into a synthetic accessor class; everything
    /// else is recorded for later reporting with its bootstrap references
    /// kept alive.
    fn trace_call_site(&mut self, context: &DexMethod, call_site: DexCallSite) {
        if self.is_lambda_metafactory(&call_site.bootstrap) && self.desugar_lambda(context, &call_site)
        {
            return;
        }
        let bootstrap = call_site.bootstrap.clone();
        self.trace_method_handle(context, &bootstrap);
        for arg in &call_site.args {
            match arg {
                BootstrapArg::MethodHandle(handle) => {
                    self.trace_method_handle(context, handle);
                }
                BootstrapArg::Type(ty) => {
                    self.worklist.push_back(Action::MarkTypeLive(
                        ty.clone(),
                        KeptReason::ReferencedFrom(context.clone()),
                    ));
                }
                BootstrapArg::Proto(_) | BootstrapArg::String(_) | BootstrapArg::Int(_) => {}
            }
        }
        self.call_sites.push((call_site, context.clone()));
    }

    fn is_lambda_metafactory(&self, bootstrap: &DexMethodHandle) -> bool {
        let known = &self.app_info.app().factory.known;
        match bootstrap {
            DexMethodHandle::Method { method, .. } => {
                method.holder() == &known.lambda_metafactory_type
                    && (method.name() == &known.metafactory_name
                        || method.name() == &known.alt_metafactory_name)
            }
            _ => false,
        }
    }

    /// Rewrites a metafactory call site into a synthetic class implementing
    /// the functional interface and forwarding to the implementation method.
    ///
    /// The synthetic class is a first-class program class: added to the
    /// definitions, marked live and instantiated, and traced like any other.
    fn desugar_lambda(&mut self, context: &DexMethod, call_site: &DexCallSite) -> bool {
        let factory = self.app_info.app().factory.clone();
        let interface = call_site.proto.return_type().clone();
        if !interface.is_class() {
            return false;
        }
        let Some(sam_proto) = call_site.args.iter().find_map(|arg| match arg {
            BootstrapArg::Proto(proto) => Some(proto.clone()),
            _ => None,
        }) else {
            return false;
        };
        let Some(impl_handle) = call_site.args.iter().find_map(|arg| match arg {
            BootstrapArg::MethodHandle(handle) => Some(handle.clone()),
            _ => None,
        }) else {
            return false;
        };
        let DexMethodHandle::Method {
            kind: impl_kind,
            method: impl_method,
        } = impl_handle
        else {
            return false;
        };

        let holder_descriptor = context.holder().descriptor().as_str();
        let synthetic_descriptor = format!(
            "{}$$Lambda${};",
            &holder_descriptor[..holder_descriptor.len() - 1],
            self.lambda_counter
        );
        self.lambda_counter += 1;
        let Ok(synthetic_type) = factory.create_type(&synthetic_descriptor) else {
            return false;
        };

        let parent_origin = self
            .app_info
            .definition_for(context.holder())
            .map_or(Origin::Unknown, |class| class.origin.clone());
        let feature = self
            .app_info
            .definition_for(context.holder())
            .map_or(crate::graph::BASE_FEATURE, |class| class.feature);

        let forward_method = factory.create_method(
            synthetic_type.clone(),
            call_site.method_name.clone(),
            sam_proto,
        );
        let forward_instruction = match impl_kind {
            InvokeKind::Static => Instruction::InvokeStatic(impl_method.clone()),
            InvokeKind::Interface => Instruction::InvokeInterface(impl_method.clone()),
            InvokeKind::Direct => Instruction::InvokeDirect(impl_method.clone()),
            InvokeKind::Super => Instruction::InvokeSuper(impl_method.clone()),
            InvokeKind::Virtual => Instruction::InvokeVirtual(impl_method.clone()),
        };
        let init_method = factory.create_method(
            synthetic_type.clone(),
            factory.known.init_name.clone(),
            factory.known.void_proto.clone(),
        );

        let class = DexClassBuilder::new(crate::graph::ClassKind::Program, synthetic_type.clone())
            .superclass(factory.known.object_type.clone())
            .interface(interface.clone())
            .flags(AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC)
            .direct_method(DexEncodedMethod::new(
                init_method.clone(),
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
                Some(Code::default()),
            ))
            .virtual_method(DexEncodedMethod::new(
                forward_method.clone(),
                AccessFlags::PUBLIC,
                Some(Code::new(vec![forward_instruction])),
            ))
            .origin(parent_origin.synthetic())
            .feature(feature)
            .build();
        let Ok(class) = class else {
            return false;
        };
        let class = std::sync::Arc::new(class);
        self.app_info.app().add_synthesized_class(class.clone());
        self.synthesized.push(class);

        let reason = KeptReason::SynthesizedFrom(context.clone());
        self.worklist.push_back(Action::MarkTypeLive(
            interface,
            KeptReason::ReferencedFrom(context.clone()),
        ));
        self.worklist
            .push_back(Action::MarkInstantiated(synthetic_type, reason.clone()));
        self.worklist
            .push_back(Action::MarkMethodLive(init_method, reason.clone()));
        self.worklist
            .push_back(Action::MarkMethodLive(forward_method, reason));
        true
    }

    /// Transition: a live service interface is loaded via `ServiceLoader`.
    fn trace_service_load(&mut self, context: &DexMethod, service: &DexType) {
        self.worklist.push_back(Action::MarkTypeLive(
            service.clone(),
            KeptReason::ReferencedFrom(context.clone()),
        ));
        if !self.services.is_service_type(service) {
            return;
        }
        let factory = &self.app_info.app().factory;
        for implementation in self.services.implementations_for(service) {
            self.worklist.push_back(Action::MarkInstantiated(
                implementation.clone(),
                KeptReason::ServiceImplementation(service.clone()),
            ));
            let init = factory.create_method(
                implementation.clone(),
                factory.known.init_name.clone(),
                factory.known.void_proto.clone(),
            );
            let has_public_no_arg_init = self
                .app_info
                .definition_for(&implementation)
                .and_then(|class| {
                    class
                        .lookup_method_by_signature(&init)
                        .map(|definition| definition.flags.is_public())
                })
                .unwrap_or(false);
            if has_public_no_arg_init {
                self.worklist.push_back(Action::MarkMethodLive(
                    init,
                    KeptReason::ServiceImplementation(service.clone()),
                ));
            } else {
                self.reporter.warning(
                    DiagnosticKind::ResolutionFailure,
                    Origin::Unknown,
                    format!(
                        "service implementation {} has no public no-argument constructor",
                        implementation.java_name()
                    ),
                );
            }
        }
    }

    /// Evaluates `-if` rules against the current live sets, materializing
    /// consequents whose condition holds. Returns whether anything fired.
    fn materialize_if_rules(&mut self) -> bool {
        let if_rules = self.root_set.if_rules.clone();
        let mut fired = false;
        for (index, (condition, consequent)) in if_rules.iter().enumerate() {
            if self.fired_if_rules.contains(&index) {
                continue;
            }
            let condition_holds = crate::shaking::matcher::match_spec_against_program(
                condition,
                self.app_info,
            )
            .into_iter()
            .any(|class_match| {
                self.live_types.contains(&class_match.class.ty)
                    && class_match
                        .members_by_pattern
                        .iter()
                        .all(|members| {
                            members.iter().any(|member| match member {
                                DexMember::Field(field) => self.live_fields.contains(field),
                                DexMember::Method(method) => self.live_methods.contains(method),
                            })
                        })
            });
            if !condition_holds {
                continue;
            }
            self.fired_if_rules.insert(index);
            fired = true;

            // Materialize the consequent through the root set and enqueue
            // exactly the newly-added seeds.
            let types_before = self.root_set.live_types.len();
            let fields_before = self.root_set.live_fields.len();
            let methods_before = self.root_set.live_methods.len();
            let instantiated_before = self.root_set.instantiated_types.len();
            self.root_set.apply_keep_rule(self.app_info, consequent);
            for ty in self.root_set.live_types[types_before..].to_vec() {
                self.worklist
                    .push_back(Action::MarkTypeLive(ty, KeptReason::ConditionalKeepRule));
            }
            for field in self.root_set.live_fields[fields_before..].to_vec() {
                self.worklist
                    .push_back(Action::MarkFieldLive(field, KeptReason::ConditionalKeepRule));
            }
            for method in self.root_set.live_methods[methods_before..].to_vec() {
                self.worklist.push_back(Action::MarkMethodLive(
                    method,
                    KeptReason::ConditionalKeepRule,
                ));
            }
            for ty in self.root_set.instantiated_types[instantiated_before..].to_vec() {
                self.worklist.push_back(Action::MarkInstantiated(
                    ty,
                    KeptReason::ConditionalKeepRule,
                ));
            }
        }
        fired
    }

    fn check_access(&mut self, context: &DexMethod, resolution: &SingleResolution) {
        let Some(holder_class) = self.app_info.definition_for(&resolution.holder) else {
            return;
        };
        let Some(context_class) = self.app_info.definition_for(context.holder()) else {
            return;
        };
        let Some(definition) = holder_class.lookup_method_by_signature(&resolution.method) else {
            return;
        };
        if !self
            .app_info
            .is_accessible(definition.flags, &holder_class, &context_class)
        {
            self.report_resolution_failure(
                context,
                &resolution.method,
                &MethodResolutionResult::IllegalAccess(resolution.method.clone()),
            );
        }
    }

    fn check_static_consistency(
        &mut self,
        context: &DexMethod,
        kind: InvokeKind,
        resolution: &SingleResolution,
    ) {
        let Some(holder_class) = self.app_info.definition_for(&resolution.holder) else {
            return;
        };
        let Some(definition) = holder_class.lookup_method_by_signature(&resolution.method) else {
            return;
        };
        let mismatch = match kind {
            InvokeKind::Static => !definition.is_static(),
            InvokeKind::Direct => definition.is_static(),
            _ => false,
        };
        if mismatch {
            self.report_resolution_failure(
                context,
                &resolution.method,
                &MethodResolutionResult::IncompatibleClassChange,
            );
        }
    }

    fn report_missing_class(&mut self, ty: &DexType) {
        if !self.reported_missing.insert(ty.clone()) {
            return;
        }
        let java_name = ty.java_name();
        if self.config.is_dont_warned(&java_name) {
            return;
        }
        if self.options.ignore_missing_classes {
            self.reporter.warning(
                DiagnosticKind::MissingClass,
                Origin::Unknown,
                format!("missing class {java_name}"),
            );
        } else {
            self.reporter.error(
                DiagnosticKind::MissingClass,
                Origin::Unknown,
                format!("missing class {java_name}"),
            );
        }
    }

    fn report_resolution_failure(
        &mut self,
        context: &DexMethod,
        method: &DexMethod,
        failure: &MethodResolutionResult,
    ) {
        let message = match failure {
            MethodResolutionResult::NoSuchMethod => format!("no such method {method}"),
            MethodResolutionResult::IllegalAccess(target) => {
                format!("{target} is not accessible from {context}")
            }
            MethodResolutionResult::AmbiguousDefault(target) => {
                format!("ambiguous default method {target}")
            }
            MethodResolutionResult::IncompatibleClassChange => {
                format!("incompatible invoke of {method}")
            }
            MethodResolutionResult::Single(_) | MethodResolutionResult::ClassNotFound(_) => {
                return;
            }
        };
        let origin = self
            .app_info
            .definition_for(context.holder())
            .map_or(Origin::Unknown, |class| class.origin.clone());
        if self.options.force_compatibility {
            self.reporter
                .warning(DiagnosticKind::ResolutionFailure, origin, message);
        } else {
            self.reporter
                .error(DiagnosticKind::ResolutionFailure, origin, message);
        }
    }

    fn report_field_resolution_failure(&mut self, context: &DexMethod, field: &DexField) {
        let origin = self
            .app_info
            .definition_for(context.holder())
            .map_or(Origin::Unknown, |class| class.origin.clone());
        let message = format!("no such field {field} (from {context})");
        if self.options.force_compatibility {
            self.reporter
                .warning(DiagnosticKind::ResolutionFailure, origin, message);
        } else {
            self.reporter
                .error(DiagnosticKind::ResolutionFailure, origin, message);
        }
    }
}

fn collect_annotation_references(
    annotation: &crate::graph::DexAnnotation,
    types: &mut Vec<DexType>,
    fields: &mut Vec<DexField>,
) {
    types.push(annotation.annotation_type.clone());
    for (_, value) in &annotation.elements {
        collect_annotation_value_references(value, types, fields);
    }
}

fn collect_annotation_value_references(
    value: &crate::graph::AnnotationValue,
    types: &mut Vec<DexType>,
    fields: &mut Vec<DexField>,
) {
    use crate::graph::AnnotationValue;
    match value {
        AnnotationValue::Type(ty) => types.push(ty.clone()),
        AnnotationValue::Field(field) => {
            fields.push(field.clone());
        }
        AnnotationValue::Array(values) => {
            for value in values {
                collect_annotation_value_references(value, types, fields);
            }
        }
        AnnotationValue::Annotation(nested) => {
            collect_annotation_references(nested, types, fields);
        }
        AnnotationValue::Method(method) => types.push(method.holder().clone()),
        AnnotationValue::String(_) | AnnotationValue::Int(_) | AnnotationValue::Bool(_) => {}
    }
}
