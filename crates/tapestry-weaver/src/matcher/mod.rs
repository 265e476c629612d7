//! Weave class validation
//!
//! [`Matcher`] decides whether a weave class applies to a candidate class
//! and, when it does, collects every rule the pair violates. Only checks
//! that make further comparison meaningless stop the pass early; everything
//! else is reported together.

mod methods;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tapestry_classfile::descriptor::rename_in_descriptor;
use tapestry_classfile::{ClassResult, Insn, MethodType, Opcode};
use tracing::debug;

use crate::classpath::{self, ClassPath};
use crate::marker::{ClassMarker, MatchStrategy, MethodMarker};
use crate::merger::call_original::{self, InitializerProblem};
use crate::model::{ClassDescriptor, FieldDescriptor, MethodDescriptor};
use crate::scan::{is_synthetic_accessor_name, BodyScan};
use crate::violation::{Violation, ViolationKind};

pub(crate) use methods::{lookup_key, matchable_methods, Matchable};

/// Newest weave class file version whose constructs the merger understands
pub const MAX_WEAVE_MAJOR_VERSION: u16 = 61;

/// Outcome of matching one weave class against one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The strategy does not select the candidate
    NotApplicable,
    /// The weave targets the candidate; empty violations mean it can be merged
    Applicable(Vec<Violation>),
}

impl MatchResult {
    /// Whether the weave applies and has no violations
    pub fn is_mergeable(&self) -> bool {
        matches!(self, MatchResult::Applicable(violations) if violations.is_empty())
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            MatchResult::NotApplicable => &[],
            MatchResult::Applicable(violations) => violations,
        }
    }
}

/// What a weave class names as its target
#[derive(Debug, Clone, Copy)]
pub(crate) enum WeaveTarget<'w> {
    /// A class or interface by internal name
    Named(&'w str),
    /// Classes carrying one of these annotation types
    Annotated(&'w [String]),
}

/// Target and strategy declared by a weave class, `None` for classes that
/// are not (yet) weaves
pub(crate) fn weave_target(weave: &ClassDescriptor) -> Option<(WeaveTarget<'_>, MatchStrategy)> {
    match weave.weave_marker()? {
        ClassMarker::Weave {
            strategy,
            original_name,
        } => Some((
            WeaveTarget::Named(original_name.as_deref().unwrap_or(&weave.name)),
            *strategy,
        )),
        ClassMarker::WeaveWithAnnotation {
            annotation_classes,
            strategy,
        } => Some((WeaveTarget::Annotated(annotation_classes), *strategy)),
        ClassMarker::ScalaWeave { .. } | ClassMarker::SkipIfPresent { .. } => None,
    }
}

/// Which candidate constructors a weave constructor extends
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConstructorTarget {
    /// The constructor with this descriptor
    Exact(String),
    /// Every constructor that does not delegate to another one
    All,
}

#[derive(Debug, Clone)]
pub(crate) struct ConstructorPlan {
    pub weave_index: usize,
    pub target: ConstructorTarget,
}

#[derive(Debug, Clone)]
pub(crate) struct MatchedMethod {
    pub weave_index: usize,
    pub name: String,
    /// Descriptor as declared by the original
    pub descriptor: String,
    /// Abstract weave methods only declare the original for weave code to call
    pub is_declaration: bool,
}

/// Full result of validating a weave class against its original
#[derive(Debug, Clone)]
pub(crate) struct MatchAnalysis {
    pub weave_name: String,
    pub original_name: String,
    pub strategy: MatchStrategy,
    /// Names of weave fields that exist on the original
    pub matched_fields: Vec<String>,
    /// Weave field indices introduced by `@NewField`
    pub new_fields: Vec<usize>,
    pub matched_methods: Vec<MatchedMethod>,
    /// Weave method indices added to the candidate
    pub new_methods: Vec<usize>,
    pub constructors: Vec<ConstructorPlan>,
    /// Weave `<clinit>` index
    pub static_initializer: Option<usize>,
    pub violations: Vec<Violation>,
}

impl MatchAnalysis {
    fn new(weave: &ClassDescriptor, original_name: &str, strategy: MatchStrategy) -> Self {
        Self {
            weave_name: weave.name.clone(),
            original_name: original_name.to_string(),
            strategy,
            matched_fields: Vec::new(),
            new_fields: Vec::new(),
            matched_methods: Vec::new(),
            new_methods: Vec::new(),
            constructors: Vec::new(),
            static_initializer: None,
            violations: Vec::new(),
        }
    }

    /// Methods whose bodies this weave replaces, as `(name, descriptor)`
    pub fn replaced_methods(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.matched_methods
            .iter()
            .filter(|m| !m.is_declaration)
            .map(|m| (m.name.as_str(), m.descriptor.as_str()))
    }
}

/// The enum boilerplate javac generates is never matched
fn is_enum_boilerplate(method: &MethodDescriptor) -> bool {
    method.is_constructor() || method.is_static_initializer() || method.name == "values" || method.name == "valueOf"
}

/// `aload_0; invokespecial <super>.<init>()V; return` with no markers
fn is_trivial_constructor(weave: &ClassDescriptor, method: &MethodDescriptor) -> ClassResult<bool> {
    if method.descriptor != "()V" || !method.annotations.is_empty() {
        return Ok(false);
    }
    let Some(body) = weave.body(method)? else {
        return Ok(false);
    };
    let pool = &weave.class_file().constant_pool;
    let real: Vec<_> = body.instructions().map(|(_, insn)| insn).collect();
    Ok(match real.as_slice() {
        [load, call, ret] => {
            **load == Insn::Simple(Opcode::Aload0)
                && **ret == Insn::Simple(Opcode::Return)
                && match call {
                    Insn::Constant {
                        opcode: Opcode::Invokespecial,
                        index,
                    } => {
                        let reference = pool.member_ref(*index)?;
                        reference.name == "<init>" && reference.descriptor == "()V"
                    }
                    _ => false,
                }
        }
        _ => false,
    })
}

/// Validates weave classes against candidates
pub struct Matcher<'a> {
    classpath: &'a dyn ClassPath,
}

impl<'a> Matcher<'a> {
    pub fn new(classpath: &'a dyn ClassPath) -> Self {
        Self { classpath }
    }

    /// Match using the strategy the weave class declares
    pub fn match_weave(&self, weave: &ClassDescriptor, candidate: &ClassDescriptor) -> ClassResult<MatchResult> {
        match weave_target(weave) {
            Some((_, strategy)) => self.match_class(weave, candidate, strategy),
            None => Ok(MatchResult::NotApplicable),
        }
    }

    /// Match `weave` against `candidate` under `strategy`
    pub fn match_class(
        &self,
        weave: &ClassDescriptor,
        candidate: &ClassDescriptor,
        strategy: MatchStrategy,
    ) -> ClassResult<MatchResult> {
        Ok(match self.analyze(weave, candidate, strategy)? {
            Some(analysis) => MatchResult::Applicable(analysis.violations),
            None => MatchResult::NotApplicable,
        })
    }

    fn selects(&self, target: WeaveTarget<'_>, candidate: &ClassDescriptor, strategy: MatchStrategy) -> bool {
        if candidate.is_interface() {
            return false;
        }
        match (target, strategy) {
            (WeaveTarget::Named(name), MatchStrategy::ExactClass) => candidate.name == name,
            (WeaveTarget::Named(name), MatchStrategy::BaseClass) => {
                classpath::is_subclass_of(self.classpath, candidate, name)
            }
            (WeaveTarget::Named(name), MatchStrategy::Interface) => {
                classpath::implements(self.classpath, candidate, name)
            }
            (WeaveTarget::Annotated(types), MatchStrategy::ExactClass) => {
                types.iter().any(|t| candidate.has_annotation(t))
            }
            (WeaveTarget::Annotated(types), MatchStrategy::BaseClass) => {
                types.iter().any(|t| candidate.has_annotation(t))
                    || classpath::superclasses(self.classpath, candidate)
                        .iter()
                        .any(|parent| types.iter().any(|t| parent.has_annotation(t)))
            }
            (WeaveTarget::Annotated(types), MatchStrategy::Interface) => {
                candidate.interfaces.iter().any(|name| {
                    self.classpath
                        .find(name)
                        .is_some_and(|interface| types.iter().any(|t| interface.has_annotation(t)))
                })
            }
        }
    }

    /// Validate `weave` against `candidate`, `None` when the strategy does
    /// not select the candidate
    pub(crate) fn analyze(
        &self,
        weave: &ClassDescriptor,
        candidate: &ClassDescriptor,
        strategy: MatchStrategy,
    ) -> ClassResult<Option<MatchAnalysis>> {
        let Some((target, _)) = weave_target(weave) else {
            return Ok(None);
        };
        if !self.selects(target, candidate, strategy) {
            return Ok(None);
        }

        let looked_up: Option<Arc<ClassDescriptor>>;
        let original: &ClassDescriptor = match target {
            WeaveTarget::Named(name) if name != candidate.name => {
                looked_up = self.classpath.find(name);
                match looked_up.as_deref() {
                    Some(original) => original,
                    None => {
                        let mut analysis = MatchAnalysis::new(weave, name, strategy);
                        analysis.violations.push(
                            Violation::new(ViolationKind::MissingOriginalBytecode, &weave.name)
                                .candidate(&candidate.name)
                                .detail(name),
                        );
                        return Ok(Some(analysis));
                    }
                }
            }
            _ => candidate,
        };

        let mut analysis = MatchAnalysis::new(weave, &original.name, strategy);
        if weave.is_interface() {
            analysis
                .violations
                .push(Violation::new(ViolationKind::ClassWeaveIsInterface, &weave.name).candidate(&original.name));
            return Ok(Some(analysis));
        }

        let context = Context {
            classpath: self.classpath,
            weave,
            original,
            strategy,
            annotation_weave: matches!(target, WeaveTarget::Annotated(_)),
        };
        context.check_class(&mut analysis.violations);
        context.match_fields(&mut analysis);
        context.match_methods(&mut analysis)?;

        debug!(
            weave = %weave.name,
            candidate = %candidate.name,
            original = %original.name,
            violations = analysis.violations.len(),
            "matched weave class"
        );
        Ok(Some(analysis))
    }
}

struct Context<'a> {
    classpath: &'a dyn ClassPath,
    weave: &'a ClassDescriptor,
    original: &'a ClassDescriptor,
    strategy: MatchStrategy,
    annotation_weave: bool,
}

impl Context<'_> {
    fn violation(&self, kind: ViolationKind) -> Violation {
        Violation::new(kind, &self.weave.name).candidate(&self.original.name)
    }

    fn rename(&self, descriptor: &str) -> String {
        rename_in_descriptor(descriptor, &self.weave.name, &self.original.name)
    }

    /// Methods taking part in matching
    fn weave_methods(&self) -> impl Iterator<Item = &MethodDescriptor> + '_ {
        let is_enum = self.weave.access.is_enum();
        self.weave
            .methods
            .iter()
            .filter(move |method| !(is_enum && is_enum_boilerplate(method)))
    }

    fn check_class(&self, violations: &mut Vec<Violation>) {
        let weave = self.weave;
        let original = self.original;

        if weave.major_version > MAX_WEAVE_MAJOR_VERSION {
            violations.push(
                self.violation(ViolationKind::IncompatibleBytecodeVersion)
                    .detail(format!("major version {}", weave.major_version)),
            );
        }

        if !self.annotation_weave && weave.access.is_public() != original.access.is_public() {
            violations.push(self.violation(ViolationKind::ClassAccessMismatch));
        }

        let mut allowed = classpath::all_interfaces(self.classpath, original);
        if original.is_interface() {
            allowed.push(original.name.clone());
        }
        for interface in &weave.interfaces {
            if !allowed.contains(interface) {
                violations.push(self.violation(ViolationKind::ClassImplementsIllegalInterface).detail(interface));
            }
        }

        if let Some(parent) = &weave.super_name {
            if parent != "java/lang/Object" && Some(parent) != original.super_name.as_ref() {
                violations.push(self.violation(ViolationKind::ClassExtendsIllegalSuperclass).detail(parent));
            }
        }

        if let Some(row) = weave.own_inner_class() {
            if !row.access.is_static() {
                violations.push(self.violation(ViolationKind::ClassNestedNonstaticUnsupported));
            }
        }
    }

    /// Same-named field on the original or one of its superclasses
    fn original_field(&self, name: &str) -> Option<FieldDescriptor> {
        if let Some(field) = self.original.field(name) {
            return Some(field.clone());
        }
        classpath::superclasses(self.classpath, self.original)
            .iter()
            .find_map(|parent| parent.field(name).filter(|f| !f.access.is_private()).cloned())
    }

    fn match_fields(&self, analysis: &mut MatchAnalysis) {
        let violations = &mut analysis.violations;
        for field in &self.weave.fields {
            let violation = |kind| self.violation(kind).member(&field.name);
            if field.name == "serialVersionUID" {
                violations.push(violation(ViolationKind::FieldSerialversionuidUnsupported));
                continue;
            }

            if field.is_new() {
                if self.original.access.is_enum() {
                    violations.push(violation(ViolationKind::EnumNewField));
                }
                if self.original.field(&field.name).is_some() {
                    violations.push(violation(ViolationKind::FieldNewAlreadyExists));
                }
                analysis.new_fields.push(field.index);
                continue;
            }

            let Some(original) = self.original_field(&field.name) else {
                // the field may live on a subclass not seen yet
                if self.strategy == MatchStrategy::ExactClass {
                    violations.push(violation(ViolationKind::FieldMissing));
                }
                continue;
            };

            let descriptor = self.rename(&field.descriptor);
            if descriptor != original.descriptor {
                violations.push(
                    violation(ViolationKind::FieldTypeMismatch)
                        .detail(format!("expected {}, found {}", original.descriptor, descriptor)),
                );
            }
            if field.access.is_static() != original.access.is_static() {
                violations.push(violation(ViolationKind::FieldStaticMismatch));
            }
            if field.access.is_final() != original.access.is_final() {
                violations.push(violation(ViolationKind::FieldFinalMismatch));
            }
            if original.access.is_private() && self.strategy != MatchStrategy::ExactClass {
                violations.push(violation(ViolationKind::FieldPrivateBaseClassMatch));
            }
            if !field.access.is_private() && field.access.visibility() != original.access.visibility() {
                violations.push(violation(ViolationKind::FieldAccessMismatch));
            }
            analysis.matched_fields.push(field.name.clone());
        }
    }

    fn match_methods(&self, analysis: &mut MatchAnalysis) -> ClassResult<()> {
        let weave = self.weave;
        let matchable = matchable_methods(self.classpath, self.original, self.strategy);

        let mut constructors = Vec::new();
        let mut static_initializer = None;
        for method in self.weave_methods() {
            if method.is_static_initializer() {
                static_initializer = Some(method);
                continue;
            }
            if method.access.is_bridge() {
                continue;
            }
            if method.is_constructor() {
                if !is_trivial_constructor(weave, method)? {
                    constructors.push(method);
                }
                continue;
            }
            if is_synthetic_accessor_name(&method.name) && !method.access.is_synthetic() {
                analysis.violations.push(
                    self.violation(ViolationKind::MethodSyntheticWeaveIllegal)
                        .method(&method.name, &method.descriptor),
                );
                continue;
            }

            match matchable.get(&lookup_key(method, &weave.name, &self.original.name)) {
                Some(matched) => {
                    methods::validate_matched_method(weave, self.original, method, matched, &mut analysis.violations);
                    analysis.matched_methods.push(MatchedMethod {
                        weave_index: method.index,
                        name: matched.name.clone(),
                        descriptor: matched.descriptor.clone(),
                        is_declaration: method.access.is_abstract(),
                    });
                }
                None => analysis.new_methods.push(method.index),
            }
        }

        if let Some(clinit) = static_initializer {
            self.check_static_initializer(clinit, &matchable, analysis)?;
            analysis.static_initializer = Some(clinit.index);
        }
        self.plan_constructors(&constructors, analysis)?;

        for method in self.weave_methods() {
            self.check_weave_method(method, &matchable, analysis)?;
        }
        Ok(())
    }

    fn plan_constructors(&self, constructors: &[&MethodDescriptor], analysis: &mut MatchAnalysis) -> ClassResult<()> {
        let weave_all = constructors
            .iter()
            .any(|ctor| ctor.has_marker(&MethodMarker::WeaveAllConstructors));
        let finals: FxHashMap<String, bool> = analysis
            .matched_fields
            .iter()
            .filter_map(|name| self.original_field(name).map(|f| (name.clone(), f.access.is_final())))
            .collect();

        for ctor in constructors {
            let violation = |kind| self.violation(kind).method(&ctor.name, &ctor.descriptor);
            let target = if weave_all {
                if !ctor.has_marker(&MethodMarker::WeaveAllConstructors) {
                    analysis
                        .violations
                        .push(violation(ViolationKind::InitWeaveAllNoOtherInitAllowed));
                    None
                } else if ctor.descriptor != "()V" {
                    analysis
                        .violations
                        .push(violation(ViolationKind::InitWeaveAllWithArgsProhibited));
                    None
                } else {
                    Some(ConstructorTarget::All)
                }
            } else if self.strategy == MatchStrategy::Interface {
                if ctor.descriptor == "()V" {
                    Some(ConstructorTarget::All)
                } else {
                    analysis
                        .violations
                        .push(violation(ViolationKind::InitWithArgsInterfaceMatchUnsupported));
                    None
                }
            } else {
                let descriptor = self.rename(&ctor.descriptor);
                if self.original.method("<init>", &descriptor).is_some() {
                    Some(ConstructorTarget::Exact(descriptor))
                } else {
                    analysis.violations.push(violation(ViolationKind::InitNewUnsupported));
                    None
                }
            };

            if let Some(mut body) = self.weave.body(ctor)? {
                let problems = call_original::strip_field_initializers(
                    &mut body,
                    &self.weave.class_file().constant_pool,
                    &self.weave.name,
                    &analysis.matched_fields,
                    Opcode::Putfield,
                )?;
                for problem in problems {
                    match problem {
                        InitializerProblem::StrayCallOriginal { .. } => {
                            analysis.violations.push(violation(ViolationKind::InitIllegalCallOriginal))
                        }
                        InitializerProblem::MatchedFieldWrite { field } => {
                            if finals.get(&field).copied().unwrap_or(false) {
                                analysis
                                    .violations
                                    .push(violation(ViolationKind::FieldFinalAssignment).detail(field));
                            }
                        }
                    }
                }
            }

            if let Some(target) = target {
                analysis.constructors.push(ConstructorPlan {
                    weave_index: ctor.index,
                    target,
                });
            }
        }
        Ok(())
    }

    fn check_static_initializer(
        &self,
        clinit: &MethodDescriptor,
        matchable: &FxHashMap<(String, String), Matchable>,
        analysis: &mut MatchAnalysis,
    ) -> ClassResult<()> {
        let Some(mut body) = self.weave.body(clinit)? else {
            return Ok(());
        };
        let pool = &self.weave.class_file().constant_pool;
        let violation = |kind| self.violation(kind).member("<clinit>");

        let problems = call_original::strip_field_initializers(
            &mut body,
            pool,
            &self.weave.name,
            &analysis.matched_fields,
            Opcode::Putstatic,
        )?;
        for problem in problems {
            match problem {
                InitializerProblem::StrayCallOriginal { .. } => {
                    analysis.violations.push(violation(ViolationKind::InitIllegalCallOriginal))
                }
                InitializerProblem::MatchedFieldWrite { field } => analysis
                    .violations
                    .push(violation(ViolationKind::ClinitMatchedFieldModificationUnsupported).detail(field)),
            }
        }

        let scan = BodyScan::of(&body, pool)?;
        for access in scan.field_accesses.iter().filter(|a| a.owner == self.weave.name) {
            if !analysis.matched_fields.contains(&access.name) {
                continue;
            }
            if let Some(field) = self.original_field(&access.name) {
                if !field.access.is_public() {
                    analysis
                        .violations
                        .push(violation(ViolationKind::ClinitFieldAccessViolation).detail(&access.name));
                }
            }
        }
        for call in scan.invocations.iter().filter(|c| c.owner == self.weave.name) {
            let renamed = self.rename(&call.descriptor);
            let params = match renamed.find(')') {
                Some(end) => renamed[..=end].to_string(),
                None => renamed.clone(),
            };
            let Some(matched) = matchable.get(&(call.name.clone(), params)) else {
                continue;
            };
            let declared_by_weave = analysis
                .matched_methods
                .iter()
                .any(|m| m.name == matched.name && m.descriptor == matched.descriptor);
            if declared_by_weave && !matched.access.is_public() {
                analysis.violations.push(
                    violation(ViolationKind::ClinitMethodAccessViolation).detail(format!("{}{}", call.name, call.descriptor)),
                );
            }
        }
        Ok(())
    }

    /// Rules that need every weave method classified first
    fn check_weave_method(
        &self,
        method: &MethodDescriptor,
        matchable: &FxHashMap<(String, String), Matchable>,
        analysis: &mut MatchAnalysis,
    ) -> ClassResult<()> {
        let weave = self.weave;
        let is_new = analysis.new_methods.contains(&method.index);
        let violation = |kind| self.violation(kind).method(&method.name, &method.descriptor);

        if is_new {
            if method.access.is_abstract() {
                analysis.violations.push(violation(ViolationKind::MethodNewAbstractUnsupported));
            }
            if !method.access.is_private() && !method.access.is_synthetic() {
                analysis.violations.push(violation(ViolationKind::MethodNewNonPrivateUnsupported));
            }
        }

        let Some(body) = weave.body(method)? else {
            return Ok(());
        };
        let pool = &weave.class_file().constant_pool;
        let scan = BodyScan::of(&body, pool)?;

        if scan.synthetic_accessor_calls(&weave.name).next().is_some() {
            analysis
                .violations
                .push(violation(ViolationKind::ClassNestedImplicitOuterAccessUnsupported));
        }

        for call in scan.invocations.iter().filter(|c| c.owner == weave.name) {
            let callee = weave.method(&call.name, &call.descriptor);
            let invokes_public_new = callee.is_some_and(|callee| {
                analysis.new_methods.contains(&callee.index)
                    && !callee.access.is_private()
                    && !callee.access.is_synthetic()
            });
            if invokes_public_new {
                analysis.violations.push(
                    violation(ViolationKind::MethodNewInvokeUnsupported).detail(format!("{}{}", call.name, call.descriptor)),
                );
            }
        }

        if is_new {
            if !scan.call_original.is_empty() {
                analysis.violations.push(violation(ViolationKind::MethodNewCallOriginalUnsupported));
            }
            return Ok(());
        }
        if method.is_constructor() || method.is_static_initializer() {
            return Ok(());
        }

        match scan.call_original.as_slice() {
            [] => {}
            [position] => {
                let Some(matched) = matchable.get(&lookup_key(method, &weave.name, &self.original.name)) else {
                    return Ok(());
                };
                let ret = MethodType::parse(&matched.descriptor)?.ret;
                if call_original::classify(&body, pool, *position, &ret)?.is_none() {
                    analysis
                        .violations
                        .push(violation(ViolationKind::MethodCallOriginalIllegalReturnType));
                }
            }
            _ => analysis
                .violations
                .push(violation(ViolationKind::MethodCallOriginalAllowedOnlyOnce)),
        }
        Ok(())
    }
}
