//! Effective method sets and per-method rules

use rustc_hash::FxHashMap;
use tapestry_classfile::descriptor::rename_in_descriptor;
use tapestry_classfile::{AccessFlags, Annotation};

use crate::classpath::{self, ClassPath};
use crate::marker::MatchStrategy;
use crate::model::{ClassDescriptor, MethodDescriptor};
use crate::violation::{Violation, ViolationKind};

/// Where a matchable method is declared relative to the original
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MethodSource {
    Declared,
    Superclass,
    Interface,
}

/// A method of the original a weave method may match
#[derive(Debug, Clone)]
pub(crate) struct Matchable {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub throws: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub source: MethodSource,
    /// Whether the weave may replace its body
    pub weavable: bool,
}

impl Matchable {
    fn from_method(method: &MethodDescriptor, source: MethodSource, weavable: bool) -> Self {
        Self {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            access: method.access,
            throws: method.throws.clone(),
            annotations: method.annotations.clone(),
            source,
            weavable,
        }
    }

    pub fn return_descriptor(&self) -> &str {
        match self.descriptor.find(')') {
            Some(end) => &self.descriptor[end + 1..],
            None => "",
        }
    }

    pub fn has_annotation(&self, type_name: &str) -> bool {
        self.annotations.iter().any(|a| a.type_name() == type_name)
    }
}

fn params_of(descriptor: &str) -> &str {
    match descriptor.find(')') {
        Some(end) => &descriptor[..=end],
        None => descriptor,
    }
}

/// Methods of `original` keyed by name and parameter descriptor
///
/// Declared methods shadow inherited ones, superclasses shadow interfaces.
/// Only abstract methods a base-class weave inherits through superclasses are
/// weavable; interface methods reached indirectly never are.
pub(crate) fn matchable_methods(
    classpath: &dyn ClassPath,
    original: &ClassDescriptor,
    strategy: MatchStrategy,
) -> FxHashMap<(String, String), Matchable> {
    let mut methods = FxHashMap::default();
    let mut add = |method: &MethodDescriptor, source: MethodSource, weavable: bool| {
        let key = (method.name.clone(), params_of(&method.descriptor).to_string());
        methods
            .entry(key)
            .or_insert_with(|| Matchable::from_method(method, source, weavable));
    };

    for method in &original.methods {
        if method.is_static_initializer() {
            continue;
        }
        let weavable = match strategy {
            MatchStrategy::ExactClass => !method.access.is_abstract(),
            MatchStrategy::BaseClass | MatchStrategy::Interface => true,
        };
        add(method, MethodSource::Declared, weavable);
    }

    for parent in classpath::superclasses(classpath, original) {
        for method in &parent.methods {
            if method.access.is_private() || method.is_constructor() || method.is_static_initializer() {
                continue;
            }
            let weavable = strategy == MatchStrategy::BaseClass && method.access.is_abstract();
            add(method, MethodSource::Superclass, weavable);
        }
    }

    for name in classpath::all_interfaces(classpath, original) {
        let Some(interface) = classpath.find(&name) else { continue };
        for method in &interface.methods {
            if method.access.is_static() || method.is_static_initializer() {
                continue;
            }
            add(method, MethodSource::Interface, false);
        }
    }
    methods
}

/// Key used to look a weave method up among the matchable methods
pub(crate) fn lookup_key(method: &MethodDescriptor, weave_name: &str, original_name: &str) -> (String, String) {
    let renamed = rename_in_descriptor(&method.descriptor, weave_name, original_name);
    (method.name.clone(), params_of(&renamed).to_string())
}

/// Structural rules between a weave method and the method it matched
pub(crate) fn validate_matched_method(
    weave: &ClassDescriptor,
    original: &ClassDescriptor,
    method: &MethodDescriptor,
    matched: &Matchable,
    violations: &mut Vec<Violation>,
) {
    let violation = |kind: ViolationKind| {
        Violation::new(kind, &weave.name)
            .candidate(&original.name)
            .method(&method.name, &method.descriptor)
    };

    let renamed = rename_in_descriptor(&method.descriptor, &weave.name, &original.name);
    let weave_return = match renamed.find(')') {
        Some(end) => &renamed[end + 1..],
        None => "",
    };
    if weave_return != matched.return_descriptor() {
        violations.push(violation(ViolationKind::MethodReturntypeMismatch).detail(format!(
            "expected {}, found {}",
            matched.return_descriptor(),
            weave_return
        )));
    }
    if matched.access.is_native() {
        violations.push(violation(ViolationKind::MethodNativeUnsupported));
    }
    if matched.access.is_static() != method.access.is_static() {
        violations.push(violation(ViolationKind::MethodStaticMismatch));
    }
    if matched.access.visibility() != method.access.visibility() {
        violations.push(violation(ViolationKind::MethodAccessMismatch));
    }

    // a blanket `throws Exception` is accepted for weaves that forward everything
    let blanket = method.throws.len() == 1 && method.throws[0] == "java/lang/Exception";
    if !blanket {
        let undeclared: Vec<&str> = method
            .throws
            .iter()
            .filter(|thrown| !matched.throws.contains(thrown))
            .map(String::as_str)
            .collect();
        if !undeclared.is_empty() {
            violations.push(violation(ViolationKind::MethodThrowsMismatch).detail(undeclared.join(", ")));
        }
    }

    if let Some(required) = method.required_annotations() {
        if !required.iter().any(|annotation| matched.has_annotation(annotation)) {
            violations.push(violation(ViolationKind::MethodMissingRequiredAnnotations).detail(required.join(", ")));
        }
    }

    if !method.access.is_abstract() && !matched.weavable {
        let kind = match matched.source {
            MethodSource::Interface => ViolationKind::MethodIndirectInterfaceWeave,
            MethodSource::Superclass => ViolationKind::MethodBaseConcreteWeave,
            MethodSource::Declared => ViolationKind::MethodExactAbstractWeave,
        };
        violations.push(violation(kind));
    }
}
