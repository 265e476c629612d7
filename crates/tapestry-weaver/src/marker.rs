//! Marker annotations recognised on weave classes
//!
//! Weave authors express intent through annotations in the `tapestry/api`
//! namespace. They are decoded once into closed enums so the matcher and
//! merger switch over them exhaustively instead of inspecting annotation
//! bags.

use serde::{Deserialize, Serialize};
use tapestry_classfile::{Annotation, ElementValue};

/// Package holding the marker annotations and the `Weaver` class
pub const API_PACKAGE: &str = "tapestry/api";

/// Class declaring the invoke-original marker method
pub const WEAVER_CLASS: &str = "tapestry/api/Weaver";
/// Name of the invoke-original marker method
pub const CALL_ORIGINAL_NAME: &str = "callOriginal";
/// Descriptor of the invoke-original marker method
pub const CALL_ORIGINAL_DESCRIPTOR: &str = "()Ljava/lang/Object;";

const WEAVE: &str = "tapestry/api/Weave";
const WEAVE_WITH_ANNOTATION: &str = "tapestry/api/WeaveWithAnnotation";
const SKIP_IF_PRESENT: &str = "tapestry/api/SkipIfPresent";
const SCALA_WEAVE: &str = "tapestry/api/ScalaWeave";
const NEW_FIELD: &str = "tapestry/api/NewField";
const WEAVE_ALL_CONSTRUCTORS: &str = "tapestry/api/WeaveAllConstructors";

/// Descriptor of the `MatchType` enum used by `@Weave(type = ...)`
pub const MATCH_TYPE_DESCRIPTOR: &str = "Ltapestry/api/MatchType;";
/// Descriptor of the `ScalaMatchType` enum used by `@ScalaWeave(type = ...)`
pub const SCALA_MATCH_TYPE_DESCRIPTOR: &str = "Ltapestry/api/ScalaMatchType;";

/// Whether an invocation is the invoke-original marker
pub fn is_call_original(owner: &str, name: &str, descriptor: &str) -> bool {
    owner == WEAVER_CLASS && name == CALL_ORIGINAL_NAME && descriptor == CALL_ORIGINAL_DESCRIPTOR
}

/// Which candidates a weave class applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// The candidate must be the named class
    ExactClass,
    /// The candidate must be the named class or a descendant
    BaseClass,
    /// The candidate must implement the named interface
    Interface,
}

impl MatchStrategy {
    /// Strategy named by a `MatchType` enum constant
    pub fn from_constant(name: &str) -> Option<Self> {
        match name {
            "ExactClass" => Some(MatchStrategy::ExactClass),
            "BaseClass" => Some(MatchStrategy::BaseClass),
            "Interface" => Some(MatchStrategy::Interface),
            _ => None,
        }
    }

    /// Enum constant name for this strategy
    pub fn constant(self) -> &'static str {
        match self {
            MatchStrategy::ExactClass => "ExactClass",
            MatchStrategy::BaseClass => "BaseClass",
            MatchStrategy::Interface => "Interface",
        }
    }

    /// Whether the candidate may differ from the named class
    pub fn is_base(self) -> bool {
        !matches!(self, MatchStrategy::ExactClass)
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.constant())
    }
}

/// Shape of a Scala weave declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalaKind {
    /// A Scala `object`, compiled to `<Name>$`
    Object,
    /// An ordinary class matched exactly
    ExactClass,
    /// A class matched with its descendants
    BaseClass,
    /// A trait; never weavable
    Trait,
}

impl ScalaKind {
    fn from_constant(name: &str) -> Option<Self> {
        match name {
            "Object" => Some(ScalaKind::Object),
            "ExactClass" => Some(ScalaKind::ExactClass),
            "BaseClass" => Some(ScalaKind::BaseClass),
            "Trait" => Some(ScalaKind::Trait),
            _ => None,
        }
    }
}

/// Class-level marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassMarker {
    /// `@Weave`: overlay onto a named class
    Weave {
        /// Match strategy, `ExactClass` when omitted
        strategy: MatchStrategy,
        /// Internal name of the target, the weave class name when omitted
        original_name: Option<String>,
    },
    /// `@WeaveWithAnnotation`: overlay onto classes carrying an annotation
    WeaveWithAnnotation {
        /// Internal names of the accepted annotation types
        annotation_classes: Vec<String>,
        /// Match strategy
        strategy: MatchStrategy,
    },
    /// `@SkipIfPresent`: the package is disabled when the class exists
    SkipIfPresent {
        /// Internal name of the guarded class, the weave class name when omitted
        original_name: Option<String>,
    },
    /// `@ScalaWeave`: rewritten into `Weave` by the Scala adapter
    ScalaWeave {
        /// Declaration shape
        kind: ScalaKind,
        /// Internal name of the target
        original_name: Option<String>,
    },
}

/// Field-level marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMarker {
    /// `@NewField`: introduced by the weave rather than matched
    NewField,
}

/// Method-level marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMarker {
    /// `@WeaveAllConstructors` on the no-argument constructor
    WeaveAllConstructors,
    /// `@WeaveWithAnnotation` on a method
    WeaveWithAnnotation {
        /// Internal names of the accepted annotation types
        annotation_classes: Vec<String>,
    },
}

/// Annotation class names may be written with `.` separators
fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

fn string_element(annotation: &Annotation, element: &str) -> Option<String> {
    annotation
        .element(element)
        .and_then(ElementValue::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn strategy_element(annotation: &Annotation) -> MatchStrategy {
    annotation
        .element("type")
        .and_then(ElementValue::as_enum_name)
        .and_then(MatchStrategy::from_constant)
        .unwrap_or(MatchStrategy::ExactClass)
}

fn annotation_classes(annotation: &Annotation) -> Vec<String> {
    annotation
        .element("annotationClasses")
        .map(|value| {
            value
                .as_list()
                .into_iter()
                .filter_map(ElementValue::as_str)
                .map(internal_name)
                .collect()
        })
        .unwrap_or_default()
}

impl ClassMarker {
    /// Decode a class annotation, `None` for annotations that are not markers
    pub fn from_annotation(annotation: &Annotation) -> Option<Self> {
        match annotation.type_name() {
            WEAVE => Some(ClassMarker::Weave {
                strategy: strategy_element(annotation),
                original_name: string_element(annotation, "originalName"),
            }),
            WEAVE_WITH_ANNOTATION => Some(ClassMarker::WeaveWithAnnotation {
                annotation_classes: annotation_classes(annotation),
                strategy: strategy_element(annotation),
            }),
            SKIP_IF_PRESENT => Some(ClassMarker::SkipIfPresent {
                original_name: string_element(annotation, "originalName"),
            }),
            SCALA_WEAVE => Some(ClassMarker::ScalaWeave {
                kind: annotation
                    .element("type")
                    .and_then(ElementValue::as_enum_name)
                    .and_then(ScalaKind::from_constant)
                    .unwrap_or(ScalaKind::ExactClass),
                original_name: string_element(annotation, "originalName"),
            }),
            _ => None,
        }
    }

    /// Annotation form of this marker
    pub fn to_annotation(&self) -> Annotation {
        let strategy = |strategy: &MatchStrategy| ElementValue::Enum {
            type_descriptor: MATCH_TYPE_DESCRIPTOR.to_string(),
            name: strategy.constant().to_string(),
        };
        match self {
            ClassMarker::Weave {
                strategy: s,
                original_name,
            } => {
                let annotation = Annotation::marker(format!("L{};", WEAVE)).with("type", strategy(s));
                match original_name {
                    Some(name) => annotation.with("originalName", ElementValue::String(name.clone())),
                    None => annotation,
                }
            }
            ClassMarker::WeaveWithAnnotation {
                annotation_classes,
                strategy: s,
            } => Annotation::marker(format!("L{};", WEAVE_WITH_ANNOTATION))
                .with(
                    "annotationClasses",
                    ElementValue::Array(
                        annotation_classes
                            .iter()
                            .map(|name| ElementValue::String(name.clone()))
                            .collect(),
                    ),
                )
                .with("type", strategy(s)),
            ClassMarker::SkipIfPresent { original_name } => {
                let annotation = Annotation::marker(format!("L{};", SKIP_IF_PRESENT));
                match original_name {
                    Some(name) => annotation.with("originalName", ElementValue::String(name.clone())),
                    None => annotation,
                }
            }
            ClassMarker::ScalaWeave { kind, original_name } => {
                let constant = match kind {
                    ScalaKind::Object => "Object",
                    ScalaKind::ExactClass => "ExactClass",
                    ScalaKind::BaseClass => "BaseClass",
                    ScalaKind::Trait => "Trait",
                };
                let annotation = Annotation::marker(format!("L{};", SCALA_WEAVE)).with(
                    "type",
                    ElementValue::Enum {
                        type_descriptor: SCALA_MATCH_TYPE_DESCRIPTOR.to_string(),
                        name: constant.to_string(),
                    },
                );
                match original_name {
                    Some(name) => annotation.with("originalName", ElementValue::String(name.clone())),
                    None => annotation,
                }
            }
        }
    }

    /// Whether an annotation type is one of the class markers
    pub fn is_marker_type(type_name: &str) -> bool {
        matches!(type_name, WEAVE | WEAVE_WITH_ANNOTATION | SKIP_IF_PRESENT | SCALA_WEAVE)
    }
}

impl FieldMarker {
    /// Decode a field annotation
    pub fn from_annotation(annotation: &Annotation) -> Option<Self> {
        match annotation.type_name() {
            NEW_FIELD => Some(FieldMarker::NewField),
            _ => None,
        }
    }

    /// Annotation form of this marker
    pub fn to_annotation(self) -> Annotation {
        match self {
            FieldMarker::NewField => Annotation::marker(format!("L{};", NEW_FIELD)),
        }
    }
}

impl MethodMarker {
    /// Decode a method annotation
    pub fn from_annotation(annotation: &Annotation) -> Option<Self> {
        match annotation.type_name() {
            WEAVE_ALL_CONSTRUCTORS => Some(MethodMarker::WeaveAllConstructors),
            WEAVE_WITH_ANNOTATION => Some(MethodMarker::WeaveWithAnnotation {
                annotation_classes: annotation_classes(annotation),
            }),
            _ => None,
        }
    }

    /// Annotation form of this marker
    pub fn to_annotation(&self) -> Annotation {
        match self {
            MethodMarker::WeaveAllConstructors => Annotation::marker(format!("L{};", WEAVE_ALL_CONSTRUCTORS)),
            MethodMarker::WeaveWithAnnotation { annotation_classes } => {
                Annotation::marker(format!("L{};", WEAVE_WITH_ANNOTATION)).with(
                    "annotationClasses",
                    ElementValue::Array(
                        annotation_classes
                            .iter()
                            .map(|name| ElementValue::String(name.clone()))
                            .collect(),
                    ),
                )
            }
        }
    }
}
