//! Scala weave classes

use tapestry_classfile::annotation::{decode_annotations, encode_annotations};
use tapestry_classfile::attribute::names;
use tapestry_classfile::ClassResult;
use tracing::debug;

use super::LanguageAdapter;
use crate::marker::{ClassMarker, MatchStrategy, ScalaKind};
use crate::model::ClassDescriptor;
use crate::violation::{Violation, ViolationKind};

/// Turns `@ScalaWeave` declarations into `@Weave`
///
/// A Scala `object` compiles to a class named after the object with a
/// trailing `$`, so object weaves target that class exactly. Traits compile
/// to interfaces plus implementation classes and are never weavable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalaAdapter;

/// `@Weave` equivalent of a Scala declaration, `None` for traits
fn canonical_marker(class: &ClassDescriptor, kind: ScalaKind, original_name: Option<&str>) -> Option<ClassMarker> {
    let strategy = match kind {
        ScalaKind::Trait => return None,
        ScalaKind::Object | ScalaKind::ExactClass => MatchStrategy::ExactClass,
        ScalaKind::BaseClass => MatchStrategy::BaseClass,
    };
    let original_name = match kind {
        ScalaKind::Object => {
            let base = original_name.unwrap_or(class.name.trim_end_matches('$'));
            Some(format!("{}$", base.trim_end_matches('$')))
        }
        _ => original_name.map(str::to_string),
    };
    Some(ClassMarker::Weave {
        strategy,
        original_name,
    })
}

/// Replace the `@ScalaWeave` annotation of `class` with `replacement`
fn rewrite_marker(class: ClassDescriptor, replacement: &ClassMarker) -> ClassResult<ClassDescriptor> {
    let mut file = class.into_class_file();
    for name in [names::RUNTIME_VISIBLE_ANNOTATIONS, names::RUNTIME_INVISIBLE_ANNOTATIONS] {
        let Some(attribute) = file.attribute(name) else { continue };
        let mut annotations = decode_annotations(&attribute.info, &file.constant_pool)?;
        let before = annotations.len();
        annotations.retain(|a| !matches!(ClassMarker::from_annotation(a), Some(ClassMarker::ScalaWeave { .. })));
        if annotations.len() == before {
            continue;
        }
        annotations.push(replacement.to_annotation());
        let info = encode_annotations(&annotations, &mut file.constant_pool)?;
        file.set_attribute(name, info)?;
    }
    ClassDescriptor::from_class_file(file)
}

impl LanguageAdapter for ScalaAdapter {
    fn name(&self) -> &str {
        "scala"
    }

    fn handles(&self, class: &ClassDescriptor) -> bool {
        class.source_file.as_deref().is_some_and(|file| file.ends_with(".scala"))
    }

    fn adapt(&self, classes: Vec<ClassDescriptor>) -> (Vec<ClassDescriptor>, Vec<Violation>) {
        let mut adapted = Vec::with_capacity(classes.len());
        let mut violations = Vec::new();
        for class in classes {
            let scala = class.markers.iter().find_map(|marker| match marker {
                ClassMarker::ScalaWeave { kind, original_name } => Some((*kind, original_name.clone())),
                _ => None,
            });
            let Some((kind, original_name)) = scala else {
                adapted.push(class);
                continue;
            };
            let Some(marker) = canonical_marker(&class, kind, original_name.as_deref()) else {
                violations.push(Violation::new(ViolationKind::ClassScalaTraitUnsupported, &class.name));
                continue;
            };
            let name = class.name.clone();
            match rewrite_marker(class, &marker) {
                Ok(rewritten) => adapted.push(rewritten),
                Err(err) => {
                    debug!(class = %name, error = %err, "could not rewrite Scala weave marker");
                    violations.push(
                        Violation::new(ViolationKind::ClassMissingRequiredAnnotations, name)
                            .detail(format!("@ScalaWeave could not be rewritten: {err}")),
                    );
                }
            }
        }
        (adapted, violations)
    }
}
