//! Front-end adapters
//!
//! Weave classes written in languages other than Java follow their own
//! conventions for naming and declaring targets. An adapter normalises its
//! language's classes into ordinary weave classes before matching, so the
//! matcher and merger only ever see one shape.

mod scala;

pub use scala::ScalaAdapter;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::model::ClassDescriptor;
use crate::violation::Violation;

/// Normaliser for one source language
pub trait LanguageAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether `class` was written in this adapter's language
    fn handles(&self, class: &ClassDescriptor) -> bool;

    /// Rewrite `classes` into canonical weave classes
    ///
    /// Classes that cannot be expressed are left out of the result and
    /// reported as violations. Adapters keep the class names they are given.
    fn adapt(&self, classes: Vec<ClassDescriptor>) -> (Vec<ClassDescriptor>, Vec<Violation>);
}

/// Adapters shipped with the weaver
pub fn default_adapters() -> Vec<Box<dyn LanguageAdapter>> {
    vec![Box::new(ScalaAdapter)]
}

/// Run every adapter over the classes it handles
///
/// Each class goes to the first adapter whose predicate accepts it; the rest
/// pass through untouched. The result keeps the input order.
pub fn adapt_all(
    adapters: &[Box<dyn LanguageAdapter>],
    classes: Vec<ClassDescriptor>,
) -> (Vec<ClassDescriptor>, Vec<Violation>) {
    let order: Vec<String> = classes.iter().map(|class| class.name.clone()).collect();
    let mut partitions: Vec<Vec<ClassDescriptor>> = adapters.iter().map(|_| Vec::new()).collect();
    let mut adapted: FxHashMap<String, ClassDescriptor> = FxHashMap::default();

    for class in classes {
        match adapters.iter().position(|adapter| adapter.handles(&class)) {
            Some(index) => partitions[index].push(class),
            None => {
                adapted.insert(class.name.clone(), class);
            }
        }
    }

    let mut violations = Vec::new();
    for (adapter, partition) in adapters.iter().zip(partitions) {
        if partition.is_empty() {
            continue;
        }
        let count = partition.len();
        let (classes, rejected) = adapter.adapt(partition);
        debug!(
            adapter = adapter.name(),
            classes = count,
            rejected = rejected.len(),
            "adapted weave classes"
        );
        adapted.extend(classes.into_iter().map(|class| (class.name.clone(), class)));
        violations.extend(rejected);
    }

    let classes = order.iter().filter_map(|name| adapted.remove(name)).collect();
    (classes, violations)
}
