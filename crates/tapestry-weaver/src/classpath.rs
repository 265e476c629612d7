//! Class hierarchy lookups
//!
//! Matching needs the bytecode of classes other than the candidate: the
//! original a weave names, superclasses and every interface a candidate
//! inherits. [`ClassPath`] is the seam through which hosts provide them.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tapestry_classfile::ClassResult;

use crate::model::ClassDescriptor;

/// Read-only view of the classes visible to a loader
pub trait ClassPath: Send + Sync {
    /// Parsed class by internal name
    fn find(&self, name: &str) -> Option<Arc<ClassDescriptor>>;

    /// Whether a class exists
    fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

impl<T: ClassPath + ?Sized> ClassPath for Arc<T> {
    fn find(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        (**self).find(name)
    }

    fn contains(&self, name: &str) -> bool {
        (**self).contains(name)
    }
}

/// Class path held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryClassPath {
    classes: FxHashMap<String, Arc<ClassDescriptor>>,
}

impl MemoryClassPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: ClassDescriptor) -> Arc<ClassDescriptor> {
        let class = Arc::new(class);
        self.classes.insert(class.name.clone(), class.clone());
        class
    }

    /// Parse and add a class
    pub fn add_bytes(&mut self, bytes: &[u8]) -> ClassResult<Arc<ClassDescriptor>> {
        Ok(self.insert(ClassDescriptor::parse(bytes)?))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassPath for MemoryClassPath {
    fn find(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.get(name).cloned()
    }

    fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }
}

/// Class path consulted after a primary one
pub struct LayeredClassPath<'a> {
    primary: &'a dyn ClassPath,
    fallback: &'a dyn ClassPath,
}

impl<'a> LayeredClassPath<'a> {
    pub fn new(primary: &'a dyn ClassPath, fallback: &'a dyn ClassPath) -> Self {
        Self { primary, fallback }
    }
}

impl ClassPath for LayeredClassPath<'_> {
    fn find(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.primary.find(name).or_else(|| self.fallback.find(name))
    }
}

/// Superclasses of `class`, nearest first, stopping at the first missing one
pub fn superclasses(classpath: &dyn ClassPath, class: &ClassDescriptor) -> Vec<Arc<ClassDescriptor>> {
    let mut chain = Vec::new();
    let mut seen = FxHashSet::default();
    let mut next = class.super_name.clone();
    while let Some(name) = next {
        if !seen.insert(name.clone()) {
            break;
        }
        match classpath.find(&name) {
            Some(parent) => {
                next = parent.super_name.clone();
                chain.push(parent);
            }
            None => break,
        }
    }
    chain
}

/// Names of the superclasses of `class`, including ones whose bytecode is missing
pub fn superclass_names(classpath: &dyn ClassPath, class: &ClassDescriptor) -> Vec<String> {
    let chain = superclasses(classpath, class);
    let mut names: Vec<String> = chain.iter().map(|c| c.name.clone()).collect();
    let last_super = match chain.last() {
        Some(last) => last.super_name.clone(),
        None => class.super_name.clone(),
    };
    if let Some(missing) = last_super {
        if !names.contains(&missing) {
            names.push(missing);
        }
    }
    names
}

/// Every interface `class` implements, directly, through superclasses or
/// through superinterfaces, in breadth-first order
pub fn all_interfaces(classpath: &dyn ClassPath, class: &ClassDescriptor) -> Vec<String> {
    let mut queue: Vec<String> = class.interfaces.clone();
    for parent in superclasses(classpath, class) {
        queue.extend(parent.interfaces.iter().cloned());
    }

    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    let mut position = 0;
    while position < queue.len() {
        let name = queue[position].clone();
        position += 1;
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(interface) = classpath.find(&name) {
            queue.extend(interface.interfaces.iter().cloned());
        }
        out.push(name);
    }
    out
}

/// Whether `class` is `ancestor` or descends from it
pub fn is_subclass_of(classpath: &dyn ClassPath, class: &ClassDescriptor, ancestor: &str) -> bool {
    class.name == ancestor || superclass_names(classpath, class).iter().any(|name| name == ancestor)
}

/// Whether `class` implements `interface`, possibly indirectly
pub fn implements(classpath: &dyn ClassPath, class: &ClassDescriptor, interface: &str) -> bool {
    all_interfaces(classpath, class).iter().any(|name| name == interface)
}
