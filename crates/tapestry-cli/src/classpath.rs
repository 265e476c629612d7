//! Class path over a directory of compiled classes
//!
//! `a/b/C` resolves to `<root>/a/b/C.class`. Classes are parsed on first
//! lookup and cached, misses included.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tapestry_weaver::{ClassDescriptor, ClassPath};
use tracing::{debug, warn};

pub struct DirectoryClassPath {
    root: PathBuf,
    cache: RwLock<FxHashMap<String, Option<Arc<ClassDescriptor>>>>,
}

impl DirectoryClassPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding class `name`
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.class", name))
    }

    /// Internal names of every class under the root, sorted
    pub fn class_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        collect(&self.root, &self.root, &mut names)?;
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        let path = self.path_of(name);
        let bytes = std::fs::read(&path).ok()?;
        match ClassDescriptor::parse(&bytes) {
            Ok(class) => {
                debug!(class = name, "loaded from {}", path.display());
                Some(Arc::new(class))
            }
            Err(error) => {
                warn!(class = name, %error, "unreadable class file");
                None
            }
        }
    }
}

fn collect(root: &Path, dir: &Path, names: &mut Vec<String>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect(root, &path, names)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("class") {
            continue;
        }
        let relative = path.strip_prefix(root)?.with_extension("");
        let name: Vec<String> = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect();
        names.push(name.join("/"));
    }
    Ok(())
}

impl ClassPath for DirectoryClassPath {
    fn find(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        if let Some(cached) = self.cache.read().get(name) {
            return cached.clone();
        }
        let loaded = self.load(name);
        self.cache.write().insert(name.to_string(), loaded.clone());
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapestry_classfile::ClassBuilder;

    fn write_class(root: &Path, name: &str) {
        let path = root.join(format!("{}.class", name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let bytes = ClassBuilder::new(name, "java/lang/Object").to_bytes().unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_finds_nested_classes() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "app/model/User");
        write_class(dir.path(), "app/Main");

        let classpath = DirectoryClassPath::new(dir.path());
        assert_eq!(classpath.find("app/model/User").unwrap().name, "app/model/User");
        assert!(classpath.find("app/Missing").is_none());
        assert_eq!(classpath.class_names().unwrap(), vec!["app/Main", "app/model/User"]);
    }

    #[test]
    fn test_garbage_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.class"), b"not a class").unwrap();
        let classpath = DirectoryClassPath::new(dir.path());
        assert!(!classpath.contains("Broken"));
        assert_eq!(classpath.class_names().unwrap(), vec!["Broken"]);
    }
}
