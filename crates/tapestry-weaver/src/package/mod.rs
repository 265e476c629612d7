//! Weave packages
//!
//! A package bundles the weave classes of one instrumentation module with
//! its manifest. Packages are built once, adapted by the front-end adapters
//! and never change afterwards; the engine re-validates them against every
//! class it is handed.

mod config;
mod references;
mod validation;

pub use config::{ConfigError, FieldStorageKind, WeavePackageConfig, MANIFEST_FILE};
pub use validation::{PackageStatus, PackageValidation};

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::adapter::{adapt_all, default_adapters, LanguageAdapter};
use crate::error::PackageError;
use crate::marker::MatchStrategy;
use crate::matcher::{weave_target, WeaveTarget};
use crate::model::ClassDescriptor;
use crate::violation::Violation;

/// Role of a class inside a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaveRole {
    /// `@Weave` with the exact-class strategy
    Exact,
    /// `@Weave` with the base-class or interface strategy
    Base,
    /// `@WeaveWithAnnotation`
    Annotated,
    /// `@SkipIfPresent` guard
    Guard,
    /// Helper class without a marker; never woven
    Utility,
}

/// Immutable bundle of weave classes
#[derive(Debug, Clone)]
pub struct WeavePackage {
    config: WeavePackageConfig,
    classes: Vec<ClassDescriptor>,
    roles: Vec<WeaveRole>,
    guards: Vec<String>,
    adapter_violations: Vec<Violation>,
    fingerprint: String,
}

fn role_of(class: &ClassDescriptor) -> WeaveRole {
    if class.skip_if_present().is_some() {
        return WeaveRole::Guard;
    }
    match weave_target(class) {
        Some((WeaveTarget::Annotated(_), _)) => WeaveRole::Annotated,
        Some((WeaveTarget::Named(_), MatchStrategy::ExactClass)) => WeaveRole::Exact,
        Some((WeaveTarget::Named(_), _)) => WeaveRole::Base,
        None => WeaveRole::Utility,
    }
}

fn collect_class_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), PackageError> {
    let io_error = |source| PackageError::Io {
        path: dir.display().to_string(),
        source,
    };
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            collect_class_files(&path, files)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("class") {
            files.push(path);
        }
    }
    Ok(())
}

impl WeavePackage {
    /// Package from parsed weave classes, normalised by the default adapters
    pub fn new(config: WeavePackageConfig, classes: Vec<ClassDescriptor>) -> Self {
        Self::with_adapters(config, classes, &default_adapters())
    }

    pub fn with_adapters(
        config: WeavePackageConfig,
        classes: Vec<ClassDescriptor>,
        adapters: &[Box<dyn LanguageAdapter>],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(config.to_toml().as_bytes());
        for class in &classes {
            hasher.update(class.to_bytes());
        }
        let fingerprint = hex::encode(hasher.finalize());

        let (classes, adapter_violations) = adapt_all(adapters, classes);
        let roles: Vec<WeaveRole> = classes.iter().map(role_of).collect();

        let mut guards = config.skip_if_present.clone();
        for class in &classes {
            if let Some(guard) = class.skip_if_present() {
                if !guards.iter().any(|g| g == guard) {
                    guards.push(guard.to_string());
                }
            }
        }

        debug!(
            package = %config.name,
            classes = classes.len(),
            guards = guards.len(),
            fingerprint = %fingerprint,
            "built weave package"
        );
        Self {
            config,
            classes,
            roles,
            guards,
            adapter_violations,
            fingerprint,
        }
    }

    /// Package from raw class files, each paired with a label for errors
    pub fn from_bytes<'b>(
        config: WeavePackageConfig,
        files: impl IntoIterator<Item = (String, &'b [u8])>,
    ) -> Result<Self, PackageError> {
        let mut classes = Vec::new();
        for (path, bytes) in files {
            let class = ClassDescriptor::parse(bytes).map_err(|source| PackageError::ClassFormat { path, source })?;
            classes.push(class);
        }
        Ok(Self::new(config, classes))
    }

    /// Load a package directory: `weave.toml` plus every `.class` below it
    pub fn load(dir: &Path) -> Result<Self, PackageError> {
        let config = WeavePackageConfig::from_file(&dir.join(MANIFEST_FILE))?;
        let mut files = Vec::new();
        collect_class_files(dir, &mut files)?;
        files.sort();

        let mut contents = Vec::with_capacity(files.len());
        for path in files {
            let bytes = std::fs::read(&path).map_err(|source| PackageError::Io {
                path: path.display().to_string(),
                source,
            })?;
            contents.push((path.display().to_string(), bytes));
        }
        Self::from_bytes(
            config,
            contents.iter().map(|(path, bytes)| (path.clone(), bytes.as_slice())),
        )
    }

    pub fn config(&self) -> &WeavePackageConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn priority(&self) -> i32 {
        self.config.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Every class of the package after adaptation
    pub fn classes(&self) -> &[ClassDescriptor] {
        &self.classes
    }

    pub fn role(&self, index: usize) -> WeaveRole {
        self.roles[index]
    }

    /// Classes that can be woven, in declaration order
    pub fn weave_classes(&self) -> impl Iterator<Item = &ClassDescriptor> + '_ {
        self.classes
            .iter()
            .zip(&self.roles)
            .filter(|(_, role)| matches!(role, WeaveRole::Exact | WeaveRole::Base | WeaveRole::Annotated))
            .map(|(class, _)| class)
    }

    /// Classes whose presence disables the package
    pub fn guards(&self) -> &[String] {
        &self.guards
    }

    /// Violations raised while adapting the package's classes
    pub fn adapter_violations(&self) -> &[Violation] {
        &self.adapter_violations
    }

    /// Hex SHA-256 of the manifest and the class bytes
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Drop violations this package's manifest ignores
    pub fn filter_violations(&self, violations: Vec<Violation>) -> Vec<Violation> {
        violations
            .into_iter()
            .filter(|violation| !self.config.violation_filter.contains(&violation.kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::ClassMarker;
    use crate::violation::ViolationKind;
    use tapestry_classfile::ClassBuilder;

    pub(crate) fn marked(name: &str, marker: Option<ClassMarker>) -> ClassDescriptor {
        let mut class = ClassBuilder::new(name, "java/lang/Object");
        if let Some(marker) = marker {
            class.annotate(marker.to_annotation());
        }
        ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_roles_and_guards() {
        let mut config = WeavePackageConfig::new("sample");
        config.skip_if_present.push("lib/NewApi".into());
        let classes = vec![
            marked(
                "w/Exact",
                Some(ClassMarker::Weave {
                    strategy: MatchStrategy::ExactClass,
                    original_name: Some("lib/Client".into()),
                }),
            ),
            marked(
                "w/Base",
                Some(ClassMarker::Weave {
                    strategy: MatchStrategy::Interface,
                    original_name: Some("lib/Handler".into()),
                }),
            ),
            marked(
                "w/Guard",
                Some(ClassMarker::SkipIfPresent {
                    original_name: Some("lib/Other".into()),
                }),
            ),
            marked("w/Util", None),
        ];
        let package = WeavePackage::new(config, classes);
        let roles: Vec<WeaveRole> = (0..4).map(|i| package.role(i)).collect();
        assert_eq!(
            roles,
            vec![WeaveRole::Exact, WeaveRole::Base, WeaveRole::Guard, WeaveRole::Utility]
        );
        assert_eq!(package.weave_classes().count(), 2);
        assert_eq!(package.guards(), &["lib/NewApi".to_string(), "lib/Other".to_string()]);
        assert_eq!(package.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = WeavePackage::new(WeavePackageConfig::new("a"), vec![marked("w/One", None)]);
        let b = WeavePackage::new(WeavePackageConfig::new("a"), vec![marked("w/Two", None)]);
        let c = WeavePackage::new(WeavePackageConfig::new("a"), vec![marked("w/One", None)]);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_filter_violations() {
        let mut config = WeavePackageConfig::new("filtered");
        config.violation_filter.push(ViolationKind::FieldMissing);
        let package = WeavePackage::new(config, Vec::new());
        let kept = package.filter_violations(vec![
            Violation::new(ViolationKind::FieldMissing, "w/W"),
            Violation::new(ViolationKind::MethodThrowsMismatch, "w/W"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind, ViolationKind::MethodThrowsMismatch);
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "name = \"on-disk\"\npriority = 3\n").unwrap();
        std::fs::create_dir_all(dir.path().join("w")).unwrap();
        let bytes = ClassBuilder::new("w/Helper", "java/lang/Object").to_bytes().unwrap();
        std::fs::write(dir.path().join("w/Helper.class"), bytes).unwrap();

        let package = WeavePackage::load(dir.path()).unwrap();
        assert_eq!(package.name(), "on-disk");
        assert_eq!(package.priority(), 3);
        assert_eq!(package.classes().len(), 1);
        assert_eq!(package.role(0), WeaveRole::Utility);
    }

    #[test]
    fn test_load_rejects_bad_class() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "name = \"broken\"").unwrap();
        std::fs::write(dir.path().join("Bad.class"), [0u8, 1, 2, 3]).unwrap();
        let err = WeavePackage::load(dir.path()).unwrap_err();
        assert!(matches!(err, PackageError::ClassFormat { .. }));
    }
}
