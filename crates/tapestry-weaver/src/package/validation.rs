//! Whole-package validation against a class path

use serde::Serialize;
use tapestry_classfile::ClassResult;
use tracing::debug;

use super::{references, WeavePackage};
use crate::classpath::ClassPath;
use crate::marker::MatchStrategy;
use crate::matcher::{weave_target, MatchResult, Matcher, WeaveTarget};
use crate::violation::{Violation, ViolationKind};

/// How a package fared against a class path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PackageStatus {
    /// A guard class is present; nothing was checked
    Skipped { guard: String },
    /// Every weave class was checked against its original
    Validated,
}

/// Result of [`WeavePackage::validate`]
#[derive(Debug, Clone, Serialize)]
pub struct PackageValidation {
    pub package: String,
    pub fingerprint: String,
    #[serde(flatten)]
    pub status: PackageStatus,
    pub violations: Vec<Violation>,
}

impl PackageValidation {
    /// Validated without a single violation
    pub fn is_valid(&self) -> bool {
        self.status == PackageStatus::Validated && self.violations.is_empty()
    }
}

impl WeavePackage {
    /// First guard class that `classpath` can resolve
    pub fn present_guard(&self, classpath: &dyn ClassPath) -> Option<&str> {
        self.guards()
            .iter()
            .find(|guard| classpath.contains(guard))
            .map(String::as_str)
    }

    /// Check every named weave class against the original `classpath` holds
    ///
    /// Interface and annotation weaves have no single original to compare
    /// with; they are only checked when a candidate is woven.
    pub fn validate(&self, classpath: &dyn ClassPath) -> ClassResult<PackageValidation> {
        let mut validation = PackageValidation {
            package: self.name().to_string(),
            fingerprint: self.fingerprint().to_string(),
            status: PackageStatus::Validated,
            violations: Vec::new(),
        };
        if let Some(guard) = self.present_guard(classpath) {
            debug!(package = %self.name(), guard, "package skipped by guard class");
            validation.status = PackageStatus::Skipped {
                guard: guard.to_string(),
            };
            return Ok(validation);
        }

        let matcher = Matcher::new(classpath);
        let mut violations = self.adapter_violations().to_vec();
        for weave in self.weave_classes() {
            let Some((WeaveTarget::Named(name), strategy)) = weave_target(weave) else {
                continue;
            };
            if name.contains('.') {
                violations.push(Violation::new(ViolationKind::IllegalClassName, &weave.name).detail(name));
                continue;
            }
            let Some(original) = classpath.find(name) else {
                violations.push(Violation::new(ViolationKind::MissingOriginalBytecode, &weave.name).detail(name));
                continue;
            };
            if strategy == MatchStrategy::Interface {
                continue;
            }
            if let MatchResult::Applicable(found) = matcher.match_class(weave, &original, strategy)? {
                violations.extend(found);
            }
        }

        violations.extend(references::check(self, classpath)?);
        validation.violations = self.filter_violations(violations);
        debug!(
            package = %self.name(),
            violations = validation.violations.len(),
            "validated weave package"
        );
        Ok(validation)
    }
}
