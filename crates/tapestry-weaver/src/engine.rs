//! Load-time weaving entry point
//!
//! [`WeaveEngine`] owns the packages of an agent and turns candidate class
//! bytes into woven bytes. It never fails the load: anything that goes wrong
//! is reported and the candidate's bytes come back untouched.
//!
//! A candidate is handled in two passes. Every weave class of every package
//! is first matched against the unmodified candidate; only when all of them
//! are clean, and no two replace the same method, are the weaves merged one
//! after another in package priority order.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tapestry_classfile::ClassFormatError;
use tracing::{debug, debug_span, info, warn};

use crate::classpath::{ClassPath, LayeredClassPath, MemoryClassPath};
use crate::matcher::{weave_target, MatchAnalysis, Matcher};
use crate::merger;
use crate::model::ClassDescriptor;
use crate::package::WeavePackage;
use crate::violation::{Violation, ViolationKind};

/// Per-classloader state the host keeps between calls
///
/// Guard classes are resolved once per package and context; later calls
/// reuse the decision even if the class path changes.
#[derive(Debug, Default)]
pub struct LoadContext {
    name: String,
    /// Package name → guard class found, if any
    guards: RwLock<FxHashMap<String, Option<String>>>,
}

impl LoadContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guards: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Guard class that disables `package` in this context
    pub fn guard(&self, package: &WeavePackage, classpath: &dyn ClassPath) -> Option<String> {
        if let Some(decision) = self.guards.read().get(package.name()) {
            return decision.clone();
        }
        let decision = package.present_guard(classpath).map(str::to_string);
        self.guards
            .write()
            .entry(package.name().to_string())
            .or_insert(decision)
            .clone()
    }

    /// Number of packages decided so far
    pub fn decided(&self) -> usize {
        self.guards.read().len()
    }
}

/// What happened to one package for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PackageOutcome {
    /// Turned off in the manifest
    Disabled,
    /// A guard class is present in the load context
    Skipped { guard: String },
    /// No weave class of the package targets the candidate
    NotApplicable,
    /// These weave classes target the candidate without violations
    Applied { weaves: Vec<String> },
    /// At least one weave class failed; see the report's failures
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub package: String,
    pub fingerprint: String,
    #[serde(flatten)]
    pub outcome: PackageOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// The weave class does not fit the candidate
    Violations { violations: Vec<Violation> },
    /// A clean weave could not be merged
    Merge { message: String },
    /// The weave class itself could not be read while matching
    ClassFormat { message: String },
}

/// One weave class that kept the candidate from being woven
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeaveFailure {
    pub package: String,
    pub weave_class: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

/// Everything the engine decided about one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeaveReport {
    pub candidate: String,
    pub packages: Vec<PackageReport>,
    pub failures: Vec<WeaveFailure>,
}

impl WeaveReport {
    /// Violations of every failure, in package order
    pub fn violations(&self) -> impl Iterator<Item = &Violation> + '_ {
        self.failures.iter().flat_map(|failure| match &failure.reason {
            FailureReason::Violations { violations } => violations.as_slice(),
            FailureReason::Merge { .. } | FailureReason::ClassFormat { .. } => &[],
        })
    }

    /// Outcome of the named package
    pub fn package(&self, name: &str) -> Option<&PackageOutcome> {
        self.packages
            .iter()
            .find(|report| report.package == name)
            .map(|report| &report.outcome)
    }

    /// Names of the weave classes that were merged
    pub fn applied(&self) -> Vec<&str> {
        self.packages
            .iter()
            .filter_map(|report| match &report.outcome {
                PackageOutcome::Applied { weaves } => Some(weaves.iter().map(String::as_str)),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Result of weaving one candidate
#[derive(Debug)]
pub enum WeaveOutcome {
    /// No weave targets the candidate
    Unchanged { report: WeaveReport },
    /// The candidate was woven
    Woven { bytes: Vec<u8>, report: WeaveReport },
    /// Some weave failed; `bytes` are the candidate's own
    Rejected { bytes: Vec<u8>, report: WeaveReport },
    /// The candidate could not be parsed
    Malformed(ClassFormatError),
}

impl WeaveOutcome {
    pub fn report(&self) -> Option<&WeaveReport> {
        match self {
            WeaveOutcome::Unchanged { report }
            | WeaveOutcome::Woven { report, .. }
            | WeaveOutcome::Rejected { report, .. } => Some(report),
            WeaveOutcome::Malformed(_) => None,
        }
    }

    /// Woven bytes, `None` when the host should load the candidate as is
    pub fn woven_bytes(&self) -> Option<&[u8]> {
        match self {
            WeaveOutcome::Woven { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn is_woven(&self) -> bool {
        matches!(self, WeaveOutcome::Woven { .. })
    }
}

/// A clean weave waiting to be merged
struct Planned<'p> {
    package: &'p WeavePackage,
    weave: &'p ClassDescriptor,
    analysis: MatchAnalysis,
}

/// Weaves candidates with a fixed, ordered set of packages
pub struct WeaveEngine {
    packages: Vec<WeavePackage>,
}

impl WeaveEngine {
    /// Engine applying `packages` by ascending priority, then name
    pub fn new(packages: Vec<WeavePackage>) -> Self {
        let mut indexed: Vec<(usize, WeavePackage)> = packages.into_iter().enumerate().collect();
        indexed.sort_by(|(a_index, a), (b_index, b)| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.name().cmp(b.name()))
                .then_with(|| a_index.cmp(b_index))
        });
        Self {
            packages: indexed.into_iter().map(|(_, package)| package).collect(),
        }
    }

    /// Packages in application order
    pub fn packages(&self) -> &[WeavePackage] {
        &self.packages
    }

    /// Package by name or alias
    pub fn package(&self, name: &str) -> Option<&WeavePackage> {
        self.packages.iter().find(|package| package.config().is_named(name))
    }

    /// Weave one candidate class
    ///
    /// `classpath` resolves the classes the candidate refers to; the
    /// candidate itself does not need to be on it.
    pub fn weave(&self, bytes: &[u8], classpath: &dyn ClassPath, context: &LoadContext) -> WeaveOutcome {
        let candidate = match ClassDescriptor::parse(bytes) {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!(error = %err, "candidate class is malformed");
                return WeaveOutcome::Malformed(err);
            }
        };
        let _span = debug_span!("weave", class = %candidate.name, context = %context.name()).entered();

        let mut own = MemoryClassPath::new();
        own.insert(candidate.clone());
        let classpath = LayeredClassPath::new(&own, classpath);

        let mut report = WeaveReport {
            candidate: candidate.name.clone(),
            packages: Vec::with_capacity(self.packages.len()),
            failures: Vec::new(),
        };
        let plans = self.plan(&candidate, &classpath, context, &mut report);
        report.failures.extend(find_conflicts(&plans));

        if !report.failures.is_empty() {
            return self.reject(bytes, report);
        }
        if plans.is_empty() {
            debug!("no weave applies");
            return WeaveOutcome::Unchanged { report };
        }

        let mut current = candidate;
        for plan in &plans {
            let options = plan.package.config().merge_options();
            match merger::apply(&plan.analysis, plan.weave, current.clone(), &options) {
                Ok(next) => current = next,
                Err(err) => {
                    report.failures.push(WeaveFailure {
                        package: plan.package.name().to_string(),
                        weave_class: plan.weave.name.clone(),
                        reason: FailureReason::Merge {
                            message: err.to_string(),
                        },
                    });
                    if let Some(package) = report.packages.iter_mut().find(|p| p.package == plan.package.name()) {
                        package.outcome = PackageOutcome::Failed;
                    }
                    return self.reject(bytes, report);
                }
            }
        }

        info!(weaves = plans.len(), "woven");
        WeaveOutcome::Woven {
            bytes: current.to_bytes(),
            report,
        }
    }

    fn reject(&self, bytes: &[u8], report: WeaveReport) -> WeaveOutcome {
        for failure in &report.failures {
            match &failure.reason {
                FailureReason::Violations { violations } => {
                    for violation in violations {
                        warn!(package = %failure.package, "{}", violation);
                    }
                }
                FailureReason::Merge { message } => {
                    warn!(package = %failure.package, weave = %failure.weave_class, "merge failed: {}", message);
                }
                FailureReason::ClassFormat { message } => {
                    warn!(package = %failure.package, weave = %failure.weave_class, "weave class is malformed: {}", message);
                }
            }
        }
        WeaveOutcome::Rejected {
            bytes: bytes.to_vec(),
            report,
        }
    }

    /// Match every enabled package against the untouched candidate
    fn plan<'p>(
        &'p self,
        candidate: &ClassDescriptor,
        classpath: &dyn ClassPath,
        context: &LoadContext,
        report: &mut WeaveReport,
    ) -> Vec<Planned<'p>> {
        let matcher = Matcher::new(classpath);
        let mut plans = Vec::new();

        for package in &self.packages {
            let outcome = if !package.is_enabled() {
                PackageOutcome::Disabled
            } else if let Some(guard) = context.guard(package, classpath) {
                debug!(package = %package.name(), guard = %guard, "package skipped");
                PackageOutcome::Skipped { guard }
            } else {
                let mut applied = Vec::new();
                let mut failed = false;
                for weave in package.weave_classes() {
                    let Some((_, strategy)) = weave_target(weave) else { continue };
                    let fail = |reason| WeaveFailure {
                        package: package.name().to_string(),
                        weave_class: weave.name.clone(),
                        reason,
                    };
                    let analysis = match matcher.analyze(weave, candidate, strategy) {
                        Ok(Some(analysis)) => analysis,
                        Ok(None) => continue,
                        Err(err) => {
                            report.failures.push(fail(FailureReason::ClassFormat {
                                message: err.to_string(),
                            }));
                            failed = true;
                            continue;
                        }
                    };
                    let violations = package.filter_violations(analysis.violations.clone());
                    if violations.is_empty() {
                        applied.push(weave.name.clone());
                        plans.push(Planned {
                            package,
                            weave,
                            analysis,
                        });
                    } else {
                        report.failures.push(fail(FailureReason::Violations { violations }));
                        failed = true;
                    }
                }
                match (failed, applied.is_empty()) {
                    (true, _) => PackageOutcome::Failed,
                    (false, true) => PackageOutcome::NotApplicable,
                    (false, false) => PackageOutcome::Applied { weaves: applied },
                }
            };
            report.packages.push(PackageReport {
                package: package.name().to_string(),
                fingerprint: package.fingerprint().to_string(),
                outcome,
            });
        }
        plans
    }
}

/// Report every weave that replaces a method an earlier weave already replaces
///
/// Constructor and static initializer code is appended rather than
/// replaced, so those never conflict.
fn find_conflicts(plans: &[Planned<'_>]) -> Vec<WeaveFailure> {
    let mut owners: FxHashMap<(String, String), String> = FxHashMap::default();
    let mut failures = Vec::new();
    for plan in plans.iter() {
        let mut violations = Vec::new();
        for (name, descriptor) in plan.analysis.replaced_methods() {
            let key = (name.to_string(), descriptor.to_string());
            match owners.get(&key) {
                Some(owner) => violations.push(
                    Violation::new(ViolationKind::MethodConflict, &plan.weave.name)
                        .candidate(&plan.analysis.original_name)
                        .method(name, descriptor)
                        .detail(format!("already replaced by {}", owner)),
                ),
                None => {
                    owners.insert(key, plan.weave.name.clone());
                }
            }
        }
        if !violations.is_empty() {
            failures.push(WeaveFailure {
                package: plan.package.name().to_string(),
                weave_class: plan.weave.name.clone(),
                reason: FailureReason::Violations { violations },
            });
        }
    }
    failures
}
