//! `tapestry weave`: apply weave packages to a directory of classes
//!
//! Every class under the class path goes through the engine; woven
//! classes are written to the output directory under their internal name.
//! Unchanged and rejected classes are not written.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tapestry_weaver::{FailureReason, LoadContext, WeaveEngine, WeaveOutcome, WeavePackage, WeaveReport};
use tracing::info;

use crate::classpath::DirectoryClassPath;
use crate::commands::check::short;
use crate::output::StyledOutput;

pub struct WeaveOptions {
    pub packages: Vec<PathBuf>,
    pub classpath: PathBuf,
    pub out_dir: PathBuf,
    pub json: bool,
}

#[derive(Debug, Default)]
struct Summary {
    woven: usize,
    unchanged: usize,
    rejected: usize,
    malformed: usize,
}

pub fn execute(options: WeaveOptions, out: &mut StyledOutput) -> anyhow::Result<bool> {
    let mut packages = Vec::with_capacity(options.packages.len());
    for dir in &options.packages {
        let package =
            WeavePackage::load(dir).with_context(|| format!("loading weave package {}", dir.display()))?;
        if !options.json {
            out.dim(&format!(
                "package {} v{} (priority {}, {})",
                package.name(),
                package.config().version,
                package.priority(),
                short(package.fingerprint())
            ));
            out.newline();
        }
        packages.push(package);
    }
    let engine = WeaveEngine::new(packages);
    let classpath = DirectoryClassPath::new(&options.classpath);
    let context = LoadContext::new(options.classpath.display().to_string());

    let mut summary = Summary::default();
    let mut reports: Vec<WeaveReport> = Vec::new();
    for name in classpath.class_names()? {
        let path = classpath.path_of(&name);
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        match engine.weave(&bytes, &classpath, &context) {
            WeaveOutcome::Unchanged { .. } => summary.unchanged += 1,
            WeaveOutcome::Woven { bytes, report } => {
                summary.woven += 1;
                let target = write_class(&options.out_dir, &name, &bytes)?;
                if !options.json {
                    out.woven_badge();
                    out.plain(&format!(" {} ", name));
                    out.dim(&format!("<- {}", report.applied().join(", ")));
                    out.newline();
                }
                info!(class = %name, "wrote {}", target.display());
                reports.push(report);
            }
            WeaveOutcome::Rejected { report, .. } => {
                summary.rejected += 1;
                if !options.json {
                    print_rejection(&report, out);
                }
                reports.push(report);
            }
            WeaveOutcome::Malformed(error) => {
                summary.malformed += 1;
                if !options.json {
                    out.fail_badge();
                    out.plain(&format!(" {} ", name));
                    out.error(&error.to_string());
                    out.newline();
                }
            }
        }
    }

    if options.json {
        out.json(&serde_json::to_value(&reports)?)?;
    } else {
        print_summary(&summary, classpath.root(), &options.out_dir, out);
    }
    Ok(summary.rejected == 0 && summary.malformed == 0)
}

fn write_class(out_dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    let target = out_dir.join(format!("{}.class", name));
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(&target, bytes).with_context(|| format!("writing {}", target.display()))?;
    Ok(target)
}

fn print_rejection(report: &WeaveReport, out: &mut StyledOutput) {
    out.fail_badge();
    out.plain(&format!(" {}", report.candidate));
    out.newline();
    for failure in &report.failures {
        out.plain("  ");
        out.bold(&failure.weave_class);
        out.dim(&format!(" ({})", failure.package));
        out.newline();
        match &failure.reason {
            FailureReason::Violations { violations } => out.violations(violations),
            FailureReason::Merge { message } | FailureReason::ClassFormat { message } => {
                out.plain("    ");
                out.error(message);
                out.newline();
            }
        }
    }
}

fn print_summary(summary: &Summary, classpath: &Path, out_dir: &Path, out: &mut StyledOutput) {
    out.newline();
    out.bold(&format!("{}: ", classpath.display()));
    out.success(&format!("{} woven", summary.woven));
    out.plain(&format!(", {} unchanged", summary.unchanged));
    if summary.rejected > 0 {
        out.plain(", ");
        out.error(&format!("{} rejected", summary.rejected));
    }
    if summary.malformed > 0 {
        out.plain(", ");
        out.warning(&format!("{} malformed", summary.malformed));
    }
    if summary.woven > 0 {
        out.dim(&format!(" -> {}", out_dir.display()));
    }
    out.newline();
    out.flush();
}
