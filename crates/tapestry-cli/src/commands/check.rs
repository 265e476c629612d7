//! `tapestry check`: validate a weave package against compiled classes

use std::path::Path;

use anyhow::Context;
use tapestry_weaver::{PackageStatus, WeavePackage};

use crate::classpath::DirectoryClassPath;
use crate::output::StyledOutput;

pub fn execute(package: &Path, classpath: &Path, json: bool, out: &mut StyledOutput) -> anyhow::Result<bool> {
    let package =
        WeavePackage::load(package).with_context(|| format!("loading weave package {}", package.display()))?;
    let classpath = DirectoryClassPath::new(classpath);
    let validation = package
        .validate(&classpath)
        .with_context(|| format!("validating {}", package.name()))?;

    if json {
        out.json(&serde_json::to_value(&validation)?)?;
        return Ok(validation.status != PackageStatus::Validated || validation.is_valid());
    }

    match &validation.status {
        PackageStatus::Skipped { guard } => {
            out.skip_badge();
            out.plain(&format!(" {} ", validation.package));
            out.dim(&format!("(guard class {} present)", guard));
            out.newline();
        }
        PackageStatus::Validated if validation.violations.is_empty() => {
            out.ok_badge();
            out.plain(&format!(" {} ", validation.package));
            out.dim(&format!(
                "{} weave classes, fingerprint {}",
                package.weave_classes().count(),
                short(&validation.fingerprint)
            ));
            out.newline();
        }
        PackageStatus::Validated => {
            out.fail_badge();
            out.plain(&format!(" {} ", validation.package));
            out.error(&format!("{} violation(s)", validation.violations.len()));
            out.newline();
            out.violations(&validation.violations);
        }
    }
    out.flush();
    Ok(validation.status != PackageStatus::Validated || validation.is_valid())
}

/// Leading digits of a fingerprint
pub fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}
