//! `tapestry dump`: print the structure of a class file

use std::path::Path;

use anyhow::Context;
use serde_json::json;
use tapestry_weaver::ClassDescriptor;

use crate::output::StyledOutput;

pub fn execute(file: &Path, json: bool, out: &mut StyledOutput) -> anyhow::Result<bool> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let class = ClassDescriptor::parse(&bytes).with_context(|| format!("parsing {}", file.display()))?;

    if json {
        out.json(&to_json(&class))?;
        return Ok(true);
    }

    out.bold(&class.name);
    if let Some(super_name) = &class.super_name {
        out.plain(&format!(" extends {}", super_name));
    }
    if !class.interfaces.is_empty() {
        out.plain(&format!(" implements {}", class.interfaces.join(", ")));
    }
    out.newline();
    out.dim(&format!(
        "  version {}, access 0x{:04x}",
        class.major_version,
        class.access.bits()
    ));
    if let Some(source) = &class.source_file {
        out.dim(&format!(", source {}", source));
    }
    out.newline();
    for marker in &class.markers {
        out.warning(&format!("  @{:?}", marker));
        out.newline();
    }

    if !class.fields.is_empty() {
        out.newline();
        out.bold("Fields");
        out.newline();
        for field in &class.fields {
            out.plain(&format!("  0x{:04x} {} {}", field.access.bits(), field.name, field.descriptor));
            if field.is_new() {
                out.success(" new");
            }
            out.newline();
        }
    }
    if !class.methods.is_empty() {
        out.newline();
        out.bold("Methods");
        out.newline();
        for method in &class.methods {
            out.plain(&format!("  0x{:04x} {}", method.access.bits(), method.signature()));
            if !method.throws.is_empty() {
                out.dim(&format!(" throws {}", method.throws.join(", ")));
            }
            for marker in &method.markers {
                out.warning(&format!(" @{:?}", marker));
            }
            out.newline();
        }
    }
    out.flush();
    Ok(true)
}

fn to_json(class: &ClassDescriptor) -> serde_json::Value {
    json!({
        "name": class.name,
        "super": class.super_name,
        "interfaces": class.interfaces,
        "access": class.access.bits(),
        "major_version": class.major_version,
        "source_file": class.source_file,
        "markers": class.markers.iter().map(|m| format!("{:?}", m)).collect::<Vec<_>>(),
        "fields": class.fields.iter().map(|field| json!({
            "name": field.name,
            "descriptor": field.descriptor,
            "access": field.access.bits(),
            "new": field.is_new(),
        })).collect::<Vec<_>>(),
        "methods": class.methods.iter().map(|method| json!({
            "name": method.name,
            "descriptor": method.descriptor,
            "access": method.access.bits(),
            "throws": method.throws,
            "markers": method.markers.iter().map(|m| format!("{:?}", m)).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}
