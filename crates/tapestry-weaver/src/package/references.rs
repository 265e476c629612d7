//! Reference checks for weave and utility code
//!
//! Weave code is compiled against one version of the library it
//! instruments and may meet another at run time. Every class, method and
//! field the package's code names outside the package is resolved against
//! the class path, so a renamed or removed member shows up as a violation
//! instead of a linkage error in the woven application.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tapestry_classfile::{AccessFlags, ClassResult, Opcode};

use super::{WeavePackage, WeaveRole};
use crate::classpath::{all_interfaces, superclasses, ClassPath};
use crate::marker::API_PACKAGE;
use crate::merger::{HANDLER_DESCRIPTOR, HANDLER_METHOD};
use crate::model::ClassDescriptor;
use crate::scan::{BodyScan, MemberUse};
use crate::violation::{Violation, ViolationKind};

/// Resolved by the platform rather than the class path
const PLATFORM_PREFIXES: [&str; 2] = ["java/", "javax/"];

/// Class named by a member owner, `None` for arrays of primitives
fn element_class(owner: &str) -> Option<&str> {
    let element = owner.trim_start_matches('[');
    if element.len() == owner.len() {
        return Some(owner);
    }
    element.strip_prefix('L').and_then(|name| name.strip_suffix(';'))
}

/// `class` followed by its superclasses and then every interface it inherits
fn hierarchy(classpath: &dyn ClassPath, class: &Arc<ClassDescriptor>) -> Vec<Arc<ClassDescriptor>> {
    let mut chain = vec![Arc::clone(class)];
    chain.extend(superclasses(classpath, class));
    chain.extend(
        all_interfaces(classpath, class)
            .iter()
            .filter_map(|name| classpath.find(name)),
    );
    chain
}

struct ReferenceCheck<'a> {
    classpath: &'a dyn ClassPath,
    /// Classes the package itself provides
    local: FxHashSet<&'a str>,
    reported_missing: FxHashSet<(String, String)>,
    violations: Vec<Violation>,
}

impl<'a> ReferenceCheck<'a> {
    fn is_external(&self, name: &str) -> bool {
        !self.local.contains(name)
            && !PLATFORM_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
            && !name
                .strip_prefix(API_PACKAGE)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn report(&mut self, violation: Violation) {
        if !self.violations.contains(&violation) {
            self.violations.push(violation);
        }
    }

    /// Class `name` as referenced from `origin`, reporting it when missing
    fn resolve(&mut self, origin: &str, name: &str) -> Option<Arc<ClassDescriptor>> {
        let found = self.classpath.find(name);
        if found.is_none() && self.reported_missing.insert((origin.to_string(), name.to_string())) {
            self.violations.push(
                Violation::new(ViolationKind::MissingOriginalBytecode, origin)
                    .candidate(name)
                    .detail("referenced class not found"),
            );
        }
        found
    }

    fn check_class(&mut self, class: &ClassDescriptor, role: WeaveRole) -> ClassResult<()> {
        // weave supertypes are the matcher's business
        if role == WeaveRole::Utility {
            self.check_supertypes(class);
        }
        let pool = &class.class_file().constant_pool;
        for method in &class.methods {
            let Some(body) = class.body(method)? else { continue };
            let scan = BodyScan::of(&body, pool)?;
            for call in &scan.invocations {
                self.check_method(&class.name, call);
            }
            for access in &scan.field_accesses {
                self.check_field(&class.name, access);
            }
        }
        Ok(())
    }

    fn check_supertypes(&mut self, class: &ClassDescriptor) {
        if let Some(parent) = class.super_name.as_deref().filter(|name| self.is_external(name)) {
            if let Some(found) = self.resolve(&class.name, parent) {
                if found.is_interface() || found.access.is_final() {
                    self.report(
                        Violation::new(ViolationKind::InvalidReference, &class.name)
                            .candidate(parent)
                            .detail("superclass is an interface or final"),
                    );
                }
            }
        }
        for interface in &class.interfaces {
            if !self.is_external(interface) {
                continue;
            }
            if let Some(found) = self.resolve(&class.name, interface) {
                if !found.is_interface() {
                    self.report(
                        Violation::new(ViolationKind::InvalidReference, &class.name)
                            .candidate(interface)
                            .detail("implemented type is not an interface"),
                    );
                }
            }
        }
    }

    fn check_method(&mut self, origin: &str, call: &MemberUse) {
        let Some(owner) = element_class(&call.owner) else { return };
        if owner == origin || !self.is_external(owner) {
            return;
        }
        let Some(target) = self.resolve(origin, owner) else { return };

        let access = if call.name == "<init>" {
            target.method(&call.name, &call.descriptor).map(|m| m.access)
        } else {
            hierarchy(self.classpath, &target)
                .iter()
                .find_map(|class| class.method(&call.name, &call.descriptor).map(|m| m.access))
        };
        let problem = match (call.opcode, access) {
            (Opcode::Invokeinterface, _) if !target.is_interface() => "invokeinterface on a class",
            (Opcode::Invokevirtual, _) if target.is_interface() => "invokevirtual on an interface",
            (_, None) => "missing method",
            (_, Some(access)) if access.is_private() => "method is private",
            (opcode, Some(access)) if (opcode == Opcode::Invokestatic) != access.is_static() => {
                "static modifier differs"
            }
            _ => return,
        };
        self.report(
            Violation::new(ViolationKind::InvalidReference, origin)
                .candidate(owner)
                .method(&call.name, &call.descriptor)
                .detail(problem),
        );
    }

    fn check_field(&mut self, origin: &str, access: &MemberUse) {
        let Some(owner) = element_class(&access.owner) else { return };
        if owner == origin || !self.is_external(owner) {
            return;
        }
        let Some(target) = self.resolve(origin, owner) else { return };

        let found: Option<(AccessFlags, String)> = hierarchy(self.classpath, &target)
            .iter()
            .find_map(|class| class.field(&access.name).map(|f| (f.access, f.descriptor.clone())));
        let wants_static = matches!(access.opcode, Opcode::Getstatic | Opcode::Putstatic);
        let problem = match found {
            None => "missing field",
            Some((_, descriptor)) if descriptor != access.descriptor => "field type differs",
            Some((flags, _)) if flags.is_private() => "field is private",
            Some((flags, _)) if flags.is_static() != wants_static => "static modifier differs",
            _ => return,
        };
        self.report(
            Violation::new(ViolationKind::InvalidReference, origin)
                .candidate(owner)
                .member(format!("{}:{}", access.name, access.descriptor))
                .detail(problem),
        );
    }

    fn check_error_handler(&mut self, handler: &str) {
        let Some(class) = self.resolve(handler, handler) else { return };
        let usable = class
            .method(HANDLER_METHOD, HANDLER_DESCRIPTOR)
            .is_some_and(|method| method.access.is_static() && !method.access.is_private());
        if !usable {
            self.report(
                Violation::new(ViolationKind::InvalidReference, handler)
                    .candidate(handler)
                    .method(HANDLER_METHOD, HANDLER_DESCRIPTOR)
                    .detail("error handler needs a static handler method"),
            );
        }
    }
}

/// Resolve everything the package's weave and utility classes reference
pub(super) fn check(package: &WeavePackage, classpath: &dyn ClassPath) -> ClassResult<Vec<Violation>> {
    let mut check = ReferenceCheck {
        classpath,
        local: package.classes().iter().map(|class| class.name.as_str()).collect(),
        reported_missing: FxHashSet::default(),
        violations: Vec::new(),
    };
    for (index, class) in package.classes().iter().enumerate() {
        let role = package.role(index);
        if role != WeaveRole::Guard {
            check.check_class(class, role)?;
        }
    }
    if let Some(handler) = &package.config().error_handler {
        check.check_error_handler(handler);
    }
    Ok(check.violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::MemoryClassPath;
    use crate::package::WeavePackageConfig;
    use tapestry_classfile::access::{ACC_FINAL, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
    use tapestry_classfile::{ClassBuilder, Opcode};

    fn library() -> MemoryClassPath {
        let mut base = ClassBuilder::new("lib/Base", "java/lang/Object");
        base.method(ACC_PUBLIC, "close", "()V", |m| {
            m.code(1, |c| {
                c.op(Opcode::Return);
            });
        });
        let mut client = ClassBuilder::new("lib/Client", "lib/Base");
        client.field(ACC_PRIVATE, "secret", "I");
        client.field(ACC_PUBLIC | ACC_STATIC, "INSTANCES", "I");
        client.method(ACC_PUBLIC, "connect", "()V", |m| {
            m.code(1, |c| {
                c.op(Opcode::Return);
            });
        });
        let mut sealed = ClassBuilder::new("lib/Sealed", "java/lang/Object");
        sealed.access(ACC_PUBLIC | ACC_FINAL);

        let mut classpath = MemoryClassPath::new();
        for class in [base, client, sealed] {
            classpath.add_bytes(&class.to_bytes().unwrap()).unwrap();
        }
        classpath
    }

    fn helper(define: impl FnOnce(&mut tapestry_classfile::CodeBuilder<'_>)) -> ClassDescriptor {
        let mut class = ClassBuilder::new("w/Helper", "java/lang/Object");
        class.method(ACC_PUBLIC | ACC_STATIC, "help", "(Llib/Client;)V", |m| {
            m.code(1, |c| {
                define(c);
                c.op(Opcode::Return);
            });
        });
        ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap()
    }

    fn violations_of(classes: Vec<ClassDescriptor>) -> Vec<Violation> {
        let package = WeavePackage::new(WeavePackageConfig::new("refs"), classes);
        check(&package, &library()).unwrap()
    }

    #[test]
    fn test_inherited_members_resolve() {
        let found = violations_of(vec![helper(|c| {
            c.aload(0)
                .invokevirtual("lib/Client", "connect", "()V")
                .aload(0)
                .invokevirtual("lib/Client", "close", "()V")
                .getstatic("lib/Client", "INSTANCES", "I")
                .op(Opcode::Pop)
                .invokestatic("tapestry/api/Weaver", "callOriginal", "()Ljava/lang/Object;")
                .op(Opcode::Pop)
                .aload(0)
                .invokevirtual("java/lang/Object", "hashCode", "()I")
                .op(Opcode::Pop);
        })]);
        assert!(found.is_empty(), "{:?}", found);
    }

    #[test]
    fn test_missing_and_mismatched_members() {
        let found = violations_of(vec![helper(|c| {
            c.aload(0)
                .invokevirtual("lib/Client", "disconnect", "()V")
                .aload(0)
                .getfield("lib/Client", "secret", "I")
                .op(Opcode::Pop)
                .aload(0)
                .getfield("lib/Client", "INSTANCES", "I")
                .op(Opcode::Pop)
                .invokestatic("lib/Gone", "make", "()V")
                .invokestatic("lib/Gone", "make", "()V");
        })]);
        let details: Vec<(ViolationKind, Option<&str>)> =
            found.iter().map(|v| (v.kind, v.detail.as_deref())).collect();
        assert_eq!(
            details,
            vec![
                (ViolationKind::InvalidReference, Some("missing method")),
                (ViolationKind::MissingOriginalBytecode, Some("referenced class not found")),
                (ViolationKind::InvalidReference, Some("field is private")),
                (ViolationKind::InvalidReference, Some("static modifier differs")),
            ]
        );
        assert_eq!(found[0].member.as_deref(), Some("disconnect()V"));
        assert_eq!(found[1].candidate_class.as_deref(), Some("lib/Gone"));
    }

    #[test]
    fn test_utility_supertypes_checked() {
        let mut class = ClassBuilder::new("w/Subclass", "lib/Sealed");
        class.interface("lib/Client");
        let found = violations_of(vec![ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap()]);
        let details: Vec<Option<&str>> = found.iter().map(|v| v.detail.as_deref()).collect();
        assert_eq!(
            details,
            vec![
                Some("superclass is an interface or final"),
                Some("implemented type is not an interface")
            ]
        );
    }

    #[test]
    fn test_package_classes_are_not_checked() {
        let mut other = ClassBuilder::new("w/Other", "java/lang/Object");
        other.method(ACC_PUBLIC | ACC_STATIC, "other", "()V", |m| {
            m.code(0, |c| {
                c.invokestatic("w/Helper", "notThere", "()V").op(Opcode::Return);
            });
        });
        let found = violations_of(vec![
            helper(|_| {}),
            ClassDescriptor::parse(&other.to_bytes().unwrap()).unwrap(),
        ]);
        assert!(found.is_empty(), "{:?}", found);
    }

    #[test]
    fn test_error_handler_must_be_callable() {
        let mut config = WeavePackageConfig::new("trapped");
        config.error_handler = Some("lib/Client".into());
        let package = WeavePackage::new(config, Vec::new());
        let found = check(&package, &library()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::InvalidReference);
        assert_eq!(found[0].member.as_deref(), Some("onWeaverThrow(Ljava/lang/Throwable;)V"));
    }

    #[test]
    fn test_array_owners() {
        assert_eq!(element_class("[I"), None);
        assert_eq!(element_class("[[Llib/Client;"), Some("lib/Client"));
        assert_eq!(element_class("lib/Client"), Some("lib/Client"));
    }
}
