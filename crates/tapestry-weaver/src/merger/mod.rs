//! Applying validated weaves to candidate classes
//!
//! The merger never decides applicability; it re-runs the matcher and
//! refuses anything with violations. What it does is structural surgery on
//! the candidate's class file:
//!
//! - `@NewField` fields are injected, or routed to a side table
//! - new weave methods are copied in
//! - matched methods get the weave body, with the original moved to a
//!   private synthetic method reached from the invoke-original site
//! - constructor and static initialiser code runs after the candidate's own

pub(crate) mod call_original;
mod constructor;
mod error_trap;
mod new_fields;
mod transplant;

use tapestry_classfile::access::ACC_STATIC;
use tapestry_classfile::attribute::names;
use tapestry_classfile::descriptor::rename_class_name;
use tapestry_classfile::{
    AccessFlags, Attribute, ClassFile, ClassReader, Frame, Insn, MemberInfo, MethodBody, MethodContext, MethodType,
    Opcode, VerificationType,
};
use tracing::{debug, warn};

use crate::classpath::ClassPath;
use crate::error::{MergeError, MergeResult};
use crate::matcher::{weave_target, ConstructorTarget, MatchAnalysis, MatchedMethod, Matcher};
use crate::model::ClassDescriptor;
use crate::scan::BodyScan;
use crate::violation::{Violation, ViolationKind};

use call_original::{Relocated, ResultShape};
use error_trap::TrapSite;
use new_fields::SideTableFields;
use transplant::{install_body, relocate_original, weave_body, Transplant};

pub use error_trap::{HANDLER_DESCRIPTOR, HANDLER_METHOD};
pub use new_fields::{side_table_key, NewFieldStorage};
pub use transplant::RELOCATED_PREFIX;

/// Merge settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    pub new_field_storage: NewFieldStorage,
    /// Class whose static `onWeaverThrow(Throwable)` receives exceptions
    /// thrown by weave code around invoke-original
    pub error_handler: Option<String>,
}

/// Applies weave classes to candidates
pub struct Merger<'a> {
    classpath: &'a dyn ClassPath,
    options: MergeOptions,
}

impl<'a> Merger<'a> {
    pub fn new(classpath: &'a dyn ClassPath) -> Self {
        Self::with_options(classpath, MergeOptions::default())
    }

    pub fn with_options(classpath: &'a dyn ClassPath, options: MergeOptions) -> Self {
        Self { classpath, options }
    }

    /// Merge `weave` into `candidate`
    ///
    /// Fails with [`MergeError::Precondition`] when the pair does not match
    /// cleanly; an empty violation list there means the weave does not
    /// target the candidate at all.
    pub fn merge(&self, weave: &ClassDescriptor, candidate: &ClassDescriptor) -> MergeResult<ClassDescriptor> {
        let Some((_, strategy)) = weave_target(weave) else {
            return Err(MergeError::Precondition(Vec::new()));
        };
        match Matcher::new(self.classpath).analyze(weave, candidate, strategy)? {
            Some(analysis) if analysis.violations.is_empty() => {
                apply(&analysis, weave, candidate.clone(), &self.options)
            }
            Some(analysis) => Err(MergeError::Precondition(analysis.violations)),
            None => Err(MergeError::Precondition(Vec::new())),
        }
    }
}

/// Apply an analysis without violations to `current`
pub(crate) fn apply(
    analysis: &MatchAnalysis,
    weave: &ClassDescriptor,
    current: ClassDescriptor,
    options: &MergeOptions,
) -> MergeResult<ClassDescriptor> {
    let class = current.into_class_file();
    let candidate = class.name()?.to_string();
    let mut merge = Apply {
        weave,
        analysis,
        options,
        transplant: Transplant::new(weave, &candidate),
        candidate,
        class,
        side_table: None,
    };

    merge.add_new_fields()?;
    merge.add_new_methods()?;
    for matched in analysis.matched_methods.iter().filter(|m| !m.is_declaration) {
        merge.weave_method(matched)?;
    }
    merge.weave_constructors()?;
    merge.weave_static_initializer()?;

    debug!(
        weave = %analysis.weave_name,
        strategy = ?analysis.strategy,
        candidate = %merge.candidate,
        methods = analysis.matched_methods.len(),
        new_methods = analysis.new_methods.len(),
        new_fields = analysis.new_fields.len(),
        "merged weave"
    );
    Ok(ClassDescriptor::from_class_file(merge.class)?)
}

struct Apply<'w> {
    weave: &'w ClassDescriptor,
    analysis: &'w MatchAnalysis,
    options: &'w MergeOptions,
    candidate: String,
    class: ClassFile,
    transplant: Transplant<'w>,
    side_table: Option<SideTableFields>,
}

impl Apply<'_> {
    /// Weave body moved into the candidate pool, with side-table fields rewritten
    fn import(&mut self, body: &MethodBody) -> MergeResult<MethodBody> {
        let mut body = self.transplant.import_body(body, &mut self.class.constant_pool)?;
        if let Some(side_table) = &self.side_table {
            side_table.rewrite(&mut body, &mut self.class.constant_pool)?;
        }
        Ok(body)
    }

    fn add_new_fields(&mut self) -> MergeResult<()> {
        let (weave, options) = (self.weave, self.options);
        let weave_pool = &weave.class_file().constant_pool;
        for &index in &self.analysis.new_fields.clone() {
            let field = &weave.fields[index];

            if let NewFieldStorage::SideTable { owner } = &options.new_field_storage {
                if !field.access.is_static() {
                    let side_table = self.side_table.get_or_insert_with(|| SideTableFields {
                        owner: owner.clone(),
                        candidate: self.candidate.clone(),
                        fields: Default::default(),
                    });
                    side_table
                        .fields
                        .insert(field.name.clone(), field.field_type.rename(&weave.name, &self.candidate));
                    continue;
                }
            }

            if self.class.find_field(&field.name).is_some() {
                return Err(MergeError::FieldCollision {
                    class: self.candidate.clone(),
                    name: field.name.clone(),
                });
            }

            let pool = &mut self.class.constant_pool;
            let mut attributes = Vec::new();
            if let Some(constant) = weave.class_file().fields[index].attribute(weave_pool, names::CONSTANT_VALUE) {
                let source = ClassReader::new(&constant.info).read_u16()?;
                let imported = self.transplant.import_constant(source, pool)?;
                attributes.push(Attribute::new(pool, names::CONSTANT_VALUE, imported.to_be_bytes().to_vec())?);
            }
            let descriptor = self.transplant.rename_descriptor(&field.descriptor);
            self.class.fields.push(MemberInfo {
                access: field.access,
                name_index: pool.utf8_index(&field.name)?,
                descriptor_index: pool.utf8_index(&descriptor)?,
                attributes,
            });
            debug!(candidate = %self.candidate, field = %field.name, "injected new field");
        }
        Ok(())
    }

    fn add_new_methods(&mut self) -> MergeResult<()> {
        let (weave, analysis) = (self.weave, self.analysis);
        for &index in &analysis.new_methods {
            let method = &weave.methods[index];
            let descriptor = self.transplant.rename_descriptor(&method.descriptor);
            if self.class.find_method(&method.name, &descriptor).is_some() {
                return Err(MergeError::MethodCollision {
                    class: self.candidate.clone(),
                    name: method.name.clone(),
                    descriptor,
                });
            }
            let body = self.import(&weave_body(weave, method)?)?;

            let pool = &mut self.class.constant_pool;
            let mut info = MemberInfo {
                access: method.access,
                name_index: pool.utf8_index(&method.name)?,
                descriptor_index: pool.utf8_index(&descriptor)?,
                attributes: Vec::new(),
            };
            if !method.throws.is_empty() {
                let throws: Vec<String> = method
                    .throws
                    .iter()
                    .map(|class| rename_class_name(class, &weave.name, &self.candidate))
                    .collect();
                let exceptions = transplant::exceptions_attribute(pool, &throws)?;
                info.attributes.push(Attribute::new(pool, names::EXCEPTIONS, exceptions)?);
            }
            self.class.methods.push(info);
            let index = self.class.methods.len() - 1;
            install_body(&mut self.class, index, body)?;
        }
        Ok(())
    }

    fn weave_method(&mut self, matched: &MatchedMethod) -> MergeResult<()> {
        let Some(index) = self.class.find_method(&matched.name, &matched.descriptor) else {
            debug!(candidate = %self.candidate, method = %matched.name, "inherited method left alone");
            return Ok(());
        };
        let access = self.class.methods[index].access;
        if access.is_abstract() || access.is_bridge() || access.is_native() {
            debug!(candidate = %self.candidate, method = %matched.name, "method has no body to weave");
            return Ok(());
        }

        let weave = self.weave;
        let method = &weave.methods[matched.weave_index];
        let mut body = self.import(&weave_body(weave, method)?)?;
        let scan = BodyScan::of(&body, &self.class.constant_pool)?;
        if let Some(&position) = scan.call_original.first() {
            let ret = MethodType::parse(&matched.descriptor)?.ret;
            let shape: ResultShape = call_original::classify(&body, &self.class.constant_pool, position, &ret)?
                .ok_or_else(|| {
                    MergeError::Precondition(vec![Violation::new(
                        ViolationKind::MethodCallOriginalIllegalReturnType,
                        &weave.name,
                    )
                    .candidate(&self.candidate)
                    .method(&method.name, &method.descriptor)])
                })?;
            let relocated = relocate_original(&mut self.class, index)?;
            let target = Relocated {
                owner: &self.candidate,
                name: &relocated,
                descriptor: &matched.descriptor,
                is_static: access.is_static(),
            };
            let call = call_original::replace(&mut body, &mut self.class.constant_pool, position, shape, target)?;
            debug!(candidate = %self.candidate, method = %matched.name, relocated = %relocated, "relocated original");

            if let Some(handler) = &self.options.error_handler {
                let site = TrapSite {
                    handler,
                    method: MethodContext {
                        owner: &self.candidate,
                        name: &matched.name,
                        descriptor: &matched.descriptor,
                        is_static: access.is_static(),
                    },
                    call,
                };
                if !error_trap::wrap(&mut body, &mut self.class.constant_pool, &site)? {
                    warn!(
                        candidate = %self.candidate,
                        method = %matched.name,
                        "invoke-original is not a statement of its own; weave code left untrapped"
                    );
                }
            }
        }
        install_body(&mut self.class, index, body)
    }

    /// Constructors of the candidate that call a superclass constructor
    fn initializing_constructors(&self) -> MergeResult<Vec<usize>> {
        let pool = &self.class.constant_pool;
        let mut found = Vec::new();
        for (index, method) in self.class.methods.iter().enumerate() {
            if method.name(pool)? != "<init>" {
                continue;
            }
            let Some(body) = self.class.method_body(index)? else { continue };
            let owner = constructor::super_call_owner(&body, pool)?;
            if owner.as_deref() != Some(self.candidate.as_str()) {
                found.push(index);
            }
        }
        Ok(found)
    }

    fn weave_constructors(&mut self) -> MergeResult<()> {
        let (weave, analysis) = (self.weave, self.analysis);
        let weave_pool = &weave.class_file().constant_pool;
        for plan in &analysis.constructors {
            let method = &weave.methods[plan.weave_index];
            let mut body = weave_body(weave, method)?;
            call_original::strip_field_initializers(
                &mut body,
                weave_pool,
                &weave.name,
                &analysis.matched_fields,
                Opcode::Putfield,
            )?;
            let tail = self.import(&constructor::constructor_tail(body, weave_pool)?)?;

            let targets: Vec<usize> = match &plan.target {
                ConstructorTarget::Exact(descriptor) => self.class.find_method("<init>", descriptor).into_iter().collect(),
                ConstructorTarget::All => self.initializing_constructors()?,
            };
            if targets.is_empty() {
                debug!(candidate = %self.candidate, constructor = %method.descriptor, "no constructor to extend");
            }
            for index in targets {
                let Some(mut target) = self.class.method_body(index)? else { continue };
                let descriptor = self.class.methods[index].descriptor(&self.class.constant_pool)?.to_string();
                let mut join = Frame::initial(&MethodContext {
                    owner: &self.candidate,
                    name: "<init>",
                    descriptor: &descriptor,
                    is_static: false,
                })?;
                if let Some(this) = join.locals.first_mut() {
                    *this = VerificationType::Object(self.candidate.clone());
                }
                constructor::append_at_returns(&mut target, tail.clone(), join);
                install_body(&mut self.class, index, target)?;
            }
        }
        Ok(())
    }

    fn weave_static_initializer(&mut self) -> MergeResult<()> {
        let Some(weave_index) = self.analysis.static_initializer else {
            return Ok(());
        };
        let weave = self.weave;
        let mut body = weave_body(weave, &weave.methods[weave_index])?;
        call_original::strip_field_initializers(
            &mut body,
            &weave.class_file().constant_pool,
            &weave.name,
            &self.analysis.matched_fields,
            Opcode::Putstatic,
        )?;
        if body.instructions().all(|(_, insn)| *insn == Insn::Simple(Opcode::Return)) {
            return Ok(());
        }
        let body = self.import(&body)?;

        match self.class.find_method("<clinit>", "()V") {
            Some(index) => {
                let Some(mut target) = self.class.method_body(index)? else {
                    return Ok(());
                };
                constructor::append_at_returns(&mut target, body, Frame::default());
                install_body(&mut self.class, index, target)
            }
            None => {
                let pool = &mut self.class.constant_pool;
                let info = MemberInfo {
                    access: AccessFlags(ACC_STATIC),
                    name_index: pool.utf8_index("<clinit>")?,
                    descriptor_index: pool.utf8_index("()V")?,
                    attributes: Vec::new(),
                };
                self.class.methods.push(info);
                let index = self.class.methods.len() - 1;
                install_body(&mut self.class, index, body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::MemoryClassPath;
    use tapestry_classfile::access::{ACC_PRIVATE, ACC_PUBLIC};
    use tapestry_classfile::{Annotation, ClassBuilder, ElementValue};

    fn weave_annotation() -> Annotation {
        Annotation::marker("Ltapestry/api/Weave;").with("originalName", ElementValue::String("t/Target".into()))
    }

    fn target() -> ClassDescriptor {
        let mut class = ClassBuilder::new("t/Target", "java/lang/Object");
        class.method(ACC_PUBLIC, "<init>", "()V", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .op(Opcode::Return);
            });
        });
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(1, |c| {
                c.iconst(7).op(Opcode::Ireturn);
            });
        });
        ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap()
    }

    fn counting_weave() -> ClassDescriptor {
        let mut class = ClassBuilder::new("w/TargetWeave", "java/lang/Object");
        class.annotate(weave_annotation());
        class.field_with(
            ACC_PRIVATE,
            "calls",
            "I",
            vec![Annotation::marker("Ltapestry/api/NewField;")],
            None,
        );
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .aload(0)
                    .getfield("w/TargetWeave", "calls", "I")
                    .iconst(1)
                    .op(Opcode::Iadd)
                    .putfield("w/TargetWeave", "calls", "I")
                    .invokestatic("tapestry/api/Weaver", "callOriginal", "()Ljava/lang/Object;")
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .op(Opcode::Ireturn);
            });
        });
        ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_merge_relocates_original() {
        let classpath = MemoryClassPath::new();
        let merged = Merger::new(&classpath).merge(&counting_weave(), &target()).unwrap();

        assert!(merged.field("calls").is_some());
        let relocated = merged.method("weave$original$run$0", "()I").unwrap();
        assert!(relocated.access.is_private());
        assert!(relocated.access.is_synthetic());

        let run = merged.method("run", "()I").unwrap();
        let body = merged.body(run).unwrap().unwrap();
        let scan = BodyScan::of(&body, &merged.class_file().constant_pool).unwrap();
        assert!(scan.call_original.is_empty());
        assert!(scan
            .invocations
            .iter()
            .any(|call| call.owner == "t/Target" && call.name == "weave$original$run$0"));
        assert!(scan.field_accesses.iter().all(|access| access.owner == "t/Target"));
    }

    #[test]
    fn test_side_table_keeps_candidate_shape() {
        let classpath = MemoryClassPath::new();
        let options = MergeOptions {
            new_field_storage: NewFieldStorage::SideTable {
                owner: "host/Fields".into(),
            },
            ..MergeOptions::default()
        };
        let merged = Merger::with_options(&classpath, options)
            .merge(&counting_weave(), &target())
            .unwrap();
        assert!(merged.field("calls").is_none());

        let run = merged.method("run", "()I").unwrap();
        let body = merged.body(run).unwrap().unwrap();
        let scan = BodyScan::of(&body, &merged.class_file().constant_pool).unwrap();
        assert!(scan.field_accesses.is_empty());
        let store_calls: Vec<&str> = scan
            .invocations
            .iter()
            .filter(|call| call.owner == "host/Fields")
            .map(|call| call.name.as_str())
            .collect();
        assert_eq!(store_calls, vec!["getInt", "putInt"]);
    }

    #[test]
    fn test_violations_block_merge() {
        let classpath = MemoryClassPath::new();
        let mut class = ClassBuilder::new("w/TargetWeave", "java/lang/Object");
        class.annotate(weave_annotation());
        class.method(ACC_PUBLIC, "run", "()J", |m| {
            m.code(1, |c| {
                c.ldc_long(1).op(Opcode::Lreturn);
            });
        });
        let weave = ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap();
        match Merger::new(&classpath).merge(&weave, &target()) {
            Err(MergeError::Precondition(violations)) => {
                assert!(!violations.is_empty());
            }
            other => panic!("expected precondition failure, got {:?}", other.map(|c| c.name)),
        }
    }

    #[test]
    fn test_constructor_code_appended() {
        let classpath = MemoryClassPath::new();
        let mut class = ClassBuilder::new("w/TargetWeave", "java/lang/Object");
        class.annotate(weave_annotation());
        class.field_with(
            ACC_PRIVATE,
            "created",
            "Z",
            vec![Annotation::marker("Ltapestry/api/NewField;")],
            None,
        );
        class.method(ACC_PUBLIC, "<init>", "()V", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .aload(0)
                    .iconst(1)
                    .putfield("w/TargetWeave", "created", "Z")
                    .op(Opcode::Return);
            });
        });
        let weave = ClassDescriptor::parse(&class.to_bytes().unwrap()).unwrap();
        let merged = Merger::new(&classpath).merge(&weave, &target()).unwrap();

        let init = merged.method("<init>", "()V").unwrap();
        let body = merged.body(init).unwrap().unwrap();
        let pool = &merged.class_file().constant_pool;
        let scan = BodyScan::of(&body, pool).unwrap();
        let supers = scan.invocations.iter().filter(|call| call.name == "<init>").count();
        assert_eq!(supers, 1);
        assert_eq!(scan.field_accesses.len(), 1);
        assert_eq!(scan.field_accesses[0].owner, "t/Target");
    }
}
