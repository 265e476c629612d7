//! Candidate and weave classes shared by the integration tests

use tapestry_classfile::access::{ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
use tapestry_classfile::{ClassBuilder, CodeBuilder, Opcode};
use tapestry_weaver::{ClassMarker, FieldMarker, MatchStrategy, WeavePackage, WeavePackageConfig};

pub const TARGET: &str = "t/Target";

/// `t/Target`: `count` starts at 3, `run()` returns `count + 4`,
/// `add(II)` returns the sum of its arguments
pub fn target(with_clinit: bool) -> ClassBuilder {
    let mut class = ClassBuilder::new(TARGET, "java/lang/Object");
    class.source_file("Target.java");
    class.field(ACC_PRIVATE, "count", "I");
    class.method(ACC_PUBLIC, "<init>", "()V", |m| {
        m.code(1, |c| {
            c.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")
                .aload(0)
                .iconst(3)
                .putfield(TARGET, "count", "I")
                .op(Opcode::Return);
        });
    });
    class.method(ACC_PUBLIC, "run", "()I", |m| {
        m.code(1, |c| {
            c.aload(0)
                .getfield(TARGET, "count", "I")
                .iconst(4)
                .op(Opcode::Iadd)
                .op(Opcode::Ireturn);
        });
    });
    class.method(ACC_PUBLIC, "add", "(II)I", |m| {
        m.code(3, |c| {
            c.iload(1).iload(2).op(Opcode::Iadd).op(Opcode::Ireturn);
        });
    });
    if with_clinit {
        class.field(ACC_PUBLIC | ACC_STATIC, "base", "I");
        class.method(ACC_STATIC, "<clinit>", "()V", |m| {
            m.code(0, |c| {
                c.iconst(1).putstatic(TARGET, "base", "I").op(Opcode::Return);
            });
        });
    }
    class
}

pub fn target_bytes() -> Vec<u8> {
    target(false).to_bytes().unwrap()
}

/// Weave class of `t/Target` named `name`
pub fn weave(name: &str, define: impl FnOnce(&mut ClassBuilder)) -> ClassBuilder {
    let mut class = ClassBuilder::new(name, "java/lang/Object");
    class.source_file("Weave.java");
    class.annotate(
        ClassMarker::Weave {
            strategy: MatchStrategy::ExactClass,
            original_name: Some(TARGET.to_string()),
        }
        .to_annotation(),
    );
    define(&mut class);
    class
}

pub fn new_field(class: &mut ClassBuilder, access: u16, name: &str, descriptor: &str) {
    class.field_with(access, name, descriptor, vec![FieldMarker::NewField.to_annotation()], None);
}

pub fn call_original<'c, 'p>(c: &'c mut CodeBuilder<'p>) -> &'c mut CodeBuilder<'p> {
    c.invokestatic("tapestry/api/Weaver", "callOriginal", "()Ljava/lang/Object;")
}

/// `this.field += 1` on an int field of `owner`
pub fn increment(c: &mut CodeBuilder<'_>, owner: &str, field: &str) {
    c.aload(0)
        .aload(0)
        .getfield(owner, field, "I")
        .iconst(1)
        .op(Opcode::Iadd)
        .putfield(owner, field, "I");
}

/// Weave counting `run()` calls in the new field `calls`
pub fn counting_run_weave(name: &str) -> ClassBuilder {
    let owner = name.to_string();
    weave(name, |class| {
        new_field(class, ACC_PRIVATE, "calls", "I");
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(1, |c| {
                increment(c, &owner, "calls");
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .op(Opcode::Ireturn);
            });
        });
    })
}

/// Weave counting `add(II)` calls in the new field `adds` and adding 100 to the result
pub fn counting_add_weave(name: &str) -> ClassBuilder {
    let owner = name.to_string();
    weave(name, |class| {
        new_field(class, ACC_PRIVATE, "adds", "I");
        class.method(ACC_PUBLIC, "add", "(II)I", |m| {
            m.code(3, |c| {
                increment(c, &owner, "adds");
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .iconst(100)
                    .op(Opcode::Iadd)
                    .op(Opcode::Ireturn);
            });
        });
    })
}

pub fn package(name: &str, priority: i32, classes: Vec<ClassBuilder>) -> WeavePackage {
    let mut config = WeavePackageConfig::new(name);
    config.priority = priority;
    package_with(config, classes)
}

pub fn package_with(config: WeavePackageConfig, classes: Vec<ClassBuilder>) -> WeavePackage {
    let files: Vec<(String, Vec<u8>)> = classes
        .into_iter()
        .enumerate()
        .map(|(i, class)| (format!("class-{}", i), class.to_bytes().unwrap()))
        .collect();
    WeavePackage::from_bytes(config, files.iter().map(|(path, bytes)| (path.clone(), bytes.as_slice()))).unwrap()
}
