//! End-to-end weaving: packages go through the engine and the woven
//! classes are executed by a small interpreter

mod support;

use support::fixtures::*;
use support::jvm::{Jvm, Value};
use tapestry_classfile::access::{ACC_ABSTRACT, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC, ACC_SUPER};
use tapestry_classfile::{ClassBuilder, Opcode, ValueKind};
use tapestry_weaver::{
    ClassDescriptor, ClassMarker, FailureReason, FieldStorageKind, LoadContext, MatchStrategy, MemoryClassPath,
    PackageOutcome, ScalaKind, ViolationKind, WeaveEngine, WeaveOutcome, WeavePackage, WeavePackageConfig,
};

fn weave_with(engine: &WeaveEngine, bytes: &[u8], classpath: &MemoryClassPath) -> WeaveOutcome {
    engine.weave(bytes, classpath, &LoadContext::new("app"))
}

fn woven(engine: &WeaveEngine, bytes: &[u8]) -> Vec<u8> {
    match weave_with(engine, bytes, &MemoryClassPath::new()) {
        WeaveOutcome::Woven { bytes, .. } => bytes,
        other => panic!("expected a woven class, got {:?}", other.report()),
    }
}

fn engine(packages: Vec<WeavePackage>) -> WeaveEngine {
    WeaveEngine::new(packages)
}

#[test]
fn test_new_field_counts_calls_around_original() {
    let engine = engine(vec![package("counting", 0, vec![counting_run_weave("w/RunWeave")])]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);

    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(jvm.field(&target, "calls"), Some(Value::Int(1)));
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(jvm.field(&target, "calls"), Some(Value::Int(2)));
}

#[test]
fn test_woven_class_keeps_name_and_gains_field() {
    let engine = engine(vec![package("counting", 0, vec![counting_run_weave("w/RunWeave")])]);
    let class = ClassDescriptor::parse(&woven(&engine, &target_bytes())).unwrap();

    assert_eq!(class.name, TARGET);
    assert!(class.field("calls").is_some());
    assert!(class.field("count").is_some());
    assert!(class.method("run", "()I").is_some());
    assert!(class.method("add", "(II)I").is_some());
}

#[test]
fn test_arguments_reach_original() {
    let engine = engine(vec![package("adding", 0, vec![counting_add_weave("w/AddWeave")])]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);

    assert_eq!(
        jvm.call(&target, "add", "(II)I", vec![Value::Int(2), Value::Int(3)]),
        Some(Value::Int(105))
    );
    assert_eq!(jvm.field(&target, "adds"), Some(Value::Int(1)));
    // untouched methods behave as before
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
}

#[test]
fn test_package_order_independent_of_submission() {
    let forward = engine(vec![
        package("runs", 1, vec![counting_run_weave("w/RunWeave")]),
        package("adds", 2, vec![counting_add_weave("w/AddWeave")]),
    ]);
    let backward = engine(vec![
        package("adds", 2, vec![counting_add_weave("w/AddWeave")]),
        package("runs", 1, vec![counting_run_weave("w/RunWeave")]),
    ]);

    let first = woven(&forward, &target_bytes());
    let second = woven(&backward, &target_bytes());
    assert_eq!(first, second);

    let mut jvm = Jvm::new();
    jvm.load(&first);
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(
        jvm.call(&target, "add", "(II)I", vec![Value::Int(1), Value::Int(1)]),
        Some(Value::Int(102))
    );
    assert_eq!(jvm.field(&target, "calls"), Some(Value::Int(1)));
    assert_eq!(jvm.field(&target, "adds"), Some(Value::Int(1)));
}

#[test]
fn test_report_lists_applied_weaves() {
    let engine = engine(vec![
        package("runs", 1, vec![counting_run_weave("w/RunWeave")]),
        package("adds", 2, vec![counting_add_weave("w/AddWeave")]),
    ]);
    let outcome = weave_with(&engine, &target_bytes(), &MemoryClassPath::new());
    assert!(outcome.is_woven());

    let report = outcome.report().unwrap();
    assert_eq!(report.candidate, TARGET);
    assert_eq!(report.applied(), vec!["w/RunWeave", "w/AddWeave"]);
    assert!(report.failures.is_empty());
}

#[test]
fn test_conflicting_weaves_reject_candidate() {
    let engine = engine(vec![
        package("first", 0, vec![counting_run_weave("w/First")]),
        package("second", 0, vec![counting_run_weave("w/Second")]),
    ]);
    let original = target_bytes();
    let outcome = weave_with(&engine, &original, &MemoryClassPath::new());

    let WeaveOutcome::Rejected { bytes, report } = outcome else {
        panic!("conflicting weaves must reject the candidate");
    };
    assert_eq!(bytes, original);
    let conflict = report
        .violations()
        .find(|violation| violation.kind == ViolationKind::MethodConflict)
        .expect("method conflict reported");
    assert_eq!(conflict.weave_class, "w/Second");
}

#[test]
fn test_violations_leave_candidate_untouched() {
    let broken = weave("w/Broken", |class| {
        class.method(ACC_PUBLIC, "run", "()J", |m| {
            m.code(1, |c| {
                c.op(Opcode::Lconst0).op(Opcode::Lreturn);
            });
        });
    });
    let engine = engine(vec![package("broken", 0, vec![broken])]);
    let original = target_bytes();
    let outcome = weave_with(&engine, &original, &MemoryClassPath::new());

    let WeaveOutcome::Rejected { bytes, report } = outcome else {
        panic!("violating weave must reject the candidate");
    };
    assert_eq!(bytes, original);
    assert_eq!(report.package("broken"), Some(&PackageOutcome::Failed));
    assert_eq!(report.failures.len(), 1);
    let FailureReason::Violations { violations } = &report.failures[0].reason else {
        panic!("expected violations, got {:?}", report.failures[0].reason);
    };
    assert!(violations
        .iter()
        .any(|violation| violation.kind == ViolationKind::MethodReturntypeMismatch));
}

#[test]
fn test_guard_class_skips_package() {
    let mut config = WeavePackageConfig::new("guarded");
    config.skip_if_present.push("lib/Replacement".into());
    let engine = engine(vec![package_with(config, vec![counting_run_weave("w/RunWeave")])]);

    let mut classpath = MemoryClassPath::new();
    classpath
        .add_bytes(&ClassBuilder::new("lib/Replacement", "java/lang/Object").to_bytes().unwrap())
        .unwrap();
    let outcome = weave_with(&engine, &target_bytes(), &classpath);

    let WeaveOutcome::Unchanged { report } = outcome else {
        panic!("guarded package must not weave");
    };
    assert_eq!(
        report.package("guarded"),
        Some(&PackageOutcome::Skipped {
            guard: "lib/Replacement".into()
        })
    );

    // without the guard class the same package applies
    assert!(weave_with(&engine, &target_bytes(), &MemoryClassPath::new()).is_woven());
}

#[test]
fn test_unrelated_candidate_unchanged() {
    let engine = engine(vec![package("counting", 0, vec![counting_run_weave("w/RunWeave")])]);
    let other = ClassBuilder::new("t/Other", "java/lang/Object").to_bytes().unwrap();

    let WeaveOutcome::Unchanged { report } = weave_with(&engine, &other, &MemoryClassPath::new()) else {
        panic!("no weave targets t/Other");
    };
    assert_eq!(report.package("counting"), Some(&PackageOutcome::NotApplicable));
}

#[test]
fn test_constructor_code_runs_after_original() {
    let owner = "w/Created";
    let created = weave(owner, |class| {
        new_field(class, ACC_PRIVATE, "created", "I");
        class.method(ACC_PUBLIC, "<init>", "()V", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .aload(0)
                    .iconst(11)
                    .putfield(owner, "created", "I")
                    .op(Opcode::Return);
            });
        });
    });
    let engine = engine(vec![package("ctor", 0, vec![created])]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.field(&target, "count"), Some(Value::Int(3)));
    assert_eq!(jvm.field(&target, "created"), Some(Value::Int(11)));
}

fn loading_weave() -> ClassBuilder {
    let owner = "w/Loading";
    weave(owner, |class| {
        new_field(class, ACC_PUBLIC | ACC_STATIC, "loaded", "I");
        class.method(ACC_STATIC, "<clinit>", "()V", |m| {
            m.code(0, |c| {
                c.iconst(42).putstatic(owner, "loaded", "I").op(Opcode::Return);
            });
        });
    })
}

#[test]
fn test_static_initializer_added() {
    let engine = engine(vec![package("loading", 0, vec![loading_weave()])]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    assert_eq!(jvm.static_field(TARGET, "loaded"), Some(Value::Int(42)));
}

#[test]
fn test_static_initializer_appended_to_existing() {
    let engine = engine(vec![package("loading", 0, vec![loading_weave()])]);
    let bytes = woven(&engine, &target(true).to_bytes().unwrap());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    assert_eq!(jvm.static_field(TARGET, "base"), Some(Value::Int(1)));
    assert_eq!(jvm.static_field(TARGET, "loaded"), Some(Value::Int(42)));
}

#[test]
fn test_private_helper_added_and_called() {
    let owner = "w/Helped";
    let helped = weave(owner, |class| {
        new_field(class, ACC_PRIVATE, "calls", "I");
        class.method(ACC_PRIVATE, "bump", "()V", |m| {
            m.code(1, |c| {
                increment(c, owner, "calls");
                c.op(Opcode::Return);
            });
        });
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(1, |c| {
                c.aload(0).invokespecial(owner, "bump", "()V");
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .op(Opcode::Ireturn);
            });
        });
    });
    let engine = engine(vec![package("helped", 0, vec![helped])]);
    let bytes = woven(&engine, &target_bytes());
    let class = ClassDescriptor::parse(&bytes).unwrap();
    assert!(class.method("bump", "()V").is_some_and(|m| m.access.is_private()));

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(jvm.field(&target, "calls"), Some(Value::Int(1)));
}

const BASE: &str = "a/Base";
const IMPL: &str = "a/Impl";

/// `a/Base` as an abstract class or an interface declaring `handle()I`,
/// and `a/Impl` whose `handle()` returns 5
fn handler_library(interface: bool) -> (Vec<u8>, Vec<u8>) {
    let mut base = ClassBuilder::new(BASE, "java/lang/Object");
    if interface {
        base.access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT);
    } else {
        base.access(ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT);
        base.method(ACC_PUBLIC, "<init>", "()V", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .op(Opcode::Return);
            });
        });
    }
    base.method(ACC_PUBLIC | ACC_ABSTRACT, "handle", "()I", |_| {});

    let parent = if interface { "java/lang/Object" } else { BASE };
    let mut implementation = ClassBuilder::new(IMPL, parent);
    if interface {
        implementation.interface(BASE);
    }
    implementation.method(ACC_PUBLIC, "<init>", "()V", |m| {
        m.code(1, |c| {
            c.aload(0).invokespecial(parent, "<init>", "()V").op(Opcode::Return);
        });
    });
    implementation.method(ACC_PUBLIC, "handle", "()I", |m| {
        m.code(1, |c| {
            c.iconst(5).op(Opcode::Ireturn);
        });
    });
    (base.to_bytes().unwrap(), implementation.to_bytes().unwrap())
}

/// Weave of `a/Base` counting `handle()` calls in the new field `calls`
fn counting_handle_weave(strategy: MatchStrategy) -> ClassBuilder {
    let owner = "w/HandleWeave";
    let mut class = ClassBuilder::new(owner, "java/lang/Object");
    class.annotate(
        ClassMarker::Weave {
            strategy,
            original_name: Some(BASE.to_string()),
        }
        .to_annotation(),
    );
    new_field(&mut class, ACC_PRIVATE, "calls", "I");
    class.method(ACC_PUBLIC, "handle", "()I", |m| {
        m.code(1, |c| {
            increment(c, owner, "calls");
            call_original(c)
                .checkcast("java/lang/Integer")
                .invokevirtual("java/lang/Integer", "intValue", "()I")
                .op(Opcode::Ireturn);
        });
    });
    class
}

fn assert_handle_counted(strategy: MatchStrategy, interface: bool) {
    let (base, implementation) = handler_library(interface);
    let mut classpath = MemoryClassPath::new();
    classpath.add_bytes(&base).unwrap();
    let engine = engine(vec![package("handlers", 0, vec![counting_handle_weave(strategy)])]);

    let bytes = match weave_with(&engine, &implementation, &classpath) {
        WeaveOutcome::Woven { bytes, .. } => bytes,
        other => panic!("expected a woven class, got {:?}", other.report()),
    };

    let mut jvm = Jvm::new();
    jvm.load(&base);
    jvm.load(&bytes);
    let handler = jvm.instantiate(IMPL, "()V", vec![]);
    assert_eq!(jvm.call(&handler, "handle", "()I", vec![]), Some(Value::Int(5)));
    assert_eq!(jvm.field(&handler, "calls"), Some(Value::Int(1)));
}

#[test]
fn test_base_class_weave_reaches_implementation() {
    assert_handle_counted(MatchStrategy::BaseClass, false);
}

#[test]
fn test_interface_weave_reaches_implementation() {
    assert_handle_counted(MatchStrategy::Interface, true);
}

/// Weave whose constructor and static initializer each set one new field
fn stamping_weave(owner: &str, field: &str, value: i32) -> ClassBuilder {
    let statics = format!("{field}Loaded");
    weave(owner, |class| {
        new_field(class, ACC_PRIVATE, field, "I");
        new_field(class, ACC_PUBLIC | ACC_STATIC, &statics, "I");
        class.method(ACC_PUBLIC, "<init>", "()V", |m| {
            m.code(1, |c| {
                c.aload(0)
                    .invokespecial("java/lang/Object", "<init>", "()V")
                    .aload(0)
                    .iconst(value)
                    .putfield(owner, field, "I")
                    .op(Opcode::Return);
            });
        });
        class.method(ACC_STATIC, "<clinit>", "()V", |m| {
            m.code(0, |c| {
                c.iconst(value).putstatic(owner, &statics, "I").op(Opcode::Return);
            });
        });
    })
}

#[test]
fn test_constructor_and_initializer_weaves_compose() {
    let engine = engine(vec![
        package("first", 0, vec![stamping_weave("w/First", "first", 1)]),
        package("second", 0, vec![stamping_weave("w/Second", "second", 2)]),
    ]);
    let outcome = weave_with(&engine, &target(true).to_bytes().unwrap(), &MemoryClassPath::new());
    let WeaveOutcome::Woven { bytes, report } = outcome else {
        panic!("constructor weaves never conflict, got {:?}", outcome.report());
    };
    assert_eq!(report.applied(), vec!["w/First", "w/Second"]);

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    assert_eq!(jvm.static_field(TARGET, "base"), Some(Value::Int(1)));
    assert_eq!(jvm.static_field(TARGET, "firstLoaded"), Some(Value::Int(1)));
    assert_eq!(jvm.static_field(TARGET, "secondLoaded"), Some(Value::Int(2)));
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.field(&target, "count"), Some(Value::Int(3)));
    assert_eq!(jvm.field(&target, "first"), Some(Value::Int(1)));
    assert_eq!(jvm.field(&target, "second"), Some(Value::Int(2)));
}

#[test]
fn test_side_table_storage_keeps_class_shape() {
    let mut config = WeavePackageConfig::new("external");
    config.new_field_storage = FieldStorageKind::SideTable;
    config.side_table_owner = Some("host/Fields".into());
    let engine = engine(vec![package_with(config, vec![counting_run_weave("w/RunWeave")])]);
    let bytes = woven(&engine, &target_bytes());

    let class = ClassDescriptor::parse(&bytes).unwrap();
    assert!(class.field("calls").is_none());

    let mut jvm = Jvm::new();
    jvm.bind_store("host/Fields");
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));

    let handle = jvm.handle(&target);
    assert_eq!(jvm.side_table.get(handle, "t/Target.calls"), Some(Value::Int(2)));
    assert_eq!(jvm.field(&target, "calls"), None);

    // evicting the object's entries resets the count
    assert_eq!(jvm.side_table.evict(handle), 1);
    jvm.call(&target, "run", "()I", vec![]);
    assert_eq!(jvm.side_table.get(handle, "t/Target.calls"), Some(Value::Int(1)));
}

#[test]
fn test_scala_object_weave() {
    let mut registry = ClassBuilder::new("app/Registry$", "java/lang/Object");
    registry.source_file("Registry.scala");
    registry.method(ACC_PUBLIC, "<init>", "()V", |m| {
        m.code(1, |c| {
            c.aload(0)
                .invokespecial("java/lang/Object", "<init>", "()V")
                .op(Opcode::Return);
        });
    });
    registry.method(ACC_PUBLIC, "size", "()I", |m| {
        m.code(1, |c| {
            c.iconst(2).op(Opcode::Ireturn);
        });
    });

    let mut weave = ClassBuilder::new("w/Registry$", "java/lang/Object");
    weave.source_file("Weaves.scala");
    weave.annotate(
        ClassMarker::ScalaWeave {
            kind: ScalaKind::Object,
            original_name: Some("app/Registry".into()),
        }
        .to_annotation(),
    );
    weave.method(ACC_PUBLIC, "size", "()I", |m| {
        m.code(1, |c| {
            call_original(c)
                .checkcast("java/lang/Integer")
                .invokevirtual("java/lang/Integer", "intValue", "()I")
                .iconst(1)
                .op(Opcode::Iadd)
                .op(Opcode::Ireturn);
        });
    });

    let engine = engine(vec![package("scala", 0, vec![weave])]);
    let bytes = woven(&engine, &registry.to_bytes().unwrap());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let object = jvm.instantiate("app/Registry$", "()V", vec![]);
    assert_eq!(jvm.call(&object, "size", "()I", vec![]), Some(Value::Int(3)));
}

#[test]
fn test_descriptor_round_trip_preserves_bytes() {
    for bytes in [target_bytes(), target(true).to_bytes().unwrap()] {
        let class = ClassDescriptor::parse(&bytes).unwrap();
        assert_eq!(class.to_bytes(), bytes);
    }
}

const ERROR_TRAP: &str = "h/ErrorTrap";

/// Handler remembering the last exception it was given
fn error_trap_bytes() -> Vec<u8> {
    let mut class = ClassBuilder::new(ERROR_TRAP, "java/lang/Object");
    class.field(ACC_PUBLIC | ACC_STATIC, "last", "Ljava/lang/Throwable;");
    class.method(ACC_PUBLIC | ACC_STATIC, "onWeaverThrow", "(Ljava/lang/Throwable;)V", |m| {
        m.code(1, |c| {
            c.aload(0)
                .putstatic(ERROR_TRAP, "last", "Ljava/lang/Throwable;")
                .op(Opcode::Return);
        });
    });
    class.to_bytes().unwrap()
}

fn trapping_package(weave: ClassBuilder) -> WeavePackage {
    let mut config = WeavePackageConfig::new("trapped");
    config.error_handler = Some(ERROR_TRAP.into());
    package_with(config, vec![weave])
}

/// Weave on `run()` whose code after invoke-original divides by `calls - 1`
fn failing_after_original() -> ClassBuilder {
    let owner = "w/Failing";
    weave(owner, |class| {
        new_field(class, ACC_PRIVATE, "calls", "I");
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(2, |c| {
                increment(c, owner, "calls");
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .store(ValueKind::Int, 1)
                    .iload(1)
                    .aload(0)
                    .getfield(owner, "calls", "I")
                    .iconst(1)
                    .op(Opcode::Isub)
                    .op(Opcode::Idiv)
                    .op(Opcode::Ireturn);
            });
        });
    })
}

#[test]
fn test_error_trap_returns_original_result() {
    let engine = engine(vec![trapping_package(failing_after_original())]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    jvm.load(&error_trap_bytes());
    let target = jvm.instantiate(TARGET, "()V", vec![]);

    // calls == 1, so the weave divides by zero after the original ran
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    let trapped = jvm.static_field(ERROR_TRAP, "last").unwrap();
    assert_eq!(jvm.class_name(&trapped), "java/lang/ArithmeticException");

    // calls == 2: the weave's own result comes back again
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert_eq!(jvm.field(&target, "calls"), Some(Value::Int(2)));
}

#[test]
fn test_without_error_handler_exception_escapes() {
    let engine = engine(vec![package("untrapped", 0, vec![failing_after_original()])]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    let thrown = jvm.try_call(&target, "run", "()I", vec![]).unwrap_err();
    assert_eq!(jvm.class_name(&thrown), "java/lang/ArithmeticException");
}

#[test]
fn test_error_trap_before_original_still_runs_it() {
    let failing = weave("w/FailingEarly", |class| {
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(1, |c| {
                c.iconst(1).iconst(0).op(Opcode::Idiv).op(Opcode::Pop);
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .iconst(100)
                    .op(Opcode::Iadd)
                    .op(Opcode::Ireturn);
            });
        });
    });
    let engine = engine(vec![trapping_package(failing)]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    jvm.load(&error_trap_bytes());
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    assert_eq!(jvm.call(&target, "run", "()I", vec![]), Some(Value::Int(7)));
    assert!(jvm.static_field(ERROR_TRAP, "last").is_some_and(|value| value != Value::Null));
}

#[test]
fn test_error_trap_rethrows_explicit_throw() {
    let throwing = weave("w/Throwing", |class| {
        class.method(ACC_PUBLIC, "run", "()I", |m| {
            m.code(2, |c| {
                call_original(c)
                    .checkcast("java/lang/Integer")
                    .invokevirtual("java/lang/Integer", "intValue", "()I")
                    .store(ValueKind::Int, 1)
                    .new_instance("java/lang/IllegalStateException")
                    .op(Opcode::Dup)
                    .invokespecial("java/lang/IllegalStateException", "<init>", "()V")
                    .op(Opcode::Athrow);
            });
        });
    });
    let engine = engine(vec![trapping_package(throwing)]);
    let bytes = woven(&engine, &target_bytes());

    let mut jvm = Jvm::new();
    jvm.load(&bytes);
    jvm.load(&error_trap_bytes());
    let target = jvm.instantiate(TARGET, "()V", vec![]);
    let thrown = jvm.try_call(&target, "run", "()I", vec![]).unwrap_err();
    assert_eq!(jvm.class_name(&thrown), "java/lang/IllegalStateException");
    assert_eq!(jvm.static_field(ERROR_TRAP, "last"), Some(Value::Null));
}
