//! Interpreter for the slice of the JVM instruction set the fixtures use
//!
//! Enough to run woven classes end to end: ints and longs, objects with
//! fields, statics with lazy `<clinit>`, the four invocation kinds, plain
//! branches, exception handlers and `Integer` boxing. A host store class can be bound to an
//! [`IdentityTable`] so side-table fields are observable from the test.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tapestry_classfile::{Constant, Insn, Label, MethodType, Opcode, ReturnType};
use tapestry_weaver::{ClassDescriptor, IdentityHandle, IdentityTable};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Str(String),
    Ref(usize),
    Null,
    /// Second slot of a long local, or a local never written
    Top,
}

impl Value {
    pub fn int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected int, found {:?}", other),
        }
    }

    fn default_for(descriptor: &str) -> Value {
        match descriptor.as_bytes().first() {
            Some(b'I' | b'Z' | b'B' | b'C' | b'S') => Value::Int(0),
            Some(b'J') => Value::Long(0),
            _ => Value::Null,
        }
    }
}

#[derive(Debug)]
struct Object {
    class: String,
    fields: HashMap<String, Value>,
}

pub struct Jvm {
    classes: HashMap<String, Rc<ClassDescriptor>>,
    heap: Vec<Object>,
    statics: HashMap<(String, String), Value>,
    initialized: HashSet<String>,
    store_class: Option<String>,
    pub side_table: IdentityTable<Value>,
    handles: HashMap<usize, IdentityHandle>,
}

impl Jvm {
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            heap: Vec::new(),
            statics: HashMap::new(),
            initialized: HashSet::new(),
            store_class: None,
            side_table: IdentityTable::new(),
            handles: HashMap::new(),
        }
    }

    /// Route `get*`/`put*` calls on `owner` to [`Jvm::side_table`]
    pub fn bind_store(&mut self, owner: &str) {
        self.store_class = Some(owner.to_string());
    }

    pub fn load(&mut self, bytes: &[u8]) {
        let class = ClassDescriptor::parse(bytes).expect("loadable class");
        self.classes.insert(class.name.clone(), Rc::new(class));
    }

    /// `new class; invokespecial <init>`
    pub fn instantiate(&mut self, class: &str, descriptor: &str, args: Vec<Value>) -> Value {
        self.initialize(class);
        let object = self.allocate(class);
        let mut all = vec![object.clone()];
        all.extend(args);
        let result = self.invoke(Opcode::Invokespecial, class, "<init>", descriptor, all);
        self.uncaught(result);
        object
    }

    /// Virtual call on `receiver`
    pub fn call(&mut self, receiver: &Value, name: &str, descriptor: &str, args: Vec<Value>) -> Option<Value> {
        let result = self.try_call(receiver, name, descriptor, args);
        self.uncaught(result)
    }

    /// Virtual call on `receiver`, with the thrown object as the error
    pub fn try_call(
        &mut self,
        receiver: &Value,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Value> {
        let class = self.class_of(receiver);
        let mut all = vec![receiver.clone()];
        all.extend(args);
        self.invoke(Opcode::Invokevirtual, &class, name, descriptor, all)
    }

    pub fn call_static(&mut self, class: &str, name: &str, descriptor: &str, args: Vec<Value>) -> Option<Value> {
        let result = self.invoke(Opcode::Invokestatic, class, name, descriptor, args);
        self.uncaught(result)
    }

    /// Class name of a heap object
    pub fn class_name(&self, object: &Value) -> String {
        self.class_of(object)
    }

    fn uncaught(&self, result: Result<Option<Value>, Value>) -> Option<Value> {
        result.unwrap_or_else(|thrown| panic!("uncaught {}", self.class_of(&thrown)))
    }

    pub fn field(&self, object: &Value, name: &str) -> Option<Value> {
        match object {
            Value::Ref(index) => self.heap[*index].fields.get(name).cloned(),
            other => panic!("not an object: {:?}", other),
        }
    }

    pub fn static_field(&mut self, class: &str, name: &str) -> Option<Value> {
        self.initialize(class);
        self.statics.get(&(class.to_string(), name.to_string())).cloned()
    }

    /// Side-table identity of a heap object
    pub fn handle(&mut self, object: &Value) -> IdentityHandle {
        let Value::Ref(index) = object else {
            panic!("not an object: {:?}", object);
        };
        if let Some(handle) = self.handles.get(index) {
            return *handle;
        }
        let handle = self.side_table.allocate();
        self.handles.insert(*index, handle);
        handle
    }

    fn allocate(&mut self, class: &str) -> Value {
        self.heap.push(Object {
            class: class.to_string(),
            fields: HashMap::new(),
        });
        Value::Ref(self.heap.len() - 1)
    }

    fn class_of(&self, object: &Value) -> String {
        match object {
            Value::Ref(index) => self.heap[*index].class.clone(),
            other => panic!("not an object: {:?}", other),
        }
    }

    fn initialize(&mut self, class: &str) {
        if !self.classes.contains_key(class) || !self.initialized.insert(class.to_string()) {
            return;
        }
        if self.classes[class].method("<clinit>", "()V").is_some() {
            let result = self.execute(class, "<clinit>", "()V", Vec::new());
            self.uncaught(result);
        }
    }

    /// Class declaring `name descriptor`, searching from `class` upwards
    fn resolve(&self, class: &str, name: &str, descriptor: &str) -> String {
        let mut current = Some(class.to_string());
        while let Some(name_of) = current {
            let Some(loaded) = self.classes.get(&name_of) else { break };
            if loaded.method(name, descriptor).is_some() {
                return name_of;
            }
            current = loaded.super_name.clone();
        }
        panic!("no method {}.{}{}", class, name, descriptor);
    }

    /// Whether an object of `class` is caught by a handler for `catch_type`
    fn is_instance(&self, class: &str, catch_type: &str) -> bool {
        if catch_type == "java/lang/Throwable" {
            return true;
        }
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if name == catch_type {
                return true;
            }
            current = self.classes.get(&name).and_then(|loaded| loaded.super_name.clone());
        }
        false
    }

    fn native(&mut self, owner: &str, name: &str, descriptor: &str, args: &[Value]) -> Option<Option<Value>> {
        match (owner, name, descriptor) {
            (_, "<init>", "()V") if owner.starts_with("java/lang/") && !self.classes.contains_key(owner) => {
                return Some(None)
            }
            ("java/lang/Integer", "valueOf", "(I)Ljava/lang/Integer;") => {
                let boxed = self.allocate("java/lang/Integer");
                if let Value::Ref(index) = &boxed {
                    self.heap[*index].fields.insert("value".into(), args[0].clone());
                }
                return Some(Some(boxed));
            }
            ("java/lang/Integer", "intValue", "()I") => return Some(self.field(&args[0], "value")),
            _ => {}
        }
        if self.store_class.as_deref() != Some(owner) {
            return None;
        }
        let handle = self.handle(&args[0]);
        let Some(Value::Str(key)) = args.last() else {
            panic!("store call without a key: {:?}", args);
        };
        if name.starts_with("get") {
            let ret = &descriptor[descriptor.find(')').map_or(0, |end| end + 1)..];
            let value = self.side_table.get(handle, key).unwrap_or_else(|| Value::default_for(ret));
            Some(Some(value))
        } else {
            self.side_table.insert(handle, key.clone(), args[1].clone());
            Some(None)
        }
    }

    fn invoke(
        &mut self,
        opcode: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Value> {
        if let Some(result) = self.native(owner, name, descriptor, &args) {
            return Ok(result);
        }
        let start = match opcode {
            Opcode::Invokevirtual | Opcode::Invokeinterface => self.class_of(&args[0]),
            _ => owner.to_string(),
        };
        if opcode == Opcode::Invokestatic {
            self.initialize(owner);
        }
        let declaring = self.resolve(&start, name, descriptor);
        self.execute(&declaring, name, descriptor, args)
    }

    fn execute(&mut self, class: &str, name: &str, descriptor: &str, args: Vec<Value>) -> Result<Option<Value>, Value> {
        let owner = Rc::clone(&self.classes[class]);
        let method = owner.method(name, descriptor).expect("resolved method");
        let body = owner
            .body(method)
            .expect("decodable body")
            .unwrap_or_else(|| panic!("{}.{}{} has no code", class, name, descriptor));
        let pool = &owner.class_file().constant_pool;

        let mut locals = vec![Value::Top; body.max_locals as usize];
        let mut slot = 0;
        for arg in args {
            let wide = matches!(arg, Value::Long(_));
            locals[slot] = arg;
            slot += if wide { 2 } else { 1 };
        }
        let labels: HashMap<Label, usize> = body
            .insns
            .iter()
            .enumerate()
            .filter_map(|(position, insn)| match insn {
                Insn::Label(label) => Some((*label, position)),
                _ => None,
            })
            .collect();

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        loop {
            let at = pc;
            let insn = &body.insns[pc];
            pc += 1;
            let mut thrown = None;
            if let Some(access) = insn.local_access() {
                let index = access.index as usize;
                if access.store {
                    locals[index] = stack.pop().expect("value to store");
                } else {
                    stack.push(locals[index].clone());
                }
                continue;
            }
            match insn {
                Insn::Label(_) => {}
                Insn::Push { value, .. } => stack.push(Value::Int(*value as i32)),
                Insn::Iinc { index, delta } => {
                    let current = locals[*index as usize].int();
                    locals[*index as usize] = Value::Int(current + *delta as i32);
                }
                Insn::Simple(op) => match op {
                    Opcode::Nop => {}
                    Opcode::AconstNull => stack.push(Value::Null),
                    Opcode::IconstM1
                    | Opcode::Iconst0
                    | Opcode::Iconst1
                    | Opcode::Iconst2
                    | Opcode::Iconst3
                    | Opcode::Iconst4
                    | Opcode::Iconst5 => stack.push(Value::Int(*op as i32 - Opcode::Iconst0 as i32)),
                    Opcode::Lconst0 => stack.push(Value::Long(0)),
                    Opcode::Lconst1 => stack.push(Value::Long(1)),
                    Opcode::Iadd | Opcode::Isub | Opcode::Imul => {
                        let b = stack.pop().expect("operand").int();
                        let a = stack.pop().expect("operand").int();
                        stack.push(Value::Int(match op {
                            Opcode::Iadd => a.wrapping_add(b),
                            Opcode::Isub => a.wrapping_sub(b),
                            _ => a.wrapping_mul(b),
                        }));
                    }
                    Opcode::Idiv => {
                        let b = stack.pop().expect("operand").int();
                        let a = stack.pop().expect("operand").int();
                        if b == 0 {
                            thrown = Some(self.allocate("java/lang/ArithmeticException"));
                        } else {
                            stack.push(Value::Int(a.wrapping_div(b)));
                        }
                    }
                    Opcode::Athrow => thrown = Some(stack.pop().expect("throwable")),
                    Opcode::Pop => {
                        stack.pop();
                    }
                    Opcode::Pop2 => {
                        if !matches!(stack.pop(), Some(Value::Long(_))) {
                            stack.pop();
                        }
                    }
                    Opcode::Dup => {
                        let top = stack.last().cloned().expect("value to dup");
                        stack.push(top);
                    }
                    Opcode::Ireturn | Opcode::Lreturn | Opcode::Areturn => return Ok(stack.pop()),
                    Opcode::Return => return Ok(None),
                    other => panic!("unsupported instruction {}", other.mnemonic()),
                },
                Insn::Constant { opcode, index } => match opcode {
                    Opcode::Ldc | Opcode::LdcW | Opcode::Ldc2W => stack.push(match pool.get(*index).expect("constant") {
                        Constant::Integer(v) => Value::Int(*v),
                        Constant::Long(v) => Value::Long(*v),
                        Constant::String(_) => Value::Str(pool.string(*index).expect("string").to_string()),
                        other => panic!("unsupported constant {:?}", other),
                    }),
                    Opcode::New => {
                        let name = pool.class_name(*index).expect("class").to_string();
                        self.initialize(&name);
                        let object = self.allocate(&name);
                        stack.push(object);
                    }
                    Opcode::Checkcast => {}
                    Opcode::Getfield | Opcode::Putfield | Opcode::Getstatic | Opcode::Putstatic => {
                        let member = pool.member_ref(*index).expect("field ref");
                        let (owner, field, descriptor) =
                            (member.owner.to_string(), member.name.to_string(), member.descriptor.to_string());
                        match opcode {
                            Opcode::Getfield => {
                                let object = stack.pop().expect("receiver");
                                let value = self.field(&object, &field).unwrap_or_else(|| Value::default_for(&descriptor));
                                stack.push(value);
                            }
                            Opcode::Putfield => {
                                let value = stack.pop().expect("value");
                                let Some(Value::Ref(object)) = stack.pop() else {
                                    panic!("putfield {} without receiver", field);
                                };
                                self.heap[object].fields.insert(field, value);
                            }
                            Opcode::Getstatic => {
                                self.initialize(&owner);
                                let value = self
                                    .statics
                                    .get(&(owner, field))
                                    .cloned()
                                    .unwrap_or_else(|| Value::default_for(&descriptor));
                                stack.push(value);
                            }
                            _ => {
                                self.initialize(&owner);
                                let value = stack.pop().expect("value");
                                self.statics.insert((owner, field), value);
                            }
                        }
                    }
                    Opcode::Invokevirtual | Opcode::Invokespecial | Opcode::Invokestatic => {
                        let member = pool.member_ref(*index).expect("method ref");
                        let (owner, method, descriptor) =
                            (member.owner.to_string(), member.name.to_string(), member.descriptor.to_string());
                        let signature = MethodType::parse(&descriptor).expect("method descriptor");
                        let count = signature.params.len() + usize::from(*opcode != Opcode::Invokestatic);
                        let args = stack.split_off(stack.len() - count);
                        match (&signature.ret, self.invoke(*opcode, &owner, &method, &descriptor, args)) {
                            (_, Err(object)) => thrown = Some(object),
                            (ReturnType::Void, Ok(_)) => {}
                            (ReturnType::Value(_), Ok(Some(value))) => stack.push(value),
                            (ReturnType::Value(ty), Ok(None)) => panic!("{} returned nothing for {:?}", method, ty),
                        }
                    }
                    other => panic!("unsupported instruction {}", other.mnemonic()),
                },
                Insn::Jump { opcode, target } => {
                    let taken = match opcode {
                        Opcode::Goto => true,
                        Opcode::Ifeq => stack.pop().expect("operand").int() == 0,
                        Opcode::Ifne => stack.pop().expect("operand").int() != 0,
                        Opcode::Ifnull => stack.pop().expect("operand") == Value::Null,
                        Opcode::Ifnonnull => stack.pop().expect("operand") != Value::Null,
                        Opcode::IfIcmpeq | Opcode::IfIcmpne | Opcode::IfIcmplt | Opcode::IfIcmpge => {
                            let b = stack.pop().expect("operand").int();
                            let a = stack.pop().expect("operand").int();
                            match opcode {
                                Opcode::IfIcmpeq => a == b,
                                Opcode::IfIcmpne => a != b,
                                Opcode::IfIcmplt => a < b,
                                _ => a >= b,
                            }
                        }
                        other => panic!("unsupported branch {}", other.mnemonic()),
                    };
                    if taken {
                        pc = labels[target];
                    }
                }
                other => panic!("unsupported instruction {:?}", other),
            }

            if let Some(object) = thrown {
                let class = self.class_of(&object);
                let handler = body.handlers.iter().find(|handler| {
                    (labels[&handler.start]..labels[&handler.end]).contains(&at)
                        && handler
                            .catch_type
                            .as_deref()
                            .map_or(true, |catch_type| self.is_instance(&class, catch_type))
                });
                let Some(handler) = handler else {
                    return Err(object);
                };
                stack.clear();
                stack.push(object);
                pc = labels[&handler.handler];
            }
        }
    }
}
