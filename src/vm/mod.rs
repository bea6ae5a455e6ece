use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use crate::bytecode::*;
use crate::config::VmConfig;

pub mod dispatch;
pub mod gc;
pub mod native;
pub mod object;

use gc::{Heap, HeapObject};
use object::{BoundMethod, ClassRef, FunctionRef, Object, ObjectKind, StrRef};

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("cannot {operation} {left}{}", and_kind(.right))]
    Type {
        operation: &'static str,
        left: ObjectKind,
        right: Option<ObjectKind>,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("out of memory: heap holds its maximum of {capacity} objects")]
    OutOfMemory { capacity: usize },
    #[error("stack overflow: more than {capacity} slots")]
    StackOverflow { capacity: usize },
    #[error("{what} {index} is out of bounds")]
    BufferOverflow { what: &'static str, index: i64 },
    #[error("{class} has no field '{field}'")]
    UnknownField { class: String, field: String },
    #[error("expected {expected} arguments, got {found}")]
    ArityMismatch { expected: u32, found: u32 },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("no built-in function with index {index}")]
    UnknownNative { index: u32 },
    #[error("call frame links are corrupt")]
    CorruptFrame,
    #[error("invalid input: '{text}' is not an integer")]
    InvalidInput { text: String },
    #[error("invalid constant: {0}")]
    Decode(#[from] DecodeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

fn and_kind(right: &Option<ObjectKind>) -> String {
    right.map(|kind| format!(" and {kind}")).unwrap_or_default()
}

impl VmError {
    pub(crate) fn type_error(operation: &'static str, left: &Object, right: Option<&Object>) -> VmError {
        VmError::Type { operation, left: left.kind(), right: right.map(Object::kind) }
    }

    pub fn code(&self) -> &'static str {
        match self {
            VmError::Type { .. } => "PITH-R001",
            VmError::DivisionByZero => "PITH-R002",
            VmError::OutOfMemory { .. } => "PITH-R003",
            VmError::BufferOverflow { .. } => "PITH-R004",
            VmError::StackOverflow { .. } => "PITH-R005",
            VmError::UnknownField { .. } => "PITH-R006",
            VmError::ArityMismatch { .. } => "PITH-R007",
            VmError::UnknownOpcode { .. }
            | VmError::UnknownNative { .. }
            | VmError::CorruptFrame
            | VmError::Decode(_) => "PITH-R008",
            VmError::InvalidInput { .. } | VmError::Io(_) => "PITH-R009",
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// A runtime failure with the instruction that raised it.
#[derive(Debug, thiserror::Error)]
#[error("runtime error in {op} at {pc}: {kind}")]
pub struct RuntimeError {
    pub op: &'static str,
    /// Address relative to `start_address`.
    pub pc: u32,
    #[source]
    pub kind: VmError,
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

// ── VM ───────────────────────────────────────────────────────────────

pub struct Vm<'a> {
    program: &'a Program,
    config: VmConfig,
    stack: Vec<Object>,
    stack_base: usize,
    /// Absolute position in the program buffer.
    pc: usize,
    /// Active user-function frames.
    depth: usize,
    halted: bool,
    result: Option<Object>,
    pub(crate) heap: Heap,
    classes: HashMap<u32, Rc<ClassInfo>>,
    pub(crate) out: Box<dyn Write + 'a>,
    pub(crate) input: Box<dyn BufRead + 'a>,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, config: VmConfig) -> Self {
        Vm {
            program,
            stack: Vec::with_capacity(config.stack_capacity),
            heap: Heap::new(config.heap_capacity, config.gc_threshold),
            config,
            stack_base: 0,
            pc: program.start_address() as usize,
            depth: 0,
            halted: false,
            result: None,
            classes: HashMap::new(),
            out: Box::new(io::stdout()),
            input: Box::new(io::stdin().lock()),
        }
    }

    pub fn with_output(mut self, out: impl Write + 'a) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn with_input(mut self, input: impl BufRead + 'a) -> Self {
        self.input = Box::new(input);
        self
    }

    pub fn stack(&self) -> &[Object] {
        &self.stack
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_base(&self) -> usize {
        self.stack_base
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Runs a full collection with the current stack as roots.
    pub fn collect_garbage(&mut self) -> usize {
        self.heap.collect(&self.stack)
    }

    /// Executes from `start_address` until the program ends or a top-level
    /// `return` halts it. Returns the value of that `return`, or `Number(0)`.
    pub fn run(&mut self) -> Result<Object, RuntimeError> {
        let start = self.program.start_address() as usize;
        self.pc = start;
        self.halted = false;
        self.result = None;

        while !self.halted && self.pc < self.program.len() {
            let at = self.pc;
            let op = self.program.bytes()[at];
            self.pc += 1;
            log::trace!(
                "{:>6} {:<10} stack={} base={}",
                at - start,
                op_name(op).unwrap_or("?"),
                self.stack.len(),
                self.stack_base
            );
            if let Err(kind) = self.step(op) {
                return Err(RuntimeError { op: op_name(op).unwrap_or("?"), pc: (at - start) as u32, kind });
            }
        }
        self.out.flush().map_err(|e| RuntimeError {
            op: "(end)",
            pc: (self.pc - start) as u32,
            kind: VmError::Io(e),
        })?;
        Ok(self.result.take().unwrap_or(Object::NONE))
    }

    fn step(&mut self, op: u8) -> VmResult<()> {
        match op {
            OP_PUSH => {
                let offset = self.operand()?;
                let object = self.load_constant(offset)?;
                self.push(object)?;
            }
            OP_PUSH_NUM => {
                let value = self.operand()?;
                self.push(Object::Number(value))?;
            }
            OP_PUSH_TRUE => self.push(Object::Bool(true))?,
            OP_PUSH_FALSE => self.push(Object::Bool(false))?,
            OP_POP => {
                self.pop()?;
            }
            OP_ADD => {
                let (left, right) = self.operands()?;
                let add = left
                    .kind()
                    .addition()
                    .ok_or_else(|| VmError::type_error("add", &left, Some(&right)))?;
                let sum = add(self, left, right)?;
                self.replace_operands(sum);
            }
            OP_MIN => self.arithmetic("subtract", |a, b| Ok(a.wrapping_sub(b)))?,
            OP_MUL => self.arithmetic("multiply", |a, b| Ok(a.wrapping_mul(b)))?,
            OP_DIV => self.arithmetic("divide", |a, b| {
                if b == 0 {
                    return Err(VmError::DivisionByZero);
                }
                Ok(a.wrapping_div(b))
            })?,
            OP_NOT => {
                let top = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or(VmError::BufferOverflow { what: "stack slot", index: -1 })?;
                let value = &self.stack[top];
                let b = value.as_bool().ok_or_else(|| VmError::type_error("negate", value, None))?;
                self.stack[top] = Object::Bool(!b);
            }
            OP_DEQ | OP_NEQ => {
                let (left, right) = self.operands()?;
                let equal = left
                    .kind()
                    .equality()
                    .ok_or_else(|| VmError::type_error("compare", &left, Some(&right)))?;
                let same = equal(self, &left, &right)?;
                self.replace_operands(Object::Bool(same == (op == OP_DEQ)));
            }
            OP_GRE => self.comparison(|a, b| a > b)?,
            OP_GRQ => self.comparison(|a, b| a >= b)?,
            OP_LES => self.comparison(|a, b| a < b)?,
            OP_LEQ => self.comparison(|a, b| a <= b)?,
            OP_AND => self.logic("apply && to", |a, b| a && b)?,
            OP_OR => self.logic("apply || to", |a, b| a || b)?,
            OP_DUP => {
                let index = self.operand()? as i64;
                let slot = self.slot(index)?;
                self.push(self.stack[slot].clone())?;
            }
            OP_DUP_LOC => {
                let index = self.stack_base as i64 + self.operand()? as i64;
                let slot = self.slot(index)?;
                self.push(self.stack[slot].clone())?;
            }
            OP_CHANGE => {
                let index = self.operand()? as i64;
                let value = self.pop()?;
                let slot = self.slot(index)?;
                self.stack[slot] = value;
            }
            OP_CHANGE_LOC => {
                let index = self.stack_base as i64 + self.operand()? as i64;
                let value = self.pop()?;
                let slot = self.slot(index)?;
                self.stack[slot] = value;
            }
            OP_JMP_NOT => {
                let target = self.operand()?;
                let condition = self.pop()?;
                let b = condition
                    .as_bool()
                    .ok_or_else(|| VmError::type_error("branch on", &condition, None))?;
                if !b {
                    self.jump(target)?;
                }
            }
            OP_JMP => {
                let target = self.operand()?;
                self.jump(target)?;
            }
            OP_PUSH_BASE => self.push(Object::Number(self.stack_base as i32))?,
            OP_PUSH_ADDR => {
                let address = self.operand()?;
                self.push(Object::Number(address))?;
            }
            OP_CALL => {
                let argc = self.operand()?;
                let argc = u32::try_from(argc)
                    .map_err(|_| VmError::BufferOverflow { what: "argument count", index: argc as i64 })?;
                let callee = self.pop()?;
                let call = callee
                    .kind()
                    .callable()
                    .ok_or_else(|| VmError::type_error("call", &callee, None))?;
                call(self, callee, argc)?;
            }
            OP_RET => self.ret()?,
            OP_GET_FIELD => {
                let name = self.pop()?;
                let target = self.pop()?;
                let get = target
                    .kind()
                    .get_field()
                    .ok_or_else(|| VmError::type_error("read a field of", &target, None))?;
                let value = get(self, target, name)?;
                self.push(value)?;
            }
            OP_SET_FIELD => {
                let value = self.pop()?;
                let name = self.pop()?;
                let target = self.pop()?;
                let set = target
                    .kind()
                    .set_field()
                    .ok_or_else(|| VmError::type_error("assign a field of", &target, None))?;
                set(self, target, name, value)?;
            }
            op => return Err(VmError::UnknownOpcode { op }),
        }
        Ok(())
    }

    // ── Stack and operand access ─────────────────────────────────────

    pub(crate) fn push(&mut self, object: Object) -> VmResult<()> {
        if self.stack.len() >= self.config.stack_capacity {
            return Err(VmError::StackOverflow { capacity: self.config.stack_capacity });
        }
        self.stack.push(object);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> VmResult<Object> {
        self.stack.pop().ok_or(VmError::BufferOverflow { what: "stack slot", index: -1 })
    }

    fn slot(&self, index: i64) -> VmResult<usize> {
        if index < 0 || index >= self.stack.len() as i64 {
            return Err(VmError::BufferOverflow { what: "stack slot", index });
        }
        Ok(index as usize)
    }

    fn operand(&mut self) -> VmResult<i32> {
        let end = self.pc + OPERAND_WIDTH;
        let raw = self
            .program
            .bytes()
            .get(self.pc..end)
            .ok_or(VmError::BufferOverflow { what: "operand at", index: self.pc as i64 })?;
        self.pc = end;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Moves the program counter to an address relative to `start_address`.
    fn jump(&mut self, target: i32) -> VmResult<()> {
        let absolute = self.program.start_address() as i64 + target as i64;
        if target < 0 || absolute > self.program.len() as i64 {
            return Err(VmError::BufferOverflow { what: "jump target", index: target as i64 });
        }
        self.pc = absolute as usize;
        Ok(())
    }

    /// The two topmost values, left first. They stay on the stack until the
    /// instruction succeeds, so a failing operation leaves the depth unchanged.
    fn operands(&self) -> VmResult<(Object, Object)> {
        let left = self
            .stack
            .len()
            .checked_sub(2)
            .ok_or(VmError::BufferOverflow { what: "stack slot", index: self.stack.len() as i64 - 2 })?;
        Ok((self.stack[left].clone(), self.stack[left + 1].clone()))
    }

    /// Replaces the two operands read by `operands` with the result.
    fn replace_operands(&mut self, result: Object) {
        let left = self.stack.len() - 2;
        self.stack.truncate(left);
        self.stack.push(result);
    }

    fn arithmetic(&mut self, operation: &'static str, f: impl FnOnce(i32, i32) -> VmResult<i32>) -> VmResult<()> {
        match self.operands()? {
            (Object::Number(a), Object::Number(b)) => {
                let value = f(a, b)?;
                self.replace_operands(Object::Number(value));
                Ok(())
            }
            (left, right) => Err(VmError::type_error(operation, &left, Some(&right))),
        }
    }

    fn comparison(&mut self, f: impl FnOnce(i32, i32) -> bool) -> VmResult<()> {
        match self.operands()? {
            (Object::Number(a), Object::Number(b)) => {
                self.replace_operands(Object::Bool(f(a, b)));
                Ok(())
            }
            (left, right) => Err(VmError::type_error("compare", &left, Some(&right))),
        }
    }

    fn logic(&mut self, operation: &'static str, f: impl FnOnce(bool, bool) -> bool) -> VmResult<()> {
        match self.operands()? {
            (Object::Bool(a), Object::Bool(b)) => {
                self.replace_operands(Object::Bool(f(a, b)));
                Ok(())
            }
            (left, right) => Err(VmError::type_error(operation, &left, Some(&right))),
        }
    }

    // ── Constants ────────────────────────────────────────────────────

    fn load_constant(&mut self, offset: i32) -> VmResult<Object> {
        let offset = u32::try_from(offset)
            .map_err(|_| VmError::BufferOverflow { what: "constant offset", index: offset as i64 })?;
        let object = match self.program.constant_at(offset)? {
            Constant::Number(n) => Object::Number(n),
            Constant::String(span) => Object::String(StrRef::Const(span)),
            Constant::Function(f) => Object::Function(FunctionRef { callee: f.callee, arity: f.arity }),
            Constant::Class(info) => {
                self.classes.entry(offset).or_insert_with(|| Rc::new(info));
                Object::Class(ClassRef(offset))
            }
        };
        Ok(object)
    }

    /// Decoded descriptor of a class, cached by pool offset.
    pub(crate) fn class_info(&mut self, class: ClassRef) -> VmResult<Rc<ClassInfo>> {
        if let Some(info) = self.classes.get(&class.0) {
            return Ok(Rc::clone(info));
        }
        match self.program.constant_at(class.0)? {
            Constant::Class(info) => {
                let info = Rc::new(info);
                self.classes.insert(class.0, Rc::clone(&info));
                Ok(info)
            }
            _ => Err(DecodeError::Malformed { offset: class.0, what: "class reference" }.into()),
        }
    }

    // ── Heap ─────────────────────────────────────────────────────────

    pub(crate) fn alloc(&mut self, object: HeapObject) -> VmResult<gc::Handle> {
        self.heap.alloc(object, &self.stack)
    }

    pub(crate) fn alloc_string(&mut self, bytes: Vec<u8>) -> VmResult<Object> {
        let handle = self.alloc(HeapObject::Str(bytes.into_boxed_slice()))?;
        Ok(Object::String(StrRef::Heap(handle)))
    }

    pub(crate) fn string_bytes(&self, string: &StrRef) -> VmResult<&[u8]> {
        match string {
            StrRef::Const(span) => Ok(self.program.span_bytes(*span)),
            StrRef::Heap(handle) => self
                .heap
                .string(*handle)
                .ok_or(VmError::BufferOverflow { what: "heap handle", index: handle.index() as i64 }),
        }
    }

    /// Text form used by `print` and string concatenation.
    pub fn render(&mut self, object: &Object) -> VmResult<Vec<u8>> {
        let text = match object {
            Object::Number(n) => n.to_string(),
            Object::String(s) => return self.string_bytes(s).map(<[u8]>::to_vec),
            Object::Bool(b) => b.to_string(),
            Object::Function(f) => match f.callee {
                Callee::User { entry } => format!("<function @{entry}>"),
                Callee::Native { index } => match native::NATIVES.get(index as usize) {
                    Some(native) => format!("<built-in {}>", native.name),
                    None => "<built-in>".to_string(),
                },
            },
            Object::Method(_) => "<bound method>".to_string(),
            Object::Instance(handle) => {
                let (class, _) = self
                    .heap
                    .instance(*handle)
                    .ok_or(VmError::BufferOverflow { what: "heap handle", index: handle.index() as i64 })?;
                format!("<{} instance>", self.class_info(class)?.name)
            }
            Object::Class(class) => format!("<class {}>", self.class_info(*class)?.name),
        };
        Ok(text.into_bytes())
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Index of the first argument of a call with `argc` arguments, checking
    /// that the two frame links sit below them.
    fn args_start(&self, argc: u32) -> VmResult<usize> {
        let argc = argc as usize;
        if self.stack.len() < argc + 2 {
            return Err(VmError::BufferOverflow { what: "call frame at", index: self.stack.len() as i64 });
        }
        Ok(self.stack.len() - argc)
    }

    /// Enters a function whose arguments are already on the stack.
    ///
    /// Frame layout, relative to the new `stack_base`:
    ///
    /// ```text
    /// base - 2   caller's stack_base   (PUSH_BASE)
    /// base - 1   return address        (PUSH_ADDR)
    /// base + 0   first argument        (DUP_LOC 0)
    /// base + n   first local, for a function of n parameters
    /// ```
    ///
    /// Parameters take the non-negative slots `0..n`, so no frame access
    /// uses a negative offset. `RET` pops the links from below the arguments.
    pub(crate) fn enter(&mut self, function: FunctionRef, argc: u32) -> VmResult<()> {
        if function.arity != argc {
            return Err(VmError::ArityMismatch { expected: function.arity, found: argc });
        }
        let args_start = self.args_start(argc)?;
        match function.callee {
            Callee::User { entry } => {
                let entry = i32::try_from(entry)
                    .map_err(|_| VmError::BufferOverflow { what: "jump target", index: entry as i64 })?;
                self.stack_base = args_start;
                self.depth += 1;
                self.jump(entry)
            }
            Callee::Native { index } => {
                let native = native::NATIVES.get(index as usize).ok_or(VmError::UnknownNative { index })?;
                // Arguments stay on the stack, and so stay rooted, while the built-in runs.
                let args = self.stack[args_start..].to_vec();
                let result = (native.func)(self, &args)?;
                self.stack.truncate(args_start - 2);
                self.push(result)
            }
        }
    }

    /// Calls a bound method: the receiver becomes the leading argument.
    pub(crate) fn enter_method(&mut self, method: &BoundMethod, argc: u32) -> VmResult<()> {
        if self.stack.len() >= self.config.stack_capacity {
            return Err(VmError::StackOverflow { capacity: self.config.stack_capacity });
        }
        let at = self.stack.len().checked_sub(argc as usize).ok_or(VmError::BufferOverflow {
            what: "call frame at",
            index: self.stack.len() as i64,
        })?;
        self.stack.insert(at, method.receiver.clone());
        self.enter(method.function, argc + 1)
    }

    /// Creates an instance of `class` in place of a zero-argument call.
    pub(crate) fn instantiate(&mut self, class: ClassRef, argc: u32) -> VmResult<()> {
        if argc != 0 {
            return Err(VmError::ArityMismatch { expected: 0, found: argc });
        }
        let args_start = self.args_start(0)?;
        let info = self.class_info(class)?;
        let members = vec![Object::NONE; info.members.len()];
        let handle = self.alloc(HeapObject::Instance { class, members })?;
        self.stack.truncate(args_start - 2);
        self.push(Object::Instance(handle))
    }

    fn ret(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        if self.depth == 0 {
            self.result = Some(value);
            self.halted = true;
            return Ok(());
        }
        self.stack.truncate(self.stack_base);
        let address = self.pop_link()?;
        let base = self.pop_link()?;
        if base < 0 || base as usize > self.stack.len() {
            return Err(VmError::CorruptFrame);
        }
        self.stack_base = base as usize;
        self.depth -= 1;
        self.push(value)?;
        self.jump(address)
    }

    fn pop_link(&mut self) -> VmResult<i32> {
        self.pop()?.as_number().ok_or(VmError::CorruptFrame)
    }
}
