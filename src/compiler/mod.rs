//! Single-pass lowering of the syntax tree to a [`Program`].
//!
//! Variables live on the VM stack. Top-level variables are addressed by
//! absolute slot (`DUP`/`CHANGE`); variables inside a function are addressed
//! relative to the frame base (`DUP_LOC`/`CHANGE_LOC`), with the parameters in
//! slots `0..n` and locals after them.

use std::collections::HashMap;

use crate::ast::{Node, NodeKind, Span};
use crate::bytecode::*;
use crate::config::CompilerLimits;
use crate::lexer::Token;
use crate::vm::native;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("undefined variable: {name}")]
    UndefinedVariable { name: String, span: Span },
    #[error("undefined function: {name}")]
    UndefinedFunction { name: String, span: Span },
    #[error("no class declares a member or method named '{name}'")]
    UndefinedMember { name: String, span: Span },
    #[error("{what} limit of {limit} exceeded")]
    CapacityExceeded { what: &'static str, limit: usize, span: Span },
    #[error("malformed {kind:?} node: {reason}")]
    MalformedTree { kind: NodeKind, reason: &'static str, span: Span },
}

impl CompileError {
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UndefinedVariable { .. } => "PITH-C001",
            CompileError::UndefinedFunction { .. } => "PITH-C002",
            CompileError::UndefinedMember { .. } => "PITH-C003",
            CompileError::CapacityExceeded { .. } => "PITH-C004",
            CompileError::MalformedTree { .. } => "PITH-C005",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CompileError::UndefinedVariable { span, .. }
            | CompileError::UndefinedFunction { span, .. }
            | CompileError::UndefinedMember { span, .. }
            | CompileError::CapacityExceeded { span, .. }
            | CompileError::MalformedTree { span, .. } => *span,
        }
    }
}

type CResult<T> = Result<T, CompileError>;

pub fn compile(tree: Option<&Node>) -> CResult<Program> {
    compile_with(tree, &CompilerLimits::default())
}

pub fn compile_with(tree: Option<&Node>, limits: &CompilerLimits) -> CResult<Program> {
    let mut compiler = Compiler::new(limits);
    compiler.statements(tree)?;
    Ok(compiler.finish())
}

// ── Compiler state ───────────────────────────────────────────────────

#[derive(Debug)]
struct Variable {
    name: String,
    depth: u32,
    slot: u32,
    /// Function frame that owns the slot; 0 is the top level.
    frame: u32,
    is_param: bool,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: u32,
    depth: u32,
    next_slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Absolute(u32),
    Local(u32),
}

struct ClassEntry {
    name: String,
    constant: u32,
    members: Vec<String>,
    methods: Vec<String>,
}

struct Compiler<'l> {
    limits: &'l CompilerLimits,
    pool: Vec<u8>,
    code: Vec<u8>,
    strings: HashMap<Vec<u8>, u32>,
    natives: HashMap<u32, u32>,
    variables: Vec<Variable>,
    functions: Vec<(String, u32)>,
    classes: Vec<ClassEntry>,
    frame: Frame,
    frames_opened: u32,
    /// Span of the node being lowered, attached to capacity errors.
    span: Span,
}

impl<'l> Compiler<'l> {
    fn new(limits: &'l CompilerLimits) -> Self {
        Compiler {
            limits,
            pool: vec![0; Program::HEADER_LEN],
            code: Vec::new(),
            strings: HashMap::new(),
            natives: HashMap::new(),
            variables: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            frame: Frame { id: 0, depth: 0, next_slot: 0 },
            frames_opened: 0,
            span: Span::UNKNOWN,
        }
    }

    fn finish(self) -> Program {
        log::debug!(
            "compiled {} constant bytes, {} code bytes, {} functions, {} classes",
            self.pool.len(),
            self.code.len(),
            self.functions.len(),
            self.classes.len()
        );
        Program::assemble(self.pool, &self.code)
    }

    // ── Emission ─────────────────────────────────────────────────────

    fn reserve(&self, bytes: usize) -> CResult<()> {
        if self.code.len() + bytes > self.limits.max_code_bytes {
            return Err(CompileError::CapacityExceeded {
                what: "code size",
                limit: self.limits.max_code_bytes,
                span: self.span,
            });
        }
        Ok(())
    }

    fn emit(&mut self, op: u8) -> CResult<()> {
        self.reserve(1)?;
        self.code.push(op);
        Ok(())
    }

    fn emit_with(&mut self, op: u8, operand: i32) -> CResult<()> {
        self.reserve(1 + OPERAND_WIDTH)?;
        self.code.push(op);
        self.code.extend_from_slice(&operand.to_le_bytes());
        Ok(())
    }

    /// Emits `op` with a zero operand and returns the operand's position.
    fn placeholder(&mut self, op: u8) -> CResult<usize> {
        self.emit_with(op, 0)?;
        Ok(self.code.len() - OPERAND_WIDTH)
    }

    /// Points a placeholder at the next instruction to be emitted.
    fn patch(&mut self, at: usize) {
        let target = self.code.len() as i32;
        self.code[at..at + OPERAND_WIDTH].copy_from_slice(&target.to_le_bytes());
    }

    fn address(&self) -> u32 {
        self.code.len() as u32
    }

    // ── Constant pool ────────────────────────────────────────────────

    fn pool_write<T>(&mut self, write: impl FnOnce(&mut PoolWriter<'_>) -> T) -> CResult<T> {
        let value = write(&mut PoolWriter::new(&mut self.pool));
        if self.pool.len() > self.limits.max_constant_bytes {
            return Err(CompileError::CapacityExceeded {
                what: "constant pool",
                limit: self.limits.max_constant_bytes,
                span: self.span,
            });
        }
        Ok(value)
    }

    fn string_constant(&mut self, bytes: &[u8]) -> CResult<u32> {
        if let Some(&offset) = self.strings.get(bytes) {
            return Ok(offset);
        }
        let offset = self.pool_write(|w| w.string(bytes))?;
        self.strings.insert(bytes.to_vec(), offset);
        Ok(offset)
    }

    fn native_constant(&mut self, index: u32, native: &native::Native) -> CResult<u32> {
        if let Some(&offset) = self.natives.get(&index) {
            return Ok(offset);
        }
        let offset = self.pool_write(|w| w.function(Callee::Native { index }, native.arity, native.name))?;
        self.natives.insert(index, offset);
        Ok(offset)
    }

    // ── Scopes and variables ─────────────────────────────────────────

    fn resolve(&self, name: &str) -> Option<Access> {
        let frame = self.frame.id;
        self.variables
            .iter()
            .rev()
            .find(|v| v.name == name && (v.frame == frame || (v.frame == 0 && v.depth == 0)))
            .map(|v| if v.frame == 0 { Access::Absolute(v.slot) } else { Access::Local(v.slot) })
    }

    fn push_variable(&mut self, name: String, slot: u32, is_param: bool) -> CResult<()> {
        if self.variables.len() >= self.limits.max_variables {
            return Err(CompileError::CapacityExceeded {
                what: "variable",
                limit: self.limits.max_variables,
                span: self.span,
            });
        }
        self.variables.push(Variable { name, depth: self.frame.depth, slot, frame: self.frame.id, is_param });
        Ok(())
    }

    /// Binds `name` to the value just pushed on top of the stack.
    fn declare(&mut self, name: &str) -> CResult<()> {
        let slot = self.frame.next_slot;
        self.push_variable(name.to_string(), slot, false)?;
        self.frame.next_slot += 1;
        Ok(())
    }

    fn load(&mut self, access: Access) -> CResult<()> {
        match access {
            Access::Absolute(slot) => self.emit_with(OP_DUP, slot as i32),
            Access::Local(slot) => self.emit_with(OP_DUP_LOC, slot as i32),
        }
    }

    fn store(&mut self, access: Access) -> CResult<()> {
        match access {
            Access::Absolute(slot) => self.emit_with(OP_CHANGE, slot as i32),
            Access::Local(slot) => self.emit_with(OP_CHANGE_LOC, slot as i32),
        }
    }

    /// Compiles a statement chain one level deeper, then pops what it declared.
    fn scoped(&mut self, chain: Option<&Node>) -> CResult<()> {
        self.frame.depth += 1;
        self.statements(chain)?;
        self.leave_scope()
    }

    fn leave_scope(&mut self) -> CResult<()> {
        let depth = self.frame.depth;
        while let Some(last) = self.variables.last() {
            if last.frame != self.frame.id || last.depth < depth {
                break;
            }
            let is_param = last.is_param;
            self.variables.pop();
            if !is_param {
                self.emit(OP_POP)?;
                self.frame.next_slot -= 1;
            }
        }
        self.frame.depth -= 1;
        Ok(())
    }

    // ── Statements ───────────────────────────────────────────────────

    fn statements(&mut self, chain: Option<&Node>) -> CResult<()> {
        let mut link = chain;
        while let Some(node) = link {
            if node.kind != NodeKind::Statement {
                return Err(malformed(node, "expected a statement list"));
            }
            if let Some(statement) = node.left.as_deref() {
                self.statement(statement)?;
            }
            link = node.right.as_deref();
        }
        Ok(())
    }

    fn statement(&mut self, node: &Node) -> CResult<()> {
        self.span = node.span();
        match node.kind {
            NodeKind::Statement => self.statements(Some(node)),
            NodeKind::Declaration => {
                let name = name_of(node)?;
                self.expression(child(node.left.as_deref(), node, "declaration without a value")?)?;
                self.span = node.span();
                self.declare(name)
            }
            NodeKind::Assign => self.assignment(node),
            NodeKind::ExpStatement => {
                self.expression(child(node.left.as_deref(), node, "empty expression statement")?)?;
                self.emit(OP_POP)
            }
            NodeKind::If => self.if_statement(node),
            NodeKind::While => self.while_statement(node),
            NodeKind::Function => self.function(node),
            NodeKind::Class => self.class(node),
            NodeKind::Return => {
                match node.left.as_deref() {
                    Some(value) => self.expression(value)?,
                    None => self.emit_with(OP_PUSH_NUM, 0)?,
                }
                self.emit(OP_RET)
            }
            _ => Err(malformed(node, "expected a statement")),
        }
    }

    fn assignment(&mut self, node: &Node) -> CResult<()> {
        let target = child(node.left.as_deref(), node, "assignment without a target")?;
        let value = child(node.right.as_deref(), node, "assignment without a value")?;
        match target.kind {
            NodeKind::Var => {
                let name = name_of(target)?;
                self.expression(value)?;
                self.span = target.span();
                match self.resolve(name) {
                    Some(access) => self.store(access),
                    None => self.declare(name),
                }
            }
            NodeKind::Member => {
                let field = name_of(target)?;
                self.check_member(field, target.span())?;
                self.expression(child(target.left.as_deref(), target, "member access without an object")?)?;
                let name = self.string_constant(field.as_bytes())?;
                self.emit_with(OP_PUSH, name as i32)?;
                self.expression(value)?;
                self.emit(OP_SET_FIELD)
            }
            NodeKind::Index => {
                self.expression(child(target.left.as_deref(), target, "index without an object")?)?;
                self.expression(child(target.right.as_deref(), target, "index without a key")?)?;
                self.expression(value)?;
                self.emit(OP_SET_FIELD)
            }
            _ => Err(malformed(target, "cannot assign to this expression")),
        }
    }

    fn if_statement(&mut self, node: &Node) -> CResult<()> {
        let condition = child(node.left.as_deref(), node, "if without a condition")?;
        let decision = decision_of(node)?;
        self.expression(condition)?;
        let skip_then = self.placeholder(OP_JMP_NOT)?;
        self.scoped(decision.left.as_deref())?;
        match decision.right.as_deref() {
            Some(otherwise) => {
                let skip_else = self.placeholder(OP_JMP)?;
                self.patch(skip_then);
                self.scoped(Some(otherwise))?;
                self.patch(skip_else);
            }
            None => self.patch(skip_then),
        }
        Ok(())
    }

    fn while_statement(&mut self, node: &Node) -> CResult<()> {
        let condition = child(node.left.as_deref(), node, "while without a condition")?;
        let decision = decision_of(node)?;
        let top = self.address();
        self.expression(condition)?;
        let exit = self.placeholder(OP_JMP_NOT)?;
        self.scoped(decision.left.as_deref())?;
        self.emit_with(OP_JMP, top as i32)?;
        self.patch(exit);
        Ok(())
    }

    fn function(&mut self, node: &Node) -> CResult<()> {
        let name = name_of(node)?.to_string();
        let params = param_names(node.left.as_deref())?;
        let skip = self.placeholder(OP_JMP)?;
        let entry = self.address();
        // Registered before the body so the function can call itself.
        let constant = self.pool_write(|w| w.function(Callee::User { entry }, params.len() as u32, &name))?;
        self.functions.push((name, constant));
        self.routine(params, node.right.as_deref())?;
        self.patch(skip);
        Ok(())
    }

    fn class(&mut self, node: &Node) -> CResult<()> {
        let name = name_of(node)?.to_string();
        let members = param_names(node.left.as_deref())?;

        let mut methods = Vec::new();
        let mut link = node.right.as_deref();
        while let Some(entry) = link {
            let method = child(entry.left.as_deref(), entry, "empty method slot")?;
            if entry.kind != NodeKind::Statement || method.kind != NodeKind::Method {
                return Err(malformed(entry, "class body must be a list of methods"));
            }
            let params = param_names(method.left.as_deref())?;
            methods.push((method, name_of(method)?.to_string(), params));
            link = entry.right.as_deref();
        }

        let signatures: Vec<(String, u32)> =
            methods.iter().map(|(_, name, params)| (name.clone(), params.len() as u32 + 1)).collect();
        let (constant, entry_fields) = self.pool_write(|w| w.class(&name, &members, &signatures))?;
        self.classes.push(ClassEntry {
            name,
            constant,
            members,
            methods: signatures.into_iter().map(|(name, _)| name).collect(),
        });

        let skip = self.placeholder(OP_JMP)?;
        for ((method, _, params), field) in methods.into_iter().zip(entry_fields) {
            let entry = self.address() as i32;
            self.pool[field..field + OPERAND_WIDTH].copy_from_slice(&entry.to_le_bytes());
            let mut all_params = Vec::with_capacity(params.len() + 1);
            all_params.push("self".to_string());
            all_params.extend(params);
            self.routine(all_params, method.right.as_deref())?;
        }
        self.patch(skip);
        Ok(())
    }

    /// Compiles a function or method body in a fresh frame. Parameters occupy
    /// slots `0..n`; a missing trailing `return` becomes `return 0`.
    fn routine(&mut self, params: Vec<String>, body: Option<&Node>) -> CResult<()> {
        self.frames_opened += 1;
        let id = self.frames_opened;
        let outer = std::mem::replace(
            &mut self.frame,
            Frame { id, depth: 1, next_slot: params.len() as u32 },
        );

        let mut result = Ok(());
        for (slot, name) in params.into_iter().enumerate() {
            result = self.push_variable(name, slot as u32, true);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.routine_body(body);
        }

        while self.variables.last().is_some_and(|v| v.frame == id) {
            self.variables.pop();
        }
        self.frame = outer;
        result
    }

    fn routine_body(&mut self, body: Option<&Node>) -> CResult<()> {
        self.statements(body)?;
        let ends_with_return = Node::chain(body).last().is_some_and(|last| last.kind == NodeKind::Return);
        if !ends_with_return {
            self.emit_with(OP_PUSH_NUM, 0)?;
            self.emit(OP_RET)?;
        }
        Ok(())
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn expression(&mut self, node: &Node) -> CResult<()> {
        if node.token.is_some() {
            self.span = node.span();
        }
        match node.kind {
            NodeKind::Number => match node.token.as_deref() {
                Some(Token::Number(n)) => self.emit_with(OP_PUSH_NUM, *n),
                _ => Err(malformed(node, "number literal without a number token")),
            },
            NodeKind::String => match node.token.as_deref() {
                Some(Token::Str(text)) => {
                    let offset = self.string_constant(text.as_bytes())?;
                    self.emit_with(OP_PUSH, offset as i32)
                }
                _ => Err(malformed(node, "string literal without a string token")),
            },
            NodeKind::Bool => match node.token.as_deref() {
                Some(Token::True) => self.emit(OP_PUSH_TRUE),
                Some(Token::False) => self.emit(OP_PUSH_FALSE),
                _ => Err(malformed(node, "bool literal without true/false")),
            },
            NodeKind::Var => {
                let name = name_of(node)?;
                if self.load_name(name)? {
                    Ok(())
                } else {
                    Err(CompileError::UndefinedVariable { name: name.to_string(), span: node.span() })
                }
            }
            NodeKind::BinaryOp => {
                let op = binary_opcode(node)?;
                self.expression(child(node.left.as_deref(), node, "missing left operand")?)?;
                self.expression(child(node.right.as_deref(), node, "missing right operand")?)?;
                self.emit(op)
            }
            NodeKind::Not => {
                self.expression(child(node.left.as_deref(), node, "missing operand")?)?;
                self.emit(OP_NOT)
            }
            NodeKind::Negate => {
                self.emit_with(OP_PUSH_NUM, 0)?;
                self.expression(child(node.left.as_deref(), node, "missing operand")?)?;
                self.emit(OP_MIN)
            }
            NodeKind::FunctionCall => self.call(node),
            NodeKind::Member => {
                let field = name_of(node)?;
                self.check_member(field, node.span())?;
                self.expression(child(node.left.as_deref(), node, "member access without an object")?)?;
                let name = self.string_constant(field.as_bytes())?;
                self.emit_with(OP_PUSH, name as i32)?;
                self.emit(OP_GET_FIELD)
            }
            NodeKind::Index => {
                self.expression(child(node.left.as_deref(), node, "index without an object")?)?;
                self.expression(child(node.right.as_deref(), node, "index without a key")?)?;
                self.emit(OP_GET_FIELD)
            }
            _ => Err(malformed(node, "expected an expression")),
        }
    }

    /// Pushes whatever `name` refers to: variable, then function, class, built-in.
    /// Returns false if nothing by that name exists.
    fn load_name(&mut self, name: &str) -> CResult<bool> {
        if let Some(access) = self.resolve(name) {
            self.load(access)?;
            return Ok(true);
        }
        let constant = if let Some((_, offset)) = self.functions.iter().rev().find(|(n, _)| n == name) {
            *offset
        } else if let Some(class) = self.classes.iter().rev().find(|c| c.name == name) {
            class.constant
        } else if let Some((index, native)) = native::lookup(name) {
            self.native_constant(index, native)?
        } else {
            return Ok(false);
        };
        self.emit_with(OP_PUSH, constant as i32)?;
        Ok(true)
    }

    /// `PUSH_BASE; PUSH_ADDR ret; args...; callee; CALL argc` with `ret` the
    /// address right after the `CALL`.
    fn call(&mut self, node: &Node) -> CResult<()> {
        let callee = child(node.left.as_deref(), node, "call without a callee")?;
        self.emit(OP_PUSH_BASE)?;
        let return_address = self.placeholder(OP_PUSH_ADDR)?;

        let mut argc = 0;
        let mut link = node.right.as_deref();
        while let Some(arg) = link {
            if arg.kind != NodeKind::Argument {
                return Err(malformed(arg, "expected an argument list"));
            }
            self.expression(child(arg.left.as_deref(), arg, "empty argument")?)?;
            argc += 1;
            link = arg.right.as_deref();
        }

        if callee.kind == NodeKind::Var {
            let name = name_of(callee)?;
            if !self.load_name(name)? {
                return Err(CompileError::UndefinedFunction { name: name.to_string(), span: callee.span() });
            }
        } else {
            self.expression(callee)?;
        }
        self.emit_with(OP_CALL, argc)?;
        self.patch(return_address);
        Ok(())
    }

    fn check_member(&self, name: &str, span: Span) -> CResult<()> {
        let known = self
            .classes
            .iter()
            .any(|c| c.members.iter().any(|m| m == name) || c.methods.iter().any(|m| m == name));
        if known {
            Ok(())
        } else {
            Err(CompileError::UndefinedMember { name: name.to_string(), span })
        }
    }
}

// ── Tree helpers ─────────────────────────────────────────────────────

fn malformed(node: &Node, reason: &'static str) -> CompileError {
    CompileError::MalformedTree { kind: node.kind, reason, span: node.span() }
}

fn child<'n>(child: Option<&'n Node>, parent: &Node, reason: &'static str) -> CResult<&'n Node> {
    child.ok_or_else(|| malformed(parent, reason))
}

fn name_of(node: &Node) -> CResult<&str> {
    node.name().ok_or_else(|| malformed(node, "missing identifier"))
}

fn decision_of(node: &Node) -> CResult<&Node> {
    let decision = child(node.right.as_deref(), node, "missing branches")?;
    if decision.kind != NodeKind::Decision {
        return Err(malformed(decision, "expected a Decision node"));
    }
    Ok(decision)
}

fn param_names(first: Option<&Node>) -> CResult<Vec<String>> {
    Node::parameter_chain(first)
        .map(|param| {
            if param.kind != NodeKind::Parameter {
                return Err(malformed(param, "expected a parameter list"));
            }
            name_of(param).map(str::to_string)
        })
        .collect()
}

fn binary_opcode(node: &Node) -> CResult<u8> {
    let op = match node.token.as_deref() {
        Some(Token::Plus) => OP_ADD,
        Some(Token::Minus) => OP_MIN,
        Some(Token::Star) => OP_MUL,
        Some(Token::Slash) => OP_DIV,
        Some(Token::EqEq) => OP_DEQ,
        Some(Token::NotEq) => OP_NEQ,
        Some(Token::Greater) => OP_GRE,
        Some(Token::GreaterEq) => OP_GRQ,
        Some(Token::Less) => OP_LES,
        Some(Token::LessEq) => OP_LEQ,
        Some(Token::And) => OP_AND,
        Some(Token::Or) => OP_OR,
        _ => return Err(malformed(node, "unknown binary operator")),
    };
    Ok(op)
}
