//! pith: a small scripting language compiled to bytecode and run on a stack
//! VM with a mark-sweep heap.
//!
//! The pipeline is [`lexer::lex`] → [`parser::parse`] → [`compiler::compile`]
//! → [`vm::Vm::run`]. Each stage has its own error type; all of them convert
//! into a [`diagnostic::Diagnostic`].

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod vm;

use ast::Node;
use bytecode::Program;
use config::CompilerLimits;
use diagnostic::Diagnostic;

/// Lexes and parses `source`. Errors carry the source for rendering.
pub fn parse_source(source: &str) -> Result<Option<Box<Node>>, Diagnostic> {
    let tokens = lexer::lex(source).map_err(|e| Diagnostic::from(&e).with_source(source))?;
    parser::parse(tokens).map_err(|e| Diagnostic::from(&e).with_source(source))
}

/// Runs the front end and the compiler over `source`.
pub fn compile_source(source: &str, limits: &CompilerLimits) -> Result<Program, Diagnostic> {
    let tree = parse_source(source)?;
    compiler::compile_with(tree.as_deref(), limits).map_err(|e| Diagnostic::from(&e).with_source(source))
}
