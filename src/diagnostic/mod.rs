pub mod ansi;
pub mod json;
pub mod registry;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

/// A reportable failure from any stage, rendered by [`ansi`] or [`json`].
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic { severity: Severity::Warning, ..Diagnostic::error(message) }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: true });
        self
    }

    pub fn with_secondary_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into(), is_primary: false });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for each stage's error type ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span { start: e.span.start, end: e.span.end.max(e.span.start + 1) };
        let mut d = Diagnostic::error(format!("unexpected character '{}'", e.snippet))
            .with_code(e.code())
            .with_span(span, "not part of the language");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&crate::compiler::CompileError> for Diagnostic {
    fn from(e: &crate::compiler::CompileError) -> Self {
        use crate::compiler::CompileError;

        let label = match e {
            CompileError::UndefinedVariable { .. } => "not declared in any visible scope",
            CompileError::UndefinedFunction { .. } => "no function, class or built-in by this name",
            CompileError::UndefinedMember { .. } => "unknown member",
            CompileError::CapacityExceeded { .. } => "limit reached here",
            CompileError::MalformedTree { .. } => "here",
        };
        let d = Diagnostic::error(e.to_string()).with_code(e.code()).with_span(e.span(), label);
        match e {
            CompileError::CapacityExceeded { .. } => {
                d.with_suggestion("raise the compiler limits with --config")
            }
            CompileError::UndefinedVariable { name, .. } => {
                d.with_note(format!("assign `{name} = ...` or declare `var {name}` before using it"))
            }
            _ => d,
        }
    }
}

impl From<&crate::vm::RuntimeError> for Diagnostic {
    fn from(e: &crate::vm::RuntimeError) -> Self {
        use crate::vm::VmError;

        let d = Diagnostic::error(e.kind.to_string())
            .with_code(e.code())
            .with_note(format!("while executing {} at code offset {}", e.op, e.pc));
        match &e.kind {
            VmError::OutOfMemory { .. } => d.with_suggestion("raise the heap capacity with --heap-capacity"),
            VmError::StackOverflow { .. } => d.with_suggestion("raise the stack capacity with --stack-capacity"),
            _ => d,
        }
    }
}

impl From<&crate::bytecode::DecodeError> for Diagnostic {
    fn from(e: &crate::bytecode::DecodeError) -> Self {
        Diagnostic::error(format!("invalid program: {e}")).with_code("PITH-R008")
    }
}

impl From<&crate::config::ConfigError> for Diagnostic {
    fn from(e: &crate::config::ConfigError) -> Self {
        Diagnostic::error(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler, lexer, parser};

    fn first_error(source: &str) -> Diagnostic {
        let tokens = match lexer::lex(source) {
            Ok(tokens) => tokens,
            Err(e) => return Diagnostic::from(&e),
        };
        let tree = match parser::parse(tokens) {
            Ok(tree) => tree,
            Err(e) => return Diagnostic::from(&e),
        };
        match compiler::compile(tree.as_deref()) {
            Ok(_) => panic!("expected {source:?} to fail"),
            Err(e) => Diagnostic::from(&e),
        }
    }

    #[test]
    fn builder_collects_labels_and_notes() {
        let d = Diagnostic::error("bad")
            .with_code("PITH-C001")
            .with_span(Span { start: 0, end: 1 }, "primary")
            .with_secondary_span(Span { start: 4, end: 6 }, "secondary")
            .with_note("one")
            .with_suggestion("try this");
        assert_eq!(d.code, Some("PITH-C001"));
        assert_eq!(d.labels.len(), 2);
        assert!(d.labels[0].is_primary);
        assert!(!d.labels[1].is_primary);
        assert_eq!(d.notes, vec!["one"]);
        assert_eq!(d.suggestion.as_deref(), Some("try this"));
    }

    #[test]
    fn warning_keeps_builder_defaults() {
        let d = Diagnostic::warning("unused");
        assert_eq!(d.severity, Severity::Warning);
        assert!(d.labels.is_empty());
    }

    #[test]
    fn lex_error_points_at_the_character() {
        let d = first_error("x = 1 $ 2");
        assert_eq!(d.code, Some("PITH-L001"));
        assert_eq!(d.labels[0].span.start, 6);
        assert!(d.message.contains('$'));
    }

    #[test]
    fn parse_error_keeps_its_code() {
        let d = first_error("var = 3;");
        assert_eq!(d.code, Some("PITH-P002"));
        assert_eq!(d.labels.len(), 1);
    }

    #[test]
    fn compile_error_labels_the_name() {
        let d = first_error("print(y);");
        assert_eq!(d.code, Some("PITH-C001"));
        assert_eq!(d.labels[0].span, Span { start: 6, end: 7 });
        assert!(d.notes[0].contains("var y"));
    }

    #[test]
    fn runtime_error_notes_the_instruction() {
        use crate::vm::{RuntimeError, VmError};

        let e = RuntimeError { op: "DIV", pc: 10, kind: VmError::DivisionByZero };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("PITH-R002"));
        assert_eq!(d.message, "division by zero");
        assert_eq!(d.notes, vec!["while executing DIV at code offset 10"]);
        assert!(d.labels.is_empty());
    }
}
