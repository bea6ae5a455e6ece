use crate::ast::SourceMap;
use super::{Diagnostic, Label, Severity};

/// Human-readable rendering with an optional source excerpt under the header.
pub struct AnsiRenderer {
    pub use_color: bool,
    /// Shown in the `-->` line in place of a bare position.
    pub path: Option<String>,
}

impl AnsiRenderer {
    pub fn plain() -> Self {
        AnsiRenderer { use_color: false, path: None }
    }

    fn paint(&self, style: &str, s: &str) -> String {
        if self.use_color { format!("\x1b[{style}m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }

    fn bold_red(&self, s: &str) -> String {
        self.paint("1;31", s)
    }

    fn bold_yellow(&self, s: &str) -> String {
        self.paint("1;33", s)
    }

    fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[PITH-C001]: message"
        let word = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let heading = match d.code {
            Some(code) => format!("{word}[{code}]"),
            None => word.to_string(),
        };
        let heading = match d.severity {
            Severity::Error => self.bold_red(&heading),
            Severity::Warning => self.bold_yellow(&heading),
        };
        out.push_str(&format!("{heading}: {}\n", self.bold(&d.message)));

        let primary = d.labels.iter().find(|l| l.is_primary);
        if let (Some(label), Some(source)) = (primary, &d.source) {
            self.excerpt(&mut out, label, source);
        }

        let secondary_map = d.source.as_deref().map(SourceMap::new);
        for label in d.labels.iter().filter(|l| !l.is_primary) {
            let at = match &secondary_map {
                Some(map) => format!(" (at {})", map.position(label.span)),
                None => String::new(),
            };
            out.push_str(&format!("  {} {}{at}\n", self.dim("="), label.message));
        }

        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} help: {}\n", self.dim("="), suggestion));
        }

        out
    }

    /// Source line of the label with carets under the span.
    fn excerpt(&self, out: &mut String, label: &Label, source: &str) {
        let map = SourceMap::new(source);
        let (line, col) = map.lookup(label.span.start);
        let line_text = map.line_text(source, line);

        let location = match &self.path {
            Some(path) => format!("{path}:{line}:{col}"),
            None => format!("{line}:{col}"),
        };
        out.push_str(&format!("  {} {location}\n", self.cyan("-->")));

        let gutter = line.to_string().len();
        let pipe = self.cyan("|");
        let pad = " ".repeat(gutter);
        out.push_str(&format!("{pad} {pipe}\n"));
        out.push_str(&format!("{} {pipe} {line_text}\n", self.cyan(&format!("{line:>gutter$}"))));

        // Carets stop at the end of the line for spans that run past it.
        let indent = col.saturating_sub(1);
        let room = line_text.len().saturating_sub(indent).max(1);
        let width = label.span.end.saturating_sub(label.span.start).clamp(1, room);
        let carets = self.bold_red(&"^".repeat(width));
        let indent = " ".repeat(indent);
        if label.message.is_empty() {
            out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
        } else {
            out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    #[test]
    fn header_carries_the_code() {
        let d = Diagnostic::error("division by zero").with_code("PITH-R002");
        assert_eq!(AnsiRenderer::plain().render(&d), "error[PITH-R002]: division by zero\n");
    }

    #[test]
    fn excerpt_underlines_the_span() {
        let source = "var a = 1;\nprint(b);\n";
        let d = Diagnostic::error("undefined variable: b")
            .with_code("PITH-C001")
            .with_span(Span { start: 17, end: 18 }, "not declared")
            .with_source(source);
        let renderer = AnsiRenderer { use_color: false, path: Some("demo.pith".into()) };
        let expected = "\
error[PITH-C001]: undefined variable: b
  --> demo.pith:2:7
  |
2 | print(b);
  |       ^ not declared
";
        assert_eq!(renderer.render(&d), expected);
    }

    #[test]
    fn notes_and_help_follow_the_excerpt() {
        let d = Diagnostic::error("stack overflow")
            .with_note("while executing PUSH_NUM at code offset 10")
            .with_suggestion("raise the stack capacity");
        let out = AnsiRenderer::plain().render(&d);
        assert!(out.contains("= note: while executing PUSH_NUM"));
        assert!(out.ends_with("= help: raise the stack capacity\n"));
    }

    #[test]
    fn secondary_labels_show_their_position() {
        let d = Diagnostic::error("duplicate")
            .with_span(Span { start: 0, end: 3 }, "here")
            .with_secondary_span(Span { start: 4, end: 7 }, "first defined")
            .with_source("foo bar");
        let out = AnsiRenderer::plain().render(&d);
        assert!(out.contains("= first defined (at 1:5)"));
    }

    #[test]
    fn long_spans_are_clipped_to_the_line() {
        let d = Diagnostic::error("bad")
            .with_span(Span { start: 2, end: 40 }, "")
            .with_source("ab cd\nmore");
        let out = AnsiRenderer::plain().render(&d);
        assert!(out.contains("   ^^^\n"));
    }

    #[test]
    fn color_wraps_the_heading() {
        let d = Diagnostic::error("x");
        let out = AnsiRenderer { use_color: true, path: None }.render(&d);
        assert!(out.starts_with("\x1b[1;31merror\x1b[0m"));
    }
}
