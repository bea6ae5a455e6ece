use super::Span;

/// Line index over a source text, for turning byte offsets into positions.
pub struct SourceMap {
    /// Byte offset at which each line begins; always starts with 0.
    starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        SourceMap { starts }
    }

    /// 1-based `(line, col)` of a byte offset. A newline belongs to the line it ends.
    pub fn lookup(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset).max(1) - 1;
        (line + 1, offset - self.starts[line] + 1)
    }

    /// `line:col` of the start of a span.
    pub fn position(&self, span: Span) -> String {
        let (line, col) = self.lookup(span.start);
        format!("{line}:{col}")
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Text of a 1-based line without its terminator; empty when out of range.
    pub fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let Some(&start) = line.checked_sub(1).and_then(|i| self.starts.get(i)) else {
            return "";
        };
        let end = self.starts.get(line).map_or(source.len(), |&next| next - 1);
        source[start..end].trim_end_matches('\r')
    }
}
