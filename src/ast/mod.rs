use serde::{Deserialize, Serialize};

use crate::lexer::Token;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(range: std::ops::Range<usize>) -> Self {
        Span { start: range.start, end: range.end }
    }
}

/// Wraps a value with its source span. Transparent to serde (serializes as inner value only).
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Spanned { node, span }
    }

    pub fn unknown(node: T) -> Self {
        Spanned { node, span: Span::UNKNOWN }
    }
}

impl<T> std::ops::Deref for Spanned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.node
    }
}

impl<T: Serialize> Serialize for Spanned<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Spanned<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(|node| Spanned { node, span: Span::UNKNOWN })
    }
}

// ---- Syntax tree ----

/// Every shape the parser produces. The child layout per kind is fixed:
///
/// | kind          | token          | left               | right                  |
/// |---------------|----------------|--------------------|------------------------|
/// | Statement     |                | statement          | next Statement         |
/// | BinaryOp      | operator       | lhs                | rhs                    |
/// | Not / Negate  | operator       | operand            |                        |
/// | Declaration   | name           | value              |                        |
/// | Assign        | `=`            | Var/Member/Index   | value                  |
/// | ExpStatement  |                | expression         |                        |
/// | If / While    | keyword        | condition          | Decision               |
/// | Decision      |                | then/body chain    | else chain             |
/// | Function      | name           | first Parameter    | body chain             |
/// | Method        | name           | first Parameter    | body chain             |
/// | Parameter     | name           | next Parameter     |                        |
/// | FunctionCall  | `(`            | callee             | first Argument         |
/// | Argument      |                | expression         | next Argument          |
/// | Return        | `return`       | value              |                        |
/// | Member        | field name     | object             |                        |
/// | Index         | `[`            | object             | key                    |
/// | Class         | name           | first member       | Statement chain of Method |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Number,
    String,
    Bool,
    Var,
    BinaryOp,
    Not,
    Negate,
    If,
    Decision,
    While,
    Assign,
    Declaration,
    Statement,
    ExpStatement,
    FunctionCall,
    Argument,
    Function,
    Parameter,
    Return,
    Member,
    Index,
    Class,
    Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Spanned<Token>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<Box<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<Box<Node>>,
}

impl Node {
    pub fn new(
        kind: NodeKind,
        token: Option<Spanned<Token>>,
        left: Option<Box<Node>>,
        right: Option<Box<Node>>,
    ) -> Box<Node> {
        Box::new(Node { kind, token, left, right })
    }

    pub fn leaf(kind: NodeKind, token: Spanned<Token>) -> Box<Node> {
        Node::new(kind, Some(token), None, None)
    }

    /// Links a list of statements into a right-leaning `Statement` chain.
    pub fn statements(items: Vec<Box<Node>>) -> Option<Box<Node>> {
        items
            .into_iter()
            .rev()
            .fold(None, |next, item| Some(Node::new(NodeKind::Statement, None, Some(item), next)))
    }

    /// Links parameter names into a left-leaning `Parameter` chain.
    pub fn parameters(names: Vec<Spanned<Token>>) -> Option<Box<Node>> {
        names
            .into_iter()
            .rev()
            .fold(None, |next, name| Some(Node::new(NodeKind::Parameter, Some(name), next, None)))
    }

    /// Links call arguments into a right-leaning `Argument` chain.
    pub fn arguments(items: Vec<Box<Node>>) -> Option<Box<Node>> {
        items
            .into_iter()
            .rev()
            .fold(None, |next, item| Some(Node::new(NodeKind::Argument, None, Some(item), next)))
    }

    /// Identifier text carried by the token, if any.
    pub fn name(&self) -> Option<&str> {
        match self.token.as_deref() {
            Some(Token::Ident(name)) => Some(name),
            _ => None,
        }
    }

    pub fn span(&self) -> Span {
        self.token.as_ref().map(|t| t.span).unwrap_or(Span::UNKNOWN)
    }

    /// Walks a `Statement` (or `Argument`) chain and yields the `left` payloads in order.
    pub fn chain(first: Option<&Node>) -> ChainIter<'_> {
        ChainIter { next: first }
    }

    /// Walks a `Parameter` chain, which links through `left`.
    pub fn parameter_chain(first: Option<&Node>) -> ParamIter<'_> {
        ParamIter { next: first }
    }
}

pub struct ChainIter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        loop {
            let link = self.next?;
            self.next = link.right.as_deref();
            if let Some(item) = link.left.as_deref() {
                return Some(item);
            }
        }
    }
}

pub struct ParamIter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for ParamIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let param = self.next?;
        self.next = param.left.as_deref();
        Some(param)
    }
}

// Long statement chains would otherwise recurse once per link on drop.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending: Vec<Box<Node>> = Vec::new();
        pending.extend(self.left.take());
        pending.extend(self.right.take());
        while let Some(mut node) = pending.pop() {
            pending.extend(node.left.take());
            pending.extend(node.right.take());
        }
    }
}
