use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parses a whole token stream into a `Statement` chain. An empty program yields `None`.
pub fn parse(tokens: Vec<Spanned<Token>>) -> Result<Option<Box<Node>>> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Spanned<Token>>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.node)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or(Span::UNKNOWN)
    }

    fn advance(&mut self) -> Option<Spanned<Token>> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == Some(expected)
    }

    fn eat(&mut self, expected: &Token) -> Option<Spanned<Token>> {
        if self.check(expected) { self.advance() } else { None }
    }

    fn expect(&mut self, expected: &Token) -> Result<Spanned<Token>> {
        match self.peek() {
            Some(tok) if tok == expected => self.advance().ok_or_else(|| self.eof(expected.describe())),
            Some(tok) => {
                let message = format!("expected {}, got {}", expected.describe(), tok.describe());
                Err(self.error("PITH-P001", message))
            }
            None => Err(self.eof(expected.describe())),
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<Token>> {
        match self.peek() {
            Some(Token::Ident(_)) => self.advance().ok_or_else(|| self.eof("identifier".into())),
            Some(tok) => {
                let message = format!("expected identifier, got {}", tok.describe());
                Err(self.error("PITH-P002", message))
            }
            None => Err(self.eof("identifier".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    fn eof(&self, expected: String) -> ParseError {
        self.error("PITH-P003", format!("expected {expected}, got end of input"))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- Statements ----

    pub fn parse_program(&mut self) -> Result<Option<Box<Node>>> {
        let mut statements = Vec::new();
        while !self.at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Node::statements(statements))
    }

    fn parse_block(&mut self) -> Result<Option<Box<Node>>> {
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_end() {
                return Err(self.eof(Token::RBrace.describe()));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Node::statements(statements))
    }

    fn parse_statement(&mut self) -> Result<Box<Node>> {
        let statement = match self.peek() {
            Some(Token::Var) => self.parse_declaration()?,
            Some(Token::Fun) => return self.parse_function(NodeKind::Function),
            Some(Token::Class) => return self.parse_class(),
            Some(Token::If) => return self.parse_if(),
            Some(Token::While) => return self.parse_while(),
            Some(Token::Return) => self.parse_return()?,
            Some(_) => self.parse_expression_statement()?,
            None => return Err(self.eof("statement".into())),
        };
        self.eat(&Token::Semi);
        Ok(statement)
    }

    fn parse_declaration(&mut self) -> Result<Box<Node>> {
        self.expect(&Token::Var)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let value = self.parse_expr()?;
        Ok(Node::new(NodeKind::Declaration, Some(name), Some(value), None))
    }

    fn parse_params(&mut self) -> Result<Option<Box<Node>>> {
        self.expect(&Token::LParen)?;
        let mut names = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                names.push(self.expect_ident()?);
                if self.eat(&Token::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Node::parameters(names))
    }

    /// `fun name(params) { body }`, shared by top-level functions and class methods.
    fn parse_function(&mut self, kind: NodeKind) -> Result<Box<Node>> {
        self.expect(&Token::Fun)?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(Node::new(kind, Some(name), params, body))
    }

    fn parse_class(&mut self) -> Result<Box<Node>> {
        self.expect(&Token::Class)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LBrace)?;
        let mut members = Vec::new();
        let mut methods = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => break,
                Some(Token::Var) => {
                    self.advance();
                    members.push(self.expect_ident()?);
                    self.eat(&Token::Semi);
                }
                Some(Token::Fun) => methods.push(self.parse_function(NodeKind::Method)?),
                Some(tok) => {
                    let message = format!("expected 'var' or 'fun' in class body, got {}", tok.describe());
                    return Err(self.error("PITH-P004", message));
                }
                None => return Err(self.eof(Token::RBrace.describe())),
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Node::new(
            NodeKind::Class,
            Some(name),
            Node::parameters(members),
            Node::statements(methods),
        ))
    }

    fn parse_if(&mut self) -> Result<Box<Node>> {
        let keyword = self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.eat(&Token::Else).is_some() {
            if self.check(&Token::If) {
                Node::statements(vec![self.parse_if()?])
            } else {
                self.parse_block()?
            }
        } else {
            None
        };
        let decision = Node::new(NodeKind::Decision, None, then_branch, else_branch);
        Ok(Node::new(NodeKind::If, Some(keyword), Some(condition), Some(decision)))
    }

    fn parse_while(&mut self) -> Result<Box<Node>> {
        let keyword = self.expect(&Token::While)?;
        let condition = self.parse_expr()?;
        let body = self.parse_block()?;
        let decision = Node::new(NodeKind::Decision, None, body, None);
        Ok(Node::new(NodeKind::While, Some(keyword), Some(condition), Some(decision)))
    }

    fn parse_return(&mut self) -> Result<Box<Node>> {
        let keyword = self.expect(&Token::Return)?;
        let value = if self.starts_expression() { Some(self.parse_expr()?) } else { None };
        Ok(Node::new(NodeKind::Return, Some(keyword), value, None))
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                Token::Number(_)
                    | Token::Str(_)
                    | Token::Ident(_)
                    | Token::True
                    | Token::False
                    | Token::LParen
                    | Token::Bang
                    | Token::Minus
            )
        )
    }

    fn parse_expression_statement(&mut self) -> Result<Box<Node>> {
        let expr = self.parse_expr()?;
        if let Some(assign) = self.eat(&Token::Assign) {
            if !matches!(expr.kind, NodeKind::Var | NodeKind::Member | NodeKind::Index) {
                return Err(ParseError {
                    code: "PITH-P005",
                    position: self.pos,
                    span: assign.span,
                    message: "invalid assignment target".into(),
                });
            }
            let value = self.parse_expr()?;
            return Ok(Node::new(NodeKind::Assign, Some(assign), Some(expr), Some(value)));
        }
        Ok(Node::new(NodeKind::ExpStatement, None, Some(expr), None))
    }

    // ---- Expressions ----

    pub fn parse_expr(&mut self) -> Result<Box<Node>> {
        self.parse_binary(0)
    }

    /// Precedence climbing over the binary operator levels, loosest first.
    fn parse_binary(&mut self, level: usize) -> Result<Box<Node>> {
        const LEVELS: &[&[Token]] = &[
            &[Token::Or],
            &[Token::And],
            &[Token::EqEq, Token::NotEq],
            &[Token::Less, Token::LessEq, Token::Greater, Token::GreaterEq],
            &[Token::Plus, Token::Minus],
            &[Token::Star, Token::Slash],
        ];
        let Some(operators) = LEVELS.get(level) else {
            return self.parse_unary();
        };
        let mut left = self.parse_binary(level + 1)?;
        while let Some(tok) = self.peek() {
            if !operators.contains(tok) {
                break;
            }
            let op = self.advance().ok_or_else(|| self.eof("operator".into()))?;
            let right = self.parse_binary(level + 1)?;
            left = Node::new(NodeKind::BinaryOp, Some(op), Some(left), Some(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Box<Node>> {
        let kind = match self.peek() {
            Some(Token::Bang) => NodeKind::Not,
            Some(Token::Minus) => NodeKind::Negate,
            _ => return self.parse_postfix(),
        };
        let op = self.advance();
        let operand = self.parse_unary()?;
        Ok(Node::new(kind, op, Some(operand), None))
    }

    fn parse_postfix(&mut self) -> Result<Box<Node>> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let open = self.advance();
                    let mut args = Vec::new();
                    if !self.check(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.eat(&Token::Comma).is_none() {
                                break;
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    expr = Node::new(NodeKind::FunctionCall, open, Some(expr), Node::arguments(args));
                }
                Some(Token::Dot) => {
                    self.advance();
                    let field = self.expect_ident()?;
                    expr = Node::new(NodeKind::Member, Some(field), Some(expr), None);
                }
                Some(Token::LBracket) => {
                    let open = self.advance();
                    let key = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Node::new(NodeKind::Index, open, Some(expr), Some(key));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Box<Node>> {
        let kind = match self.peek() {
            Some(Token::Number(_)) => NodeKind::Number,
            Some(Token::Str(_)) => NodeKind::String,
            Some(Token::True | Token::False) => NodeKind::Bool,
            Some(Token::Ident(_)) => NodeKind::Var,
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                return Ok(inner);
            }
            Some(tok) => {
                let message = format!("expected expression, got {}", tok.describe());
                return Err(self.error("PITH-P006", message));
            }
            None => return Err(self.eof("expression".into())),
        };
        let token = self.advance().ok_or_else(|| self.eof("expression".into()))?;
        Ok(Node::leaf(kind, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_str(source: &str) -> Box<Node> {
        parse(lex(source).unwrap()).unwrap().unwrap()
    }

    fn parse_err(source: &str) -> ParseError {
        parse(lex(source).unwrap()).unwrap_err()
    }

    fn first(source: &str) -> Box<Node> {
        let mut root = parse_str(source);
        root.left.take().unwrap()
    }

    #[test]
    fn empty_program() {
        assert!(parse(lex("  # only a comment").unwrap()).unwrap().is_none());
    }

    #[test]
    fn statements_are_right_chained() {
        let root = parse_str("var a = 1; var b = 2\nprint(a)");
        let kinds: Vec<_> = Node::chain(Some(&root)).map(|n| n.kind).collect();
        assert_eq!(kinds, [NodeKind::Declaration, NodeKind::Declaration, NodeKind::ExpStatement]);
    }

    #[test]
    fn precedence_multiplication_binds_tighter() {
        let stmt = first("1 + 2 * 3");
        let expr = stmt.left.as_deref().unwrap();
        assert_eq!(expr.kind, NodeKind::BinaryOp);
        assert_eq!(expr.token.as_deref(), Some(&Token::Plus));
        let rhs = expr.right.as_deref().unwrap();
        assert_eq!(rhs.token.as_deref(), Some(&Token::Star));
    }

    #[test]
    fn comparison_binds_tighter_than_logic() {
        let stmt = first("a < b && c == d");
        let expr = stmt.left.as_deref().unwrap();
        assert_eq!(expr.token.as_deref(), Some(&Token::And));
        assert_eq!(expr.left.as_deref().unwrap().token.as_deref(), Some(&Token::Less));
        assert_eq!(expr.right.as_deref().unwrap().token.as_deref(), Some(&Token::EqEq));
    }

    #[test]
    fn subtraction_is_left_associative() {
        let stmt = first("10 - 4 - 3");
        let expr = stmt.left.as_deref().unwrap();
        let lhs = expr.left.as_deref().unwrap();
        assert_eq!(lhs.kind, NodeKind::BinaryOp);
        assert_eq!(expr.right.as_deref().unwrap().token.as_deref(), Some(&Token::Number(3)));
    }

    #[test]
    fn if_else_shape() {
        let stmt = first("if x { a = 1 } else { a = 2 }");
        assert_eq!(stmt.kind, NodeKind::If);
        assert_eq!(stmt.left.as_deref().unwrap().kind, NodeKind::Var);
        let decision = stmt.right.as_deref().unwrap();
        assert_eq!(decision.kind, NodeKind::Decision);
        assert!(decision.left.is_some());
        assert!(decision.right.is_some());
    }

    #[test]
    fn else_if_nests_an_if_statement() {
        let stmt = first("if a { } else if b { } else { x = 1 }");
        let decision = stmt.right.as_deref().unwrap();
        assert!(decision.left.is_none());
        let nested: Vec<_> = Node::chain(decision.right.as_deref()).collect();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].kind, NodeKind::If);
    }

    #[test]
    fn while_shape() {
        let stmt = first("while i < 3 { i = i + 1 }");
        assert_eq!(stmt.kind, NodeKind::While);
        let decision = stmt.right.as_deref().unwrap();
        assert_eq!(Node::chain(decision.left.as_deref()).count(), 1);
        assert!(decision.right.is_none());
    }

    #[test]
    fn function_declaration_shape() {
        let stmt = first("fun add(a, b) { return a + b }");
        assert_eq!(stmt.kind, NodeKind::Function);
        assert_eq!(stmt.name(), Some("add"));
        let params: Vec<_> = Node::parameter_chain(stmt.left.as_deref())
            .filter_map(|p| p.name())
            .collect();
        assert_eq!(params, ["a", "b"]);
        let body: Vec<_> = Node::chain(stmt.right.as_deref()).map(|n| n.kind).collect();
        assert_eq!(body, [NodeKind::Return]);
    }

    #[test]
    fn call_arguments_in_order() {
        let stmt = first("f(1, x, \"s\")");
        let call = stmt.left.as_deref().unwrap();
        assert_eq!(call.kind, NodeKind::FunctionCall);
        assert_eq!(call.left.as_deref().unwrap().name(), Some("f"));
        let args: Vec<_> = Node::chain(call.right.as_deref()).map(|n| n.kind).collect();
        assert_eq!(args, [NodeKind::Number, NodeKind::Var, NodeKind::String]);
    }

    #[test]
    fn class_members_and_methods() {
        let stmt = first("class P { var x; var y fun sum() { return self.x + self.y } }");
        assert_eq!(stmt.kind, NodeKind::Class);
        let members: Vec<_> = Node::parameter_chain(stmt.left.as_deref())
            .filter_map(|p| p.name())
            .collect();
        assert_eq!(members, ["x", "y"]);
        let methods: Vec<_> = Node::chain(stmt.right.as_deref()).collect();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].kind, NodeKind::Method);
        assert_eq!(methods[0].name(), Some("sum"));
    }

    #[test]
    fn member_and_index_assignment_targets() {
        let stmt = first("p.x = 3");
        assert_eq!(stmt.kind, NodeKind::Assign);
        assert_eq!(stmt.left.as_deref().unwrap().kind, NodeKind::Member);

        let stmt = first("p[\"x\"] = 3");
        assert_eq!(stmt.left.as_deref().unwrap().kind, NodeKind::Index);
    }

    #[test]
    fn method_call_chain() {
        let stmt = first("a.b.c(1)");
        let call = stmt.left.as_deref().unwrap();
        assert_eq!(call.kind, NodeKind::FunctionCall);
        let callee = call.left.as_deref().unwrap();
        assert_eq!(callee.kind, NodeKind::Member);
        assert_eq!(callee.name(), Some("c"));
        assert_eq!(callee.left.as_deref().unwrap().kind, NodeKind::Member);
    }

    #[test]
    fn bare_return() {
        let stmt = first("fun f() { return }");
        let ret = Node::chain(stmt.right.as_deref()).next().unwrap();
        assert_eq!(ret.kind, NodeKind::Return);
        assert!(ret.left.is_none());
    }

    #[test]
    fn unary_operators() {
        let stmt = first("!-x");
        let not = stmt.left.as_deref().unwrap();
        assert_eq!(not.kind, NodeKind::Not);
        assert_eq!(not.left.as_deref().unwrap().kind, NodeKind::Negate);
    }

    #[test]
    fn invalid_assignment_target() {
        let err = parse_err("1 + 2 = 3");
        assert_eq!(err.code, "PITH-P005");
    }

    #[test]
    fn missing_closing_brace() {
        let err = parse_err("while true { x = 1");
        assert_eq!(err.code, "PITH-P003");
    }

    #[test]
    fn unexpected_token_in_expression() {
        let err = parse_err("x = )");
        assert_eq!(err.code, "PITH-P006");
        assert_eq!(err.span, Span { start: 4, end: 5 });
    }

    #[test]
    fn garbage_in_class_body() {
        let err = parse_err("class A { 1 }");
        assert_eq!(err.code, "PITH-P004");
    }
}
