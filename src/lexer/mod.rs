use logos::Logos;
use serde::{Deserialize, Serialize};

use crate::ast::{Span, Spanned};

#[derive(Logos, Debug, PartialEq, Clone, Serialize, Deserialize)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip(r"#[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("var")]
    Var,
    #[token("fun")]
    Fun,
    #[token("class")]
    Class,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Bang,
    #[token("=")]
    Assign,

    // Punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semi,

    // Literals. Integers outside the 32-bit range fail to lex.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    Number(i32),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len() - 1].to_string())
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Short human-readable form used in parser messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Str(s) => format!("string \"{s}\""),
            Token::Ident(name) => format!("identifier '{name}'"),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::Var => "var",
            Token::Fun => "fun",
            Token::Class => "class",
            Token::Return => "return",
            Token::If => "if",
            Token::Else => "else",
            Token::While => "while",
            Token::True => "true",
            Token::False => "false",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::And => "&&",
            Token::Or => "||",
            Token::Bang => "!",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Semi => ";",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) => "literal",
        }
    }
}

/// Lex source code into a stream of tokens with their spans.
pub fn lex(source: &str) -> Result<Vec<Spanned<Token>>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(Spanned::new(token, Span::from(lexer.span()))),
            Err(()) => {
                let span = lexer.span();
                let snippet = source[span.clone()].to_string();
                return Err(LexError {
                    span: Span::from(span),
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "Close the string literal with '\"'.".to_string()
    } else if bad_token.bytes().all(|b| b.is_ascii_digit()) {
        "Integer literals must fit in 32 bits.".to_string()
    } else if bad_token == "&" || bad_token == "|" {
        format!("Use '{bad_token}{bad_token}' for the logical operator.")
    } else {
        format!("Unexpected character(s): '{bad_token}'.")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("lex error at byte {}: '{snippet}'. {suggestion}", span.start)]
pub struct LexError {
    pub span: Span,
    pub snippet: String,
    pub suggestion: String,
}

impl LexError {
    pub fn code(&self) -> &'static str {
        "PITH-L001"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        lex(source).unwrap().into_iter().map(|t| t.node).collect()
    }

    #[test]
    fn lex_function_declaration() {
        assert_eq!(
            kinds("fun add(a, b) { return a + b }"),
            vec![
                Token::Fun,
                Token::Ident("add".into()),
                Token::LParen,
                Token::Ident("a".into()),
                Token::Comma,
                Token::Ident("b".into()),
                Token::RParen,
                Token::LBrace,
                Token::Return,
                Token::Ident("a".into()),
                Token::Plus,
                Token::Ident("b".into()),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn keywords_win_over_identifiers() {
        assert_eq!(kinds("while whilex"), vec![Token::While, Token::Ident("whilex".into())]);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("a <= b == c != d >= e && f || !g"),
            vec![
                Token::Ident("a".into()),
                Token::LessEq,
                Token::Ident("b".into()),
                Token::EqEq,
                Token::Ident("c".into()),
                Token::NotEq,
                Token::Ident("d".into()),
                Token::GreaterEq,
                Token::Ident("e".into()),
                Token::And,
                Token::Ident("f".into()),
                Token::Or,
                Token::Bang,
                Token::Ident("g".into()),
            ]
        );
    }

    #[test]
    fn string_literal_and_spans() {
        let tokens = lex(r#"print("hi there")"#).unwrap();
        assert_eq!(tokens[2].node, Token::Str("hi there".into()));
        assert_eq!(tokens[2].span, Span { start: 6, end: 16 });
    }

    #[test]
    fn comment_ignored() {
        assert_eq!(kinds("# nothing here\n42"), vec![Token::Number(42)]);
    }

    #[test]
    fn number_out_of_range_is_an_error() {
        let err = lex("x = 99999999999").unwrap_err();
        assert_eq!(err.snippet, "99999999999");
        assert_eq!(err.span.start, 4);
    }

    #[test]
    fn unexpected_character() {
        let err = lex("a & b").unwrap_err();
        assert!(err.snippet.starts_with('&'));
        assert_eq!(err.span.start, 2);
    }
}
