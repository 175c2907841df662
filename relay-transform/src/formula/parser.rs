//! Recursive descent parser for formulas.
//!
//! Parses tokens into an [`Expr`] tree. Tree depth is capped at
//! [`MAX_DEPTH`], counting nesting as well as operator chains, so both
//! parsing and evaluation recurse a bounded number of times.

use super::ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
use super::evaluator::number_value;
use super::lexer::{Lexer, Spanned, TemplateChunk, Token};
use crate::ParseError;
use serde_json::Value;

/// Deepest syntax tree a formula may produce
pub const MAX_DEPTH: usize = 128;

/// Parser for formulas.
pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    depth: usize,
}

impl Parser {
    /// Parse a formula string.
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        Self::parse_nested(input, 0, 0)
    }

    fn parse_nested(input: &str, offset: usize, depth: usize) -> Result<Expr, ParseError> {
        let tokens = Lexer::with_offset(input, offset).tokenize()?;
        let mut parser = Parser {
            tokens,
            position: 0,
            depth,
        };
        let expr = parser.parse_expression()?;

        if !parser.is_at_end() {
            return Err(parser.error(format!(
                "Unexpected {} after expression",
                parser.current_token()
            )));
        }

        Ok(expr)
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let expr = if self.match_token(&Token::If) {
            let condition = self.parse_expression()?;
            self.expect(&Token::Then, "'then'")?;
            let then = self.parse_expression()?;
            self.expect(&Token::Else, "'else'")?;
            let otherwise = self.parse_expression()?;
            Expr::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            self.parse_ternary()?
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_or()?;
        if !self.match_token(&Token::Question) {
            return Ok(condition);
        }
        let then = self.parse_expression()?;
        self.expect(&Token::Colon, "':'")?;
        let otherwise = self.parse_expression()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(&[(Token::OrOr, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(&[(Token::AndAnd, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            &[
                (Token::EqualEqual, BinaryOp::Equal),
                (Token::NotEqual, BinaryOp::NotEqual),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            &[
                (Token::Less, BinaryOp::Less),
                (Token::LessEqual, BinaryOp::LessEqual),
                (Token::Greater, BinaryOp::Greater),
                (Token::GreaterEqual, BinaryOp::GreaterEqual),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            &[
                (Token::Plus, BinaryOp::Add),
                (Token::Minus, BinaryOp::Subtract),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            &[
                (Token::Star, BinaryOp::Multiply),
                (Token::Slash, BinaryOp::Divide),
                (Token::Percent, BinaryOp::Remainder),
            ],
            Self::parse_unary,
        )
    }

    /// One left-associative precedence level
    fn parse_binary(
        &mut self,
        operators: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = next(self)?;
        let base = self.depth;

        while let Some(op) = self.match_operator(operators) {
            self.descend()?;
            let right = next(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = if self.match_token(&Token::Bang) {
            UnaryOp::Not
        } else if self.match_token(&Token::Minus) {
            UnaryOp::Negate
        } else {
            return self.parse_postfix();
        };

        self.descend()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let base = self.depth;

        loop {
            if self.match_token(&Token::Dot) {
                self.descend()?;
                let name = self.expect_name()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.match_token(&Token::LeftBracket) {
                self.descend()?;
                let index = self.parse_expression()?;
                self.expect(&Token::RightBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }

        self.depth = base;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        match self.advance() {
            Token::Number(n) => number_value(n)
                .map(Expr::Literal)
                .ok_or_else(|| ParseError::new("Invalid number", position)),
            Token::StringLiteral(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Template(chunks) => self.parse_template(chunks),
            Token::Identifier(name) => {
                if self.match_token(&Token::LeftParen) {
                    let args = self.parse_list(&Token::RightParen, "')'")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(field_reference(name))
                }
            }
            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(expr)
            }
            Token::LeftBrace => self.parse_object(),
            Token::LeftBracket => {
                let items = self.parse_list(&Token::RightBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            token => Err(ParseError::new(format!("Unexpected {token}"), position)),
        }
    }

    fn parse_template(&mut self, chunks: Vec<TemplateChunk>) -> Result<Expr, ParseError> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Expr { source, offset } => {
                    let expr = Self::parse_nested(&source, offset, self.depth + 1)?;
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed
    fn parse_list(&mut self, close: &Token, describe: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(self.parse_expression()?);
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        self.expect(close, describe)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        while !self.check(&Token::RightBrace) {
            let position = self.current_position();
            let (key, shorthand) = match self.advance() {
                Token::Identifier(name) => (name, true),
                Token::StringLiteral(s) => (s, false),
                Token::Number(n) => (format_key(n), false),
                token => match keyword_text(&token) {
                    Some(text) => (text.to_string(), false),
                    None => {
                        return Err(ParseError::new(
                            format!("Expected object key, found {token}"),
                            position,
                        ));
                    }
                },
            };

            let value = if self.match_token(&Token::Colon) {
                self.parse_expression()?
            } else if shorthand {
                field_reference(key.clone())
            } else {
                return Err(self.error(format!("Expected ':' after key '{key}'")));
            };
            entries.push((key, value));

            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RightBrace, "'}'")?;
        Ok(Expr::Object(entries))
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        let position = self.current_position();
        match self.advance() {
            Token::Identifier(name) => Ok(name),
            token => keyword_text(&token)
                .map(str::to_string)
                .ok_or_else(|| ParseError::new(format!("Expected member name, found {token}"), position)),
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!("Expression nested deeper than {MAX_DEPTH} levels")));
        }
        Ok(())
    }

    fn match_operator(&mut self, operators: &[(Token, BinaryOp)]) -> Option<BinaryOp> {
        let current = &self.tokens.get(self.position)?.token;
        let op = operators
            .iter()
            .find(|(token, _)| token == current)
            .map(|(_, op)| *op)?;
        self.advance();
        Some(op)
    }

    fn expect(&mut self, token: &Token, describe: &str) -> Result<(), ParseError> {
        if self.match_token(token) {
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected {describe}, found {}",
                self.current_token()
            )))
        }
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(&self.current_token()) == std::mem::discriminant(token)
    }

    fn advance(&mut self) -> Token {
        let token = self.current_token();
        if !self.is_at_end() {
            self.position += 1;
        }
        token
    }

    fn current_token(&self) -> Token {
        self.tokens
            .get(self.position)
            .map(|s| s.token.clone())
            .unwrap_or(Token::Eof)
    }

    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map(|s| s.position)
            .unwrap_or(0)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_token(), Token::Eof)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.current_position())
    }
}

fn field_reference(name: String) -> Expr {
    if name == "fields" {
        Expr::Fields
    } else {
        Expr::Field(name)
    }
}

fn keyword_text(token: &Token) -> Option<&'static str> {
    match token {
        Token::If => Some("if"),
        Token::Then => Some("then"),
        Token::Else => Some("else"),
        Token::True => Some("true"),
        Token::False => Some("false"),
        Token::Null => Some("null"),
        _ => None,
    }
}

fn format_key(n: f64) -> String {
    match number_value(n) {
        Some(Value::Number(num)) => num.to_string(),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> Box<Expr> {
        Box::new(Expr::Field(name.into()))
    }

    fn lit(value: Value) -> Box<Expr> {
        Box::new(Expr::Literal(value))
    }

    #[test]
    fn test_object_concat() {
        let expr = Parser::parse(r#"{ text: "Message: " + msg }"#).unwrap();
        assert_eq!(
            expr,
            Expr::Object(vec![(
                "text".into(),
                Expr::Binary(BinaryOp::Add, lit(json!("Message: ")), field("msg")),
            )])
        );
    }

    #[test]
    fn test_precedence() {
        let expr = Parser::parse("a + b * c == d || e && f").unwrap();
        let expected = Expr::Binary(
            BinaryOp::Or,
            Box::new(Expr::Binary(
                BinaryOp::Equal,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    field("a"),
                    Box::new(Expr::Binary(BinaryOp::Multiply, field("b"), field("c"))),
                )),
                field("d"),
            )),
            Box::new(Expr::Binary(BinaryOp::And, field("e"), field("f"))),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_left_associative() {
        let expr = Parser::parse("a - b - c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Subtract,
                Box::new(Expr::Binary(BinaryOp::Subtract, field("a"), field("b"))),
                field("c"),
            )
        );
    }

    #[test]
    fn test_conditionals() {
        let ternary = Parser::parse("x ? 'a' : 'b'").unwrap();
        let keyword = Parser::parse("if x then 'a' else 'b'").unwrap();
        assert_eq!(ternary, keyword);
        assert!(matches!(ternary, Expr::Conditional { .. }));
    }

    #[test]
    fn test_postfix_and_fields() {
        let expr = Parser::parse("fields['odd key'].items[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Index(
                Box::new(Expr::Member(
                    Box::new(Expr::Index(Box::new(Expr::Fields), lit(json!("odd key")))),
                    "items".into(),
                )),
                lit(json!(0)),
            )
        );
    }

    #[test]
    fn test_calls_and_arrays() {
        let expr = Parser::parse("join([a, 'b',], ', ')").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "join".into(),
                vec![
                    Expr::Array(vec![Expr::Field("a".into()), Expr::Literal(json!("b"))]),
                    Expr::Literal(json!(", ")),
                ]
            )
        );
        assert_eq!(Parser::parse("now()").unwrap(), Expr::Call("now".into(), vec![]));
    }

    #[test]
    fn test_object_keys() {
        let expr = Parser::parse(r#"{ msg, "two words": 1, if: 2, 3: 4, }"#).unwrap();
        let Expr::Object(entries) = expr else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["msg", "two words", "if", "3"]);
        assert_eq!(entries[0].1, Expr::Field("msg".into()));
    }

    #[test]
    fn test_template() {
        let expr = Parser::parse("`Hi ${ upper(name) }!`").unwrap();
        assert_eq!(
            expr,
            Expr::Template(vec![
                TemplatePart::Text("Hi ".into()),
                TemplatePart::Expr(Expr::Call("upper".into(), vec![Expr::Field("name".into())])),
                TemplatePart::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_template_error_position() {
        let err = Parser::parse("`abc ${ + }`").unwrap_err();
        assert_eq!(err.position, 8);
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            Parser::parse("!-x").unwrap(),
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Unary(UnaryOp::Negate, field("x")))
            )
        );
    }

    #[test]
    fn test_syntax_errors() {
        for input in [
            "", "{", "{ a: }", "[1, 2", "a +", "(a", "a b", "if a then b", "a ? b", "{ 'k' }",
            "x.", "`${}`", "f(a,,b)",
        ] {
            assert!(Parser::parse(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_depth_limit() {
        let nested = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(Parser::parse(&nested).is_err());

        let chain = vec!["a"; 300].join(" + ");
        assert!(Parser::parse(&chain).is_err());

        let negations = format!("{}x", "!".repeat(300));
        assert!(Parser::parse(&negations).is_err());

        let ok = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert!(Parser::parse(&ok).is_ok());
        assert!(Parser::parse(&vec!["a"; 50].join(" + ")).is_ok());
    }

    #[test]
    fn test_referenced_fields() {
        let expr = Parser::parse("{ a: x + y, b: `${z}`, c: upper(x), d: fields.w }").unwrap();
        assert_eq!(expr.referenced_fields(), vec!["x", "y", "z"]);
    }
}
