//! Tokenizer for formulas.

use crate::ParseError;
use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Number(f64),
    StringLiteral(String),
    /// A backtick template, split into literal text and `${...}` sources
    Template(Vec<TemplateChunk>),

    // Keywords
    If,
    Then,
    Else,
    True,
    False,
    Null,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Dot,
    Comma,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    Eof,
}

/// Raw piece of a template literal
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    /// Source of an interpolated expression and its offset in the formula
    Expr { source: String, offset: usize },
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "identifier '{s}'"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::StringLiteral(s) => write!(f, "string '{s}'"),
            Token::Template(_) => write!(f, "template"),
            Token::If => write!(f, "'if'"),
            Token::Then => write!(f, "'then'"),
            Token::Else => write!(f, "'else'"),
            Token::True => write!(f, "'true'"),
            Token::False => write!(f, "'false'"),
            Token::Null => write!(f, "'null'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Percent => write!(f, "'%'"),
            Token::Bang => write!(f, "'!'"),
            Token::EqualEqual => write!(f, "'=='"),
            Token::NotEqual => write!(f, "'!='"),
            Token::Less => write!(f, "'<'"),
            Token::LessEqual => write!(f, "'<='"),
            Token::Greater => write!(f, "'>'"),
            Token::GreaterEqual => write!(f, "'>='"),
            Token::AndAnd => write!(f, "'&&'"),
            Token::OrOr => write!(f, "'||'"),
            Token::Question => write!(f, "'?'"),
            Token::Colon => write!(f, "':'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
            Token::LeftParen => write!(f, "'('"),
            Token::RightParen => write!(f, "')'"),
            Token::LeftBrace => write!(f, "'{{'"),
            Token::RightBrace => write!(f, "'}}'"),
            Token::LeftBracket => write!(f, "'['"),
            Token::RightBracket => write!(f, "']'"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// A token and the character offset it starts at
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Lexer for formulas.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_offset(input, 0)
    }

    /// Lexer whose reported positions start at `offset`
    pub fn with_offset(input: &'a str, offset: usize) -> Self {
        Self {
            input: input.chars().peekable(),
            position: offset,
        }
    }

    /// Get all tokens from the input, ending with [`Token::Eof`].
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let position = self.position;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, position });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '?' => Token::Question,
            ':' => Token::Colon,
            '.' => Token::Dot,
            ',' => Token::Comma,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '{' => Token::LeftBrace,
            '}' => Token::RightBrace,
            '[' => Token::LeftBracket,
            ']' => Token::RightBracket,
            '!' if self.eat('=') => Token::NotEqual,
            '!' => Token::Bang,
            '=' if self.eat('=') => Token::EqualEqual,
            '<' if self.eat('=') => Token::LessEqual,
            '<' => Token::Less,
            '>' if self.eat('=') => Token::GreaterEqual,
            '>' => Token::Greater,
            '&' if self.eat('&') => Token::AndAnd,
            '|' if self.eat('|') => Token::OrOr,
            '\'' | '"' => self.read_string(ch)?,
            '`' => self.read_template()?,
            c if c.is_ascii_digit() => self.read_number(c)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.read_identifier(c),
            c => {
                return Err(ParseError::new(
                    format!("Unexpected character '{c}'"),
                    self.position - 1,
                ));
            }
        };
        Ok(token)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next()?;
        self.position += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.input.peek() == Some(&expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.input.peek().is_some_and(|c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_escape(&mut self, start: usize) -> Result<char, ParseError> {
        let unterminated = || ParseError::new("Unterminated string literal", start);
        match self.advance().ok_or_else(unterminated)? {
            'n' => Ok('\n'),
            't' => Ok('\t'),
            'r' => Ok('\r'),
            '0' => Ok('\0'),
            'u' => {
                let escape_pos = self.position;
                let hex: String = (0..4).filter_map(|_| self.advance()).collect();
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseError::new("Invalid \\u escape", escape_pos))
            }
            other => Ok(other),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, ParseError> {
        let start = self.position - 1;
        let mut value = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => return Ok(Token::StringLiteral(value)),
                Some('\\') => value.push(self.read_escape(start)?),
                Some(c) => value.push(c),
                None => return Err(ParseError::new("Unterminated string literal", start)),
            }
        }
    }

    fn read_template(&mut self) -> Result<Token, ParseError> {
        let start = self.position - 1;
        let mut chunks = Vec::new();
        let mut text = String::new();

        loop {
            match self.advance() {
                Some('`') => break,
                Some('\\') => text.push(self.read_escape(start)?),
                Some('$') if self.eat('{') => {
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    let offset = self.position;
                    let source = self.read_interpolation(offset)?;
                    chunks.push(TemplateChunk::Expr { source, offset });
                }
                Some(c) => text.push(c),
                None => return Err(ParseError::new("Unterminated template literal", start)),
            }
        }

        if !text.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        Ok(Token::Template(chunks))
    }

    /// Raw source up to the `}` closing a `${`, skipping nested braces and quotes
    fn read_interpolation(&mut self, start: usize) -> Result<String, ParseError> {
        let mut source = String::new();
        let mut depth = 0usize;
        let mut quote: Option<char> = None;

        while let Some(c) = self.advance() {
            match quote {
                Some(q) => {
                    source.push(c);
                    if c == '\\' {
                        if let Some(escaped) = self.advance() {
                            source.push(escaped);
                        }
                    } else if c == q {
                        quote = None;
                    }
                }
                None => match c {
                    '}' if depth == 0 => return Ok(source),
                    '}' => {
                        depth -= 1;
                        source.push(c);
                    }
                    '{' => {
                        depth += 1;
                        source.push(c);
                    }
                    '\'' | '"' | '`' => {
                        quote = Some(c);
                        source.push(c);
                    }
                    _ => source.push(c),
                },
            }
        }

        Err(ParseError::new("Unterminated '${' in template", start))
    }

    fn read_number(&mut self, first: char) -> Result<Token, ParseError> {
        let start = self.position - 1;
        let mut value = String::from(first);

        self.read_digits(&mut value);

        if self.input.peek() == Some(&'.') {
            value.push('.');
            self.advance();
            if !self.read_digits(&mut value) {
                return Err(ParseError::new(
                    "Expected digits after decimal point",
                    self.position,
                ));
            }
        }

        if matches!(self.input.peek(), Some('e' | 'E')) {
            value.push('e');
            self.advance();
            if let Some(&sign @ ('+' | '-')) = self.input.peek() {
                value.push(sign);
                self.advance();
            }
            if !self.read_digits(&mut value) {
                return Err(ParseError::new("Expected digits in exponent", self.position));
            }
        }

        value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Token::Number)
            .ok_or_else(|| ParseError::new("Invalid number", start))
    }

    fn read_digits(&mut self, value: &mut String) -> bool {
        let mut any = false;
        while let Some(&c) = self.input.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            value.push(c);
            self.advance();
            any = true;
        }
        any
    }

    fn read_identifier(&mut self, first: char) -> Token {
        let mut value = String::from(first);
        while let Some(&c) = self.input.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                value.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match value.as_str() {
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Identifier(value),
        }
    }
}
