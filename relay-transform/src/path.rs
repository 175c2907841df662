//! JSON path expressions.
//!
//! Supported syntax:
//!
//! | Form | Meaning |
//! |---|---|
//! | `$` | the document root (optional: `a.b` is `$.a.b`) |
//! | `.name`, `['name']`, `["name"]` | object member |
//! | `[2]`, `[-1]` | array element, negative counts from the end |
//! | `.*`, `[*]` | every member or element |
//! | `..name`, `..*` | recursive descent |
//! | `['a','b']`, `[0,2]` | union |
//! | `[1:3]`, `[::2]` | array slice |
//! | `[?(@.kind == 'sms' && @.size > 2)]` | filter over members or elements |
//!
//! Matches are returned in document order.

use crate::PathError;
use serde_json::Value;
use std::cmp::Ordering;

/// Nesting limit for filters inside filters
const MAX_FILTER_DEPTH: usize = 32;

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(Selector),
    Descendant(Selector),
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Name(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
    },
    Filter(Box<Filter>),
    Union(Vec<Selector>),
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Exists(Operand),
    Compare(Operand, CmpOp, Operand),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Current(Vec<Segment>),
    Root(Vec<Segment>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl JsonPath {
    /// Parse a path expression
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let mut parser = PathParser {
            chars: expr.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let segments = parser.parse_path()?;
        Ok(Self {
            source: expr.to_string(),
            segments,
        })
    }

    /// The expression text this path was parsed from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All matches in document order
    pub fn query<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        select(&self.segments, root, root)
    }

    /// The first match, if any
    pub fn first<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.query(root).into_iter().next()
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn select<'a>(segments: &[Segment], start: &'a Value, root: &'a Value) -> Vec<&'a Value> {
    let mut current = vec![start];
    for segment in segments {
        let mut next = Vec::new();
        for node in current {
            match segment {
                Segment::Child(selector) => apply(selector, node, root, &mut next),
                Segment::Descendant(selector) => {
                    let mut nodes = Vec::new();
                    descendants(node, &mut nodes);
                    for descendant in nodes {
                        apply(selector, descendant, root, &mut next);
                    }
                }
            }
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

fn descendants<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(node);
    match node {
        Value::Object(map) => map.values().for_each(|v| descendants(v, out)),
        Value::Array(items) => items.iter().for_each(|v| descendants(v, out)),
        _ => {}
    }
}

fn children(node: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match node {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => Box::new(std::iter::empty()),
    }
}

fn apply<'a>(selector: &Selector, node: &'a Value, root: &'a Value, out: &mut Vec<&'a Value>) {
    match selector {
        Selector::Name(name) => {
            if let Some(value) = node.as_object().and_then(|m| m.get(name)) {
                out.push(value);
            }
        }
        Selector::Index(index) => {
            if let Some(items) = node.as_array() {
                let len = items.len() as i64;
                let i = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&i) {
                    out.push(&items[i as usize]);
                }
            }
        }
        Selector::Wildcard => out.extend(children(node)),
        Selector::Slice { start, end, step } => {
            if let Some(items) = node.as_array() {
                for i in slice_indices(items.len() as i64, *start, *end, *step) {
                    out.push(&items[i]);
                }
            }
        }
        Selector::Filter(filter) => {
            out.extend(children(node).filter(|child| filter.matches(child, root)));
        }
        Selector::Union(selectors) => {
            for selector in selectors {
                apply(selector, node, root, out);
            }
        }
    }
}

fn slice_indices(len: i64, start: Option<i64>, end: Option<i64>, step: Option<i64>) -> Vec<usize> {
    let step = step.unwrap_or(1);
    if step == 0 || len == 0 {
        return Vec::new();
    }
    let normalize = |i: i64| if i >= 0 { i } else { len + i };

    let mut indices = Vec::new();
    if step > 0 {
        let lower = start.map(normalize).unwrap_or(0).clamp(0, len);
        let upper = end.map(normalize).unwrap_or(len).clamp(0, len);
        let mut i = lower;
        while i < upper {
            indices.push(i as usize);
            i += step;
        }
    } else {
        let upper = start.map(normalize).unwrap_or(len - 1).clamp(-1, len - 1);
        let lower = end.map(normalize).unwrap_or(-1).clamp(-1, len - 1);
        let mut i = upper;
        while i > lower {
            indices.push(i as usize);
            i += step;
        }
    }
    indices
}

impl Filter {
    fn matches(&self, current: &Value, root: &Value) -> bool {
        match self {
            Filter::Exists(operand) => operand.resolve(current, root).is_some(),
            Filter::Compare(left, op, right) => {
                compare(left.resolve(current, root), *op, right.resolve(current, root))
            }
            Filter::And(a, b) => a.matches(current, root) && b.matches(current, root),
            Filter::Or(a, b) => a.matches(current, root) || b.matches(current, root),
            Filter::Not(inner) => !inner.matches(current, root),
        }
    }
}

impl Operand {
    fn resolve<'a>(&'a self, current: &'a Value, root: &'a Value) -> Option<&'a Value> {
        match self {
            Operand::Current(segments) => select(segments, current, root).into_iter().next(),
            Operand::Root(segments) => select(segments, root, root).into_iter().next(),
            Operand::Literal(value) => Some(value),
        }
    }
}

fn compare(left: Option<&Value>, op: CmpOp, right: Option<&Value>) -> bool {
    let (a, b) = match (left, right) {
        (None, None) => return matches!(op, CmpOp::Eq | CmpOp::Le | CmpOp::Ge),
        (None, _) | (_, None) => return op == CmpOp::Ne,
        (Some(a), Some(b)) => (a, b),
    };

    match op {
        CmpOp::Eq => json_eq(a, b),
        CmpOp::Ne => !json_eq(a, b),
        CmpOp::Lt => ordering(a, b) == Some(Ordering::Less),
        CmpOp::Gt => ordering(a, b) == Some(Ordering::Greater),
        CmpOp::Le => ordering(a, b) == Some(Ordering::Less) || json_eq(a, b),
        CmpOp::Ge => ordering(a, b) == Some(Ordering::Greater) || json_eq(a, b),
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '$'
}

struct PathParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl PathParser {
    fn parse_path(&mut self) -> Result<Vec<Segment>, PathError> {
        self.skip_whitespace();
        if self.peek().is_none() {
            return Err(self.error("empty path expression"));
        }

        let mut segments = Vec::new();
        if !self.eat('$') {
            match self.peek() {
                Some('.') | Some('[') => {}
                Some(c) if is_name_char(c) => {
                    segments.push(Segment::Child(Selector::Name(self.read_name()?)));
                }
                Some(c) => return Err(self.error(format!("unexpected character '{c}'"))),
                None => {}
            }
        }

        self.parse_segments(&mut segments)?;
        self.skip_whitespace();
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected character '{c}'")));
        }
        Ok(segments)
    }

    fn parse_segments(&mut self, segments: &mut Vec<Segment>) -> Result<(), PathError> {
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    if self.eat('.') {
                        let selector = match self.peek() {
                            Some('*') => {
                                self.pos += 1;
                                Selector::Wildcard
                            }
                            Some('[') => self.parse_bracket()?,
                            Some(c) if is_name_char(c) => Selector::Name(self.read_name()?),
                            _ => return Err(self.error("expected a name, '*' or '[' after '..'")),
                        };
                        segments.push(Segment::Descendant(selector));
                    } else {
                        let selector = match self.peek() {
                            Some('*') => {
                                self.pos += 1;
                                Selector::Wildcard
                            }
                            Some(c) if is_name_char(c) => Selector::Name(self.read_name()?),
                            _ => return Err(self.error("expected a name or '*' after '.'")),
                        };
                        segments.push(Segment::Child(selector));
                    }
                }
                Some('[') => {
                    let selector = self.parse_bracket()?;
                    segments.push(Segment::Child(selector));
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_bracket(&mut self) -> Result<Selector, PathError> {
        self.expect('[')?;
        self.skip_whitespace();

        if self.eat('?') {
            self.enter()?;
            let filter = self.parse_or()?;
            self.depth -= 1;
            self.skip_whitespace();
            self.expect(']')?;
            return Ok(Selector::Filter(Box::new(filter)));
        }

        if self.eat('*') {
            self.skip_whitespace();
            self.expect(']')?;
            return Ok(Selector::Wildcard);
        }

        let mut members = Vec::new();
        loop {
            self.skip_whitespace();
            let member = match self.peek() {
                Some(q @ ('\'' | '"')) => Selector::Name(self.read_quoted(q)?),
                Some(c) if c.is_ascii_digit() || c == '-' || c == ':' => self.parse_index_or_slice()?,
                Some(c) => return Err(self.error(format!("unexpected character '{c}' in brackets"))),
                None => return Err(self.error("unterminated '['")),
            };
            members.push(member);
            self.skip_whitespace();
            if !self.eat(',') {
                break;
            }
        }
        self.expect(']')?;

        Ok(if members.len() == 1 {
            members.remove(0)
        } else {
            Selector::Union(members)
        })
    }

    fn parse_index_or_slice(&mut self) -> Result<Selector, PathError> {
        let start = self.read_optional_int()?;
        self.skip_whitespace();
        if !self.eat(':') {
            return start
                .map(Selector::Index)
                .ok_or_else(|| self.error("expected an index"));
        }
        self.skip_whitespace();
        let end = self.read_optional_int()?;
        self.skip_whitespace();
        let step = if self.eat(':') {
            self.skip_whitespace();
            self.read_optional_int()?
        } else {
            None
        };
        Ok(Selector::Slice { start, end, step })
    }

    fn parse_or(&mut self) -> Result<Filter, PathError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if !self.eat_str("||") {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
    }

    fn parse_and(&mut self) -> Result<Filter, PathError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            if !self.eat_str("&&") {
                return Ok(left);
            }
            let right = self.parse_unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Filter, PathError> {
        self.skip_whitespace();
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Filter::Not(Box::new(inner)));
        }

        if self.eat('(') {
            self.enter()?;
            let inner = self.parse_or()?;
            self.depth -= 1;
            self.skip_whitespace();
            self.expect(')')?;
            return Ok(inner);
        }

        let left = self.parse_operand()?;
        self.skip_whitespace();
        match self.parse_cmp_op() {
            Some(op) => {
                let right = self.parse_operand()?;
                Ok(Filter::Compare(left, op, right))
            }
            None => match left {
                Operand::Literal(_) => Err(self.error("expected a comparison operator")),
                path => Ok(Filter::Exists(path)),
            },
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, PathError> {
        self.skip_whitespace();
        match self.peek() {
            Some('@') => {
                self.pos += 1;
                let mut segments = Vec::new();
                self.parse_segments(&mut segments)?;
                Ok(Operand::Current(segments))
            }
            Some('$') => {
                self.pos += 1;
                let mut segments = Vec::new();
                self.parse_segments(&mut segments)?;
                Ok(Operand::Root(segments))
            }
            Some(q @ ('\'' | '"')) => Ok(Operand::Literal(Value::String(self.read_quoted(q)?))),
            Some(c) if c.is_ascii_digit() || c == '-' => self.read_number().map(Operand::Literal),
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                match self.read_name()?.as_str() {
                    "true" => Ok(Operand::Literal(Value::Bool(true))),
                    "false" => Ok(Operand::Literal(Value::Bool(false))),
                    "null" => Ok(Operand::Literal(Value::Null)),
                    other => Err(PathError::new(format!("unknown literal '{other}'"), start)),
                }
            }
            Some(c) => Err(self.error(format!("unexpected character '{c}' in filter"))),
            None => Err(self.error("unterminated filter")),
        }
    }

    fn parse_cmp_op(&mut self) -> Option<CmpOp> {
        const OPS: [(&str, CmpOp); 6] = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];
        OPS.iter()
            .find(|(text, _)| self.eat_str(text))
            .map(|(_, op)| *op)
    }

    fn read_name(&mut self) -> Result<String, PathError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, PathError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.next() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('u') => value.push(self.read_unicode_escape()?),
                    Some(c) => value.push(c),
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(PathError::new("unterminated string", start))
    }

    fn read_unicode_escape(&mut self) -> Result<char, PathError> {
        let start = self.pos;
        let hex: String = (0..4).filter_map(|_| self.next()).collect();
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| PathError::new("invalid \\u escape", start))
    }

    fn read_optional_int(&mut self) -> Result<Option<i64>, PathError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Ok(None);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| PathError::new(format!("invalid integer '{text}'"), start))
    }

    fn read_number(&mut self) -> Result<Value, PathError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::from(i));
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| PathError::new(format!("invalid number '{text}'"), start))
    }

    fn enter(&mut self) -> Result<(), PathError> {
        self.depth += 1;
        if self.depth > MAX_FILTER_DEPTH {
            return Err(self.error("filters nested too deeply"));
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = self
            .chars
            .get(self.pos..self.pos + len)
            .is_some_and(|window| window.iter().copied().eq(s.chars()));
        if matches {
            self.pos += len;
        }
        matches
    }

    fn expect(&mut self, c: char) -> Result<(), PathError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> PathError {
        PathError::new(message, self.pos)
    }
}
