// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reader for the flattened devicetree source (`zephyr/zephyr.dts`) written
//! into every Zephyr build directory.
//!
//! Only the subset emitted by the Zephyr devicetree tooling is understood:
//! nodes, labels, and string, cell and byte-string property values. Cell
//! expressions in parentheses are not supported; the generated file never
//! contains them.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
enum Token {
    /// Consumed by [`skip_block_comment`], never produced.
    #[token("/*", skip_block_comment)]
    BlockComment,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token("=")]
    Eq,
    #[token(",")]
    Comma,
    #[token("/")]
    Root,
    /// `/dts-v1/`, `/memreserve/` and friends.
    #[regex(r"/[a-z][a-z0-9\-]*/")]
    Directive,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*:", |lex| lex.slice().trim_end_matches(':').to_owned())]
    Label(String),
    #[regex(r"&[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_owned())]
    #[regex(r"&\{[^}]*\}", |lex| lex.slice()[2..lex.slice().len() - 1].to_owned())]
    Reference(String),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(&lex.slice()[1..lex.slice().len() - 1]))]
    Str(String),
    #[regex(r"[A-Za-z0-9_.+\-@#?][A-Za-z0-9_,.+\-@#?]*", |lex| lex.slice().to_owned())]
    Word(String),
}

fn skip_block_comment(lex: &mut logos::Lexer<Token>) -> logos::FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            logos::FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            logos::FilterResult::Error(())
        }
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// A parsed devicetree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Devicetree {
    root: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub path: String,
    pub labels: Vec<String>,
    pub properties: Vec<Property>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Cells(Vec<Cell>),
    Bytes(Vec<u8>),
    Reference(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Number(u64),
    Reference(String),
}

impl Devicetree {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        Parser::new(source)?.devicetree()
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// All nodes, depth first, parents before their children.
    pub fn nodes(&self) -> Vec<&Node> {
        let mut nodes = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            nodes.push(node);
            stack.extend(node.children.iter().rev());
        }
        nodes
    }
}

impl Node {
    fn new(name: String, path: String, labels: Vec<String>) -> Self {
        Self {
            name,
            path,
            labels,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        // A redefinition overrides the earlier definition.
        self.properties.iter().rev().find(|p| p.name == name)
    }

    /// The numeric cells of the `reg` property, `None` if the node has no
    /// `reg` or it contains anything but numbers.
    pub fn reg(&self) -> Option<Vec<u64>> {
        let mut cells = Vec::new();
        for value in &self.property("reg")?.values {
            let Value::Cells(value_cells) = value else {
                return None;
            };
            for cell in value_cells {
                match cell {
                    Cell::Number(n) => cells.push(*n),
                    Cell::Reference(_) => return None,
                }
            }
        }
        Some(cells)
    }

    fn merge(&mut self, other: Node) {
        for label in other.labels {
            if !self.labels.contains(&label) {
                self.labels.push(label);
            }
        }
        self.properties.extend(other.properties);
        for child in other.children {
            match self.children.iter_mut().find(|c| c.name == child.name) {
                Some(existing) => existing.merge(child),
                None => self.children.push(child),
            }
        }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ParseError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(source);
        while let Some(token) = lexer.next() {
            let offset = lexer.span().start;
            match token {
                Ok(token) => tokens.push((token, offset)),
                Err(()) if lexer.slice().starts_with("/*") => {
                    return Err(ParseError {
                        offset,
                        message: "unterminated comment".to_owned(),
                    })
                }
                Err(()) => {
                    return Err(ParseError {
                        offset,
                        message: format!("unexpected character {:?}", lexer.slice()),
                    })
                }
            }
        }
        Ok(Self {
            tokens,
            pos: 0,
            end: source.len(),
        })
    }

    fn devicetree(mut self) -> Result<Devicetree, ParseError> {
        let mut root = Node::new("/".to_owned(), "/".to_owned(), Vec::new());
        while let Some(token) = self.peek() {
            match token {
                Token::Directive => self.skip_statement()?,
                Token::Root | Token::Label(_) => {
                    let labels = self.labels();
                    self.expect(Token::Root)?;
                    let node = self.node_body("/".to_owned(), "/".to_owned(), labels)?;
                    root.merge(node);
                }
                _ => return Err(self.error("expected a directive or the root node")),
            }
        }
        Ok(Devicetree { root })
    }

    fn labels(&mut self) -> Vec<String> {
        let mut labels = Vec::new();
        while let Some(Token::Label(label)) = self.peek() {
            labels.push(label.clone());
            self.pos += 1;
        }
        labels
    }

    /// Parses `{ ... };` of a node whose name has been consumed already.
    fn node_body(
        &mut self,
        name: String,
        path: String,
        labels: Vec<String>,
    ) -> Result<Node, ParseError> {
        self.expect(Token::LBrace)?;
        let mut node = Node::new(name, path, labels);
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    self.expect(Token::Semi)?;
                    return Ok(node);
                }
                Some(Token::Directive) => self.skip_statement()?,
                Some(Token::Label(_)) | Some(Token::Word(_)) => self.item(&mut node)?,
                _ => return Err(self.error("expected a property, a child node or '}'")),
            }
        }
    }

    fn item(&mut self, parent: &mut Node) -> Result<(), ParseError> {
        let labels = self.labels();
        let name = match self.next() {
            Some(Token::Word(name)) => name,
            _ => return Err(self.error_prev("expected a node or property name")),
        };
        match self.peek() {
            Some(Token::LBrace) => {
                let path = if parent.path == "/" {
                    format!("/{name}")
                } else {
                    format!("{}/{name}", parent.path)
                };
                let child = self.node_body(name, path, labels)?;
                match parent.children.iter_mut().find(|c| c.name == child.name) {
                    Some(existing) => existing.merge(child),
                    None => parent.children.push(child),
                }
            }
            Some(Token::Semi) => {
                self.pos += 1;
                parent.properties.push(Property {
                    name,
                    values: Vec::new(),
                });
            }
            Some(Token::Eq) => {
                self.pos += 1;
                let values = self.values()?;
                parent.properties.push(Property { name, values });
            }
            _ => return Err(self.error("expected '{', '=' or ';'")),
        }
        Ok(())
    }

    fn values(&mut self) -> Result<Vec<Value>, ParseError> {
        let mut values = Vec::new();
        loop {
            // Labels inside property values carry no information here.
            self.labels();
            let value = match self.next() {
                Some(Token::Str(s)) => Value::String(s),
                Some(Token::Reference(r)) => Value::Reference(r),
                Some(Token::LAngle) => Value::Cells(self.cells()?),
                Some(Token::LBracket) => Value::Bytes(self.bytes()?),
                _ => return Err(self.error_prev("expected a property value")),
            };
            values.push(value);
            self.labels();
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::Semi) => return Ok(values),
                _ => return Err(self.error_prev("expected ',' or ';' after property value")),
            }
        }
    }

    fn cells(&mut self) -> Result<Vec<Cell>, ParseError> {
        let mut cells = Vec::new();
        loop {
            match self.next() {
                Some(Token::RAngle) => return Ok(cells),
                Some(Token::Reference(r)) => cells.push(Cell::Reference(r)),
                Some(Token::Label(_)) => {}
                Some(Token::Word(word)) => {
                    let number = parse_number(&word)
                        .ok_or_else(|| self.error_prev(&format!("invalid cell value {word:?}")))?;
                    cells.push(Cell::Number(number));
                }
                _ => return Err(self.error_prev("expected a cell value or '>'")),
            }
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ParseError> {
        let mut bytes = Vec::new();
        loop {
            match self.next() {
                Some(Token::RBracket) => return Ok(bytes),
                Some(Token::Word(word)) => {
                    if word.len() % 2 != 0 {
                        return Err(self.error_prev("odd number of hex digits in byte string"));
                    }
                    for pair in word.as_bytes().chunks(2) {
                        let pair = std::str::from_utf8(pair).unwrap_or_default();
                        let byte = u8::from_str_radix(pair, 16)
                            .map_err(|_| self.error_prev("invalid byte in byte string"))?;
                        bytes.push(byte);
                    }
                }
                _ => return Err(self.error_prev("expected a byte or ']'")),
            }
        }
    }

    fn skip_statement(&mut self) -> Result<(), ParseError> {
        while let Some(token) = self.next() {
            if token == Token::Semi {
                return Ok(());
            }
        }
        Err(self.error("unterminated directive"))
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            _ => Err(self.error_prev(&format!("expected {expected:?}"))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn offset(&self, pos: usize) -> usize {
        self.tokens.get(pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError {
            offset: self.offset(self.pos),
            message: message.to_owned(),
        }
    }

    /// Error located at the token that was just consumed.
    fn error_prev(&self, message: &str) -> ParseError {
        ParseError {
            offset: self.offset(self.pos.saturating_sub(1)),
            message: message.to_owned(),
        }
    }
}

fn parse_number(word: &str) -> Option<u64> {
    let word = word.trim_end_matches(&['U', 'L', 'u', 'l'][..]);
    match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None if word.len() > 1 && word.starts_with('0') => u64::from_str_radix(&word[1..], 8).ok(),
        None => word.parse().ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the source.
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}
