//! Reader for the narrow subset of the Terraform declaration language that
//! Groundwork needs: attributes, labeled blocks, and string literals.
//!
//! Everything that is not a plain string literal (numbers, references, lists,
//! maps, function calls, templates, heredocs) is kept as an opaque
//! [`Value::Other`] holding its raw source text. Brackets and strings must
//! balance; anything else that does not fit the attribute/block shape is a
//! parse error.

use crate::SchemaError;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Other(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// String value of `name`, or `None` if absent or not a string literal.
    pub fn string_attribute(&self, name: &str) -> Option<&str> {
        self.attribute(name).and_then(|a| a.value.as_str())
    }

    /// The attributes of a flat `key = value` file. Returns `None` when the
    /// body also contains blocks, since such a file is not an attributes file.
    pub fn just_attributes(&self) -> Option<&[Attribute]> {
        if self.blocks.is_empty() {
            Some(&self.attributes)
        } else {
            None
        }
    }
}

pub fn parse_file(path: &Path) -> Result<Body, SchemaError> {
    let content = fs::read_to_string(path)?;
    parse_str(&content)
}

pub fn parse_str(src: &str) -> Result<Body, SchemaError> {
    let mut cursor = Cursor::new(src);
    parse_body(&mut cursor, false)
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    /// Skip a comment starting at the cursor, if any. Line comments stop
    /// before the newline.
    fn skip_comment(&mut self) -> Result<bool, SchemaError> {
        if self.peek() == Some('#') || self.starts_with("//") {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.bump();
            }
            return Ok(true);
        }
        if self.starts_with("/*") {
            self.bump();
            self.bump();
            loop {
                if self.starts_with("*/") {
                    self.bump();
                    self.bump();
                    return Ok(true);
                }
                if self.bump().is_none() {
                    return Err(self.error("unterminated block comment"));
                }
            }
        }
        Ok(false)
    }

    fn skip_inline(&mut self) -> Result<(), SchemaError> {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.bump();
                }
                Some(_) if self.skip_comment()? => {}
                _ => return Ok(()),
            }
        }
    }

    fn skip_all(&mut self) -> Result<(), SchemaError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(_) if self.skip_comment()? => {}
                _ => return Ok(()),
            }
        }
    }

    fn read_ident(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !(first.is_alphabetic() || first == '_') {
            return None;
        }
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Some(ident)
    }
}

struct StringLit {
    value: String,
    template: bool,
}

fn parse_body(cursor: &mut Cursor, nested: bool) -> Result<Body, SchemaError> {
    let mut body = Body::default();
    loop {
        cursor.skip_all()?;
        match cursor.peek() {
            None if nested => return Err(cursor.error("unexpected end of input, expected '}'")),
            None => return Ok(body),
            Some('}') if nested => {
                cursor.bump();
                return Ok(body);
            }
            Some('}') => return Err(cursor.error("unexpected '}'")),
            Some(_) => {}
        }

        let Some(name) = cursor.read_ident() else {
            return Err(cursor.error("expected attribute or block name"));
        };
        cursor.skip_inline()?;

        if cursor.peek() == Some('=') && cursor.peek_at(1) != Some('=') {
            cursor.bump();
            let value = parse_expression(cursor)?;
            cursor.skip_inline()?;
            match cursor.peek() {
                None | Some('\n' | '}') => {}
                Some(c) => return Err(cursor.error(format!("unexpected '{c}' after attribute"))),
            }
            body.attributes.push(Attribute { name, value });
            continue;
        }

        let mut labels = Vec::new();
        loop {
            cursor.skip_inline()?;
            match cursor.peek() {
                Some('{') => {
                    cursor.bump();
                    break;
                }
                Some('"') => {
                    let lit = read_string(cursor)?;
                    if lit.template {
                        return Err(cursor.error("block labels cannot be templates"));
                    }
                    labels.push(lit.value);
                }
                Some(_) => match cursor.read_ident() {
                    Some(label) => labels.push(label),
                    None => return Err(cursor.error(format!("malformed block header '{name}'"))),
                },
                None => return Err(cursor.error("unexpected end of input in block header")),
            }
        }
        let inner = parse_body(cursor, true)?;
        body.blocks.push(Block {
            kind: name,
            labels,
            body: inner,
        });
    }
}

fn parse_expression(cursor: &mut Cursor) -> Result<Value, SchemaError> {
    cursor.skip_inline()?;
    if cursor.starts_with("<<") {
        return read_heredoc(cursor);
    }

    if cursor.peek() == Some('"') {
        let start = cursor.pos;
        let lit = read_string(cursor)?;
        cursor.skip_inline()?;
        if matches!(cursor.peek(), None | Some('\n' | '}')) {
            return Ok(if lit.template {
                Value::Other(raw(cursor, start))
            } else {
                Value::String(lit.value)
            });
        }
        return read_raw(cursor, start);
    }

    let start = cursor.pos;
    read_raw(cursor, start)
}

fn raw(cursor: &Cursor, start: usize) -> String {
    cursor.chars[start..cursor.pos]
        .iter()
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Consume an arbitrary expression up to the end of its line, keeping
/// bracket depth so that multi-line lists and maps stay together.
fn read_raw(cursor: &mut Cursor, start: usize) -> Result<Value, SchemaError> {
    let mut depth = 0usize;
    loop {
        let Some(c) = cursor.peek() else {
            if depth > 0 {
                return Err(cursor.error("unbalanced brackets in expression"));
            }
            break;
        };
        if depth == 0 && (c == '\n' || c == '}') {
            break;
        }
        if c == '#' || cursor.starts_with("//") || cursor.starts_with("/*") {
            if depth == 0 {
                break;
            }
            cursor.skip_comment()?;
            continue;
        }
        match c {
            '"' => {
                read_string(cursor)?;
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                if depth == 0 {
                    return Err(cursor.error(format!("unexpected '{c}' in expression")));
                }
                depth -= 1;
            }
            _ => {}
        }
        cursor.bump();
    }

    let text = raw(cursor, start);
    if text.is_empty() {
        return Err(cursor.error("missing attribute value"));
    }
    Ok(Value::Other(text))
}

fn read_heredoc(cursor: &mut Cursor) -> Result<Value, SchemaError> {
    let start = cursor.pos;
    cursor.bump();
    cursor.bump();
    if cursor.peek() == Some('-') {
        cursor.bump();
    }
    let Some(marker) = cursor.read_ident() else {
        return Err(cursor.error("heredoc is missing its delimiter"));
    };
    loop {
        let mut line = String::new();
        while let Some(c) = cursor.peek() {
            if c == '\n' {
                break;
            }
            line.push(c);
            cursor.bump();
        }
        if line.trim() == marker {
            return Ok(Value::Other(raw(cursor, start)));
        }
        if cursor.bump().is_none() {
            return Err(cursor.error(format!("unterminated heredoc '{marker}'")));
        }
    }
}

fn read_string(cursor: &mut Cursor) -> Result<StringLit, SchemaError> {
    cursor.bump();
    let mut value = String::new();
    let mut template = false;
    loop {
        let Some(c) = cursor.peek().filter(|&c| c != '\n') else {
            return Err(cursor.error("unterminated string"));
        };
        cursor.bump();
        match c {
            '"' => return Ok(StringLit { value, template }),
            '\\' => match cursor.bump() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => return Err(cursor.error("unterminated string")),
            },
            '$' | '%' if cursor.peek() == Some(c) && cursor.peek_at(1) == Some('{') => {
                // `$${` and `%%{` are escaped template openers.
                cursor.bump();
                value.push(c);
            }
            '$' | '%' if cursor.peek() == Some('{') => {
                template = true;
                value.push(c);
                skip_interpolation(cursor, &mut value)?;
            }
            other => value.push(other),
        }
    }
}

fn skip_interpolation(cursor: &mut Cursor, value: &mut String) -> Result<(), SchemaError> {
    let mut depth = 0usize;
    loop {
        let Some(c) = cursor.peek().filter(|&c| c != '\n') else {
            return Err(cursor.error("unterminated template interpolation"));
        };
        cursor.bump();
        value.push(c);
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_block() {
        let body = parse_str(
            r#"
terraform {
  required_version = ">= 1.5"
  backend "gcs" {
    bucket = "acme-tfstate"
    prefix = "terraform/state"
  }
}
"#,
        )
        .unwrap();

        let tf = body.blocks_of("terraform").next().unwrap();
        assert_eq!(tf.body.string_attribute("required_version"), Some(">= 1.5"));
        let backend = tf.body.blocks_of("backend").next().unwrap();
        assert_eq!(backend.labels, vec!["gcs".to_owned()]);
        assert_eq!(backend.body.string_attribute("bucket"), Some("acme-tfstate"));
    }

    #[test]
    fn flat_attributes_file() {
        let body = parse_str("bucket = \"b1\"\nprefix = \"state\" # trailing\n").unwrap();
        let attrs = body.just_attributes().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(body.string_attribute("prefix"), Some("state"));
    }

    #[test]
    fn blocks_disqualify_attributes_file() {
        let body = parse_str("terraform {\n  backend \"gcs\" {}\n}\n").unwrap();
        assert!(body.just_attributes().is_none());
    }

    #[test]
    fn non_string_values_are_opaque() {
        let body = parse_str(
            r#"
provider "google" {
  project = var.project_id
  zones   = [
    "a",
    "b",
  ]
  labels  = { team = "infra" }
  count   = 3
}
"#,
        )
        .unwrap();
        let provider = &body.blocks[0];
        assert_eq!(provider.body.string_attribute("project"), None);
        assert_eq!(
            provider.body.attribute("project").unwrap().value,
            Value::Other("var.project_id".to_owned())
        );
        assert!(provider.body.attribute("zones").is_some());
        assert!(provider.body.attribute("labels").is_some());
        assert_eq!(provider.body.string_attribute("count"), None);
    }

    #[test]
    fn templates_are_not_strings() {
        let body = parse_str("bucket = \"${var.project}-tfstate\"\nescaped = \"$${literal}\"\n")
            .unwrap();
        assert_eq!(body.string_attribute("bucket"), None);
        assert_eq!(body.string_attribute("escaped"), Some("${literal}"));
    }

    #[test]
    fn comments_and_single_line_blocks() {
        let body = parse_str(
            "// header\n/* multi\nline */\nbackend \"gcs\" { bucket = \"x\" }\n",
        )
        .unwrap();
        assert_eq!(body.blocks[0].body.string_attribute("bucket"), Some("x"));
    }

    #[test]
    fn heredoc_is_opaque() {
        let body = parse_str("policy = <<EOT\n{ \"a\": 1 }\nEOT\nname = \"n\"\n").unwrap();
        assert!(matches!(body.attribute("policy").unwrap().value, Value::Other(_)));
        assert_eq!(body.string_attribute("name"), Some("n"));
    }

    #[test]
    fn malformed_input_reports_line() {
        let err = parse_str("terraform {\n  backend \"gcs\" {\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));

        let err = parse_str("ok = \"1\"\nbad = \"unterminated\n").unwrap_err();
        match err {
            SchemaError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_is_empty_body() {
        assert_eq!(parse_str("").unwrap(), Body::default());
        assert_eq!(parse_str("# Main resources\n").unwrap(), Body::default());
    }
}
