//! Validated SQL identifiers.
//!
//! Table, column and CTE names pass through [`Ident::parse`] before they are
//! written into SQL text. Unquoted parts must match `[A-Za-z_][A-Za-z0-9_$]*`;
//! quoted parts may contain anything except NUL, with `"` escaped as `""`.
//! Dotted forms such as `node.parent_id` or `public."Node"` are accepted.

use crate::error::{OrmError, OrmResult};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// One dot-separated part of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentPart {
    Unquoted(String),
    Quoted(String),
}

impl IdentPart {
    /// The part's name without quoting.
    pub fn name(&self) -> &str {
        match self {
            IdentPart::Unquoted(s) | IdentPart::Quoted(s) => s,
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            IdentPart::Unquoted(s) => out.push_str(s),
            IdentPart::Quoted(s) => {
                out.push('"');
                out.push_str(&s.replace('"', "\"\""));
                out.push('"');
            }
        }
    }
}

/// A SQL identifier, possibly qualified (`schema.table.column`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    parts: Vec<IdentPart>,
}

impl Ident {
    /// Parse and validate an identifier.
    pub fn parse(s: &str) -> OrmResult<Self> {
        if s.is_empty() {
            return Err(OrmError::builder("identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::builder(
                "identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();
        loop {
            let part = if chars.peek() == Some(&'"') {
                parse_quoted(&mut chars)?
            } else {
                parse_unquoted(&mut chars, s)?
            };
            parts.push(part);

            match chars.next() {
                None => break,
                Some('.') if chars.peek().is_none() => {
                    return Err(OrmError::builder(format!(
                        "trailing '.' in identifier '{s}'"
                    )));
                }
                Some('.') => {}
                Some(c) => {
                    return Err(OrmError::builder(format!(
                        "unexpected '{c}' after quoted part in identifier '{s}'"
                    )));
                }
            }
        }

        Ok(Self { parts })
    }

    /// Build an identifier from a table (or alias) and a column part.
    pub fn qualified(table: &Ident, column: &Ident) -> Self {
        Self {
            parts: vec![table.last().clone(), column.last().clone()],
        }
    }

    /// The final part, i.e. the bare column or table name.
    pub fn last(&self) -> &IdentPart {
        // `parse` never produces an empty part list.
        &self.parts[self.parts.len() - 1]
    }

    /// The final part as an identifier of its own, quoting preserved.
    pub fn unqualified(&self) -> Self {
        Self {
            parts: vec![self.last().clone()],
        }
    }

    /// The bare name of the final part, unquoted.
    pub fn bare_name(&self) -> &str {
        self.last().name()
    }

    /// Whether the identifier carries a qualifier (`table.column`).
    pub fn is_qualified(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn parts(&self) -> &[IdentPart] {
        &self.parts
    }

    /// Render as SQL.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }

    pub(crate) fn write_sql(&self, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            part.write_sql(out);
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

fn parse_quoted(chars: &mut Peekable<Chars<'_>>) -> OrmResult<IdentPart> {
    chars.next();
    let mut name = String::new();
    loop {
        match chars.next() {
            Some('"') if chars.peek() == Some(&'"') => {
                chars.next();
                name.push('"');
            }
            Some('"') => break,
            Some(c) => name.push(c),
            None => return Err(OrmError::builder("unclosed quoted identifier")),
        }
    }
    if name.is_empty() {
        return Err(OrmError::builder("empty quoted identifier"));
    }
    Ok(IdentPart::Quoted(name))
}

fn parse_unquoted(chars: &mut Peekable<Chars<'_>>, whole: &str) -> OrmResult<IdentPart> {
    let mut name = String::new();
    while let Some(&c) = chars.peek() {
        if c == '.' {
            break;
        }
        let valid = if name.is_empty() {
            c == '_' || c.is_ascii_alphabetic()
        } else {
            c == '_' || c == '$' || c.is_ascii_alphanumeric()
        };
        if !valid {
            return Err(OrmError::builder(format!(
                "invalid character '{c}' in identifier '{whole}'"
            )));
        }
        name.push(c);
        chars.next();
    }
    if name.is_empty() {
        return Err(OrmError::builder(format!(
            "empty segment in identifier '{whole}'"
        )));
    }
    Ok(IdentPart::Unquoted(name))
}
