//! `$(NAME)` symbol substitution.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use super::FormatError;

/// Expansion rounds allowed before a definition is treated as recursive.
pub const MAX_ROUNDS: usize = 64;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([A-Za-z_]+)\)").expect("valid symbol regex"));

static DEFINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z_]+)\s*=\s*(.*)$").expect("valid define regex"));

/// A user-overridable symbol and its documented default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDef {
    pub name: &'static str,
    pub default: &'static str,
    pub help: &'static str,
}

/// Symbol values in definition order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    values: IndexMap<String, String>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding the default of every definition.
    #[must_use]
    pub fn from_definitions(definitions: &[SymbolDef]) -> Self {
        let mut table = Self::new();
        for def in definitions {
            table.set(def.name, def.default);
        }
        table
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Applies a `NAME=value` override. The name is upper-cased.
    ///
    /// # Errors
    /// [`FormatError::BadDefine`] when `define` has no `=`.
    pub fn define(&mut self, define: &str) -> Result<(), FormatError> {
        let (name, value) = parse_define(define)?;
        self.set(name, value);
        Ok(())
    }
}

/// Splits `NAME=value` into an upper-cased name and the raw value.
///
/// # Errors
/// [`FormatError::BadDefine`] when `define` does not have that shape.
pub fn parse_define(define: &str) -> Result<(String, String), FormatError> {
    let caps = DEFINE_RE
        .captures(define)
        .ok_or_else(|| FormatError::BadDefine(define.to_owned()))?;
    let name = caps.get(1).map_or("", |m| m.as_str()).trim().to_uppercase();
    let value = caps.get(2).map_or("", |m| m.as_str()).to_owned();
    Ok((name, value))
}

/// Replaces `$(NAME)` tokens until none remain.
///
/// Lines after the first of a multi-line value are indented by whatever
/// precedes the token on its line, provided that is only whitespace. An empty
/// value removes the token.
///
/// # Errors
/// [`FormatError::UndefinedSymbol`] for a name missing from `symbols`, and
/// [`FormatError::RecursiveSymbol`] when tokens keep appearing after
/// [`MAX_ROUNDS`] rounds.
pub fn substitute(text: &str, symbols: &SymbolTable) -> Result<String, FormatError> {
    let mut text = text.to_owned();
    for _ in 0..MAX_ROUNDS {
        if !TOKEN_RE.is_match(&text) {
            return Ok(text);
        }
        text = substitute_once(&text, symbols)?;
    }
    if TOKEN_RE.is_match(&text) {
        return Err(FormatError::RecursiveSymbol { rounds: MAX_ROUNDS });
    }
    Ok(text)
}

fn substitute_once(text: &str, symbols: &SymbolTable) -> Result<String, FormatError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in TOKEN_RE.captures_iter(text) {
        let (Some(token), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = symbols
            .get(name.as_str())
            .ok_or_else(|| FormatError::UndefinedSymbol {
                name: name.as_str().to_owned(),
            })?;

        let line_start = text[..token.start()].rfind('\n').map_or(0, |at| at + 1);
        let lead = &text[line_start..token.start()];
        let indent = if lead.chars().all(char::is_whitespace) {
            lead
        } else {
            ""
        };

        out.push_str(&text[last..token.start()]);
        let mut lines = value.lines();
        if let Some(first) = lines.next() {
            out.push_str(first);
            for line in lines {
                out.push('\n');
                out.push_str(indent);
                out.push_str(line);
            }
        }
        last = token.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
