//! Named-parameter SQL templates.
//!
//! A template such as `SELECT * FROM T WHERE ID = :id AND NAME LIKE :%name%` is
//! turned into positional SQL (`... ID = ? AND NAME LIKE ? ESCAPE '\'`) plus an
//! ordered list of [`ParamDescriptor`]s, one per placeholder.

mod bind;
pub mod catalog;
mod scanner;

pub use bind::{BoundStatement, bind_template};

use scanner::{State, is_cast_operator, is_escaped_quote, scan_digits, scan_name};

use crate::error::SqlEngineError;

/// Default escape character emitted in `ESCAPE '<c>'` clauses.
pub const DEFAULT_LIKE_ESCAPE: char = '\\';

/// Array marker on a parameter: `:ids[]` defers the index to bind time, `:ids[2]` fixes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArraySlot {
    Deferred,
    Index(usize),
}

/// One placeholder occurrence in a parsed template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamDescriptor {
    pub name: String,
    /// Trailing `%`: the bound value gets a `%` suffix (prefix match).
    pub like_prefix: bool,
    /// Leading `%`: the bound value gets a `%` prefix (suffix match).
    pub like_suffix: bool,
    pub array: Option<ArraySlot>,
}

impl ParamDescriptor {
    #[must_use]
    pub fn is_like(&self) -> bool {
        self.like_prefix || self.like_suffix
    }

    #[must_use]
    pub fn is_array_element(&self) -> bool {
        self.array.is_some()
    }

    #[must_use]
    pub fn array_index(&self) -> Option<usize> {
        match self.array {
            Some(ArraySlot::Index(idx)) => Some(idx),
            _ => None,
        }
    }

    /// Escape wildcard characters in `value` and wrap it according to the like markers.
    #[must_use]
    pub fn wrap_like(&self, value: &str, escape: char) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        if self.like_suffix {
            out.push('%');
        }
        for c in value.chars() {
            if c == '%' || c == '_' || c == escape {
                out.push(escape);
            }
            out.push(c);
        }
        if self.like_prefix {
            out.push('%');
        }
        out
    }
}

/// Immutable result of parsing one template. Cheap to share behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    source: String,
    sql: String,
    descriptors: Vec<ParamDescriptor>,
    // Byte offset of each emitted `?` in `sql`, parallel to `descriptors`.
    placeholders: Vec<usize>,
    escape: char,
}

impl ParsedTemplate {
    /// Parse with the default `\` like-escape character.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Parse`] on malformed parameter syntax.
    pub fn parse(sql: &str) -> Result<Self, SqlEngineError> {
        SqlTemplateParser::default().parse(sql)
    }

    /// Template text exactly as supplied.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Positional SQL handed to the driver.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn descriptors(&self) -> &[ParamDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn escape_char(&self) -> char {
        self.escape
    }

    #[must_use]
    pub fn has_deferred_arrays(&self) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.array == Some(ArraySlot::Deferred))
    }

    /// SQL with every deferred array slot named `name` widened to `len` placeholders.
    ///
    /// The template itself is left untouched.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Binding`] if `len` is zero or no deferred slot is named `name`.
    pub fn bind_array_length(&self, name: &str, len: usize) -> Result<String, SqlEngineError> {
        if len == 0 {
            return Err(SqlEngineError::Binding(format!(
                "array parameter :{name}[] bound to an empty sequence"
            )));
        }
        if !self
            .descriptors
            .iter()
            .any(|d| d.name == name && d.array == Some(ArraySlot::Deferred))
        {
            return Err(SqlEngineError::Binding(format!(
                "no deferred array parameter :{name}[] in template"
            )));
        }
        Ok(self.expand_with(|d| {
            if d.name == name && d.array == Some(ArraySlot::Deferred) {
                len
            } else {
                1
            }
        }))
    }

    pub(crate) fn expand_with(&self, mut width: impl FnMut(&ParamDescriptor) -> usize) -> String {
        let mut out = String::with_capacity(self.sql.len() + 16);
        let mut copied = 0;
        for (descriptor, &offset) in self.descriptors.iter().zip(&self.placeholders) {
            out.push_str(&self.sql[copied..offset]);
            let n = width(descriptor).max(1);
            for i in 0..n {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('?');
            }
            copied = offset + 1;
        }
        out.push_str(&self.sql[copied..]);
        out
    }
}

/// Literal-aware parser for `:name` templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlTemplateParser {
    escape: char,
}

impl Default for SqlTemplateParser {
    fn default() -> Self {
        Self {
            escape: DEFAULT_LIKE_ESCAPE,
        }
    }
}

impl SqlTemplateParser {
    #[must_use]
    pub fn with_escape(escape: char) -> Self {
        Self { escape }
    }

    /// Turn a named-parameter template into positional SQL plus descriptors.
    ///
    /// A `:name` inside a single-quoted literal is left alone; `''` inside a
    /// literal is an escaped quote. An unterminated literal swallows the rest of
    /// the text verbatim without raising an error. `::` is copied as-is so
    /// PostgreSQL casts survive.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Parse`] when a subscript is not `[]` or `[digits]`,
    /// when a name is only `%` markers, or when `%` appears inside a name.
    pub fn parse(&self, sql: &str) -> Result<ParsedTemplate, SqlEngineError> {
        let bytes = sql.as_bytes();
        let mut out = String::with_capacity(sql.len());
        let mut descriptors = Vec::new();
        let mut placeholders = Vec::new();
        let mut state = State::Normal;
        let mut copied = 0;
        let mut idx = 0;

        while idx < bytes.len() {
            match state {
                State::Normal => match bytes[idx] {
                    b'\'' => {
                        state = State::SingleQuoted;
                        idx += 1;
                    }
                    _ if is_cast_operator(bytes, idx) => idx += 2,
                    b':' => {
                        let name_end = scan_name(bytes, idx + 1);
                        if name_end == idx + 1 {
                            idx += 1;
                            continue;
                        }
                        let descriptor_start = idx;
                        let (descriptor, end) = read_descriptor(sql, descriptor_start, name_end)?;

                        out.push_str(&sql[copied..descriptor_start]);
                        placeholders.push(out.len());
                        out.push('?');
                        if descriptor.is_like() {
                            out.push_str(" ESCAPE '");
                            out.push(self.escape);
                            out.push('\'');
                        }
                        descriptors.push(descriptor);
                        idx = end;
                        copied = end;
                    }
                    _ => idx += 1,
                },
                State::SingleQuoted => {
                    if is_escaped_quote(bytes, idx) {
                        idx += 2;
                    } else {
                        if bytes[idx] == b'\'' {
                            state = State::Normal;
                        }
                        idx += 1;
                    }
                }
            }
        }
        out.push_str(&sql[copied..]);

        Ok(ParsedTemplate {
            source: sql.to_string(),
            sql: out,
            descriptors,
            placeholders,
            escape: self.escape,
        })
    }
}

fn read_descriptor(
    sql: &str,
    colon: usize,
    name_end: usize,
) -> Result<(ParamDescriptor, usize), SqlEngineError> {
    let raw = &sql[colon + 1..name_end];
    let like_suffix = raw.starts_with('%');
    let like_prefix = raw.len() > 1 && raw.ends_with('%');
    let name = raw.trim_start_matches('%').trim_end_matches('%');

    if name.is_empty() {
        return Err(SqlEngineError::Parse {
            position: colon,
            message: format!("parameter ':{raw}' has no name"),
        });
    }
    if name.contains('%') {
        return Err(SqlEngineError::Parse {
            position: colon,
            message: format!("'%' may only lead or trail a parameter name in ':{raw}'"),
        });
    }

    let (array, end) = read_subscript(sql.as_bytes(), name_end)?;
    Ok((
        ParamDescriptor {
            name: name.to_string(),
            like_prefix,
            like_suffix,
            array,
        },
        end,
    ))
}

fn read_subscript(
    bytes: &[u8],
    start: usize,
) -> Result<(Option<ArraySlot>, usize), SqlEngineError> {
    if bytes.get(start) != Some(&b'[') {
        return Ok((None, start));
    }
    if bytes.get(start + 1) == Some(&b']') {
        return Ok((Some(ArraySlot::Deferred), start + 2));
    }
    let invalid = || SqlEngineError::Parse {
        position: start,
        message: "array subscript must be '[]' or '[<digits>]'".to_string(),
    };
    let (digits_end, digits) = scan_digits(bytes, start + 1).ok_or_else(invalid)?;
    if bytes.get(digits_end) != Some(&b']') {
        return Err(invalid());
    }
    let index = digits.parse::<usize>().map_err(|_| invalid())?;
    Ok((Some(ArraySlot::Index(index)), digits_end + 1))
}
