//! Named SQL statements loaded from text resources.
//!
//! A resource is a sequence of blocks separated by blank lines. Each block starts
//! with a `#<statement-id>` header line followed by the statement text:
//!
//! ```text
//! #findUser
//! -- lookup by primary key
//! SELECT * FROM users
//!  WHERE id = :id
//!
//! #searchUsers
//! SELECT * FROM users WHERE name LIKE :name%
//! ```
//!
//! `--` comments are stripped and whitespace is collapsed before the text
//! reaches the parser.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SqlEngineError;

use super::{ParsedTemplate, SqlTemplateParser};

lazy_static! {
    static ref HEADER: Regex = Regex::new(r"^#\s*([A-Za-z0-9_.\-]+)\s*$").expect("valid regex");
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    template: Arc<ParsedTemplate>,
}

/// Resolves `(resource-id, statement-id)` pairs to parsed templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    parser: SqlTemplateParser,
    resources: HashMap<String, HashMap<String, CatalogEntry>>,
}

impl TemplateCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parser(parser: SqlTemplateParser) -> Self {
        Self {
            parser,
            resources: HashMap::new(),
        }
    }

    /// Load (or replace) a resource from text. Returns the number of statements.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Catalog`] for a block without a header, an empty
    /// statement, or a statement id repeated within the resource, and
    /// [`SqlEngineError::Parse`] when a statement is not a valid template.
    pub fn load_str(&mut self, resource_id: &str, text: &str) -> Result<usize, SqlEngineError> {
        let mut entries = HashMap::new();
        for (id, sql) in split_blocks(resource_id, text)? {
            if entries.contains_key(&id) {
                return Err(SqlEngineError::Catalog(format!(
                    "duplicate statement id '{id}' in resource '{resource_id}'"
                )));
            }
            let template = Arc::new(self.parser.parse(&sql)?);
            entries.insert(id, CatalogEntry { template });
        }
        let count = entries.len();
        self.resources.insert(resource_id.to_string(), entries);
        Ok(count)
    }

    /// Load a resource file; the resource id is the file stem.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Catalog`] if the file cannot be read, plus anything
    /// [`TemplateCatalog::load_str`] reports.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, SqlEngineError> {
        let path = path.as_ref();
        let resource_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                SqlEngineError::Catalog(format!("no resource id in path {}", path.display()))
            })?
            .to_string();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SqlEngineError::Catalog(format!("failed to read {}: {e}", path.display()))
        })?;
        self.load_str(&resource_id, &text)
    }

    /// Look up a parsed statement.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Catalog`] if the resource or statement is unknown.
    pub fn template(
        &self,
        resource_id: &str,
        statement_id: &str,
    ) -> Result<Arc<ParsedTemplate>, SqlEngineError> {
        self.resources
            .get(resource_id)
            .ok_or_else(|| SqlEngineError::Catalog(format!("unknown resource '{resource_id}'")))?
            .get(statement_id)
            .map(|entry| Arc::clone(&entry.template))
            .ok_or_else(|| {
                SqlEngineError::Catalog(format!(
                    "unknown statement '{statement_id}' in resource '{resource_id}'"
                ))
            })
    }

    /// Normalized SQL text of a statement, before parameter translation.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::Catalog`] if the resource or statement is unknown.
    pub fn sql(&self, resource_id: &str, statement_id: &str) -> Result<String, SqlEngineError> {
        self.template(resource_id, statement_id)
            .map(|t| t.source().to_string())
    }

    /// Identity used for cache keys of catalog statements.
    #[must_use]
    pub fn statement_key(resource_id: &str, statement_id: &str) -> String {
        format!("{resource_id}#{statement_id}")
    }
}

fn split_blocks(resource_id: &str, text: &str) -> Result<Vec<(String, String)>, SqlEngineError> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut block_start = 1;

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(build_block(resource_id, block_start, &current)?);
                current.clear();
            }
            continue;
        }
        if line.trim_start().starts_with("--") {
            continue;
        }
        if current.is_empty() {
            block_start = lineno + 1;
        }
        current.push(line);
    }
    if !current.is_empty() {
        blocks.push(build_block(resource_id, block_start, &current)?);
    }
    Ok(blocks)
}

fn build_block(
    resource_id: &str,
    line: usize,
    lines: &[&str],
) -> Result<(String, String), SqlEngineError> {
    let header = HEADER.captures(lines[0].trim()).ok_or_else(|| {
        SqlEngineError::Catalog(format!(
            "{resource_id}:{line}: statement block must start with '#<statement-id>'"
        ))
    })?;
    let id = header[1].to_string();

    let body: Vec<String> = lines[1..].iter().map(|l| strip_comment(l)).collect();
    let sql = normalize_whitespace(&body.join("\n"));
    if sql.is_empty() {
        return Err(SqlEngineError::Catalog(format!(
            "{resource_id}:{line}: statement '{id}' has no SQL text"
        )));
    }
    Ok((id, sql))
}

// Drops a trailing `--` comment that is not inside a quoted literal.
fn strip_comment(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut in_literal = false;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\'' => in_literal = !in_literal,
            b'-' if !in_literal && bytes.get(idx + 1) == Some(&b'-') => {
                return line[..idx].to_string();
            }
            _ => {}
        }
        idx += 1;
    }
    line.to_string()
}

// Collapses whitespace runs outside quoted literals to a single space.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_literal = false;
    let mut pending_space = false;
    for c in text.chars() {
        if !in_literal && c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '\'' {
            in_literal = !in_literal;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "#findUser\n-- by id\nSELECT *\n   FROM users   -- trailing\n WHERE id = :id\n\n#search\nSELECT * FROM users WHERE name LIKE :name% AND note = 'a  -- b'\n";

    #[test]
    fn loads_blocks_and_normalizes_text() {
        let mut catalog = TemplateCatalog::new();
        assert_eq!(catalog.load_str("users", USERS).unwrap(), 2);
        assert_eq!(
            catalog.sql("users", "findUser").unwrap(),
            "SELECT * FROM users WHERE id = :id"
        );
        let search = catalog.template("users", "search").unwrap();
        assert_eq!(
            search.sql(),
            "SELECT * FROM users WHERE name LIKE ? ESCAPE '\\' AND note = 'a  -- b'"
        );
    }

    #[test]
    fn duplicate_ids_fail_the_load() {
        let mut catalog = TemplateCatalog::new();
        let err = catalog
            .load_str("dup", "#a\nSELECT 1\n\n#a\nSELECT 2\n")
            .unwrap_err();
        assert!(matches!(err, SqlEngineError::Catalog(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn block_without_header_fails() {
        let mut catalog = TemplateCatalog::new();
        assert!(catalog.load_str("bad", "SELECT 1\n").is_err());
    }

    #[test]
    fn comment_lines_do_not_split_statements() {
        let mut catalog = TemplateCatalog::new();
        catalog
            .load_str("r", "#q\nSELECT a\n-- note\nFROM t\n")
            .unwrap();
        assert_eq!(catalog.sql("r", "q").unwrap(), "SELECT a FROM t");
    }

    #[test]
    fn unknown_lookups_are_errors() {
        let mut catalog = TemplateCatalog::new();
        catalog.load_str("r", "#q\nSELECT 1\n").unwrap();
        assert!(catalog.template("r", "nope").is_err());
        assert!(catalog.template("nope", "q").is_err());
    }
}
