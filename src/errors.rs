use std::fmt;
use std::io;

use thiserror::Error;

/// Source code information attached to a syntax problem
/// for improved error messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// zero-based line number
    pub lineno: usize,
    /// zero-based column number
    pub colno: usize,
    pub current_line: String,
    /// name of the record being read, if already known
    pub current_id: Option<String>,
}

/// Malformed text: an unexpected character at a known position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub unexpected: char,
    pub action: &'static str,
    pub info: Location,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = &self.info;
        if let Some(id) = &info.current_id {
            write!(f, "unexpected character '{unexp}' while {action} at line {lineno} col {colno} in record {id}",
                unexp = self.unexpected.escape_debug(), action = self.action,
                lineno = info.lineno + 1, colno = info.colno + 1)?;
        } else {
            write!(f, "unexpected character '{unexp}' while {action} at line {lineno} col {colno}",
                unexp = self.unexpected.escape_debug(), action = self.action,
                lineno = info.lineno + 1, colno = info.colno + 1)?;
        }
        if !info.current_line.trim().is_empty() {
            write!(f, "\n>> {}", info.current_line)?;
            write!(f, "\n   {:skip$}↑ here", "", skip = info.colno)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsingWarningKind {
    WhitespaceInName,
    DuplicateName(String),
}

/// A recoverable irregularity found while parsing. The parser keeps going.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsingWarning {
    pub kind: ParsingWarningKind,
    pub info: Location,
}

impl fmt::Display for ParsingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lineno, colno) = (self.info.lineno + 1, self.info.colno + 1);
        match &self.kind {
            ParsingWarningKind::WhitespaceInName => {
                write!(f, "ignoring whitespace in record name at line {lineno} col {colno}")
            }
            ParsingWarningKind::DuplicateName(name) => match &self.info.current_id {
                Some(id) => write!(f, "found duplicate field '{name}' in record '{id}' (line {lineno}), overwriting"),
                None => write!(f, "found duplicate field '{name}' (line {lineno}), overwriting"),
            },
        }
    }
}

/// A field value that could not be converted to the type its rule demands
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported format for field '{field}' in entry '{entry_name}': {raw_value:?} ({reason})")]
pub struct CoercionError {
    pub field: String,
    pub entry_name: String,
    pub raw_value: String,
    pub reason: String,
}

/// One finding of an entry's `post` check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    MissingField(String),
    UnknownField(String),
    Coercion(CoercionError),
    NoVolumeOrNumber,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing mandatory field '{field}'"),
            Self::UnknownField(field) => write!(f, "unrecognized field '{field}'"),
            Self::Coercion(err) => write!(f, "{err}"),
            Self::NoVolumeOrNumber => write!(f, "no volume or number field"),
        }
    }
}

/// Every failure the library reports
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("unexpected end of input while reading @{kind}{{{name}, field '{field}'; check for an unclosed brace or quote")]
    UnterminatedRecord {
        kind: String,
        name: String,
        field: String,
    },

    #[error("unrecognized record type @{kind} for record '{name}'")]
    UnknownKind { kind: String, name: String },

    #[error("format error: {0}")]
    Format(String),

    #[error("conflicting {what} for name '{name}'")]
    NameConflict { what: &'static str, name: String },

    #[error("collection '{child}' belongs to a different master than '{parent}'")]
    MasterMismatch { child: String, parent: String },

    #[error("collection '{child}' cannot be attached here: {reason}")]
    NotAttachable { child: String, reason: &'static str },

    #[error("entry '{name}' has {} problem(s): {}", .problems.len(), join_problems(.problems))]
    InvalidEntry { name: String, problems: Vec<Problem> },

    #[error("field name '{0}' collides with a fixed entry attribute")]
    ReservedField(String),

    #[error("{what} name '{name}' cannot be read back from a .bib file")]
    UnreadableName { what: &'static str, name: String },

    #[error("entry '{name}' already has a source file")]
    SourceFileAlreadySet { name: String },

    #[error("no {what} named '{name}'")]
    NotFound { what: &'static str, name: String },

    #[error("collection graph is corrupt: visited {visited} collections but cleared {cleared} markers")]
    GraphConsistency { visited: usize, cleared: usize },

    #[error("field '{field}' of entry '{entry}' has unbalanced braces and cannot be exported")]
    UnbalancedValue { entry: String, field: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn join_problems(problems: &[Problem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
