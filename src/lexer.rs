use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::io::Read;
use std::mem;
use std::path;
use std::str;

use tracing::{trace, warn};

use crate::entry::EntryKind;
use crate::errors::{Error, Location, ParsingWarning, ParsingWarningKind, Result, SyntaxError};
use crate::ordmap::OrderedMap;

/// A record is one `@KIND{name, field = value, ...}` unit of a `.bib` file.
///
/// ```tex
/// @Book{works:4,
///   author     = {Shakespeare, William},
///   title      = {Sonnets},
/// }
/// ```
///
/// yields the record with kind “BOOK”, name “works:4” and the fields
/// `author` and `title` in this order. Field names are lower-cased, the kind
/// is upper-cased and values are kept verbatim apart from macro substitution
/// and `#` concatenation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: String,
    pub name: String,
    pub fields: OrderedMap<String>,
    /// zero-based line where the record starts
    pub lineno: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LexingState {
    Idle,
    RecordKind,
    SeekOpen,
    SeekName,
    RecordName,
    SeekField,
    FieldName,
    SeekEquals,
    SeekValue,
    ReadValue,
    PostValue,
    CommentRecord,
}

impl fmt::Display for LexingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action())
    }
}

impl LexingState {
    fn action(&self) -> &'static str {
        match self {
            Self::Idle => "waiting for next record",
            Self::RecordKind => "reading record type",
            Self::SeekOpen => "expecting '{' for record data",
            Self::SeekName => "expecting record name",
            Self::RecordName => "reading record name",
            Self::SeekField => "expecting field name or '}'",
            Self::FieldName => "reading field name",
            Self::SeekEquals => "expecting '=' for field assignment",
            Self::SeekValue => "expecting field value",
            Self::ReadValue => "reading field value",
            Self::PostValue => "expecting ',', '#' or '}' after field value",
            Self::CommentRecord => "skipping comment record",
        }
    }
}

/// Characters that must not appear unprotected outside of a delimited value
const SPECIAL: [char; 8] = ['{', '}', '"', ',', '@', '#', '=', '%'];

fn is_special(chr: char) -> bool {
    SPECIAL.contains(&chr)
}

/// Whether the field-name states accept `name` unchanged
pub(crate) fn readable_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphabetic() && c.to_lowercase().eq([c]))
}

/// Whether the record-name states accept `name` unchanged
pub(crate) fn readable_record_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| !c.is_whitespace() && !is_special(c))
}

/// How the value currently being read is terminated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delimiter {
    Braces,
    Quotes,
    Bare,
}

/// What kind of record is being read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordMode {
    Regular,
    Macro,
}

/// A stateful scanner yielding one [`RawRecord`] after another.
///
/// Each character moves the automaton by exactly one transition; nothing is
/// tokenized ahead. Between records only the macro table and the collected
/// warnings are kept.
pub struct LexingIterator<'s> {
    src: &'s str,
    pos: usize,
    line_start: usize,
    lineno: usize,
    colno: usize,
    state: LexingState,
    mode: RecordMode,
    in_line_comment: bool,
    record: RawRecord,
    field: String,
    value: String,
    token: String,
    delimiter: Delimiter,
    depth: usize,
    name_gap: bool,
    macros: HashMap<String, String>,
    warnings: Vec<ParsingWarning>,
    finished: bool,
}

impl<'s> LexingIterator<'s> {
    pub(crate) fn new(src: &'s str) -> LexingIterator<'s> {
        LexingIterator {
            src,
            pos: 0,
            line_start: 0,
            lineno: 0,
            colno: 0,
            state: LexingState::Idle,
            mode: RecordMode::Regular,
            in_line_comment: false,
            record: RawRecord::default(),
            field: String::new(),
            value: String::new(),
            token: String::new(),
            delimiter: Delimiter::Bare,
            depth: 0,
            name_gap: false,
            macros: HashMap::new(),
            warnings: Vec::new(),
            finished: false,
        }
    }

    /// `@STRING` definitions seen so far
    pub fn macros(&self) -> &HashMap<String, String> {
        &self.macros
    }

    /// Recoverable irregularities seen so far
    pub fn warnings(&self) -> &[ParsingWarning] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<ParsingWarning> {
        mem::take(&mut self.warnings)
    }

    fn location(&self) -> Location {
        let rest = &self.src[self.line_start..];
        Location {
            lineno: self.lineno,
            colno: self.colno,
            current_line: rest.lines().next().unwrap_or("").to_string(),
            current_id: if self.record.name.is_empty() {
                None
            } else {
                Some(self.record.name.clone())
            },
        }
    }

    fn unexpected(&self, chr: char) -> Error {
        Error::Syntax(SyntaxError {
            unexpected: chr,
            action: self.state.action(),
            info: self.location(),
        })
    }

    fn warn(&mut self, kind: ParsingWarningKind) {
        let warning = ParsingWarning {
            kind,
            info: self.location(),
        };
        warn!("{warning}");
        self.warnings.push(warning);
    }

    /// Decide where to go after the `{` following the record type
    fn open_record(&mut self) {
        match self.record.kind.as_str() {
            "STRING" => {
                self.mode = RecordMode::Macro;
                self.state = LexingState::SeekField;
            }
            "COMMENT" => {
                self.depth = 1;
                self.state = LexingState::CommentRecord;
            }
            _ => {
                self.mode = RecordMode::Regular;
                self.state = LexingState::SeekName;
            }
        }
    }

    fn begin_value(&mut self, delimiter: Delimiter) {
        self.delimiter = delimiter;
        self.depth = 0;
        self.token.clear();
        self.state = LexingState::ReadValue;
    }

    /// Append the piece just read to the field value, substituting macros
    /// for bare tokens
    fn close_value(&mut self) {
        let token = mem::take(&mut self.token);
        if self.delimiter == Delimiter::Bare {
            match self.macros.get(&token.to_lowercase()) {
                Some(text) => self.value.push_str(text),
                None => self.value.push_str(&token),
            }
        } else {
            self.value.push_str(&token);
        }
        self.state = LexingState::PostValue;
    }

    fn finish_field(&mut self) {
        let name = mem::take(&mut self.field);
        let value = mem::take(&mut self.value);
        match self.mode {
            RecordMode::Macro => {
                trace!(name = %name, "defining macro");
                self.macros.insert(name, value);
            }
            RecordMode::Regular => {
                if self.record.fields.contains_key(&name) {
                    self.warn(ParsingWarningKind::DuplicateName(name.clone()));
                }
                self.record.fields.insert(name, value);
            }
        }
        self.state = LexingState::SeekField;
    }

    /// The closing `}` of a record was read
    fn finish_record(&mut self) -> Result<Option<RawRecord>> {
        self.state = LexingState::Idle;
        let record = mem::take(&mut self.record);
        if self.mode == RecordMode::Macro {
            self.mode = RecordMode::Regular;
            return Ok(None);
        }
        if EntryKind::from_tag(&record.kind).is_none() {
            return Err(Error::UnknownKind {
                kind: record.kind,
                name: record.name,
            });
        }
        trace!(kind = %record.kind, name = %record.name, "read record");
        Ok(Some(record))
    }

    /// Feed one character to the automaton
    fn step(&mut self, chr: char) -> Result<Option<RawRecord>> {
        use LexingState as S;

        if self.in_line_comment {
            if chr == '\n' {
                self.in_line_comment = false;
            }
            return Ok(None);
        }
        let outside_value = !(self.state == S::ReadValue && self.delimiter != Delimiter::Bare)
            && self.state != S::CommentRecord;
        if chr == '%' && outside_value {
            if self.state == S::ReadValue {
                self.close_value();
            }
            self.in_line_comment = true;
            return Ok(None);
        }

        match self.state {
            S::Idle => {
                if chr == '@' {
                    self.record = RawRecord {
                        lineno: self.lineno,
                        ..RawRecord::default()
                    };
                    self.state = S::RecordKind;
                } else if !chr.is_whitespace() {
                    return Err(self.unexpected(chr));
                }
            }
            S::RecordKind => {
                if chr.is_alphabetic() {
                    self.record.kind.extend(chr.to_uppercase());
                } else if chr.is_whitespace() && self.record.kind.is_empty() {
                    // tolerate “@ book”
                } else if chr.is_whitespace() {
                    self.state = S::SeekOpen;
                } else if chr == '{' && !self.record.kind.is_empty() {
                    self.open_record();
                } else {
                    return Err(self.unexpected(chr));
                }
            }
            S::SeekOpen => {
                if chr == '{' {
                    self.open_record();
                } else if !chr.is_whitespace() {
                    return Err(self.unexpected(chr));
                }
            }
            S::SeekName => {
                if chr.is_whitespace() {
                    // ignore
                } else if is_special(chr) {
                    return Err(self.unexpected(chr));
                } else {
                    self.record.name.push(chr);
                    self.name_gap = false;
                    self.state = S::RecordName;
                }
            }
            S::RecordName => {
                if chr == ',' {
                    self.state = S::SeekField;
                } else if chr == '}' {
                    return self.finish_record();
                } else if chr.is_whitespace() {
                    self.name_gap = true;
                } else if is_special(chr) {
                    return Err(self.unexpected(chr));
                } else {
                    if self.name_gap {
                        self.name_gap = false;
                        self.warn(ParsingWarningKind::WhitespaceInName);
                    }
                    self.record.name.push(chr);
                }
            }
            S::SeekField => {
                if chr.is_whitespace() {
                    // ignore
                } else if chr == '}' {
                    return self.finish_record();
                } else if chr.is_alphabetic() {
                    self.field.extend(chr.to_lowercase());
                    self.state = S::FieldName;
                } else {
                    return Err(self.unexpected(chr));
                }
            }
            S::FieldName => {
                if chr.is_alphabetic() {
                    self.field.extend(chr.to_lowercase());
                } else if chr.is_whitespace() {
                    self.state = S::SeekEquals;
                } else if chr == '=' {
                    self.value.clear();
                    self.state = S::SeekValue;
                } else {
                    return Err(self.unexpected(chr));
                }
            }
            S::SeekEquals => {
                if chr == '=' {
                    self.value.clear();
                    self.state = S::SeekValue;
                } else if !chr.is_whitespace() {
                    return Err(self.unexpected(chr));
                }
            }
            S::SeekValue => {
                if chr.is_whitespace() {
                    // ignore
                } else if chr == '{' {
                    self.begin_value(Delimiter::Braces);
                } else if chr == '"' {
                    self.begin_value(Delimiter::Quotes);
                } else if chr == ',' && self.value.is_empty() {
                    self.finish_field();
                } else if is_special(chr) {
                    return Err(self.unexpected(chr));
                } else {
                    self.begin_value(Delimiter::Bare);
                    self.token.push(chr);
                }
            }
            S::ReadValue => match self.delimiter {
                Delimiter::Braces => match chr {
                    '{' => {
                        self.depth += 1;
                        self.token.push(chr);
                    }
                    '}' if self.depth == 0 => self.close_value(),
                    '}' => {
                        self.depth -= 1;
                        self.token.push(chr);
                    }
                    _ => self.token.push(chr),
                },
                Delimiter::Quotes => match chr {
                    '{' => {
                        self.depth += 1;
                        self.token.push(chr);
                    }
                    '}' if self.depth == 0 => return Err(self.unexpected(chr)),
                    '}' => {
                        self.depth -= 1;
                        self.token.push(chr);
                    }
                    '"' if self.depth == 0 => self.close_value(),
                    _ => self.token.push(chr),
                },
                Delimiter::Bare => {
                    if chr.is_whitespace() {
                        self.close_value();
                    } else if chr == ',' {
                        self.close_value();
                        self.finish_field();
                    } else if chr == '}' {
                        self.close_value();
                        self.finish_field();
                        return self.finish_record();
                    } else if chr == '#' {
                        self.close_value();
                        self.state = S::SeekValue;
                    } else if is_special(chr) {
                        return Err(self.unexpected(chr));
                    } else {
                        self.token.push(chr);
                    }
                }
            },
            S::PostValue => {
                if chr.is_whitespace() {
                    // ignore
                } else if chr == ',' {
                    self.finish_field();
                } else if chr == '}' {
                    self.finish_field();
                    return self.finish_record();
                } else if chr == '#' {
                    self.state = S::SeekValue;
                } else {
                    return Err(self.unexpected(chr));
                }
            }
            S::CommentRecord => {
                if chr == '{' {
                    self.depth += 1;
                } else if chr == '}' {
                    self.depth -= 1;
                    if self.depth == 0 {
                        self.record = RawRecord::default();
                        self.state = S::Idle;
                    }
                }
            }
        }
        Ok(None)
    }

    fn advance(&mut self, chr: char) {
        self.pos += chr.len_utf8();
        if chr == '\n' {
            self.lineno += 1;
            self.colno = 0;
            self.line_start = self.pos;
        } else {
            self.colno += 1;
        }
    }
}

impl<'s> Iterator for LexingIterator<'s> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        while let Some(chr) = self.src[self.pos..].chars().next() {
            let outcome = self.step(chr);
            self.advance(chr);
            match outcome {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }

        self.finished = true;
        if self.state != LexingState::Idle {
            return Some(Err(Error::UnterminatedRecord {
                kind: mem::take(&mut self.record.kind),
                name: mem::take(&mut self.record.name),
                field: mem::take(&mut self.field),
            }));
        }
        None
    }
}

/// Owner of the source text
pub(crate) struct Lexer {
    src: String,
}

impl Lexer {
    /// Use a file stored at a `path` as source for the lexing process.
    pub(crate) fn from_file<P: AsRef<path::Path>>(path: P) -> io::Result<Lexer> {
        let mut fd = fs::File::open(path)?;
        let mut buf = String::new();
        fd.read_to_string(&mut buf)?;
        Ok(Lexer { src: buf })
    }

    /// Use a string as source for the lexing process.
    pub(crate) fn from_string(data: String) -> Lexer {
        Lexer { src: data }
    }

    pub(crate) fn iter(&self) -> LexingIterator {
        LexingIterator::new(&self.src)
    }
}

impl str::FromStr for Lexer {
    type Err = io::Error;

    /// Use a string as source for the lexing process.
    fn from_str(data: &str) -> io::Result<Self> {
        Ok(Lexer::from_string(data.to_string()))
    }
}
