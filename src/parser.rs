use std::collections::HashMap;
use std::io;
use std::path;
use std::str;

use tracing::debug;

use crate::entry::Entry;
use crate::errors::{ParsingWarning, Result};
use crate::lexer::{Lexer, LexingIterator, RawRecord};

/// Parser reading a `.bib` file, allowing iteration over its records or entries
pub struct Parser {
    lexer: Lexer,
    source: Option<path::PathBuf>,
}

impl Parser {
    /// Use a file at some filepath as source for the parsing process.
    /// Entries produced from it remember the path as their source file.
    pub fn from_file<P: AsRef<path::Path>>(path: P) -> io::Result<Parser> {
        let lexer = Lexer::from_file(&path)?;
        debug!(path = %path.as_ref().display(), "reading bibliography");
        Ok(Parser {
            lexer,
            source: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Use a string as source for the parsing process.
    pub fn from_string(data: String) -> Parser {
        Parser {
            lexer: Lexer::from_string(data),
            source: None,
        }
    }

    pub fn source(&self) -> Option<&path::Path> {
        self.source.as_deref()
    }

    /// Raw records in source order; `@STRING` and `@COMMENT` records are consumed
    pub fn iter(&self) -> LexingIterator {
        self.lexer.iter()
    }

    /// Typed entries in source order, with all field values still text
    pub fn entries(&self) -> Entries {
        Entries {
            records: self.lexer.iter(),
            source: self.source.as_deref(),
        }
    }
}

impl str::FromStr for Parser {
    type Err = io::Error;

    /// Use a string as source for the parsing process.
    fn from_str(data: &str) -> io::Result<Self> {
        Ok(Parser::from_string(data.to_string()))
    }
}

/// A stateful iterator yielding one [`Entry`] after another
pub struct Entries<'i> {
    records: LexingIterator<'i>,
    source: Option<&'i path::Path>,
}

impl<'i> Entries<'i> {
    pub fn macros(&self) -> &HashMap<String, String> {
        self.records.macros()
    }

    pub fn warnings(&self) -> &[ParsingWarning] {
        self.records.warnings()
    }

    pub fn take_warnings(&mut self) -> Vec<ParsingWarning> {
        self.records.take_warnings()
    }
}

impl<'i> Iterator for Entries<'i> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(err) => return Some(Err(err)),
        };
        let mut entry = match Entry::from_record(&record) {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err)),
        };
        if let Some(src) = self.source {
            if let Err(err) = entry.set_sourcefile(src) {
                return Some(Err(err));
            }
        }
        Some(Ok(entry))
    }
}

/// Read all records of `text` at once
pub fn parse(text: &str) -> Result<Vec<RawRecord>> {
    LexingIterator::new(text).collect()
}
