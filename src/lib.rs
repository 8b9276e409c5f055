//! This crate manages personal bibliographies: `.bib` records read into typed
//! entries, organized in named collections that may overlap.
//!
//! A `.bib` file entry looks like this:
//!
//! ```tex
//! @book{DBLP:books/aw/Knuth73a,
//!     author    = {Donald E. Knuth},
//!     title     = {The Art of Computer Programming, Volume {I:} Fundamental Algorithms,
//!                  2nd Edition},
//!     publisher = {Addison-Wesley},
//!     year      = {1973},
//! }
//! ```
//!
//! We call `book` the `kind` and `DBLP:books/aw/Knuth73a` the `name` of the
//! record. Then we have a sequence of fields with a name (like `year`) and
//! data (like `1973`). `@STRING{jan = "January"}` records define macros which
//! can be used as bare field values, `#` concatenates values and
//! `@COMMENT{...}` records as well as `%` line comments are skipped.
//!
//! The [`Parser`] reads such files one record at a time. Each record becomes
//! an [`Entry`]; [`Entry::post`] checks it against the rules of its kind and
//! turns years into integers, author strings into [`AuthorList`]s and month
//! names into [`Month`]s.
//!
//! Entries live in a [`Library`], an arena of entries and collections. A
//! collection holds entries and child collections; children may be shared and
//! may form cycles. The root of such a graph is a master, which keeps a flat
//! index of every entry reachable from it.
//!
//! ```rust
//! use bibshelf::{Library, LoadOptions, NodeKind, Parser, SortOrder};
//! use std::str::FromStr;
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut lib = Library::new();
//!     let master = lib.new_master("everything");
//!     let reading = lib.new_node("reading", NodeKind::Collection);
//!     lib.add_child(master, reading)?;
//!
//!     //let p = Parser::from_file("source.bib")?;
//!     let p = Parser::from_str(r#"@misc{tolkien1937, title = {The Hobbit},
//!         howpublished = {print}, year = 1937, collections = {reading}}"#)?;
//!     lib.load_bib(master, &p, &LoadOptions::default())?;
//!
//!     for id in lib.sort(master, "year", SortOrder::default())?.iter() {
//!         println!("{} ({})", lib[*id].name(), lib[*id].date());
//!     }
//!     assert!(lib.has(reading, "tolkien1937", false)?);
//!     Ok(())
//! }
//! ```

mod entry;
mod errors;
mod export;
mod lexer;
mod library;
mod ordmap;
mod parser;
mod persist;
mod sort;
mod traverse;
mod types;

pub use crate::entry::{
    Coercion, Entry, EntryKind, FieldRule, KindRules, PostOptions, PostReport, RESERVED_NAMES,
};
pub use crate::errors::{
    CoercionError, Error, Location, ParsingWarning, ParsingWarningKind, Problem, Result,
    SyntaxError,
};
pub use crate::export::{classic, to_bib, write_bib, write_txt, TextStyle};
pub use crate::lexer::{LexingIterator, RawRecord};
pub use crate::library::{EntryId, Library, LoadOptions, LoadReport, Node, NodeId, NodeKind};
pub use crate::ordmap::OrderedMap;
pub use crate::parser::{parse, Entries, Parser};
pub use crate::persist::COLLECTIONS_FILE;
pub use crate::sort::{SortOrder, NAME_FIELD};
pub use crate::traverse::Order;
pub use crate::types::{
    degroup, fingerprint, initial, reduce_whitespace, unicode_text, AuthorList, Month, NameStyle,
    Value, ValueType,
};
