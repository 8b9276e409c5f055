use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{CoercionError, Error, Problem, Result};
use crate::lexer::{readable_field_name, RawRecord};
use crate::ordmap::OrderedMap;
use crate::types::{AuthorList, Month, Value, ValueType};

/// The kinds of bibliographic records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Article,
    Book,
    Conference,
    Manual,
    Masters,
    Misc,
    Patent,
    PhdThesis,
    Report,
    Website,
}

/// How a field's text is turned into a typed value during `post`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Keep,
    Text,
    Integer,
    Month,
    Authors,
}

impl Coercion {
    /// `Ok(None)` when the value already has an acceptable type
    fn apply(&self, value: &Value) -> std::result::Result<Option<Value>, String> {
        match (self, value) {
            (Self::Keep, _) => Ok(None),
            (Self::Text, Value::Text(_)) => Ok(None),
            (Self::Text, Value::Integer(i)) => Ok(Some(Value::Text(i.to_string()))),
            (Self::Integer, Value::Integer(_)) => Ok(None),
            (Self::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| Some(Value::Integer(i)))
                .map_err(|e| e.to_string()),
            (Self::Month, Value::Month(_)) => Ok(None),
            (Self::Month, Value::Integer(i)) => Month::new(*i)
                .map(|m| Some(Value::Month(m)))
                .map_err(|e| e.to_string()),
            (Self::Month, Value::Text(s)) => Month::parse(s)
                .map(|m| Some(Value::Month(m)))
                .map_err(|e| e.to_string()),
            (Self::Authors, Value::Authors(_)) => Ok(None),
            (Self::Authors, Value::Text(s)) => AuthorList::parse(s)
                .map(|a| Some(Value::Authors(a)))
                .map_err(|e| e.to_string()),
            (_, other) => Err(format!("a {:?} value is not acceptable here", other.value_type())),
        }
    }
}

/// What a field accepts once an entry has been post-processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub accepts: &'static [ValueType],
    pub coerce: Coercion,
}

const ANY: &[ValueType] = &[ValueType::Text, ValueType::Integer, ValueType::Month, ValueType::Authors];

impl FieldRule {
    const DEFAULT: FieldRule = FieldRule { accepts: ANY, coerce: Coercion::Keep };
    const TEXT: FieldRule = FieldRule { accepts: &[ValueType::Text], coerce: Coercion::Text };
    const INTEGER: FieldRule = FieldRule { accepts: &[ValueType::Integer], coerce: Coercion::Integer };
    const MONTH: FieldRule = FieldRule { accepts: &[ValueType::Month], coerce: Coercion::Month };
    const AUTHORS: FieldRule = FieldRule { accepts: &[ValueType::Authors], coerce: Coercion::Authors };

    pub fn accepts(&self, value: &Value) -> bool {
        self.accepts.contains(&value.value_type())
    }
}

/// Mandatory and optional field names of one kind, plus its coercions
#[derive(Debug)]
pub struct KindRules {
    pub mandatory: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub fields: &'static [(&'static str, FieldRule)],
}

impl KindRules {
    pub fn knows(&self, field: &str) -> bool {
        self.mandatory.contains(&field) || self.optional.contains(&field)
    }

    pub fn rule(&self, field: &str) -> FieldRule {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map_or(FieldRule::DEFAULT, |(_, rule)| *rule)
    }
}

const DATED: &[(&str, FieldRule)] = &[
    ("author", FieldRule::AUTHORS),
    ("year", FieldRule::INTEGER),
    ("month", FieldRule::MONTH),
];

static ARTICLE: KindRules = KindRules {
    mandatory: &["author", "title", "journal", "year", "pages"],
    optional: &["volume", "number", "month"],
    fields: &[
        ("author", FieldRule::AUTHORS),
        ("volume", FieldRule::INTEGER),
        ("number", FieldRule::INTEGER),
        ("month", FieldRule::MONTH),
        ("year", FieldRule::INTEGER),
    ],
};

static BOOK: KindRules = KindRules {
    mandatory: &["author", "title", "publisher", "year", "address"],
    optional: &["edition"],
    fields: &[("author", FieldRule::AUTHORS), ("year", FieldRule::INTEGER)],
};

static CONFERENCE: KindRules = KindRules {
    mandatory: &["author", "title", "booktitle", "year"],
    optional: &["series", "pages", "publisher", "address", "month", "day"],
    fields: DATED,
};

static MANUAL: KindRules = KindRules {
    mandatory: &["title", "organization", "year"],
    optional: &["author", "address"],
    fields: &[("author", FieldRule::AUTHORS), ("year", FieldRule::INTEGER)],
};

static THESIS: KindRules = KindRules {
    mandatory: &["author", "title", "school", "year"],
    optional: &["address", "month", "day"],
    fields: DATED,
};

static MISC: KindRules = KindRules {
    mandatory: &["title", "howpublished", "year"],
    optional: &["note", "author", "month", "day"],
    fields: DATED,
};

static REPORT: KindRules = KindRules {
    mandatory: &["author", "title", "year"],
    optional: &["number", "institution", "month", "day", "address"],
    fields: DATED,
};

static PATENT: KindRules = KindRules {
    mandatory: &["author", "title", "number", "year"],
    optional: &["assignee", "nationality", "month", "day"],
    fields: &[
        ("author", FieldRule::AUTHORS),
        ("year", FieldRule::INTEGER),
        ("month", FieldRule::MONTH),
        ("number", FieldRule::TEXT),
    ],
};

static WEBSITE: KindRules = KindRules {
    mandatory: &["url"],
    optional: &["title", "author", "institution", "month", "day", "year"],
    fields: DATED,
};

impl EntryKind {
    pub const ALL: [EntryKind; 10] = [
        EntryKind::Article,
        EntryKind::Book,
        EntryKind::Conference,
        EntryKind::Manual,
        EntryKind::Masters,
        EntryKind::Misc,
        EntryKind::Patent,
        EntryKind::PhdThesis,
        EntryKind::Report,
        EntryKind::Website,
    ];

    /// Look up a record type such as “article”, “ARTICLE” or “@Article”
    pub fn from_tag(tag: &str) -> Option<EntryKind> {
        let tag = tag.trim_start_matches('@').to_uppercase();
        Some(match tag.as_str() {
            "ARTICLE" => Self::Article,
            "BOOK" => Self::Book,
            "INPROCEEDINGS" | "CONFERENCE" => Self::Conference,
            "MANUAL" => Self::Manual,
            "MASTERSTHESIS" => Self::Masters,
            "MISC" => Self::Misc,
            "PATENT" => Self::Patent,
            "PHDTHESIS" => Self::PhdThesis,
            "TECHREPORT" => Self::Report,
            "ONLINE" | "WEBSITE" | "WWW" => Self::Website,
            _ => return None,
        })
    }

    /// Canonical record type, without the leading `@`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Article => "ARTICLE",
            Self::Book => "BOOK",
            Self::Conference => "INPROCEEDINGS",
            Self::Manual => "MANUAL",
            Self::Masters => "MASTERSTHESIS",
            Self::Misc => "MISC",
            Self::Patent => "PATENT",
            Self::PhdThesis => "PHDTHESIS",
            Self::Report => "TECHREPORT",
            Self::Website => "ONLINE",
        }
    }

    pub fn rules(&self) -> &'static KindRules {
        match self {
            Self::Article => &ARTICLE,
            Self::Book => &BOOK,
            Self::Conference => &CONFERENCE,
            Self::Manual => &MANUAL,
            Self::Masters | Self::PhdThesis => &THESIS,
            Self::Misc => &MISC,
            Self::Patent => &PATENT,
            Self::Report => &REPORT,
            Self::Website => &WEBSITE,
        }
    }

    pub fn field_rule(&self, field: &str) -> FieldRule {
        self.rules().rule(field)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.tag())
    }
}

/// Names of the fixed attributes; no field may use them
pub const RESERVED_NAMES: [&str; 6] = ["name", "kind", "sourcefile", "docfile", "doc", "collections"];

/// Flags for [`Entry::post`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostOptions {
    /// any problem makes `post` fail
    pub strict: bool,
    /// fields outside the mandatory and optional sets are problems
    pub reject_unknown: bool,
}

/// Everything `post` found wrong with an entry that it did not fail on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostReport {
    pub problems: Vec<Problem>,
}

impl PostReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// One bibliographic record
///
/// The `name` is the key identifying the entry in `.bib` files and in
/// collections. Bibliographic data lives in the field map and is accessed with
/// [`Entry::get_field`] and [`Entry::set_field`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    kind: EntryKind,
    name: String,
    sourcefile: Option<PathBuf>,
    /// where to find a copy of the document: a path or URL
    pub docfile: Option<String>,
    /// free-form notes
    pub doc: Option<String>,
    /// names of the collections this entry declares it belongs to
    pub collections: Vec<String>,
    fields: OrderedMap<Value>,
}

impl Entry {
    pub fn new(kind: EntryKind, name: impl Into<String>) -> Entry {
        Entry {
            kind,
            name: name.into(),
            sourcefile: None,
            docfile: None,
            doc: None,
            collections: Vec::new(),
            fields: OrderedMap::new(),
        }
    }

    /// Typed entry from a parsed record, all fields as text. The `doc`,
    /// `docfile` and `collections` fields fill the fixed attributes of the
    /// same name; the other reserved names are rejected.
    pub fn from_record(record: &RawRecord) -> Result<Entry> {
        let kind = EntryKind::from_tag(&record.kind).ok_or_else(|| Error::UnknownKind {
            kind: record.kind.clone(),
            name: record.name.clone(),
        })?;
        let mut entry = Entry::new(kind, record.name.clone());
        for (name, data) in record.fields.iter() {
            match name {
                "doc" => entry.doc = Some(data.clone()),
                "docfile" => entry.docfile = Some(data.clone()),
                "collections" => {
                    entry.collections = data
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {
                    entry.set_field(name, Value::Text(data.clone()))?;
                }
            }
        }
        Ok(entry)
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sourcefile(&self) -> Option<&Path> {
        self.sourcefile.as_deref()
    }

    /// Record where the entry came from. May only be done once.
    pub fn set_sourcefile(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        match &self.sourcefile {
            Some(existing) if *existing != path => Err(Error::SourceFileAlreadySet {
                name: self.name.clone(),
            }),
            _ => {
                self.sourcefile = Some(path);
                Ok(())
            }
        }
    }

    pub fn fields(&self) -> &OrderedMap<Value> {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field, returning its previous value. Field names are
    /// case-insensitive and stored in lower case; they consist of letters
    /// only, like the field names a `.bib` file can hold.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        let name = name.to_lowercase();
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(Error::ReservedField(name));
        }
        if !readable_field_name(&name) {
            return Err(Error::UnreadableName { what: "field", name });
        }
        Ok(self.fields.insert(name, value.into()))
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(&name.to_lowercase())
    }

    /// Text of a field, for fields that are (still) text
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get_field(name).and_then(Value::as_text)
    }

    pub fn authors(&self) -> Option<&AuthorList> {
        self.get_field("author").and_then(Value::as_authors)
    }

    /// Check the entry against its kind's rules and coerce field values.
    ///
    /// Every problem is collected before deciding whether to fail, so a
    /// strict caller sees all missing, unknown and malformed fields at once.
    /// Values that cannot be coerced are left as they are.
    pub fn post(&mut self, options: &PostOptions) -> Result<PostReport> {
        let rules = self.kind.rules();
        let mut problems = Vec::new();

        for field in rules.mandatory {
            if !self.fields.contains_key(field) {
                problems.push(Problem::MissingField(field.to_string()));
            }
        }
        if options.reject_unknown {
            for field in self.fields.keys() {
                if !rules.knows(field) {
                    problems.push(Problem::UnknownField(field.to_string()));
                }
            }
        }
        if self.kind == EntryKind::Article && !self.has_field("volume") && !self.has_field("number") {
            problems.push(Problem::NoVolumeOrNumber);
        }

        for (field, rule) in rules.fields {
            let Some(value) = self.fields.get(field) else {
                continue;
            };
            match rule.coerce.apply(value) {
                Ok(Some(coerced)) => {
                    self.fields.insert(*field, coerced);
                }
                Ok(None) => {}
                Err(reason) => problems.push(Problem::Coercion(CoercionError {
                    field: field.to_string(),
                    entry_name: self.name.clone(),
                    raw_value: value.to_string(),
                    reason,
                })),
            }
        }

        for problem in &problems {
            match &self.sourcefile {
                Some(src) => warn!(entry = %self.name, source = %src.display(), "{problem}"),
                None => warn!(entry = %self.name, "{problem}"),
            }
        }
        if options.strict && !problems.is_empty() {
            return Err(Error::InvalidEntry {
                name: self.name.clone(),
                problems,
            });
        }
        debug!(entry = %self.name, kind = %self.kind, "post-processed entry");
        Ok(PostReport { problems })
    }

    /// “Mar 3, 1999”, “Mar, 1999” or “1999”, depending on what is known
    pub fn date(&self) -> String {
        let mut out = String::new();
        if let Some(year) = self.get_field("year") {
            if let Some(month) = self.get_field("month") {
                match self.get_field("day") {
                    Some(day) => out.push_str(&format!("{month} {day}, ")),
                    None => out.push_str(&format!("{month}, ")),
                }
            }
            out.push_str(&year.to_string());
        }
        out
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.kind, self.name)
    }
}
