use std::io::Write;

use tracing::debug;

use crate::entry::{Entry, EntryKind};
use crate::errors::{Error, Result};
use crate::lexer::{readable_field_name, readable_record_name};
use crate::library::{Library, NodeId};
use crate::types::{unicode_text, NameStyle, Value};

/// Whether a value can be wrapped in `{}` and read back unchanged
fn balanced(text: &str) -> bool {
    let mut level = 0usize;
    for chr in text.chars() {
        match chr {
            '{' => level += 1,
            '}' if level == 0 => return false,
            '}' => level -= 1,
            _ => {}
        }
    }
    level == 0
}

fn write_field<W: Write>(out: &mut W, entry: &Entry, field: &str, text: &str) -> Result<()> {
    if !balanced(text) {
        return Err(Error::UnbalancedValue {
            entry: entry.name().to_string(),
            field: field.to_string(),
        });
    }
    writeln!(out, "  {field} = {{{text}}},")?;
    Ok(())
}

/// Write `entry` as a `.bib` record. Every value is wrapped in braces;
/// values whose braces do not balance are refused, and so are entry or field
/// names the parser would not read back unchanged.
pub fn write_bib<W: Write>(out: &mut W, entry: &Entry) -> Result<()> {
    if !readable_record_name(entry.name()) {
        return Err(Error::UnreadableName {
            what: "entry",
            name: entry.name().to_string(),
        });
    }
    if let Some(field) = entry.fields().keys().find(|f| !readable_field_name(f)) {
        return Err(Error::UnreadableName {
            what: "field",
            name: field.to_string(),
        });
    }
    let mut buf = Vec::new();
    writeln!(buf, "@{}{{{},", entry.kind().tag(), entry.name())?;
    for (field, value) in entry.fields().iter() {
        write_field(&mut buf, entry, field, &value.to_string())?;
    }
    if let Some(doc) = &entry.doc {
        write_field(&mut buf, entry, "doc", doc)?;
    }
    if let Some(docfile) = &entry.docfile {
        write_field(&mut buf, entry, "docfile", docfile)?;
    }
    if !entry.collections.is_empty() {
        write_field(&mut buf, entry, "collections", &entry.collections.join(", "))?;
    }
    writeln!(buf, "}}")?;
    out.write_all(&buf)?;
    Ok(())
}

pub fn to_bib(entry: &Entry) -> Result<String> {
    let mut buf = Vec::new();
    write_bib(&mut buf, entry)?;
    String::from_utf8(buf).map_err(|e| Error::Format(e.to_string()))
}

/// The entry as plain BibTeX knows it: patents and websites become `@MISC`
/// records, everything else is returned unchanged.
pub fn classic(entry: &Entry) -> Result<Entry> {
    let text = |field: &str| entry.get_field(field).map(Value::to_string);
    let mut misc = Entry::new(EntryKind::Misc, entry.name());
    misc.doc = entry.doc.clone();
    misc.docfile = entry.docfile.clone();
    misc.collections = entry.collections.clone();
    match entry.kind() {
        EntryKind::Patent => {
            for field in ["author", "title"] {
                if let Some(value) = entry.get_field(field) {
                    misc.set_field(field, value.clone())?;
                }
            }
            let number = text("number").unwrap_or_default();
            let howpublished = match text("nationality") {
                Some(nationality) => format!("{nationality} Patent {number}"),
                None => format!("Patent {number}"),
            };
            misc.set_field("howpublished", howpublished)?;
            if let Some(assignee) = text("assignee") {
                misc.set_field("note", assignee)?;
            }
            for field in ["year", "month", "day"] {
                if let Some(value) = entry.get_field(field) {
                    misc.set_field(field, value.clone())?;
                }
            }
        }
        EntryKind::Website => {
            for field in ["title", "author", "year"] {
                if let Some(value) = entry.get_field(field) {
                    misc.set_field(field, value.clone())?;
                }
            }
            let url = text("url").unwrap_or_default();
            let howpublished = match text("institution") {
                Some(institution) => format!("{institution}, {url}"),
                None => url,
            };
            misc.set_field("howpublished", howpublished)?;
            if entry.has_field("year") {
                misc.set_field("note", format!("accessed: {}", entry.date()))?;
            }
        }
        _ => return Ok(entry.clone()),
    }
    Ok(misc)
}

impl Library {
    /// Write the entries of `node` (with `deep`, all reachable ones) in name
    /// order. With `classic`, patents and websites are written as `@MISC`.
    pub fn write_bib<W: Write>(&self, out: &mut W, node: NodeId, deep: bool, classic_kinds: bool) -> Result<usize> {
        let mut ids = self.entry_ids(node, deep)?;
        ids.sort_by(|a, b| self[*a].name().cmp(self[*b].name()));
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                writeln!(out)?;
            }
            if classic_kinds {
                write_bib(out, &classic(&self[*id])?)?;
            } else {
                write_bib(out, &self[*id])?;
            }
        }
        debug!(collection = %self[node].name(), count = ids.len(), "exported entries");
        Ok(ids.len())
    }
}

/// Settings of [`write_txt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    /// bold and italic terminal escapes
    pub ansi: bool,
    /// wrap lines at this many characters
    pub width: Option<usize>,
    /// append the entry's notes
    pub doc: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        TextStyle {
            ansi: false,
            width: None,
            doc: true,
        }
    }
}

struct Markup {
    normal: &'static str,
    italic: &'static str,
    bold: &'static str,
}

impl Markup {
    fn new(ansi: bool) -> Markup {
        if ansi {
            Markup {
                normal: "\x1b[0m",
                italic: "\x1b[3m",
                bold: "\x1b[1m",
            }
        } else {
            Markup {
                normal: "",
                italic: "",
                bold: "",
            }
        }
    }

    fn italic(&self, text: String) -> String {
        format!("{}{text}{}", self.italic, self.normal)
    }

    fn bold(&self, text: String) -> String {
        format!("{}{text}{}", self.bold, self.normal)
    }
}

/// Break `text` into lines of at most `width` characters, keeping blank
/// lines between paragraphs
fn split_lines(text: &str, width: usize) -> String {
    let mut out = Vec::new();
    for paragraph in text.split("\n\n") {
        let mut lines: Vec<String> = Vec::new();
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
        out.push(lines.join("\n"));
    }
    out.join("\n\n")
}

/// Human-readable citation of one entry, ending with a newline
pub fn write_txt(entry: &Entry, style: &TextStyle) -> String {
    let mk = Markup::new(style.ansi);
    let text = |field: &str| entry.get_field(field).map(|v| unicode_text(&v.to_string()));
    let authors = entry.get_field("author").map(|v| match v {
        Value::Authors(list) => unicode_text(&list.show(NameStyle::default())),
        other => unicode_text(&other.to_string()),
    });
    let date = {
        let year = text("year").map(|y| mk.bold(y));
        match (text("month"), text("day"), year) {
            (Some(month), Some(day), Some(year)) => Some(format!("{month} {day}, {year}")),
            (Some(month), None, Some(year)) => Some(format!("{month}, {year}")),
            (_, _, year) => year,
        }
    };

    let mut parts: Vec<Option<String>> = Vec::new();
    match entry.kind() {
        EntryKind::Article => {
            let volume_number = match (text("volume"), text("number")) {
                (Some(v), Some(n)) => Some(format!("{}({n})", mk.bold(v))),
                (Some(v), None) => Some(mk.bold(v)),
                (None, n) => n.map(|n| mk.bold(n)),
            };
            parts.extend([authors, text("title"), text("journal").map(|j| mk.italic(j))]);
            parts.extend([volume_number, text("pages"), date]);
        }
        EntryKind::Book => {
            parts.extend([authors, text("title").map(|t| mk.italic(t)), text("edition")]);
            parts.extend([text("publisher"), text("address"), date]);
        }
        EntryKind::Conference => {
            parts.extend([authors, text("title"), text("booktitle").map(|b| mk.italic(b))]);
            parts.extend([text("publisher"), text("series"), text("pages"), text("address"), date]);
        }
        EntryKind::Manual => {
            parts.extend([authors, text("title").map(|t| mk.italic(t)), text("organization")]);
            parts.extend([text("address"), date]);
        }
        EntryKind::Masters | EntryKind::PhdThesis => {
            let what = if entry.kind() == EntryKind::Masters {
                "Master's thesis"
            } else {
                "PhD thesis"
            };
            parts.extend([authors, text("title").map(|t| mk.italic(t)), Some(what.to_string())]);
            parts.extend([text("school"), text("address"), date]);
        }
        EntryKind::Misc => {
            parts.extend([authors, text("title").map(|t| mk.italic(t)), text("howpublished"), date]);
            parts.push(text("note"));
        }
        EntryKind::Patent => {
            let number = text("number").map(|n| mk.bold(n)).unwrap_or_default();
            let patent = match text("nationality") {
                Some(nationality) => format!("{nationality} Pat. {number}"),
                None => format!("Pat. {number}"),
            };
            parts.extend([authors, text("title").map(|t| mk.italic(t)), Some(patent), date]);
        }
        EntryKind::Report => {
            parts.extend([authors, text("title").map(|t| mk.italic(t)), text("institution")]);
            parts.extend([text("number"), text("address"), date]);
        }
        EntryKind::Website => {
            let accessed = date.map(|d| format!("accessed: {d}"));
            parts.extend([authors, text("title").map(|t| mk.italic(t)), text("institution")]);
            parts.extend([text("url").map(|u| mk.bold(u)), accessed]);
        }
    }

    let mut out = parts.into_iter().flatten().collect::<Vec<_>>().join(", ");
    out.push('.');
    if style.doc {
        if let Some(doc) = &entry.doc {
            out.push_str("\n\n");
            out.push_str(doc.trim());
        }
    }
    if let Some(width) = style.width {
        out = split_lines(&out, width);
    }
    out.push('\n');
    out
}
