use std::cmp::Ordering;
use std::fmt;
use std::str;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

const MONTHS_FULL: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

/// A calendar month, 1 (January) through 12 (December)
///
/// Constructible from an integer, a full month name, or an abbreviation of one
/// to four letters (“Mar”, “sept.”). Case does not matter and a trailing period
/// is ignored. `full` only selects how the month is displayed; it takes no
/// part in comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Month {
    index: u8,
    full: bool,
}

impl Month {
    pub fn new(index: i64) -> Result<Month> {
        if !(1..=12).contains(&index) {
            return Err(Error::Format(format!(
                "the month index must be between 1 and 12, found {index}"
            )));
        }
        Ok(Month {
            index: index as u8,
            full: false,
        })
    }

    pub fn parse(src: &str) -> Result<Month> {
        let lower = src.trim().to_lowercase();
        if let Some(pos) = MONTHS_FULL.iter().position(|m| m.to_lowercase() == lower) {
            return Ok(Month {
                index: pos as u8 + 1,
                full: true,
            });
        }

        let abbrev = lower.strip_suffix('.').unwrap_or(&lower);
        let len = abbrev.chars().count();
        if (1..=4).contains(&len) && abbrev.chars().all(|c| c.is_ascii_alphabetic()) {
            let candidates: Vec<usize> = MONTHS_FULL
                .iter()
                .enumerate()
                .filter(|(_, m)| m.to_lowercase().starts_with(abbrev))
                .map(|(i, _)| i)
                .collect();
            return match candidates.as_slice() {
                [single] => Ok(Month {
                    index: *single as u8 + 1,
                    full: false,
                }),
                [] => Err(Error::Format(format!("'{src}' is not a month abbreviation"))),
                _ => Err(Error::Format(format!("month abbreviation '{src}' is ambiguous"))),
            };
        }

        match abbrev.parse::<i64>() {
            Ok(index) => Month::new(index),
            Err(_) => Err(Error::Format(format!(
                "expected a month name, its abbreviation, or an integer, but received '{src}'"
            ))),
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Same month, displayed with its full name (or not)
    pub fn with_full(self, full: bool) -> Month {
        Month { full, ..self }
    }

    pub fn full_name(&self) -> &'static str {
        MONTHS_FULL[usize::from(self.index) - 1]
    }

    pub fn abbreviation(&self) -> &'static str {
        &self.full_name()[..3]
    }
}

impl str::FromStr for Month {
    type Err = Error;

    fn from_str(src: &str) -> Result<Self> {
        Month::parse(src)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.full {
            f.write_str(self.full_name())
        } else {
            f.write_str(self.abbreviation())
        }
    }
}

impl PartialEq for Month {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for Month {}

impl PartialOrd for Month {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Month {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

/// Reduce a name or title to lower-case alphanumerics, e.g. “{von Fuddyduddy}”
/// becomes “vonfuddyduddy”.
pub fn fingerprint(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// First unescaped letter of a name part, upper-cased
pub fn initial(part: &str) -> Option<char> {
    let mut escape = false;
    for chr in part.chars() {
        if escape {
            escape = false;
        } else if chr == '\\' {
            escape = true;
        } else if chr.is_alphabetic() {
            return chr.to_uppercase().next();
        }
    }
    None
}

/// How `AuthorList::show` renders first and other (middle) names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameStyle {
    pub full_first: bool,
    pub full_other: bool,
}

impl Default for NameStyle {
    fn default() -> Self {
        NameStyle {
            full_first: true,
            full_other: false,
        }
    }
}

/// An ordered list of authors, each an ordered list of name parts
/// (first, middle names, last).
///
/// Parsed from the BibTeX “and”-separated form. Whitespace splits name parts
/// unless it sits inside `{}` or `""`, so “Albert {von Fuddyduddy}” has the
/// two parts “Albert” and “{von Fuddyduddy}”. Delimiters are kept in the parts.
///
/// Equality and ordering are approximate on purpose: last names are compared by
/// their [`fingerprint`], first names only by their initial (and only when both
/// authors have more than one name part).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorList {
    names: Vec<Vec<String>>,
}

impl AuthorList {
    pub fn parse(raw: &str) -> Result<AuthorList> {
        let mut level: i32 = 0;
        let mut quote = false;
        let mut start = 0;
        let mut authors: Vec<Vec<String>> = vec![Vec::new()];

        let take_word = |authors: &mut Vec<Vec<String>>, word: &str| -> Result<()> {
            if word == "and" {
                if authors.last().map_or(true, Vec::is_empty) {
                    return Err(Error::Format(format!(
                        "misplaced 'and' separator in author list '{raw}'"
                    )));
                }
                authors.push(Vec::new());
            } else if let Some(current) = authors.last_mut() {
                current.push(word.to_string());
            }
            Ok(())
        };

        for (idx, chr) in raw.char_indices() {
            if chr.is_whitespace() && level == 0 && !quote {
                if start < idx {
                    take_word(&mut authors, &raw[start..idx])?;
                }
                start = idx + chr.len_utf8();
            } else if chr == '{' && !quote {
                level += 1;
            } else if chr == '}' && !quote {
                level -= 1;
                if level < 0 {
                    return Err(Error::Format(format!(
                        "found '}}' with no matching '{{' in author list '{raw}'"
                    )));
                }
            } else if chr == '"' && level == 0 {
                quote = !quote;
            }
        }
        if level != 0 || quote {
            return Err(Error::Format(format!(
                "unclosed brace or quote in author list '{raw}'"
            )));
        }
        if start < raw.len() {
            take_word(&mut authors, &raw[start..])?;
        }
        if authors.last().map_or(true, Vec::is_empty) {
            return Err(Error::Format(if authors.len() > 1 {
                format!("trailing 'and' separator in author list '{raw}'")
            } else {
                "empty author list".to_string()
            }));
        }
        Ok(AuthorList { names: authors })
    }

    /// Build from pre-split name parts
    pub fn from_parts<I, A, P>(authors: I) -> Result<AuthorList>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let names: Vec<Vec<String>> = authors
            .into_iter()
            .map(|a| a.into_iter().map(Into::into).collect())
            .collect();
        if names.is_empty() || names.iter().any(|parts| parts.is_empty()) {
            return Err(Error::Format("every author needs at least one name part".to_string()));
        }
        Ok(AuthorList { names })
    }

    pub fn names(&self) -> &[Vec<String>] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn last_name(&self, position: usize) -> Option<&str> {
        self.names
            .get(position)
            .and_then(|parts| parts.last())
            .map(String::as_str)
    }

    /// Position of the first author whose last name (and first name, if
    /// given) match exactly
    pub fn has_author(&self, last: &str, first: Option<&str>) -> Option<usize> {
        self.names.iter().position(|parts| {
            parts.last().map_or(false, |l| l == last)
                && first.map_or(true, |f| parts.len() > 1 && parts[0] == f)
        })
    }

    /// Human-readable form, e.g. “Donald E. Knuth, Jane Doe”
    pub fn show(&self, style: NameStyle) -> String {
        let shorten = |part: &str, full: bool| -> String {
            match initial(part) {
                Some(chr) if !full => format!("{chr}."),
                _ => part.to_string(),
            }
        };
        self.names
            .iter()
            .map(|parts| {
                let mut words = Vec::with_capacity(parts.len());
                if parts.len() > 1 {
                    words.push(shorten(&parts[0], style.full_first));
                    for other in &parts[1..parts.len() - 1] {
                        words.push(shorten(other, style.full_other));
                    }
                }
                if let Some(last) = parts.last() {
                    words.push(last.clone());
                }
                words.join(" ")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl str::FromStr for AuthorList {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        AuthorList::parse(raw)
    }
}

/// The BibTeX form, lossless: “Albert {von Fuddyduddy} and Plot {de Vice}”
impl fmt::Display for AuthorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, parts) in self.names.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            f.write_str(&parts.join(" "))?;
        }
        Ok(())
    }
}

impl PartialEq for AuthorList {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AuthorList {}

impl PartialOrd for AuthorList {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AuthorList {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.names.iter().zip(other.names.iter()) {
            let last_a = fingerprint(a.last().map_or("", String::as_str));
            let last_b = fingerprint(b.last().map_or("", String::as_str));
            match last_a.cmp(&last_b) {
                Ordering::Equal => {}
                ord => return ord,
            }
            if a.len() > 1 && b.len() > 1 {
                match initial(&a[0]).cmp(&initial(&b[0])) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }
        }
        self.names.len().cmp(&other.names.len())
    }
}

/// Kinds of values a field can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Text,
    Integer,
    Month,
    Authors,
}

/// The value of one entry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Month(Month),
    Authors(AuthorList),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Text(_) => ValueType::Text,
            Self::Integer(_) => ValueType::Integer,
            Self::Month(_) => ValueType::Month,
            Self::Authors(_) => ValueType::Authors,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_month(&self) -> Option<Month> {
        match self {
            Self::Month(m) => Some(*m),
            _ => None,
        }
    }

    pub fn as_authors(&self) -> Option<&AuthorList> {
        match self {
            Self::Authors(a) => Some(a),
            _ => None,
        }
    }

    /// Natural ordering for sorting. Values of different types order by type
    /// (integers, months, authors, text) so mixed columns still sort totally.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Month(a), Self::Month(b)) => a.cmp(b),
            (Self::Authors(a), Self::Authors(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Integer(_) => 0,
            Self::Month(_) => 1,
            Self::Authors(_) => 2,
            Self::Text(_) => 3,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Month(m) => write!(f, "{m}"),
            Self::Authors(a) => write!(f, "{a}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<Month> for Value {
    fn from(m: Month) -> Self {
        Value::Month(m)
    }
}

impl From<AuthorList> for Value {
    fn from(a: AuthorList) -> Self {
        Value::Authors(a)
    }
}

/// Removes Teχ's groups from a string. For example,
/// given a string like “Written by {{Lukas} and {tajpulo}}”
/// returns “Written by Lukas and tajpulo”
pub fn degroup(src: &str) -> String {
    let mut result = String::new();
    let mut level = 0i32;
    let mut escape = false;
    for chr in src.chars() {
        if chr == '{' && !escape {
            level += 1;
        } else if chr == '}' && !escape {
            level -= 1;
        } else if chr == '\\' {
            if escape {
                result.push(chr);
            }
            escape = !escape;
        } else {
            if escape {
                result.push('\\');
            }
            result.push(chr);
            escape = false;
        }
    }
    if level == 0 {
        result
    } else {
        src.to_string()
    }
}

/// Reduce the whitespace according to free form semantics
/// common in markup languages. Multiple whitespace sequences
/// are merged into one space.
pub fn reduce_whitespace(src: &str) -> String {
    let mut result = String::new();
    let mut was_whitespace = false;
    for chr in src.chars() {
        if chr.is_whitespace() {
            if !was_whitespace {
                result.push(' ');
            }
            was_whitespace = true;
        } else {
            result.push(chr);
            was_whitespace = false;
        }
    }
    result
}

/// The closest Unicode representation of Teχ-like text:
///
/// * replace “---” and “--” by em-dash and en-dash respectively
/// * replace the “LaTeχ” control sequence
/// * replace escaped quotes and ampersands
/// * replace “~” by a non-breaking space
/// * remove groups and reduce whitespace
pub fn unicode_text(data: &str) -> String {
    let replacements = [
        ("---", "—"),
        ("--", "–"),
        ("\\LaTeX{}", "LaTeχ"),
        ("{\\LaTeX}", "LaTeχ"),
        ("\\LaTeX", "LaTeχ"),
        ("\\\"", "\""),
        ("\\&", "&"),
        ("~", "\u{00A0}"),
    ];

    let mut result = data.to_string();
    for (pattern, replacement) in replacements.iter() {
        result = result.replace(pattern, replacement);
    }
    reduce_whitespace(&degroup(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error;

    #[test]
    fn test_month_spellings() -> Result<()> {
        assert_eq!(Month::parse("March")?.index(), 3);
        assert!(Month::parse("march")?.is_full());
        assert_eq!(Month::parse("Sep.")?.index(), 9);
        assert_eq!(Month::parse("sept")?.index(), 9);
        assert_eq!(Month::parse("f")?.index(), 2);
        assert_eq!(Month::parse(" 12 ")?.index(), 12);
        assert_eq!(Month::new(7)?.to_string(), "Jul");
        assert_eq!(Month::new(7)?.with_full(true).to_string(), "July");
        Ok(())
    }

    #[test]
    fn test_month_rejects_garbage() {
        assert!(matches!(Month::parse("ju"), Err(Error::Format(_))));
        assert!(matches!(Month::parse("Smarch"), Err(Error::Format(_))));
        assert!(matches!(Month::parse("13"), Err(Error::Format(_))));
        assert!(matches!(Month::new(0), Err(Error::Format(_))));
    }

    #[test]
    fn test_month_equality_ignores_display_mode() -> Result<()> {
        assert_eq!(Month::parse("May")?, Month::new(5)?);
        assert!(Month::new(1)? < Month::new(2)?);
        Ok(())
    }

    #[test]
    fn test_author_splitting() -> std::result::Result<(), Box<dyn error::Error>> {
        let plain = AuthorList::parse("Albert von Fuddyduddy and Plot de Vice")?;
        assert_eq!(plain.len(), 2);
        assert_eq!(plain.names()[0].len(), 3);
        assert_eq!(plain.names()[1].len(), 3);

        let grouped = AuthorList::parse("Albert {von Fuddyduddy} and Plot {de Vice}")?;
        assert_eq!(grouped.names()[0], vec!["Albert", "{von Fuddyduddy}"]);
        assert_eq!(grouped.names()[1], vec!["Plot", "{de Vice}"]);
        assert_eq!(grouped.to_string(), "Albert {von Fuddyduddy} and Plot {de Vice}");

        let quoted = AuthorList::parse("\"Jean Paul\" Sartre")?;
        assert_eq!(quoted.names()[0], vec!["\"Jean Paul\"", "Sartre"]);
        Ok(())
    }

    #[test]
    fn test_author_separator_errors() {
        assert!(AuthorList::parse("and Jane Doe").is_err());
        assert!(AuthorList::parse("Jane Doe and").is_err());
        assert!(AuthorList::parse("Jane Doe and  and John Roe").is_err());
        assert!(AuthorList::parse("Jane {Doe").is_err());
        assert!(AuthorList::parse("   ").is_err());
    }

    #[test]
    fn test_author_approximate_equality() -> Result<()> {
        let a = AuthorList::parse("Donald Ervin Knuth")?;
        let b = AuthorList::parse("D. E. Knuth")?;
        let c = AuthorList::parse("Knuth")?;
        let d = AuthorList::parse("Eva Knuth")?;
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_ne!(a, d);
        assert!(a < d);
        Ok(())
    }

    #[test]
    fn test_author_ordering_by_length() -> Result<()> {
        let one = AuthorList::parse("Jane Doe")?;
        let two = AuthorList::parse("Jane Doe and John Roe")?;
        assert!(one < two);
        assert_ne!(one, two);
        assert!(AuthorList::parse("Ann Adams")? < one);
        Ok(())
    }

    #[test]
    fn test_author_show() -> Result<()> {
        let a = AuthorList::parse("Donald Ervin Knuth and Jane Doe and Plato")?;
        assert_eq!(a.show(NameStyle::default()), "Donald E. Knuth, Jane Doe, Plato");
        let terse = NameStyle {
            full_first: false,
            full_other: false,
        };
        assert_eq!(a.show(terse), "D. E. Knuth, J. Doe, Plato");
        assert_eq!(a.has_author("Doe", Some("Jane")), Some(1));
        assert_eq!(a.has_author("Doe", Some("John")), None);
        Ok(())
    }

    #[test]
    fn test_initial_skips_escapes() {
        assert_eq!(initial("{\\\"O}scar"), Some('O'));
        assert_eq!(initial("{von Fuddyduddy}"), Some('V'));
        assert_eq!(initial("--"), None);
    }

    #[test]
    fn test_value_ordering_across_types() -> Result<()> {
        let i = Value::from(1999i64);
        let t = Value::from("1999");
        assert_eq!(i.compare(&t), Ordering::Less);
        assert_eq!(Value::from(2000i64).compare(&Value::from(1999i64)), Ordering::Greater);
        assert_eq!(Value::from(Month::new(3)?).compare(&Value::from(Month::new(3)?)), Ordering::Equal);
        Ok(())
    }

    #[test]
    fn test_degroup() {
        assert_eq!(degroup("Written by {{Lukas} and {tajpulo}}"), "Written by Lukas and tajpulo");
        assert_eq!(degroup("unbalanced {"), "unbalanced {");
    }

    #[test]
    fn test_unicode_text() {
        assert_eq!(unicode_text("pages 1--3 of {\\LaTeX}"), "pages 1–3 of LaTeχ");
        assert_eq!(unicode_text("a  message.\n Best"), "a message. Best");
    }
}
