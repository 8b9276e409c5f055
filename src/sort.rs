use std::cmp::Ordering;
use std::rc::Rc;

use tracing::trace;

use crate::errors::Result;
use crate::library::{EntryId, Library, NodeId};
use crate::types::{fingerprint, AuthorList, Value};

/// Direction of [`Library::sort`] and what to do with entries lacking the field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub ascending: bool,
    /// leave out entries without the field instead of putting them last
    pub omit_missing: bool,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder {
            ascending: true,
            omit_missing: false,
        }
    }
}

/// Sorting by this pseudo-field orders by entry name
pub const NAME_FIELD: &str = "name";

impl Library {
    /// All entries reachable from `node`, ordered by `field`.
    ///
    /// Entries lacking the field come last, in name order, unless
    /// `omit_missing` is set. The ascending, complete order is cached per
    /// collection and field until the library is next modified, so calling
    /// this twice returns the same `Rc`.
    pub fn sort(&mut self, node: NodeId, field: &str, order: SortOrder) -> Result<Rc<Vec<EntryId>>> {
        let cacheable = order == SortOrder::default();
        if cacheable {
            if let Some((generation, sorted)) = self[node].sorted.get(field) {
                if *generation == self.generation {
                    return Ok(Rc::clone(sorted));
                }
            }
        }

        let mut present = Vec::new();
        let mut missing = Vec::new();
        for entry in self.entry_ids(node, true)? {
            if field == NAME_FIELD || self[entry].has_field(field) {
                present.push(entry);
            } else {
                missing.push(entry);
            }
        }
        present.sort_by(|a, b| self.compare_by(*a, *b, field));
        if !order.ascending {
            present.reverse();
        }
        if !order.omit_missing {
            missing.sort_by(|a, b| self[*a].name().cmp(self[*b].name()));
            present.extend(missing);
        }
        trace!(collection = %self[node].name(), field, "sorted entries");

        let sorted = Rc::new(present);
        if cacheable {
            let generation = self.generation;
            self[node].sorted.insert(field.to_string(), (generation, Rc::clone(&sorted)));
        }
        Ok(sorted)
    }

    fn compare_by(&self, a: EntryId, b: EntryId, field: &str) -> Ordering {
        let (ea, eb) = (&self[a], &self[b]);
        let by_field = match (ea.get_field(field), eb.get_field(field)) {
            (Some(x), Some(y)) => x.compare(y),
            _ => Ordering::Equal,
        };
        by_field.then_with(|| ea.name().cmp(eb.name()))
    }

    /// Normalized (first author's last name + title), empty if there is no title
    fn duplicate_key(&self, entry: EntryId) -> String {
        let entry = &self[entry];
        let title = entry.get_field("title").map(|t| fingerprint(&t.to_string())).unwrap_or_default();
        if title.is_empty() {
            return title;
        }
        let author = match entry.get_field("author") {
            Some(Value::Authors(list)) => list.last_name(0).map(fingerprint),
            Some(other) => AuthorList::parse(&other.to_string())
                .ok()
                .and_then(|list| list.last_name(0).map(fingerprint)),
            None => None,
        };
        author.unwrap_or_default() + &title
    }

    /// Groups of entries reachable from `node` that are probably the same
    /// work entered twice: same first-author last name and same title,
    /// ignoring case and punctuation. Groups come in key order, members in
    /// name order.
    pub fn duplicates(&self, node: NodeId) -> Result<Vec<Vec<EntryId>>> {
        let mut keyed: Vec<(String, EntryId)> = self
            .entry_ids(node, true)?
            .into_iter()
            .map(|e| (self.duplicate_key(e), e))
            .filter(|(key, _)| !key.is_empty())
            .collect();
        keyed.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| self[*a].name().cmp(self[*b].name())));

        let mut groups = Vec::new();
        let mut run: Vec<EntryId> = Vec::new();
        let mut run_key: Option<&str> = None;
        for (key, entry) in &keyed {
            if run_key != Some(key.as_str()) {
                if run.len() > 1 {
                    groups.push(std::mem::take(&mut run));
                }
                run.clear();
                run_key = Some(key);
            }
            run.push(*entry);
        }
        if run.len() > 1 {
            groups.push(run);
        }
        Ok(groups)
    }
}
