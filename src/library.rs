use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::entry::{Entry, PostOptions};
use crate::errors::{Error, ParsingWarning, Problem, Result};
use crate::ordmap::OrderedMap;
use crate::parser::Parser;

/// Handle of an entry stored in a [`Library`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub(crate) usize);

/// Handle of a collection stored in a [`Library`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// a generic container
    Collection,
    /// a container that may not hang directly below a master
    SubCollection,
    /// the root of a graph, owning the index of every reachable entry
    Master,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Collection => "collection",
                Self::SubCollection => "sub-collection",
                Self::Master => "master",
            }
        )
    }
}

/// A named container of entries and child collections
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub doc: Option<String>,
    pub(crate) kind: NodeKind,
    pub(crate) entries: OrderedMap<EntryId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) master: Option<NodeId>,
    /// every entry reachable from a master; empty for other kinds
    pub(crate) index: OrderedMap<EntryId>,
    pub(crate) sorted: HashMap<String, (u64, Rc<Vec<EntryId>>)>,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Node {
        Node {
            name,
            doc: None,
            kind,
            entries: OrderedMap::new(),
            children: Vec::new(),
            master: None,
            index: OrderedMap::new(),
            sorted: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The master this collection currently belongs to. A master belongs to itself.
    pub fn master(&self) -> Option<NodeId> {
        self.master
    }

    /// Directly owned entries, by name
    pub fn entries(&self) -> &OrderedMap<EntryId> {
        &self.entries
    }

    /// Direct children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The flat index of a master
    pub fn index(&self) -> &OrderedMap<EntryId> {
        &self.index
    }
}

/// Flags for [`Library::load_bib`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// keep the first of conflicting entries and never fail on `post` problems
    pub relax: bool,
    pub post: PostOptions,
}

/// What [`Library::load_bib`] did besides adding entries
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<EntryId>,
    /// names of entries skipped because an entry of that name already existed
    pub conflicts: Vec<String>,
    /// non-fatal `post` findings, by entry name
    pub problems: Vec<(String, Problem)>,
    pub warnings: Vec<ParsingWarning>,
    /// declared (entry, collection) memberships without such a collection
    pub unresolved: Vec<(String, String)>,
}

/// Arena of entries and collections.
///
/// Entries and collections are addressed by [`EntryId`] and [`NodeId`]
/// handles; parent/child links are handles too, so collections may be shared
/// between parents and may form cycles. Indexing with a handle from another
/// library panics.
///
/// Every entry reachable from a master is registered in the master's flat
/// index under its name, and a name maps to one entry only. The mutating
/// operations below keep this true or fail without changing anything.
#[derive(Debug, Default)]
pub struct Library {
    pub(crate) entries: Vec<Entry>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) generation: u64,
}

impl Index<EntryId> for Library {
    type Output = Entry;

    fn index(&self, id: EntryId) -> &Entry {
        &self.entries[id.0]
    }
}

impl IndexMut<EntryId> for Library {
    fn index_mut(&mut self, id: EntryId) -> &mut Entry {
        &mut self.entries[id.0]
    }
}

impl Index<NodeId> for Library {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for Library {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}

impl Library {
    pub fn new() -> Library {
        Library::default()
    }

    /// Create a standalone collection
    pub fn new_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(name.into(), kind);
        if kind == NodeKind::Master {
            node.master = Some(id);
        }
        self.nodes.push(node);
        id
    }

    pub fn new_master(&mut self, name: impl Into<String>) -> NodeId {
        self.new_node(name, NodeKind::Master)
    }

    /// Store an entry without putting it in any collection
    pub fn insert_entry(&mut self, entry: Entry) -> EntryId {
        self.entries.push(entry);
        EntryId(self.entries.len() - 1)
    }

    /// Store `entry` and add it to `node`
    pub fn add_entry(&mut self, node: NodeId, entry: Entry) -> Result<EntryId> {
        if let Some(other) = self.holder_of(node, entry.name()) {
            return Err(Error::NameConflict {
                what: "entry",
                name: self[other].name().to_string(),
            });
        }
        let id = self.insert_entry(entry);
        self.add(node, id)?;
        Ok(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Any mutation makes every cached sort stale
    pub(crate) fn touch(&mut self) {
        self.generation += 1;
    }

    /// The entry `node` or its master already holds under `name`
    fn holder_of(&self, node: NodeId, name: &str) -> Option<EntryId> {
        let found = self[node].master.and_then(|m| self[m].index.get(name).copied());
        found.or_else(|| self[node].entries.get(name).copied())
    }

    /// Put an entry into `node`, and into its master's index.
    ///
    /// Adding the same entry twice is fine; adding a different entry under a
    /// name the master (or a masterless `node`) already knows is a
    /// [`Error::NameConflict`].
    pub fn add(&mut self, node: NodeId, entry: EntryId) -> Result<()> {
        let name = self[entry].name().to_string();
        if let Some(other) = self.holder_of(node, &name) {
            if other != entry {
                return Err(Error::NameConflict { what: "entry", name });
            }
        }
        debug!(entry = %name, collection = %self[node].name, "adding entry");
        self[node].entries.insert(name.clone(), entry);
        if let Some(master) = self[node].master {
            self[master].index.insert(name, entry);
        }
        self.touch();
        Ok(())
    }

    /// Make `child` a child of `parent`.
    ///
    /// Masters cannot be attached anywhere and sub-collections cannot hang
    /// directly below a master. If `parent` belongs to a master, every
    /// collection and entry reachable from `child` is checked against the
    /// master's graph first; nothing changes unless all of them fit.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        let child_name = self[child].name.clone();
        if parent == child {
            return Err(Error::NotAttachable {
                child: child_name,
                reason: "a collection cannot contain itself",
            });
        }
        match (self[child].kind, self[parent].kind) {
            (NodeKind::Master, _) => {
                return Err(Error::NotAttachable {
                    child: child_name,
                    reason: "a master cannot be a child",
                })
            }
            (NodeKind::SubCollection, NodeKind::Master) => {
                return Err(Error::NotAttachable {
                    child: child_name,
                    reason: "a sub-collection cannot be a direct child of a master",
                })
            }
            _ => {}
        }
        if self[parent].children.contains(&child) {
            return Ok(());
        }
        if self[parent].children.iter().any(|c| self[*c].name == child_name) {
            return Err(Error::NameConflict {
                what: "collection",
                name: child_name,
            });
        }

        let master = self[parent].master;
        if let Some(existing) = self[child].master {
            if Some(existing) != master {
                return Err(Error::MasterMismatch {
                    child: child_name,
                    parent: self[parent].name.clone(),
                });
            }
        }

        match master {
            Some(m) if self[child].master != Some(m) => {
                let subgraph = self.reachable(child)?;
                let new_entries = self.check_joinable(m, &subgraph)?;
                self[parent].children.push(child);
                for node in subgraph {
                    self[node].master = Some(m);
                }
                for (name, entry) in new_entries {
                    self[m].index.insert(name, entry);
                }
            }
            _ => self[parent].children.push(child),
        }
        debug!(child = %child_name, parent = %self[parent].name, "attached collection");
        self.touch();
        Ok(())
    }

    /// Everything in `subgraph` must be new to master `m` or already be its
    /// own. Returns the entries to add to the index.
    fn check_joinable(&self, m: NodeId, subgraph: &[NodeId]) -> Result<Vec<(String, EntryId)>> {
        let mut collections: HashMap<&str, NodeId> = HashMap::new();
        for node in self.reachable(m)? {
            collections.insert(&self[node].name, node);
        }
        let mut pending: HashMap<&str, EntryId> = HashMap::new();
        let mut new_entries = Vec::new();

        for &node in subgraph {
            if let Some(other) = self[node].master {
                if other != m {
                    return Err(Error::MasterMismatch {
                        child: self[node].name.clone(),
                        parent: self[m].name.clone(),
                    });
                }
            }
            let name = self[node].name.as_str();
            match collections.get(name) {
                Some(existing) if *existing != node => {
                    return Err(Error::NameConflict {
                        what: "collection",
                        name: name.to_string(),
                    })
                }
                _ => {
                    collections.insert(name, node);
                }
            }

            for (name, entry) in self[node].entries.iter() {
                let known = self[m].index.get(name).or_else(|| pending.get(name));
                match known {
                    Some(existing) if existing != entry => {
                        return Err(Error::NameConflict {
                            what: "entry",
                            name: name.to_string(),
                        })
                    }
                    Some(_) => {}
                    None => {
                        pending.insert(name, *entry);
                        new_entries.push((name.to_string(), *entry));
                    }
                }
            }
        }
        Ok(new_entries)
    }

    /// Detach the direct child called `name` from `parent`. Collections no
    /// longer reachable from the master lose it, and so do their entries.
    pub fn remove_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        let position = self[parent]
            .children
            .iter()
            .position(|c| self[*c].name == name)
            .ok_or_else(|| Error::NotFound {
                what: "collection",
                name: name.to_string(),
            })?;
        let child = self[parent].children.remove(position);

        if let Some(m) = self[parent].master {
            let still: HashSet<NodeId> = self.reachable(m)?.into_iter().collect();
            for node in self.node_ids().collect::<Vec<_>>() {
                if self[node].master == Some(m) && !still.contains(&node) {
                    self[node].master = None;
                }
            }
            self.rebuild_index(m)?;
        }
        debug!(child = %name, parent = %self[parent].name, "detached collection");
        self.touch();
        Ok(child)
    }

    /// Recompute a master's index from the entries reachable from it
    pub(crate) fn rebuild_index(&mut self, m: NodeId) -> Result<()> {
        let mut index = OrderedMap::new();
        for node in self.reachable(m)? {
            for (name, entry) in self[node].entries.iter() {
                if index.insert(name, *entry).is_some_and(|old| old != *entry) {
                    warn!(entry = %name, "two different entries share a name below one master");
                }
            }
        }
        self[m].index = index;
        Ok(())
    }

    /// Drop `name` from the index of master `m` unless it is still
    /// reachable somewhere
    fn prune_index(&mut self, m: NodeId, name: &str) -> Result<()> {
        let reachable = self.reachable(m)?;
        if !reachable.iter().any(|n| self[*n].entries.contains_key(name)) {
            self[m].index.remove(name);
        }
        Ok(())
    }

    /// Remove the entry called `name` from `node`, and with `recurse` from
    /// every collection reachable from it. Returns how many collections held
    /// the entry; zero is not an error.
    pub fn remove(&mut self, node: NodeId, name: &str, recurse: bool) -> Result<usize> {
        let holders = if recurse { self.reachable(node)? } else { vec![node] };
        let mut removed: Option<EntryId> = None;
        let mut masters: Vec<NodeId> = Vec::new();
        let mut count = 0;
        for holder in holders {
            if let Some(entry) = self[holder].entries.remove(name) {
                if let Some(m) = self[holder].master {
                    if !masters.contains(&m) {
                        masters.push(m);
                    }
                }
                match removed {
                    Some(first) if first != entry => {
                        warn!(entry = %name, collection = %self[holder].name, "removed a different entry of the same name")
                    }
                    _ => {}
                }
                removed.get_or_insert(entry);
                count += 1;
            }
        }
        for m in masters {
            self.prune_index(m, name)?;
        }
        if count > 0 {
            debug!(entry = %name, count, "removed entry");
            self.touch();
        }
        Ok(count)
    }

    /// Like [`Library::remove`], but finding nothing is [`Error::NotFound`]
    pub fn remove_existing(&mut self, node: NodeId, name: &str, recurse: bool) -> Result<usize> {
        match self.remove(node, name, recurse)? {
            0 => Err(Error::NotFound {
                what: "entry",
                name: name.to_string(),
            }),
            n => Ok(n),
        }
    }

    /// Move the whole graph of master `other` below `master`, as a new
    /// collection called `name` holding `other`'s direct entries and children.
    /// `other` is left empty.
    pub fn merge(&mut self, master: NodeId, other: NodeId, name: &str) -> Result<NodeId> {
        for node in [master, other] {
            if self[node].kind != NodeKind::Master {
                return Err(Error::NotAttachable {
                    child: self[node].name.clone(),
                    reason: "only masters can be merged",
                });
            }
        }
        if master == other {
            return Err(Error::NotAttachable {
                child: self[other].name.clone(),
                reason: "a master cannot be merged into itself",
            });
        }

        let ours: HashSet<&str> = self
            .reachable(master)?
            .into_iter()
            .map(|n| self[n].name.as_str())
            .collect();
        let theirs = self.traverse(other, crate::traverse::Order::BreadthFirst, false)?;
        if ours.contains(name) {
            return Err(Error::NameConflict {
                what: "collection",
                name: name.to_string(),
            });
        }
        for node in &theirs {
            let node_name = self[*node].name.as_str();
            if ours.contains(node_name) || node_name == name {
                return Err(Error::NameConflict {
                    what: "collection",
                    name: node_name.to_string(),
                });
            }
        }
        for (entry_name, entry) in self[other].index.iter() {
            if let Some(existing) = self[master].index.get(entry_name) {
                if existing != entry {
                    return Err(Error::NameConflict {
                        what: "entry",
                        name: entry_name.to_string(),
                    });
                }
            }
        }

        let imported = self.new_node(name, NodeKind::Collection);
        let entries = std::mem::take(&mut self[other].entries);
        let children = std::mem::take(&mut self[other].children);
        let index = std::mem::take(&mut self[other].index);
        self[other].sorted.clear();
        self[imported].entries = entries;
        self[imported].children = children;
        self[imported].master = Some(master);
        for node in theirs {
            self[node].master = Some(master);
        }
        for (entry_name, entry) in index.iter() {
            self[master].index.insert(entry_name, *entry);
        }
        self[master].children.push(imported);
        info!(from = %self[other].name, into = %self[master].name, collection = %name, "merged masters");
        self.touch();
        Ok(imported)
    }

    /// Find an entry by name in `node`, and with `deep` anywhere below it
    pub fn get(&self, node: NodeId, name: &str, deep: bool) -> Result<Option<EntryId>> {
        if let Some(entry) = self[node].entries.get(name) {
            return Ok(Some(*entry));
        }
        if !deep {
            return Ok(None);
        }
        if self[node].kind == NodeKind::Master {
            return Ok(self[node].index.get(name).copied());
        }
        for n in self.traverse(node, crate::traverse::Order::BreadthFirst, false)? {
            if let Some(entry) = self[n].entries.get(name) {
                return Ok(Some(*entry));
            }
        }
        Ok(None)
    }

    pub fn has(&self, node: NodeId, name: &str, deep: bool) -> Result<bool> {
        Ok(self.get(node, name, deep)?.is_some())
    }

    /// Find a collection by name among the children of `node`, and with
    /// `deep` anywhere below it
    pub fn get_child(&self, node: NodeId, name: &str, deep: bool) -> Result<Option<NodeId>> {
        let found = if deep {
            self.traverse(node, crate::traverse::Order::BreadthFirst, false)?
                .into_iter()
                .find(|n| self[*n].name == name)
        } else {
            self[node].children.iter().copied().find(|n| self[*n].name == name)
        };
        Ok(found)
    }

    pub fn has_child(&self, node: NodeId, name: &str, deep: bool) -> Result<bool> {
        Ok(self.get_child(node, name, deep)?.is_some())
    }

    /// Entries of `node`, with `deep` also those of every collection below it.
    /// Each entry appears once.
    pub fn entry_ids(&self, node: NodeId, deep: bool) -> Result<Vec<EntryId>> {
        if !deep {
            return Ok(self[node].entries.values().copied().collect());
        }
        if self[node].kind == NodeKind::Master {
            return Ok(self[node].index.values().copied().collect());
        }
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for n in self.reachable(node)? {
            for entry in self[n].entries.values() {
                if seen.insert(*entry) {
                    ids.push(*entry);
                }
            }
        }
        Ok(ids)
    }

    /// Pull every entry found below `node` into `node` itself; returns how
    /// many were new to it
    pub fn flatten(&mut self, node: NodeId) -> Result<usize> {
        let below = self.entry_ids(node, true)?;
        let mut added = 0;
        for entry in below {
            if !self[node].entries.contains_key(self[entry].name()) {
                self.add(node, entry)?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Entry names of `node` laid out in columns no wider than `width`
    pub fn list(&self, node: NodeId, deep: bool, width: usize) -> Result<String> {
        let mut names: Vec<&str> = self
            .entry_ids(node, deep)?
            .into_iter()
            .map(|e| self[e].name())
            .collect();
        names.sort_unstable();
        let column = names.iter().map(|n| n.chars().count()).max().unwrap_or(0) + 2;
        let per_line = (width / column).max(1);
        let mut out = String::new();
        for line in names.chunks(per_line) {
            let cells: Vec<String> = line.iter().map(|n| format!("{n:column$}")).collect();
            out.push_str(cells.concat().trim_end());
            out.push('\n');
        }
        Ok(out)
    }

    /// Add each entry of master `m` to the collections it declares
    /// membership in. Returns the (entry, collection) pairs that name no
    /// collection of the master.
    pub fn link_declared_collections(&mut self, m: NodeId) -> Result<Vec<(String, String)>> {
        let collections: HashMap<String, NodeId> = self
            .reachable(m)?
            .into_iter()
            .map(|n| (self[n].name.clone(), n))
            .collect();
        let mut unresolved = Vec::new();
        let declared: Vec<(EntryId, Vec<String>)> = self[m]
            .index
            .values()
            .map(|e| (*e, self[*e].collections.clone()))
            .filter(|(_, c)| !c.is_empty())
            .collect();
        for (entry, names) in declared {
            for name in names {
                match collections.get(&name) {
                    Some(node) => self.add(*node, entry)?,
                    None => {
                        warn!(entry = %self[entry].name(), collection = %name, "entry declares an unknown collection");
                        unresolved.push((self[entry].name().to_string(), name));
                    }
                }
            }
        }
        Ok(unresolved)
    }

    /// Read every entry `parser` yields, post-process it and add it to `node`.
    ///
    /// Without `relax`, the first name conflict or (in strict mode) invalid
    /// entry aborts the load; entries added before stay. With `relax`, the
    /// first entry of a name wins, later ones are reported and skipped.
    pub fn load_bib(&mut self, node: NodeId, parser: &Parser, options: &LoadOptions) -> Result<LoadReport> {
        let post = if options.relax {
            PostOptions {
                strict: false,
                ..options.post
            }
        } else {
            options.post
        };
        let mut report = LoadReport::default();
        let mut entries = parser.entries();
        for item in &mut entries {
            let mut entry = item?;
            let name = entry.name().to_string();
            for problem in entry.post(&post)?.problems {
                report.problems.push((name.clone(), problem));
            }
            if options.relax && self.holder_of(node, &name).is_some() {
                warn!(entry = %name, "skipping entry, the name is already taken");
                report.conflicts.push(name);
                continue;
            }
            report.loaded.push(self.add_entry(node, entry)?);
        }
        report.warnings = entries.take_warnings();
        if let Some(m) = self[node].master {
            report.unresolved = self.link_declared_collections(m)?;
        }
        info!(
            loaded = report.loaded.len(),
            skipped = report.conflicts.len(),
            source = ?parser.source(),
            "loaded bibliography"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use std::error;
    use std::str::FromStr;

    fn misc(name: &str) -> Entry {
        Entry::new(EntryKind::Misc, name)
    }

    #[test]
    fn test_add_registers_in_master() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let c = lib.new_node("reading", NodeKind::Collection);
        lib.add_child(m, c)?;
        let e = lib.add_entry(c, misc("e1"))?;
        assert_eq!(lib[m].index().get("e1"), Some(&e));
        assert!(lib[m].entries().is_empty());
        assert_eq!(lib.get(m, "e1", true)?, Some(e));
        assert_eq!(lib.get(m, "e1", false)?, None);
        // same entry again is fine, another one of that name is not
        lib.add(m, e)?;
        assert!(matches!(lib.add_entry(m, misc("e1")), Err(Error::NameConflict { .. })));
        Ok(())
    }

    #[test]
    fn test_add_child_rules() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let other = lib.new_master("else");
        let sub = lib.new_node("sub", NodeKind::SubCollection);
        let c = lib.new_node("c", NodeKind::Collection);

        assert!(matches!(lib.add_child(c, other), Err(Error::NotAttachable { .. })));
        assert!(matches!(lib.add_child(m, sub), Err(Error::NotAttachable { .. })));
        assert!(matches!(lib.add_child(c, c), Err(Error::NotAttachable { .. })));
        lib.add_child(c, sub)?;
        lib.add_child(m, c)?;
        lib.add_child(m, c)?;
        assert_eq!(lib[m].children(), &[c]);
        assert_eq!(lib[sub].master(), Some(m));

        let stray = lib.new_node("stray", NodeKind::Collection);
        let c2 = lib.new_node("c2", NodeKind::Collection);
        lib.add_child(other, c2)?;
        assert!(matches!(lib.add_child(stray, c2), Err(Error::MasterMismatch { .. })));
        assert!(matches!(lib.add_child(c, c2), Err(Error::MasterMismatch { .. })));
        Ok(())
    }

    #[test]
    fn test_add_child_is_all_or_nothing() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        lib.add_child(m, a)?;
        lib.add_entry(a, misc("shared"))?;

        let b = lib.new_node("b", NodeKind::Collection);
        let deep = lib.new_node("deep", NodeKind::SubCollection);
        lib.add_child(b, deep)?;
        lib.add_entry(b, misc("fresh"))?;
        lib.add_entry(deep, misc("shared"))?;

        assert!(matches!(lib.add_child(m, b), Err(Error::NameConflict { what: "entry", .. })));
        assert_eq!(lib[m].children(), &[a]);
        assert_eq!(lib[b].master(), None);
        assert_eq!(lib[deep].master(), None);
        assert!(!lib[m].index().contains_key("fresh"));

        let twin = lib.new_node("a", NodeKind::Collection);
        let holder = lib.new_node("holder", NodeKind::Collection);
        lib.add_child(holder, twin)?;
        assert!(matches!(lib.add_child(m, holder), Err(Error::NameConflict { what: "collection", .. })));
        Ok(())
    }

    #[test]
    fn test_identical_shared_entries_are_tolerated() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        let b = lib.new_node("b", NodeKind::Collection);
        let e = lib.insert_entry(misc("e"));
        lib.add(a, e)?;
        lib.add(b, e)?;
        lib.add_child(m, a)?;
        lib.add_child(m, b)?;
        assert_eq!(lib[m].index().len(), 1);
        assert_eq!(lib.entry_ids(m, true)?, vec![e]);
        Ok(())
    }

    #[test]
    fn test_remove() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        let b = lib.new_node("b", NodeKind::SubCollection);
        lib.add_child(m, a)?;
        lib.add_child(a, b)?;
        let e = lib.add_entry(a, misc("e"))?;
        lib.add(b, e)?;

        assert_eq!(lib.remove(a, "e", false)?, 1);
        assert!(lib[m].index().contains_key("e"), "still reachable through b");
        assert_eq!(lib.remove(a, "e", false)?, 0);
        assert!(matches!(lib.remove_existing(a, "e", false), Err(Error::NotFound { .. })));
        assert_eq!(lib.remove(m, "e", true)?, 1);
        assert!(!lib.has(m, "e", true)?);
        Ok(())
    }

    #[test]
    fn test_remove_below_masterless_node_updates_index() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let outer = lib.new_node("outer", NodeKind::Collection);
        let inner = lib.new_node("inner", NodeKind::Collection);
        lib.add_child(outer, inner)?;
        lib.add_child(m, inner)?;
        lib.add_entry(inner, misc("e"))?;
        assert_eq!(lib[outer].master(), None);

        assert_eq!(lib.remove(outer, "e", true)?, 1);
        assert!(!lib.has(inner, "e", false)?);
        assert!(!lib[m].index().contains_key("e"));
        Ok(())
    }

    #[test]
    fn test_remove_child_detaches_master() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        let b = lib.new_node("b", NodeKind::SubCollection);
        lib.add_child(m, a)?;
        lib.add_child(a, b)?;
        lib.add_entry(b, misc("e"))?;
        assert_eq!(lib.remove_child(m, "a")?, a);
        assert_eq!(lib[a].master(), None);
        assert_eq!(lib[b].master(), None);
        assert!(lib[m].index().is_empty());
        assert!(lib.has(a, "e", true)?);
        assert!(matches!(lib.remove_child(m, "a"), Err(Error::NotFound { .. })));
        Ok(())
    }

    #[test]
    fn test_merge() -> Result<()> {
        let mut lib = Library::new();
        let m1 = lib.new_master("mine");
        let m2 = lib.new_master("yours");
        let c = lib.new_node("theirs", NodeKind::Collection);
        lib.add_child(m2, c)?;
        lib.add_entry(m2, misc("top"))?;
        lib.add_entry(c, misc("inner"))?;
        lib.add_entry(m1, misc("own"))?;

        let imported = lib.merge(m1, m2, "imported")?;
        assert_eq!(lib[imported].entries().len(), 1);
        assert_eq!(lib[imported].children(), &[c]);
        assert_eq!(lib[c].master(), Some(m1));
        assert_eq!(lib[m1].index().len(), 3);
        assert!(lib[m2].index().is_empty());
        assert!(lib[m2].children().is_empty());
        Ok(())
    }

    #[test]
    fn test_merge_rejects_collisions() -> Result<()> {
        let mut lib = Library::new();
        let m1 = lib.new_master("mine");
        let m2 = lib.new_master("yours");
        lib.add_entry(m1, misc("e"))?;
        lib.add_entry(m2, misc("e"))?;
        assert!(matches!(lib.merge(m1, m2, "imported"), Err(Error::NameConflict { what: "entry", .. })));
        assert!(matches!(lib.merge(m1, m2, "mine"), Err(Error::NameConflict { what: "collection", .. })));
        assert_eq!(lib[m2].index().len(), 1);
        let c = lib.new_node("c", NodeKind::Collection);
        assert!(matches!(lib.merge(m1, c, "x"), Err(Error::NotAttachable { .. })));
        Ok(())
    }

    #[test]
    fn test_children_and_flatten() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        let b = lib.new_node("b", NodeKind::SubCollection);
        lib.add_child(m, a)?;
        lib.add_child(a, b)?;
        lib.add_entry(b, misc("deep"))?;
        assert_eq!(lib.get_child(m, "b", false)?, None);
        assert_eq!(lib.get_child(m, "b", true)?, Some(b));
        assert!(lib.has_child(a, "b", false)?);
        assert_eq!(lib.flatten(a)?, 1);
        assert_eq!(lib.flatten(a)?, 0);
        assert!(lib.has(a, "deep", false)?);
        Ok(())
    }

    #[test]
    fn test_list() -> Result<()> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        for name in ["knuth73", "lamport94", "doe99"] {
            lib.add_entry(m, misc(name))?;
        }
        assert_eq!(lib.list(m, false, 22)?, "doe99      knuth73\nlamport94\n");
        Ok(())
    }

    #[test]
    fn test_load_bib_relaxed() -> std::result::Result<(), Box<dyn error::Error>> {
        let src = r#"
            @misc{a, title = {First}, howpublished = {web}, year = 2001, collections = {reading, nowhere}}
            @misc{a, title = {Second}, howpublished = {web}, year = 2002}
            @book{b, title = {No author}}
        "#;
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let reading = lib.new_node("reading", NodeKind::Collection);
        lib.add_child(m, reading)?;

        let parser = Parser::from_str(src)?;
        let strict = lib.load_bib(m, &parser, &LoadOptions::default());
        assert!(matches!(strict, Err(Error::NameConflict { .. })));

        let mut lib = Library::new();
        let m = lib.new_master("all");
        let reading = lib.new_node("reading", NodeKind::Collection);
        lib.add_child(m, reading)?;
        let options = LoadOptions {
            relax: true,
            post: PostOptions { strict: true, reject_unknown: false },
        };
        let report = lib.load_bib(m, &parser, &options)?;
        assert_eq!(report.loaded.len(), 2);
        assert_eq!(report.conflicts, vec!["a"]);
        assert_eq!(report.unresolved, vec![("a".to_string(), "nowhere".to_string())]);
        assert!(report.problems.iter().any(|(name, _)| name == "b"));
        let a = lib.get(m, "a", true)?.ok_or("missing a")?;
        assert_eq!(lib[a].text("title"), Some("First"));
        assert!(lib.has(reading, "a", false)?);
        Ok(())
    }
}
