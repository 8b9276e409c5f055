//! Saving a master's graph as JSON, either in one file or as a directory with
//! one file per entry next to a `collections.json` describing the collections.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entry::Entry;
use crate::errors::{Error, Result};
use crate::library::{EntryId, Library, NodeId, NodeKind};

/// File describing the collections in a directory save
pub const COLLECTIONS_FILE: &str = "collections.json";

const MAX_NAME_SUFFIX: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct CollectionRecord {
    name: String,
    kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc: Option<String>,
    /// names of the directly owned entries
    entries: Vec<String>,
    /// names of the direct children
    children: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    /// the master first, then every reachable collection breadth-first
    collections: Vec<CollectionRecord>,
    #[serde(default)]
    entries: Vec<Entry>,
}

impl Library {
    fn snapshot_collections(&self, master: NodeId) -> Result<Vec<CollectionRecord>> {
        if self[master].kind() != NodeKind::Master {
            return Err(Error::NotAttachable {
                child: self[master].name().to_string(),
                reason: "only masters can be saved",
            });
        }
        Ok(self
            .reachable(master)?
            .into_iter()
            .map(|n| CollectionRecord {
                name: self[n].name().to_string(),
                kind: self[n].kind(),
                doc: self[n].doc.clone(),
                entries: self[n].entries().keys().map(String::from).collect(),
                children: self[n].children().iter().map(|c| self[*c].name().to_string()).collect(),
            })
            .collect())
    }

    /// Write the graph of `master` and all its entries to one JSON file
    pub fn save_json<P: AsRef<Path>>(&self, master: NodeId, path: P) -> Result<()> {
        let snapshot = Snapshot {
            collections: self.snapshot_collections(master)?,
            entries: self[master].index().values().map(|e| self[*e].clone()).collect(),
        };
        let writer = BufWriter::new(fs::File::create(&path)?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        info!(path = %path.as_ref().display(), entries = snapshot.entries.len(), "saved library");
        Ok(())
    }

    /// Write the graph of `master` to `dir`: one JSON file per entry plus
    /// [`COLLECTIONS_FILE`]. JSON files left in `dir` from earlier saves are
    /// removed first. Returns the number of entry files written.
    pub fn save_json_dir<P: AsRef<Path>>(&self, master: NodeId, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let collections = self.snapshot_collections(master)?;
        fs::create_dir_all(dir)?;
        for item in fs::read_dir(dir)? {
            let path = item?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
                debug!(path = %path.display(), "removing stale file");
                fs::remove_file(path)?;
            }
        }

        let mut taken: HashSet<String> = HashSet::from([COLLECTIONS_FILE.to_string()]);
        let mut written = 0;
        for id in self[master].index().values() {
            let entry = &self[*id];
            let file_name = unique_file_name(entry.name(), &mut taken)?;
            let writer = BufWriter::new(fs::File::create(dir.join(&file_name))?);
            serde_json::to_writer_pretty(writer, entry)?;
            written += 1;
        }
        let snapshot = Snapshot {
            collections,
            entries: Vec::new(),
        };
        let writer = BufWriter::new(fs::File::create(dir.join(COLLECTIONS_FILE))?);
        serde_json::to_writer_pretty(writer, &snapshot)?;
        info!(dir = %dir.display(), entries = written, "saved library");
        Ok(written)
    }

    /// Read a graph written by [`Library::save_json`]; returns its master
    pub fn load_json<P: AsRef<Path>>(&mut self, path: P) -> Result<NodeId> {
        let reader = BufReader::new(fs::File::open(&path)?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        let master = self.restore(snapshot.collections, snapshot.entries)?;
        info!(path = %path.as_ref().display(), "loaded library");
        Ok(master)
    }

    /// Read a graph written by [`Library::save_json_dir`]; returns its master
    pub fn load_json_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<NodeId> {
        let dir = dir.as_ref();
        let reader = BufReader::new(fs::File::open(dir.join(COLLECTIONS_FILE))?);
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        let mut entries = Vec::new();
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .map(|item| item.map(|i| i.path()))
            .collect::<std::io::Result<_>>()?;
        paths.sort();
        for path in paths {
            let is_entry = path.extension().map_or(false, |ext| ext == "json")
                && path.file_name().map_or(false, |name| name != COLLECTIONS_FILE);
            if is_entry {
                let reader = BufReader::new(fs::File::open(&path)?);
                entries.push(serde_json::from_reader::<_, Entry>(reader)?);
            }
        }
        let master = self.restore(snapshot.collections, entries)?;
        info!(dir = %dir.display(), "loaded library");
        Ok(master)
    }

    fn restore(&mut self, records: Vec<CollectionRecord>, entries: Vec<Entry>) -> Result<NodeId> {
        let first = records
            .first()
            .filter(|r| r.kind == NodeKind::Master)
            .ok_or_else(|| Error::Format("a saved library must start with its master".to_string()))?;
        let mut nodes: HashMap<String, NodeId> = HashMap::new();
        let master = self.new_node(first.name.clone(), NodeKind::Master);
        nodes.insert(first.name.clone(), master);
        for record in &records[1..] {
            if nodes.contains_key(&record.name) {
                return Err(Error::NameConflict {
                    what: "collection",
                    name: record.name.clone(),
                });
            }
            let id = self.new_node(record.name.clone(), record.kind);
            nodes.insert(record.name.clone(), id);
        }

        let mut ids: HashMap<String, EntryId> = HashMap::new();
        for entry in entries {
            let name = entry.name().to_string();
            if ids.contains_key(&name) {
                return Err(Error::NameConflict { what: "entry", name });
            }
            ids.insert(name, self.insert_entry(entry));
        }

        for record in &records {
            let node = lookup(&nodes, "collection", &record.name)?;
            self[node].doc = record.doc.clone();
            for child in &record.children {
                self.add_child(node, lookup(&nodes, "collection", child)?)?;
            }
        }
        for record in &records {
            let node = lookup(&nodes, "collection", &record.name)?;
            for name in &record.entries {
                self.add(node, lookup(&ids, "entry", name)?)?;
            }
        }
        Ok(master)
    }
}

fn lookup<T: Copy>(map: &HashMap<String, T>, what: &'static str, name: &str) -> Result<T> {
    map.get(name).copied().ok_or_else(|| Error::NotFound {
        what,
        name: name.to_string(),
    })
}

/// `<name>.json` with everything but alphanumerics, `-` and `_` replaced,
/// or `<name>_<n>.json` if that is already taken
fn unique_file_name(name: &str, taken: &mut HashSet<String>) -> Result<String> {
    let stem: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let candidates = std::iter::once(format!("{stem}.json"))
        .chain((1..=MAX_NAME_SUFFIX).map(|n| format!("{stem}_{n}.json")));
    for candidate in candidates {
        if taken.insert(candidate.clone()) {
            return Ok(candidate);
        }
    }
    Err(Error::Format(format!("no free file name for entry '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use std::error;

    #[test]
    fn test_unique_file_names() -> Result<()> {
        let mut taken = HashSet::new();
        assert_eq!(unique_file_name("DBLP:books/Knuth97", &mut taken)?, "DBLP_books_Knuth97.json");
        assert_eq!(unique_file_name("DBLP:books:Knuth97", &mut taken)?, "DBLP_books_Knuth97_1.json");
        assert_eq!(unique_file_name("DBLP/books/Knuth97", &mut taken)?, "DBLP_books_Knuth97_2.json");
        Ok(())
    }

    #[test]
    fn test_single_file_round_trip() -> std::result::Result<(), Box<dyn error::Error>> {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let a = lib.new_node("a", NodeKind::Collection);
        let b = lib.new_node("b", NodeKind::SubCollection);
        lib.add_child(m, a)?;
        lib.add_child(a, b)?;
        lib.add_child(b, a)?;
        let mut e = Entry::new(EntryKind::Misc, "m1");
        e.set_field("year", 2001i64)?;
        e.doc = Some("notes".to_string());
        lib.add_entry(b, e)?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("library.json");
        lib.save_json(m, &path)?;

        let mut back = Library::new();
        let m2 = back.load_json(&path)?;
        let b2 = back.get_child(m2, "b", true)?.ok_or("no b")?;
        let e2 = back.get(b2, "m1", false)?.ok_or("no m1")?;
        assert_eq!(back[e2].doc.as_deref(), Some("notes"));
        assert_eq!(back[e2].fields(), lib[lib.get(m, "m1", true)?.ok_or("no m1")?].fields());
        assert_eq!(back[b2].master(), Some(m2));
        Ok(())
    }

    #[test]
    fn test_directory_removes_stale_files() -> std::result::Result<(), Box<dyn error::Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("old_entry.json"), "{}")?;
        fs::write(dir.path().join("README"), "keep me")?;

        let mut lib = Library::new();
        let m = lib.new_master("all");
        lib.add_entry(m, Entry::new(EntryKind::Misc, "x"))?;
        assert_eq!(lib.save_json_dir(m, dir.path())?, 1);
        assert!(!dir.path().join("old_entry.json").exists());
        assert!(dir.path().join("README").exists());
        assert!(dir.path().join("x.json").exists());
        Ok(())
    }

    #[test]
    fn test_saving_requires_a_master() {
        let mut lib = Library::new();
        let c = lib.new_node("c", NodeKind::Collection);
        let dir = std::env::temp_dir().join("never-written.json");
        assert!(matches!(lib.save_json(c, dir), Err(Error::NotAttachable { .. })));
    }
}
