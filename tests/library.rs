use std::collections::BTreeMap;
use std::error;
use std::rc::Rc;

use bibshelf::{
    parse, to_bib, AuthorList, Entry, EntryId, EntryKind, Error, Library, LoadOptions, Month,
    NodeId, NodeKind, Order, Parser, PostOptions, SortOrder, Value,
};
use proptest::prelude::*;

type TestResult = Result<(), Box<dyn error::Error>>;

fn article(name: &str, author: &str, title: &str, year: i64) -> Result<Entry, Error> {
    let mut e = Entry::new(EntryKind::Article, name);
    e.set_field("author", AuthorList::parse(author)?)?;
    e.set_field("title", title)?;
    e.set_field("journal", "J. Irreproducible Results")?;
    e.set_field("year", year)?;
    e.set_field("pages", "1--10")?;
    e.set_field("volume", 3i64)?;
    Ok(e)
}

fn names(lib: &Library, ids: &[EntryId]) -> Vec<String> {
    ids.iter().map(|e| lib[*e].name().to_string()).collect()
}

#[test]
fn test_export_then_parse_restores_fields() -> TestResult {
    let mut original = article("doe99", "Jane Doe and Albert {von Fuddyduddy}", "On {TeX} Tables", 1999)?;
    original.set_field("month", Month::new(7)?)?;

    let text = to_bib(&original)?;
    let records = parse(&text)?;
    assert_eq!(records.len(), 1);
    let mut back = Entry::from_record(&records[0])?;
    let report = back.post(&PostOptions::default())?;

    assert!(report.is_clean(), "{:?}", report.problems);
    assert_eq!(back.name(), original.name());
    assert_eq!(back.kind(), EntryKind::Article);
    assert_eq!(back.fields(), original.fields());
    assert_eq!(back.get_field("month"), Some(&Value::Month(Month::new(7)?)));
    Ok(())
}

#[test]
fn test_book_scenario() -> TestResult {
    let records = parse("@BOOK{b1, author={Jane Doe}, title={T}, publisher={P}, year=1999, address={X}}")?;
    let mut book = Entry::from_record(&records[0])?;
    let report = book.post(&PostOptions { strict: true, reject_unknown: true })?;

    assert!(report.is_clean());
    assert_eq!(book.kind(), EntryKind::Book);
    assert_eq!(book.get_field("year"), Some(&Value::Integer(1999)));
    assert_eq!(book.authors().map(AuthorList::len), Some(1));
    for field in ["author", "title", "publisher", "year", "address"] {
        assert!(book.has_field(field), "missing {field}");
    }
    Ok(())
}

#[test]
fn test_parser_edge_cases() -> TestResult {
    assert!(matches!(parse("@ARTICLE{k1, title = {A } B}}"), Err(Error::Syntax(_))));

    let records = parse("@STRING{me = {M. Author}} @MISC{k2, author = me, year=2020}")?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].fields.get("author").map(String::as_str), Some("M. Author"));
    assert_eq!(records[0].fields.get("year").map(String::as_str), Some("2020"));
    Ok(())
}

#[test]
fn test_author_list_grouping() -> TestResult {
    let plain = AuthorList::parse("Albert von Fuddyduddy and Plot de Vice")?;
    assert_eq!(plain.len(), 2);
    assert_eq!(plain.names()[0].len(), 3);
    assert_eq!(plain.names()[1], vec!["Plot", "de", "Vice"]);

    let grouped = AuthorList::parse("Albert {von Fuddyduddy} and Plot {de Vice}")?;
    assert_eq!(grouped.names()[0].len(), 2);
    assert_eq!(grouped.names()[1].len(), 2);
    assert_eq!(grouped.last_name(0), Some("{von Fuddyduddy}"));
    assert_eq!(grouped.last_name(1), Some("{de Vice}"));
    Ok(())
}

#[test]
fn test_sort_is_idempotent_until_any_mutation() -> TestResult {
    let mut lib = Library::new();
    let m = lib.new_master("all");
    let c = lib.new_node("c", NodeKind::Collection);
    let d = lib.new_node("d", NodeKind::Collection);
    lib.add_child(m, c)?;
    lib.add_entry(c, article("b", "Bob Jones", "Beta", 2005)?)?;
    lib.add_entry(c, article("a", "Ann Smith", "Alpha", 2010)?)?;

    let first = lib.sort(m, "year", SortOrder::default())?;
    let second = lib.sort(m, "year", SortOrder::default())?;
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(names(&lib, &first), vec!["b", "a"]);

    let newer = lib.add_entry(d, article("z", "Zed Zulu", "Zeta", 1990)?)?;
    let unchanged = lib.sort(m, "year", SortOrder::default())?;
    assert!(!Rc::ptr_eq(&first, &unchanged));
    assert_eq!(names(&lib, &unchanged), vec!["b", "a"]);

    lib.add_child(c, d)?;
    let attached = lib.sort(m, "year", SortOrder::default())?;
    assert_eq!(names(&lib, &attached), vec!["z", "b", "a"]);
    assert_eq!(lib[m].index().get("z"), Some(&newer));

    lib.remove(m, "b", true)?;
    let removed = lib.sort(m, "year", SortOrder::default())?;
    assert!(!Rc::ptr_eq(&attached, &removed));
    assert_eq!(names(&lib, &removed), vec!["z", "a"]);

    lib.add(c, newer)?;
    let again = lib.sort(m, "year", SortOrder::default())?;
    assert!(!Rc::ptr_eq(&removed, &again));
    assert_eq!(*again, *removed);
    Ok(())
}

#[test]
fn test_cycles_are_visited_once() -> TestResult {
    let mut lib = Library::new();
    let m = lib.new_master("all");
    let a = lib.new_node("A", NodeKind::Collection);
    let b = lib.new_node("B", NodeKind::SubCollection);
    lib.add_child(a, b)?;
    lib.add_child(b, a)?;
    lib.add_child(m, a)?;
    lib.add_entry(a, article("one", "Donald Knuth", "Sorting", 1973)?)?;
    lib.add_entry(b, article("two", "D. E. Knuth", "sorting!", 1998)?)?;

    for order in [Order::BreadthFirst, Order::DepthFirst] {
        let mut visited = lib.traverse(a, order, true)?;
        visited.sort();
        assert_eq!(visited, vec![a, b]);
    }
    assert_eq!(lib.get(a, "two", true)?, lib.get(m, "two", true)?);
    assert!(lib.has(b, "one", true)?);
    assert!(!lib.has(b, "one", false)?);

    let groups = lib.duplicates(a)?;
    assert_eq!(groups.len(), 1);
    assert_eq!(names(&lib, &groups[0]), vec!["one", "two"]);
    Ok(())
}

#[test]
fn test_conflicting_subgraph_is_rejected_whole() -> TestResult {
    let mut lib = Library::new();
    let m = lib.new_master("all");
    lib.add_entry(m, Entry::new(EntryKind::Misc, "taken"))?;

    let outer = lib.new_node("outer", NodeKind::Collection);
    let inner = lib.new_node("inner", NodeKind::SubCollection);
    lib.add_child(outer, inner)?;
    lib.add_entry(outer, Entry::new(EntryKind::Misc, "fresh"))?;
    lib.add_entry(inner, Entry::new(EntryKind::Misc, "taken"))?;

    assert!(matches!(lib.add_child(m, outer), Err(Error::NameConflict { .. })));
    assert!(lib[m].children().is_empty());
    assert!(!lib[m].index().contains_key("fresh"));
    assert_eq!(lib[outer].master(), None);
    assert_eq!(lib[inner].master(), None);
    Ok(())
}

#[test]
fn test_load_links_declared_collections() -> TestResult {
    let mut lib = Library::new();
    let m = lib.new_master("all");
    let reading = lib.new_node("reading", NodeKind::Collection);
    lib.add_child(m, reading)?;

    let parser: Parser = r#"
        % two entries of the same name, the first one wins
        @MISC{hobbit, title = {The Hobbit}, howpublished = {print}, year = 1937,
              collections = {reading, someday}}
        @MISC{hobbit, title = {There and Back Again}, howpublished = {print}, year = 1937}
    "#
    .parse()?;
    let report = lib.load_bib(m, &parser, &LoadOptions { relax: true, ..Default::default() })?;

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.conflicts, vec!["hobbit".to_string()]);
    assert_eq!(report.unresolved, vec![("hobbit".to_string(), "someday".to_string())]);
    let hobbit = lib.get(reading, "hobbit", false)?.ok_or("not linked")?;
    assert_eq!(lib[hobbit].text("title"), Some("The Hobbit"));
    Ok(())
}

#[test]
fn test_directory_round_trip() -> TestResult {
    let mut lib = Library::new();
    let m = lib.new_master("all");
    let c = lib.new_node("papers", NodeKind::Collection);
    let s = lib.new_node("favourites", NodeKind::SubCollection);
    lib.add_child(m, c)?;
    lib.add_child(c, s)?;
    lib.add_entry(s, article("DBLP:a/1", "Ann Smith", "One", 2001)?)?;
    lib.add_entry(c, article("DBLP/a/1", "Bob Jones", "Two", 2002)?)?;
    lib.add_entry(m, Entry::new(EntryKind::Misc, "loose"))?;

    let dir = tempfile::tempdir()?;
    assert_eq!(lib.save_json_dir(m, dir.path())?, 3);

    let mut back = Library::new();
    let m2 = back.load_json_dir(dir.path())?;
    let entries = |lib: &Library, node: NodeId| -> BTreeMap<String, Entry> {
        lib[node]
            .index()
            .iter()
            .map(|(name, id)| (name.to_string(), lib[*id].clone()))
            .collect()
    };
    let before = entries(&lib, m);
    let after = entries(&back, m2);
    assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
    for (name, entry) in &before {
        assert_eq!(entry.fields(), after[name].fields(), "{name}");
    }

    let s2 = back.get_child(m2, "favourites", true)?.ok_or("no favourites")?;
    assert!(back.has(s2, "DBLP:a/1", false)?);
    assert!(back.has(m2, "loose", false)?);
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Add { node: usize, entry: usize },
    AddChild { parent: usize, child: usize },
    Remove { node: usize, entry: usize, recurse: bool },
    /// attach a collection below one that never joins the master
    Share { outer: usize, child: usize },
    Merge { entries: Vec<usize> },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..5usize, 0..8usize).prop_map(|(node, entry)| Op::Add { node, entry }),
        (0..5usize, 0..5usize).prop_map(|(parent, child)| Op::AddChild { parent, child }),
        (0..7usize, 0..8usize, any::<bool>()).prop_map(|(node, entry, recurse)| Op::Remove { node, entry, recurse }),
        (0..2usize, 1..5usize).prop_map(|(outer, child)| Op::Share { outer, child }),
        prop::collection::vec(0..12usize, 0..4).prop_map(|entries| Op::Merge { entries }),
    ]
}

/// Every entry reachable from `m`, by name
fn reachable_entries(lib: &Library, m: NodeId) -> Result<BTreeMap<String, EntryId>, Error> {
    let mut found = BTreeMap::new();
    for node in lib.traverse(m, Order::DepthFirst, true)? {
        for (name, entry) in lib[node].entries().iter() {
            found.insert(name.to_string(), *entry);
        }
    }
    Ok(found)
}

proptest! {
    #[test]
    fn test_master_index_is_union_of_reachable_entries(ops in prop::collection::vec(op(), 1..40)) {
        let mut lib = Library::new();
        let m = lib.new_master("all");
        let mut nodes = vec![m];
        for i in 1..5 {
            let kind = if i % 2 == 0 { NodeKind::SubCollection } else { NodeKind::Collection };
            nodes.push(lib.new_node(format!("c{i}"), kind));
        }
        let outers = [
            lib.new_node("outer0", NodeKind::Collection),
            lib.new_node("outer1", NodeKind::Collection),
        ];
        let holders: Vec<NodeId> = nodes.iter().chain(outers.iter()).copied().collect();
        let entries: Vec<EntryId> = (0..8)
            .map(|i| lib.insert_entry(Entry::new(EntryKind::Misc, format!("e{i}"))))
            .collect();

        for (step, op) in ops.into_iter().enumerate() {
            let outcome = match op {
                Op::Add { node, entry } => lib.add(nodes[node], entries[entry]),
                Op::AddChild { parent, child } => lib.add_child(nodes[parent], nodes[child]),
                Op::Remove { node, entry, recurse } => {
                    lib.remove(holders[node], &format!("e{entry}"), recurse).map(|_| ())
                }
                Op::Share { outer, child } => lib.add_child(outers[outer], nodes[child]),
                Op::Merge { entries: picked } => {
                    let other = lib.new_master(format!("other{step}"));
                    let inner = lib.new_node(format!("inner{step}"), NodeKind::Collection);
                    let mut setup = lib.add_child(other, inner);
                    for i in picked {
                        // names e0..e7 collide with the main entries
                        let entry = Entry::new(EntryKind::Misc, format!("e{i}"));
                        setup = setup.and_then(|_| lib.add_entry(inner, entry).map(|_| ()));
                    }
                    setup.and_then(|_| lib.merge(m, other, &format!("merged{step}")).map(|_| ()))
                }
            };
            if let Err(e) = &outcome {
                prop_assert!(
                    matches!(e, Error::NameConflict { .. } | Error::MasterMismatch { .. } | Error::NotAttachable { .. }),
                    "unexpected error {e}"
                );
            }

            let index: BTreeMap<String, EntryId> = lib[m]
                .index()
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect();
            prop_assert_eq!(index, reachable_entries(&lib, m)?);
        }
    }
}
