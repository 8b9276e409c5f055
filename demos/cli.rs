use std::error;
use std::fs;
use std::io;
use std::path::PathBuf;

use bibshelf::{Library, LoadOptions, NodeId, Parser, PostOptions, SortOrder, TextStyle, NAME_FIELD};

use clap::Parser as CLIParser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Settings {
    /// Filepath of the .bib file to read
    #[clap(short, long)]
    input: PathBuf,

    /// Keep the first of conflicting entries instead of failing
    #[clap(long)]
    relax: bool,

    /// Fail on entries with missing, unknown or malformed fields
    #[clap(long)]
    strict: bool,

    /// More log output (repeatable)
    #[clap(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Less log output (repeatable)
    #[clap(short, long, parse(from_occurrences))]
    quiet: usize,

    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// List entry names
    List {
        /// Sort by this field instead of the name
        #[clap(short, long)]
        by: Option<String>,

        /// Print the entries as JSON
        #[clap(long)]
        json: bool,

        #[clap(short, long, default_value_t = 80)]
        width: usize,
    },
    /// Print one entry as a citation
    Show {
        name: String,

        /// Use bold and italic terminal escapes
        #[clap(long)]
        ansi: bool,

        #[clap(short, long)]
        width: Option<usize>,
    },
    /// Report groups of probable duplicates
    Dups,
    /// Write all entries as .bib records
    Export {
        /// Write patents and websites as @MISC records
        #[clap(long)]
        classic: bool,

        /// Target file instead of standard output
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Save the library as JSON
    Save {
        target: PathBuf,

        /// One file per entry in the target directory
        #[clap(long)]
        dir: bool,
    },
}

#[derive(Serialize)]
struct JsonEntry<'e> {
    kind: &'static str,
    name: &'e str,
    fields: Vec<(&'e str, String)>,
}

fn init_logging(s: &Settings) {
    let level = match 2 + s.verbose as i64 - s.quiet as i64 {
        i64::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load(s: &Settings) -> Result<(Library, NodeId), Box<dyn error::Error>> {
    let mut lib = Library::new();
    let master = lib.new_master("master");
    let parser = Parser::from_file(&s.input)?;
    let options = LoadOptions {
        relax: s.relax,
        post: PostOptions {
            strict: s.strict,
            reject_unknown: s.strict,
        },
    };
    let report = lib.load_bib(master, &parser, &options)?;
    for (name, problem) in &report.problems {
        eprintln!("{name}: {problem}");
    }
    for name in &report.conflicts {
        eprintln!("{name}: skipped, name already taken");
    }
    Ok((lib, master))
}

fn main() -> Result<(), Box<dyn error::Error>> {
    let settings = Settings::parse();
    init_logging(&settings);
    let (mut lib, master) = load(&settings)?;

    match &settings.command {
        Command::List { by, json, width } => {
            let field = by.as_deref().unwrap_or(NAME_FIELD);
            let sorted = lib.sort(master, field, SortOrder::default())?;
            if *json {
                let entries: Vec<JsonEntry> = sorted
                    .iter()
                    .map(|id| {
                        let e = &lib[*id];
                        JsonEntry {
                            kind: e.kind().tag(),
                            name: e.name(),
                            fields: e.fields().iter().map(|(k, v)| (k, v.to_string())).collect(),
                        }
                    })
                    .collect();
                println!("{}", serde_json::to_string(&entries)?);
            } else if by.is_some() {
                for id in sorted.iter() {
                    println!("{}", lib[*id].name());
                }
            } else {
                print!("{}", lib.list(master, true, *width)?);
            }
        }
        Command::Show { name, ansi, width } => {
            let id = lib.get(master, name, true)?.ok_or_else(|| format!("no entry named '{name}'"))?;
            let style = TextStyle {
                ansi: *ansi,
                width: *width,
                doc: true,
            };
            print!("{}", bibshelf::write_txt(&lib[id], &style));
        }
        Command::Dups => {
            for group in lib.duplicates(master)? {
                let names: Vec<&str> = group.iter().map(|id| lib[*id].name()).collect();
                println!("{}", names.join(" "));
            }
        }
        Command::Export { classic, output } => match output {
            Some(path) => {
                let mut file = io::BufWriter::new(fs::File::create(path)?);
                lib.write_bib(&mut file, master, true, *classic)?;
            }
            None => {
                lib.write_bib(&mut io::stdout().lock(), master, true, *classic)?;
            }
        },
        Command::Save { target, dir } => {
            if *dir {
                lib.save_json_dir(master, target)?;
            } else {
                lib.save_json(master, target)?;
            }
        }
    }

    Ok(())
}
