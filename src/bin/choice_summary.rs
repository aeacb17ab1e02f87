//! Build a choice dataset from CSV files listed in a JSON manifest and
//! print its summary.
//!
//! ```json
//! {
//!     "main": "records.csv",
//!     "columns": {"purchase_record": "case", "item_name": "alt", "choice": "choice",
//!                 "session_index": "session"},
//!     "observables": [{"kind": "price", "name": "cost", "path": "cost.csv"}]
//! }
//! ```
extern crate choicedata;
extern crate clap;
extern crate failure;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use choicedata::{ChoiceConfig, Columns, EntityKind, Observable, Table};

#[derive(Parser, Debug)]
#[command(name = "choice_summary", about = "Summarize a long-format choice dataset")]
struct Args {
    /// JSON manifest naming the CSV files and their columns.
    manifest: PathBuf,
    /// Rows of the main table to preview.
    #[arg(long, default_value_t = 5)]
    preview: usize,
    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Deserialize, Debug)]
struct ObservableSource {
    kind: EntityKind,
    name: String,
    path: PathBuf,
}

#[derive(Deserialize, Debug)]
struct Manifest {
    main: PathBuf,
    columns: Columns,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default)]
    observables: Vec<ObservableSource>,
}

fn default_format() -> String {
    "stata".to_owned()
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        base.join(path)
    }
}

fn load_manifest(path: &Path) -> Result<Manifest, failure::Error> {
    let reader = BufReader::new(File::open(path)?);
    let manifest = serde_json::from_reader(reader)?;

    Ok(manifest)
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("choicedata=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let manifest = load_manifest(&args.manifest)?;
    let base = args
        .manifest
        .parent()
        .map(|x| x.to_owned())
        .unwrap_or_default();

    info!("Loading {}", manifest.main.display());
    let main_table = Table::from_path(resolve(&base, &manifest.main))?;

    let mut config = ChoiceConfig::from_columns(manifest.columns).format(manifest.format);

    for source in manifest.observables {
        info!("Loading {} observable {} from {}", source.kind, source.name, source.path.display());
        let table = Table::from_path(resolve(&base, &source.path))?;
        config = config.observable(Observable::new(source.kind, source.name, table));
    }

    let wrapper = config.build(main_table)?;
    let summary = wrapper.summary(args.preview)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }

    Ok(())
}
