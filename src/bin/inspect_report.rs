use anyhow::Result;
use dmsreport::{
    history::{FileStatus, Ledger},
    process::{parse_dated_name, Cell, Table, DIVISION_COLUMN},
};
use serde_json::json;
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    process::exit,
};

const USAGE: &str = "<XLSX_FILE> [--json] [--history DIR]";

fn main() {
    // One spreadsheet path, plus optional `--json` and `--history DIR`.
    let args: Vec<String> = env::args().collect();
    let mut as_json = false;
    let mut history: Option<PathBuf> = None;
    let mut paths = Vec::new();
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--json" => as_json = true,
            "--history" => match rest.next() {
                Some(dir) => history = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("Usage: {} {}", args[0], USAGE);
                    exit(1);
                }
            },
            _ => paths.push(arg),
        }
    }
    if paths.len() != 1 {
        eprintln!("Usage: {} {}", args[0], USAGE);
        exit(1);
    }
    if let Err(e) = inspect_report(Path::new(paths[0]), as_json, history.as_deref()) {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Print the header, row count and division breakdown of a report, and what
/// the run ledger under `history` records for its file name.
fn inspect_report(path: &Path, as_json: bool, history: Option<&Path>) -> Result<()> {
    let table = Table::load(path)?;
    let divisions = division_counts(&table);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamped = parse_dated_name(&file_name);
    let ledger: Option<FileStatus> = match history {
        Some(dir) => Some(Ledger::open(dir)?.status(&file_name)),
        None => None,
    };

    if as_json {
        let summary = json!({
            "path": path.display().to_string(),
            "columns": table.headers,
            "rows": table.num_rows(),
            "divisions": divisions,
            "stamp": stamped.map(|(d, day)| json!({ "division": d, "date": day })),
            "ledger": ledger,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== Report: {} ===", path.display());
    if let Some((division, day)) = stamped {
        println!("Stamped as:   {} for {}", division, day);
    }
    if let Some(status) = ledger {
        println!(
            "Ledger:       downloaded={} delivered={}",
            status.downloaded, status.delivered
        );
    }
    println!("Rows:         {}", table.num_rows());
    println!("Columns:      {}", table.num_columns());
    println!();

    println!("=== Columns ===");
    for (i, h) in table.headers.iter().enumerate() {
        println!("{:>3}  {}", i, h);
    }
    println!();

    if divisions.is_empty() {
        println!("No {} column.", DIVISION_COLUMN);
    } else {
        println!("=== {} ===", DIVISION_COLUMN);
        for (label, n) in &divisions {
            println!("- {:<10} {}", label, n);
        }
    }
    Ok(())
}

fn division_counts(table: &Table) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for cell in table.column(DIVISION_COLUMN).unwrap_or_default() {
        let label = match cell {
            Cell::Empty => "<empty>".to_string(),
            other => other
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{other:?}")),
        };
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}
