use anyhow::{Context, Result};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use std::{env, fs::File, path::Path, process::exit};

fn main() {
    // Expect exactly one CLI argument: path to a published CSV or Parquet file.
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <CSV_OR_PARQUET_FILE>", args[0]);
        exit(1);
    }
    let path = Path::new(&args[1]);
    let result = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("parquet") => inspect_parquet(path),
        _ => inspect_csv(path),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        exit(1);
    }
}

/// Column name, type and how many rows hold a value.
struct ColumnFill {
    name: String,
    ty: String,
    filled: u64,
}

fn print_report(path: &Path, kind: &str, rows: u64, columns: &[ColumnFill]) {
    println!("=== {} file: {} ===", kind, path.display());
    println!("Total rows:   {}", rows);
    println!("Columns:      {}", columns.len());
    println!();
    println!("=== Columns ===");
    for c in columns {
        let pct = if rows == 0 {
            0.0
        } else {
            c.filled as f64 * 100.0 / rows as f64
        };
        println!(
            "- {:<20} | {:<10} | filled {:>8} ({:5.1}%)",
            c.name, c.ty, c.filled, pct
        );
    }
}

fn inspect_csv(path: &Path) -> Result<()> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let mut columns: Vec<ColumnFill> = headers
        .iter()
        .map(|h| ColumnFill {
            name: h.trim_start_matches('\u{feff}').to_string(),
            ty: "text".into(),
            filled: 0,
        })
        .collect();

    let mut rows = 0u64;
    for record in rdr.records() {
        let record = record?;
        rows += 1;
        for (c, field) in columns.iter_mut().zip(record.iter()) {
            if !field.is_empty() {
                c.filled += 1;
            }
        }
    }
    print_report(path, "CSV", rows, &columns);
    Ok(())
}

fn inspect_parquet(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = SerializedFileReader::new(file)?;
    let file_meta = reader.metadata().file_metadata();

    let mut columns: Vec<ColumnFill> = file_meta
        .schema_descr()
        .columns()
        .iter()
        .map(|d| ColumnFill {
            name: d.name().to_string(),
            ty: d
                .logical_type()
                .map_or_else(|| format!("{:?}", d.physical_type()), |lt| format!("{:?}", lt)),
            filled: 0,
        })
        .collect();

    let mut rows = 0u64;
    for row in reader.get_row_iter(None)? {
        let row = row?;
        rows += 1;
        for (c, (_, field)) in columns.iter_mut().zip(row.get_column_iter()) {
            if !matches!(field, Field::Null) {
                c.filled += 1;
            }
        }
    }
    println!(
        "Created by:   {}",
        file_meta.created_by().unwrap_or("<unknown>")
    );
    print_report(path, "Parquet", rows, &columns);
    Ok(())
}
