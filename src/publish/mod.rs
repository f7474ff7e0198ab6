// src/publish/mod.rs

pub mod arrow;

use anyhow::{Context, Result};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::{EnabledStatistics, WriterProperties},
};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info};

use crate::config::{OutputConfig, OutputFormat};
use crate::error::PipelineError;
use crate::model::CanonicalDataset;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Temporary file in `dir` that ends up with the permissions of a plain
/// `File::create` (0644 before umask) once persisted, so other accounts can
/// read the published file.
pub fn temp_file_in(dir: &Path) -> io::Result<NamedTempFile> {
    let mut builder = Builder::new();
    builder.prefix(".longstanding-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o644));
    }
    builder.tempfile_in(dir)
}

/// Write `path` through a temporary file in the same directory, then rename it
/// into place. Readers see either the previous file or the complete new one.
/// If `write` fails the previous file is left untouched and the temporary file
/// is removed.
pub fn publish_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    // dropped NamedTempFile deletes itself on every early return
    let tmp = temp_file_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    let mut out = BufWriter::new(tmp.reopen().context("reopening temp file")?);
    write(&mut out)?;
    let file = out
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing temp file")?;
    file.sync_all().context("syncing temp file")?;
    drop(file);

    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temp file onto {}", path.display()))?;
    debug!(path = %path.display(), "published");
    Ok(())
}

/// Encode the dataset as CSV: header row of canonical names, then one record
/// per row in dataset order.
pub fn write_csv<W: Write>(dataset: &CanonicalDataset, out: W, bom: bool) -> Result<()> {
    let mut out = out;
    if bom {
        out.write_all(UTF8_BOM)?;
    }
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(dataset.schema.names())?;
    for row in &dataset.rows {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Encode the dataset as a single-row-group Parquet file.
pub fn write_parquet<W: Write + Send>(dataset: &CanonicalDataset, out: W) -> Result<()> {
    let batch = self::arrow::to_record_batch(dataset)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_created_by(concat!("longstanding ", env!("CARGO_PKG_VERSION")).to_string())
        .build();
    let mut writer = ArrowWriter::try_new(out, batch.schema(), Some(props))
        .context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Publish the dataset at the configured location in the configured format.
/// Any failure is a `WriteFailure`; the previously published artifact stays
/// as it was.
pub fn write_dataset(
    dataset: &CanonicalDataset,
    output: &OutputConfig,
) -> Result<(), PipelineError> {
    let path = &output.path;
    let result = publish_atomic(path, |out| match output.format {
        OutputFormat::Csv => write_csv(dataset, out, output.utf8_bom),
        OutputFormat::Parquet => write_parquet(dataset, out),
    });
    match result {
        Ok(()) => {
            info!(
                path = %path.display(),
                rows = dataset.rows.len(),
                format = ?output.format,
                "dataset published"
            );
            Ok(())
        }
        Err(source) => Err(PipelineError::WriteFailure {
            path: path.clone(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalSchema, ColumnSpec, ColumnType, Provenance, Value};
    use anyhow::bail;
    use chrono::{NaiveDate, Utc};
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use tempfile::tempdir;

    fn dataset() -> CanonicalDataset {
        CanonicalDataset {
            schema: CanonicalSchema {
                columns: vec![
                    ColumnSpec::new("ID", ColumnType::Text, true),
                    ColumnSpec::new("DAYS", ColumnType::Number, false),
                    ColumnSpec::new("SEEN", ColumnType::Date, false),
                ],
            },
            rows: vec![
                vec![
                    Value::Text("A, \"quoted\"".into()),
                    Value::Number(12.0),
                    Value::Date(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()),
                ],
                vec![Value::Text("B".into()), Value::Number(7.5), Value::Null],
            ],
            provenance: Provenance {
                sources: vec!["a.xlsx".into()],
                extracted_at: Utc::now(),
            },
        }
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn csv_has_bom_header_and_quoting() {
        let mut buf = Vec::new();
        write_csv(&dataset(), &mut buf, true).unwrap();
        assert!(buf.starts_with(UTF8_BOM));
        let text = String::from_utf8(buf[3..].to_vec()).unwrap();
        assert_eq!(
            text,
            "ID,DAYS,SEEN\n\"A, \"\"quoted\"\"\",12,2025-01-06\nB,7.5,\n"
        );
    }

    #[test]
    fn failed_write_leaves_previous_artifact_and_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.csv");
        fs::write(&path, b"old contents").unwrap();

        let err = publish_atomic(&path, |out| {
            out.write_all(b"partial")?;
            bail!("disk full")
        })
        .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(fs::read(&path).unwrap(), b"old contents");
        assert_eq!(files_in(dir.path()), vec!["master.csv"]);
    }

    #[cfg(unix)]
    #[test]
    fn published_file_is_readable_by_other_accounts() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("master.csv");
        publish_atomic(&path, |out| Ok(out.write_all(b"ID\n")?)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o044, 0o044, "mode {:o}", mode);
        assert_eq!(mode & 0o022, 0, "mode {:o}", mode);
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempdir().unwrap();
        let output = OutputConfig {
            path: dir.path().join("nested/out/master.csv"),
            format: OutputFormat::Csv,
            utf8_bom: false,
        };
        write_dataset(&dataset(), &output).unwrap();
        let text = fs::read_to_string(&output.path).unwrap();
        assert!(text.starts_with("ID,DAYS,SEEN\n"));
    }

    #[test]
    fn unwritable_target_is_write_failure() {
        let dir = tempdir().unwrap();
        // a directory already sits where the file should go
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        let output = OutputConfig {
            path: path.clone(),
            format: OutputFormat::Csv,
            utf8_bom: true,
        };
        let err = write_dataset(&dataset(), &output).unwrap_err();
        assert!(matches!(err, PipelineError::WriteFailure { .. }));
        assert!(path.is_dir());
        assert_eq!(files_in(dir.path()), vec!["taken"]);
    }

    #[test]
    fn parquet_output_is_deterministic() {
        let dir = tempdir().unwrap();
        let output = OutputConfig {
            path: dir.path().join("master.parquet"),
            format: OutputFormat::Parquet,
            utf8_bom: false,
        };
        write_dataset(&dataset(), &output).unwrap();
        let first = fs::read(&output.path).unwrap();

        let mut later = dataset();
        later.provenance.extracted_at = Utc::now() + chrono::Duration::hours(5);
        write_dataset(&later, &output).unwrap();
        assert_eq!(fs::read(&output.path).unwrap(), first);

        let reader = SerializedFileReader::new(File::open(&output.path).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 2);
    }
}
