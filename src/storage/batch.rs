//! Delimited batch files: one per region, merged into a consolidated file.

use crate::error::WriteError;
use crate::models::{CompanyRecord, CrawlRunStats, RecordShape};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SUMMARY_COLUMNS: [&str; 7] = [
    "region",
    "status",
    "records",
    "pages_visited",
    "fetch_failures",
    "file",
    "error",
];

fn ensure_parent(path: &Path) -> Result<(), WriteError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| WriteError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Write `records` under `shape`'s schema. The header is written even when
/// `records` is empty. Returns the number of data rows.
pub fn write_records(
    records: &[CompanyRecord],
    shape: RecordShape,
    path: &Path,
) -> Result<usize, WriteError> {
    ensure_parent(path)?;

    let mut writer = csv::Writer::from_path(path).map_err(|e| WriteError::csv(path, e))?;
    writer
        .write_record(shape.columns())
        .map_err(|e| WriteError::csv(path, e))?;

    for record in records {
        writer
            .write_record(record.fields_in(shape))
            .map_err(|e| WriteError::csv(path, e))?;
    }
    writer.flush().map_err(|e| WriteError::io(path, e))?;

    info!("Wrote {} {} rows to {:?}", records.len(), shape.as_str(), path);
    Ok(records.len())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Concatenate partial files sharing one header into `output`, preserving
/// file order and row order. Partials are left on disk. `output` must not be
/// one of the inputs.
pub fn merge(paths: &[PathBuf], output: &Path) -> Result<usize, WriteError> {
    let first = paths.first().ok_or(WriteError::EmptyMerge)?;
    if paths.iter().any(|p| same_file(p, output)) {
        return Err(WriteError::OutputIsInput {
            path: output.to_path_buf(),
        });
    }

    let mut reader = csv::Reader::from_path(first).map_err(|e| WriteError::csv(first, e))?;
    let header = reader
        .headers()
        .map_err(|e| WriteError::csv(first, e))?
        .clone();

    ensure_parent(output)?;
    let mut writer = csv::Writer::from_path(output).map_err(|e| WriteError::csv(output, e))?;
    writer
        .write_record(&header)
        .map_err(|e| WriteError::csv(output, e))?;

    let mut rows = 0usize;
    for path in paths {
        let mut reader = csv::Reader::from_path(path).map_err(|e| WriteError::csv(path, e))?;
        let found = reader.headers().map_err(|e| WriteError::csv(path, e))?.clone();
        if found != header {
            return Err(WriteError::SchemaMismatch {
                path: path.clone(),
                expected: header.iter().collect::<Vec<_>>().join(","),
                found: found.iter().collect::<Vec<_>>().join(","),
            });
        }

        let mut n = 0usize;
        for record in reader.records() {
            let record = record.map_err(|e| WriteError::csv(path, e))?;
            writer
                .write_record(&record)
                .map_err(|e| WriteError::csv(output, e))?;
            n += 1;
        }
        debug!("Merged {} rows from {:?}", n, path);
        rows += n;
    }
    writer.flush().map_err(|e| WriteError::io(output, e))?;

    info!("Merged {} files ({} rows) into {:?}", paths.len(), rows, output);
    Ok(rows)
}

/// Remove partial files after a successful merge. Failures are logged.
pub fn delete_partials(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not delete {:?}: {}", path, e),
        }
    }
    removed
}

/// Per-region outcome table of one crawl.
pub fn write_summary(stats: &CrawlRunStats, path: &Path) -> Result<(), WriteError> {
    ensure_parent(path)?;

    let mut writer = csv::Writer::from_path(path).map_err(|e| WriteError::csv(path, e))?;
    writer
        .write_record(SUMMARY_COLUMNS)
        .map_err(|e| WriteError::csv(path, e))?;

    for outcome in &stats.regions {
        let file = outcome
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let records = outcome.records.to_string();
        let pages = outcome.pages_visited.to_string();
        let failures = outcome.fetch_failures.to_string();
        let row: [&str; 7] = [
            &outcome.region,
            outcome.status.as_str(),
            &records,
            &pages,
            &failures,
            &file,
            outcome.error.as_deref().unwrap_or(""),
        ];
        writer
            .write_record(row)
            .map_err(|e| WriteError::csv(path, e))?;
    }
    writer.flush().map_err(|e| WriteError::io(path, e))?;
    Ok(())
}
