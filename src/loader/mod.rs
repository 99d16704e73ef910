//! Reads written batch files back for merging and catalog import.

use crate::models::{CompanyRecord, RawCompanyRow, RecordShape};
use crate::scraper::cleaner::clean_rows;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Parse one batch file. The schema is taken from its header row and the
/// name + identifier retention rule is applied again to every row.
pub fn load_batch(path: &Path) -> Result<(RecordShape, Vec<CompanyRecord>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let header = reader
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", path))?
        .clone();
    let Some(shape) = RecordShape::from_header(header.iter()) else {
        bail!("{:?} has an unknown header: {}", path, header.iter().collect::<Vec<_>>().join(","));
    };
    debug!("Loading {} rows from {:?}", shape.as_str(), path);

    let mut raw_rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let field = |col: &str| -> Option<String> {
            let idx = shape.columns().iter().position(|c| *c == col)?;
            record.get(idx).map(str::to_string)
        };

        raw_rows.push(RawCompanyRow {
            bin: field("bin"),
            name: field("name"),
            oked: field("oked"),
            industry: field("industry"),
            kato: field("kato"),
            settlement: field("settlement"),
            krp: field("krp"),
            company_size: field("company_size"),
            address: field("address"),
            activity: field("activity"),
            manager: field("manager"),
            status: field("status"),
            link: field("link"),
            region: field("region"),
            source_url: field("source_url"),
        });
    }

    let records = clean_rows(raw_rows, shape);
    info!("{:?}: {} records loaded", path.file_name().unwrap_or_default(), records.len());
    Ok((shape, records))
}

/// Batch files in `dir`, sorted by name.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{card_record, table_record};
    use crate::storage::write_records;

    #[test]
    fn test_load_detects_shape() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("pavlodar_companies.csv");
        let card = dir.path().join("almaty_companies.csv");
        write_records(&[table_record("1234567890", "Kazpost")], RecordShape::Table, &table).unwrap();
        write_records(&[card_record("2222222222", "Alpha")], RecordShape::Card, &card).unwrap();

        let (shape, records) = load_batch(&table).unwrap();
        assert_eq!(shape, RecordShape::Table);
        assert_eq!(records, vec![table_record("1234567890", "Kazpost")]);

        let (shape, records) = load_batch(&card).unwrap();
        assert_eq!(shape, RecordShape::Card);
        assert_eq!(records[0].bin, "2222222222");
        assert_eq!(records[0].link.as_deref(), Some("https://statsnet.co/companies/2222222222"));
    }

    #[test]
    fn test_load_enforces_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edited.csv");
        std::fs::write(
            &path,
            "bin,name,oked,industry,kato,settlement,krp,company_size,region,source_url\n\
             1234567890,  Company   A ,,,,,311,,pavlodar,\n\
             ,No identifier,,,,,311,,pavlodar,\n\
             2222222222,,,,,,311,,pavlodar,\n",
        )
        .unwrap();

        let (_, records) = load_batch(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Company A");
    }

    #[test]
    fn test_unknown_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "date,price\n2024-01-01,1\n").unwrap();
        assert!(load_batch(&path).is_err());
    }

    #[test]
    fn test_discover_csv_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files = discover_csv_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);

        assert!(discover_csv_files(&dir.path().join("missing")).unwrap().is_empty());
    }
}
