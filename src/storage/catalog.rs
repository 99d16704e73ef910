use crate::models::CompanyRecord;
use anyhow::{Context, Result};
use chrono::Utc;
use duckdb::{Connection, params};
use std::path::Path;
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    bin           VARCHAR PRIMARY KEY,
    name          VARCHAR NOT NULL,
    shape         VARCHAR NOT NULL,
    -- Table-shape columns
    oked          VARCHAR,
    industry      VARCHAR,
    kato          VARCHAR,
    settlement    VARCHAR,
    krp           VARCHAR,
    -- Shared
    company_size  VARCHAR,
    -- Card-shape columns
    address       VARCHAR,
    activity      VARCHAR,
    manager       VARCHAR,
    status        VARCHAR,
    link          VARCHAR,
    region        VARCHAR,
    source_url    VARCHAR,
    imported_at   TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS import_run_seq START 1;

CREATE TABLE IF NOT EXISTS import_runs (
    id                INTEGER PRIMARY KEY DEFAULT nextval('import_run_seq'),
    started_at        TIMESTAMP NOT NULL,
    finished_at       TIMESTAMP,
    status            VARCHAR NOT NULL DEFAULT 'running',
    files_loaded      INTEGER DEFAULT 0,
    records_upserted  INTEGER DEFAULT 0,
    error_msg         VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_companies_region ON companies (region);
CREATE INDEX IF NOT EXISTS idx_companies_krp    ON companies (krp);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

/// Local DuckDB catalog the batch files are bulk-loaded into.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute_batch(INDEXES).context("Index creation failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Companies ─────────────────────────────────────────────────────────────

    /// Upsert by identifier. Re-importing the same file is a no-op apart from
    /// `imported_at`; a later file never blanks a field an earlier one filled.
    pub fn upsert_companies(&self, records: &[CompanyRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let tx = self.conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO companies
                (bin, name, shape, oked, industry, kato, settlement, krp, company_size,
                 address, activity, manager, status, link, region, source_url, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (bin) DO UPDATE SET
                name          = excluded.name,
                shape         = excluded.shape,
                oked          = COALESCE(excluded.oked,         companies.oked),
                industry      = COALESCE(excluded.industry,     companies.industry),
                kato          = COALESCE(excluded.kato,         companies.kato),
                settlement    = COALESCE(excluded.settlement,   companies.settlement),
                krp           = COALESCE(excluded.krp,          companies.krp),
                company_size  = COALESCE(excluded.company_size, companies.company_size),
                address       = COALESCE(excluded.address,      companies.address),
                activity      = COALESCE(excluded.activity,     companies.activity),
                manager       = COALESCE(excluded.manager,      companies.manager),
                status        = COALESCE(excluded.status,       companies.status),
                link          = COALESCE(excluded.link,         companies.link),
                region        = COALESCE(excluded.region,       companies.region),
                source_url    = COALESCE(excluded.source_url,   companies.source_url),
                imported_at   = excluded.imported_at
        "#;

        for r in records {
            tx.execute(
                sql,
                params![
                    r.bin,
                    r.name,
                    r.shape.as_str(),
                    r.oked,
                    r.industry,
                    r.kato,
                    r.settlement,
                    r.krp,
                    r.company_size,
                    r.address,
                    r.activity,
                    r.manager,
                    r.status,
                    r.link,
                    r.region,
                    r.source_url,
                    now,
                ],
            )
            .with_context(|| format!("upsert company {}", r.bin))?;
        }

        tx.commit()?;
        Ok(records.len())
    }

    pub fn company_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM companies")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn counts_by_region(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts(
            "SELECT COALESCE(region, 'unknown') AS k, COUNT(*) FROM companies \
             GROUP BY k ORDER BY 2 DESC, k",
        )
    }

    /// Keyed by KRP code, else size text, else `unknown`.
    pub fn counts_by_size_class(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts(
            "SELECT COALESCE(krp, company_size, 'unknown') AS k, COUNT(*) FROM companies \
             GROUP BY k ORDER BY 2 DESC, k",
        )
    }

    fn grouped_counts(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Import run log ────────────────────────────────────────────────────────

    pub fn begin_import_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO import_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_import_run(
        &self,
        run_id: i64,
        files: usize,
        records: usize,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE import_runs SET
               finished_at = ?, status = ?,
               files_loaded = ?, records_upserted = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                files as i64,
                records as i64,
                error,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_import_status(&self) -> Result<Option<String>> {
        let mut s = self
            .conn
            .prepare("SELECT status FROM import_runs ORDER BY id DESC LIMIT 1")?;
        Ok(s.query_row([], |r| r.get(0)).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{card_record, table_record};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let repo = repo();
        repo.run_migrations().unwrap();
        assert_eq!(repo.company_count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_keeps_existing_fields() {
        let repo = repo();
        let mut first = table_record("1234567890", "Kazpost");
        first.settlement = Some("г.Павлодар".into());
        repo.upsert_companies(&[first]).unwrap();

        let second = table_record("1234567890", "Kazpost JSC");
        repo.upsert_companies(&[second]).unwrap();

        assert_eq!(repo.company_count().unwrap(), 1);
        let (name, settlement): (String, Option<String>) = repo
            .conn
            .query_row(
                "SELECT name, settlement FROM companies WHERE bin = '1234567890'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(name, "Kazpost JSC");
        assert_eq!(settlement.as_deref(), Some("г.Павлодар"));
    }

    #[test]
    fn test_grouped_counts() {
        let repo = repo();
        repo.upsert_companies(&[
            table_record("1111111111", "A"),
            table_record("2222222222", "B"),
            card_record("3333333333", "C"),
        ])
        .unwrap();

        let regions = repo.counts_by_region().unwrap();
        assert_eq!(regions[0], ("pavlodar".to_string(), 2));
        assert!(regions.contains(&("unknown".to_string(), 1)));

        let sizes = repo.counts_by_size_class().unwrap();
        assert_eq!(sizes[0], ("311".to_string(), 2));
        assert!(sizes.contains(&("Малое предприятие".to_string(), 1)));
    }

    #[test]
    fn test_import_run_log() {
        let repo = repo();
        let first = repo.begin_import_run().unwrap();
        repo.finish_import_run(first, 2, 10, None).unwrap();
        let second = repo.begin_import_run().unwrap();
        assert!(second > first);
        repo.finish_import_run(second, 1, 0, Some("bad header")).unwrap();

        assert_eq!(repo.last_import_status().unwrap().as_deref(), Some("error"));
    }
}
