use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const STATUS_ACTIVE: &str = "Активная";
pub const STATUS_INACTIVE: &str = "Неактивная";

// ── Record shape ──────────────────────────────────────────────────────────────

/// Markup layout a record was extracted from. Decides the CSV schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    Table,
    Card,
}

pub const TABLE_COLUMNS: [&str; 10] = [
    "bin", "name", "oked", "industry", "kato", "settlement", "krp", "company_size", "region",
    "source_url",
];

pub const CARD_COLUMNS: [&str; 8] = [
    "name", "address", "activity", "manager", "company_size", "bin", "status", "link",
];

impl RecordShape {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            RecordShape::Table => &TABLE_COLUMNS,
            RecordShape::Card => &CARD_COLUMNS,
        }
    }

    /// Detect the schema of a written batch file from its header row.
    pub fn from_header<'a>(header: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let header: Vec<&str> = header.into_iter().map(str::trim).collect();
        if header == TABLE_COLUMNS {
            Some(RecordShape::Table)
        } else if header == CARD_COLUMNS {
            Some(RecordShape::Card)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordShape::Table => "table",
            RecordShape::Card => "card",
        }
    }
}

// ── Raw extracted row ─────────────────────────────────────────────────────────

/// Un-normalised field values as found on the page (or in a CSV file).
#[derive(Debug, Clone, Default)]
pub struct RawCompanyRow {
    pub bin: Option<String>,
    pub name: Option<String>,
    pub oked: Option<String>,
    pub industry: Option<String>,
    pub kato: Option<String>,
    pub settlement: Option<String>,
    pub krp: Option<String>,
    pub company_size: Option<String>,
    pub address: Option<String>,
    pub activity: Option<String>,
    pub manager: Option<String>,
    pub status: Option<String>,
    pub link: Option<String>,
    pub region: Option<String>,
    pub source_url: Option<String>,
}

// ── Company record ────────────────────────────────────────────────────────────

/// One retained company. `bin` and `name` are never empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompanyRecord {
    pub shape: RecordShape,
    pub bin: String,
    pub name: String,
    pub oked: Option<String>,
    pub industry: Option<String>,
    pub kato: Option<String>,
    pub settlement: Option<String>,
    pub krp: Option<String>,
    pub company_size: Option<String>,
    pub address: Option<String>,
    pub activity: Option<String>,
    pub manager: Option<String>,
    pub status: Option<String>,
    pub link: Option<String>,
    pub region: Option<String>,
    pub source_url: Option<String>,
}

impl CompanyRecord {
    /// Row values in the column order of this record's shape.
    #[cfg(test)]
    pub fn csv_fields(&self) -> Vec<&str> {
        self.fields_in(self.shape)
    }

    /// Row values laid out in `shape`'s schema; fields the schema lacks are dropped.
    pub fn fields_in(&self, shape: RecordShape) -> Vec<&str> {
        match shape {
            RecordShape::Table => vec![
                self.bin.as_str(),
                self.name.as_str(),
                opt(&self.oked),
                opt(&self.industry),
                opt(&self.kato),
                opt(&self.settlement),
                opt(&self.krp),
                opt(&self.company_size),
                opt(&self.region),
                opt(&self.source_url),
            ],
            RecordShape::Card => vec![
                self.name.as_str(),
                opt(&self.address),
                opt(&self.activity),
                opt(&self.manager),
                opt(&self.company_size),
                self.bin.as_str(),
                opt(&self.status),
                opt(&self.link),
            ],
        }
    }

    /// Key for the per-size-class counters.
    pub fn size_class(&self) -> String {
        self.krp
            .clone()
            .or_else(|| self.company_size.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

// ── Region batch ──────────────────────────────────────────────────────────────

/// Records accumulated for one region across all of its sources.
#[derive(Debug, Clone)]
pub struct RegionBatch {
    pub key: String,
    pub records: Vec<CompanyRecord>,
}

impl RegionBatch {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, records: Vec<CompanyRecord>) {
        self.records.extend(records);
    }
}

// ── Run statistics ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    /// Region file written with at least one record.
    Written,
    /// Nothing extracted (including regions whose every fetch failed).
    Empty,
    /// Records found but the region file could not be written.
    PersistFailed,
}

impl RegionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionStatus::Written => "written",
            RegionStatus::Empty => "empty",
            RegionStatus::PersistFailed => "persist_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionOutcome {
    pub region: String,
    pub status: RegionStatus,
    pub records: usize,
    pub pages_visited: u32,
    pub fetch_failures: u32,
    pub file: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlRunStats {
    pub regions_attempted: usize,
    pub regions_with_records: usize,
    pub total_records: usize,
    pub size_classes: BTreeMap<String, usize>,
    pub regions: Vec<RegionOutcome>,
    pub consolidated_file: Option<PathBuf>,
}

impl CrawlRunStats {
    /// Fold one finished region into the counters.
    pub fn record_region(&mut self, outcome: RegionOutcome, records: &[CompanyRecord]) {
        self.regions_attempted += 1;
        if !records.is_empty() {
            self.regions_with_records += 1;
        }
        self.total_records += records.len();
        for record in records {
            *self.size_classes.entry(record.size_class()).or_insert(0) += 1;
        }
        self.regions.push(outcome);
    }

    pub fn region(&self, key: &str) -> Option<&RegionOutcome> {
        self.regions.iter().find(|r| r.region == key)
    }

    pub fn failed_regions(&self) -> impl Iterator<Item = &RegionOutcome> {
        self.regions
            .iter()
            .filter(|r| r.status == RegionStatus::PersistFailed)
    }
}

/// Human label for a KRP size code.
pub fn krp_label(code: &str) -> Option<&'static str> {
    match code {
        "311" => Some("Large (1001+ employees)"),
        "310" => Some("Large (501-1000 employees)"),
        "305" => Some("Large (251-500 employees)"),
        _ => None,
    }
}
