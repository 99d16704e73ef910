use crate::error::ExtractionError;
use crate::models::{CompanyRecord, RawCompanyRow, RecordShape};
use crate::scraper::cleaner::{clean_rows, is_valid_bin};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{ExtractContext, ExtractionStrategy, element_text, selector};

/// bin | name | oked | industry | kato | settlement | krp | size
pub const MIN_TABLE_CELLS: usize = 8;

/// Positional extraction from a flat company table.
pub struct TableStrategy {
    table: Selector,
    row: Selector,
    header_cell: Selector,
    cell: Selector,
}

impl TableStrategy {
    pub fn new() -> Result<Self, ExtractionError> {
        Ok(Self {
            table: selector("table")?,
            row: selector("tr")?,
            header_cell: selector("td, th")?,
            cell: selector("td")?,
        })
    }

    /// A company table has a header row of at least eight cells.
    fn qualifies(&self, table: ElementRef<'_>) -> bool {
        table
            .select(&self.row)
            .next()
            .map(|header| header.select(&self.header_cell).count() >= MIN_TABLE_CELLS)
            .unwrap_or(false)
    }

    fn row_to_raw(&self, row: ElementRef<'_>, ctx: &ExtractContext<'_>) -> Option<RawCompanyRow> {
        let cells: Vec<String> = row.select(&self.cell).map(element_text).collect();
        if cells.len() < MIN_TABLE_CELLS {
            return None;
        }

        let bin = cells[0].trim();
        if !is_valid_bin(bin) {
            return None;
        }

        Some(RawCompanyRow {
            bin: Some(bin.to_string()),
            name: cells.get(1).cloned(),
            oked: cells.get(2).cloned(),
            industry: cells.get(3).cloned(),
            kato: cells.get(4).cloned(),
            settlement: cells.get(5).cloned(),
            krp: cells.get(6).cloned(),
            company_size: cells.get(7).cloned(),
            region: Some(ctx.region.to_string()),
            source_url: Some(ctx.source_url.to_string()),
            ..Default::default()
        })
    }
}

impl ExtractionStrategy for TableStrategy {
    fn shape(&self) -> RecordShape {
        RecordShape::Table
    }

    fn matches(&self, doc: &Html) -> bool {
        doc.select(&self.table).any(|t| self.qualifies(t))
    }

    fn extract(&self, doc: &Html, ctx: &ExtractContext<'_>) -> Vec<CompanyRecord> {
        for (i, table) in doc.select(&self.table).enumerate() {
            if !self.qualifies(table) {
                continue;
            }

            let raw: Vec<RawCompanyRow> = table
                .select(&self.row)
                .skip(1)
                .filter_map(|row| self.row_to_raw(row, ctx))
                .collect();

            let records = clean_rows(raw, RecordShape::Table);
            if !records.is_empty() {
                debug!("Table #{} yielded {} rows", i, records.len());
                return records;
            }
        }
        Vec::new()
    }
}
