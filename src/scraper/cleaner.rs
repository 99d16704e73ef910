use crate::models::{CompanyRecord, RawCompanyRow, RecordShape, STATUS_ACTIVE, STATUS_INACTIVE};
use tracing::debug;

/// Minimum length of a business identifier.
pub const MIN_BIN_DIGITS: usize = 10;

// ── Field normalisation ───────────────────────────────────────────────────────

/// Collapse internal whitespace runs to one space and trim the ends.
/// "  Company \n  B " → "Company B"
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalised value, or `None` when nothing is left.
pub fn non_empty(s: &str) -> Option<String> {
    let s = normalize_whitespace(s);
    if s.is_empty() { None } else { Some(s) }
}

fn clean_opt(value: Option<String>) -> Option<String> {
    value.as_deref().and_then(non_empty)
}

// ── Business identifier ───────────────────────────────────────────────────────

/// True when the trimmed text is purely ASCII digits, at least ten of them.
pub fn is_valid_bin(s: &str) -> bool {
    let s = s.trim();
    s.len() >= MIN_BIN_DIGITS && s.bytes().all(|b| b.is_ascii_digit())
}

/// "БИН 123456789012" → "123456789012"
pub fn normalise_bin(s: &str) -> String {
    normalize_whitespace(s.trim().trim_start_matches("БИН").trim_start_matches(':'))
}

// ── Card markers ──────────────────────────────────────────────────────────────

/// Map the status indicator's CSS classes to a status label.
pub fn status_from_classes<'a>(classes: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    for class in classes {
        if class.contains("ui-status--green") {
            return Some(STATUS_ACTIVE);
        }
        if class.contains("ui-status--red") {
            return Some(STATUS_INACTIVE);
        }
    }
    None
}

/// "Иванов И. И. — руководитель" → "Иванов И. И."
pub fn manager_name(text: &str) -> Option<String> {
    match text.split_once('—') {
        Some((name, _)) => non_empty(name),
        None => non_empty(&text.replace("руководитель", "")),
    }
}

// ── Raw row → CompanyRecord ───────────────────────────────────────────────────

/// Normalise every field and enforce the name + identifier retention rule.
pub fn raw_row_to_record(raw: RawCompanyRow, shape: RecordShape) -> Option<CompanyRecord> {
    let bin = clean_opt(raw.bin).map(|b| normalise_bin(&b))?;
    let name = clean_opt(raw.name)?;
    if bin.is_empty() {
        return None;
    }

    Some(CompanyRecord {
        shape,
        bin,
        name,
        oked: clean_opt(raw.oked),
        industry: clean_opt(raw.industry),
        kato: clean_opt(raw.kato),
        settlement: clean_opt(raw.settlement),
        krp: clean_opt(raw.krp),
        company_size: clean_opt(raw.company_size),
        address: clean_opt(raw.address),
        activity: clean_opt(raw.activity),
        manager: clean_opt(raw.manager),
        status: clean_opt(raw.status),
        link: clean_opt(raw.link),
        region: clean_opt(raw.region),
        source_url: clean_opt(raw.source_url),
    })
}

pub fn clean_rows(rows: Vec<RawCompanyRow>, shape: RecordShape) -> Vec<CompanyRecord> {
    let total = rows.len();
    let records: Vec<CompanyRecord> = rows
        .into_iter()
        .filter_map(|row| raw_row_to_record(row, shape))
        .collect();

    if records.len() < total {
        debug!(
            "Dropped {} of {} rows without name or identifier",
            total - records.len(),
            total
        );
    }
    records
}

// ── Tests ─────────────────────────────────────────────────────────────────────
