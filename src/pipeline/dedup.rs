use crate::config::DedupPolicy;
use crate::models::CompanyRecord;
use std::collections::HashMap;
use tracing::debug;

/// Collapse records sharing a business identifier.
///
/// Output is in first-seen identifier order under both policies; the policy
/// only decides which record occupies that slot.
pub fn dedup(records: Vec<CompanyRecord>, policy: DedupPolicy) -> Vec<CompanyRecord> {
    let total = records.len();
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(total);
    let mut out: Vec<CompanyRecord> = Vec::with_capacity(total);

    for record in records {
        match slots.get(&record.bin) {
            Some(&idx) => {
                if policy == DedupPolicy::LastWins {
                    out[idx] = record;
                }
            }
            None => {
                slots.insert(record.bin.clone(), out.len());
                out.push(record);
            }
        }
    }

    if out.len() < total {
        debug!("Dedup removed {} of {} records", total - out.len(), total);
    }
    out
}
