//! Pairs output records with the input items they came from.

use crate::mongodb::ExecutionOutcome;
use crate::OutputItem;

/// Package an outcome for the next node.
///
/// When the record count equals the input count, record `i` pairs with
/// item `i`.  Otherwise (`find`, `aggregate`, error records, ...) there is
/// no natural mapping and every record pairs with every input item.
pub fn package(outcome: ExecutionOutcome, input_count: usize) -> Vec<OutputItem> {
    let records = outcome.into_records();

    if records.len() == input_count {
        records
            .into_iter()
            .enumerate()
            .map(|(i, json)| OutputItem { json, paired_item: vec![i] })
            .collect()
    } else {
        let all: Vec<usize> = (0..input_count).collect();
        records
            .into_iter()
            .map(|json| OutputItem { json, paired_item: all.clone() })
            .collect()
    }
}
