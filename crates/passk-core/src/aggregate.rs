use std::collections::BTreeMap;

use crate::estimator::pass_at_k;
use crate::types::{
    is_known_problem, AggregateRow, GroupCounts, GroupKey, ModelSummary, OutcomeRecord, PassAtK,
    SummaryCell,
};

/// Partition records by group key. Duplicate sample ids are counted, not merged.
pub fn group_outcomes<'a, I>(records: I) -> BTreeMap<GroupKey, GroupCounts>
where
    I: IntoIterator<Item = &'a OutcomeRecord>,
{
    let mut groups: BTreeMap<GroupKey, GroupCounts> = BTreeMap::new();

    for record in records {
        groups.entry(record.group_key()).or_default().record(record.passed);
    }

    for key in groups.keys().filter(|k| !is_known_problem(&k.problem)) {
        tracing::warn!("Unknown problem in results: {}", key.problem);
    }

    groups
}

fn row_for(key: GroupKey, counts: GroupCounts, ks: &[u32]) -> AggregateRow {
    // A repeated k keeps its first position only; a row has one cell per k.
    let pass_at = ks
        .iter()
        .enumerate()
        .filter(|&(i, k)| !ks[..i].contains(k))
        .map(|(_, &k)| PassAtK {
            k,
            value: pass_at_k(counts.n, counts.c, k as u64),
        })
        .collect();

    AggregateRow {
        key,
        n: counts.n,
        c: counts.c,
        pass_at,
    }
}

/// One row per group, sorted by (problem, model_family, model_name, strategy).
pub fn build_table(records: &[OutcomeRecord], ks: &[u32]) -> Vec<AggregateRow> {
    let groups = group_outcomes(records);
    tracing::debug!(
        "Aggregating {} records into {} groups",
        records.len(),
        groups.len()
    );

    groups
        .into_iter()
        .map(|(key, counts)| row_for(key, counts, ks))
        .collect()
}

/// Mean pass@k per (model_family, model_name, strategy) across problems.
///
/// Undefined cells are left out of the mean; `contributing` says how many
/// problems were averaged.
pub fn summarize(rows: &[AggregateRow], ks: &[u32]) -> Vec<ModelSummary> {
    let mut by_model: BTreeMap<(&str, &str, &str), Vec<&AggregateRow>> = BTreeMap::new();

    for row in rows {
        by_model
            .entry((
                row.key.model_family.as_str(),
                row.key.model_name.as_str(),
                row.key.strategy.as_str(),
            ))
            .or_default()
            .push(row);
    }

    by_model
        .into_iter()
        .map(|((family, name, strategy), group)| {
            let means = ks
                .iter()
                .map(|&k| {
                    let defined: Vec<f64> = group.iter().filter_map(|row| row.get(k)).collect();
                    let mean = match defined.is_empty() {
                        true => None,
                        false => Some(defined.iter().sum::<f64>() / defined.len() as f64),
                    };
                    SummaryCell {
                        k,
                        mean,
                        contributing: defined.len(),
                    }
                })
                .collect();

            ModelSummary {
                model_family: family.to_string(),
                model_name: name.to_string(),
                strategy: strategy.to_string(),
                problems: group.len(),
                means,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(problem: &str, strategy: &str, sample_id: u64, passed: bool) -> OutcomeRecord {
        OutcomeRecord {
            problem: problem.to_string(),
            model_family: "f1".to_string(),
            model_name: "m1".to_string(),
            strategy: strategy.to_string(),
            sample_id,
            passed,
        }
    }

    fn two_group_fixture() -> Vec<OutcomeRecord> {
        let mut records = Vec::new();
        // interleave and reverse so input order cannot leak into output order
        for i in (0..5).rev() {
            records.push(record("two_sum", "self_repair", i, true));
            records.push(record("two_sum", "cot", i, i < 3));
        }
        records
    }

    #[test]
    fn test_two_groups_sorted_by_strategy() {
        let rows = build_table(&two_group_fixture(), &[1, 5]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key.strategy, "cot");
        assert_eq!(rows[1].key.strategy, "self_repair");

        assert_eq!((rows[0].n, rows[0].c), (5, 3));
        assert_eq!(rows[0].rounded(4).get(1), Some(0.6));
        assert_eq!(rows[0].get(5), Some(1.0));

        assert_eq!((rows[1].n, rows[1].c), (5, 5));
        assert_eq!(rows[1].get(1), Some(1.0));
    }

    #[test]
    fn test_empty_input_gives_empty_table() {
        assert!(build_table(&[], &[1, 5]).is_empty());
        assert!(summarize(&[], &[1]).is_empty());
    }

    #[test]
    fn test_duplicate_sample_ids_are_counted() {
        let records = vec![
            record("two_sum", "cot", 0, true),
            record("two_sum", "cot", 0, false),
            record("two_sum", "cot", 0, false),
        ];
        let groups = group_outcomes(&records);
        let counts = groups[&GroupKey::new("two_sum", "f1", "m1", "cot")];
        assert_eq!(counts, GroupCounts { n: 3, c: 1 });
    }

    #[test]
    fn test_insufficient_samples_only_blank_that_cell() {
        let records = vec![
            record("nth_fib", "cot", 0, true),
            record("nth_fib", "cot", 1, false),
            record("nth_fib", "cot", 2, false),
        ];
        let rows = build_table(&records, &[1, 5]);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get(1).is_some());
        assert_eq!(rows[0].pass_at[1], PassAtK { k: 5, value: None });
    }

    #[test]
    fn test_requested_ks_preserved_in_order() {
        let rows = build_table(&two_group_fixture(), &[5, 2, 1]);
        let ks: Vec<u32> = rows[0].pass_at.iter().map(|cell| cell.k).collect();
        assert_eq!(ks, vec![5, 2, 1]);
    }

    #[test]
    fn test_repeated_k_yields_one_cell() {
        let rows = build_table(&two_group_fixture(), &[5, 1, 5, 1]);
        let ks: Vec<u32> = rows[0].pass_at.iter().map(|cell| cell.k).collect();
        assert_eq!(ks, vec![5, 1]);

        let json = serde_json::to_string(&rows[0]).unwrap();
        assert_eq!(json.matches("\"pass@1\"").count(), 1);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let mut records = two_group_fixture();
        records.push(record("word_wrap", "cot", 0, false));
        records.push(record("is_anagram", "debug_hint", 7, true));
        let first = build_table(&records, &[1, 5]);
        records.reverse();
        let second = build_table(&records, &[1, 5]);
        assert_eq!(first, second);
        assert_eq!(first[0].key.problem, "is_anagram");
    }

    #[test]
    fn test_summary_skips_undefined_cells() {
        let mut records = two_group_fixture();
        records.push(record("word_wrap", "cot", 0, false));
        let rows = build_table(&records, &[1, 5]);
        let summary = summarize(&rows, &[1, 5]);

        let cot = summary.iter().find(|s| s.strategy == "cot").unwrap();
        assert_eq!(cot.problems, 2);
        assert_eq!(cot.means[0].contributing, 2);
        assert!((cot.means[0].mean.unwrap() - 0.3).abs() < 1e-12);
        // word_wrap has n=1 so only two_sum contributes to pass@5
        assert_eq!(cot.means[1].contributing, 1);
        assert_eq!(cot.means[1].mean, Some(1.0));
    }
}
