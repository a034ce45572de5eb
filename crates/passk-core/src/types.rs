use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Reference task set shipped with the evaluation suite.
pub const KNOWN_PROBLEMS: &[&str] = &[
    "two_sum",
    "is_anagram",
    "roman_to_int",
    "longest_common_prefix",
    "valid_parentheses",
    "rotate_matrix_90_clockwise",
    "merge_intervals",
    "nth_fib",
    "sum_of_primes_upto",
    "word_wrap",
];

pub fn is_known_problem(problem: &str) -> bool {
    KNOWN_PROBLEMS.contains(&problem)
}

// =============================================================================
// Records
// =============================================================================

/// One persisted evaluation result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub problem: String,
    pub model_family: String,
    pub model_name: String,
    pub strategy: String,
    pub sample_id: u64,
    pub passed: bool,
}

impl OutcomeRecord {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            problem: self.problem.clone(),
            model_family: self.model_family.clone(),
            model_name: self.model_name.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

/// Grouping dimension. Field order defines the output sort order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub problem: String,
    pub model_family: String,
    pub model_name: String,
    pub strategy: String,
}

impl GroupKey {
    pub fn new(
        problem: impl Into<String>,
        model_family: impl Into<String>,
        model_name: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            problem: problem.into(),
            model_family: model_family.into(),
            model_name: model_name.into(),
            strategy: strategy.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    pub n: u64,
    pub c: u64,
}

impl GroupCounts {
    pub fn record(&mut self, passed: bool) {
        self.n += 1;
        if passed {
            self.c += 1;
        }
    }
}

// =============================================================================
// Output rows
// =============================================================================

/// A single pass@k cell. `None` means the group has fewer than `k` samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassAtK {
    pub k: u32,
    pub value: Option<f64>,
}

impl PassAtK {
    pub fn label(&self) -> String {
        format!("pass@{}", self.k)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRow {
    pub key: GroupKey,
    pub n: u64,
    pub c: u64,
    pub pass_at: Vec<PassAtK>,
}

impl AggregateRow {
    pub fn get(&self, k: u32) -> Option<f64> {
        self.pass_at
            .iter()
            .find(|cell| cell.k == k)
            .and_then(|cell| cell.value)
    }

    /// Copy of this row with every defined cell rounded for display.
    pub fn rounded(&self, digits: u32) -> Self {
        Self {
            pass_at: self
                .pass_at
                .iter()
                .map(|cell| PassAtK {
                    k: cell.k,
                    value: cell.value.map(|v| crate::estimator::round_to(v, digits)),
                })
                .collect(),
            ..self.clone()
        }
    }
}

// Flat object: {"problem", "model_family", "model_name", "strategy", "n", "c", "pass@1", ...}
impl Serialize for AggregateRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6 + self.pass_at.len()))?;
        map.serialize_entry("problem", &self.key.problem)?;
        map.serialize_entry("model_family", &self.key.model_family)?;
        map.serialize_entry("model_name", &self.key.model_name)?;
        map.serialize_entry("strategy", &self.key.strategy)?;
        map.serialize_entry("n", &self.n)?;
        map.serialize_entry("c", &self.c)?;
        for cell in &self.pass_at {
            map.serialize_entry(&cell.label(), &cell.value)?;
        }
        map.end()
    }
}

/// Mean pass@k across problems for one (model_family, model_name, strategy).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelSummary {
    pub model_family: String,
    pub model_name: String,
    pub strategy: String,
    pub problems: usize,
    pub means: Vec<SummaryCell>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SummaryCell {
    pub k: u32,
    pub mean: Option<f64>,
    /// Problems with a defined pass@k that contributed to `mean`.
    pub contributing: usize,
}
