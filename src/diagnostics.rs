use std::collections::BTreeMap;
use std::fmt;

use tracing::warn;

/// Example keys kept per condition.
pub const MAX_EXAMPLES: usize = 10;

/// Recoverable data-quality conditions raised during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Condition {
    /// A reported code had no crosswalk entry at the target; record dropped.
    UnresolvedCode,
    /// A proportional split found no helper signal; amount dropped.
    ApportionmentDivideByZero,
    /// Known children already exceed their parent total.
    SuppressionInconsistency,
    /// Suppressed values left after estimation, filled with zero.
    SuppressedZeroFill,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedCode => write!(f, "unresolved_code"),
            Self::ApportionmentDivideByZero => write!(f, "apportionment_divide_by_zero"),
            Self::SuppressionInconsistency => write!(f, "suppression_inconsistency"),
            Self::SuppressedZeroFill => write!(f, "suppressed_zero_fill"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub count: usize,
    pub examples: Vec<String>,
}

/// Per-run summary of every recovered condition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    tallies: BTreeMap<Condition, Tally>,
}

impl Diagnostics {
    pub fn record(&mut self, condition: Condition, key: impl Into<String>) {
        self.record_many(condition, 1, key);
    }

    pub fn record_many(&mut self, condition: Condition, count: usize, key: impl Into<String>) {
        if count == 0 {
            return;
        }
        let tally = self.tallies.entry(condition).or_default();
        tally.count += count;
        let key = key.into();
        if tally.examples.len() < MAX_EXAMPLES && !tally.examples.contains(&key) {
            tally.examples.push(key);
        }
    }

    pub fn count(&self, condition: Condition) -> usize {
        self.tallies.get(&condition).map_or(0, |t| t.count)
    }

    pub fn examples(&self, condition: Condition) -> &[String] {
        self.tallies
            .get(&condition)
            .map(|t| t.examples.as_slice())
            .unwrap_or(&[])
    }

    pub fn dropped_records(&self) -> usize {
        self.count(Condition::UnresolvedCode) + self.count(Condition::ApportionmentDivideByZero)
    }

    pub fn is_clean(&self) -> bool {
        self.tallies.values().all(|t| t.count == 0)
    }

    pub fn merge(&mut self, other: Diagnostics) {
        for (condition, tally) in other.tallies {
            let entry = self.tallies.entry(condition).or_default();
            entry.count += tally.count;
            for key in tally.examples {
                if entry.examples.len() < MAX_EXAMPLES && !entry.examples.contains(&key) {
                    entry.examples.push(key);
                }
            }
        }
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.tallies
            .iter()
            .map(|(condition, tally)| (condition.to_string(), tally.count))
            .collect()
    }

    /// One line per condition, e.g. `unresolved_code: 3 (e.g. 9999, T001)`.
    pub fn summary(&self) -> String {
        if self.is_clean() {
            return "no data-quality conditions".to_string();
        }
        self.tallies
            .iter()
            .filter(|(_, t)| t.count > 0)
            .map(|(condition, t)| {
                format!("{condition}: {} (e.g. {})", t.count, t.examples.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn log(&self) {
        for (condition, tally) in &self.tallies {
            if tally.count > 0 {
                warn!(
                    condition = %condition,
                    count = tally.count,
                    examples = %tally.examples.join(", "),
                    "Recovered data-quality condition"
                );
            }
        }
    }
}
