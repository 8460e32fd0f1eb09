use std::collections::{BTreeMap, HashMap, HashSet};

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::diagnostics::{Condition, Diagnostics};
use crate::error::FlowbyError;
use crate::io;
use crate::schema::flow;
use crate::sector::{SectorCode, MAX_DEPTH, MIN_DEPTH};

/// Relative slack when comparing known children against their parent.
const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuppressionConfig {
    pub enabled: bool,
    /// Column with the hierarchical codes to estimate over.
    pub code_column: String,
    /// Column separating independent measurements of the same code.
    pub category_column: String,
    /// Treat reported zeros as withheld values.
    pub zero_is_suppressed: bool,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            code_column: flow::ACTIVITY_PRODUCED_BY.to_string(),
            category_column: flow::FLOW_NAME.to_string(),
            zero_is_suppressed: false,
        }
    }
}

/// Identity of the sibling set below one parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuppressionKey {
    pub location: String,
    pub category: String,
    pub parent: String,
}

impl std::fmt::Display for SuppressionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.location, self.category, self.parent)
    }
}

/// Children one level below a parent code, split into known and withheld.
#[derive(Debug, Clone, Default)]
pub struct SuppressionGroup {
    pub parent_total: Option<f64>,
    pub known: Vec<usize>,
    pub suppressed: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Imputation {
    /// Value assigned to every withheld child.
    pub value: f64,
    /// Known children alone already exceed the parent.
    pub inconsistent: bool,
}

impl SuppressionGroup {
    /// Equal split of what the known children leave of the parent, floored
    /// at zero. `None` when there is nothing to fill or no bounding total.
    pub fn impute(&self, amounts: &[Option<f64>]) -> Option<Imputation> {
        let parent = self.parent_total?;
        if self.suppressed.is_empty() {
            return None;
        }
        let known: f64 = self.known.iter().filter_map(|&i| amounts[i]).sum();
        let residual = parent - known;
        Some(Imputation {
            value: (residual / self.suppressed.len() as f64).max(0.0),
            inconsistent: residual < -TOLERANCE * parent.abs().max(1.0),
        })
    }

    /// Known children exceed the parent with nothing left to impute.
    fn overshoots(&self, amounts: &[Option<f64>]) -> bool {
        let Some(parent) = self.parent_total else {
            return false;
        };
        let known: f64 = self.known.iter().filter_map(|&i| amounts[i]).sum();
        known - parent > TOLERANCE * parent.abs().max(1.0)
    }
}

/// Output of [`SuppressionEstimator::estimate`].
#[derive(Debug, Clone)]
pub struct Estimation {
    pub flows: DataFrame,
    pub imputed: usize,
    pub zero_filled: usize,
    pub inconsistent: Vec<SuppressionKey>,
}

/// Reconstructs withheld child values from known parent totals, shallow to
/// deep, so values imputed at one depth bound the next.
#[derive(Debug, Clone)]
pub struct SuppressionEstimator {
    config: SuppressionConfig,
}

struct Row {
    code: SectorCode,
    depth: u8,
    location: String,
    category: String,
}

impl Row {
    fn key(&self, parent: String) -> SuppressionKey {
        SuppressionKey {
            location: self.location.clone(),
            category: self.category.clone(),
            parent,
        }
    }
}

impl SuppressionEstimator {
    pub fn new(config: SuppressionConfig) -> Self {
        Self { config }
    }

    pub fn estimate(
        &self,
        flows: &DataFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<Estimation, FlowbyError> {
        let code_column = self.config.code_column.as_str();
        io::require_columns(flows, &[code_column, flow::LOCATION, flow::FLOW_AMOUNT])?;

        let codes = io::string_values(flows, code_column)?;
        let mut amounts = io::float_values(flows, flow::FLOW_AMOUNT)?;
        if self.config.zero_is_suppressed {
            for amount in amounts.iter_mut() {
                if *amount == Some(0.0) {
                    *amount = None;
                }
            }
        }
        let rows = self.rows(flows, &codes)?;

        let mut imputed = 0usize;
        let mut inconsistent: Vec<SuppressionKey> = Vec::new();

        for depth in MIN_DEPTH..MAX_DEPTH {
            let groups = Self::groups_at(&rows, &amounts, depth);
            for (key, group) in groups {
                match group.impute(&amounts) {
                    Some(imputation) => {
                        for &i in &group.suppressed {
                            amounts[i] = Some(imputation.value);
                        }
                        imputed += group.suppressed.len();
                        if imputation.inconsistent {
                            inconsistent.push(key);
                        }
                    }
                    None if group.overshoots(&amounts) => inconsistent.push(key),
                    None => {}
                }
            }
            debug!(depth, imputed, "Suppression pass complete");
        }

        let mut zero_filled = 0usize;
        for (row, amount) in amounts.iter_mut().enumerate() {
            if amount.is_none() {
                *amount = Some(0.0);
                zero_filled += 1;
                diagnostics.record(
                    Condition::SuppressedZeroFill,
                    codes[row].clone().unwrap_or_default(),
                );
            }
        }
        for key in &inconsistent {
            warn!(group = %key, "Known children exceed parent total");
            diagnostics.record(Condition::SuppressionInconsistency, key.to_string());
        }

        let mut out = flows.clone();
        out.with_column(Column::new(flow::FLOW_AMOUNT.into(), &amounts))?;

        info!(imputed, zero_filled, inconsistent = inconsistent.len(), "Estimated suppressed values");
        Ok(Estimation {
            flows: out,
            imputed,
            zero_filled,
            inconsistent,
        })
    }

    /// Keep only the finest reported rows of each (location, category)
    /// hierarchy: a row is dropped when any deeper row sits below it. Rows
    /// with codes outside the hierarchy are kept.
    pub fn finest_reported(&self, flows: &DataFrame) -> Result<DataFrame, FlowbyError> {
        let code_column = self.config.code_column.as_str();
        io::require_columns(flows, &[code_column, flow::LOCATION])?;
        let codes = io::string_values(flows, code_column)?;
        let rows = self.rows(flows, &codes)?;

        let mut covered: HashSet<SuppressionKey> = HashSet::new();
        for row in rows.iter().flatten() {
            for depth in MIN_DEPTH..row.depth {
                if let Some(parent) = row.code.hierarchy_prefix(depth) {
                    covered.insert(row.key(parent));
                }
            }
        }

        let keep: Vec<bool> = rows
            .iter()
            .map(|row| match row {
                Some(row) => row
                    .code
                    .hierarchy_prefix(row.depth)
                    .is_none_or(|own| !covered.contains(&row.key(own))),
                None => true,
            })
            .collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        debug!(dropped, "Dropped rows covered by finer reported rows");

        Ok(flows.filter(&BooleanChunked::from_slice("keep".into(), &keep))?)
    }

    fn rows(
        &self,
        flows: &DataFrame,
        codes: &[Option<String>],
    ) -> Result<Vec<Option<Row>>, FlowbyError> {
        let category_column = self.config.category_column.as_str();
        let locations = io::string_values(flows, flow::LOCATION)?;
        let categories = if flows.column(category_column).is_ok() {
            io::string_values(flows, category_column)?
        } else {
            vec![None; flows.height()]
        };

        Ok(codes
            .iter()
            .zip(locations)
            .zip(categories)
            .map(|((code, location), category)| {
                let code = SectorCode::parse(code.as_deref()?);
                let depth = code.implied_depth()?;
                (MIN_DEPTH..=MAX_DEPTH).contains(&depth).then(|| Row {
                    code,
                    depth,
                    location: location.unwrap_or_default(),
                    category: category.unwrap_or_default(),
                })
            })
            .collect())
    }

    /// Sibling groups below every parent at `depth`, keyed deterministically.
    fn groups_at(
        rows: &[Option<Row>],
        amounts: &[Option<f64>],
        depth: u8,
    ) -> BTreeMap<SuppressionKey, SuppressionGroup> {
        let mut groups: BTreeMap<SuppressionKey, SuppressionGroup> = BTreeMap::new();
        let mut parents: HashMap<SuppressionKey, Option<f64>> = HashMap::new();

        for (i, row) in rows.iter().enumerate() {
            let Some(row) = row else { continue };
            if row.depth != depth && row.depth != depth + 1 {
                continue;
            }
            let Some(prefix) = row.code.hierarchy_prefix(depth) else {
                continue;
            };
            let key = row.key(prefix);
            if row.depth == depth {
                // First reported parent wins; a withheld parent bounds nothing.
                parents.entry(key).or_insert(amounts[i]);
            } else {
                let group = groups.entry(key).or_default();
                if amounts[i].is_some() {
                    group.known.push(i);
                } else {
                    group.suppressed.push(i);
                }
            }
        }

        for (key, group) in groups.iter_mut() {
            group.parent_total = parents.get(key).copied().flatten();
        }
        groups
    }
}
