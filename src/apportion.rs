use std::collections::HashMap;

use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::crosswalk::CrosswalkIndex;
use crate::diagnostics::{Condition, Diagnostics};
use crate::error::FlowbyError;
use crate::io;
use crate::resolver::Expansion;
use crate::schema::{flow, internal};
use crate::sector::{Role, MAX_DEPTH, MIN_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApportionMethod {
    #[default]
    Equal,
    Proportional,
}

/// Helper-dataset values per (location, sector), already resolved to the
/// same target as the records they will weight.
#[derive(Debug, Clone, Default)]
pub struct HelperWeights {
    values: HashMap<(String, String), f64>,
    /// Weight every record by the helper at this location instead of its own.
    fixed_location: Option<String>,
}

impl HelperWeights {
    /// Reduce a resolved helper table (`Location`, role sector column,
    /// `FlowAmount`) to summed weights.
    pub fn from_resolved(helper: &DataFrame, role: Role) -> Result<Self, FlowbyError> {
        let sector_column = role.sector_column();
        io::require_columns(helper, &[flow::LOCATION, sector_column, flow::FLOW_AMOUNT])?;

        let locations = io::string_values(helper, flow::LOCATION)?;
        let sectors = io::string_values(helper, sector_column)?;
        let amounts = io::float_values(helper, flow::FLOW_AMOUNT)?;

        let mut values: HashMap<(String, String), f64> = HashMap::new();
        for ((location, sector), amount) in locations.into_iter().zip(sectors).zip(amounts) {
            let (Some(location), Some(sector), Some(amount)) = (location, sector, amount) else {
                continue;
            };
            *values.entry((location, sector)).or_insert(0.0) += amount;
        }

        Ok(Self {
            values,
            fixed_location: None,
        })
    }

    pub fn with_fixed_location(mut self, location: Option<String>) -> Self {
        self.fixed_location = location;
        self
    }

    pub fn weight(&self, location: &str, sector: &str) -> Option<f64> {
        let location = self.fixed_location.as_deref().unwrap_or(location);
        self.values
            .get(&(location.to_string(), sector.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Splits the amount of every expanded record across its candidate sectors.
pub enum Apportioner<'a> {
    /// Divide by the number of distinct sector prefixes at every depth, so
    /// that summing back up the hierarchy reconstructs the original amount.
    EqualSplit {
        index: &'a CrosswalkIndex,
        /// Extra columns refining the per-record partition.
        group_by: Vec<String>,
    },
    /// Share in proportion to helper values; zero or missing helper values
    /// get no share.
    Proportional { weights: &'a HelperWeights },
}

impl Apportioner<'_> {
    /// Apportion and strip the expansion bookkeeping columns.
    pub fn apportion(
        &self,
        expansion: Expansion,
        diagnostics: &mut Diagnostics,
    ) -> Result<DataFrame, FlowbyError> {
        let sector_column = expansion.sector_column();
        let frame = match self {
            Self::EqualSplit { index, group_by } => {
                equal_split(expansion.frame, sector_column, index, group_by)?
            }
            Self::Proportional { weights } => {
                proportional(expansion.frame, sector_column, weights, diagnostics)?
            }
        };
        drop_internal_columns(frame)
    }
}

fn equal_split(
    frame: DataFrame,
    sector_column: &str,
    index: &CrosswalkIndex,
    group_by: &[String],
) -> Result<DataFrame, FlowbyError> {
    let sectors = io::string_values(&frame, sector_column)?;

    let mut with_levels = frame;
    for depth in MIN_DEPTH..=MAX_DEPTH {
        let keys: Vec<String> = sectors
            .iter()
            .map(|s| s.as_deref().map(|s| index.level_key(s, depth)).unwrap_or_default())
            .collect();
        with_levels.with_column(Column::new(internal::level(depth).into(), &keys))?;
    }

    // The originating record always roots the partition, so one record never
    // counts another record's branches.
    let mut partition: Vec<Expr> = vec![col(internal::RECORD_ID)];
    partition.extend(group_by.iter().map(|c| col(c)));
    let mut divisor = lit(1.0);
    for depth in MIN_DEPTH..=MAX_DEPTH {
        let level = internal::level(depth);
        divisor = divisor
            * col(level)
                .n_unique()
                .over(partition.clone())
                .cast(DataType::Float64);
        partition.push(col(level));
    }

    let result = with_levels
        .lazy()
        .with_column(
            (col(flow::FLOW_AMOUNT).cast(DataType::Float64) / divisor).alias(flow::FLOW_AMOUNT),
        )
        .collect()?;
    Ok(result)
}

fn proportional(
    frame: DataFrame,
    sector_column: &str,
    weights: &HelperWeights,
    diagnostics: &mut Diagnostics,
) -> Result<DataFrame, FlowbyError> {
    io::require_columns(&frame, &[flow::LOCATION])?;
    let locations = io::string_values(&frame, flow::LOCATION)?;
    let sectors = io::string_values(&frame, sector_column)?;

    let helper: Vec<f64> = locations
        .iter()
        .zip(&sectors)
        .map(|(location, sector)| match (location, sector) {
            (Some(location), Some(sector)) => weights
                .weight(location, sector)
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(0.0),
            _ => 0.0,
        })
        .collect();

    let mut with_weights = frame;
    with_weights.with_column(Column::new(internal::HELPER_WEIGHT.into(), &helper))?;

    let weighted = with_weights
        .lazy()
        .with_column(
            col(internal::HELPER_WEIGHT)
                .sum()
                .over([col(internal::RECORD_ID)])
                .alias(internal::WEIGHT_TOTAL),
        )
        .collect()?;

    // Records with several candidates and no helper signal at all.
    let totals = io::float_values(&weighted, internal::WEIGHT_TOTAL)?;
    let counts = weighted
        .column(internal::TARGET_COUNT)?
        .cast(&DataType::UInt32)?;
    let counts = counts.u32()?;
    let mut keep: Vec<bool> = Vec::with_capacity(weighted.height());
    let mut dropped_keys: HashMap<String, usize> = HashMap::new();
    for (row, total) in totals.iter().enumerate() {
        let single = counts.get(row).unwrap_or(1) <= 1;
        let has_signal = total.is_some_and(|t| t > 0.0);
        keep.push(single || has_signal);
        if !single && !has_signal {
            let key = format!(
                "{}/{}",
                locations[row].as_deref().unwrap_or(""),
                sectors[row].as_deref().unwrap_or("")
            );
            *dropped_keys.entry(key).or_default() += 1;
        }
    }
    let keep = BooleanChunked::from_slice("keep".into(), &keep);
    let kept = weighted.filter(&keep)?;

    if !dropped_keys.is_empty() {
        warn!(
            rows = dropped_keys.values().sum::<usize>(),
            "Proportional split has no helper signal, dropping amounts"
        );
        let mut keys: Vec<_> = dropped_keys.into_iter().collect();
        keys.sort();
        for (key, rows) in keys {
            diagnostics.record_many(Condition::ApportionmentDivideByZero, rows, key);
        }
    }

    let share = when(col(internal::TARGET_COUNT).lt_eq(lit(1)))
        .then(lit(1.0))
        .otherwise(col(internal::HELPER_WEIGHT) / col(internal::WEIGHT_TOTAL));
    let result = kept
        .lazy()
        .with_column(
            (col(flow::FLOW_AMOUNT).cast(DataType::Float64) * share).alias(flow::FLOW_AMOUNT),
        )
        .collect()?;

    debug!(rows = result.height(), "Applied proportional shares");
    Ok(result)
}

fn drop_internal_columns(frame: DataFrame) -> Result<DataFrame, FlowbyError> {
    let keep: Vec<String> = frame
        .get_column_names_str()
        .iter()
        .filter(|name| !internal::is_internal(name))
        .map(|name| name.to_string())
        .collect();
    Ok(frame.select(keep)?)
}
