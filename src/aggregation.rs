use std::collections::HashMap;

use polars::prelude::*;
use tracing::debug;

use crate::crosswalk::CrosswalkIndex;
use crate::error::FlowbyError;
use crate::io;
use crate::schema::{flow, internal, quality};
use crate::sector::Role;
use crate::target::RoleTarget;

/// Columns that identify a flow: everything except the amount, the
/// data-quality scores and engine-private columns.
pub fn descriptive_columns(flows: &DataFrame) -> Vec<String> {
    flows
        .get_column_names_str()
        .into_iter()
        .filter(|name| {
            *name != flow::FLOW_AMOUNT
                && !quality::ALL.contains(name)
                && !internal::is_internal(name)
        })
        .map(|name| name.to_string())
        .collect()
}

/// Group by the descriptive fields and sum `FlowAmount`.
///
/// `fields` narrows the group key; other descriptive columns are dropped.
/// Data-quality columns are combined as amount-weighted averages. Output
/// keeps the input column order and the order of first appearance of each
/// group.
pub fn aggregate_flows(
    flows: &DataFrame,
    fields: Option<&[String]>,
) -> Result<DataFrame, FlowbyError> {
    io::require_columns(flows, &[flow::FLOW_AMOUNT])?;

    let keys: Vec<String> = match fields {
        Some(fields) if !fields.is_empty() => {
            let names: Vec<&str> = fields.iter().map(String::as_str).collect();
            io::require_columns(flows, &names)?;
            fields.to_vec()
        }
        _ => descriptive_columns(flows),
    };

    let schema = flows.schema();
    let dq: Vec<&str> = quality::ALL
        .into_iter()
        .filter(|name| schema.contains(name))
        .collect();

    let mut aggs: Vec<Expr> = vec![col(flow::FLOW_AMOUNT).sum().alias(flow::FLOW_AMOUNT)];
    aggs.extend(dq.iter().map(|name| weighted_average(name)));

    let grouped = if keys.is_empty() {
        flows.clone().lazy().select(aggs)
    } else {
        let key_exprs: Vec<Expr> = keys.iter().map(|k| col(k.as_str())).collect();
        flows.clone().lazy().group_by_stable(key_exprs).agg(aggs)
    };

    let order: Vec<Expr> = flows
        .get_column_names_str()
        .into_iter()
        .filter(|name| {
            keys.iter().any(|k| k.as_str() == *name)
                || *name == flow::FLOW_AMOUNT
                || dq.contains(name)
        })
        .map(col)
        .collect();
    let result = grouped.select(order).collect()?;

    debug!(rows_in = flows.height(), rows_out = result.height(), "Aggregated flows");
    Ok(result)
}

/// `FlowAmount`-weighted mean of a data-quality score. Single-row groups keep
/// their value; groups with no weight fall back to the plain mean.
fn weighted_average(name: &str) -> Expr {
    let weight = when(col(name).is_not_null())
        .then(col(flow::FLOW_AMOUNT).fill_null(lit(0.0)))
        .otherwise(lit(0.0));
    let total = weight.clone().sum();

    when(len().eq(lit(1)))
        .then(col(name).first())
        .when(total.clone().eq(lit(0.0)))
        .then(col(name).mean())
        .otherwise((col(name) * weight).sum() / total)
        .alias(name)
}

/// Re-express an already sector-coded table at a coarser target and
/// aggregate. Sectors already at or above the target are kept as they are.
pub fn sector_aggregation(
    flows: &DataFrame,
    index: &CrosswalkIndex,
    target: &RoleTarget,
    fields: Option<&[String]>,
) -> Result<DataFrame, FlowbyError> {
    let mut out = flows.clone();
    let mut cache: HashMap<String, String> = HashMap::new();

    for role in Role::ALL {
        let column = role.sector_column();
        if out.column(column).is_err() {
            continue;
        }
        let mapped: Vec<Option<String>> = io::string_values(&out, column)?
            .into_iter()
            .map(|code| {
                code.map(|code| {
                    cache
                        .entry(code)
                        .or_insert_with_key(|code| coarsen(index, target, code))
                        .clone()
                })
            })
            .collect();
        out.with_column(Column::new(column.into(), &mapped))?;
    }

    aggregate_flows(&out, fields)
}

fn coarsen(index: &CrosswalkIndex, target: &RoleTarget, code: &str) -> String {
    match target {
        RoleTarget::Depth(depth) => index.level_key(code, *depth),
        RoleTarget::Codes(codes) if codes.contains(code) => code.to_string(),
        RoleTarget::Codes(codes) => index
            .ancestors(code)
            .into_iter()
            .find(|a| codes.contains(*a))
            .unwrap_or(code)
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::IntegrityPolicy;
    use crate::schema::crosswalk;

    fn flows() -> DataFrame {
        df!(
            flow::SECTOR_PRODUCED_BY => ["1111", "1111", "1112", "1111"],
            flow::LOCATION => ["06000", "06000", "06000", "41000"],
            flow::FLOW_AMOUNT => [30.0, 10.0, 5.0, 2.0],
            quality::DATA_RELIABILITY => [Some(1.0), Some(5.0), Some(3.0), None],
            flow::UNIT => ["kg", "kg", "kg", "kg"],
        )
        .unwrap()
    }

    #[test]
    fn sums_amounts_and_weights_quality() {
        let out = aggregate_flows(&flows(), None).unwrap();

        assert_eq!(out.height(), 3);
        assert_eq!(
            out.get_column_names_str(),
            vec![
                flow::SECTOR_PRODUCED_BY,
                flow::LOCATION,
                flow::FLOW_AMOUNT,
                quality::DATA_RELIABILITY,
                flow::UNIT,
            ]
        );
        let amounts = io::float_values(&out, flow::FLOW_AMOUNT).unwrap();
        assert_eq!(amounts, vec![Some(40.0), Some(5.0), Some(2.0)]);
        let dq = io::float_values(&out, quality::DATA_RELIABILITY).unwrap();
        assert_eq!(dq, vec![Some(2.0), Some(3.0), None]);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let once = aggregate_flows(&flows(), None).unwrap();
        let twice = aggregate_flows(&once, None).unwrap();
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn explicit_fields_drop_other_columns() {
        let fields = vec![flow::SECTOR_PRODUCED_BY.to_string()];
        let out = aggregate_flows(&flows(), Some(fields.as_slice())).unwrap();
        assert_eq!(out.height(), 2);
        assert!(out.column(flow::LOCATION).is_err());
        assert_eq!(
            io::float_values(&out, flow::FLOW_AMOUNT).unwrap(),
            vec![Some(42.0), Some(5.0)]
        );

        let missing = vec!["Nope".to_string()];
        assert!(matches!(
            aggregate_flows(&flows(), Some(missing.as_slice())),
            Err(FlowbyError::MissingColumn(_))
        ));
    }

    #[test]
    fn zero_weight_groups_use_plain_mean() {
        let df = df!(
            flow::SECTOR_PRODUCED_BY => ["11", "11"],
            flow::FLOW_AMOUNT => [0.0, 0.0],
            quality::SPREAD => [2.0, 4.0],
        )
        .unwrap();
        let out = aggregate_flows(&df, None).unwrap();
        assert_eq!(io::float_values(&out, quality::SPREAD).unwrap(), vec![Some(3.0)]);
    }

    #[test]
    fn sector_aggregation_rolls_up_to_target() {
        let table = df!(
            crosswalk::NAICS_2 => ["11", "11"],
            crosswalk::NAICS_3 => ["111", "112"],
            crosswalk::NAICS_4 => ["1111", "1121"],
        )
        .unwrap();
        let index = CrosswalkIndex::build(&table, IntegrityPolicy::Reject).unwrap();
        let df = df!(
            flow::SECTOR_PRODUCED_BY => ["1111", "1121", "11"],
            flow::FLOW_AMOUNT => [1.0, 2.0, 4.0],
        )
        .unwrap();

        let by_depth = sector_aggregation(&df, &index, &RoleTarget::Depth(2), None).unwrap();
        assert_eq!(
            io::float_values(&by_depth, flow::FLOW_AMOUNT).unwrap(),
            vec![Some(7.0)]
        );

        let target = RoleTarget::codes(["111", "1121"]).unwrap();
        let by_codes = sector_aggregation(&df, &index, &target, None).unwrap();
        assert_eq!(
            io::string_values(&by_codes, flow::SECTOR_PRODUCED_BY).unwrap(),
            vec![Some("111".to_string()), Some("1121".to_string()), Some("11".to_string())]
        );
    }
}
