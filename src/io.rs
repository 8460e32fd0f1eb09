use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;

use crate::error::FlowbyError;
use crate::schema::{flow, quality};

/// Read a CSV file with all columns as String dtype.
/// Trims whitespace from column names and applies optional rename.
pub fn read_csv_as_strings(
    path: impl AsRef<Path>,
    rename: Option<&HashMap<String, String>>,
) -> Result<DataFrame, FlowbyError> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;

    if let Some(map) = rename {
        let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
        df = df.lazy().rename(old, new, true).collect()?;
    }

    Ok(df)
}

/// Load a parsed flow table: strings everywhere except the amount, the
/// data-quality scores and the year. Empty amounts stay null (suppressed).
pub fn load_flows(path: impl AsRef<Path>) -> Result<DataFrame, FlowbyError> {
    let raw = read_csv_as_strings(path, None)?;
    require_columns(&raw, &[flow::FLOW_AMOUNT])?;
    let reported = string_values(&raw, flow::FLOW_AMOUNT)?;

    let flows = cast_flow_columns(raw)?;
    let parsed = float_values(&flows, flow::FLOW_AMOUNT)?;
    if let Some(row) = reported
        .iter()
        .zip(&parsed)
        .position(|(r, p)| r.is_some() && p.is_none())
    {
        return Err(FlowbyError::InvalidData(format!(
            "row {row}: FlowAmount '{}' is not a number",
            reported[row].as_deref().unwrap_or_default()
        )));
    }
    Ok(flows)
}

/// Cast the numeric flow columns that are present; empty cells become null.
pub fn cast_flow_columns(df: DataFrame) -> Result<DataFrame, FlowbyError> {
    let schema = df.schema().clone();
    let mut casts: Vec<Expr> = Vec::new();

    for name in std::iter::once(flow::FLOW_AMOUNT).chain(quality::ALL) {
        if schema.contains(name) {
            casts.push(parse_number(name, DataType::Float64));
        }
    }
    if schema.contains(flow::YEAR) {
        casts.push(parse_number(flow::YEAR, DataType::Int64));
    }
    if casts.is_empty() {
        return Ok(df);
    }

    Ok(df.lazy().with_columns(casts).collect()?)
}

fn parse_number(name: &str, dtype: DataType) -> Expr {
    col(name)
        .cast(DataType::String)
        .str()
        .strip_chars(lit(" \t\r\n"))
        .cast(dtype)
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<(), FlowbyError> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(FlowbyError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// Column values as owned, trimmed strings; empty cells read as null.
pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, FlowbyError> {
    let column = df
        .column(name)
        .map_err(|_| FlowbyError::MissingColumn(name.to_string()))?
        .cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        })
        .collect())
}

pub fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, FlowbyError> {
    let column = df
        .column(name)
        .map_err(|_| FlowbyError::MissingColumn(name.to_string()))?
        .cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_flows_casts_numeric_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, " Class ,FlowAmount,ActivityProducedBy,Year,DataReliability").unwrap();
        writeln!(file, "Money, 12.5 ,1111,2012,5").unwrap();
        writeln!(file, "Money,,1112,2012,").unwrap();

        let df = load_flows(file.path()).unwrap();
        assert_eq!(df.column("Class").unwrap().dtype(), &DataType::String);
        let amounts = float_values(&df, flow::FLOW_AMOUNT).unwrap();
        assert_eq!(amounts, vec![Some(12.5), None]);
        assert_eq!(df.column(flow::YEAR).unwrap().dtype(), &DataType::Int64);
        assert_eq!(
            string_values(&df, flow::ACTIVITY_PRODUCED_BY).unwrap(),
            vec![Some("1111".to_string()), Some("1112".to_string())]
        );
    }

    #[test]
    fn non_numeric_amount_is_invalid_data() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "FlowAmount,ActivityProducedBy").unwrap();
        writeln!(file, "1,1111").unwrap();
        writeln!(file, "(D),1112").unwrap();

        let err = load_flows(file.path()).unwrap_err();
        assert!(matches!(err, FlowbyError::InvalidData(msg) if msg.contains("(D)")));
    }

    #[test]
    fn rename_is_applied_after_trimming() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, " naics ,value").unwrap();
        writeln!(file, "11,1").unwrap();

        let rename = HashMap::from([("naics".to_string(), "NAICS_2".to_string())]);
        let df = read_csv_as_strings(file.path(), Some(&rename)).unwrap();
        assert!(df.column("NAICS_2").is_ok());
        assert!(df.column("value").is_ok());
    }

    #[test]
    fn missing_column_is_reported() {
        let df = df!("a" => ["x"]).unwrap();
        let err = require_columns(&df, &["a", "b"]).unwrap_err();
        assert!(matches!(err, FlowbyError::MissingColumn(c) if c == "b"));
    }
}
