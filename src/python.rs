use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::PyModule;
use pyo3_polars::PyDataFrame;

use crate::activity::ActivityCrosswalk;
use crate::aggregation;
use crate::config::AttributionConfig;
use crate::crosswalk::CrosswalkIndex;
use crate::diagnostics::Diagnostics;
use crate::io;
use crate::pipeline::SectorAttribution;
use crate::schema;

#[pyclass(name = "SectorAttribution")]
pub struct PySectorAttribution {
    inner: SectorAttribution,
    last_diagnostics: Diagnostics,
}

#[pymethods]
impl PySectorAttribution {
    /// Build from a sector-length crosswalk CSV and an optional TOML config.
    /// `irregular_codes` is a CSV of household/government codes.
    #[staticmethod]
    #[pyo3(signature = (path, config_toml=None, irregular_codes=None))]
    fn from_crosswalk_csv(
        path: &str,
        config_toml: Option<&str>,
        irregular_codes: Option<&str>,
    ) -> PyResult<Self> {
        let config = match config_toml {
            Some(toml) => AttributionConfig::from_toml(toml)?,
            None => AttributionConfig::default(),
        };
        let mut index = CrosswalkIndex::from_csv(path, config.integrity_policy)?;
        if let Some(irregular) = irregular_codes {
            let table = io::read_csv_as_strings(irregular, None)?;
            index.add_irregular_codes(&table)?;
        }
        Ok(Self {
            inner: SectorAttribution::new(Arc::new(index), config)?,
            last_diagnostics: Diagnostics::default(),
        })
    }

    /// Load any CSV with all columns as strings, optionally renaming columns.
    #[staticmethod]
    #[pyo3(signature = (path, rename=None))]
    fn load_csv(path: &str, rename: Option<HashMap<String, String>>) -> PyResult<PyDataFrame> {
        let df = io::read_csv_as_strings(path, rename.as_ref())?;
        Ok(PyDataFrame(df))
    }

    /// Load a flow table with numeric amount, data-quality and year columns.
    #[staticmethod]
    fn load_flows(path: &str) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(io::load_flows(path)?))
    }

    fn set_activity_crosswalk(&mut self, table: PyDataFrame) -> PyResult<()> {
        let crosswalk = ActivityCrosswalk::from_frame(&table.0)?;
        self.inner.set_activity_crosswalk(crosswalk);
        Ok(())
    }

    fn set_helper(&mut self, helper: PyDataFrame) -> PyResult<()> {
        self.inner.set_helper(&helper.0)?;
        Ok(())
    }

    fn attribute(&mut self, flows: PyDataFrame) -> PyResult<PyDataFrame> {
        let attributed = self.inner.attribute(&flows.0)?;
        self.last_diagnostics = attributed.diagnostics;
        Ok(PyDataFrame(attributed.flows))
    }

    fn estimate_suppressed(&mut self, flows: PyDataFrame) -> PyResult<PyDataFrame> {
        let estimated = self.inner.estimate_suppressed(&flows.0)?;
        self.last_diagnostics = estimated.diagnostics;
        Ok(PyDataFrame(estimated.flows))
    }

    /// Group by descriptive columns (or `fields`) and sum `FlowAmount`.
    #[staticmethod]
    #[pyo3(signature = (flows, fields=None))]
    fn aggregate(flows: PyDataFrame, fields: Option<Vec<String>>) -> PyResult<PyDataFrame> {
        let result = aggregation::aggregate_flows(&flows.0, fields.as_deref())?;
        Ok(PyDataFrame(result))
    }

    /// Counts per recovered condition from the last run.
    #[getter]
    fn diagnostics(&self) -> BTreeMap<String, usize> {
        self.last_diagnostics.counts()
    }

    #[getter]
    fn diagnostics_summary(&self) -> String {
        self.last_diagnostics.summary()
    }
}

/// Export schema constants as Python submodules
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Flow
    let flow = PyModule::new(m.py(), "flow")?;
    flow.add("CLASS", schema::flow::CLASS)?;
    flow.add("SOURCE_NAME", schema::flow::SOURCE_NAME)?;
    flow.add("FLOW_NAME", schema::flow::FLOW_NAME)?;
    flow.add("FLOWABLE", schema::flow::FLOWABLE)?;
    flow.add("FLOW_AMOUNT", schema::flow::FLOW_AMOUNT)?;
    flow.add("UNIT", schema::flow::UNIT)?;
    flow.add("FLOW_TYPE", schema::flow::FLOW_TYPE)?;
    flow.add("ACTIVITY_PRODUCED_BY", schema::flow::ACTIVITY_PRODUCED_BY)?;
    flow.add("ACTIVITY_CONSUMED_BY", schema::flow::ACTIVITY_CONSUMED_BY)?;
    flow.add("SECTOR_PRODUCED_BY", schema::flow::SECTOR_PRODUCED_BY)?;
    flow.add("SECTOR_CONSUMED_BY", schema::flow::SECTOR_CONSUMED_BY)?;
    flow.add("LOCATION", schema::flow::LOCATION)?;
    flow.add("LOCATION_SYSTEM", schema::flow::LOCATION_SYSTEM)?;
    flow.add("YEAR", schema::flow::YEAR)?;
    m.add_submodule(&flow)?;

    // Data quality
    let quality = PyModule::new(m.py(), "quality")?;
    quality.add("ALL", schema::quality::ALL.to_vec())?;
    m.add_submodule(&quality)?;

    // Flow types
    let flow_type = PyModule::new(m.py(), "flow_type")?;
    flow_type.add("ELEMENTARY", schema::flow_type::ELEMENTARY)?;
    flow_type.add("TECHNOSPHERE", schema::flow_type::TECHNOSPHERE)?;
    flow_type.add("WASTE", schema::flow_type::WASTE)?;
    m.add_submodule(&flow_type)?;

    // Crosswalk
    let crosswalk = PyModule::new(m.py(), "crosswalk")?;
    crosswalk.add("LEVELS", schema::crosswalk::ALL.to_vec())?;
    crosswalk.add("IRREGULAR_CODE", schema::irregular::CODE)?;
    crosswalk.add("IRREGULAR_LEVEL", schema::irregular::LEVEL)?;
    crosswalk.add("ACTIVITY", schema::activity_map::ACTIVITY)?;
    crosswalk.add("SECTOR", schema::activity_map::SECTOR)?;
    crosswalk.add("SECTOR_TYPE", schema::activity_map::SECTOR_TYPE)?;
    m.add_submodule(&crosswalk)?;

    Ok(())
}

#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySectorAttribution>()?;
    add_schema_exports(m)?;
    Ok(())
}
