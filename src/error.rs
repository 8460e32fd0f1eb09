#[cfg(feature = "python")]
use pyo3::exceptions::{PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowbyError {
    /// The crosswalk reference table does not describe a valid hierarchy.
    #[error("Crosswalk integrity: {0}")]
    CrosswalkIntegrity(String),

    #[error("Invalid sector depth: {0} (expected 2..=6)")]
    InvalidDepth(u8),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    General(String),
}

impl FlowbyError {
    /// Structural problems with the inputs the caller configured, as opposed to
    /// failures while transforming the data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::CrosswalkIntegrity(_)
                | Self::InvalidDepth(_)
                | Self::ConfigParse(_)
                | Self::Config(_)
        )
    }
}

#[cfg(feature = "python")]
impl From<FlowbyError> for PyErr {
    fn from(err: FlowbyError) -> PyErr {
        if err.is_configuration() {
            PyValueError::new_err(err.to_string())
        } else {
            PyRuntimeError::new_err(err.to_string())
        }
    }
}

#[cfg(feature = "python")]
impl From<PyErr> for FlowbyError {
    fn from(err: PyErr) -> Self {
        FlowbyError::General(err.to_string())
    }
}
