//! Attribution of activity-coded flow tables to hierarchical industry sectors.
//!
//! Builds a sector hierarchy from a sector-length crosswalk, resolves each
//! record's produced-by and consumed-by codes to a target depth or allow-list,
//! splits amounts across multiple targets, reconstructs suppressed values from
//! parent totals and aggregates the result.

pub mod activity;
pub mod aggregation;
pub mod apportion;
pub mod config;
pub mod crosswalk;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod sector;
pub mod suppression;
pub mod target;

#[cfg(feature = "python")]
mod python;

pub use activity::ActivityCrosswalk;
pub use aggregation::{aggregate_flows, sector_aggregation};
pub use apportion::{ApportionMethod, Apportioner, HelperWeights};
pub use config::AttributionConfig;
pub use crosswalk::{CrosswalkIndex, IntegrityPolicy};
pub use diagnostics::{Condition, Diagnostics};
pub use error::FlowbyError;
pub use pipeline::{Attributed, SectorAttribution};
pub use resolver::{Expansion, SectorResolver};
pub use sector::{Role, SectorCode};
pub use suppression::{SuppressionConfig, SuppressionEstimator};
pub use target::{IndustrySpec, RoleTarget, TargetConfig};
