use std::path::Path;

use serde::Deserialize;

use crate::apportion::ApportionMethod;
use crate::crosswalk::IntegrityPolicy;
use crate::error::FlowbyError;
use crate::sector::Role;
use crate::suppression::SuppressionConfig;
use crate::target::TargetConfig;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttributionConfig {
    pub integrity_policy: IntegrityPolicy,
    /// Keep activity columns next to the resolved sector columns.
    pub retain_activity_columns: bool,
    pub target: TargetsConfig,
    pub apportion: ApportionConfig,
    pub suppression: SuppressionConfig,
    pub aggregate: AggregateConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Target per role, NAICS_6 for both unless configured. A role without a
/// target is left activity-coded.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetsConfig {
    pub produced_by: Option<TargetConfig>,
    pub consumed_by: Option<TargetConfig>,
}

impl Default for TargetsConfig {
    fn default() -> Self {
        Self {
            produced_by: Some(TargetConfig::Depth(6)),
            consumed_by: Some(TargetConfig::Depth(6)),
        }
    }
}

impl TargetsConfig {
    pub fn for_role(&self, role: Role) -> Option<&TargetConfig> {
        match role {
            Role::ProducedBy => self.produced_by.as_ref(),
            Role::ConsumedBy => self.consumed_by.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApportionConfig {
    pub method: ApportionMethod,
    /// Extra partition columns for the equal split.
    pub group_by: Vec<String>,
    /// Read helper weights at this location for every record.
    pub helper_location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregateConfig {
    /// Group key; empty means every descriptive column.
    pub fields: Vec<String>,
}

impl AggregateConfig {
    pub fn fields(&self) -> Option<&[String]> {
        (!self.fields.is_empty()).then_some(self.fields.as_slice())
    }
}

// ---------------------------------------------------------------------------
// Parse + validate
// ---------------------------------------------------------------------------

impl AttributionConfig {
    pub fn from_toml(input: &str) -> Result<Self, FlowbyError> {
        let config: AttributionConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowbyError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), FlowbyError> {
        for role in Role::ALL {
            if let Some(target) = self.target.for_role(role) {
                target.validate().map_err(|e| match e {
                    FlowbyError::Config(msg) => {
                        FlowbyError::Config(format!("target.{role}: {msg}"))
                    }
                    other => other,
                })?;
            }
        }

        if self.suppression.enabled && self.suppression.code_column.trim().is_empty() {
            return Err(FlowbyError::Config(
                "suppression.code_column must not be empty".into(),
            ));
        }

        if let Some(location) = &self.apportion.helper_location {
            if location.trim().is_empty() {
                return Err(FlowbyError::Config(
                    "apportion.helper_location must not be empty".into(),
                ));
            }
        }

        if self.aggregate.fields.iter().any(|f| f.trim().is_empty()) {
            return Err(FlowbyError::Config(
                "aggregate.fields must not contain empty names".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::flow;

    const FULL: &str = r#"
integrity_policy = "reject"
retain_activity_columns = true

[target.produced_by]
industry_spec = { default = "NAICS_3", NAICS_4 = ["221"] }

[target.consumed_by]
codes = ["1111", "F010"]

[apportion]
method = "proportional"
helper_location = "00000"

[suppression]
enabled = true
zero_is_suppressed = true

[aggregate]
fields = ["SectorProducedBy", "Location"]
"#;

    #[test]
    fn parses_every_section() {
        let config = AttributionConfig::from_toml(FULL).unwrap();

        assert_eq!(config.integrity_policy, IntegrityPolicy::Reject);
        assert!(config.retain_activity_columns);
        match config.target.produced_by.as_ref().unwrap() {
            TargetConfig::IndustrySpec(spec) => {
                assert_eq!(spec.default, "NAICS_3");
                assert_eq!(spec.levels["NAICS_4"], vec!["221"]);
            }
            other => panic!("unexpected target {other:?}"),
        }
        assert_eq!(
            config.target.consumed_by,
            Some(TargetConfig::Codes(vec!["1111".into(), "F010".into()]))
        );
        assert_eq!(config.apportion.method, ApportionMethod::Proportional);
        assert_eq!(config.apportion.helper_location.as_deref(), Some("00000"));
        assert!(config.suppression.enabled);
        assert!(config.suppression.zero_is_suppressed);
        assert_eq!(config.suppression.code_column, flow::ACTIVITY_PRODUCED_BY);
        assert_eq!(config.aggregate.fields().map(|f| f.len()), Some(2));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = AttributionConfig::from_toml("").unwrap();
        assert_eq!(config.integrity_policy, IntegrityPolicy::Backfill);
        assert_eq!(config.target.produced_by, Some(TargetConfig::Depth(6)));
        assert_eq!(config.apportion.method, ApportionMethod::Equal);
        assert!(!config.suppression.enabled);
        assert!(config.aggregate.fields().is_none());
    }

    #[test]
    fn invalid_depth_is_rejected() {
        let err = AttributionConfig::from_toml("[target.produced_by]\ndepth = 8\n").unwrap_err();
        assert!(matches!(err, FlowbyError::InvalidDepth(8)));

        let err = AttributionConfig::from_toml("[target.consumed_by]\ncodes = []\n").unwrap_err();
        assert!(matches!(err, FlowbyError::Config(msg) if msg.starts_with("target.consumed_by")));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = AttributionConfig::from_toml("integrity_policy = \"sometimes\"").unwrap_err();
        assert!(matches!(err, FlowbyError::ConfigParse(_)));
        assert!(err.is_configuration());
    }
}
