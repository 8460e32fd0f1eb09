use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;
use tracing::{debug, info};

use crate::activity::ActivityCrosswalk;
use crate::aggregation;
use crate::apportion::{ApportionMethod, Apportioner, HelperWeights};
use crate::config::AttributionConfig;
use crate::crosswalk::CrosswalkIndex;
use crate::diagnostics::Diagnostics;
use crate::error::FlowbyError;
use crate::resolver::SectorResolver;
use crate::sector::Role;
use crate::suppression::SuppressionEstimator;
use crate::target::{RoleTarget, TargetConfig};

/// Sector-coded flows and what was recovered along the way.
#[derive(Debug, Clone)]
pub struct Attributed {
    pub flows: DataFrame,
    pub diagnostics: Diagnostics,
}

/// Attributes activity-coded flow tables to target sectors.
///
/// Holds the shared crosswalk index, the per-role targets expanded once at
/// construction, and the helper weights prepared by [`Self::with_helper`].
#[derive(Debug, Clone)]
pub struct SectorAttribution {
    index: Arc<CrosswalkIndex>,
    config: AttributionConfig,
    targets: BTreeMap<Role, RoleTarget>,
    activity_crosswalk: Option<ActivityCrosswalk>,
    helpers: BTreeMap<Role, HelperWeights>,
}

impl SectorAttribution {
    pub fn new(index: Arc<CrosswalkIndex>, config: AttributionConfig) -> Result<Self, FlowbyError> {
        config.validate()?;

        let mut targets = BTreeMap::new();
        for role in Role::ALL {
            if let Some(target) = config.target.for_role(role) {
                targets.insert(role, target.into_target(&index)?);
            }
        }

        Ok(Self {
            index,
            config,
            targets,
            activity_crosswalk: None,
            helpers: BTreeMap::new(),
        })
    }

    /// Build the index from a crosswalk CSV using the configured policy.
    pub fn from_crosswalk_csv(
        path: impl AsRef<Path>,
        config: AttributionConfig,
    ) -> Result<Self, FlowbyError> {
        let index = CrosswalkIndex::from_csv(path, config.integrity_policy)?;
        Self::new(Arc::new(index), config)
    }

    pub fn with_activity_crosswalk(mut self, crosswalk: ActivityCrosswalk) -> Self {
        self.set_activity_crosswalk(crosswalk);
        self
    }

    pub fn set_activity_crosswalk(&mut self, crosswalk: ActivityCrosswalk) {
        self.activity_crosswalk = Some(crosswalk);
    }

    /// Resolve a helper dataset to every role target and keep it as weights
    /// for proportional apportionment.
    pub fn with_helper(mut self, helper: &DataFrame) -> Result<Self, FlowbyError> {
        self.set_helper(helper)?;
        Ok(self)
    }

    pub fn set_helper(&mut self, helper: &DataFrame) -> Result<(), FlowbyError> {
        let mut diagnostics = Diagnostics::default();
        let mut helpers = BTreeMap::new();

        // A helper reported at several depths counts each value once.
        let helper = if helper.column(&self.config.suppression.code_column).is_ok() {
            SuppressionEstimator::new(self.config.suppression.clone()).finest_reported(helper)?
        } else {
            helper.clone()
        };
        let helper = &helper;

        for (&role, target) in &self.targets {
            // Helper codes sit in the produced-by columns whichever role they weight.
            let resolved = SectorResolver::new(&self.index).resolve(
                helper,
                Role::ProducedBy,
                target,
                &mut diagnostics,
            )?;
            let Some(expansion) = resolved else {
                return Err(FlowbyError::MissingColumn(
                    Role::ProducedBy.sector_column().into(),
                ));
            };
            let apportioned = Apportioner::EqualSplit {
                index: &self.index,
                group_by: Vec::new(),
            }
            .apportion(expansion, &mut diagnostics)?;

            let weights = HelperWeights::from_resolved(&apportioned, Role::ProducedBy)?
                .with_fixed_location(self.config.apportion.helper_location.clone());
            debug!(role = %role, entries = weights.len(), "Prepared helper weights");
            helpers.insert(role, weights);
        }

        if !diagnostics.is_clean() {
            info!(summary = %diagnostics.summary(), "Helper resolution recovered conditions");
        }
        self.helpers = helpers;
        Ok(())
    }

    pub fn index(&self) -> &CrosswalkIndex {
        &self.index
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn target(&self, role: Role) -> Option<&RoleTarget> {
        self.targets.get(&role)
    }

    /// Fill suppressed values regardless of `suppression.enabled`, then
    /// aggregate. Rows at every reported depth are kept.
    pub fn estimate_suppressed(&self, flows: &DataFrame) -> Result<Attributed, FlowbyError> {
        let mut diagnostics = Diagnostics::default();
        let estimation = SuppressionEstimator::new(self.config.suppression.clone())
            .estimate(flows, &mut diagnostics)?;
        Ok(Attributed {
            flows: aggregation::aggregate_flows(&estimation.flows, None)?,
            diagnostics,
        })
    }

    /// Estimate, then keep only the finest reported rows so that parents and
    /// their children are not both attributed. Skipped when the code column
    /// is absent.
    fn estimate_finest(
        &self,
        flows: &DataFrame,
        diagnostics: &mut Diagnostics,
    ) -> Result<DataFrame, FlowbyError> {
        let config = &self.config.suppression;
        if flows.column(&config.code_column).is_err() {
            debug!(column = %config.code_column, "No code column, skipping suppression estimate");
            return Ok(flows.clone());
        }
        let estimator = SuppressionEstimator::new(config.clone());
        let estimated = estimator.estimate(flows, diagnostics)?.flows;
        let finest = estimator.finest_reported(&estimated)?;
        aggregation::aggregate_flows(&finest, None)
    }

    /// Estimate (when enabled), then resolve, apportion and aggregate each
    /// role in turn.
    pub fn attribute(&self, flows: &DataFrame) -> Result<Attributed, FlowbyError> {
        let mut diagnostics = Diagnostics::default();

        let mut current = if self.config.suppression.enabled {
            self.estimate_finest(flows, &mut diagnostics)?
        } else {
            flows.clone()
        };

        for (&role, target) in &self.targets {
            let mut resolver = SectorResolver::new(&self.index)
                .retain_activity(self.config.retain_activity_columns);
            if let Some(crosswalk) = &self.activity_crosswalk {
                resolver = resolver.with_overrides(crosswalk);
            }
            let Some(expansion) = resolver.resolve(&current, role, target, &mut diagnostics)?
            else {
                continue;
            };

            let apportioner = match self.config.apportion.method {
                ApportionMethod::Equal => Apportioner::EqualSplit {
                    index: &self.index,
                    group_by: self.config.apportion.group_by.clone(),
                },
                ApportionMethod::Proportional => {
                    let weights = self.helpers.get(&role).ok_or_else(|| {
                        FlowbyError::Config(format!(
                            "proportional apportionment for {role} needs a helper dataset"
                        ))
                    })?;
                    Apportioner::Proportional { weights }
                }
            };
            let apportioned = apportioner.apportion(expansion, &mut diagnostics)?;
            current = aggregation::aggregate_flows(&apportioned, None)?;
        }

        let flows = aggregation::aggregate_flows(&current, self.config.aggregate.fields())?;

        diagnostics.log();
        info!(
            rows = flows.height(),
            dropped = diagnostics.dropped_records(),
            summary = %diagnostics.summary(),
            "Attributed flows to sectors"
        );
        Ok(Attributed { flows, diagnostics })
    }

    pub fn aggregate(&self, flows: &DataFrame) -> Result<DataFrame, FlowbyError> {
        aggregation::aggregate_flows(flows, self.config.aggregate.fields())
    }

    /// Roll an attributed table up to a coarser target.
    pub fn sector_aggregation(
        &self,
        flows: &DataFrame,
        target: &TargetConfig,
    ) -> Result<DataFrame, FlowbyError> {
        target.validate()?;
        let target = target.into_target(&self.index)?;
        aggregation::sector_aggregation(flows, &self.index, &target, self.config.aggregate.fields())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetsConfig;
    use crate::crosswalk::IntegrityPolicy;
    use crate::diagnostics::Condition;
    use crate::io;
    use crate::schema::{crosswalk, flow};

    fn index() -> Arc<CrosswalkIndex> {
        let table = df!(
            crosswalk::NAICS_2 => ["11", "11", "11", "22"],
            crosswalk::NAICS_3 => ["111", "111", "112", "221"],
            crosswalk::NAICS_4 => ["1111", "1112", "1121", "2211"],
        )
        .unwrap();
        Arc::new(CrosswalkIndex::build(&table, IntegrityPolicy::Reject).unwrap())
    }

    fn config(depth: u8) -> AttributionConfig {
        AttributionConfig {
            target: TargetsConfig {
                produced_by: Some(TargetConfig::Depth(depth)),
                consumed_by: Some(TargetConfig::Depth(depth)),
            },
            ..AttributionConfig::default()
        }
    }

    #[test]
    fn attribute_resolves_both_roles() {
        let engine = SectorAttribution::new(index(), config(4)).unwrap();
        let flows = df!(
            flow::ACTIVITY_PRODUCED_BY => ["111", "2211"],
            flow::ACTIVITY_CONSUMED_BY => ["22", "9999"],
            flow::LOCATION => ["00000", "00000"],
            flow::FLOW_AMOUNT => [8.0, 5.0],
        )
        .unwrap();

        let out = engine.attribute(&flows).unwrap();
        assert!(out.flows.column(flow::ACTIVITY_PRODUCED_BY).is_err());
        assert!(out.flows.column(flow::ACTIVITY_CONSUMED_BY).is_err());
        assert_eq!(out.flows.height(), 2);
        let total: f64 = io::float_values(&out.flows, flow::FLOW_AMOUNT)
            .unwrap()
            .into_iter()
            .flatten()
            .sum();
        // 111 → 1111, 1112 both consumed by 2211; the 9999 record is dropped.
        assert!((total - 8.0).abs() < 1e-9);
        assert_eq!(out.diagnostics.count(Condition::UnresolvedCode), 1);
    }

    #[test]
    fn proportional_without_helper_is_a_config_error() {
        let mut cfg = config(4);
        cfg.apportion.method = ApportionMethod::Proportional;
        let engine = SectorAttribution::new(index(), cfg).unwrap();
        let flows = df!(
            flow::ACTIVITY_PRODUCED_BY => ["111"],
            flow::LOCATION => ["00000"],
            flow::FLOW_AMOUNT => [8.0],
        )
        .unwrap();
        assert!(matches!(engine.attribute(&flows), Err(FlowbyError::Config(_))));
    }

    #[test]
    fn helper_is_resolved_before_weighting() {
        let mut cfg = config(4);
        cfg.apportion.method = ApportionMethod::Proportional;
        cfg.target.consumed_by = None;
        // Activity-coded helper, partly at depth 3; resolved to NAICS_4 first.
        let helper = df!(
            flow::ACTIVITY_PRODUCED_BY => ["1111", "1112", "112"],
            flow::LOCATION => ["00000", "00000", "00000"],
            flow::FLOW_AMOUNT => [3.0, 1.0, 6.0],
        )
        .unwrap();
        let engine = SectorAttribution::new(index(), cfg)
            .unwrap()
            .with_helper(&helper)
            .unwrap();
        let flows = df!(
            flow::ACTIVITY_PRODUCED_BY => ["111"],
            flow::LOCATION => ["00000"],
            flow::FLOW_AMOUNT => [100.0],
        )
        .unwrap();

        let out = engine.attribute(&flows).unwrap();
        let amounts = io::float_values(&out.flows, flow::FLOW_AMOUNT).unwrap();
        let sectors = io::string_values(&out.flows, flow::SECTOR_PRODUCED_BY).unwrap();
        assert_eq!(sectors, vec![Some("1111".to_string()), Some("1112".to_string())]);
        assert!((amounts[0].unwrap() - 75.0).abs() < 1e-9);
        assert!((amounts[1].unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn estimation_is_skipped_without_a_code_column() {
        let mut cfg = config(4);
        cfg.suppression.enabled = true;
        let engine = SectorAttribution::new(index(), cfg).unwrap();
        let flows = df!(
            flow::ACTIVITY_CONSUMED_BY => ["111"],
            flow::LOCATION => ["00000"],
            flow::FLOW_AMOUNT => [8.0],
        )
        .unwrap();

        let out = engine.attribute(&flows).unwrap();
        assert_eq!(out.flows.height(), 2);
        assert!(out.diagnostics.is_clean());
    }

    #[test]
    fn estimated_flows_are_aggregated() {
        let engine = SectorAttribution::new(index(), config(4)).unwrap();
        let flows = df!(
            flow::ACTIVITY_PRODUCED_BY => ["11", "111", "112", "112"],
            flow::LOCATION => ["00000", "00000", "00000", "00000"],
            flow::FLOW_AMOUNT => [Some(10.0), Some(4.0), None, None],
        )
        .unwrap();

        let out = engine.estimate_suppressed(&flows).unwrap();
        let codes = io::string_values(&out.flows, flow::ACTIVITY_PRODUCED_BY).unwrap();
        let amounts = io::float_values(&out.flows, flow::FLOW_AMOUNT).unwrap();
        assert_eq!(codes.len(), 3);
        // Both withheld 112 rows get 3.0 and merge into one.
        assert_eq!(codes[2].as_deref(), Some("112"));
        assert!((amounts[2].unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_target_fails_construction() {
        let mut cfg = config(4);
        cfg.target.produced_by = Some(TargetConfig::Depth(9));
        assert!(matches!(
            SectorAttribution::new(index(), cfg),
            Err(FlowbyError::InvalidDepth(9))
        ));
    }
}
