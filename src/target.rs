use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::crosswalk::CrosswalkIndex;
use crate::error::FlowbyError;
use crate::sector::{self, MIN_DEPTH};

/// Sector resolution requested for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleTarget {
    /// Every code at a fixed hierarchy depth.
    Depth(u8),
    /// Explicit allow-list of target codes, possibly at mixed depths.
    Codes(BTreeSet<String>),
}

impl RoleTarget {
    pub fn depth(depth: u8) -> Result<Self, FlowbyError> {
        Ok(Self::Depth(sector::validate_depth(depth)?))
    }

    pub fn codes<I, S>(codes: I) -> Result<Self, FlowbyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: BTreeSet<String> = codes.into_iter().map(Into::into).collect();
        if codes.is_empty() {
            return Err(FlowbyError::Config("Target code list is empty".into()));
        }
        Ok(Self::Codes(codes))
    }

    /// Whether `code` is itself a valid target.
    pub fn accepts(&self, code: &str, index: &CrosswalkIndex) -> bool {
        match self {
            Self::Depth(depth) => index.depth_of(code) == Some(*depth),
            Self::Codes(codes) => codes.contains(code),
        }
    }
}

/// Mixed-depth target: a default depth, plus named codes whose subtrees are
/// resolved at a deeper level.
///
/// ```toml
/// default = "NAICS_3"
/// NAICS_4 = ["221", "336"]
/// NAICS_6 = ["2211"]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IndustrySpec {
    pub default: String,
    #[serde(flatten)]
    pub levels: BTreeMap<String, Vec<String>>,
}

impl IndustrySpec {
    /// Expand into the explicit allow-list of target codes.
    ///
    /// Starts from every code at the default depth. Each listed code is
    /// replaced by its descendants at the level it is listed under; levels
    /// are applied shallow to deep so a code listed at NAICS_6 can refine a
    /// subtree already opened at NAICS_4.
    pub fn target_codes(&self, index: &CrosswalkIndex) -> Result<BTreeSet<String>, FlowbyError> {
        let default = sector::parse_level(&self.default)?;
        let mut targets = index.codes_at_depth(default);
        // Household/government leaves sit at their own declared depth.
        for depth in MIN_DEPTH..=sector::MAX_DEPTH {
            targets.extend(
                index
                    .codes_at_depth(depth)
                    .into_iter()
                    .filter(|c| index.is_irregular(c)),
            );
        }

        let mut levels: Vec<(u8, &Vec<String>)> = self
            .levels
            .iter()
            .map(|(level, codes)| -> Result<(u8, &Vec<String>), FlowbyError> {
                Ok((sector::parse_level(level)?, codes))
            })
            .collect::<Result<_, _>>()?;
        levels.sort_by_key(|(depth, _)| *depth);

        for (depth, codes) in levels {
            for code in codes {
                let Some(from) = index.depth_of(code) else {
                    return Err(FlowbyError::Config(format!(
                        "Industry spec code '{code}' is not in the crosswalk"
                    )));
                };
                if from >= depth {
                    return Err(FlowbyError::Config(format!(
                        "Industry spec lists '{code}' under NAICS_{depth} but it is already NAICS_{from}"
                    )));
                }
                let expanded = index.lookup(code, from, depth);
                targets.retain(|t| t != code && !is_within(index, t, code));
                targets.extend(expanded);
            }
        }

        if targets.is_empty() {
            return Err(FlowbyError::Config("Industry spec selects no sectors".into()));
        }
        Ok(targets)
    }
}

fn is_within(index: &CrosswalkIndex, code: &str, ancestor: &str) -> bool {
    index.ancestors(code).contains(&ancestor)
}

/// Per-role target as written in configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetConfig {
    Depth(u8),
    Codes(Vec<String>),
    IndustrySpec(IndustrySpec),
}

impl TargetConfig {
    pub fn validate(&self) -> Result<(), FlowbyError> {
        match self {
            Self::Depth(depth) => sector::validate_depth(*depth).map(|_| ()),
            Self::Codes(codes) if codes.is_empty() => {
                Err(FlowbyError::Config("Target code list is empty".into()))
            }
            Self::Codes(_) => Ok(()),
            Self::IndustrySpec(spec) => {
                sector::parse_level(&spec.default)?;
                for level in spec.levels.keys() {
                    sector::parse_level(level)?;
                }
                Ok(())
            }
        }
    }

    pub fn into_target(&self, index: &CrosswalkIndex) -> Result<RoleTarget, FlowbyError> {
        match self {
            Self::Depth(depth) => RoleTarget::depth(*depth),
            Self::Codes(codes) => RoleTarget::codes(codes.iter().cloned()),
            Self::IndustrySpec(spec) => Ok(RoleTarget::Codes(spec.target_codes(index)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::IntegrityPolicy;
    use crate::schema::crosswalk;
    use polars::prelude::*;

    fn index() -> CrosswalkIndex {
        let table = df!(
            crosswalk::NAICS_2 => ["22", "22", "22", "33", "11"],
            crosswalk::NAICS_3 => [Some("221"), Some("221"), Some("222"), Some("336"), Some("F01")],
            crosswalk::NAICS_4 => [Some("2211"), Some("2212"), Some("2221"), Some("3361"), None],
            crosswalk::NAICS_5 => [Some("22111"), Some("22121"), None, None, None],
            crosswalk::NAICS_6 => [Some("221111"), Some("221210"), None, None, None],
        )
        .unwrap();
        CrosswalkIndex::build(&table, IntegrityPolicy::Backfill).unwrap()
    }

    #[test]
    fn industry_spec_opens_listed_subtrees() {
        let spec = IndustrySpec {
            default: "NAICS_3".into(),
            levels: BTreeMap::from([
                ("NAICS_4".to_string(), vec!["221".to_string()]),
                ("NAICS_6".to_string(), vec!["2211".to_string()]),
            ]),
        };
        let codes: Vec<String> = spec.target_codes(&index()).unwrap().into_iter().collect();
        assert_eq!(codes, vec!["221111", "2212", "222", "336", "F01"]);
    }

    #[test]
    fn industry_spec_rejects_unknown_or_shallower_codes() {
        let unknown = IndustrySpec {
            default: "NAICS_3".into(),
            levels: BTreeMap::from([("NAICS_4".to_string(), vec!["999".to_string()])]),
        };
        assert!(unknown.target_codes(&index()).is_err());

        let shallower = IndustrySpec {
            default: "NAICS_3".into(),
            levels: BTreeMap::from([("NAICS_4".to_string(), vec!["2211".to_string()])]),
        };
        assert!(shallower.target_codes(&index()).is_err());
    }

    #[test]
    fn target_config_validates_depths() {
        assert!(TargetConfig::Depth(7).validate().is_err());
        assert!(TargetConfig::Codes(vec![]).validate().is_err());
        assert!(TargetConfig::Depth(4).validate().is_ok());
        assert_eq!(
            TargetConfig::Depth(4).into_target(&index()).unwrap(),
            RoleTarget::Depth(4)
        );
    }

    #[test]
    fn accepts_matches_target_kind() {
        let index = index();
        assert!(RoleTarget::Depth(4).accepts("2211", &index));
        assert!(!RoleTarget::Depth(4).accepts("221", &index));
        let codes = RoleTarget::codes(["221", "3361"]).unwrap();
        assert!(codes.accepts("3361", &index));
        assert!(!codes.accepts("336", &index));
    }
}
