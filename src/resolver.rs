use std::collections::{BTreeSet, HashMap};

use polars::prelude::*;
use tracing::{debug, info};

use crate::activity::ActivityCrosswalk;
use crate::crosswalk::CrosswalkIndex;
use crate::diagnostics::{Condition, Diagnostics};
use crate::error::FlowbyError;
use crate::io;
use crate::schema::internal;
use crate::sector::{Role, SectorCode};
use crate::target::RoleTarget;

/// Records of one role expanded to one row per candidate target sector.
///
/// Carries `_record_id` (row of the originating record) and `_target_count`
/// (number of candidates for that record) until apportionment removes them.
#[derive(Debug, Clone)]
pub struct Expansion {
    pub frame: DataFrame,
    pub role: Role,
}

impl Expansion {
    pub fn sector_column(&self) -> &'static str {
        self.role.sector_column()
    }
}

/// Maps reported role codes onto target sector codes.
pub struct SectorResolver<'a> {
    index: &'a CrosswalkIndex,
    overrides: Option<&'a ActivityCrosswalk>,
    retain_activity: bool,
}

impl<'a> SectorResolver<'a> {
    pub fn new(index: &'a CrosswalkIndex) -> Self {
        Self {
            index,
            overrides: None,
            retain_activity: false,
        }
    }

    pub fn with_overrides(mut self, overrides: &'a ActivityCrosswalk) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Keep the activity column next to the new sector column.
    pub fn retain_activity(mut self, retain: bool) -> Self {
        self.retain_activity = retain;
        self
    }

    /// Target sectors for one reported code. Empty when the code has no
    /// sector equivalent.
    pub fn targets_for(&self, code: &str, target: &RoleTarget) -> BTreeSet<String> {
        let mut targets = BTreeSet::new();
        for candidate in self.candidates(code) {
            self.collect_targets(&candidate, target, &mut targets);
        }
        targets
    }

    /// Expand `flows` on `role`. Each record whose code resolves to N targets
    /// becomes N rows; records with no target are dropped and counted; records
    /// with no code for the role pass through with a null sector.
    pub fn resolve(
        &self,
        flows: &DataFrame,
        role: Role,
        target: &RoleTarget,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Expansion>, FlowbyError> {
        let Some(source_column) = source_column(flows, role) else {
            debug!(role = %role, "No code column for role, skipping resolution");
            return Ok(None);
        };
        let codes = io::string_values(flows, source_column)?;

        let mut cache: HashMap<&str, BTreeSet<String>> = HashMap::new();
        let mut take: Vec<IdxSize> = Vec::with_capacity(flows.height());
        let mut record_ids: Vec<IdxSize> = Vec::with_capacity(flows.height());
        let mut target_counts: Vec<u32> = Vec::with_capacity(flows.height());
        let mut sectors: Vec<Option<String>> = Vec::with_capacity(flows.height());
        let mut dropped = 0usize;

        for (row, code) in codes.iter().enumerate() {
            let row = row as IdxSize;
            let Some(code) = code.as_deref() else {
                take.push(row);
                record_ids.push(row);
                target_counts.push(1);
                sectors.push(None);
                continue;
            };
            let resolved = cache
                .entry(code)
                .or_insert_with(|| self.targets_for(code, target));
            if resolved.is_empty() {
                dropped += 1;
                diagnostics.record(Condition::UnresolvedCode, format!("{source_column}={code}"));
                continue;
            }
            let count = resolved.len() as u32;
            for sector in resolved.iter() {
                take.push(row);
                record_ids.push(row);
                target_counts.push(count);
                sectors.push(Some(sector.clone()));
            }
        }

        let indices = IdxCa::from_vec("idx".into(), take);
        let mut frame = flows.take(&indices)?;
        frame.with_column(Column::new(role.sector_column().into(), &sectors))?;
        frame.with_column(Column::new(internal::RECORD_ID.into(), &record_ids))?;
        frame.with_column(Column::new(internal::TARGET_COUNT.into(), &target_counts))?;
        if source_column == role.activity_column() && !self.retain_activity {
            frame = frame.drop(source_column)?;
        }

        info!(
            role = %role,
            records = flows.height(),
            rows = frame.height(),
            dropped,
            "Resolved sectors"
        );
        Ok(Some(Expansion { frame, role }))
    }

    fn candidates(&self, code: &str) -> Vec<SectorCode> {
        if let Some(mapped) = self.overrides.and_then(|o| o.sectors_for(code)) {
            return mapped.iter().map(|s| SectorCode::parse(s)).collect();
        }
        vec![SectorCode::parse(code)]
    }

    fn collect_targets(&self, code: &SectorCode, target: &RoleTarget, out: &mut BTreeSet<String>) {
        let code = match code {
            SectorCode::Range(range) => {
                for member in range.members {
                    self.collect_targets(&SectorCode::Naics(member.to_string()), target, out);
                }
                return;
            }
            SectorCode::Naics(code) | SectorCode::Irregular(code) => code.as_str(),
        };
        let Some(from) = self.index.depth_of(code) else {
            return;
        };
        if self.index.is_irregular(code) {
            out.insert(code.to_string());
            return;
        }

        match target {
            RoleTarget::Depth(depth) => out.extend(self.index.lookup(code, from, *depth)),
            RoleTarget::Codes(codes) => {
                if codes.contains(code) {
                    out.insert(code.to_string());
                } else if let Some(ancestor) =
                    self.index.ancestors(code).into_iter().find(|a| codes.contains(*a))
                {
                    out.insert(ancestor.to_string());
                } else {
                    out.extend(
                        self.index
                            .covering_descendants(code, |c| codes.contains(c))
                            .into_iter()
                            .map(str::to_string),
                    );
                }
            }
        }
    }
}

/// Column holding the role's codes: the activity column while the table is
/// activity-coded, the sector column once it is sector-coded.
pub fn source_column(flows: &DataFrame, role: Role) -> Option<&'static str> {
    [role.activity_column(), role.sector_column()]
        .into_iter()
        .find(|name| flows.column(name).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosswalk::IntegrityPolicy;
    use crate::schema::{activity_map, crosswalk, flow};

    fn index() -> CrosswalkIndex {
        let table = df!(
            crosswalk::NAICS_2 => ["11", "11", "11", "31", "32", "33", "11"],
            crosswalk::NAICS_3 => [Some("111"), Some("111"), Some("112"), Some("311"), Some("325"), Some("331"), None],
            crosswalk::NAICS_4 => [Some("1111"), Some("1112"), Some("1121"), Some("3111"), Some("3251"), Some("3311"), Some("F010")],
        )
        .unwrap();
        CrosswalkIndex::build(&table, IntegrityPolicy::Backfill).unwrap()
    }

    fn flows() -> DataFrame {
        df!(
            flow::ACTIVITY_PRODUCED_BY => [Some("111"), Some("1121"), Some("T001"), None, Some("F010")],
            flow::FLOW_AMOUNT => [10.0, 20.0, 30.0, 40.0, 50.0],
        )
        .unwrap()
    }

    #[test]
    fn resolve_expands_drops_and_passes_through() {
        let index = index();
        let resolver = SectorResolver::new(&index);
        let mut diagnostics = Diagnostics::default();

        let expansion = resolver
            .resolve(&flows(), Role::ProducedBy, &RoleTarget::Depth(4), &mut diagnostics)
            .unwrap()
            .unwrap();
        let frame = expansion.frame;

        assert_eq!(frame.height(), 5);
        assert!(frame.column(flow::ACTIVITY_PRODUCED_BY).is_err());
        let sectors = io::string_values(&frame, flow::SECTOR_PRODUCED_BY).unwrap();
        assert_eq!(
            sectors,
            vec![
                Some("1111".to_string()),
                Some("1112".to_string()),
                Some("1121".to_string()),
                None,
                Some("F010".to_string()),
            ]
        );
        assert_eq!(diagnostics.count(Condition::UnresolvedCode), 1);
        assert_eq!(
            diagnostics.examples(Condition::UnresolvedCode),
            ["ActivityProducedBy=T001"]
        );
    }

    #[test]
    fn ranges_and_overrides_feed_the_index() {
        let index = index();
        let table = df!(
            activity_map::ACTIVITY => ["Hotels", "Hotels", "Residential"],
            activity_map::SECTOR => ["1111", "3111", "F010"],
        )
        .unwrap();
        let overrides = ActivityCrosswalk::from_frame(&table).unwrap();
        let resolver = SectorResolver::new(&index).with_overrides(&overrides);

        let hotels: Vec<String> = resolver
            .targets_for("Hotels", &RoleTarget::Depth(2))
            .into_iter()
            .collect();
        assert_eq!(hotels, vec!["11", "31"]);
        let range: Vec<String> = resolver
            .targets_for("31-33", &RoleTarget::Depth(3))
            .into_iter()
            .collect();
        assert_eq!(range, vec!["311", "325", "331"]);
        assert_eq!(resolver.targets_for("Residential", &RoleTarget::Depth(2)).len(), 1);
    }

    #[test]
    fn allow_list_prefers_ancestor_then_covering_descendants() {
        let index = index();
        let resolver = SectorResolver::new(&index);
        let target = RoleTarget::codes(["111", "1121", "31"]).unwrap();

        let up: Vec<String> = resolver.targets_for("1112", &target).into_iter().collect();
        assert_eq!(up, vec!["111"]);
        let down: Vec<String> = resolver.targets_for("11", &target).into_iter().collect();
        assert_eq!(down, vec!["111", "1121"]);
        assert!(resolver.targets_for("325", &target).is_empty());
    }

    #[test]
    fn retained_activity_column_survives() {
        let index = index();
        let resolver = SectorResolver::new(&index).retain_activity(true);
        let mut diagnostics = Diagnostics::default();
        let expansion = resolver
            .resolve(&flows(), Role::ProducedBy, &RoleTarget::Depth(3), &mut diagnostics)
            .unwrap()
            .unwrap();
        assert!(expansion.frame.column(flow::ACTIVITY_PRODUCED_BY).is_ok());
        assert!(expansion.frame.column(flow::SECTOR_PRODUCED_BY).is_ok());
    }

    #[test]
    fn missing_role_column_is_skipped() {
        let index = index();
        let resolver = SectorResolver::new(&index);
        let mut diagnostics = Diagnostics::default();
        let result = resolver
            .resolve(&flows(), Role::ConsumedBy, &RoleTarget::Depth(3), &mut diagnostics)
            .unwrap();
        assert!(result.is_none());
    }
}
