/// Column-name constants for flow-by-sector tables.
/// Single source of truth - exported to Python via PyO3.

// ── Flow record columns ─────────────────────────────────────────────────────
pub mod flow {
    pub const CLASS: &str = "Class";
    pub const SOURCE_NAME: &str = "SourceName";
    pub const FLOW_NAME: &str = "FlowName";
    pub const FLOWABLE: &str = "Flowable";
    pub const FLOW_AMOUNT: &str = "FlowAmount";
    pub const UNIT: &str = "Unit";
    pub const FLOW_TYPE: &str = "FlowType";
    pub const ACTIVITY_PRODUCED_BY: &str = "ActivityProducedBy";
    pub const ACTIVITY_CONSUMED_BY: &str = "ActivityConsumedBy";
    pub const SECTOR_PRODUCED_BY: &str = "SectorProducedBy";
    pub const SECTOR_CONSUMED_BY: &str = "SectorConsumedBy";
    pub const LOCATION: &str = "Location";
    pub const LOCATION_SYSTEM: &str = "LocationSystem";
    pub const YEAR: &str = "Year";
}

// ── Data quality columns ────────────────────────────────────────────────────
pub mod quality {
    pub const SPREAD: &str = "Spread";
    pub const MIN: &str = "Min";
    pub const MAX: &str = "Max";
    pub const DATA_RELIABILITY: &str = "DataReliability";
    pub const TEMPORAL_CORRELATION: &str = "TemporalCorrelation";
    pub const GEOGRAPHICAL_CORRELATION: &str = "GeographicalCorrelation";
    pub const TECHNOLOGICAL_CORRELATION: &str = "TechnologicalCorrelation";
    pub const DATA_COLLECTION: &str = "DataCollection";

    /// Numeric scores combined as amount-weighted averages, never grouped on.
    pub const ALL: [&str; 8] = [
        SPREAD,
        MIN,
        MAX,
        DATA_RELIABILITY,
        TEMPORAL_CORRELATION,
        GEOGRAPHICAL_CORRELATION,
        TECHNOLOGICAL_CORRELATION,
        DATA_COLLECTION,
    ];
}

// ── Flow type values ────────────────────────────────────────────────────────
pub mod flow_type {
    pub const ELEMENTARY: &str = "ELEMENTARY_FLOW";
    pub const TECHNOSPHERE: &str = "TECHNOSPHERE_FLOW";
    pub const WASTE: &str = "WASTE_FLOW";

    pub const ALL: [&str; 3] = [ELEMENTARY, TECHNOSPHERE, WASTE];
}

// ── Sector-length crosswalk columns ─────────────────────────────────────────
pub mod crosswalk {
    pub const NAICS_2: &str = "NAICS_2";
    pub const NAICS_3: &str = "NAICS_3";
    pub const NAICS_4: &str = "NAICS_4";
    pub const NAICS_5: &str = "NAICS_5";
    pub const NAICS_6: &str = "NAICS_6";

    pub const ALL: [&str; 5] = [NAICS_2, NAICS_3, NAICS_4, NAICS_5, NAICS_6];
}

// ── Household / government code table columns ──────────────────────────────
pub mod irregular {
    pub const CODE: &str = "Code";
    pub const LEVEL: &str = "NAICS_Level_to_Use_For";
}

// ── Activity-to-sector crosswalk columns ────────────────────────────────────
pub mod activity_map {
    pub const ACTIVITY: &str = "Activity";
    pub const SECTOR: &str = "Sector";
    pub const SECTOR_TYPE: &str = "SectorType";
}

// ── Engine-private columns, dropped before any frame is returned ────────────
pub mod internal {
    pub const RECORD_ID: &str = "_record_id";
    pub const TARGET_COUNT: &str = "_target_count";
    pub const HELPER_WEIGHT: &str = "_helper_weight";
    pub const WEIGHT_TOTAL: &str = "_weight_total";

    pub const LEVELS: [&str; 5] = ["_level_2", "_level_3", "_level_4", "_level_5", "_level_6"];

    pub fn level(depth: u8) -> &'static str {
        LEVELS[usize::from(depth.clamp(2, 6) - 2)]
    }

    pub fn is_internal(name: &str) -> bool {
        name.starts_with('_')
    }
}
