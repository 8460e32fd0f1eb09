use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;

use crate::error::FlowbyError;
use crate::io;
use crate::schema::activity_map;

/// Source-specific activity → sector assignments.
///
/// One activity may list several sectors at mixed depths, including
/// household/government codes. Rows with an empty sector are activities
/// deliberately left unmapped and are skipped.
#[derive(Debug, Clone, Default)]
pub struct ActivityCrosswalk {
    sectors: HashMap<String, Vec<String>>,
    sector_types: HashMap<String, String>,
}

impl ActivityCrosswalk {
    /// Build from a table with `Activity` and `Sector` columns and an optional
    /// `SectorType` column.
    pub fn from_frame(table: &DataFrame) -> Result<Self, FlowbyError> {
        io::require_columns(table, &[activity_map::ACTIVITY, activity_map::SECTOR])?;
        let activities = io::string_values(table, activity_map::ACTIVITY)?;
        let sectors = io::string_values(table, activity_map::SECTOR)?;
        let types = if table.column(activity_map::SECTOR_TYPE).is_ok() {
            io::string_values(table, activity_map::SECTOR_TYPE)?
        } else {
            vec![None; table.height()]
        };

        let mut crosswalk = Self::default();
        for ((activity, sector), sector_type) in activities.into_iter().zip(sectors).zip(types) {
            let (Some(activity), Some(sector)) = (activity, sector) else {
                continue;
            };
            crosswalk.insert(&activity, &sector);
            if let Some(sector_type) = sector_type {
                crosswalk.sector_types.insert(sector, sector_type);
            }
        }
        Ok(crosswalk)
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, FlowbyError> {
        let table = io::read_csv_as_strings(path, None)?;
        Self::from_frame(&table)
    }

    pub fn insert(&mut self, activity: &str, sector: &str) {
        let entry = self.sectors.entry(activity.to_string()).or_default();
        if !entry.iter().any(|s| s == sector) {
            entry.push(sector.to_string());
        }
    }

    pub fn sectors_for(&self, activity: &str) -> Option<&[String]> {
        self.sectors.get(activity).map(Vec::as_slice)
    }

    /// Sector type tag (`I` industry, `C` commodity) recorded for a sector.
    pub fn sector_type(&self, sector: &str) -> Option<&str> {
        self.sector_types.get(sector).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}
