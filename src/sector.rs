use std::fmt;

use crate::error::FlowbyError;
use crate::schema::flow;

pub const MIN_DEPTH: u8 = 2;
pub const MAX_DEPTH: u8 = 6;

pub fn validate_depth(depth: u8) -> Result<u8, FlowbyError> {
    if (MIN_DEPTH..=MAX_DEPTH).contains(&depth) {
        Ok(depth)
    } else {
        Err(FlowbyError::InvalidDepth(depth))
    }
}

/// Parse a crosswalk level name such as `NAICS_4`.
pub fn parse_level(level: &str) -> Result<u8, FlowbyError> {
    let digits = level.trim().strip_prefix("NAICS_").unwrap_or(level.trim());
    let depth: u8 = digits
        .parse()
        .map_err(|_| FlowbyError::Config(format!("Invalid sector level: '{level}'")))?;
    validate_depth(depth)
}

/// Combined two-digit sectors reported as a single code.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NaicsRange {
    pub code: &'static str,
    pub members: &'static [&'static str],
}

pub const NAICS_RANGES: [NaicsRange; 3] = [
    NaicsRange {
        code: "31-33",
        members: &["31", "32", "33"],
    },
    NaicsRange {
        code: "44-45",
        members: &["44", "45"],
    },
    NaicsRange {
        code: "48-49",
        members: &["48", "49"],
    },
];

/// A sector code as it appears in a flow table or crosswalk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectorCode {
    /// Digit string whose ancestors are exactly its prefixes.
    Naics(String),
    /// Combined two-digit sector, e.g. `31-33`.
    Range(&'static NaicsRange),
    /// Household, government and other codes outside the prefix hierarchy.
    Irregular(String),
}

impl SectorCode {
    pub fn parse(raw: &str) -> Self {
        let code = raw.trim();
        if let Some(range) = NAICS_RANGES.iter().find(|r| r.code == code) {
            Self::Range(range)
        } else if is_naics_digits(code) {
            Self::Naics(code.to_string())
        } else {
            Self::Irregular(code.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Naics(code) | Self::Irregular(code) => code,
            Self::Range(range) => range.code,
        }
    }

    /// Hierarchy depth implied by the code itself. Irregular codes carry no
    /// implied depth; theirs is declared by the table they come from.
    pub fn implied_depth(&self) -> Option<u8> {
        match self {
            Self::Naics(code) => u8::try_from(code.len()).ok(),
            Self::Range(_) => Some(MIN_DEPTH),
            Self::Irregular(_) => None,
        }
    }

    /// Key of the ancestor at `depth` within the reported hierarchy, with
    /// range members folded onto their range at depth 2.
    pub fn hierarchy_prefix(&self, depth: u8) -> Option<String> {
        match self {
            Self::Naics(code) => {
                if code.len() < usize::from(depth) {
                    return None;
                }
                let prefix = &code[..usize::from(depth)];
                if depth == MIN_DEPTH {
                    if let Some(range) = range_containing(prefix) {
                        return Some(range.code.to_string());
                    }
                }
                Some(prefix.to_string())
            }
            Self::Range(range) if depth == MIN_DEPTH => Some(range.code.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for SectorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_naics_digits(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

pub fn range_containing(two_digit: &str) -> Option<&'static NaicsRange> {
    NAICS_RANGES.iter().find(|r| r.members.contains(&two_digit))
}

/// The two independent sector roles a flow record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    ProducedBy,
    ConsumedBy,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::ProducedBy, Role::ConsumedBy];

    pub fn activity_column(&self) -> &'static str {
        match self {
            Self::ProducedBy => flow::ACTIVITY_PRODUCED_BY,
            Self::ConsumedBy => flow::ACTIVITY_CONSUMED_BY,
        }
    }

    pub fn sector_column(&self) -> &'static str {
        match self {
            Self::ProducedBy => flow::SECTOR_PRODUCED_BY,
            Self::ConsumedBy => flow::SECTOR_CONSUMED_BY,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProducedBy => write!(f, "produced_by"),
            Self::ConsumedBy => write!(f, "consumed_by"),
        }
    }
}
