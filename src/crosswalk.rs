use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::FlowbyError;
use crate::io;
use crate::schema::{crosswalk, irregular};
use crate::sector::{self, SectorCode, MAX_DEPTH, MIN_DEPTH};

/// What to do with a code whose one-digit-shorter prefix is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityPolicy {
    /// Promote the missing prefix to a synthetic parent entry.
    #[default]
    Backfill,
    /// Fail the build.
    Reject,
}

#[derive(Debug, Clone)]
pub struct SectorNode {
    pub code: SectorCode,
    pub depth: u8,
    /// Parent promoted from a child's prefix rather than read from the table.
    pub synthetic: bool,
}

/// Sector hierarchy built once from a sector-length crosswalk.
///
/// Nodes live in a petgraph arena keyed by code string; edges run parent →
/// child. Irregular codes are isolated leaves at their declared depth.
#[derive(Debug, Clone)]
pub struct CrosswalkIndex {
    graph: DiGraph<SectorNode, ()>,
    /// Map from code string → NodeIndex for fast lookup.
    node_map: HashMap<String, NodeIndex>,
    by_depth: BTreeMap<u8, Vec<NodeIndex>>,
    backfilled: usize,
}

impl CrosswalkIndex {
    /// Build the index from a table with one column per depth (`NAICS_2` …
    /// `NAICS_6`). Each row is one code family; missing depth columns and
    /// empty cells are allowed.
    pub fn build(reference: &DataFrame, policy: IntegrityPolicy) -> Result<Self, FlowbyError> {
        io::require_columns(reference, &[crosswalk::NAICS_2])?;

        let mut index = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            by_depth: BTreeMap::new(),
            backfilled: 0,
        };

        let mut columns: Vec<(u8, Vec<Option<String>>)> = Vec::new();
        for (depth, name) in (MIN_DEPTH..=MAX_DEPTH).zip(crosswalk::ALL) {
            if reference.column(name).is_ok() {
                columns.push((depth, io::string_values(reference, name)?));
            }
        }

        for row in 0..reference.height() {
            let mut previous: Option<(u8, &str)> = None;
            for (depth, values) in &columns {
                let Some(code) = values[row].as_deref() else {
                    continue;
                };
                index.insert(code, *depth, false)?;

                if !sector::is_naics_digits(code) {
                    continue;
                }
                if let Some((prev_depth, prev_code)) = previous {
                    if !code.starts_with(prev_code) {
                        return Err(FlowbyError::CrosswalkIntegrity(format!(
                            "row {row}: NAICS_{depth} code '{code}' does not extend \
                             NAICS_{prev_depth} code '{prev_code}'"
                        )));
                    }
                }
                previous = Some((*depth, code));
            }
        }

        index.link(policy)?;
        index.rebuild_depth_index();

        info!(
            codes = index.node_map.len(),
            backfilled = index.backfilled,
            "Built sector crosswalk index"
        );
        Ok(index)
    }

    /// Build from a sector-length crosswalk CSV.
    pub fn from_csv(path: impl AsRef<Path>, policy: IntegrityPolicy) -> Result<Self, FlowbyError> {
        let reference = io::read_csv_as_strings(path, None)?;
        Self::build(&reference, policy)
    }

    /// Add household/government codes from a table with `Code` and
    /// `NAICS_Level_to_Use_For` columns. Returns the number of new codes.
    pub fn add_irregular_codes(&mut self, table: &DataFrame) -> Result<usize, FlowbyError> {
        io::require_columns(table, &[irregular::CODE, irregular::LEVEL])?;
        let codes = io::string_values(table, irregular::CODE)?;
        let levels = io::string_values(table, irregular::LEVEL)?;

        let before = self.node_map.len();
        for (code, level) in codes.iter().zip(&levels) {
            let (Some(code), Some(level)) = (code, level) else {
                continue;
            };
            let depth = sector::parse_level(level)?;
            if sector::is_naics_digits(code) {
                return Err(FlowbyError::CrosswalkIntegrity(format!(
                    "'{code}' is a NAICS code, not a household or government code"
                )));
            }
            self.insert(code, depth, false)?;
        }
        self.rebuild_depth_index();

        Ok(self.node_map.len() - before)
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Codes at `to_depth` related to `code` at `from_depth`: every
    /// descendant when going deeper, the single ancestor when going up, the
    /// code itself at equal depth. Irregular codes only ever map to themselves.
    /// Unknown codes, or codes not at `from_depth`, map to nothing.
    pub fn lookup(&self, code: &str, from_depth: u8, to_depth: u8) -> BTreeSet<String> {
        let Some(&idx) = self.node_map.get(code) else {
            return BTreeSet::new();
        };
        let node = &self.graph[idx];
        if node.depth != from_depth || sector::validate_depth(to_depth).is_err() {
            return BTreeSet::new();
        }
        if matches!(node.code, SectorCode::Irregular(_)) {
            return BTreeSet::from([code.to_string()]);
        }

        if to_depth >= from_depth {
            self.descendants_at(idx, to_depth)
                .into_iter()
                .map(|n| self.graph[n].code.to_string())
                .collect()
        } else {
            self.ancestor_at(idx, to_depth)
                .map(|n| self.graph[n].code.to_string())
                .into_iter()
                .collect()
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.node_map.contains_key(code)
    }

    pub fn node(&self, code: &str) -> Option<&SectorNode> {
        self.node_map.get(code).map(|&idx| &self.graph[idx])
    }

    pub fn depth_of(&self, code: &str) -> Option<u8> {
        self.node(code).map(|n| n.depth)
    }

    pub fn is_irregular(&self, code: &str) -> bool {
        self.node(code)
            .is_some_and(|n| matches!(n.code, SectorCode::Irregular(_)))
    }

    /// Ancestor-or-self at `depth`. Codes at or above `depth`, irregular
    /// codes and codes outside the index are their own key.
    pub fn level_key(&self, code: &str, depth: u8) -> String {
        let Some(&idx) = self.node_map.get(code) else {
            return code.to_string();
        };
        let node = &self.graph[idx];
        if node.depth <= depth || matches!(node.code, SectorCode::Irregular(_)) {
            return code.to_string();
        }
        self.ancestor_at(idx, depth)
            .map(|n| self.graph[n].code.to_string())
            .unwrap_or_else(|| code.to_string())
    }

    /// Ancestors of `code` from its parent up to depth 2.
    pub fn ancestors(&self, code: &str) -> Vec<&str> {
        let mut result = Vec::new();
        let Some(&start) = self.node_map.get(code) else {
            return result;
        };
        let mut current = start;
        while let Some(parent) = self.parent(current) {
            result.push(self.graph[parent].code.as_str());
            current = parent;
        }
        result
    }

    pub fn children(&self, code: &str) -> Vec<&str> {
        let Some(&idx) = self.node_map.get(code) else {
            return Vec::new();
        };
        let mut children: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].code.as_str())
            .collect();
        children.sort_unstable();
        children
    }

    pub fn codes_at_depth(&self, depth: u8) -> BTreeSet<String> {
        self.by_depth
            .get(&depth)
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|&n| self.graph[n].code.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_map.is_empty()
    }

    pub fn backfilled(&self) -> usize {
        self.backfilled
    }

    // ── Construction helpers ────────────────────────────────────────────────

    fn insert(&mut self, code: &str, depth: u8, synthetic: bool) -> Result<NodeIndex, FlowbyError> {
        let parsed = SectorCode::parse(code);
        match &parsed {
            SectorCode::Naics(digits) if digits.len() != usize::from(depth) => {
                return Err(FlowbyError::CrosswalkIntegrity(format!(
                    "'{code}' has {} digits but sits in NAICS_{depth}",
                    digits.len()
                )));
            }
            SectorCode::Range(range) => {
                return Err(FlowbyError::CrosswalkIntegrity(format!(
                    "range code '{}' cannot be a crosswalk entry",
                    range.code
                )));
            }
            _ => {}
        }

        if let Some(&existing) = self.node_map.get(code) {
            let existing_depth = self.graph[existing].depth;
            if existing_depth != depth {
                return Err(FlowbyError::CrosswalkIntegrity(format!(
                    "'{code}' appears in both NAICS_{existing_depth} and NAICS_{depth}"
                )));
            }
            return Ok(existing);
        }

        let idx = self.graph.add_node(SectorNode {
            code: parsed,
            depth,
            synthetic,
        });
        self.node_map.insert(code.to_string(), idx);
        Ok(idx)
    }

    /// Connect every NAICS code to its prefix parent, deepest level first so
    /// that backfilled parents are themselves linked on the next pass.
    fn link(&mut self, policy: IntegrityPolicy) -> Result<(), FlowbyError> {
        for depth in (MIN_DEPTH + 1..=MAX_DEPTH).rev() {
            let mut level: Vec<(NodeIndex, String)> = self
                .graph
                .node_indices()
                .filter(|&n| {
                    let node = &self.graph[n];
                    node.depth == depth && matches!(node.code, SectorCode::Naics(_))
                })
                .map(|n| (n, self.graph[n].code.to_string()))
                .collect();
            level.sort_by(|a, b| a.1.cmp(&b.1));

            for (child, code) in level {
                let prefix = &code[..usize::from(depth) - 1];
                let parent = match self.node_map.get(prefix) {
                    Some(&parent) => parent,
                    None => match policy {
                        IntegrityPolicy::Reject => {
                            return Err(FlowbyError::CrosswalkIntegrity(format!(
                                "NAICS_{depth} code '{code}' has no NAICS_{} parent '{prefix}'",
                                depth - 1
                            )));
                        }
                        IntegrityPolicy::Backfill => {
                            debug!(code = %code, parent = prefix, "Backfilling missing parent");
                            self.backfilled += 1;
                            self.insert(prefix, depth - 1, true)?
                        }
                    },
                };
                if self.graph.find_edge(parent, child).is_none() {
                    self.graph.add_edge(parent, child, ());
                }
            }
        }
        Ok(())
    }

    fn rebuild_depth_index(&mut self) {
        let mut by_depth: BTreeMap<u8, Vec<NodeIndex>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            by_depth.entry(self.graph[idx].depth).or_default().push(idx);
        }
        self.by_depth = by_depth;
    }

    fn parent(&self, idx: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(idx, Direction::Incoming).next()
    }

    fn ancestor_at(&self, idx: NodeIndex, depth: u8) -> Option<NodeIndex> {
        let mut current = idx;
        while self.graph[current].depth > depth {
            current = self.parent(current)?;
        }
        (self.graph[current].depth == depth).then_some(current)
    }

    /// Nodes at `depth` in the subtree rooted at `start` (inclusive).
    fn descendants_at(&self, start: NodeIndex, depth: u8) -> Vec<NodeIndex> {
        let mut result = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            let node_depth = self.graph[node].depth;
            if node_depth == depth {
                result.push(node);
                continue;
            }
            if node_depth > depth {
                continue;
            }
            stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
        }

        result
    }

    /// Nodes in the subtree below `code` (exclusive) that satisfy `accept`,
    /// without descending past an accepted node.
    pub(crate) fn covering_descendants<F>(&self, code: &str, accept: F) -> Vec<&str>
    where
        F: Fn(&str) -> bool,
    {
        let mut result = Vec::new();
        let Some(&start) = self.node_map.get(code) else {
            return result;
        };
        let mut stack: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .collect();

        while let Some(node) = stack.pop() {
            let candidate = self.graph[node].code.as_str();
            if accept(candidate) {
                result.push(candidate);
            } else {
                stack.extend(self.graph.neighbors_directed(node, Direction::Outgoing));
            }
        }

        result.sort_unstable();
        result
    }
}
