//! Shortest-path search over the edge-based graph
//!
//! Every algorithm answers the same question: the cheapest chain of routing
//! nodes from any source segment to any segment ending at the target node,
//! using only segments the context admits. An unreachable target is a normal
//! `SearchOutcome::NoPath`, never an error.

use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};
use std::cmp::{Ordering, Reverse};
use std::str::FromStr;

use crate::cancel::CancellationToken;
use crate::constraints::{is_traversable, ConstraintLevel};
use crate::ebg::{EdgeBasedGraph, TurnClass, TurnEdge};
use crate::graph::RoadGraph;
use crate::profiles::VehicleProfile;
use crate::traffic::{effective_cost, TrafficSnapshot};

pub mod astar;
pub mod bidirectional;
pub mod dijkstra;

pub use astar::astar;
pub use bidirectional::bidirectional_astar;
pub use dijkstra::dijkstra;

/// Concrete search algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "dijkstra")]
    Dijkstra,
    #[serde(rename = "astar")]
    AStar,
    #[serde(rename = "bidirectional_astar")]
    BidirectionalAStar,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Dijkstra => "dijkstra",
            Algorithm::AStar => "astar",
            Algorithm::BidirectionalAStar => "bidirectional_astar",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Algorithm requested by the caller; `Best` runs all three
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmChoice {
    #[serde(rename = "dijkstra")]
    Dijkstra,
    #[serde(rename = "astar")]
    AStar,
    #[serde(rename = "bidirectional_astar")]
    BidirectionalAStar,
    #[serde(rename = "best")]
    Best,
}

impl AlgorithmChoice {
    /// Algorithms to run, in tie-break order
    pub fn algorithms(&self) -> &'static [Algorithm] {
        match self {
            AlgorithmChoice::Dijkstra => &[Algorithm::Dijkstra],
            AlgorithmChoice::AStar => &[Algorithm::AStar],
            AlgorithmChoice::BidirectionalAStar => &[Algorithm::BidirectionalAStar],
            AlgorithmChoice::Best => &[
                Algorithm::Dijkstra,
                Algorithm::AStar,
                Algorithm::BidirectionalAStar,
            ],
        }
    }
}

impl FromStr for AlgorithmChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dijkstra" => Ok(AlgorithmChoice::Dijkstra),
            "astar" | "a*" | "a_star" => Ok(AlgorithmChoice::AStar),
            "bidirectional_astar" | "bidirectional" | "bidi" => {
                Ok(AlgorithmChoice::BidirectionalAStar)
            }
            "best" => Ok(AlgorithmChoice::Best),
            other => Err(Error::InvalidRequest(format!(
                "unknown algorithm '{other}' (expected dijkstra, astar, bidirectional_astar or best)"
            ))),
        }
    }
}

/// `[search]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Speed bound for the A* heuristics, km/h
    pub max_speed_kph: f64,
    pub algorithm: AlgorithmChoice,
    /// Added to the search cost of non-preferred road types at relaxed levels
    pub non_preferred_penalty_s: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_speed_kph: 130.0,
            algorithm: AlgorithmChoice::AStar,
            non_preferred_penalty_s: 3.0,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_speed_kph.is_finite() || self.max_speed_kph <= 0.0 {
            return Err(Error::Config(format!(
                "search.max_speed_kph must be positive, got {}",
                self.max_speed_kph
            )));
        }
        if !self.non_preferred_penalty_s.is_finite() || self.non_preferred_penalty_s < 0.0 {
            return Err(Error::Config(format!(
                "search.non_preferred_penalty_s must be non-negative, got {}",
                self.non_preferred_penalty_s
            )));
        }
        Ok(())
    }
}

/// Which segments a search may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeFilter {
    Level(ConstraintLevel),
    /// Topology only; used to tell physical infeasibility from disconnection
    Unconstrained,
}

/// Everything a search reads; all borrowed, nothing mutated
pub struct SearchContext<'a> {
    pub road: &'a RoadGraph,
    pub ebg: &'a EdgeBasedGraph,
    pub profile: &'a VehicleProfile,
    pub traffic: &'a TrafficSnapshot,
    pub filter: EdgeFilter,
    pub non_preferred_penalty_s: f64,
    /// Heuristic speed bound in m/s; infinite disables the heuristics
    pub heuristic_speed_mps: f64,
    /// Segment the vehicle is already on, admitted regardless of constraints
    pub exempt: Option<u32>,
    pub cancel: &'a CancellationToken,
}

impl<'a> SearchContext<'a> {
    pub fn admits(&self, seg: u32) -> bool {
        if self.exempt == Some(seg) {
            return true;
        }
        match self.filter {
            EdgeFilter::Level(level) => is_traversable(
                self.road.segment(seg),
                self.traffic.multiplier(seg),
                self.profile,
                level,
            ),
            EdgeFilter::Unconstrained => true,
        }
    }

    /// U-turns off `from` are only taken when no other exit is admissible
    pub fn allows_turn(&self, from: u32, turn: &TurnEdge) -> bool {
        turn.class != TurnClass::UTurn
            || !self
                .ebg
                .turns(from)
                .iter()
                .any(|t| t.class != TurnClass::UTurn && self.admits(t.to))
    }

    /// Search weight of driving a whole segment: congested travel time plus
    /// the soft road-type penalty at relaxed levels
    pub fn weight(&self, seg: u32) -> f64 {
        let segment = self.road.segment(seg);
        let travel = effective_cost(segment, self.traffic.multiplier(seg), self.profile);
        let penalized = matches!(self.filter, EdgeFilter::Level(level) if level > ConstraintLevel::Full)
            && !self.profile.preferred_road_types.contains(segment.road_type);
        if penalized {
            travel + self.non_preferred_penalty_s
        } else {
            travel
        }
    }

    /// Lower bound on travel time between two intersections
    pub fn estimate(&self, from_node: u32, to_node: u32) -> f64 {
        if !self.heuristic_speed_mps.is_finite() {
            return 0.0;
        }
        self.road.node_distance(from_node, to_node) / self.heuristic_speed_mps
    }

    pub fn head(&self, seg: u32) -> u32 {
        self.road.segment(seg).target
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Where a search starts: a segment and the share of it still to drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Source {
    pub seg: u32,
    /// In (0, 1]; 1.0 = from the segment's start
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub sources: Vec<Source>,
    /// Intersection the sources leave from (or the head of a partly driven
    /// segment); anchors the backward heuristic
    pub origin_node: u32,
    pub target_node: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Found {
        segments: Vec<u32>,
        cost: f64,
        expanded: usize,
    },
    NoPath {
        expanded: usize,
    },
    Cancelled,
}

impl SearchOutcome {
    pub fn cost(&self) -> Option<f64> {
        match self {
            SearchOutcome::Found { cost, .. } => Some(*cost),
            _ => None,
        }
    }

    pub fn expanded(&self) -> usize {
        match self {
            SearchOutcome::Found { expanded, .. } | SearchOutcome::NoPath { expanded } => *expanded,
            SearchOutcome::Cancelled => 0,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found { .. })
    }
}

pub fn run(algorithm: Algorithm, ctx: &SearchContext<'_>, query: &SearchQuery) -> SearchOutcome {
    match algorithm {
        Algorithm::Dijkstra => dijkstra(ctx, query),
        Algorithm::AStar => astar(ctx, query),
        Algorithm::BidirectionalAStar => bidirectional_astar(ctx, query),
    }
}

/// f64 with a total order for the frontier
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cost(pub f64);

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Min-frontier keyed by cost, ties broken by routing node id so pops are
/// deterministic
pub(crate) struct Frontier {
    pq: PriorityQueue<u32, Reverse<(Cost, u32)>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            pq: PriorityQueue::new(),
        }
    }

    /// Insert or re-key
    pub fn push(&mut self, node: u32, key: f64) {
        self.pq.push(node, Reverse((Cost(key), node)));
    }

    pub fn pop(&mut self) -> Option<(u32, f64)> {
        self.pq.pop().map(|(node, Reverse((key, _)))| (node, key.0))
    }

    pub fn peek_key(&self) -> Option<f64> {
        self.pq.peek().map(|(_, Reverse((key, _)))| key.0)
    }

    pub fn is_empty(&self) -> bool {
        self.pq.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Label {
    pub g: f64,
    pub parent: Option<u32>,
}

/// Follow parent links from `end` back to a source, returned source-first
pub(crate) fn trace_back(labels: &rustc_hash::FxHashMap<u32, Label>, end: u32) -> Vec<u32> {
    let mut chain = vec![end];
    let mut current = end;
    while let Some(parent) = labels.get(&current).and_then(|l| l.parent) {
        chain.push(parent);
        current = parent;
    }
    chain.reverse();
    chain
}
