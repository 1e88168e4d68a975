//! Edge-Based Graph (EBG) construction
//!
//! Builds a turn-expanded graph where:
//! - Nodes = directed road segments (dense segment index)
//! - Arcs = turning movements at the shared intersection, costed by angle
//!
//! Every movement is materialized, U-turns included. Whether a U-turn may be
//! taken depends on which other exits the vehicle can use, so that is left to
//! the search (`SearchContext::allows_turn`).
//!
//! Forward and reverse adjacency are both materialized as CSR so the
//! backward half of a bidirectional search walks arcs the same way.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::geo::initial_bearing;
use crate::graph::RoadGraph;

pub mod turn_penalty;

pub use turn_penalty::{compute_turn_penalty, TurnClass, TurnGeometry, TurnPenaltyConfig};

/// Turning movement between two routing nodes.
///
/// In the reverse adjacency `to` names the predecessor segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnEdge {
    pub to: u32,
    pub cost_s: f64,
    pub class: TurnClass,
}

/// Turn-expanded routing graph derived from one `RoadGraph` version
#[derive(Debug)]
pub struct EdgeBasedGraph {
    offsets: Vec<u32>,
    turns: Vec<TurnEdge>,
    rev_offsets: Vec<u32>,
    rev_turns: Vec<TurnEdge>,
    terminal: Vec<bool>,
    bearings: Vec<Option<f64>>,
    max_straight_speed_mps: f64,
    source_hash: String,
    turn_config: TurnPenaltyConfig,
}

impl EdgeBasedGraph {
    pub fn build(road: &RoadGraph, config: &TurnPenaltyConfig) -> Self {
        let start_time = Instant::now();
        let n_segments = road.segment_count();

        let bearings: Vec<Option<f64>> = road
            .segments()
            .iter()
            .map(|seg| {
                if seg.source == seg.target {
                    return None;
                }
                let (a, b) = (road.node(seg.source), road.node(seg.target));
                initial_bearing(a.lat, a.lon, b.lat, b.lon)
            })
            .collect();

        // 1. Enumerate turns per incoming segment
        let mut adjacency: Vec<Vec<TurnEdge>> = vec![Vec::new(); n_segments];
        let mut terminal = vec![false; n_segments];

        for (a_idx, seg_a) in road.segments().iter().enumerate() {
            let outgoing = road.out_segments(seg_a.target);
            if outgoing.is_empty() {
                terminal[a_idx] = true;
                continue;
            }

            // U-turns are kept; searches decide per vehicle whether one is needed
            for &b_idx in outgoing {
                let geom = TurnGeometry::compute(bearings[a_idx], bearings[b_idx as usize], config);
                adjacency[a_idx].push(TurnEdge {
                    to: b_idx,
                    cost_s: compute_turn_penalty(&geom, config),
                    class: geom.class,
                });
            }
        }

        // 2. Materialize forward CSR
        let (offsets, turns) = materialize_csr(&adjacency);

        // 3. Reverse CSR: arc a→b stored under b, pointing back at a
        let mut reverse: Vec<Vec<TurnEdge>> = vec![Vec::new(); n_segments];
        for (a_idx, arcs) in adjacency.iter().enumerate() {
            for arc in arcs {
                reverse[arc.to as usize].push(TurnEdge {
                    to: a_idx as u32,
                    ..*arc
                });
            }
        }
        let (rev_offsets, rev_turns) = materialize_csr(&reverse);

        let max_straight_speed_mps = road
            .segments()
            .iter()
            .map(|seg| {
                let straight = road.node_distance(seg.source, seg.target);
                let time = seg.base_travel_time_s();
                if straight <= 0.0 {
                    0.0
                } else if time <= 0.0 {
                    f64::INFINITY
                } else {
                    straight / time
                }
            })
            .fold(0.0, f64::max);

        tracing::info!(
            segments = n_segments,
            turns = turns.len(),
            terminal = terminal.iter().filter(|t| **t).count(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "edge-based graph built"
        );

        Self {
            offsets,
            turns,
            rev_offsets,
            rev_turns,
            terminal,
            bearings,
            max_straight_speed_mps,
            source_hash: road.content_hash().to_string(),
            turn_config: config.clone(),
        }
    }

    /// Number of routing nodes (one per directed segment)
    pub fn n_nodes(&self) -> usize {
        self.terminal.len()
    }

    pub fn n_turns(&self) -> usize {
        self.turns.len()
    }

    /// Turns leaving routing node `seg`
    pub fn turns(&self, seg: u32) -> &[TurnEdge] {
        let lo = self.offsets[seg as usize] as usize;
        let hi = self.offsets[seg as usize + 1] as usize;
        &self.turns[lo..hi]
    }

    /// Turns entering routing node `seg`; `to` is the predecessor
    pub fn reverse_turns(&self, seg: u32) -> &[TurnEdge] {
        let lo = self.rev_offsets[seg as usize] as usize;
        let hi = self.rev_offsets[seg as usize + 1] as usize;
        &self.rev_turns[lo..hi]
    }

    /// Turn cost for `from → to`, `None` if the movement does not exist
    pub fn turn_cost(&self, from: u32, to: u32) -> Option<f64> {
        self.turns(from)
            .iter()
            .find(|t| t.to == to)
            .map(|t| t.cost_s)
    }

    pub fn turn_class(&self, from: u32, to: u32) -> Option<TurnClass> {
        self.turns(from).iter().find(|t| t.to == to).map(|t| t.class)
    }

    /// Segment ends at an intersection with no way out
    pub fn is_terminal(&self, seg: u32) -> bool {
        self.terminal[seg as usize]
    }

    pub fn bearing(&self, seg: u32) -> Option<f64> {
        self.bearings[seg as usize]
    }

    /// Fastest straight-line progress any segment allows, in m/s.
    ///
    /// Infinite when a zero-time segment spans a positive distance.
    pub fn max_straight_speed_mps(&self) -> f64 {
        self.max_straight_speed_mps
    }

    /// Content hash of the road graph this was built from
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn turn_config(&self) -> &TurnPenaltyConfig {
        &self.turn_config
    }

    /// Turn counts per class, in class order
    pub fn class_histogram(&self) -> Vec<(TurnClass, usize)> {
        let classes = [
            TurnClass::Straight,
            TurnClass::Slight,
            TurnClass::Moderate,
            TurnClass::Sharp,
            TurnClass::UTurn,
        ];
        classes
            .iter()
            .map(|&c| (c, self.turns.iter().filter(|t| t.class == c).count()))
            .collect()
    }
}

fn materialize_csr(adjacency: &[Vec<TurnEdge>]) -> (Vec<u32>, Vec<TurnEdge>) {
    let n_arcs: usize = adjacency.iter().map(Vec::len).sum();
    let mut offsets = Vec::with_capacity(adjacency.len() + 1);
    let mut arcs = Vec::with_capacity(n_arcs);

    let mut current_offset = 0u32;
    for neighbors in adjacency {
        offsets.push(current_offset);
        arcs.extend_from_slice(neighbors);
        current_offset += neighbors.len() as u32;
    }
    offsets.push(current_offset);

    (offsets, arcs)
}

/// Holds the EBG for the latest road graph; rebuilds only when the graph
/// content hash or the turn configuration changes.
#[derive(Debug, Default)]
pub struct EbgCache {
    slot: Mutex<Option<Arc<EdgeBasedGraph>>>,
    builds: AtomicUsize,
}

impl EbgCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&self, road: &RoadGraph, config: &TurnPenaltyConfig) -> Arc<EdgeBasedGraph> {
        let mut slot = self.slot.lock();
        if let Some(ebg) = slot.as_ref() {
            if ebg.source_hash() == road.content_hash() && ebg.turn_config() == config {
                tracing::debug!(hash = %road.content_hash(), "edge-based graph cache hit");
                return Arc::clone(ebg);
            }
        }

        let ebg = Arc::new(EdgeBasedGraph::build(road, config));
        self.builds.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Arc::clone(&ebg));
        ebg
    }

    /// How many times an EBG was actually constructed
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}
