//! Road graph model
//!
//! Nodes are intersections, segments are directed road pieces with the tags
//! the constraint model needs. The external loader hands us JSON; missing tags
//! fall back to permissive values so partial data never fails a load.

use rstar::{primitives::GeomWithData, RTree};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use siren_common::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::geo::{haversine_distance, nearest_node_spatial};

/// External intersection identifier
pub type NodeId = u64;
/// External road segment identifier
pub type SegmentId = u64;

/// Road classification used by vehicle preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadType {
    Primary,
    Secondary,
    Tertiary,
    Residential,
    Other,
}

impl RoadType {
    pub fn all() -> &'static [RoadType] {
        &[
            RoadType::Primary,
            RoadType::Secondary,
            RoadType::Tertiary,
            RoadType::Residential,
            RoadType::Other,
        ]
    }

    /// Map an OSM `highway` value onto a road class. Links fold into their parent.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "motorway" | "motorway_link" | "trunk" | "trunk_link" | "primary" | "primary_link" => {
                RoadType::Primary
            }
            "secondary" | "secondary_link" => RoadType::Secondary,
            "tertiary" | "tertiary_link" => RoadType::Tertiary,
            "residential" | "living_street" => RoadType::Residential,
            _ => RoadType::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoadType::Primary => "primary",
            RoadType::Secondary => "secondary",
            RoadType::Tertiary => "tertiary",
            RoadType::Residential => "residential",
            RoadType::Other => "other",
        }
    }

    /// Free-flow speed used when a segment carries no speed limit
    pub fn default_speed_kph(&self) -> f64 {
        match self {
            RoadType::Primary => 60.0,
            RoadType::Secondary => 50.0,
            RoadType::Tertiary => 40.0,
            RoadType::Residential => 30.0,
            RoadType::Other => 30.0,
        }
    }

    pub(crate) fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

/// Intersection as supplied by the loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: NodeId,
    pub lat: f64,
    pub lon: f64,
}

/// Directed road segment as supplied by the loader; every tag is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSegment {
    pub id: SegmentId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub length_m: Option<f64>,
    #[serde(default)]
    pub speed_kph: Option<f64>,
    #[serde(default)]
    pub road_type: Option<String>,
    #[serde(default)]
    pub lanes: Option<u32>,
    #[serde(default)]
    pub max_height_m: Option<f64>,
    #[serde(default)]
    pub max_weight_t: Option<f64>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

impl RawSegment {
    pub fn new(id: SegmentId, source: NodeId, target: NodeId) -> Self {
        Self {
            id,
            source,
            target,
            ..Default::default()
        }
    }
}

/// Loader payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGraph {
    pub nodes: Vec<RawNode>,
    pub segments: Vec<RawSegment>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub lat: f64,
    pub lon: f64,
}

/// Resolved road segment. `source`/`target` are dense node indices.
#[derive(Debug, Clone)]
pub struct RoadSegment {
    pub id: SegmentId,
    pub source: u32,
    pub target: u32,
    pub length_m: f64,
    pub speed_kph: f64,
    pub road_type: RoadType,
    /// `None` = lane count unknown, never fails a lane requirement
    pub lanes: Option<u32>,
    /// Clearance; `None` = unlimited
    pub max_height_m: Option<f64>,
    /// Weight limit in tonnes; `None` = unlimited
    pub max_weight_t: Option<f64>,
    pub closed: bool,
    pub name: Option<String>,
}

impl RoadSegment {
    /// Free-flow travel time in seconds
    pub fn base_travel_time_s(&self) -> f64 {
        self.length_m / (self.speed_kph / 3.6)
    }
}

/// Immutable road network shared by all route computations
#[derive(Debug)]
pub struct RoadGraph {
    nodes: Vec<Node>,
    segments: Vec<RoadSegment>,
    node_index: HashMap<NodeId, u32>,
    segment_index: HashMap<SegmentId, u32>,
    out_segments: Vec<Vec<u32>>,
    in_segments: Vec<Vec<u32>>,
    spatial_index: RTree<GeomWithData<[f64; 2], u32>>,
    content_hash: String,
}

impl RoadGraph {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::GraphLoad(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawGraph = serde_json::from_str(text)
            .map_err(|e| Error::GraphLoad(format!("malformed graph JSON: {e}")))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawGraph) -> Result<Self> {
        if raw.nodes.is_empty() {
            return Err(Error::GraphLoad("graph has no nodes".to_string()));
        }

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        let mut node_index = HashMap::with_capacity(raw.nodes.len());
        for raw_node in raw.nodes {
            let valid = raw_node.lat.is_finite()
                && raw_node.lon.is_finite()
                && raw_node.lat.abs() <= 90.0
                && raw_node.lon.abs() <= 180.0;
            if !valid {
                return Err(Error::GraphLoad(format!(
                    "node {} has invalid coordinates ({}, {})",
                    raw_node.id, raw_node.lat, raw_node.lon
                )));
            }
            if node_index.insert(raw_node.id, nodes.len() as u32).is_some() {
                return Err(Error::GraphLoad(format!("duplicate node id {}", raw_node.id)));
            }
            nodes.push(Node {
                id: raw_node.id,
                lat: raw_node.lat,
                lon: raw_node.lon,
            });
        }

        let mut segments = Vec::with_capacity(raw.segments.len());
        let mut segment_index = HashMap::with_capacity(raw.segments.len());
        let mut defaulted = 0usize;
        for raw_seg in raw.segments {
            let seg = resolve_segment(raw_seg, &nodes, &node_index, &mut defaulted)?;
            if segment_index.insert(seg.id, segments.len() as u32).is_some() {
                return Err(Error::GraphLoad(format!("duplicate segment id {}", seg.id)));
            }
            segments.push(seg);
        }

        if defaulted > 0 {
            tracing::warn!(
                tags = defaulted,
                "applied permissive defaults for missing length/speed tags"
            );
        }

        let mut out_segments = vec![Vec::new(); nodes.len()];
        let mut in_segments = vec![Vec::new(); nodes.len()];
        for (idx, seg) in segments.iter().enumerate() {
            out_segments[seg.source as usize].push(idx as u32);
            in_segments[seg.target as usize].push(idx as u32);
        }

        let points: Vec<GeomWithData<[f64; 2], u32>> = nodes
            .iter()
            .enumerate()
            .map(|(idx, n)| GeomWithData::new([n.lon, n.lat], idx as u32))
            .collect();
        let spatial_index = RTree::bulk_load(points);

        let content_hash = compute_content_hash(&nodes, &segments);

        tracing::debug!(
            nodes = nodes.len(),
            segments = segments.len(),
            hash = %content_hash,
            "road graph loaded"
        );

        Ok(Self {
            nodes,
            segments,
            node_index,
            segment_index,
            out_segments,
            in_segments,
            spatial_index,
            content_hash,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    pub fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    pub fn segment(&self, idx: u32) -> &RoadSegment {
        &self.segments[idx as usize]
    }

    pub fn node_idx(&self, id: NodeId) -> Option<u32> {
        self.node_index.get(&id).copied()
    }

    pub fn segment_idx(&self, id: SegmentId) -> Option<u32> {
        self.segment_index.get(&id).copied()
    }

    /// Segments leaving the node at `idx`
    pub fn out_segments(&self, idx: u32) -> &[u32] {
        &self.out_segments[idx as usize]
    }

    /// Segments arriving at the node at `idx`
    pub fn in_segments(&self, idx: u32) -> &[u32] {
        &self.in_segments[idx as usize]
    }

    /// Straight-line distance in meters between two node indices
    pub fn node_distance(&self, a: u32, b: u32) -> f64 {
        let (na, nb) = (self.node(a), self.node(b));
        haversine_distance(na.lat, na.lon, nb.lat, nb.lon)
    }

    /// Nearest intersection to a (lat, lon) coordinate
    pub fn nearest_node(&self, coord: (f64, f64)) -> Option<u32> {
        nearest_node_spatial(coord, &self.spatial_index)
    }

    /// SHA-256 over the canonical content, hex encoded
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

fn resolve_segment(
    raw: RawSegment,
    nodes: &[Node],
    node_index: &HashMap<NodeId, u32>,
    defaulted: &mut usize,
) -> Result<RoadSegment> {
    let lookup = |id: NodeId, end: &str| {
        node_index.get(&id).copied().ok_or_else(|| {
            Error::GraphLoad(format!("segment {} references unknown {end} node {id}", raw.id))
        })
    };
    let source = lookup(raw.source, "source")?;
    let target = lookup(raw.target, "target")?;

    let road_type = raw
        .road_type
        .as_deref()
        .map(RoadType::from_tag)
        .unwrap_or(RoadType::Other);

    let length_m = match raw.length_m {
        Some(len) if len.is_finite() && len >= 0.0 => len,
        Some(len) => {
            return Err(Error::GraphLoad(format!(
                "segment {} has invalid length {len}",
                raw.id
            )))
        }
        None => {
            *defaulted += 1;
            let (a, b) = (&nodes[source as usize], &nodes[target as usize]);
            haversine_distance(a.lat, a.lon, b.lat, b.lon)
        }
    };

    let speed_kph = match raw.speed_kph {
        Some(speed) if speed.is_finite() && speed > 0.0 => speed,
        Some(speed) => {
            return Err(Error::GraphLoad(format!(
                "segment {} has invalid speed {speed}",
                raw.id
            )))
        }
        None => {
            *defaulted += 1;
            road_type.default_speed_kph()
        }
    };

    for (label, limit) in [("height", raw.max_height_m), ("weight", raw.max_weight_t)] {
        if let Some(v) = limit {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::GraphLoad(format!(
                    "segment {} has invalid {label} limit {v}",
                    raw.id
                )));
            }
        }
    }

    Ok(RoadSegment {
        id: raw.id,
        source,
        target,
        length_m,
        speed_kph,
        road_type,
        lanes: raw.lanes,
        max_height_m: raw.max_height_m,
        max_weight_t: raw.max_weight_t,
        closed: raw.closed.unwrap_or(false),
        name: raw.name,
    })
}

fn compute_content_hash(nodes: &[Node], segments: &[RoadSegment]) -> String {
    let mut hasher = Sha256::new();

    hasher.update((nodes.len() as u64).to_le_bytes());
    for n in nodes {
        hasher.update(n.id.to_le_bytes());
        hasher.update(n.lat.to_bits().to_le_bytes());
        hasher.update(n.lon.to_bits().to_le_bytes());
    }

    hasher.update((segments.len() as u64).to_le_bytes());
    for s in segments {
        hasher.update(s.id.to_le_bytes());
        hasher.update(s.source.to_le_bytes());
        hasher.update(s.target.to_le_bytes());
        hasher.update(s.length_m.to_bits().to_le_bytes());
        hasher.update(s.speed_kph.to_bits().to_le_bytes());
        hasher.update([s.road_type as u8, s.closed as u8]);
        hasher.update(s.lanes.map_or(u64::MAX, u64::from).to_le_bytes());
        hasher.update(s.max_height_m.map_or(u64::MAX, f64::to_bits).to_le_bytes());
        hasher.update(s.max_weight_t.map_or(u64::MAX, f64::to_bits).to_le_bytes());
        // names only label directions, but they are content too
        if let Some(name) = &s.name {
            hasher.update(name.as_bytes());
        }
        hasher.update([0u8]);
    }

    hex::encode(hasher.finalize())
}
