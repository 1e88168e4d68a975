//! Route planner: constraint relaxation and result assembly
//!
//! A request walks levels 0..=3. Each level takes its own traffic snapshot and
//! runs the selected algorithm(s); the first level that finds a path wins and
//! later levels are never attempted. When level 3 fails, an unconstrained
//! search tells a physically impossible trip apart from a disconnected one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use siren_common::{Error, Result};
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::RouterConfig;
use crate::constraints::{physical_violation, ConstraintLevel};
use crate::ebg::{EbgCache, EdgeBasedGraph, TurnClass};
use crate::graph::{NodeId, RoadGraph, RoadType, SegmentId};
use crate::profiles::{ProfileSet, VehicleKind, VehicleProfile};
use crate::search::{
    self, Algorithm, AlgorithmChoice, EdgeFilter, SearchContext, SearchOutcome, SearchQuery,
    Source,
};
use crate::traffic::{effective_cost, TrafficSimulator, TrafficSnapshot};

/// Where a vehicle is when a route is requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    AtNode {
        node: NodeId,
    },
    /// Part-way along a segment; `progress` is the share already driven
    OnSegment {
        segment: SegmentId,
        progress: f64,
    },
    /// Raw coordinate, snapped to the nearest intersection
    Coordinate {
        lat: f64,
        lon: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub start: Position,
    pub target: NodeId,
    /// Overrides the configured default
    #[serde(default)]
    pub algorithm: Option<AlgorithmChoice>,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

impl RouteRequest {
    pub fn new(vehicle_id: &str, vehicle_type: &str, start: NodeId, target: NodeId) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            vehicle_type: vehicle_type.to_string(),
            start: Position::AtNode { node: start },
            target,
            algorithm: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: AlgorithmChoice) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    pub fn at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.requested_at = requested_at;
        self
    }
}

/// Live vehicle state a reroute starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: String,
    pub vehicle_type: String,
    pub position: Position,
    pub target: NodeId,
}

impl VehicleState {
    pub fn to_request(&self, requested_at: DateTime<Utc>) -> RouteRequest {
        RouteRequest {
            vehicle_id: self.vehicle_id.clone(),
            vehicle_type: self.vehicle_type.clone(),
            start: self.position.clone(),
            target: self.target,
            algorithm: None,
            requested_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleReason {
    /// Every connecting path needs a segment the vehicle physically cannot use
    HardConstraintViolation,
    /// All relaxation levels exhausted
    NoFeasibleRouteFound,
}

/// One traversed segment of a route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteLeg {
    pub segment: SegmentId,
    pub from: NodeId,
    pub to: NodeId,
    pub length_m: f64,
    /// Travel time including the turn onto this segment
    pub time_s: f64,
    /// Part of `time_s` spent turning onto the segment
    pub turn_s: f64,
    pub speed_kph: f64,
    pub road_type: RoadType,
    pub name: Option<String>,
    /// Turn taken onto this segment; `None` for the first leg
    pub turn: Option<TurnClass>,
}

/// One search run during relaxation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelAttempt {
    pub level: ConstraintLevel,
    pub algorithm: Algorithm,
    pub expanded: usize,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub vehicle_id: String,
    pub vehicle_type: VehicleKind,
    pub start: Position,
    pub target: NodeId,
    /// Intersections in travel order
    pub path: Vec<NodeId>,
    pub legs: Vec<RouteLeg>,
    pub distance_m: f64,
    pub travel_time_s: f64,
    /// Search cost: travel time plus soft penalties
    pub cost: f64,
    pub constraint_level: ConstraintLevel,
    pub algorithm: Algorithm,
    pub feasible: bool,
    pub reason_if_infeasible: Option<InfeasibleReason>,
    pub expanded: usize,
    pub attempts: Vec<LevelAttempt>,
    pub traffic_version: u64,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Route(RouteResult),
    /// Superseded before finishing; carries nothing worth reporting
    Cancelled,
}

impl PlanOutcome {
    pub fn into_route(self) -> Option<RouteResult> {
        match self {
            PlanOutcome::Route(route) => Some(route),
            PlanOutcome::Cancelled => None,
        }
    }
}

/// Road graph and its edge-based graph, swapped together
#[derive(Debug)]
pub struct RoutingData {
    pub road: Arc<RoadGraph>,
    pub ebg: Arc<EdgeBasedGraph>,
    /// Traffic snapshots with this binding are indexed for `road`
    pub traffic_binding: u64,
}

#[derive(Debug, Clone, Copy)]
enum StartPoint {
    Node(u32),
    Segment { seg: u32, remaining: f64 },
}

pub struct RoutePlanner {
    config: RouterConfig,
    profiles: ProfileSet,
    data: RwLock<Arc<RoutingData>>,
    ebg_cache: EbgCache,
    traffic: TrafficSimulator,
}

impl RoutePlanner {
    pub fn new(road: RoadGraph, config: RouterConfig) -> Result<Self> {
        config.validate()?;
        let profiles = config.profile_set()?;
        let ebg_cache = EbgCache::new();
        let ebg = ebg_cache.get_or_build(&road, &config.turns);
        let traffic = TrafficSimulator::new(road.segment_count(), config.traffic.clone());
        let traffic_binding = traffic.snapshot().binding();

        Ok(Self {
            config,
            profiles,
            data: RwLock::new(Arc::new(RoutingData {
                road: Arc::new(road),
                ebg,
                traffic_binding,
            })),
            ebg_cache,
            traffic,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn traffic(&self) -> &TrafficSimulator {
        &self.traffic
    }

    /// Current road graph and EBG
    pub fn data(&self) -> Arc<RoutingData> {
        Arc::clone(&self.data.read())
    }

    /// How many times the EBG has been built
    pub fn ebg_builds(&self) -> usize {
        self.ebg_cache.builds()
    }

    /// Graph data together with a traffic snapshot indexed for it
    fn routing_view(&self) -> (Arc<RoutingData>, Arc<TrafficSnapshot>) {
        let data = self.data.read();
        (Arc::clone(&data), self.traffic.snapshot())
    }

    /// Latest snapshot if it still belongs to `data`'s segment set, else
    /// `fallback` (the graph was replaced mid-request)
    fn snapshot_for(
        &self,
        data: &RoutingData,
        fallback: &Arc<TrafficSnapshot>,
    ) -> Arc<TrafficSnapshot> {
        let snapshot = self.traffic.snapshot();
        if snapshot.binding() == data.traffic_binding {
            snapshot
        } else {
            Arc::clone(fallback)
        }
    }

    /// Swap in a new road graph. The EBG is rebuilt only if the content
    /// changed, and traffic is re-drawn for the new segment set.
    ///
    /// The swap and the traffic rebind happen under one write lock, so no
    /// reader pairs the new graph with traffic drawn for the old one.
    pub fn update_graph(&self, road: RoadGraph) {
        let ebg = self.ebg_cache.get_or_build(&road, &self.config.turns);
        let n_segments = road.segment_count();

        let mut data = self.data.write();
        let changed = data.road.content_hash() != road.content_hash();
        let traffic_binding = if changed {
            self.traffic.rebind(n_segments).binding()
        } else {
            data.traffic_binding
        };
        *data = Arc::new(RoutingData {
            road: Arc::new(road),
            ebg,
            traffic_binding,
        });
        drop(data);
        tracing::info!(segments = n_segments, changed, "road graph replaced");
    }

    /// Plan a route from scratch
    pub fn plan(&self, request: &RouteRequest, cancel: &CancellationToken) -> Result<PlanOutcome> {
        let profile = self.profiles.resolve(&request.vehicle_type)?;
        if self.config.traffic.resample_per_request {
            self.traffic.resample(None);
        }
        let (data, first_snapshot) = self.routing_view();
        let road = data.road.as_ref();

        let target = road.node_idx(request.target).ok_or_else(|| {
            Error::InvalidRequest(format!("target node {} is not in the graph", request.target))
        })?;
        let start = resolve_start(road, &request.start)?;

        let algorithms = request
            .algorithm
            .unwrap_or(self.config.search.algorithm)
            .algorithms();

        if let StartPoint::Node(node) = start {
            if node == target {
                return Ok(PlanOutcome::Route(trivial_result(
                    request,
                    profile,
                    road.node(node).id,
                    algorithms[0],
                    first_snapshot.version(),
                )));
            }
        }

        let (query, exempt) = build_query(road, start, target);
        let heuristic_speed_mps =
            (self.config.search.max_speed_kph / 3.6).max(data.ebg.max_straight_speed_mps());

        let mut attempts = Vec::new();
        let mut last_snapshot = first_snapshot;

        for level in ConstraintLevel::ALL {
            let snapshot = self.snapshot_for(&data, &last_snapshot);
            let ctx = SearchContext {
                road,
                ebg: &data.ebg,
                profile,
                traffic: &snapshot,
                filter: EdgeFilter::Level(level),
                non_preferred_penalty_s: self.config.search.non_preferred_penalty_s,
                heuristic_speed_mps,
                exempt,
                cancel,
            };

            let mut best: Option<(Algorithm, Vec<u32>, f64)> = None;
            for &algorithm in algorithms {
                let outcome = search::run(algorithm, &ctx, &query);
                if outcome == SearchOutcome::Cancelled {
                    tracing::debug!(vehicle = %request.vehicle_id, "route computation cancelled");
                    return Ok(PlanOutcome::Cancelled);
                }

                tracing::debug!(
                    vehicle = %request.vehicle_id,
                    level = level.as_u8(),
                    algorithm = %algorithm,
                    expanded = outcome.expanded(),
                    found = outcome.is_found(),
                    "level attempt"
                );
                attempts.push(LevelAttempt {
                    level,
                    algorithm,
                    expanded: outcome.expanded(),
                    cost: outcome.cost(),
                });

                if let SearchOutcome::Found { segments, cost, .. } = outcome {
                    // strict `<` keeps the earlier algorithm on ties
                    if best.as_ref().map_or(true, |(_, _, c)| cost < *c) {
                        best = Some((algorithm, segments, cost));
                    }
                }
            }

            if let Some((algorithm, segments, cost)) = best {
                let result = assemble(
                    request, profile, &ctx, start, &segments, cost, level, algorithm, attempts,
                );
                tracing::info!(
                    vehicle = %result.vehicle_id,
                    vehicle_type = %profile.kind,
                    level = level.as_u8(),
                    algorithm = %algorithm,
                    travel_time_s = result.travel_time_s,
                    distance_m = result.distance_m,
                    "route planned"
                );
                return Ok(PlanOutcome::Route(result));
            }
            last_snapshot = snapshot;
        }

        // All levels failed: search the bare topology
        let topology_ctx = SearchContext {
            road,
            ebg: &data.ebg,
            profile,
            traffic: &last_snapshot,
            filter: EdgeFilter::Unconstrained,
            non_preferred_penalty_s: 0.0,
            heuristic_speed_mps,
            exempt,
            cancel,
        };
        let reason = match search::dijkstra(&topology_ctx, &query) {
            SearchOutcome::Cancelled => return Ok(PlanOutcome::Cancelled),
            SearchOutcome::Found { segments, .. } => {
                let blocked = segments.iter().any(|&seg| {
                    Some(seg) != exempt && physical_violation(road.segment(seg), profile).is_some()
                });
                if blocked {
                    InfeasibleReason::HardConstraintViolation
                } else {
                    InfeasibleReason::NoFeasibleRouteFound
                }
            }
            SearchOutcome::NoPath { .. } => InfeasibleReason::NoFeasibleRouteFound,
        };

        tracing::warn!(
            vehicle = %request.vehicle_id,
            vehicle_type = %profile.kind,
            reason = ?reason,
            "no feasible route"
        );

        let expanded = attempts.iter().map(|a| a.expanded).sum();
        Ok(PlanOutcome::Route(RouteResult {
            vehicle_id: request.vehicle_id.clone(),
            vehicle_type: profile.kind,
            start: request.start.clone(),
            target: request.target,
            path: Vec::new(),
            legs: Vec::new(),
            distance_m: 0.0,
            travel_time_s: f64::INFINITY,
            cost: f64::INFINITY,
            constraint_level: ConstraintLevel::ClosedOnly,
            algorithm: algorithms[0],
            feasible: false,
            reason_if_infeasible: Some(reason),
            expanded,
            attempts,
            traffic_version: last_snapshot.version(),
            requested_at: request.requested_at,
        }))
    }

    /// Plan again from where the vehicle is now. The caller is responsible for
    /// cancelling the previous computation (see `Dispatcher`).
    pub fn reroute(&self, state: &VehicleState, cancel: &CancellationToken) -> Result<PlanOutcome> {
        tracing::debug!(vehicle = %state.vehicle_id, position = ?state.position, "reroute");
        self.plan(&state.to_request(Utc::now()), cancel)
    }
}

fn resolve_start(road: &RoadGraph, start: &Position) -> Result<StartPoint> {
    match *start {
        Position::AtNode { node } => road
            .node_idx(node)
            .map(StartPoint::Node)
            .ok_or_else(|| Error::InvalidRequest(format!("start node {node} is not in the graph"))),
        Position::OnSegment { segment, progress } => {
            let seg = road.segment_idx(segment).ok_or_else(|| {
                Error::InvalidRequest(format!("segment {segment} is not in the graph"))
            })?;
            if !(0.0..=1.0).contains(&progress) {
                return Err(Error::InvalidRequest(format!(
                    "segment progress must be within [0, 1], got {progress}"
                )));
            }
            let remaining = 1.0 - progress;
            if remaining <= f64::EPSILON {
                // at the end of the segment: start from its head
                Ok(StartPoint::Node(road.segment(seg).target))
            } else {
                Ok(StartPoint::Segment { seg, remaining })
            }
        }
        Position::Coordinate { lat, lon } => {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(Error::InvalidRequest(format!(
                    "coordinate ({lat}, {lon}) is not finite"
                )));
            }
            road.nearest_node((lat, lon))
                .map(StartPoint::Node)
                .ok_or_else(|| Error::InvalidRequest("graph has no nodes to snap to".to_string()))
        }
    }
}

fn build_query(road: &RoadGraph, start: StartPoint, target: u32) -> (SearchQuery, Option<u32>) {
    match start {
        StartPoint::Node(node) => (
            SearchQuery {
                sources: road
                    .out_segments(node)
                    .iter()
                    .map(|&seg| Source { seg, remaining: 1.0 })
                    .collect(),
                origin_node: node,
                target_node: target,
            },
            None,
        ),
        StartPoint::Segment { seg, remaining } => (
            SearchQuery {
                sources: vec![Source { seg, remaining }],
                origin_node: road.segment(seg).target,
                target_node: target,
            },
            Some(seg),
        ),
    }
}

fn trivial_result(
    request: &RouteRequest,
    profile: &VehicleProfile,
    node: NodeId,
    algorithm: Algorithm,
    traffic_version: u64,
) -> RouteResult {
    RouteResult {
        vehicle_id: request.vehicle_id.clone(),
        vehicle_type: profile.kind,
        start: request.start.clone(),
        target: request.target,
        path: vec![node],
        legs: Vec::new(),
        distance_m: 0.0,
        travel_time_s: 0.0,
        cost: 0.0,
        constraint_level: ConstraintLevel::Full,
        algorithm,
        feasible: true,
        reason_if_infeasible: None,
        expanded: 0,
        attempts: Vec::new(),
        traffic_version,
        requested_at: request.requested_at,
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    request: &RouteRequest,
    profile: &VehicleProfile,
    ctx: &SearchContext<'_>,
    start: StartPoint,
    segments: &[u32],
    cost: f64,
    level: ConstraintLevel,
    algorithm: Algorithm,
    attempts: Vec<LevelAttempt>,
) -> RouteResult {
    let road = ctx.road;
    let mut path = Vec::with_capacity(segments.len() + 1);
    let mut legs = Vec::with_capacity(segments.len());
    let mut prev: Option<u32> = None;

    for (i, &seg) in segments.iter().enumerate() {
        let segment = road.segment(seg);
        if i == 0 {
            path.push(road.node(segment.source).id);
        }
        path.push(road.node(segment.target).id);

        let share = match start {
            StartPoint::Segment { seg: first, remaining } if i == 0 && first == seg => remaining,
            _ => 1.0,
        };
        let (turn, turn_cost) = match prev {
            Some(p) => (
                ctx.ebg.turn_class(p, seg),
                ctx.ebg.turn_cost(p, seg).unwrap_or(0.0),
            ),
            None => (None, 0.0),
        };
        let travel = share * effective_cost(segment, ctx.traffic.multiplier(seg), profile);

        legs.push(RouteLeg {
            segment: segment.id,
            from: road.node(segment.source).id,
            to: road.node(segment.target).id,
            length_m: share * segment.length_m,
            time_s: turn_cost + travel,
            turn_s: turn_cost,
            speed_kph: segment.speed_kph,
            road_type: segment.road_type,
            name: segment.name.clone(),
            turn,
        });
        prev = Some(seg);
    }

    let expanded = attempts.iter().map(|a| a.expanded).sum();
    RouteResult {
        vehicle_id: request.vehicle_id.clone(),
        vehicle_type: profile.kind,
        start: request.start.clone(),
        target: request.target,
        path,
        distance_m: legs.iter().map(|l| l.length_m).sum(),
        travel_time_s: legs.iter().map(|l| l.time_s).sum(),
        legs,
        cost,
        constraint_level: level,
        algorithm,
        feasible: true,
        reason_if_infeasible: None,
        expanded,
        attempts,
        traffic_version: ctx.traffic.version(),
        requested_at: request.requested_at,
    }
}
