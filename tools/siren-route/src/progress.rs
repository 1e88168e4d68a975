//! Trip playback along a planned route
//!
//! Moves a vehicle along a feasible `RouteResult` by elapsed time so a caller
//! can report positions and hand the current state to a reroute.

use serde::Serialize;
use siren_common::{Error, Result};

use crate::graph::{NodeId, RoadGraph, SegmentId};
use crate::planner::{Position, RouteResult, VehicleState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    /// Segment being driven; `None` once arrived (or for a zero-length trip)
    pub segment: Option<SegmentId>,
    /// Share of `segment` already driven
    pub fraction: f64,
    pub lat: f64,
    pub lon: f64,
    pub elapsed_s: f64,
    pub arrived: bool,
}

/// Leg with its time window and node coordinates resolved
#[derive(Debug, Clone)]
struct Span {
    segment: SegmentId,
    start_s: f64,
    /// Waiting at the intersection before the segment is entered
    turn_s: f64,
    time_s: f64,
    /// Share of the segment already behind the vehicle when the leg starts
    offset: f64,
    from: (f64, f64),
    to: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct TripProgress {
    vehicle_id: String,
    vehicle_type: String,
    target: NodeId,
    target_coord: (f64, f64),
    spans: Vec<Span>,
    total_s: f64,
    elapsed_s: f64,
}

impl TripProgress {
    pub fn new(road: &RoadGraph, route: &RouteResult) -> Result<Self> {
        if !route.feasible {
            return Err(Error::InvalidRequest(format!(
                "route for {} is not feasible",
                route.vehicle_id
            )));
        }
        let coord = |id: NodeId| -> Result<(f64, f64)> {
            let idx = road.node_idx(id).ok_or_else(|| {
                Error::InvalidRequest(format!("route node {id} is not in the graph"))
            })?;
            let node = road.node(idx);
            Ok((node.lat, node.lon))
        };

        let mut spans = Vec::with_capacity(route.legs.len());
        let mut clock = 0.0;
        for (i, leg) in route.legs.iter().enumerate() {
            let offset = match route.start {
                Position::OnSegment { segment, progress } if i == 0 && segment == leg.segment => {
                    progress
                }
                _ => 0.0,
            };
            spans.push(Span {
                segment: leg.segment,
                start_s: clock,
                turn_s: leg.turn_s.min(leg.time_s).max(0.0),
                time_s: leg.time_s,
                offset,
                from: coord(leg.from)?,
                to: coord(leg.to)?,
            });
            clock += leg.time_s;
        }

        let last = route.path.last().copied().unwrap_or(route.target);
        Ok(Self {
            vehicle_id: route.vehicle_id.clone(),
            vehicle_type: route.vehicle_type.name().to_string(),
            target: route.target,
            target_coord: coord(last)?,
            spans,
            total_s: clock,
            elapsed_s: 0.0,
        })
    }

    pub fn total_s(&self) -> f64 {
        self.total_s
    }

    pub fn elapsed_s(&self) -> f64 {
        self.elapsed_s
    }

    pub fn is_arrived(&self) -> bool {
        self.elapsed_s >= self.total_s
    }

    /// Move forward by `dt_s` seconds (clamped at arrival)
    pub fn advance(&mut self, dt_s: f64) -> PositionUpdate {
        self.elapsed_s = (self.elapsed_s + dt_s.max(0.0)).min(self.total_s);
        self.position_at(self.elapsed_s)
    }

    pub fn current(&self) -> PositionUpdate {
        self.position_at(self.elapsed_s)
    }

    pub fn position_at(&self, elapsed_s: f64) -> PositionUpdate {
        let elapsed_s = elapsed_s.clamp(0.0, self.total_s);
        let active = self
            .spans
            .iter()
            .find(|span| elapsed_s < span.start_s + span.time_s);

        match active {
            Some(span) => {
                // fraction is by length: the turn itself moves the vehicle nowhere
                let drive_s = span.time_s - span.turn_s;
                let driven_s = elapsed_s - span.start_s - span.turn_s;
                let t = if drive_s > 0.0 && driven_s > 0.0 {
                    (driven_s / drive_s).min(1.0)
                } else {
                    0.0
                };
                let fraction = span.offset + (1.0 - span.offset) * t;
                PositionUpdate {
                    segment: Some(span.segment),
                    fraction,
                    lat: span.from.0 + (span.to.0 - span.from.0) * fraction,
                    lon: span.from.1 + (span.to.1 - span.from.1) * fraction,
                    elapsed_s,
                    arrived: false,
                }
            }
            None => PositionUpdate {
                segment: None,
                fraction: 1.0,
                lat: self.target_coord.0,
                lon: self.target_coord.1,
                elapsed_s,
                arrived: true,
            },
        }
    }

    /// Where the vehicle is now, as a reroute starting point
    pub fn vehicle_state(&self) -> VehicleState {
        let update = self.current();
        let position = match update.segment {
            Some(segment) => Position::OnSegment {
                segment,
                progress: update.fraction,
            },
            None => Position::AtNode { node: self.target },
        };
        VehicleState {
            vehicle_id: self.vehicle_id.clone(),
            vehicle_type: self.vehicle_type.clone(),
            position,
            target: self.target,
        }
    }
}
