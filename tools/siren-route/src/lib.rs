//! Constraint-aware emergency vehicle routing
//!
//! Road graphs are turned into edge-based graphs so turns carry a cost, then
//! searched with Dijkstra, A* or bidirectional A* under per-vehicle
//! constraints that relax level by level until a route is found.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod constraints;
pub mod dispatch;
pub mod ebg;
pub mod geo;
pub mod graph;
pub mod planner;
pub mod profiles;
pub mod progress;
pub mod record;
pub mod search;
pub mod traffic;

pub use cancel::CancellationToken;
pub use config::RouterConfig;
pub use constraints::ConstraintLevel;
pub use dispatch::Dispatcher;
pub use ebg::EdgeBasedGraph;
pub use graph::{RawGraph, RawNode, RawSegment, RoadGraph, RoadType};
pub use planner::{
    InfeasibleReason, PlanOutcome, Position, RoutePlanner, RouteRequest, RouteResult,
    VehicleState,
};
pub use profiles::{VehicleKind, VehicleProfile};
pub use search::{Algorithm, AlgorithmChoice};
pub use traffic::TrafficSimulator;
