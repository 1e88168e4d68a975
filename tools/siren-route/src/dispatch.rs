//! Per-vehicle dispatch: last request wins
//!
//! Every vehicle has at most one live computation. Starting a new one bumps
//! the vehicle's generation and cancels the previous token, so a superseded
//! search stops at its next frontier pop and its result is dropped.

use parking_lot::Mutex;
use rayon::prelude::*;
use siren_common::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cancel::CancellationToken;
use crate::planner::{PlanOutcome, RoutePlanner, RouteRequest, VehicleState};

#[derive(Debug)]
struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct Dispatcher {
    planner: Arc<RoutePlanner>,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl Dispatcher {
    pub fn new(planner: Arc<RoutePlanner>) -> Self {
        Self {
            planner,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new computation for `vehicle_id`, cancelling any older one
    fn begin(&self, vehicle_id: &str) -> (u64, CancellationToken) {
        let mut in_flight = self.in_flight.lock();
        let token = CancellationToken::new();
        let generation = match in_flight.get(vehicle_id) {
            Some(previous) => {
                previous.token.cancel();
                tracing::debug!(vehicle = vehicle_id, generation = previous.generation, "superseding in-flight search");
                previous.generation + 1
            }
            None => 1,
        };
        in_flight.insert(
            vehicle_id.to_string(),
            InFlight {
                generation,
                token: token.clone(),
            },
        );
        (generation, token)
    }

    /// Drop the registry entry unless a newer computation replaced it.
    /// Returns whether `generation` was still current.
    fn finish(&self, vehicle_id: &str, generation: u64) -> bool {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get(vehicle_id) {
            Some(current) if current.generation == generation => {
                in_flight.remove(vehicle_id);
                true
            }
            _ => false,
        }
    }

    /// Plan on the calling thread
    pub fn submit(&self, request: &RouteRequest) -> Result<PlanOutcome> {
        let (generation, token) = self.begin(&request.vehicle_id);
        let outcome = self.planner.plan(request, &token);
        let current = self.finish(&request.vehicle_id, generation);
        match outcome {
            // a newer request may have landed after our last cancellation check
            Ok(PlanOutcome::Route(_)) if !current => Ok(PlanOutcome::Cancelled),
            other => other,
        }
    }

    /// Cancel whatever is in flight for the vehicle and plan from its state
    pub fn reroute(&self, state: &VehicleState) -> Result<PlanOutcome> {
        let request = state.to_request(chrono::Utc::now());
        self.submit(&request)
    }

    /// Like `reroute`, on a worker thread
    pub fn spawn_reroute(self: &Arc<Self>, state: VehicleState) -> JoinHandle<Result<PlanOutcome>> {
        let dispatcher = Arc::clone(self);
        std::thread::spawn(move || dispatcher.reroute(&state))
    }

    /// Plan independent requests in parallel; one failure never affects the
    /// others. Results come back in request order.
    pub fn plan_batch(&self, requests: &[RouteRequest]) -> Vec<Result<PlanOutcome>> {
        tracing::info!(requests = requests.len(), "planning batch");
        requests.par_iter().map(|request| self.submit(request)).collect()
    }

    /// Vehicles with a computation in progress
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel a vehicle's computation without starting a new one
    pub fn cancel(&self, vehicle_id: &str) -> bool {
        match self.in_flight.lock().remove(vehicle_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::graph::RoadGraph;
    use crate::planner::Position;
    use crate::search::test_util::{diamond, grid};
    use crate::traffic::TrafficConfig;
    use siren_common::Error;

    fn dispatcher(raw: crate::graph::RawGraph) -> Arc<Dispatcher> {
        let config = RouterConfig {
            traffic: TrafficConfig {
                max_multiplier: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let planner = RoutePlanner::new(RoadGraph::from_raw(raw).unwrap(), config).unwrap();
        Arc::new(Dispatcher::new(Arc::new(planner)))
    }

    #[test]
    fn test_superseded_generation_is_cancelled() {
        let d = dispatcher(diamond());
        let (old_gen, old_token) = d.begin("a1");
        let (new_gen, new_token) = d.begin("a1");

        assert!(old_token.is_cancelled());
        assert!(!new_token.is_cancelled());
        assert_eq!(new_gen, old_gen + 1);

        assert!(!d.finish("a1", old_gen), "stale generation must not clear the entry");
        assert_eq!(d.in_flight(), 1);
        assert!(d.finish("a1", new_gen));
        assert_eq!(d.in_flight(), 0);
    }

    #[test]
    fn test_batch_isolates_failures() {
        let d = dispatcher(diamond());
        let requests = vec![
            RouteRequest::new("a1", "ambulance", 1, 4),
            RouteRequest::new("x1", "hovercraft", 1, 4),
            RouteRequest::new("p1", "police", 1, 4),
            RouteRequest::new("f1", "fire_engine", 1, 99),
        ];
        let results = d.plan_batch(&requests);
        assert_eq!(results.len(), 4);
        assert!(matches!(&results[0], Ok(PlanOutcome::Route(r)) if r.feasible));
        assert!(matches!(&results[1], Err(Error::UnknownVehicle { .. })));
        assert!(matches!(&results[2], Ok(PlanOutcome::Route(r)) if r.path == vec![1, 2, 4]));
        assert!(matches!(&results[3], Err(Error::InvalidRequest(_))));
        assert_eq!(d.in_flight(), 0);
    }

    #[test]
    fn test_background_reroute_completes() {
        let d = dispatcher(grid(6, 11));
        let state = VehicleState {
            vehicle_id: "a7".into(),
            vehicle_type: "ambulance".into(),
            position: Position::AtNode { node: 1 },
            target: 36,
        };
        let handle = d.spawn_reroute(state);
        let outcome = handle.join().unwrap().unwrap();
        let route = outcome.into_route().expect("only request for this vehicle");
        assert!(route.feasible);
        assert_eq!(route.path.first(), Some(&1));
        assert_eq!(route.path.last(), Some(&36));
    }

    #[test]
    fn test_explicit_cancel() {
        let d = dispatcher(diamond());
        let (_, token) = d.begin("p1");
        assert!(d.cancel("p1"));
        assert!(token.is_cancelled());
        assert!(!d.cancel("p1"));
    }
}
