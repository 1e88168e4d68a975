use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use siren_route::constraints::is_traversable;
use siren_route::ebg::{TurnClass, TurnPenaltyConfig};
use siren_route::record::to_json_line;
use siren_route::search::{self, EdgeFilter, SearchContext, SearchQuery, Source};
use siren_route::traffic::{TrafficConfig, TrafficSnapshot};
use siren_route::{
    AlgorithmChoice, CancellationToken, ConstraintLevel, Dispatcher, EdgeBasedGraph,
    InfeasibleReason, PlanOutcome, Position, RawGraph, RawNode, RawSegment, RoadGraph,
    RoutePlanner, RouteRequest, RouteResult, RouterConfig, VehicleKind, VehicleProfile,
};

fn segment(id: u64, s: u64, t: u64, length: f64, road_type: &str, lanes: u32) -> RawSegment {
    RawSegment {
        length_m: Some(length),
        speed_kph: Some(60.0),
        road_type: Some(road_type.to_string()),
        lanes: Some(lanes),
        ..RawSegment::new(id, s, t)
    }
}

/// Two routes from 1 to 4: the short one through 2 ends on a closed road
fn diamond(offset: u64) -> RawGraph {
    let n = |k: u64| k + offset;
    let mut closed = segment(n(24), n(2), n(4), 150.0, "primary", 2);
    closed.closed = Some(true);
    let shift = offset as f64 * 0.01;
    RawGraph {
        nodes: vec![
            RawNode { id: n(1), lat: shift, lon: 0.0 },
            RawNode { id: n(2), lat: shift + 0.001, lon: 0.001 },
            RawNode { id: n(3), lat: shift - 0.001, lon: 0.001 },
            RawNode { id: n(4), lat: shift, lon: 0.003 },
        ],
        segments: vec![
            segment(n(12), n(1), n(2), 150.0, "primary", 2),
            closed,
            segment(n(13), n(1), n(3), 300.0, "primary", 2),
            segment(n(34), n(3), n(4), 150.0, "primary", 2),
        ],
    }
}

/// `n` x `n` two-way grid with seeded lengths, road types and lane counts
fn grid(n: u64, seed: u64) -> RawGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let types = ["primary", "secondary", "tertiary", "residential", "track"];
    let id = |r: u64, c: u64| r * n + c + 1;

    let mut raw = RawGraph::default();
    for r in 0..n {
        for c in 0..n {
            raw.nodes.push(RawNode {
                id: id(r, c),
                lat: 48.0 + r as f64 * 0.001,
                lon: 11.0 + c as f64 * 0.0015,
            });
        }
    }
    let mut next = 1;
    for r in 0..n {
        for c in 0..n {
            let mut neighbours = Vec::new();
            if c + 1 < n {
                neighbours.push(id(r, c + 1));
            }
            if r + 1 < n {
                neighbours.push(id(r + 1, c));
            }
            for other in neighbours {
                let length = rng.random_range(115.0..240.0);
                let road_type = types[rng.random_range(0..types.len())];
                let lanes = rng.random_range(1..=3);
                for (s, t) in [(id(r, c), other), (other, id(r, c))] {
                    raw.segments.push(segment(next, s, t, length, road_type, lanes));
                    next += 1;
                }
            }
        }
    }
    raw
}

fn fixed_traffic(seed: u64) -> RouterConfig {
    RouterConfig {
        traffic: TrafficConfig {
            seed: Some(seed),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn free_flow() -> RouterConfig {
    RouterConfig {
        traffic: TrafficConfig {
            max_multiplier: 1.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn planner(raw: RawGraph, config: RouterConfig) -> RoutePlanner {
    RoutePlanner::new(RoadGraph::from_raw(raw).unwrap(), config).unwrap()
}

fn route(planner: &RoutePlanner, request: &RouteRequest) -> RouteResult {
    planner
        .plan(request, &CancellationToken::new())
        .unwrap()
        .into_route()
        .expect("not cancelled")
}

#[test]
fn test_vehicles_take_different_paths_around_closure() {
    let p = planner(diamond(0), free_flow());

    let ambulance = route(&p, &RouteRequest::new("amb-1", "ambulance", 1, 4));
    assert_eq!(ambulance.path, vec![1, 3, 4]);
    assert!((ambulance.travel_time_s - 32.0).abs() < 1e-9);

    let police = route(&p, &RouteRequest::new("pol-1", "police_units", 1, 4));
    assert_eq!(police.path, vec![1, 2, 4]);
    assert_eq!(police.vehicle_type, VehicleKind::Police);
    assert!((police.travel_time_s - 23.0).abs() < 1e-9);

    let best = route(
        &p,
        &RouteRequest::new("amb-2", "ambulance", 1, 4).with_algorithm(AlgorithmChoice::Best),
    );
    assert_eq!(best.attempts.len(), 3);
    for attempt in &best.attempts {
        assert!((attempt.cost.unwrap() - 32.0).abs() < 1e-9);
    }
}

#[test]
fn test_algorithms_agree_on_seeded_grids() {
    let pairs = [(1, 100), (10, 91), (45, 56), (100, 1)];
    for seed in [3, 17, 29] {
        let p = planner(grid(10, seed), fixed_traffic(seed));
        for vehicle in ["ambulance", "fire_engine", "police"] {
            for (from, to) in pairs {
                let results: Vec<RouteResult> = [
                    AlgorithmChoice::Dijkstra,
                    AlgorithmChoice::AStar,
                    AlgorithmChoice::BidirectionalAStar,
                ]
                .into_iter()
                .map(|algorithm| {
                    route(&p, &RouteRequest::new("v", vehicle, from, to).with_algorithm(algorithm))
                })
                .collect();

                let reference = &results[0];
                for other in &results[1..] {
                    assert_eq!(other.feasible, reference.feasible);
                    assert_eq!(other.constraint_level, reference.constraint_level);
                    if reference.feasible {
                        assert!(
                            (other.cost - reference.cost).abs() < 1e-6,
                            "seed {seed} {vehicle} {from}->{to}: {} vs {} ({})",
                            reference.cost,
                            other.cost,
                            other.algorithm
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn test_routes_respect_their_level() {
    let p = planner(grid(10, 21), fixed_traffic(21));
    let data = p.data();
    let traffic = p.traffic().snapshot();

    for vehicle in [VehicleKind::Ambulance, VehicleKind::FireEngine, VehicleKind::Police] {
        let profile = p.profiles().get(vehicle);
        for (from, to) in [(1, 100), (91, 10), (33, 78)] {
            let result = route(&p, &RouteRequest::new("v", vehicle.name(), from, to));
            assert!(result.feasible);
            for leg in &result.legs {
                let seg = data.road.segment_idx(leg.segment).unwrap();
                assert!(
                    is_traversable(
                        data.road.segment(seg),
                        traffic.multiplier(seg),
                        profile,
                        result.constraint_level
                    ),
                    "{vehicle} {from}->{to}: segment {} not allowed at level {}",
                    leg.segment,
                    result.constraint_level
                );
            }
            // soft penalties only ever add to the cost
            assert!(result.cost + 1e-9 >= result.travel_time_s);
        }
    }
}

#[test]
fn test_relaxed_levels_never_lose_a_route() {
    for seed in [5, 8] {
        let road = RoadGraph::from_raw(grid(8, seed)).unwrap();
        let ebg = EdgeBasedGraph::build(&road, &TurnPenaltyConfig::default());
        let traffic = TrafficSnapshot::free_flow(road.segment_count());
        let profile = VehicleProfile::builtin(VehicleKind::FireEngine);
        let cancel = CancellationToken::new();

        for (from, to) in [(1, 64), (8, 57), (20, 45)] {
            let origin = road.node_idx(from).unwrap();
            let query = SearchQuery {
                sources: road
                    .out_segments(origin)
                    .iter()
                    .map(|&seg| Source { seg, remaining: 1.0 })
                    .collect(),
                origin_node: origin,
                target_node: road.node_idx(to).unwrap(),
            };

            let mut found_before = false;
            for level in ConstraintLevel::ALL {
                let ctx = SearchContext {
                    road: &road,
                    ebg: &ebg,
                    profile: &profile,
                    traffic: &traffic,
                    filter: EdgeFilter::Level(level),
                    non_preferred_penalty_s: 3.0,
                    heuristic_speed_mps: 130.0 / 3.6,
                    exempt: None,
                    cancel: &cancel,
                };
                let found = search::dijkstra(&ctx, &query).is_found();
                assert!(
                    found || !found_before,
                    "seed {seed} {from}->{to}: route lost when relaxing to level {level}"
                );
                found_before |= found;
            }
        }
    }
}

#[test]
fn test_results_are_reproducible() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let request = RouteRequest::new("fire-7", "fire", 1, 81)
        .with_algorithm(AlgorithmChoice::Best)
        .at(at);

    let first = route(&planner(grid(9, 4), fixed_traffic(99)), &request);
    let second = route(&planner(grid(9, 4), fixed_traffic(99)), &request);
    assert_eq!(to_json_line(&first).unwrap(), to_json_line(&second).unwrap());

    let line: serde_json::Value = serde_json::from_str(&to_json_line(&first).unwrap()).unwrap();
    assert_eq!(line["requested_at"], "2024-03-01T12:00:00Z");
    assert_eq!(line["vehicle_type"], "fire_engine");
}

#[test]
fn test_disconnected_components() {
    let mut raw = diamond(0);
    let other = diamond(100);
    raw.nodes.extend(other.nodes);
    raw.segments.extend(other.segments);
    let p = planner(raw, free_flow());

    let result = route(&p, &RouteRequest::new("a1", "ambulance", 1, 104));
    assert!(!result.feasible);
    assert_eq!(result.reason_if_infeasible, Some(InfeasibleReason::NoFeasibleRouteFound));
    assert_eq!(result.constraint_level, ConstraintLevel::ClosedOnly);
    let levels: Vec<u8> = result.attempts.iter().map(|a| a.level.as_u8()).collect();
    assert_eq!(levels, vec![0, 1, 2, 3]);

    // each component still routes internally
    assert!(route(&p, &RouteRequest::new("a2", "ambulance", 101, 104)).feasible);
}

#[test]
fn test_first_feasible_level_wins() {
    let p = planner(diamond(0), free_flow());
    let result = route(&p, &RouteRequest::new("a1", "ambulance", 1, 4));
    assert_eq!(result.constraint_level, ConstraintLevel::Full);
    assert_eq!(result.attempts.len(), 1);
}

#[test]
fn test_start_is_target() {
    let p = planner(grid(4, 1), free_flow());
    let result = route(&p, &RouteRequest::new("p1", "police", 6, 6));
    assert!(result.feasible);
    assert_eq!(result.path, vec![6]);
    assert_eq!(result.travel_time_s, 0.0);
    assert!(result.legs.is_empty());
}

#[test]
fn test_low_bridge_is_a_hard_violation() {
    // a 3.2 m bridge blocks the fire engine (3.5 m) but not the ambulance (3.0 m)
    let mut raw = diamond(0);
    raw.segments[1].closed = Some(false);
    for seg in &mut raw.segments {
        if seg.id == 12 || seg.id == 13 {
            seg.max_height_m = Some(3.2);
        }
    }
    let p = planner(raw, free_flow());

    let fire = route(&p, &RouteRequest::new("f1", "fire_engine", 1, 4));
    assert!(!fire.feasible);
    assert_eq!(fire.reason_if_infeasible, Some(InfeasibleReason::HardConstraintViolation));

    let ambulance = route(&p, &RouteRequest::new("a1", "ambulance", 1, 4));
    assert!(ambulance.feasible);
    assert_eq!(ambulance.path, vec![1, 2, 4]);
}

#[test]
fn test_cancelled_request_reports_nothing() {
    let p = planner(grid(12, 2), free_flow());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = p.plan(&RouteRequest::new("a1", "ambulance", 1, 144), &cancel).unwrap();
    assert_eq!(outcome, PlanOutcome::Cancelled);
}

#[test]
fn test_reroute_mid_segment_under_new_traffic() {
    let p = Arc::new(planner(grid(8, 12), fixed_traffic(1)));
    let dispatcher = Dispatcher::new(Arc::clone(&p));
    let initial = dispatcher
        .submit(&RouteRequest::new("amb-9", "ambulance", 1, 64))
        .unwrap()
        .into_route()
        .unwrap();
    assert!(initial.feasible);

    let data = p.data();
    let mut trip = siren_route::progress::TripProgress::new(&data.road, &initial).unwrap();
    trip.advance(trip.total_s() / 2.0);
    let state = trip.vehicle_state();
    let Position::OnSegment { segment, .. } = state.position else {
        panic!("half-way through the trip should be on a segment");
    };

    let version = p.traffic().resample(Some(2)).version();
    let rerouted = dispatcher.reroute(&state).unwrap().into_route().unwrap();
    assert!(rerouted.feasible);
    assert_eq!(rerouted.legs[0].segment, segment);
    assert_eq!(rerouted.path.last(), Some(&64));
    assert_eq!(rerouted.traffic_version, version);
}

#[test]
fn test_turns_back_when_the_road_ahead_is_closed() {
    // A → B, B → A, and B → C closed
    let mut closed = segment(3, 2, 3, 150.0, "primary", 2);
    closed.closed = Some(true);
    let raw = RawGraph {
        nodes: vec![
            RawNode { id: 1, lat: 0.0, lon: 0.0 },
            RawNode { id: 2, lat: 0.0, lon: 0.001 },
            RawNode { id: 3, lat: 0.0, lon: 0.002 },
        ],
        segments: vec![
            segment(1, 1, 2, 150.0, "primary", 2),
            segment(2, 2, 1, 150.0, "primary", 2),
            closed,
        ],
    };
    let p = Arc::new(planner(raw, free_flow()));
    let dispatcher = Dispatcher::new(Arc::clone(&p));

    let state = siren_route::VehicleState {
        vehicle_id: "amb-3".into(),
        vehicle_type: "ambulance".into(),
        position: Position::OnSegment {
            segment: 1,
            progress: 0.5,
        },
        target: 1,
    };
    let result = dispatcher.reroute(&state).unwrap().into_route().unwrap();
    assert!(result.feasible, "{:?}", result.reason_if_infeasible);
    assert_eq!(result.path, vec![1, 2, 1]);
    assert_eq!(result.legs[1].turn, Some(TurnClass::UTurn));
    // 4.5 s to B, 30 s U-turn, 9 s back
    assert!((result.travel_time_s - 43.5).abs() < 1e-9);

    // police may use the closed road, so it goes on to C instead of turning
    let police = route(&p, &RouteRequest::new("pol-3", "police", 1, 3));
    assert_eq!(police.path, vec![1, 2, 3]);
    assert!(police.legs.iter().all(|leg| leg.turn != Some(TurnClass::UTurn)));
}

#[test]
fn test_newer_request_cancels_the_one_in_flight() {
    // the isolated target forces full sweeps at every level
    let mut raw = grid(150, 6);
    raw.nodes.push(RawNode {
        id: 1_000_000,
        lat: 47.0,
        lon: 10.0,
    });
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(planner(raw, free_flow()))));

    let slow = {
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            dispatcher.submit(
                &RouteRequest::new("amb-4", "ambulance", 1, 1_000_000)
                    .with_algorithm(AlgorithmChoice::Dijkstra),
            )
        })
    };
    while dispatcher.in_flight() == 0 && !slow.is_finished() {
        std::thread::yield_now();
    }

    let fresh = dispatcher
        .submit(&RouteRequest::new("amb-4", "ambulance", 1, 152))
        .unwrap()
        .into_route()
        .expect("latest request is never superseded");
    assert!(fresh.feasible);
    assert_eq!(fresh.path.last(), Some(&152));

    assert_eq!(slow.join().unwrap().unwrap(), PlanOutcome::Cancelled);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[test]
fn test_resampling_during_search_never_splits_a_level() {
    let p = Arc::new(planner(grid(20, 9), fixed_traffic(9)));
    let stop = Arc::new(AtomicBool::new(false));
    let resampler = {
        let p = Arc::clone(&p);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut published = 0u64;
            loop {
                p.traffic().resample(None);
                published += 1;
                if stop.load(Ordering::Relaxed) {
                    return published;
                }
            }
        })
    };

    for (from, to) in [(1, 400), (20, 381), (150, 260), (400, 1)] {
        let request = RouteRequest::new("amb-5", "ambulance", from, to)
            .with_algorithm(AlgorithmChoice::Best);
        let result = route(&p, &request);
        assert!(result.feasible);

        // all three algorithms at the winning level saw the same snapshot
        let costs: Vec<f64> = result
            .attempts
            .iter()
            .filter(|a| a.level == result.constraint_level)
            .filter_map(|a| a.cost)
            .collect();
        assert_eq!(costs.len(), 3, "{from}->{to}: {:?}", result.attempts);
        for cost in costs {
            assert!(
                (cost - result.cost).abs() < 1e-6,
                "{from}->{to}: {cost} vs {}",
                result.cost
            );
        }
    }

    stop.store(true, Ordering::Relaxed);
    assert!(resampler.join().unwrap() >= 1);
    assert!(p.traffic().snapshot().version() > 1);
}

#[test]
fn test_load_graph_and_config_from_files() {
    let mut graph_file = tempfile::NamedTempFile::new().unwrap();
    write!(graph_file, "{}", serde_json::to_string(&diamond(0)).unwrap()).unwrap();

    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        config_file,
        "[traffic]\nmax_multiplier = 1.0\n\n[turns]\nmoderate_s = 8.0\n\n[profiles.police]\nclosed_road_allowed = false"
    )
    .unwrap();

    let road = RoadGraph::load(graph_file.path()).unwrap();
    let config = RouterConfig::load(config_file.path()).unwrap();
    let p = RoutePlanner::new(road, config).unwrap();

    // police now respects the closure and pays the configured turn
    let police = route(&p, &RouteRequest::new("p1", "police", 1, 4));
    assert_eq!(police.path, vec![1, 3, 4]);
    assert!((police.travel_time_s - 35.0).abs() < 1e-9);

    let mut broken = tempfile::NamedTempFile::new().unwrap();
    write!(broken, "{{\"nodes\": [").unwrap();
    assert!(RoadGraph::load(broken.path()).is_err());
}
