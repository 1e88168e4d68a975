///! CLI commands for siren-route

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::RouterConfig;
use crate::dispatch::Dispatcher;
use crate::graph::RoadGraph;
use crate::planner::{PlanOutcome, Position, RoutePlanner, RouteRequest, RouteResult};
use crate::progress::TripProgress;
use crate::record::{render_directions, RecordWriter};
use crate::search::AlgorithmChoice;

#[derive(Parser)]
#[command(name = "siren-route")]
#[command(about = "Emergency vehicle routing with turn costs and constraint relaxation", long_about = None)]
pub struct Cli {
    /// Router configuration (TOML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan a single route
    Route {
        /// Road graph JSON file
        #[arg(short, long)]
        graph: PathBuf,

        /// Vehicle type (ambulance, fire_engine, police)
        #[arg(long)]
        vehicle: String,

        /// Start: node id or "lat,lon"
        #[arg(long)]
        from: String,

        /// Target node id
        #[arg(long)]
        to: u64,

        /// dijkstra, astar, bidirectional_astar or best
        #[arg(long)]
        algorithm: Option<AlgorithmChoice>,

        /// Vehicle id recorded with the result
        #[arg(long, default_value = "cli")]
        id: String,

        /// Fixed traffic seed (overrides the config)
        #[arg(long)]
        seed: Option<u64>,

        /// Append the result to this JSON-lines file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print turn-by-turn directions on stderr
        #[arg(long)]
        directions: bool,
    },

    /// Plan a JSON array of requests in parallel
    Batch {
        /// Road graph JSON file
        #[arg(short, long)]
        graph: PathBuf,

        /// JSON file with an array of route requests
        #[arg(short, long)]
        requests: PathBuf,

        /// Fixed traffic seed (overrides the config)
        #[arg(long)]
        seed: Option<u64>,

        /// Append results to this JSON-lines file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize a road graph and its edge-based graph
    Inspect {
        /// Road graph JSON file
        #[arg(short, long)]
        graph: PathBuf,
    },

    /// Drive a planned route, rerouting part-way under fresh traffic
    Simulate {
        /// Road graph JSON file
        #[arg(short, long)]
        graph: PathBuf,

        #[arg(long)]
        vehicle: String,

        /// Start: node id or "lat,lon"
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: u64,

        /// Seconds between position updates
        #[arg(long, default_value = "10")]
        step_s: f64,

        /// Resample traffic and reroute after this many seconds
        #[arg(long)]
        reroute_after: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Node id or "lat,lon"
pub fn parse_position(s: &str) -> Result<Position> {
    if let Some((lat, lon)) = s.split_once(',') {
        let lat = lat.trim().parse::<f64>().with_context(|| format!("invalid latitude in '{s}'"))?;
        let lon = lon.trim().parse::<f64>().with_context(|| format!("invalid longitude in '{s}'"))?;
        return Ok(Position::Coordinate { lat, lon });
    }
    let node = s
        .trim()
        .parse::<u64>()
        .with_context(|| format!("start must be a node id or 'lat,lon', got '{s}'"))?;
    Ok(Position::AtNode { node })
}

fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<RouterConfig> {
    let mut config = match path {
        Some(path) => RouterConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RouterConfig::default(),
    };
    if seed.is_some() {
        config.traffic.seed = seed;
    }
    Ok(config)
}

fn load_planner(graph: &Path, config: RouterConfig) -> Result<RoutePlanner> {
    let road = RoadGraph::load(graph)
        .with_context(|| format!("Failed to load road graph {}", graph.display()))?;
    Ok(RoutePlanner::new(road, config)?)
}

fn record_sink(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    })
}

fn summarize(result: &RouteResult) {
    if result.feasible {
        eprintln!(
            "{} ({}): {:.0} m, {:.1} s, level {}, {} ({} nodes expanded)",
            result.vehicle_id,
            result.vehicle_type,
            result.distance_m,
            result.travel_time_s,
            result.constraint_level,
            result.algorithm,
            result.expanded
        );
    } else {
        eprintln!(
            "{} ({}): no route ({:?})",
            result.vehicle_id, result.vehicle_type, result.reason_if_infeasible
        );
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Route {
            graph,
            vehicle,
            from,
            to,
            algorithm,
            id,
            seed,
            output,
            directions,
        } => {
            let planner = load_planner(&graph, load_config(config_path, seed)?)?;
            let mut request = RouteRequest::new(&id, &vehicle, 0, to);
            request.start = parse_position(&from)?;
            request.algorithm = algorithm;

            let outcome = planner.plan(&request, &CancellationToken::new())?;
            let Some(result) = outcome.into_route() else {
                anyhow::bail!("route computation was cancelled");
            };

            summarize(&result);
            if directions {
                eprint!("{}", render_directions(&result));
            }
            let mut writer = RecordWriter::new(record_sink(output.as_deref())?);
            writer.write(&result)?;
            writer.flush()?;
        }

        Commands::Batch {
            graph,
            requests,
            seed,
            output,
        } => {
            let planner = load_planner(&graph, load_config(config_path, seed)?)?;
            let text = std::fs::read_to_string(&requests)
                .with_context(|| format!("Failed to read {}", requests.display()))?;
            let requests: Vec<RouteRequest> =
                serde_json::from_str(&text).context("Failed to parse route requests")?;

            let dispatcher = Dispatcher::new(Arc::new(planner));
            let mut writer = RecordWriter::new(record_sink(output.as_deref())?);
            let mut failed = 0usize;

            for (request, outcome) in requests.iter().zip(dispatcher.plan_batch(&requests)) {
                match outcome {
                    Ok(PlanOutcome::Route(result)) => writer.write(&result)?,
                    Ok(PlanOutcome::Cancelled) => {
                        tracing::warn!(vehicle = %request.vehicle_id, "superseded within the batch");
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::error!(vehicle = %request.vehicle_id, error = %e, "request failed");
                    }
                }
            }
            writer.flush()?;
            eprintln!("{} routes written, {} failed", writer.written(), failed);
        }

        Commands::Inspect { graph } => {
            let planner = load_planner(&graph, load_config(config_path, None)?)?;
            let data = planner.data();
            let ebg = &data.ebg;

            println!("=== Road graph ===");
            println!("  Nodes:     {}", data.road.node_count());
            println!("  Segments:  {}", data.road.segment_count());
            println!("  Hash:      {}", data.road.content_hash());
            println!();
            println!("=== Edge-based graph ===");
            println!("  Routing nodes: {}", ebg.n_nodes());
            println!("  Turns:         {}", ebg.n_turns());
            println!(
                "  Max speed:     {:.1} km/h",
                ebg.max_straight_speed_mps() * 3.6
            );
            for (class, count) in ebg.class_histogram() {
                println!("    {:<9} {}", class.name(), count);
            }
            let terminal = (0..ebg.n_nodes() as u32)
                .filter(|&seg| ebg.is_terminal(seg))
                .count();
            println!("  Dead ends:     {terminal}");
        }

        Commands::Simulate {
            graph,
            vehicle,
            from,
            to,
            step_s,
            reroute_after,
            seed,
        } => {
            if !step_s.is_finite() || step_s <= 0.0 {
                anyhow::bail!("--step-s must be positive, got {step_s}");
            }
            let planner = Arc::new(load_planner(&graph, load_config(config_path, seed)?)?);
            let dispatcher = Dispatcher::new(Arc::clone(&planner));

            let mut request = RouteRequest::new("sim", &vehicle, 0, to);
            request.start = parse_position(&from)?;
            let Some(mut route) = dispatcher.submit(&request)?.into_route() else {
                anyhow::bail!("route computation was cancelled");
            };
            summarize(&route);

            let data = planner.data();
            let mut trip = TripProgress::new(&data.road, &route)?;
            let mut clock = 0.0;
            let mut pending_reroute = reroute_after;
            let stdout = io::stdout();
            let mut out = stdout.lock();

            loop {
                let update = trip.advance(step_s);
                clock += step_s;
                serde_json::to_writer(&mut out, &update)?;
                writeln!(out)?;
                if update.arrived {
                    break;
                }

                if pending_reroute.is_some_and(|at| clock >= at) {
                    pending_reroute = None;
                    let version = planner.traffic().resample(None).version();
                    tracing::info!(clock_s = clock, traffic_version = version, "rerouting under new traffic");
                    let Some(next) = dispatcher.reroute(&trip.vehicle_state())?.into_route() else {
                        anyhow::bail!("reroute was cancelled");
                    };
                    summarize(&next);
                    route = next;
                    trip = TripProgress::new(&data.road, &route)?;
                }
            }
            eprintln!("Arrived after {clock:.0} s (final leg plan {:.1} s)", route.travel_time_s);
        }
    }

    Ok(())
}
