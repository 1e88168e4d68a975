//! Route records and turn-by-turn directions
//!
//! Records are append-only JSON lines, one per result. Non-finite costs of
//! infeasible results serialize as `null`.

use serde::Serialize;
use siren_common::Result;
use std::io::Write;

use crate::ebg::TurnClass;
use crate::graph::RoadType;
use crate::planner::{RouteLeg, RouteResult};

/// Serialize one result as a single JSON line (no trailing newline)
pub fn to_json_line(result: &RouteResult) -> Result<String> {
    Ok(serde_json::to_string(result)?)
}

/// Appends one JSON line per route result
pub struct RecordWriter<W: Write> {
    out: W,
    written: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write(&mut self, result: &RouteResult) -> Result<()> {
        serde_json::to_writer(&mut self.out, result)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Direction {
    pub instruction: String,
    pub road: String,
    pub road_type: RoadType,
    pub turn: Option<TurnClass>,
    pub length_m: f64,
    pub time_s: f64,
    pub speed_kph: f64,
}

fn road_label(leg: &RouteLeg) -> String {
    match &leg.name {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => format!("unnamed {} road", leg.road_type.name()),
    }
}

fn turn_phrase(turn: TurnClass) -> &'static str {
    match turn {
        TurnClass::Straight => "Continue straight onto",
        TurnClass::Slight => "Bear slightly onto",
        TurnClass::Moderate => "Turn onto",
        TurnClass::Sharp => "Turn sharply onto",
        TurnClass::UTurn => "Make a U-turn onto",
    }
}

/// Turn-by-turn steps. Consecutive legs on the same named road joined by a
/// straight movement collapse into one "Continue on" step.
pub fn directions(result: &RouteResult) -> Vec<Direction> {
    let mut steps: Vec<Direction> = Vec::new();

    for leg in &result.legs {
        let road = road_label(leg);
        if let Some(last) = steps.last_mut() {
            let same_road = leg.name.is_some() && last.road == road;
            if same_road && matches!(leg.turn, Some(TurnClass::Straight) | None) {
                last.length_m += leg.length_m;
                last.time_s += leg.time_s;
                last.instruction = format!("Continue on {road}");
                continue;
            }
        }

        let instruction = match leg.turn {
            None => format!("Take {road}"),
            Some(turn) => format!("{} {road}", turn_phrase(turn)),
        };
        steps.push(Direction {
            instruction,
            road,
            road_type: leg.road_type,
            turn: leg.turn,
            length_m: leg.length_m,
            time_s: leg.time_s,
            speed_kph: leg.speed_kph,
        });
    }
    steps
}

/// Human-readable listing of `directions`
pub fn render_directions(result: &RouteResult) -> String {
    let mut out = String::new();
    for (i, step) in directions(result).iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {} ({}, {:.0} m, {:.0} km/h)\n",
            i + 1,
            step.instruction,
            step.road_type.name(),
            step.length_m,
            step.speed_kph
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::RouterConfig;
    use crate::graph::{RawGraph, RawNode, RawSegment, RoadGraph};
    use crate::planner::{RoutePlanner, RouteRequest};
    use crate::search::test_util::diamond;
    use crate::traffic::TrafficConfig;

    fn plan(raw: RawGraph, request: RouteRequest) -> RouteResult {
        let config = RouterConfig {
            traffic: TrafficConfig {
                max_multiplier: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let planner = RoutePlanner::new(RoadGraph::from_raw(raw).unwrap(), config).unwrap();
        planner
            .plan(&request, &CancellationToken::new())
            .unwrap()
            .into_route()
            .unwrap()
    }

    /// Straight east along "Main St" for two segments, then north on "Oak Ave"
    fn street() -> RawGraph {
        let named = |id, s, t, name: &str| RawSegment {
            name: Some(name.to_string()),
            road_type: Some("secondary".into()),
            lanes: Some(2),
            ..RawSegment::new(id, s, t)
        };
        RawGraph {
            nodes: vec![
                RawNode { id: 1, lat: 0.0, lon: 0.0 },
                RawNode { id: 2, lat: 0.0, lon: 0.001 },
                RawNode { id: 3, lat: 0.0, lon: 0.002 },
                RawNode { id: 4, lat: 0.001, lon: 0.0025 },
            ],
            segments: vec![
                named(1, 1, 2, "Main St"),
                named(2, 2, 3, "Main St"),
                named(3, 3, 4, "Oak Ave"),
            ],
        }
    }

    #[test]
    fn test_directions_merge_same_road() {
        let result = plan(street(), RouteRequest::new("a1", "ambulance", 1, 4));
        let steps = directions(&result);

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].instruction, "Continue on Main St");
        assert!((steps[0].length_m - result.legs[0].length_m - result.legs[1].length_m).abs() < 1e-9);
        assert_eq!(steps[1].instruction, "Turn onto Oak Ave");
        assert_eq!(steps[1].turn, Some(TurnClass::Moderate));

        let text = render_directions(&result);
        assert!(text.starts_with(" 1. Continue on Main St (secondary"), "got: {text}");
    }

    #[test]
    fn test_unnamed_roads_get_a_label() {
        let result = plan(diamond(), RouteRequest::new("p1", "police", 1, 4));
        let steps = directions(&result);
        assert_eq!(steps[0].instruction, "Take unnamed primary road");
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_records_are_json_lines() {
        let ok = plan(diamond(), RouteRequest::new("a1", "ambulance", 1, 4));
        let stuck = plan(diamond(), RouteRequest::new("a2", "ambulance", 4, 1));

        let mut buf = Vec::new();
        let mut writer = RecordWriter::new(&mut buf);
        writer.write(&ok).unwrap();
        writer.write(&stuck).unwrap();
        assert_eq!(writer.written(), 2);
        drop(writer);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["vehicle_id"], "a1");
        assert_eq!(first["algorithm"], "astar");
        assert_eq!(first["constraint_level"], 0);
        assert_eq!(first["path"], serde_json::json!([1, 3, 4]));

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["feasible"], false);
        assert_eq!(second["cost"], serde_json::Value::Null);
        assert_eq!(second["reason_if_infeasible"], "no_feasible_route_found");
        assert_eq!(second["constraint_level"], 3);
    }
}
