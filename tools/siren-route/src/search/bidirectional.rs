//! Bidirectional A* with average potentials
//!
//! Forward labels `g_f(e)` include the cost of driving `e`. Backward labels
//! `g_b(e)` are the cost still to pay after leaving `e`, so a segment ending at
//! the target starts at 0 and any meeting segment joins as `g_f(e) + g_b(e)`.
//!
//! Both sides use potentials derived from the same two estimates:
//! `p_f(e) = (h_t(e) - h_s(e)) / 2` and `p_b(e) = -p_f(e)`, with `h_t` the
//! bound from e's head to the target and `h_s` the bound from the origin to
//! e's head. Reduced costs are then identical in both directions, which makes
//! `top_f + top_b >= mu` a sound stopping rule.

use rustc_hash::FxHashMap;

use crate::ebg::TurnEdge;

use super::{trace_back, Frontier, Label, SearchContext, SearchOutcome, SearchQuery};

pub fn bidirectional_astar(ctx: &SearchContext<'_>, query: &SearchQuery) -> SearchOutcome {
    let (origin, target) = (query.origin_node, query.target_node);
    let potential = |seg: u32| {
        let head = ctx.head(seg);
        (ctx.estimate(head, target) - ctx.estimate(origin, head)) / 2.0
    };

    let mut fwd: FxHashMap<u32, Label> = FxHashMap::default();
    let mut bwd: FxHashMap<u32, Label> = FxHashMap::default();
    let mut pq_fwd = Frontier::new();
    let mut pq_bwd = Frontier::new();

    // Best meeting point
    let mut best = f64::INFINITY;
    let mut meeting: Option<u32> = None;

    for source in &query.sources {
        if !ctx.admits(source.seg) {
            continue;
        }
        let g = source.remaining * ctx.weight(source.seg);
        if fwd.get(&source.seg).map_or(true, |l| g < l.g) {
            fwd.insert(source.seg, Label { g, parent: None });
            pq_fwd.push(source.seg, g + potential(source.seg));
        }
    }

    for &seg in ctx.road.in_segments(target) {
        if !ctx.admits(seg) {
            continue;
        }
        bwd.insert(seg, Label { g: 0.0, parent: None });
        pq_bwd.push(seg, -potential(seg));
        if let Some(f) = fwd.get(&seg) {
            if f.g < best {
                best = f.g;
                meeting = Some(seg);
            }
        }
    }

    let mut expanded = 0usize;
    loop {
        let (top_f, top_b) = match (pq_fwd.peek_key(), pq_bwd.peek_key()) {
            (Some(f), Some(b)) => (f, b),
            _ => break,
        };
        if top_f + top_b >= best {
            break;
        }
        if ctx.is_cancelled() {
            return SearchOutcome::Cancelled;
        }

        expanded += 1;
        if top_f <= top_b {
            // Forward step
            let Some((seg, _)) = pq_fwd.pop() else { break };
            let g = match fwd.get(&seg) {
                Some(label) => label.g,
                None => continue,
            };
            for turn in ctx.ebg.turns(seg) {
                let next = turn.to;
                if !ctx.admits(next) || !ctx.allows_turn(seg, turn) {
                    continue;
                }
                let candidate = g + turn.cost_s + ctx.weight(next);
                if fwd.get(&next).map_or(true, |l| candidate < l.g) {
                    fwd.insert(
                        next,
                        Label {
                            g: candidate,
                            parent: Some(seg),
                        },
                    );
                    pq_fwd.push(next, candidate + potential(next));

                    // Check meeting when updating
                    if let Some(b) = bwd.get(&next) {
                        if candidate + b.g < best {
                            best = candidate + b.g;
                            meeting = Some(next);
                        }
                    }
                }
            }
        } else {
            // Backward step: arcs prev → seg, paying for seg itself
            let Some((seg, _)) = pq_bwd.pop() else { break };
            let g = match bwd.get(&seg) {
                Some(label) => label.g,
                None => continue,
            };
            let seg_weight = ctx.weight(seg);
            for turn in ctx.ebg.reverse_turns(seg) {
                let prev = turn.to;
                if !ctx.admits(prev) {
                    continue;
                }
                let forward = TurnEdge { to: seg, ..*turn };
                if !ctx.allows_turn(prev, &forward) {
                    continue;
                }
                let candidate = g + turn.cost_s + seg_weight;
                if bwd.get(&prev).map_or(true, |l| candidate < l.g) {
                    bwd.insert(
                        prev,
                        Label {
                            g: candidate,
                            parent: Some(seg),
                        },
                    );
                    pq_bwd.push(prev, candidate - potential(prev));

                    if let Some(f) = fwd.get(&prev) {
                        if f.g + candidate < best {
                            best = f.g + candidate;
                            meeting = Some(prev);
                        }
                    }
                }
            }
        }
    }

    match meeting {
        Some(meet) => {
            // forward chain up to the meeting segment, then successors to the target
            let mut segments = trace_back(&fwd, meet);
            let mut current = meet;
            while let Some(next) = bwd.get(&current).and_then(|l| l.parent) {
                segments.push(next);
                current = next;
            }
            SearchOutcome::Found {
                segments,
                cost: best,
                expanded,
            }
        }
        None => SearchOutcome::NoPath { expanded },
    }
}
