//! Label-setting search shared by Dijkstra and A*
//!
//! Keys are `g + potential(node)`. With a zero potential this is plain
//! Dijkstra; with a consistent potential it is A* and every popped node is
//! final, so the first popped target segment is optimal.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{trace_back, Frontier, Label, SearchContext, SearchOutcome, SearchQuery};

pub fn dijkstra(ctx: &SearchContext<'_>, query: &SearchQuery) -> SearchOutcome {
    label_setting(ctx, query, |_| 0.0)
}

pub(super) fn label_setting<P>(
    ctx: &SearchContext<'_>,
    query: &SearchQuery,
    potential: P,
) -> SearchOutcome
where
    P: Fn(u32) -> f64,
{
    let mut labels: FxHashMap<u32, Label> = FxHashMap::default();
    let mut settled: FxHashSet<u32> = FxHashSet::default();
    let mut frontier = Frontier::new();

    for source in &query.sources {
        if !ctx.admits(source.seg) {
            continue;
        }
        let g = source.remaining * ctx.weight(source.seg);
        let better = labels.get(&source.seg).map_or(true, |l| g < l.g);
        if better {
            labels.insert(source.seg, Label { g, parent: None });
            frontier.push(source.seg, g + potential(source.seg));
        }
    }

    let mut expanded = 0usize;
    while let Some((seg, _key)) = frontier.pop() {
        if ctx.is_cancelled() {
            return SearchOutcome::Cancelled;
        }
        settled.insert(seg);
        expanded += 1;

        let g = match labels.get(&seg) {
            Some(label) => label.g,
            None => continue,
        };

        if ctx.head(seg) == query.target_node {
            return SearchOutcome::Found {
                segments: trace_back(&labels, seg),
                cost: g,
                expanded,
            };
        }

        for turn in ctx.ebg.turns(seg) {
            let next = turn.to;
            if settled.contains(&next) || !ctx.admits(next) || !ctx.allows_turn(seg, turn) {
                continue;
            }
            let candidate = g + turn.cost_s + ctx.weight(next);
            let improves = labels.get(&next).map_or(true, |l| candidate < l.g);
            if improves {
                labels.insert(
                    next,
                    Label {
                        g: candidate,
                        parent: Some(seg),
                    },
                );
                frontier.push(next, candidate + potential(next));
            }
        }
    }

    SearchOutcome::NoPath { expanded }
}
