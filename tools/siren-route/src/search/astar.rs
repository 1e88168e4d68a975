use super::dijkstra::label_setting;
use super::{SearchContext, SearchOutcome, SearchQuery};

/// A* with h(e) = straight-line distance from e's head to the target over the
/// heuristic speed bound.
///
/// The bound is at least the fastest straight-line progress any segment
/// allows, and every segment costs at least its free-flow time, so h never
/// overestimates and satisfies the triangle inequality across each turn.
pub fn astar(ctx: &SearchContext<'_>, query: &SearchQuery) -> SearchOutcome {
    let target = query.target_node;
    label_setting(ctx, query, |seg| ctx.estimate(ctx.head(seg), target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintLevel;
    use crate::profiles::VehicleKind;
    use crate::search::dijkstra;
    use crate::search::test_util::{diamond, grid, Fixture};
    use crate::search::EdgeFilter;

    #[test]
    fn test_matches_dijkstra_on_diamond() {
        for kind in VehicleKind::all() {
            let fx = Fixture::new(diamond(), *kind);
            let ctx = fx.ctx(EdgeFilter::Level(ConstraintLevel::Full));
            let query = fx.query(1, 4);
            assert_eq!(astar(&ctx, &query).cost(), dijkstra(&ctx, &query).cost(), "{kind}");
        }
    }

    #[test]
    fn test_parity_and_fewer_expansions_on_grid() {
        let fx = Fixture::new(grid(12, 42), VehicleKind::Ambulance);
        let ctx = fx.ctx(EdgeFilter::Level(ConstraintLevel::NoLanes));
        let query = fx.query(1, 144);

        let slow = dijkstra(&ctx, &query);
        let fast = astar(&ctx, &query);
        let (a, b) = (slow.cost().unwrap(), fast.cost().unwrap());
        assert!((a - b).abs() < 1e-6, "dijkstra {a} vs astar {b}");
        assert!(
            fast.expanded() <= slow.expanded(),
            "astar expanded {} > dijkstra {}",
            fast.expanded(),
            slow.expanded()
        );
    }

    #[test]
    fn test_infinite_bound_degrades_to_dijkstra() {
        let fx = Fixture::new(diamond(), VehicleKind::Police);
        let mut ctx = fx.ctx(EdgeFilter::Unconstrained);
        ctx.heuristic_speed_mps = f64::INFINITY;
        let query = fx.query(1, 4);
        assert_eq!(astar(&ctx, &query), dijkstra(&ctx, &query));
    }
}
