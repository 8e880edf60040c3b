//! Shortest-path resolution over a topology snapshot.
//!
//! Dijkstra over the switch graph, weight 1 per link by default (hop-count
//! minimisation). Resolution is deterministic: the frontier is ordered by
//! `(cost, dpid)` and adjacency lists are pre-sorted by
//! `(to_dpid, from_port)`, so equal-cost candidates always resolve the same
//! way. "No route" is an ordinary outcome, reported as an empty hop list.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::view::{Link, TopologySnapshot};

/// One step of a resolved path: the switch to traverse and the ports to
/// enter and leave it by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    /// Datapath identifier of the switch.
    pub dpid: u64,
    /// Ingress port on this switch.
    pub in_port: u16,
    /// Egress port on this switch.
    pub out_port: u16,
}

/// Resolve a path and hand it to `callback` together with `user_data`.
///
/// The callback is invoked exactly once, synchronously, on the calling
/// thread. It owns the hop list; an unroutable pair yields an empty list.
pub fn resolve_path<U>(
    snapshot: &TopologySnapshot,
    in_dpid: u64,
    in_port: u16,
    out_dpid: u64,
    out_port: u16,
    user_data: U,
    callback: impl FnOnce(U, Vec<Hop>),
) {
    let hops = shortest_path(snapshot, in_dpid, in_port, out_dpid, out_port);
    callback(user_data, hops);
}

/// Shortest path by hop count from `(in_dpid, in_port)` to
/// `(out_dpid, out_port)`.
///
/// The first hop enters at `in_port`, the last hop leaves at `out_port`,
/// every adjacent pair of hops is connected by an up link in the snapshot,
/// and no switch appears twice. The endpoint ports themselves need not be
/// link endpoints; they are usually host-facing. Returns an empty vec when
/// no route exists.
#[must_use]
pub fn shortest_path(
    snapshot: &TopologySnapshot,
    in_dpid: u64,
    in_port: u16,
    out_dpid: u64,
    out_port: u16,
) -> Vec<Hop> {
    shortest_path_with(snapshot, in_dpid, in_port, out_dpid, out_port, |_| 1)
}

/// [`shortest_path`] with a caller-supplied per-link weight.
///
/// Weights must be positive for the search to terminate with a minimal
/// path; ties are still broken by `(to_dpid, from_port)` ascending.
#[must_use]
pub fn shortest_path_with(
    snapshot: &TopologySnapshot,
    in_dpid: u64,
    in_port: u16,
    out_dpid: u64,
    out_port: u16,
    weight: impl Fn(&Link) -> u32,
) -> Vec<Hop> {
    if !endpoint_usable(snapshot, in_dpid) || !endpoint_usable(snapshot, out_dpid) {
        tracing::debug!(in_dpid, out_dpid, "path endpoint missing or down");
        return Vec::new();
    }

    if in_dpid == out_dpid {
        return vec![Hop { dpid: in_dpid, in_port, out_port }];
    }

    // Dijkstra. `predecessor` records the link each switch was first
    // reached over; strict-improvement relaxation plus the sorted frontier
    // and adjacency make the choice deterministic.
    let mut cost: HashMap<u64, u64> = HashMap::new();
    let mut predecessor: HashMap<u64, Link> = HashMap::new();
    let mut visited: HashSet<u64> = HashSet::new();
    let mut frontier: BinaryHeap<Reverse<(u64, u64)>> = BinaryHeap::new();

    cost.insert(in_dpid, 0);
    frontier.push(Reverse((0, in_dpid)));

    while let Some(Reverse((dpid_cost, dpid))) = frontier.pop() {
        if !visited.insert(dpid) {
            continue;
        }
        if dpid == out_dpid {
            break;
        }

        for link in snapshot.links_from(dpid) {
            if !link.up || visited.contains(&link.to_dpid) {
                continue;
            }
            let usable = snapshot.switch(link.to_dpid).is_some_and(|s| s.up);
            if !usable {
                continue;
            }

            let candidate = dpid_cost + u64::from(weight(link));
            let improves = cost.get(&link.to_dpid).is_none_or(|&known| candidate < known);
            if improves {
                cost.insert(link.to_dpid, candidate);
                predecessor.insert(link.to_dpid, *link);
                frontier.push(Reverse((candidate, link.to_dpid)));
            }
        }
    }

    if !visited.contains(&out_dpid) {
        tracing::debug!(in_dpid, out_dpid, "no route between switches");
        return Vec::new();
    }

    let links = backtrack(&predecessor, in_dpid, out_dpid);
    materialise_hops(&links, in_dpid, in_port, out_dpid, out_port)
}

fn endpoint_usable(snapshot: &TopologySnapshot, dpid: u64) -> bool {
    snapshot.switch(dpid).is_some_and(|s| s.up)
}

/// Walk predecessor links from sink back to source and return them in
/// source-to-sink order.
fn backtrack(predecessor: &HashMap<u64, Link>, in_dpid: u64, out_dpid: u64) -> Vec<Link> {
    let mut links = Vec::new();
    let mut current = out_dpid;
    while current != in_dpid {
        let Some(link) = predecessor.get(&current) else {
            // Unreachable given the visited check above; treat as no route.
            return Vec::new();
        };
        links.push(*link);
        current = link.from_dpid;
    }
    links.reverse();
    links
}

/// Turn a source-to-sink link chain into hop records. Each intermediate hop
/// enters at the predecessor link's ingress port and leaves at the next
/// link's egress port; the terminal ports are the caller's.
fn materialise_hops(
    links: &[Link],
    in_dpid: u64,
    in_port: u16,
    out_dpid: u64,
    out_port: u16,
) -> Vec<Hop> {
    if links.is_empty() {
        return Vec::new();
    }
    debug_assert_eq!(links[0].from_dpid, in_dpid);

    let mut hops = Vec::with_capacity(links.len() + 1);
    let mut ingress = in_port;
    for link in links {
        hops.push(Hop { dpid: link.from_dpid, in_port: ingress, out_port: link.from_port });
        ingress = link.to_port;
    }
    hops.push(Hop { dpid: out_dpid, in_port: ingress, out_port });

    tracing::debug!(in_dpid, out_dpid, hops = hops.len(), "resolved path");
    hops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::SnapshotBuilder;

    fn hop(dpid: u64, in_port: u16, out_port: u16) -> Hop {
        Hop { dpid, in_port, out_port }
    }

    /// Two switches joined in both directions over the given ports.
    fn wire(
        builder: SnapshotBuilder,
        a: u64,
        a_port: u16,
        b: u64,
        b_port: u16,
    ) -> SnapshotBuilder {
        builder.add_link(a, a_port, b, b_port).add_link(b, b_port, a, a_port)
    }

    #[test]
    fn single_switch_path_uses_the_supplied_ports() {
        let snapshot = TopologySnapshot::builder()
            .add_switch(1)
            .add_port(1, 10, true)
            .add_port(1, 20, true)
            .build();

        let hops = shortest_path(&snapshot, 1, 10, 1, 20);

        assert_eq!(hops, vec![hop(1, 10, 20)]);
    }

    #[test]
    fn two_hop_chain_is_resolved_end_to_end() {
        let builder = TopologySnapshot::builder().add_switch(1).add_switch(2).add_switch(3);
        let builder = wire(builder, 1, 2, 2, 1);
        let snapshot = wire(builder, 2, 2, 3, 1).build();

        let hops = shortest_path(&snapshot, 1, 100, 3, 200);

        assert_eq!(hops, vec![hop(1, 100, 2), hop(2, 1, 2), hop(3, 1, 200)]);
    }

    #[test]
    fn disconnected_switches_yield_an_empty_path() {
        let snapshot = TopologySnapshot::builder().add_switch(1).add_switch(2).build();

        let hops = shortest_path(&snapshot, 1, 10, 2, 20);

        assert!(hops.is_empty());
    }

    #[test]
    fn unknown_endpoint_yields_an_empty_path() {
        let snapshot = TopologySnapshot::builder().add_switch(1).build();

        assert!(shortest_path(&snapshot, 1, 10, 9, 20).is_empty());
        assert!(shortest_path(&snapshot, 9, 10, 1, 20).is_empty());
    }

    #[test]
    fn down_endpoint_yields_an_empty_path() {
        let builder =
            TopologySnapshot::builder().add_switch(1).add_switch_with_status(2, false);
        let snapshot = wire(builder, 1, 1, 2, 1).build();

        assert!(shortest_path(&snapshot, 1, 10, 2, 20).is_empty());
    }

    #[test]
    fn down_links_are_not_traversed() {
        let snapshot = TopologySnapshot::builder()
            .add_switch(1)
            .add_switch(2)
            .add_link_with_status(1, 1, 2, 1, false)
            .build();

        assert!(shortest_path(&snapshot, 1, 10, 2, 20).is_empty());
    }

    #[test]
    fn down_transit_switch_forces_the_detour() {
        // 1 - 2 - 4 is shorter, but 2 is down; 1 - 3 - 5 - 4 must win.
        let builder = TopologySnapshot::builder()
            .add_switch(1)
            .add_switch_with_status(2, false)
            .add_switch(3)
            .add_switch(4)
            .add_switch(5);
        let builder = wire(builder, 1, 1, 2, 1);
        let builder = wire(builder, 2, 2, 4, 1);
        let builder = wire(builder, 1, 2, 3, 1);
        let builder = wire(builder, 3, 2, 5, 1);
        let snapshot = wire(builder, 5, 2, 4, 2).build();

        let hops = shortest_path(&snapshot, 1, 100, 4, 200);

        assert_eq!(
            hops,
            vec![hop(1, 100, 2), hop(3, 1, 2), hop(5, 1, 2), hop(4, 2, 200)]
        );
    }

    #[test]
    fn equal_cost_paths_resolve_to_the_lowest_neighbour() {
        // Diamond: 1 - 2 - 4 and 1 - 3 - 4 both cost two links. The search
        // must settle on the transit with the smaller dpid.
        let builder =
            TopologySnapshot::builder().add_switch(1).add_switch(2).add_switch(3).add_switch(4);
        let builder = wire(builder, 1, 1, 2, 1);
        let builder = wire(builder, 1, 2, 3, 1);
        let builder = wire(builder, 2, 2, 4, 1);
        let snapshot = wire(builder, 3, 2, 4, 2).build();

        let hops = shortest_path(&snapshot, 1, 100, 4, 200);

        assert_eq!(hops, vec![hop(1, 100, 1), hop(2, 1, 2), hop(4, 1, 200)]);
    }

    #[test]
    fn parallel_links_resolve_to_the_lowest_egress_port() {
        let snapshot = TopologySnapshot::builder()
            .add_switch(1)
            .add_switch(2)
            .add_link(1, 7, 2, 3)
            .add_link(1, 4, 2, 9)
            .build();

        let hops = shortest_path(&snapshot, 1, 100, 2, 200);

        assert_eq!(hops, vec![hop(1, 100, 4), hop(2, 9, 200)]);
    }

    #[test]
    fn weight_function_can_steer_the_search() {
        // Same diamond as above, but the 1->2 link is made expensive.
        let builder =
            TopologySnapshot::builder().add_switch(1).add_switch(2).add_switch(3).add_switch(4);
        let builder = wire(builder, 1, 1, 2, 1);
        let builder = wire(builder, 1, 2, 3, 1);
        let builder = wire(builder, 2, 2, 4, 1);
        let snapshot = wire(builder, 3, 2, 4, 2).build();

        let hops = shortest_path_with(&snapshot, 1, 100, 4, 200, |link| {
            if link.from_dpid == 1 && link.to_dpid == 2 { 10 } else { 1 }
        });

        assert_eq!(hops, vec![hop(1, 100, 2), hop(3, 1, 2), hop(4, 2, 200)]);
    }

    #[test]
    fn callback_receives_the_user_data_and_hops_exactly_once() {
        let builder = TopologySnapshot::builder().add_switch(1).add_switch(2);
        let snapshot = wire(builder, 1, 1, 2, 1).build();

        let mut observed = None;
        resolve_path(&snapshot, 1, 10, 2, 20, "cookie", |user_data, hops| {
            observed = Some((user_data, hops));
        });

        let (user_data, hops) = observed.unwrap();
        assert_eq!(user_data, "cookie");
        assert_eq!(hops, vec![hop(1, 10, 1), hop(2, 1, 20)]);
    }
}
