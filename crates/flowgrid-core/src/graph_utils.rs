use crate::{BusId, Network};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeSet, VecDeque};

/// Labels connected components (breadth-first search) over in-service
/// branches only.
///
/// Islands are returned ordered by their smallest bus id. Buses with no
/// in-service branch form single-bus islands.
pub fn find_islands(network: &Network) -> Vec<BTreeSet<BusId>> {
    let mut visited = BTreeSet::new();
    let mut islands = Vec::new();

    for bus in network.buses() {
        if visited.contains(&bus.id) {
            continue;
        }
        let island = bfs_from(network, bus.id);
        visited.extend(island.iter().copied());
        islands.push(island);
    }

    islands
}

/// The island holding `bus`, or `None` if the bus is not in the network.
pub fn island_containing(network: &Network, bus: BusId) -> Option<BTreeSet<BusId>> {
    network.contains_bus(bus).then(|| bfs_from(network, bus))
}

fn bfs_from(network: &Network, start: BusId) -> BTreeSet<BusId> {
    let mut island = BTreeSet::new();
    let Some(start_node) = network.bus_node(start) else {
        return island;
    };

    let mut queue = VecDeque::new();
    island.insert(start);
    queue.push_back(start_node);

    while let Some(node) = queue.pop_front() {
        for edge in network.graph.edges(node) {
            if !edge.weight().in_service {
                continue;
            }
            let neighbor = if edge.source() == node {
                edge.target()
            } else {
                edge.source()
            };
            if island.insert(network.graph[neighbor].id) {
                queue.push_back(neighbor);
            }
        }
    }

    island
}
