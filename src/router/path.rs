// Path search over a channel graph snapshot
// This file implements the meet-in-the-middle breadth-first search used for
// routing and a lowest-fee alternative; both are pure functions of the graph
// and the query, exclusions included
//
// Numan Thabit 2025 Nov

use super::route::Path;
use crate::errors::RouteError;
use crate::graph::{Channel, ChannelKey, Graph, NodeId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MAX_HOPS: usize = 20;

/// How to choose among the paths that satisfy a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// First meeting point of the bidirectional search; fewest hops, fees
    /// only bounded per channel.
    #[default]
    FewestHops,
    /// Cheapest total routing fee within the hop limit.
    LowestFee,
}

#[derive(Debug, Clone)]
pub struct PathQuery {
    pub source: NodeId,
    pub target: NodeId,
    pub amount_msat: u64,
    pub exclude: HashSet<ChannelKey>,
    pub max_hops: usize,
    pub max_channel_fee_msat: u64,
    pub strategy: SearchStrategy,
}

impl PathQuery {
    pub fn new(source: NodeId, target: NodeId, amount_msat: u64) -> Self {
        Self {
            source,
            target,
            amount_msat,
            exclude: HashSet::new(),
            max_hops: DEFAULT_MAX_HOPS,
            max_channel_fee_msat: u64::MAX,
            strategy: SearchStrategy::default(),
        }
    }

    pub fn exclude(mut self, exclude: HashSet<ChannelKey>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn max_channel_fee_msat(mut self, limit: u64) -> Self {
        self.max_channel_fee_msat = limit;
        self
    }

    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn eligible(&self, edge: &Channel, amount_msat: u64) -> bool {
        edge.carries(amount_msat)
            && edge.routing_fee(amount_msat) <= self.max_channel_fee_msat
            && !self.exclude.contains(&edge.key())
    }
}

/// Per-channel fee ceiling expressed as a percentage of the amount.
pub fn channel_fee_limit(amount_msat: u64, percent: f64) -> u64 {
    (amount_msat as f64 * percent / 100.0) as u64
}

#[tracing::instrument(skip_all, fields(amount_msat = query.amount_msat, excluded = query.exclude.len(), strategy = ?query.strategy))]
pub fn get_path(graph: &Graph, query: &PathQuery) -> Result<Path, RouteError> {
    if query.source == query.target {
        return Err(RouteError::SameEndpoint);
    }
    if query.amount_msat == 0 {
        return Err(RouteError::ZeroAmount);
    }

    let found = match query.strategy {
        SearchStrategy::FewestHops => bidirectional(graph, query),
        SearchStrategy::LowestFee => lowest_fee(graph, query),
    };
    match found {
        Some(channels) => {
            debug!(hops = channels.len(), "path found");
            Ok(Path::new(channels))
        }
        None => Err(RouteError::NoPathFound),
    }
}

type Partials<'g> = HashMap<&'g NodeId, Vec<&'g Arc<Channel>>>;

/// Alternate one backward round from the target with one forward round from
/// the source. Backward partials accumulate across rounds, so a forward step
/// meets the target side at any depth already explored.
fn bidirectional(graph: &Graph, query: &PathQuery) -> Option<Vec<Arc<Channel>>> {
    let amount = query.amount_msat;
    let rounds = query.max_hops.div_ceil(2);

    let mut backward: Partials<'_> = HashMap::new();
    backward.insert(&query.target, Vec::new());
    let mut back_frontier = vec![&query.target];

    let mut forward: Partials<'_> = HashMap::new();
    forward.insert(&query.source, Vec::new());
    let mut fwd_frontier = vec![&query.source];

    for round in 1..=rounds {
        let mut next = Vec::new();
        for &node in &back_frontier {
            for edge in graph.channels_to(node) {
                let hop = &edge.source;
                if backward.contains_key(hop) || !query.eligible(edge, amount) {
                    continue;
                }
                let mut partial = Vec::with_capacity(backward[node].len() + 1);
                partial.push(edge);
                partial.extend(backward[node].iter().copied());
                backward.insert(hop, partial);
                next.push(hop);
            }
        }
        back_frontier = next;

        let mut next = Vec::new();
        let mut best: Option<Vec<&Arc<Channel>>> = None;
        for &node in &fwd_frontier {
            for edge in graph.channels_from(node) {
                let hop = &edge.destination;
                if forward.contains_key(hop) || !query.eligible(edge, amount) {
                    continue;
                }
                let mut partial = Vec::with_capacity(forward[node].len() + 1);
                partial.extend(forward[node].iter().copied());
                partial.push(edge);

                if let Some(tail) = backward.get(hop) {
                    let total = partial.len() + tail.len();
                    let shorter = best.as_ref().map_or(true, |b| total < b.len());
                    if total <= query.max_hops && shorter && disjoint(&partial, tail) {
                        let mut spliced = partial.clone();
                        spliced.extend(tail.iter().copied());
                        best = Some(spliced);
                    }
                }
                forward.insert(hop, partial);
                next.push(hop);
            }
        }
        if let Some(path) = best {
            debug!(round = round, "frontiers met");
            return Some(path.into_iter().cloned().collect());
        }
        if next.is_empty() {
            return None;
        }
        fwd_frontier = next;
    }
    None
}

/// The spliced path must not revisit a node of the forward half.
fn disjoint(head: &[&Arc<Channel>], tail: &[&Arc<Channel>]) -> bool {
    let seen: HashSet<&NodeId> = head
        .iter()
        .map(|c| &c.source)
        .chain(head.last().map(|c| &c.destination))
        .collect();
    tail.iter().all(|c| !seen.contains(&c.destination))
}

type Hop<'g> = (&'g NodeId, usize);

/// Dijkstra from the target over the amount each node has to forward, with
/// states keyed by node and hop count so that a cheap but deep entry never
/// hides a shallower one the hop limit still allows. The payer's own channel
/// charges nothing, so the first state popped that the payer has an eligible
/// channel into gives the cheapest path.
fn lowest_fee(graph: &Graph, query: &PathQuery) -> Option<Vec<Arc<Channel>>> {
    if query.max_hops == 0 {
        return None;
    }
    let mut dist: HashMap<Hop<'_>, u64> = HashMap::new();
    let mut via: HashMap<Hop<'_>, &Arc<Channel>> = HashMap::new();
    let mut heap = BinaryHeap::new();
    dist.insert((&query.target, 0), query.amount_msat);
    heap.push(Reverse((query.amount_msat, 0usize, &query.target)));

    while let Some(Reverse((amount, hops, node))) = heap.pop() {
        if dist.get(&(node, hops)).is_some_and(|&best| amount > best) {
            continue;
        }
        let inbound = graph.channels_to(node);
        if let Some(first) = inbound
            .iter()
            .find(|e| e.source == query.source && query.eligible(e, amount))
        {
            let mut path = vec![Arc::clone(first)];
            let mut cur = (node, hops);
            while cur.1 > 0 {
                let edge: &Arc<Channel> = via.get(&cur).copied()?;
                path.push(Arc::clone(edge));
                cur = (&edge.destination, cur.1 - 1);
            }
            return Some(path);
        }
        if hops + 2 > query.max_hops {
            continue;
        }
        for edge in inbound {
            if edge.source == query.source || !query.eligible(edge, amount) {
                continue;
            }
            let carried = amount.saturating_add(edge.routing_fee(amount));
            let state = (&edge.source, hops + 1);
            if dominated(&dist, state, carried) {
                continue;
            }
            dist.insert(state, carried);
            via.insert(state, edge);
            heap.push(Reverse((carried, hops + 1, &edge.source)));
        }
    }
    None
}

/// A state is dominated when the same node is already reachable in no more
/// hops for no more than `amount`. This also keeps cycles out of the result.
fn dominated(dist: &HashMap<Hop<'_>, u64>, (node, hops): Hop<'_>, amount: u64) -> bool {
    (0..=hops).any(|h| dist.get(&(node, h)).is_some_and(|&best| best <= amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{edge, node};

    fn graph(edges: Vec<Channel>) -> Graph {
        Graph::from_channels(edges)
    }

    fn scids(path: &Path) -> Vec<&str> {
        path.channels()
            .iter()
            .map(|c| c.short_channel_id.as_str())
            .collect()
    }

    #[test]
    fn single_hop() {
        let g = graph(vec![edge(1, 2, "1x1x0", 1000, 1, 6)]);
        let path = get_path(&g, &PathQuery::new(node(1), node(2), 100_000)).unwrap();
        assert_eq!(scids(&path), ["1x1x0"]);
    }

    #[test]
    fn odd_and_even_lengths_are_found() {
        let g = graph(vec![
            edge(1, 2, "1x1x0", 1, 1, 6),
            edge(2, 3, "2x1x0", 1, 1, 6),
            edge(3, 4, "3x1x0", 1, 1, 6),
            edge(4, 5, "4x1x0", 1, 1, 6),
        ]);
        for (target, len) in [(2u8, 1usize), (3, 2), (4, 3), (5, 4)] {
            let path = get_path(&g, &PathQuery::new(node(1), node(target), 1000)).unwrap();
            assert_eq!(path.len(), len, "path to node {target}");
            assert_eq!(path.channels()[0].source, node(1));
            assert_eq!(path.channels()[len - 1].destination, node(target));
        }
    }

    #[test]
    fn prefers_fewest_hops() {
        let g = graph(vec![
            edge(1, 3, "1x1x0", 0, 0, 6),
            edge(3, 4, "2x1x0", 0, 0, 6),
            edge(4, 2, "3x1x0", 0, 0, 6),
            edge(1, 5, "4x1x0", 5000, 0, 6),
            edge(5, 2, "5x1x0", 5000, 0, 6),
        ]);
        let path = get_path(&g, &PathQuery::new(node(1), node(2), 1000)).unwrap();
        assert_eq!(scids(&path), ["4x1x0", "5x1x0"]);
    }

    #[test]
    fn same_endpoint_fails_without_graph() {
        let g = graph(vec![]);
        let err = get_path(&g, &PathQuery::new(node(1), node(1), 1000)).unwrap_err();
        assert!(matches!(err, RouteError::SameEndpoint));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let g = graph(vec![edge(1, 2, "1x1x0", 1, 1, 6)]);
        let err = get_path(&g, &PathQuery::new(node(1), node(2), 0)).unwrap_err();
        assert!(matches!(err, RouteError::ZeroAmount));
    }

    #[test]
    fn excluding_the_only_edge_leaves_no_path() {
        let g = graph(vec![
            edge(1, 3, "1x1x0", 1, 1, 6),
            edge(3, 2, "2x1x0", 1, 1, 6),
        ]);
        let blocked = g.channels_from(&node(3))[0].key();
        let query = PathQuery::new(node(1), node(2), 1000).exclude(HashSet::from([blocked]));
        let err = get_path(&g, &query).unwrap_err();
        assert!(matches!(err, RouteError::NoPathFound));
    }

    #[test]
    fn excluded_edges_never_appear() {
        let g = graph(vec![
            edge(1, 3, "1x1x0", 1, 1, 6),
            edge(3, 2, "2x1x0", 1, 1, 6),
            edge(1, 4, "3x1x0", 1, 1, 6),
            edge(4, 2, "4x1x0", 1, 1, 6),
        ]);
        let first = get_path(&g, &PathQuery::new(node(1), node(2), 1000)).unwrap();
        let banned = first.channels()[1].key();
        for strategy in [SearchStrategy::FewestHops, SearchStrategy::LowestFee] {
            let query = PathQuery::new(node(1), node(2), 1000)
                .exclude(HashSet::from([banned.clone()]))
                .strategy(strategy);
            let path = get_path(&g, &query).unwrap();
            assert!(!path.contains(&banned));
        }
    }

    #[test]
    fn htlc_maximum_is_respected() {
        let mut narrow = edge(1, 2, "1x1x0", 1, 1, 6);
        narrow.htlc_max_msat = 1_000_000;
        let g = graph(vec![
            narrow,
            edge(1, 3, "2x1x0", 1, 1, 6),
            edge(3, 2, "3x1x0", 1, 1, 6),
        ]);
        let path = get_path(&g, &PathQuery::new(node(1), node(2), 2_000_000)).unwrap();
        assert_eq!(scids(&path), ["2x1x0", "3x1x0"]);

        let small = get_path(&g, &PathQuery::new(node(1), node(2), 500_000)).unwrap();
        assert_eq!(scids(&small), ["1x1x0"]);
    }

    #[test]
    fn channel_fee_limit_filters_edges() {
        let g = graph(vec![
            edge(1, 2, "1x1x0", 1, 1, 6),
            edge(2, 3, "2x1x0", 10_000, 0, 6),
        ]);
        let query = PathQuery::new(node(1), node(3), 100_000)
            .max_channel_fee_msat(channel_fee_limit(100_000, 0.5));
        assert!(matches!(get_path(&g, &query), Err(RouteError::NoPathFound)));
    }

    #[test]
    fn hop_limit_bounds_path_length() {
        let g = graph(vec![
            edge(1, 2, "1x1x0", 1, 1, 6),
            edge(2, 3, "2x1x0", 1, 1, 6),
            edge(3, 4, "3x1x0", 1, 1, 6),
        ]);
        let query = PathQuery::new(node(1), node(4), 1000).max_hops(2);
        assert!(matches!(get_path(&g, &query), Err(RouteError::NoPathFound)));
        let query = query.max_hops(3);
        assert_eq!(get_path(&g, &query).unwrap().len(), 3);
        let query = query.strategy(SearchStrategy::LowestFee).max_hops(2);
        assert!(matches!(get_path(&g, &query), Err(RouteError::NoPathFound)));
    }

    #[test]
    fn lowest_fee_takes_the_cheaper_detour() {
        let g = graph(vec![
            edge(1, 5, "1x1x0", 0, 0, 6),
            edge(5, 2, "2x1x0", 50_000, 0, 6),
            edge(1, 3, "3x1x0", 0, 0, 6),
            edge(3, 4, "4x1x0", 10, 0, 6),
            edge(4, 2, "5x1x0", 10, 0, 6),
        ]);
        let hops = get_path(&g, &PathQuery::new(node(1), node(2), 1000)).unwrap();
        assert_eq!(scids(&hops), ["1x1x0", "2x1x0"]);

        let query = PathQuery::new(node(1), node(2), 1000).strategy(SearchStrategy::LowestFee);
        let cheap = get_path(&g, &query).unwrap();
        assert_eq!(scids(&cheap), ["3x1x0", "4x1x0", "5x1x0"]);
    }

    #[test]
    fn cheaper_deep_detour_does_not_hide_shallow_path() {
        let g = graph(vec![
            edge(1, 2, "1x1x0", 0, 0, 6),
            edge(2, 3, "2x1x0", 0, 0, 6),
            edge(3, 4, "3x1x0", 1000, 0, 6),
            edge(3, 5, "4x1x0", 0, 0, 6),
            edge(5, 4, "5x1x0", 0, 0, 6),
        ]);
        let query = PathQuery::new(node(1), node(4), 1000)
            .max_hops(3)
            .strategy(SearchStrategy::LowestFee);
        assert_eq!(scids(&get_path(&g, &query).unwrap()), ["1x1x0", "2x1x0", "3x1x0"]);

        let roomy = query.max_hops(4);
        assert_eq!(
            scids(&get_path(&g, &roomy).unwrap()),
            ["1x1x0", "2x1x0", "4x1x0", "5x1x0"]
        );
    }

    #[test]
    fn payer_channel_fee_is_not_counted() {
        // the direct channel's own fee is never charged to the payer
        let g = graph(vec![
            edge(1, 2, "1x1x0", 90_000, 0, 6),
            edge(1, 3, "2x1x0", 0, 0, 6),
            edge(3, 2, "3x1x0", 5, 0, 6),
        ]);
        let query = PathQuery::new(node(1), node(2), 1000).strategy(SearchStrategy::LowestFee);
        assert_eq!(scids(&get_path(&g, &query).unwrap()), ["1x1x0"]);
    }

    #[test]
    fn disconnected_graph_has_no_path() {
        let g = graph(vec![
            edge(1, 3, "1x1x0", 1, 1, 6),
            edge(4, 2, "2x1x0", 1, 1, 6),
        ]);
        for strategy in [SearchStrategy::FewestHops, SearchStrategy::LowestFee] {
            let query = PathQuery::new(node(1), node(2), 1000).strategy(strategy);
            assert!(matches!(get_path(&g, &query), Err(RouteError::NoPathFound)));
        }
    }
}
