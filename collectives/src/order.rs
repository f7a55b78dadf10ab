//! Topology-aware rank permutations. Pipeline chains and ring orders put
//! topology-adjacent ranks next to each other so per-hop distance stays
//! small.

use netchar::NetworkModel;

/// Greedy nearest-neighbour chain starting at `root`, visiting every rank
/// once. Ties break toward the smaller rank.
pub fn chain_from(model: &NetworkModel, root: usize) -> Vec<usize> {
    let n = model.world_size();
    let mut chain = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    let mut cur = root;
    visited[root] = true;
    chain.push(root);
    while chain.len() < n {
        let next = (0..n)
            .filter(|&r| !visited[r])
            .min_by_key(|&r| (model.distance(cur, r), r))
            .unwrap();
        visited[next] = true;
        chain.push(next);
        cur = next;
    }
    chain
}

/// Ring order over all ranks; the chain from rank 0 with the closing edge
/// back to it.
pub fn ring(model: &NetworkModel) -> Vec<usize> {
    chain_from(model, 0)
}

/// Position of a rank in a permutation.
pub fn position(order: &[usize], rank: usize) -> usize {
    order
        .iter()
        .position(|&r| r == rank)
        .expect("rank not in permutation")
}

/// Total hop count across consecutive pairs, the quantity the greedy
/// chain minimizes.
pub fn adjacency_cost(model: &NetworkModel, order: &[usize]) -> usize {
    order
        .windows(2)
        .map(|w| model.distance(w[0], w[1]))
        .sum()
}
