//! Enumeration of locally relevant subgraphs (LRS).
//!
//! An LRS is a weakly-connected vertex set, bounded by `max_lrs_size`, inside
//! which every future realizable cycle or chain over those vertices must lie.
//! Two passes grow BFS trees over the reduced adjacency (no implicit backward
//! edges): one rooted at each pair with a strong-reachability check, and one
//! maintaining a forest of NDD-rooted subtrees whose interleaving is governed
//! by the level bookkeeping below. Every candidate set must additionally pass
//! the reach predicate in [`MatchRun::validate_lrs_bounds`].

use std::collections::VecDeque;

use tracing::info;

use super::MatchRun;
use crate::node::NodeIndex;

impl MatchRun<'_> {
    /// Enumerates LRS arrangements: the NDD-including pass first (when NDDs
    /// are present), then the pairs-only pass.
    pub fn collect_lrs(&self) -> Vec<Vec<NodeIndex>> {
        let mut arrangements = Vec::new();
        if self.ndd_count > 0 {
            self.collect_lrs_with_ndds(&mut arrangements);
        }
        self.collect_lrs_pairs_only(&mut arrangements);
        info!(count = arrangements.len(), "locally relevant subgraphs collected");
        arrangements
    }

    /// Admissibility: all-pairs shortest paths over the reduced adjacency
    /// restricted to the arrangement, then a flood from vertex 0. A vertex
    /// joins the flood when, relative to an already-flooded vertex, it sits
    /// within chain reach (from a donor-only vertex) or within combined
    /// cycle/chain reach (from a pair).
    pub(crate) fn validate_lrs_bounds(&self, arrangement: &[NodeIndex]) -> bool {
        let size = arrangement.len();
        if size <= 1 {
            return false;
        }

        let inf = usize::MAX / 4;
        let mut dist = vec![vec![inf; size]; size];
        for (i, row) in dist.iter_mut().enumerate() {
            row[i] = 0;
        }
        for (i, &u) in arrangement.iter().enumerate() {
            for (j, &v) in arrangement.iter().enumerate() {
                if i != j && self.adjacency_reduced.get(u, v) {
                    dist[i][j] = 1;
                }
            }
        }
        for k in 0..size {
            for i in 0..size {
                for j in 0..size {
                    let through = dist[i][k].saturating_add(dist[k][j]);
                    if through < dist[i][j] {
                        dist[i][j] = through;
                    }
                }
            }
        }

        let chain_bound = self.params.max_chain_length + 1;
        let cycle_bound = self.params.max_cycle_size;
        let mut reached = vec![false; size];
        reached[0] = true;
        let mut queue = VecDeque::from([0usize]);
        while let Some(f) = queue.pop_front() {
            for i in 0..size {
                if reached[i] {
                    continue;
                }
                let admissible = if !self.nodes[arrangement[f]].is_pair() {
                    dist[f][i] <= chain_bound
                } else if self.nodes[arrangement[i]].is_pair() {
                    dist[i][f].saturating_add(dist[f][i]) <= cycle_bound
                } else {
                    dist[i][f] <= chain_bound
                };
                if admissible {
                    reached[i] = true;
                    queue.push_back(i);
                }
            }
        }
        reached.into_iter().all(|r| r)
    }

    /// Pairs-only pass: grow a BFS tree from every pair root; each extension
    /// must keep the reverse-edge BFS from the root spanning the whole tree.
    fn collect_lrs_pairs_only(&self, out: &mut Vec<Vec<NodeIndex>>) {
        let pairs: Vec<usize> = (self.ndd_count..self.active.len()).collect();
        let pair_count = pairs.len();
        if pair_count == 0 {
            return;
        }

        // Transposed adjacency over pair-list indices.
        let mut reverse = vec![vec![false; pair_count]; pair_count];
        for i in 0..pair_count {
            for j in 0..pair_count {
                if i != j {
                    reverse[j][i] = self.sub_adjacency_reduced[pairs[i]][pairs[j]];
                }
            }
        }

        let max_lrs = self.params.max_lrs_size;
        let mut visited = vec![false; pair_count];
        let mut tree: Vec<usize> = Vec::new();
        let mut level: Vec<usize> = Vec::new();

        for root in 0..pair_count {
            tree.push(root);
            level.push(0);
            visited[root] = true;
            let mut next = root + 1;
            let mut child_level = 1usize;

            while !tree.is_empty() {
                let child =
                    self.lrs_pairs_child(&pairs, &tree, &level, &visited, next, child_level);
                let deepest = *level.last().expect("tree is non-empty");

                if tree.len() == max_lrs || (child.is_none() && child_level == deepest + 1) {
                    let last = *tree.last().expect("tree is non-empty");
                    next = last + 1;
                    child_level = deepest;
                    visited[last] = false;
                    tree.pop();
                    level.pop();
                } else if child.is_none() && child_level == deepest {
                    next = root + 1;
                    child_level = deepest + 1;
                } else {
                    let c = child.expect("branch covers the remaining case");
                    tree.push(c);
                    level.push(child_level);
                    visited[c] = true;

                    if reverse_spans_tree(&reverse, &tree) {
                        let arrangement: Vec<NodeIndex> =
                            tree.iter().map(|&t| self.active[pairs[t]]).collect();
                        if self.validate_lrs_bounds(&arrangement) {
                            out.push(arrangement);
                        }
                    }
                    next = c + 1;
                }
            }
        }
    }

    /// A child pair may attach at `child_level` only if nothing in the tree
    /// at a lower level already reaches it and something at the previous
    /// level does.
    fn lrs_pairs_child(
        &self,
        pairs: &[usize],
        tree: &[usize],
        level: &[usize],
        visited: &[bool],
        next: usize,
        child_level: usize,
    ) -> Option<usize> {
        'child: for child in next..pairs.len() {
            if visited[child] {
                continue;
            }
            for i in 0..level.len() {
                let edge = self.sub_adjacency_reduced[pairs[tree[i]]][pairs[child]];
                if level[i] + 1 < child_level {
                    if edge {
                        continue 'child;
                    }
                } else if level[i] + 1 == child_level && edge {
                    return Some(child);
                }
            }
        }
        None
    }

    /// NDD-including pass: maintain a forest of NDD-rooted BFS subtrees. A
    /// new NDD root may only join once a leaf attachment has connected back
    /// to the union through reverse edges; the `next`/`next_ndd`,
    /// `child_level`/`child_level_ndd`, `child_can_be_ndd`, and
    /// `child_adj_lower` state variables carry the interleaving rules.
    fn collect_lrs_with_ndds(&self, out: &mut Vec<Vec<NodeIndex>>) {
        let order = self.active.len();
        let ndds = self.ndd_count;
        let max_lrs = self.params.max_lrs_size;
        let mut visited = vec![false; order];

        for root in 0..ndds {
            let mut trees: Vec<Vec<usize>> = vec![vec![root]];
            let mut levels: Vec<Vec<i64>> = vec![vec![0]];
            let mut induced: Vec<i64> = vec![0];
            let mut adj_lower: Vec<Vec<bool>> = vec![vec![false]];
            let mut tree_size = 1usize;
            visited[root] = true;

            let mut next = ndds;
            let mut next_ndd = root + 1;
            let mut child_level: i64 = 1;
            let mut child_level_ndd: i64 = 1;
            let mut child_can_be_ndd = false;
            let mut child_adj_lower = false;

            while !trees.is_empty() {
                let child = self.lrs_ndd_child(
                    &mut child_adj_lower,
                    &trees,
                    &levels,
                    &induced,
                    &visited,
                    next,
                    next_ndd,
                    child_level,
                    child_level_ndd,
                    child_can_be_ndd,
                );
                let deepest = *levels
                    .last()
                    .and_then(|l| l.last())
                    .expect("forest is non-empty");

                if tree_size == max_lrs || (child.is_none() && deepest + 1 == child_level) {
                    let last_leaf = *trees
                        .last()
                        .and_then(|t| t.last())
                        .expect("forest is non-empty");
                    if last_leaf < ndds {
                        // The newest subtree is a bare NDD root; retire it.
                        if trees.len() > 1 {
                            let below = levels[levels.len() - 2]
                                .last()
                                .copied()
                                .expect("subtrees are non-empty");
                            if induced[induced.len() - 1] == induced[induced.len() - 2] + 1 {
                                child_level = below + 1;
                                child_level_ndd = *induced.last().expect("non-empty");
                                next = ndds;
                            } else {
                                child_level = below;
                                child_level_ndd = *induced.last().expect("non-empty");
                                let prev_leaf = *trees[trees.len() - 2]
                                    .last()
                                    .expect("subtrees are non-empty");
                                next = ndds.max(prev_leaf + 1);
                            }
                        }
                        induced.pop();
                        next_ndd = last_leaf + 1;
                        child_can_be_ndd = true;
                        visited[last_leaf] = false;
                        trees.pop();
                        levels.pop();
                        adj_lower.pop();
                    } else {
                        // Retire the newest pair leaf of the newest subtree.
                        next_ndd = ndds;
                        next = last_leaf + 1;
                        let leaf_levels = levels.last().expect("forest is non-empty");
                        if *leaf_levels.last().expect("non-empty")
                            == leaf_levels[leaf_levels.len() - 2] + 1
                        {
                            child_level_ndd = induced.last().expect("non-empty") + 1;
                        } else {
                            child_level_ndd = *induced.last().expect("non-empty");
                        }
                        child_level = *leaf_levels.last().expect("non-empty");
                        if *adj_lower
                            .last()
                            .and_then(|a| a.last())
                            .expect("forest is non-empty")
                        {
                            child_can_be_ndd = false;
                        }
                        visited[last_leaf] = false;
                        trees.last_mut().expect("non-empty").pop();
                        levels.last_mut().expect("non-empty").pop();
                        adj_lower.last_mut().expect("non-empty").pop();
                    }
                    tree_size -= 1;
                } else if child.is_none() && deepest == child_level {
                    next = ndds;
                    next_ndd = root + 1;
                    child_level += 1;
                    child_level_ndd += 1;
                } else {
                    let c = child.expect("branch covers the remaining case");
                    if c < ndds {
                        // New NDD root starts its own subtree.
                        trees.push(vec![c]);
                        levels.push(vec![0]);
                        induced.push(child_level_ndd);
                        adj_lower.push(vec![child_adj_lower]);
                        next = ndds;
                        next_ndd = c + 1;
                        child_level = 0;
                        if !child_adj_lower {
                            child_can_be_ndd = false;
                        }
                    } else {
                        trees.last_mut().expect("non-empty").push(c);
                        levels.last_mut().expect("non-empty").push(child_level);
                        if child_can_be_ndd {
                            adj_lower.last_mut().expect("non-empty").push(false);
                        } else {
                            adj_lower
                                .last_mut()
                                .expect("non-empty")
                                .push(child_adj_lower);
                            if child_adj_lower
                                || (trees.len() == 1 && trees[0].len() == 2)
                            {
                                child_can_be_ndd = true;
                            }
                        }
                        next = c + 1;
                        next_ndd = trees.last().expect("non-empty")[0] + 1;
                        child_level_ndd = *induced.last().expect("non-empty");
                    }
                    tree_size += 1;
                    visited[c] = true;

                    if child_can_be_ndd {
                        let arrangement: Vec<NodeIndex> = trees
                            .iter()
                            .flatten()
                            .map(|&t| self.active[t])
                            .collect();
                        if self.validate_lrs_bounds(&arrangement) {
                            out.push(arrangement);
                        }
                    }
                }
            }
        }
    }

    /// Child search for the NDD-including pass. NDD candidates are screened
    /// against every subtree by induced level; pair candidates additionally
    /// need a predecessor at the previous level inside the newest subtree.
    /// `child_adj_lower` reports whether the accepted child connects back to
    /// lower induced levels through a reverse edge.
    #[allow(clippy::too_many_arguments)]
    fn lrs_ndd_child(
        &self,
        child_adj_lower: &mut bool,
        trees: &[Vec<usize>],
        levels: &[Vec<i64>],
        induced: &[i64],
        visited: &[bool],
        next: usize,
        next_ndd: usize,
        child_level: i64,
        child_level_ndd: i64,
        child_can_be_ndd: bool,
    ) -> Option<usize> {
        let order = self.active.len();
        let ndds = self.ndd_count;
        let adj = |a: usize, b: usize| self.sub_adjacency_reduced[a][b];

        if child_can_be_ndd && !(induced.len() == 1 && child_level_ndd == 0) {
            'ndd: for child in next_ndd..ndds {
                if visited[child] {
                    continue;
                }
                *child_adj_lower = false;
                for (i, subtree) in trees.iter().enumerate() {
                    if induced[i] < child_level_ndd - 1 {
                        for &node in subtree {
                            if adj(node, child) || adj(child, node) {
                                continue 'ndd;
                            }
                        }
                    } else if induced[i] == child_level_ndd - 1 {
                        if subtree[0] < child {
                            for &node in subtree {
                                if adj(node, child) {
                                    continue 'ndd;
                                }
                                if adj(child, node) {
                                    *child_adj_lower = true;
                                }
                            }
                        } else {
                            for &node in subtree {
                                if adj(child, node) {
                                    continue 'ndd;
                                }
                                if adj(node, child) {
                                    *child_adj_lower = true;
                                }
                            }
                        }
                    }
                }
                return Some(child);
            }
        }

        let newest_levels = levels.last().expect("forest is non-empty");
        if !(newest_levels.len() == 1 && child_level == 0) {
            'pair: for child in next..order {
                if visited[child] {
                    continue;
                }
                *child_adj_lower = false;
                for (i, subtree) in trees.iter().enumerate() {
                    if i == trees.len() - 1 {
                        for (j, &node) in subtree.iter().enumerate() {
                            if levels[i][j] < child_level - 1 {
                                if adj(node, child) {
                                    continue 'pair;
                                }
                            } else if levels[i][j] == child_level - 1 && adj(node, child) {
                                return Some(child);
                            }
                        }
                    } else if induced[i] < induced.last().expect("non-empty") - 1 {
                        for &node in subtree {
                            if adj(node, child) || adj(child, node) {
                                continue 'pair;
                            }
                        }
                    } else if induced[i] == induced.last().expect("non-empty") - 1 {
                        if subtree[0] < trees.last().expect("non-empty")[0] {
                            for &node in subtree {
                                if adj(node, child) {
                                    continue 'pair;
                                }
                                if adj(child, node) {
                                    *child_adj_lower = true;
                                }
                            }
                        } else {
                            for &node in subtree {
                                if adj(child, node) {
                                    continue 'pair;
                                }
                                if adj(node, child) {
                                    *child_adj_lower = true;
                                }
                            }
                        }
                    } else if induced[i] == *induced.last().expect("non-empty")
                        && subtree[0] < trees.last().expect("non-empty")[0]
                    {
                        for &node in subtree {
                            if adj(node, child) {
                                continue 'pair;
                            }
                        }
                    }
                }
            }
        }

        None
    }
}

/// Reverse-edge BFS from the tree root; true when it spans the whole tree.
fn reverse_spans_tree(reverse: &[Vec<bool>], tree: &[usize]) -> bool {
    let mut seen = vec![false; reverse.len()];
    seen[tree[0]] = true;
    let mut queue = VecDeque::from([tree[0]]);
    while let Some(u) = queue.pop_front() {
        for &t in &tree[1..] {
            if !seen[t] && reverse[u][t] {
                seen[t] = true;
                queue.push_back(t);
            }
        }
    }
    tree.iter().all(|&t| seen[t])
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::types::{BloodType, OptimizationScheme};

    #[test]
    fn test_pairs_only_two_cycle_is_an_lrs() {
        let nodes = vec![
            pair(0, BloodType::O, &[BloodType::A]),
            pair(1, BloodType::A, &[BloodType::O]),
        ];
        let (store, adjacency, reduced) = wire(&nodes);
        let mut params = params();
        params.optimization_scheme = OptimizationScheme::LocallyRelevantSubsets;
        params.max_cycle_size = 2;
        params.max_lrs_size = 2;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);

        let arrangements = run.collect_lrs();
        assert!(arrangements.iter().any(|a| {
            let mut sorted = a.clone();
            sorted.sort_unstable();
            sorted == vec![0, 1]
        }));
    }

    #[test]
    fn test_one_way_edge_is_not_an_lrs() {
        // P0 -> P1 without a path back: reverse reachability fails.
        let nodes = vec![
            pair(0, BloodType::A, &[BloodType::O]),
            pair(1, BloodType::A, &[BloodType::Ab]),
        ];
        let (store, adjacency, reduced) = wire(&nodes);
        let mut params = params();
        params.optimization_scheme = OptimizationScheme::LocallyRelevantSubsets;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);
        assert!(run.collect_lrs().is_empty());
    }

    #[test]
    fn test_chain_path_admissibility_depends_on_chain_bound() {
        // NDD -> P1 -> P2 with no path back from P2: the far pair sits at
        // forward distance 2 and can only be reached down the chain.
        let nodes = vec![
            ndd(0, BloodType::B),
            pair(1, BloodType::B, &[BloodType::B]),
            pair(2, BloodType::Ab, &[BloodType::A]),
        ];
        let (store, adjacency, mut reduced) = wire(&nodes);
        // Cut the direct NDD -> P2 edge so sp(NDD, P2) = 2.
        reduced.set(0, 2, false);
        let mut params = params();
        params.allow_ab_bridge_donors = true;
        params.max_lrs_size = 3;

        params.max_chain_length = 1;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);
        assert!(run.validate_lrs_bounds(&[0, 1, 2]));

        params.max_chain_length = 0;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);
        assert!(!run.validate_lrs_bounds(&[0, 1, 2]));
    }

    #[test]
    fn test_lrs_respects_size_bound() {
        // Four mutually compatible pairs but max_lrs_size = 3.
        let nodes = vec![
            pair(0, BloodType::A, &[BloodType::A]),
            pair(1, BloodType::A, &[BloodType::A]),
            pair(2, BloodType::A, &[BloodType::A]),
            pair(3, BloodType::A, &[BloodType::A]),
        ];
        let (store, adjacency, reduced) = wire(&nodes);
        let mut params = params();
        params.optimization_scheme = OptimizationScheme::LocallyRelevantSubsets;
        params.max_cycle_size = 3;
        params.max_lrs_size = 3;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);

        let arrangements = run.collect_lrs();
        assert!(!arrangements.is_empty());
        assert!(arrangements.iter().all(|a| a.len() <= 3));
    }

    #[test]
    fn test_ndd_pass_finds_chain_set() {
        let nodes = vec![
            ndd(0, BloodType::O),
            pair(1, BloodType::A, &[BloodType::B]),
            pair(2, BloodType::B, &[BloodType::O]),
        ];
        let (store, adjacency, reduced) = wire(&nodes);
        let mut params = params();
        params.optimization_scheme = OptimizationScheme::LocallyRelevantSubsets;
        params.max_chain_length = 3;
        params.max_lrs_size = 3;
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);

        let arrangements = run.collect_lrs();
        assert!(arrangements.iter().any(|a| a.contains(&0)));
        // Every emitted set passes the reach predicate by construction.
        for arrangement in &arrangements {
            assert!(run.validate_lrs_bounds(arrangement));
        }
    }

    #[test]
    fn test_singletons_are_never_admissible() {
        let nodes = vec![pair(0, BloodType::A, &[BloodType::A])];
        let (store, adjacency, reduced) = wire(&nodes);
        let params = params();
        let run = match_run_over(&params, &nodes, &store, &adjacency, &reduced);
        assert!(!run.validate_lrs_bounds(&[0]));
    }
}
