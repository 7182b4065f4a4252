//! Adjacency matrices and match storage for the exchange graph.
//!
//! Two boolean matrices are kept: `A` contains every planning edge including
//! the implicit backward edges from pairs to NDD/bridge nodes, `A_reduced`
//! omits those implicit edges (the LRS routines need the reduced view).
//! Per-donor matches live in a flat map keyed by (donor node, candidate node)
//! with the vector position as the donor index; [`EdgeRef`] is the flat edge
//! view used by the expected-utility code.

use std::collections::HashMap;

use crate::matching::Match;
use crate::node::NodeIndex;

/// Dense boolean matrix over node indices.
#[derive(Debug, Clone)]
pub struct AdjacencyMatrix {
    order: usize,
    bits: Vec<bool>,
}

impl AdjacencyMatrix {
    pub fn new(order: usize) -> Self {
        AdjacencyMatrix {
            order,
            bits: vec![false; order * order],
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn get(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.bits[from * self.order + to]
    }

    pub fn set(&mut self, from: NodeIndex, to: NodeIndex, value: bool) {
        self.bits[from * self.order + to] = value;
    }
}

/// One directed donor-level edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef {
    pub donor_node: NodeIndex,
    pub candidate_node: NodeIndex,
    pub donor_index: usize,
}

/// All matches of an iteration, keyed by (donor node, candidate node).
///
/// Every stored vector covers the donor list of the donor node in order, so
/// `(u, v, k)` resolves in O(1). Placeholders (adjacency false) record why the
/// virtual crossmatch rejected the edge.
#[derive(Debug, Clone, Default)]
pub struct MatchStore {
    matches: HashMap<(NodeIndex, NodeIndex), Vec<Match>>,
}

impl MatchStore {
    pub fn new() -> Self {
        MatchStore::default()
    }

    /// Replaces all donor-level matches from `donor_node` to `candidate_node`.
    pub fn set_matches(
        &mut self,
        donor_node: NodeIndex,
        candidate_node: NodeIndex,
        matches: Vec<Match>,
    ) {
        self.matches.insert((donor_node, candidate_node), matches);
    }

    pub fn get(
        &self,
        donor_node: NodeIndex,
        candidate_node: NodeIndex,
        donor_index: usize,
    ) -> Option<&Match> {
        self.matches
            .get(&(donor_node, candidate_node))
            .and_then(|list| list.get(donor_index))
    }

    pub fn get_mut(
        &mut self,
        donor_node: NodeIndex,
        candidate_node: NodeIndex,
        donor_index: usize,
    ) -> Option<&mut Match> {
        self.matches
            .get_mut(&(donor_node, candidate_node))
            .and_then(|list| list.get_mut(donor_index))
    }

    pub fn donor_matches(
        &self,
        donor_node: NodeIndex,
        candidate_node: NodeIndex,
    ) -> &[Match] {
        self.matches
            .get(&(donor_node, candidate_node))
            .map_or(&[], Vec::as_slice)
    }

    /// True when at least one donor-level edge from `u` to `v` is adjacent.
    pub fn any_adjacent(&self, donor_node: NodeIndex, candidate_node: NodeIndex) -> bool {
        self.donor_matches(donor_node, candidate_node)
            .iter()
            .any(|m| m.adjacency)
    }

    /// Flat view of every adjacency-true donor-level edge between two nodes.
    pub fn adjacent_edges(
        &self,
        donor_node: NodeIndex,
        candidate_node: NodeIndex,
    ) -> impl Iterator<Item = EdgeRef> + '_ {
        self.donor_matches(donor_node, candidate_node)
            .iter()
            .enumerate()
            .filter(|(_, m)| m.adjacency)
            .map(move |(donor_index, _)| EdgeRef {
                donor_node,
                candidate_node,
                donor_index,
            })
    }
}
