//! Match runs: enumeration, utility assignment, and selection.
//!
//! A match run is a read-only view over the currently active pool. It
//! enumerates feasible structures (cycles and chains, or locally relevant
//! subgraphs depending on the optimization scheme), assigns each a value
//! under the configured utility scheme, and picks a vertex-disjoint subset by
//! integer programming.

pub mod cycles;
mod lrs;
mod utility;

use tracing::{info, warn};

use crate::config::Parameters;
use crate::graph::{AdjacencyMatrix, MatchStore};
use crate::node::{Node, NodeIndex};
use crate::rng::PortableRng;
use crate::solver::{self, PackingProblem, SolveStatus, SolverOptions};
use crate::types::{BloodType, OptimizationScheme, Status, TransplantStatus};

pub use cycles::{CycleChain, StructureBounds};

/// Outcome of the ILP selection step.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// One flag per candidate arrangement.
    pub selected: Vec<bool>,
    pub objective: f64,
    pub status: SolveStatus,
}

/// View over the active pool for one match run.
pub struct MatchRun<'a> {
    pub(crate) params: &'a Parameters,
    pub(crate) nodes: &'a [Node],
    pub(crate) matches: &'a MatchStore,
    pub(crate) adjacency: &'a AdjacencyMatrix,
    pub(crate) adjacency_reduced: &'a AdjacencyMatrix,

    /// Active node indices, donor-only nodes first, in pool order.
    pub(crate) active: Vec<NodeIndex>,
    pub(crate) ndd_count: usize,

    /// Adjacency restricted to the active nodes (local indices).
    pub(crate) sub_adjacency: Vec<Vec<bool>>,
    /// Same, but only edges into pairs (no implicit backward edges).
    pub(crate) sub_adjacency_reduced: Vec<Vec<bool>>,

    pub(crate) eu_rng: PortableRng,
}

impl<'a> MatchRun<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: &'a Parameters,
        iteration: u32,
        match_run_index: u32,
        current_time: u32,
        nodes: &'a [Node],
        statuses: &[Status],
        transplant: &[TransplantStatus],
        matches: &'a MatchStore,
        adjacency: &'a AdjacencyMatrix,
        adjacency_reduced: &'a AdjacencyMatrix,
    ) -> Self {
        // Active pool, non-pairs in front.
        let mut active = Vec::new();
        let mut pairs = Vec::new();
        for index in 0..nodes.len() {
            if transplant[index] != TransplantStatus::NotTransplanted
                || statuses[index] != Status::Active
            {
                continue;
            }
            if nodes[index].is_pair() {
                pairs.push(index);
            } else {
                active.push(index);
            }
        }
        let ndd_count = active.len();
        active.extend(pairs);

        let order = active.len();
        let mut sub_adjacency = vec![vec![false; order]; order];
        let mut sub_adjacency_reduced = vec![vec![false; order]; order];
        for (i, &u) in active.iter().enumerate() {
            for (j, &v) in active.iter().enumerate() {
                if i == j {
                    continue;
                }
                sub_adjacency[i][j] = adjacency.get(u, v);
                if nodes[v].is_pair() {
                    sub_adjacency_reduced[i][j] = adjacency.get(u, v);
                }
            }
        }

        info!(
            match_run = match_run_index,
            time = current_time,
            ndds = ndd_count,
            pairs = order - ndd_count,
            "match run pool assembled"
        );

        let eu_seed =
            params.seeds.expected_utility * i64::from(iteration) + i64::from(current_time);

        MatchRun {
            params,
            nodes,
            matches,
            adjacency,
            adjacency_reduced,
            active,
            ndd_count,
            sub_adjacency,
            sub_adjacency_reduced,
            eu_rng: PortableRng::new(eu_seed),
        }
    }

    pub fn active_nodes(&self) -> &[NodeIndex] {
        &self.active
    }

    pub(crate) fn bounds(&self) -> StructureBounds {
        StructureBounds {
            max_cycle_size: self.params.max_cycle_size,
            max_chain_length: self.params.max_chain_length,
        }
    }

    fn local_is_pair(&self, local: usize) -> bool {
        self.nodes[self.active[local]].is_pair()
    }

    /// A chain may only end at a node with a usable bridge donor: when AB
    /// bridge donors are disallowed the tail needs at least one non-AB donor.
    pub(crate) fn chain_tail_allowed(&self, tail: NodeIndex) -> bool {
        self.params.allow_ab_bridge_donors
            || self.nodes[tail]
                .donors
                .iter()
                .any(|d| d.blood_type != BloodType::Ab)
    }

    /// Enumerates the structures the configured scheme optimizes over,
    /// as global node-index sequences.
    pub fn collect_arrangements(&self) -> Vec<Vec<NodeIndex>> {
        match self.params.optimization_scheme {
            OptimizationScheme::CyclesAndChains
            | OptimizationScheme::CyclesAndChainsWithFallbacks => self.collect_cycles_and_chains(),
            OptimizationScheme::LocallyRelevantSubsets => self.collect_lrs(),
        }
    }

    /// DFS enumeration of cycles and chains over the active subgraph.
    pub fn collect_cycles_and_chains(&self) -> Vec<Vec<NodeIndex>> {
        let order = self.active.len();
        let bounds = self.bounds();
        let raw = cycles::enumerate_structures(
            order,
            |i, j| self.sub_adjacency[i][j],
            bounds,
        );

        let mut arrangements = Vec::new();
        for stack in raw {
            let Some(structure) = cycles::classify(stack, |v| self.local_is_pair(v), bounds)
            else {
                continue;
            };
            if structure.is_chain {
                let tail = self.active[*structure.nodes.last().expect("chains are non-empty")];
                if !self.chain_tail_allowed(tail) {
                    continue;
                }
            }
            arrangements.push(structure.nodes.iter().map(|&v| self.active[v]).collect());
        }
        info!(count = arrangements.len(), "cycles and chains collected");
        arrangements
    }

    /// Picks a vertex-disjoint subset of arrangements maximizing total value.
    /// Any non-optimal solver verdict degrades to an empty selection.
    pub fn select(&self, arrangements: &[Vec<NodeIndex>], values: &[f64]) -> SelectionOutcome {
        if arrangements.is_empty() {
            return SelectionOutcome {
                selected: Vec::new(),
                objective: 0.0,
                status: SolveStatus::Optimal,
            };
        }

        let mut problem = PackingProblem::new();
        for &value in values {
            problem.add_variable(value);
        }
        for &vertex in &self.active {
            let members: Vec<usize> = arrangements
                .iter()
                .enumerate()
                .filter(|(_, arrangement)| arrangement.contains(&vertex))
                .map(|(index, _)| index)
                .collect();
            problem.add_packing_constraint(members);
        }

        let solution = solver::solve(&problem, &SolverOptions::default());
        match solution.status {
            SolveStatus::Optimal => {
                let mut selected = vec![false; arrangements.len()];
                for index in &solution.selected {
                    selected[*index] = true;
                }
                info!(objective = solution.objective, "selection optimized");
                SelectionOutcome {
                    selected,
                    objective: solution.objective,
                    status: SolveStatus::Optimal,
                }
            }
            status => {
                warn!(?status, "selection not optimal; skipping this match run");
                SelectionOutcome {
                    selected: vec![false; arrangements.len()],
                    objective: 0.0,
                    status,
                }
            }
        }
    }
}
