//! Selected arrangements awaiting transplantation.
//!
//! An arrangement snapshots its nodes and their match matrix at selection
//! time and sits on the transplant queue until its transplantation time. At
//! that point the simulation reveals lab crossmatches, and the arrangement
//! re-optimizes locally over whatever edges survived: enumerate the feasible
//! cycles and chains inside the arrangement, score them by best-donor
//! utility, and pick a vertex-disjoint packing with the same integer program
//! used for selection.

use tracing::warn;

use crate::graph::MatchStore;
use crate::matchrun::cycles::{self, StructureBounds};
use crate::node::{Node, NodeIndex};
use crate::solver::{self, PackingProblem, SolveStatus, SolverOptions};
use crate::types::{BloodType, UtilityScheme, t_f, yes_no};

/// A selected structure in progress toward transplantation.
#[derive(Debug, Clone)]
pub struct Arrangement {
    iteration: u32,
    match_run: u32,
    match_run_time: u32,
    transplant_time: u32,
    assigned_utility: f64,
    has_ndd: bool,

    /// Pool indices of the member nodes, in arrangement order.
    node_indices: Vec<NodeIndex>,
    /// Node snapshots taken at selection time.
    nodes: Vec<Node>,
    /// Match snapshots, keyed by local position.
    matches: MatchStore,

    /// Candidate-side availability; cleared when a member leaves mid-flight.
    availability: Vec<bool>,
    /// Chosen donor per realized (donor node, candidate node) edge.
    chosen_donor: Vec<Vec<Option<usize>>>,
}

impl Arrangement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        iteration: u32,
        match_run: u32,
        match_run_time: u32,
        transplant_time: u32,
        assigned_utility: f64,
        node_indices: Vec<NodeIndex>,
        pool: &[Node],
        pool_matches: &MatchStore,
    ) -> Self {
        let order = node_indices.len();
        let nodes: Vec<Node> = node_indices.iter().map(|&v| pool[v].clone()).collect();
        let has_ndd = nodes.iter().any(|node| !node.is_pair());

        let mut matches = MatchStore::new();
        for (i, &u) in node_indices.iter().enumerate() {
            for (j, &v) in node_indices.iter().enumerate() {
                if i == j {
                    continue;
                }
                let donor_matches = pool_matches.donor_matches(u, v);
                if !donor_matches.is_empty() {
                    matches.set_matches(i, j, donor_matches.to_vec());
                }
            }
        }

        Arrangement {
            iteration,
            match_run,
            match_run_time,
            transplant_time,
            assigned_utility,
            has_ndd,
            node_indices,
            nodes,
            matches,
            availability: vec![true; order],
            chosen_donor: vec![vec![None; order]; order],
        }
    }

    pub fn node_indices(&self) -> &[NodeIndex] {
        &self.node_indices
    }

    pub fn len(&self) -> usize {
        self.node_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_indices.is_empty()
    }

    pub fn transplant_time(&self) -> u32 {
        self.transplant_time
    }

    pub fn has_ndd(&self) -> bool {
        self.has_ndd
    }

    pub fn assigned_utility(&self) -> f64 {
        self.assigned_utility
    }

    pub fn contains(&self, node: NodeIndex) -> bool {
        self.node_indices.contains(&node)
    }

    /// Local position of a pool node inside this arrangement.
    pub fn position_of(&self, node: NodeIndex) -> Option<usize> {
        self.node_indices.iter().position(|&v| v == node)
    }

    /// Marks a member unavailable (inactive or withdrawn mid-flight).
    pub fn mark_unavailable(&mut self, node: NodeIndex) {
        if let Some(position) = self.position_of(node) {
            self.availability[position] = false;
        }
    }

    pub fn is_available(&self, position: usize) -> bool {
        self.availability[position]
    }

    /// Planning adjacency of one donor-level edge inside the arrangement.
    pub fn edge_adjacent(&self, from: usize, to: usize, donor_index: usize) -> bool {
        self.matches
            .get(from, to, donor_index)
            .is_some_and(|m| m.adjacency)
    }

    /// Lab verdict recorded for one donor-level edge.
    pub fn edge_lab_result(&self, from: usize, to: usize, donor_index: usize) -> bool {
        self.matches
            .get(from, to, donor_index)
            .is_some_and(|m| m.lab_crossmatch)
    }

    /// `id-id-id` label for the run log.
    pub fn label(&self) -> String {
        self.node_indices
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Best usable donor for the local edge `from -> to`: adjacent, lab
    /// verified, maximal under the utility scheme.
    pub fn select_donor(
        &mut self,
        from: usize,
        to: usize,
        scheme: UtilityScheme,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (k, m) in self.matches.donor_matches(from, to).iter().enumerate() {
            if !m.adjacency || !m.lab_crossmatch {
                continue;
            }
            let value = m.utility(scheme);
            match (scheme, &best) {
                // Transplant counting keeps the first usable donor.
                (UtilityScheme::Transplants, Some(_)) => {}
                (_, Some((_, best_value))) if value <= *best_value => {}
                _ => best = Some((k, value)),
            }
        }
        let chosen = best.map(|(k, _)| k);
        self.chosen_donor[from][to] = chosen;
        chosen
    }

    fn option_value(&self, option: &[usize], scheme: UtilityScheme) -> f64 {
        let mut value = 0.0;
        for window in option.windows(2) {
            value += self.edge_option_value(window[0], window[1], scheme);
        }
        // Cycles close back to their first vertex; chains end at the bridge.
        if self.nodes[option[0]].is_pair() {
            let last = *option.last().expect("options are non-empty");
            value += self.edge_option_value(last, option[0], scheme);
        }
        value
    }

    fn edge_option_value(&self, from: usize, to: usize, scheme: UtilityScheme) -> f64 {
        if scheme == UtilityScheme::Transplants {
            if self.nodes[to].is_pair() { 1.0 } else { 0.0 }
        } else {
            self.matches
                .donor_matches(from, to)
                .iter()
                .filter(|m| m.adjacency && m.lab_crossmatch)
                .map(|m| m.utility(scheme))
                .fold(0.0, f64::max)
        }
    }

    /// Feasible cycles and chains left inside the arrangement after the lab
    /// reveal, as local vertex sequences, packed by the selection ILP. With
    /// `require_full` only the intact original structure is eligible.
    pub fn fallback_options(
        &self,
        bounds: StructureBounds,
        allow_ab_bridge_donors: bool,
        scheme: UtilityScheme,
        require_full: bool,
    ) -> Vec<Vec<usize>> {
        let order = self.nodes.len();

        // Adjacency after the reveal: implicit edges into donor-only nodes
        // stay; pair-bound edges need a lab-verified adjacent donor and an
        // available candidate.
        let mut adjacency = vec![vec![false; order]; order];
        for i in 0..order {
            for j in 0..order {
                if i == j {
                    continue;
                }
                adjacency[i][j] = if !self.nodes[j].is_pair() {
                    self.nodes[i].is_pair()
                } else {
                    self.availability[j]
                        && self
                            .matches
                            .donor_matches(i, j)
                            .iter()
                            .any(|m| m.adjacency && m.lab_crossmatch)
                };
            }
        }

        let raw = cycles::enumerate_structures(order, |i, j| adjacency[i][j], bounds);
        let mut options = Vec::new();
        for stack in raw {
            let Some(structure) =
                cycles::classify(stack, |v| self.nodes[v].is_pair(), bounds)
            else {
                continue;
            };
            if structure.is_chain && !allow_ab_bridge_donors {
                let tail = *structure.nodes.last().expect("chains are non-empty");
                if !self.nodes[tail]
                    .donors
                    .iter()
                    .any(|d| d.blood_type != BloodType::Ab)
                {
                    continue;
                }
            }
            if require_full && structure.nodes.len() != order {
                continue;
            }
            options.push(structure.nodes);
        }
        if options.is_empty() {
            return Vec::new();
        }

        let mut problem = PackingProblem::new();
        for option in &options {
            problem.add_variable(self.option_value(option, scheme));
        }
        for vertex in 0..order {
            let members: Vec<usize> = options
                .iter()
                .enumerate()
                .filter(|(_, option)| option.contains(&vertex))
                .map(|(index, _)| index)
                .collect();
            problem.add_packing_constraint(members);
        }
        let solution = solver::solve(&problem, &SolverOptions::default());
        if solution.status != SolveStatus::Optimal {
            warn!(status = ?solution.status, "fallback optimization not optimal");
            return Vec::new();
        }

        solution
            .selected
            .into_iter()
            .map(|index| options[index].clone())
            .collect()
    }

    /// One output row per planning edge into a pair, with the chosen-donor
    /// flag; columns are fixed by [`crate::output`].
    pub fn transplant_rows(&self) -> Vec<Vec<String>> {
        let order = self.nodes.len();
        let mut rows = Vec::new();
        for i in 0..order {
            let donor_node = &self.nodes[i];
            for j in 0..order {
                if i == j || !self.nodes[j].is_pair() {
                    continue;
                }
                let candidate_node = &self.nodes[j];
                for (k, m) in self.matches.donor_matches(i, j).iter().enumerate() {
                    if !m.adjacency {
                        continue;
                    }
                    let mut row = vec![
                        self.iteration.to_string(),
                        self.match_run.to_string(),
                        self.match_run_time.to_string(),
                        self.transplant_time.to_string(),
                        donor_node.node_type().to_string(),
                        donor_node.id.to_string(),
                        k.to_string(),
                        donor_node.arrival_time.to_string(),
                    ];
                    row.extend(donor_node.donors[k].csv_fields());
                    row.push(candidate_node.id.to_string());
                    row.push(candidate_node.arrival_time.to_string());
                    row.push(candidate_node.donor_count().to_string());
                    row.push(yes_no(self.availability[j]).to_string());
                    row.extend(candidate_node.candidate_csv_fields());
                    row.extend(m.csv_fields());
                    row.push(t_f(self.chosen_donor[i][j] == Some(k)).to_string());
                    rows.push(row);
                }
            }
        }
        rows
    }
}
