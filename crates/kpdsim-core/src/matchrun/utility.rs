//! Utility and expected-utility assignment.
//!
//! Deterministic utility walks an arrangement edge by edge, always crediting
//! the best adjacent donor. Expected utility integrates over node-availability
//! and edge-success outcomes: exactly, by enumerating both power sets with bit
//! masks, or by Monte-Carlo sampling when the exact enumeration would not fit
//! the bit budget or the estimator is configured explicitly.

use tracing::debug;

use super::cycles::{self, StructureBounds};
use super::MatchRun;
use crate::node::NodeIndex;
use crate::solver::{self, PackingProblem, SolveStatus, SolverOptions};
use crate::types::{BloodType, NodeType, PlanningModel, UtilityScheme};

/// Bit-mask budget for the exact expected-utility enumeration. Instances
/// whose donor or edge count exceeds this fall back to the estimator.
const EXACT_EU_MAX_BITS: usize = 16;

/// Structure-count threshold above which the best-packing step switches from
/// exhaustive subset enumeration to branch and bound.
const EXHAUSTIVE_PACKING_LIMIT: usize = 16;

/// A realized (or hypothesized) subgraph local to one arrangement.
#[derive(Debug, Clone)]
pub(crate) struct LocalGraph {
    pub order: usize,
    pub adjacency: Vec<Vec<bool>>,
    /// Utility per (donor node, candidate node, donor index).
    pub utilities: Vec<Vec<Vec<f64>>>,
    pub node_types: Vec<NodeType>,
    pub donor_blood_types: Vec<Vec<BloodType>>,
}

impl LocalGraph {
    /// Graph with only the implicit pair-to-donor-node backward edges.
    fn implicit_base(node_types: Vec<NodeType>, donor_blood_types: Vec<Vec<BloodType>>) -> Self {
        let order = node_types.len();
        let mut adjacency = vec![vec![false; order]; order];
        let utilities = (0..order)
            .map(|i| vec![vec![0.0; donor_blood_types[i].len()]; order])
            .collect();
        for i in 0..order {
            for j in 0..order {
                if i != j
                    && node_types[i] == NodeType::Pair
                    && node_types[j] != NodeType::Pair
                {
                    adjacency[i][j] = true;
                }
            }
        }
        LocalGraph {
            order,
            adjacency,
            utilities,
            node_types,
            donor_blood_types,
        }
    }

    fn best_donor_utility(&self, from: usize, to: usize) -> f64 {
        self.utilities[from][to]
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }
}

/// Best vertex-disjoint packing of cycles and chains in a local graph.
pub(crate) fn best_packing_utility(
    graph: &LocalGraph,
    bounds: StructureBounds,
    allow_ab_bridge_donors: bool,
) -> f64 {
    let raw = cycles::enumerate_structures(
        graph.order,
        |i, j| graph.adjacency[i][j],
        bounds,
    );

    let mut options: Vec<Vec<usize>> = Vec::new();
    let mut option_values: Vec<f64> = Vec::new();
    for stack in raw {
        let Some(structure) =
            cycles::classify(stack, |v| graph.node_types[v] == NodeType::Pair, bounds)
        else {
            continue;
        };
        if structure.is_chain && !allow_ab_bridge_donors {
            let tail = *structure.nodes.last().expect("chains are non-empty");
            if !graph.donor_blood_types[tail]
                .iter()
                .any(|&bt| bt != BloodType::Ab)
            {
                continue;
            }
        }

        let mut value = 0.0;
        for window in structure.nodes.windows(2) {
            value += graph.best_donor_utility(window[0], window[1]);
        }
        if !structure.is_chain {
            let last = *structure.nodes.last().expect("cycles are non-empty");
            value += graph.best_donor_utility(last, structure.nodes[0]);
        }
        options.push(structure.nodes);
        option_values.push(value);
    }

    match options.len() {
        0 => 0.0,
        1 => option_values[0],
        count if count <= EXHAUSTIVE_PACKING_LIMIT => {
            // Exhaustive subset search over the option set.
            let mut best = 0.0f64;
            for mask in 1u32..(1 << count) {
                let mut uses = vec![0u8; graph.order];
                let mut value = 0.0;
                let mut feasible = true;
                'options: for (index, option) in options.iter().enumerate() {
                    if mask & (1 << index) == 0 {
                        continue;
                    }
                    value += option_values[index];
                    for &v in option {
                        uses[v] += 1;
                        if uses[v] > 1 {
                            feasible = false;
                            break 'options;
                        }
                    }
                }
                if feasible && value > best {
                    best = value;
                }
            }
            best
        }
        _ => {
            // Too many overlapping structures for subset enumeration.
            let mut problem = PackingProblem::new();
            for &value in &option_values {
                problem.add_variable(value);
            }
            for vertex in 0..graph.order {
                let members: Vec<usize> = options
                    .iter()
                    .enumerate()
                    .filter(|(_, option)| option.contains(&vertex))
                    .map(|(index, _)| index)
                    .collect();
                problem.add_packing_constraint(members);
            }
            let solution = solver::solve(&problem, &SolverOptions::default());
            if solution.status == SolveStatus::Optimal {
                solution.objective
            } else {
                0.0
            }
        }
    }
}

impl MatchRun<'_> {
    /// High-PRA advantage for the candidate of `target`, when configured.
    fn pra_bonus(&self, target: NodeIndex) -> f64 {
        if self.params.add_pra_advantage
            && self.nodes[target].is_pair()
            && f64::from(self.nodes[target].candidate_pra()) >= self.params.pra_advantage_cutoff
        {
            self.params.pra_advantage_value
        } else {
            0.0
        }
    }

    /// Scheme value of one donor-level edge, before the PRA bonus.
    fn scheme_value(&self, donor_node: NodeIndex, candidate_node: NodeIndex, donor_index: usize) -> f64 {
        if self.params.utility_scheme == UtilityScheme::Transplants {
            if self.nodes[candidate_node].is_pair() {
                1.0
            } else {
                0.0
            }
        } else {
            self.matches
                .get(donor_node, candidate_node, donor_index)
                .map_or(0.0, |m| m.utility(self.params.utility_scheme))
        }
    }

    /// Value contributed by the best adjacent donor on edge `u -> v`;
    /// zero when no donor-level edge survives.
    fn edge_value(&self, u: NodeIndex, v: NodeIndex) -> f64 {
        let best = self
            .matches
            .donor_matches(u, v)
            .iter()
            .enumerate()
            .filter(|(_, m)| m.adjacency)
            .map(|(k, _)| self.scheme_value(u, v, k))
            .fold(None::<f64>, |acc, value| {
                Some(acc.map_or(value, |a| a.max(value)))
            });
        match best {
            Some(value) => value + self.pra_bonus(v),
            None => 0.0,
        }
    }

    /// Deterministic utility of every arrangement: the per-edge best-donor
    /// value summed along the sequence, with the closing edge for cycles.
    pub fn assign_utilities(&self, arrangements: &[Vec<NodeIndex>]) -> Vec<f64> {
        arrangements
            .iter()
            .map(|arrangement| {
                let mut value = 0.0;
                for window in arrangement.windows(2) {
                    value += self.edge_value(window[0], window[1]);
                }
                if self.nodes[arrangement[0]].is_pair() {
                    let last = *arrangement.last().expect("arrangements are non-empty");
                    value += self.edge_value(last, arrangement[0]);
                }
                value
            })
            .collect()
    }

    /// Expected utility of every arrangement, exact or estimated.
    pub fn assign_expected_utilities(&mut self, arrangements: &[Vec<NodeIndex>]) -> Vec<f64> {
        let mut values = Vec::with_capacity(arrangements.len());
        for arrangement in arrangements {
            let value = if self.params.estimate_expected_utility {
                self.monte_carlo_expected_utility(arrangement)
            } else {
                match self.exact_expected_utility(arrangement) {
                    Some(exact) => exact,
                    None => {
                        debug!(
                            size = arrangement.len(),
                            "exact expected utility too large; estimating"
                        );
                        self.monte_carlo_expected_utility(arrangement)
                    }
                }
            };
            values.push(value);
        }
        values
    }

    /// Node-availability probabilities (NDD donor, paired donor, candidate)
    /// under the configured planning model.
    fn availability_probs(&self) -> (f64, f64, f64) {
        match self.params.planning_model {
            PlanningModel::PerfectInformation => (1.0, 1.0, 1.0),
            PlanningModel::Parameterized => (
                self.params.assumed_ndd_availability,
                self.params.assumed_pair_donor_availability,
                self.params.assumed_candidate_availability,
            ),
        }
    }

    fn local_types_and_donors(
        &self,
        arrangement: &[NodeIndex],
    ) -> (Vec<NodeType>, Vec<Vec<BloodType>>) {
        let types = arrangement
            .iter()
            .map(|&v| self.nodes[v].node_type())
            .collect();
        let donors = arrangement
            .iter()
            .map(|&v| self.nodes[v].donors.iter().map(|d| d.blood_type).collect())
            .collect();
        (types, donors)
    }

    /// Exact expected utility: sum over donor subsets and edge subsets of
    /// `P(subset) * P(edges | subset) * best packing`. Returns `None` when
    /// the instance exceeds the bit budget.
    fn exact_expected_utility(&self, arrangement: &[NodeIndex]) -> Option<f64> {
        let n = arrangement.len();
        let (p_ndd, p_donor, p_cand) = self.availability_probs();

        // Flat donor slots across the arrangement.
        let mut slots = Vec::new();
        for (pos, &node) in arrangement.iter().enumerate() {
            for k in 0..self.nodes[node].donor_count() {
                slots.push((pos, k));
            }
        }
        let slot_count = slots.len();
        if slot_count > EXACT_EU_MAX_BITS {
            return None;
        }

        // Upper bound on the per-subset edge count.
        let mut max_edges = 0;
        for (i, &u) in arrangement.iter().enumerate() {
            for (j, &v) in arrangement.iter().enumerate() {
                if i != j && self.adjacency.get(u, v) && self.nodes[v].is_pair() {
                    max_edges += self.matches.adjacent_edges(u, v).count();
                }
            }
        }
        if max_edges > EXACT_EU_MAX_BITS {
            return None;
        }

        let (types, donor_bts) = self.local_types_and_donors(arrangement);
        let bounds = self.bounds();
        let mut total = 0.0;

        for mask in 0u32..(1u32 << slot_count) {
            if mask.count_ones() < 2 {
                continue;
            }

            let mut donor_avail: Vec<Vec<bool>> = arrangement
                .iter()
                .map(|&v| vec![false; self.nodes[v].donor_count()])
                .collect();
            let mut cand_avail = vec![false; n];
            for (bit, &(pos, k)) in slots.iter().enumerate() {
                if mask & (1 << bit) != 0 {
                    donor_avail[pos][k] = true;
                    cand_avail[pos] = true;
                }
            }

            // P(subset): each donor contributes its availability factor; a
            // pair with no surviving donor collapses through the complement
            // form because an absent candidate hides its donors too.
            let mut prob_subset = 1.0;
            for (pos, &node) in arrangement.iter().enumerate() {
                let mut prob_node = 1.0;
                match types[pos] {
                    NodeType::Ndd | NodeType::Bridge => {
                        let p = if types[pos] == NodeType::Ndd { p_ndd } else { p_donor };
                        for &available in &donor_avail[pos] {
                            prob_node *= if available { p } else { 1.0 - p };
                        }
                    }
                    NodeType::Pair => {
                        if cand_avail[pos] {
                            for &available in &donor_avail[pos] {
                                prob_node *= if available { p_donor } else { 1.0 - p_donor };
                            }
                            prob_node *= p_cand;
                        } else {
                            for _ in 0..self.nodes[node].donor_count() {
                                prob_node *= 1.0 - p_donor;
                            }
                            prob_node = 1.0 - (1.0 - prob_node) * p_cand;
                        }
                    }
                }
                prob_subset *= prob_node;
            }
            if prob_subset <= 0.0 {
                continue;
            }

            // Edges live between an available donor and an available pair.
            let mut edges = Vec::new();
            for (i, &u) in arrangement.iter().enumerate() {
                for (j, &v) in arrangement.iter().enumerate() {
                    if i == j || !self.adjacency.get(u, v) || !self.nodes[v].is_pair() {
                        continue;
                    }
                    for edge in self.matches.adjacent_edges(u, v) {
                        if donor_avail[i][edge.donor_index] && cand_avail[j] {
                            edges.push((i, j, edge.donor_index));
                        }
                    }
                }
            }

            let base = LocalGraph::implicit_base(types.clone(), donor_bts.clone());
            let edge_count = edges.len();
            for edge_mask in 1u32..(1u32 << edge_count) {
                let mut prob = prob_subset;
                let mut graph = base.clone();
                for (bit, &(i, j, k)) in edges.iter().enumerate() {
                    let (u, v) = (arrangement[i], arrangement[j]);
                    let m = self
                        .matches
                        .get(u, v, k)
                        .expect("edge existence was checked above");
                    if edge_mask & (1 << bit) != 0 {
                        prob *= m.assumed_success_probability;
                        graph.adjacency[i][j] = true;
                        graph.utilities[i][j][k] = self.scheme_value(u, v, k) + self.pra_bonus(v);
                    } else {
                        prob *= 1.0 - m.assumed_success_probability;
                    }
                }
                if prob > 0.0 {
                    let packing = best_packing_utility(
                        &graph,
                        bounds,
                        self.params.allow_ab_bridge_donors,
                    );
                    if packing > 0.0 {
                        total += prob * packing;
                    }
                }
            }
        }

        Some(total)
    }

    /// Monte-Carlo estimator: sample node availability and edge success,
    /// evaluate the best packing on each realization, average.
    fn monte_carlo_expected_utility(&mut self, arrangement: &[NodeIndex]) -> f64 {
        let n = arrangement.len();
        let (p_ndd, p_donor, p_cand) = self.availability_probs();
        let (types, donor_bts) = self.local_types_and_donors(arrangement);
        let bounds = self.bounds();
        let iterations = self.params.n_eu_iterations.max(1);

        let mut total = 0.0;
        for _ in 0..iterations {
            let mut donor_avail: Vec<Vec<bool>> = arrangement
                .iter()
                .map(|&v| vec![false; self.nodes[v].donor_count()])
                .collect();
            let mut cand_avail = vec![false; n];

            for (pos, &node) in arrangement.iter().enumerate() {
                for k in 0..self.nodes[node].donor_count() {
                    let u = self.eu_rng.runif();
                    let available = match types[pos] {
                        NodeType::Ndd => u < p_ndd,
                        _ => u < p_donor,
                    };
                    if available {
                        donor_avail[pos][k] = true;
                        if types[pos] != NodeType::Pair {
                            cand_avail[pos] = true;
                        }
                    }
                }
                if types[pos] == NodeType::Pair && self.eu_rng.runif() < p_cand {
                    cand_avail[pos] = true;
                }
            }

            let mut graph = LocalGraph {
                order: n,
                adjacency: vec![vec![false; n]; n],
                utilities: arrangement
                    .iter()
                    .map(|&v| vec![vec![0.0; self.nodes[v].donor_count()]; n])
                    .collect(),
                node_types: types.clone(),
                donor_blood_types: donor_bts.clone(),
            };

            for (i, &u) in arrangement.iter().enumerate() {
                for (j, &v) in arrangement.iter().enumerate() {
                    if i == j || !cand_avail[i] || !cand_avail[j] {
                        continue;
                    }
                    if types[i] == NodeType::Pair && types[j] != NodeType::Pair {
                        for k in 0..self.nodes[u].donor_count() {
                            if donor_avail[i][k] {
                                graph.adjacency[i][j] = true;
                            }
                        }
                    } else if types[j] == NodeType::Pair {
                        for k in 0..self.nodes[u].donor_count() {
                            let adjacent =
                                self.matches.get(u, v, k).is_some_and(|m| m.adjacency);
                            if adjacent && donor_avail[i][k] {
                                let m = self
                                    .matches
                                    .get(u, v, k)
                                    .expect("adjacency was checked above");
                                if self.eu_rng.runif() < m.assumed_success_probability {
                                    graph.adjacency[i][j] = true;
                                    graph.utilities[i][j][k] =
                                        self.scheme_value(u, v, k) + self.pra_bonus(v);
                                }
                            }
                        }
                    }
                }
            }

            total += best_packing_utility(&graph, bounds, self.params.allow_ab_bridge_donors);
        }

        total / f64::from(iterations)
    }
}
