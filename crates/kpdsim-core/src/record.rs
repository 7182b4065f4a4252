//! Per-iteration pool synthesis.
//!
//! The record owns everything random about one iteration: who arrives and
//! when (Poisson interarrivals), each node's status-transition timeline, and
//! the full match matrix with adjacency. It is generated up front from the
//! per-purpose seeded streams so a simulation iteration replays identically
//! given the same parameters and seeds.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::candidate::Candidate;
use crate::config::Parameters;
use crate::crossmatch::{self, MatchPolicy};
use crate::data::DataSource;
use crate::donor::Donor;
use crate::graph::{AdjacencyMatrix, MatchStore};
use crate::matching::Match;
use crate::node::{Node, NodeIndex};
use crate::rng::PortableRng;
use crate::survival::{Horizon, SurvivalTable};
use crate::types::Status;

/// Attempt budget per synthesized paired donor. Incompatibility rejection
/// sampling can stall on candidates that accept nearly everyone; past the
/// budget the last draw is kept.
const DONOR_ATTEMPT_LIMIT: u32 = 500;

/// All simulation inputs for one iteration.
#[derive(Debug, Clone)]
pub struct Record {
    pub nodes: Vec<Node>,
    /// Per-node status timeline: (day, new status), in time order. The first
    /// entry is the arrival activation.
    pub transitions: Vec<VecDeque<(u32, Status)>>,
    pub matches: MatchStore,
    pub adjacency: AdjacencyMatrix,
    pub adjacency_reduced: AdjacencyMatrix,
}

impl Record {
    /// Generates the pool for `iteration`, deriving each stream's seed as
    /// `base * iteration`.
    pub fn generate(params: &Parameters, data: &DataSource, iteration: u32) -> Self {
        let it = i64::from(iteration);
        let mut rng_selection = PortableRng::new(params.seeds.selection * it);
        let mut rng_arrival = PortableRng::new(params.seeds.arrival * it);
        let mut rng_match = PortableRng::new(params.seeds.matching * it);
        let mut rng_donor = PortableRng::new(params.seeds.donor * it);
        let mut rng_status = PortableRng::new(params.seeds.status * it);
        let mut rng_attrition = PortableRng::new(params.seeds.attrition * it);

        let nodes = assemble_pool(params, data, &mut rng_selection, &mut rng_arrival, &mut rng_donor);
        let transitions = assign_state_transitions(params, &nodes, &mut rng_attrition, &mut rng_status);
        let (matches, adjacency, adjacency_reduced) =
            assign_match_properties(params, data, &nodes, &mut rng_match);

        info!(
            iteration,
            nodes = nodes.len(),
            "simulation data generated"
        );

        Record {
            nodes,
            transitions,
            matches,
            adjacency,
            adjacency_reduced,
        }
    }

    /// Per-donor population snapshot rows for the population sink.
    pub fn population_rows(&self, iteration: u32) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for node in &self.nodes {
            for (k, donor) in node.donors.iter().enumerate() {
                let mut row = vec![
                    iteration.to_string(),
                    node.id.to_string(),
                    k.to_string(),
                    node.node_type().to_string(),
                    node.arrival_time.to_string(),
                ];
                row.extend(node.candidate_csv_fields());
                row.extend(donor.csv_fields());
                rows.push(row);
            }
        }
        rows
    }
}

/// Poisson arrivals of NDDs and pairs across the simulation horizon.
fn assemble_pool(
    params: &Parameters,
    data: &DataSource,
    rng_selection: &mut PortableRng,
    rng_arrival: &mut PortableRng,
    rng_donor: &mut PortableRng,
) -> Vec<Node> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut ndd_tracker = rng_arrival.rexp(params.ndd_arrival_rate);
    let mut pair_tracker = rng_arrival.rexp(params.pair_arrival_rate);

    for day in 1..=params.time_span {
        let now = f64::from(day);

        while ndd_tracker <= now {
            let donor = synthesize_donor(data, rng_donor);
            debug!(day, id = nodes.len(), "NDD joins");
            nodes.push(Node::ndd(nodes.len(), day, donor));
            ndd_tracker += rng_arrival.rexp(params.ndd_arrival_rate);
        }

        while pair_tracker <= now {
            let (candidate, donor_count) = data.draw_candidate(rng_selection.runif());
            let candidate = candidate.clone();
            let donors = generate_incompatible_donors(params, data, &candidate, donor_count, rng_donor);
            debug!(day, id = nodes.len(), donors = donors.len(), "pair joins");
            nodes.push(Node::pair(nodes.len(), day, donors, candidate));
            pair_tracker += rng_arrival.rexp(params.pair_arrival_rate);
        }
    }

    nodes
}

fn synthesize_donor(data: &DataSource, rng_donor: &mut PortableRng) -> Donor {
    let draws = [
        rng_donor.runif(),
        rng_donor.runif(),
        rng_donor.runif(),
        rng_donor.runif(),
        rng_donor.runif(),
    ];
    data.synthesize_donor(draws)
}

/// Draws donors until `count` of them are virtually incompatible with the
/// candidate; members of the exchange are incompatible pairs by definition.
fn generate_incompatible_donors(
    params: &Parameters,
    data: &DataSource,
    candidate: &Candidate,
    count: usize,
    rng_donor: &mut PortableRng,
) -> Vec<Donor> {
    let policy = MatchPolicy {
        allow_desensitization: params.allow_desensitization,
        reserve_o_donors_for_o_candidates: params.reserve_o_donors_for_o_candidates,
    };
    let mut donors = Vec::with_capacity(count);
    while donors.len() < count {
        let mut attempts = 0;
        let donor = loop {
            let donor = synthesize_donor(data, rng_donor);
            let result =
                crossmatch::virtual_crossmatch(candidate, &donor, data.hla_dictionary());
            if !policy.allows(result) {
                break donor;
            }
            attempts += 1;
            if attempts >= DONOR_ATTEMPT_LIMIT {
                debug!(candidate = candidate.id, "donor incompatibility budget spent");
                break donor;
            }
        };
        donors.push(donor);
    }
    donors
}

/// Daily Bernoulli state transitions per node, out to the end of the
/// post-selection window. Withdrawal draws come from the attrition stream,
/// activity flips from the status stream.
fn assign_state_transitions(
    params: &Parameters,
    nodes: &[Node],
    rng_attrition: &mut PortableRng,
    rng_status: &mut PortableRng,
) -> Vec<VecDeque<(u32, Status)>> {
    let end = params.time_span + params.post_selection_inactive_period;
    let mut all = Vec::with_capacity(nodes.len());

    for node in nodes {
        let mut timeline = VecDeque::new();
        let mut time = node.arrival_time;
        let mut status = Status::Active;
        timeline.push_back((time, status));

        if node.is_pair() {
            while time < end && status != Status::Withdrawn {
                time += 1;
                let withdraw = rng_attrition.runif();
                let flip = rng_status.runif();
                if withdraw < params.prob_pair_attrition {
                    status = Status::Withdrawn;
                    timeline.push_back((time, status));
                } else if status == Status::Active && flip < params.prob_pair_active_to_inactive {
                    status = Status::Inactive;
                    timeline.push_back((time, status));
                } else if status == Status::Inactive && flip < params.prob_pair_inactive_to_active {
                    status = Status::Active;
                    timeline.push_back((time, status));
                }
            }
        } else {
            while time < end && status != Status::Withdrawn {
                time += 1;
                if rng_attrition.runif() < params.prob_ndd_attrition {
                    status = Status::Withdrawn;
                    timeline.push_back((time, status));
                }
            }
        }

        all.push(timeline);
    }

    all
}

/// Builds every donor-level match and both adjacency matrices.
fn assign_match_properties(
    params: &Parameters,
    data: &DataSource,
    nodes: &[Node],
    rng_match: &mut PortableRng,
) -> (MatchStore, AdjacencyMatrix, AdjacencyMatrix) {
    let order = nodes.len();
    let policy = MatchPolicy {
        allow_desensitization: params.allow_desensitization,
        reserve_o_donors_for_o_candidates: params.reserve_o_donors_for_o_candidates,
    };
    let mut store = MatchStore::new();
    let mut adjacency = AdjacencyMatrix::new(order);
    let mut reduced = AdjacencyMatrix::new(order);

    for (i, donor_node) in nodes.iter().enumerate() {
        for (j, candidate_node) in nodes.iter().enumerate() {
            if i == j {
                continue;
            }
            match candidate_node.candidate() {
                None => {
                    // Implicit backward edge from every pair to an NDD.
                    if donor_node.is_pair() {
                        adjacency.set(i as NodeIndex, j as NodeIndex, true);
                    }
                }
                Some(candidate) => {
                    let mut edge_list = Vec::with_capacity(donor_node.donor_count());
                    let mut any = false;
                    for donor in &donor_node.donors {
                        let result = crossmatch::virtual_crossmatch(
                            candidate,
                            donor,
                            data.hla_dictionary(),
                        );
                        if policy.allows(result) {
                            any = true;
                            edge_list.push(generate_match(
                                params,
                                data.survival_table(),
                                candidate,
                                donor,
                                result,
                                rng_match,
                            ));
                        } else {
                            edge_list.push(Match::placeholder(result));
                        }
                    }
                    if any {
                        adjacency.set(i, j, true);
                        reduced.set(i, j, true);
                    }
                    store.set_matches(i, j, edge_list);
                }
            }
        }
    }

    (store, adjacency, reduced)
}

/// Success probability bands by candidate sensitization.
fn success_probability(pra: u32) -> f64 {
    match pra {
        0..=24 => 0.95,
        25..=49 => 0.80,
        50..=74 => 0.65,
        _ => 0.50,
    }
}

/// Materializes one adjacency-true match: survival scores, difficulty,
/// random utility draw, PRA-banded success probabilities, and the lab
/// crossmatch outcome drawn against the actual probability.
fn generate_match(
    params: &Parameters,
    survival: &SurvivalTable,
    candidate: &Candidate,
    donor: &Donor,
    virtual_result: crate::types::CrossmatchResult,
    rng_match: &mut PortableRng,
) -> Match {
    let five_year = survival.graft_survival(candidate, donor, Horizon::FiveYear);
    let ten_year = survival.graft_survival(candidate, donor, Horizon::TenYear);

    let difficulty = if candidate.pra >= 97 || donor.blood_type == crate::types::BloodType::Ab {
        1.0
    } else {
        0.0001
    };

    let random_utility = rng_match.runif_in(
        params.match_utility_lower_bound,
        params.match_utility_upper_bound,
    );

    let probability = success_probability(candidate.pra);
    let lab_crossmatch = rng_match.runif() < probability;

    Match {
        adjacency: true,
        five_year_survival: five_year,
        ten_year_survival: ten_year,
        difficulty_score: difficulty,
        random_utility,
        assumed_success_probability: probability,
        actual_success_probability: probability,
        virtual_crossmatch: virtual_result,
        lab_crossmatch,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::crossmatch::HlaDictionary;
    use crate::types::{BloodType, Insurance, Race, Status};

    fn candidate(matching_id: u32, blood_type: BloodType, pra: u32) -> Candidate {
        Candidate {
            matching_id,
            id: matching_id + 100,
            pra,
            blood_type,
            unacceptable_hla: Vec::new(),
            desensitizable_hla: Vec::new(),
            age: 45,
            male: true,
            race: Race::White,
            diabetes: false,
            height: 1.75,
            weight: 80.0,
            previous_transplant: false,
            time_on_dialysis: 1.0,
            hep_c: false,
            insurance: Insurance::Private,
            epts: 0.0,
        }
    }

    fn source() -> DataSource {
        let candidates = vec![
            candidate(1, BloodType::O, 10),
            candidate(2, BloodType::A, 60),
        ];
        let counts: HashMap<u32, usize> = [(1, 1), (2, 2)].into();
        DataSource::from_parts(
            HlaDictionary::new(),
            SurvivalTable::new(),
            vec![vec!["A1".into()], vec!["B8".into()]],
            vec![0.5, 0.5],
            candidates,
            counts,
        )
    }

    fn quick_params() -> Parameters {
        let mut params = Parameters::default();
        params.time_span = 20;
        params.post_selection_inactive_period = 5;
        params.pair_arrival_rate = 0.5;
        params.ndd_arrival_rate = 0.2;
        params.prob_pair_attrition = 0.05;
        params.prob_ndd_attrition = 0.05;
        params
    }

    #[test]
    fn test_generation_is_reproducible() {
        let data = source();
        let params = quick_params();
        let first = Record::generate(&params, &data, 3);
        let second = Record::generate(&params, &data, 3);
        assert_eq!(first.nodes.len(), second.nodes.len());
        assert_eq!(first.transitions, second.transitions);
        for (a, b) in first.nodes.iter().zip(&second.nodes) {
            assert_eq!(a.node_type(), b.node_type());
            assert_eq!(a.arrival_time, b.arrival_time);
        }
    }

    #[test]
    fn test_different_iterations_differ() {
        let data = source();
        let params = quick_params();
        let first = Record::generate(&params, &data, 1);
        let second = Record::generate(&params, &data, 2);
        // Seeds scale with the iteration index, so the pools diverge.
        let same_arrivals = first.nodes.len() == second.nodes.len()
            && first
                .nodes
                .iter()
                .zip(&second.nodes)
                .all(|(a, b)| a.arrival_time == b.arrival_time);
        assert!(!same_arrivals || first.transitions != second.transitions);
    }

    #[test]
    fn test_timelines_start_active_and_withdrawal_is_final() {
        let data = source();
        let params = quick_params();
        let record = Record::generate(&params, &data, 5);
        for (node, timeline) in record.nodes.iter().zip(&record.transitions) {
            let &(first_time, first_status) = timeline.front().unwrap();
            assert_eq!(first_time, node.arrival_time);
            assert_eq!(first_status, Status::Active);

            let mut saw_withdrawn = false;
            let mut previous_time = 0;
            for &(time, status) in timeline {
                assert!(time >= previous_time);
                previous_time = time;
                assert!(!saw_withdrawn, "no transitions after withdrawal");
                if status == Status::Withdrawn {
                    saw_withdrawn = true;
                }
                assert!(time <= params.time_span + params.post_selection_inactive_period);
            }
        }
    }

    #[test]
    fn test_pair_donor_counts_follow_the_drawn_candidate() {
        let data = source();
        let params = quick_params();
        let record = Record::generate(&params, &data, 7);
        for node in record.nodes.iter().filter(|n| n.is_pair()) {
            let matching_id = node.candidate().unwrap().matching_id;
            let expected = if matching_id == 1 { 1 } else { 2 };
            assert_eq!(node.donor_count(), expected);
        }
    }

    #[test]
    fn test_adjacency_iff_allowable_donor_edge() {
        let data = source();
        let params = quick_params();
        let record = Record::generate(&params, &data, 2);
        let n = record.nodes.len();
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                if record.nodes[j].is_pair() {
                    let any = record.matches.any_adjacent(i, j);
                    assert_eq!(record.adjacency.get(i, j), any);
                    assert_eq!(record.adjacency_reduced.get(i, j), any);
                } else {
                    // Implicit backward edges only from pairs, never reduced.
                    assert_eq!(record.adjacency.get(i, j), record.nodes[i].is_pair());
                    assert!(!record.adjacency_reduced.get(i, j));
                }
            }
        }
    }

    #[test]
    fn test_generated_matches_follow_pra_bands() {
        let data = source();
        let params = quick_params();
        let record = Record::generate(&params, &data, 2);
        let n = record.nodes.len();
        for i in 0..n {
            for j in 0..n {
                if i == j || !record.nodes[j].is_pair() {
                    continue;
                }
                let pra = record.nodes[j].candidate_pra();
                for m in record.matches.donor_matches(i, j) {
                    if m.adjacency {
                        assert_eq!(m.assumed_success_probability, success_probability(pra));
                        assert_eq!(m.actual_success_probability, success_probability(pra));
                    }
                }
            }
        }
    }

    #[test]
    fn test_population_rows_cover_every_donor() {
        let data = source();
        let params = quick_params();
        let record = Record::generate(&params, &data, 2);
        let expected: usize = record.nodes.iter().map(Node::donor_count).sum();
        let rows = record.population_rows(2);
        assert_eq!(rows.len(), expected);
        for row in &rows {
            assert_eq!(row[0], "2");
        }
    }

    #[test]
    fn test_success_probability_bands() {
        assert_eq!(success_probability(0), 0.95);
        assert_eq!(success_probability(24), 0.95);
        assert_eq!(success_probability(25), 0.80);
        assert_eq!(success_probability(49), 0.80);
        assert_eq!(success_probability(50), 0.65);
        assert_eq!(success_probability(74), 0.65);
        assert_eq!(success_probability(75), 0.50);
        assert_eq!(success_probability(100), 0.50);
    }
}
