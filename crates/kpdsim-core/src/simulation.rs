//! The simulation event loop.
//!
//! Time advances in unit steps. Each day applies pending status transitions,
//! fires a match run when the schedule says so, and processes any arrangement
//! whose transplantation time has come: reveal lab crossmatches, re-optimize
//! locally, commit realized transplants, convert chain tails into bridge
//! donors, and return everything else to the pool. All pool mutation happens
//! here, between ticks.

use std::collections::VecDeque;
use std::io::Write;

use tracing::{info, info_span, warn};

use crate::arrangement::Arrangement;
use crate::config::Parameters;
use crate::data::DataSource;
use crate::error::{InvariantError, SimError};
use crate::graph::{AdjacencyMatrix, MatchStore};
use crate::matchrun::{MatchRun, StructureBounds};
use crate::node::{Node, NodeIndex};
use crate::output::{ExchangeRow, Sinks};
use crate::record::Record;
use crate::types::{OptimizationScheme, Status, TransplantStatus, yes_no};

/// Mutable pool state for one iteration.
struct IterationState {
    nodes: Vec<Node>,
    statuses: Vec<Status>,
    transplant: Vec<TransplantStatus>,
    transitions: Vec<VecDeque<(u32, Status)>>,
    matches: MatchStore,
    adjacency: AdjacencyMatrix,
    adjacency_reduced: AdjacencyMatrix,

    queue: VecDeque<Arrangement>,
    current_time: u32,
    match_run_count: u32,
}

impl IterationState {
    fn from_record(record: Record) -> Self {
        let count = record.nodes.len();
        IterationState {
            nodes: record.nodes,
            // Everyone starts inactive until the arrival transition fires.
            statuses: vec![Status::Inactive; count],
            transplant: vec![TransplantStatus::NotTransplanted; count],
            transitions: record.transitions,
            matches: record.matches,
            adjacency: record.adjacency,
            adjacency_reduced: record.adjacency_reduced,
            queue: VecDeque::new(),
            current_time: 0,
            match_run_count: 0,
        }
    }
}

/// Runs iterations against a fixed data source and parameter set.
pub struct Simulation<'a> {
    params: &'a Parameters,
    data: &'a DataSource,
}

impl<'a> Simulation<'a> {
    pub fn new(params: &'a Parameters, data: &'a DataSource) -> Self {
        Simulation { params, data }
    }

    /// Generates and runs one iteration end to end.
    pub fn run_iteration<W: Write>(
        &self,
        iteration: u32,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        let record = Record::generate(self.params, self.data, iteration);
        self.run_iteration_from_record(record, iteration, sinks)
    }

    /// Runs one iteration over an already-materialized record.
    pub fn run_iteration_from_record<W: Write>(
        &self,
        record: Record,
        iteration: u32,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        let span = info_span!("iteration", iteration);
        let _guard = span.enter();

        sinks.log_line(&format!("Iteration {iteration}"))?;
        for row in record.population_rows(iteration) {
            sinks.write_population_row(&row)?;
        }

        let mut state = IterationState::from_record(record);
        let mut match_times = self.params.match_run_times().into_iter().peekable();

        for day in 1..=self.params.time_span {
            state.current_time = day;
            self.run_state_transitions(&mut state, sinks)?;
            if match_times.next_if_eq(&day).is_some() {
                self.run_match_run(&mut state, iteration, sinks)?;
            }
            self.run_transplantations(&mut state, sinks)?;
        }

        // Post-selection window: no new match runs, but queued arrangements
        // still resolve and statuses keep moving.
        let horizon = self.params.time_span + self.params.post_selection_inactive_period;
        for day in self.params.time_span + 1..=horizon {
            state.current_time = day;
            self.run_state_transitions(&mut state, sinks)?;
            self.run_transplantations(&mut state, sinks)?;
        }

        sinks.flush()?;
        Ok(())
    }

    fn bounds(&self) -> StructureBounds {
        StructureBounds {
            max_cycle_size: self.params.max_cycle_size,
            max_chain_length: self.params.max_chain_length,
        }
    }

    /// Applies every transition scheduled for the current day.
    fn run_state_transitions<W: Write>(
        &self,
        state: &mut IterationState,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        for node in 0..state.nodes.len() {
            loop {
                let due = state.transitions[node]
                    .front()
                    .is_some_and(|&(time, _)| time == state.current_time);
                if !due {
                    break;
                }
                let (_, status) = state.transitions[node]
                    .pop_front()
                    .expect("front was checked above");
                self.update_status(state, node, status, sinks)?;
            }
        }
        Ok(())
    }

    fn update_status<W: Write>(
        &self,
        state: &mut IterationState,
        node: NodeIndex,
        new_status: Status,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        // Transplanted nodes are gone; bridge donors no longer follow their
        // original timeline.
        if state.transplant[node] == TransplantStatus::Transplanted
            || state.nodes[node].node_type() == crate::types::NodeType::Bridge
        {
            return Ok(());
        }
        let old_status = state.statuses[node];
        if old_status == new_status {
            return Ok(());
        }
        if old_status == Status::Withdrawn {
            return Err(InvariantError::IllegalStatusTransition {
                node,
                from: old_status.to_string(),
                to: new_status.to_string(),
            }
            .into());
        }

        sinks.log_line(&format!(
            "{}: Node {} ({} -> {})",
            state.current_time, node, old_status, new_status
        ))?;

        // A node leaving active while an arrangement is in flight fails its
        // candidate slot in every queued arrangement containing it.
        if new_status != Status::Active
            && state.transplant[node] == TransplantStatus::InProgress
        {
            for arrangement in &mut state.queue {
                arrangement.mark_unavailable(node);
            }
        }

        state.statuses[node] = new_status;
        Ok(())
    }

    /// Enumerate, value, select, and enqueue arrangements for this tick.
    fn run_match_run<W: Write>(
        &self,
        state: &mut IterationState,
        iteration: u32,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        state.match_run_count += 1;
        let match_run_index = state.match_run_count;
        let time = state.current_time;
        sinks.log_line(&format!("Match Run {match_run_index} at Time {time}"))?;

        let (arrangements, values, outcome) = {
            let mut run = MatchRun::new(
                self.params,
                iteration,
                match_run_index,
                time,
                &state.nodes,
                &state.statuses,
                &state.transplant,
                &state.matches,
                &state.adjacency,
                &state.adjacency_reduced,
            );
            let arrangements = run.collect_arrangements();
            let values = match self.params.optimization_scheme {
                OptimizationScheme::LocallyRelevantSubsets => {
                    run.assign_expected_utilities(&arrangements)
                }
                _ => run.assign_utilities(&arrangements),
            };
            let outcome = run.select(&arrangements, &values);
            (arrangements, values, outcome)
        };

        if arrangements.is_empty() {
            sinks.log_line("No Arrangements")?;
            return Ok(());
        }
        sinks.log_line(&format!(
            "Arrangements: {}, Selected Value: {}",
            arrangements.len(),
            outcome.objective
        ))?;

        for (index, arrangement) in arrangements.iter().enumerate() {
            let has_ndd = arrangement.iter().any(|&v| !state.nodes[v].is_pair());
            let selected = outcome.selected[index];

            sinks.write_exchange(&ExchangeRow {
                simulation: iteration,
                match_run: match_run_index,
                match_run_time: time,
                time_to_transplantation: self.params.post_selection_inactive_period,
                nodes: arrangement.len(),
                node_ids: arrangement
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(";"),
                has_ndd: yes_no(has_ndd).to_string(),
                assigned_value: values[index],
                selected: yes_no(selected).to_string(),
            })?;

            if selected {
                for &v in arrangement {
                    state.transplant[v] = TransplantStatus::InProgress;
                }
                let pending = Arrangement::new(
                    iteration,
                    match_run_index,
                    time,
                    time + self.params.post_selection_inactive_period,
                    values[index],
                    arrangement.clone(),
                    &state.nodes,
                    &state.matches,
                );
                sinks.log_line(&format!("Selected: {} IP", pending.label()))?;
                state.queue.push_back(pending);
            }
        }
        Ok(())
    }

    /// Resolves every arrangement whose transplantation time has arrived.
    fn run_transplantations<W: Write>(
        &self,
        state: &mut IterationState,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        while state
            .queue
            .front()
            .is_some_and(|a| a.transplant_time() <= state.current_time)
        {
            let arrangement = state
                .queue
                .pop_front()
                .expect("front was checked above");
            self.process_arrangement(state, arrangement, sinks)?;
        }
        Ok(())
    }

    fn process_arrangement<W: Write>(
        &self,
        state: &mut IterationState,
        mut arrangement: Arrangement,
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        let members = arrangement.node_indices().to_vec();
        for &node in &members {
            if node >= state.nodes.len() {
                return Err(InvariantError::UnknownNode {
                    node,
                    pool: state.nodes.len(),
                }
                .into());
            }
        }
        sinks.log_line(&format!(
            "{}: TX {}",
            state.current_time,
            arrangement.label()
        ))?;

        // 1. Reveal lab crossmatches on every planning edge inside the
        // arrangement; failures drop the edge from the global graph.
        for (j_local, &v) in members.iter().enumerate() {
            if !state.nodes[v].is_pair() {
                continue;
            }
            for (i_local, &u) in members.iter().enumerate() {
                if i_local == j_local {
                    continue;
                }
                for k in 0..state.nodes[u].donor_count() {
                    if !arrangement.edge_adjacent(i_local, j_local, k) {
                        continue;
                    }
                    if arrangement.edge_lab_result(i_local, j_local, k) {
                        sinks.log_line(&format!("Match {u}[{k}] -> {v} Successful"))?;
                        if let Some(m) = state.matches.get_mut(u, v, k) {
                            if m.assumed_success_probability != 1.0 {
                                m.assumed_success_probability = 1.0;
                            }
                        }
                    } else {
                        sinks.log_line(&format!("Match {u}[{k}] -> {v} Failed (Removed)"))?;
                        fail_match(state, u, v, k);
                    }
                }
            }
        }

        // 2. Local re-optimization over the surviving edges.
        let require_full =
            self.params.optimization_scheme == OptimizationScheme::CyclesAndChains;
        let options = arrangement.fallback_options(
            self.bounds(),
            self.params.allow_ab_bridge_donors,
            self.params.utility_scheme,
            require_full,
        );
        if options.is_empty() {
            sinks.log_line("No Options")?;
        }

        // 3. Commit each realized cycle or chain.
        for option in &options {
            let first = members[option[0]];
            if state.nodes[first].is_pair() {
                self.realize_cycle(state, &mut arrangement, &members, option, sinks)?;
            } else {
                self.realize_chain(state, &mut arrangement, &members, option, sinks)?;
            }
        }

        // 4. Whatever was not transplanted returns to the pool.
        for &node in &members {
            if state.transplant[node] == TransplantStatus::InProgress {
                state.transplant[node] = TransplantStatus::NotTransplanted;
                sinks.log_line(&format!(
                    "{} {} returned to pool",
                    state.nodes[node].node_type(),
                    node
                ))?;
            }
        }

        // 5. Transplant output rows.
        for row in arrangement.transplant_rows() {
            sinks.write_transplant_row(&row)?;
        }
        Ok(())
    }

    fn check_transplantable(
        &self,
        state: &IterationState,
        node: NodeIndex,
    ) -> Result<(), SimError> {
        if state.statuses[node] == Status::Withdrawn {
            return Err(InvariantError::TransplantWithdrawnNode {
                node,
                time: state.current_time,
            }
            .into());
        }
        Ok(())
    }

    fn realize_cycle<W: Write>(
        &self,
        state: &mut IterationState,
        arrangement: &mut Arrangement,
        members: &[NodeIndex],
        option: &[usize],
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        sinks.log_line(&format!("Cycle of Size {}", option.len()))?;
        let scheme = self.params.utility_scheme;

        for window in option.windows(2) {
            let donor = arrangement.select_donor(window[0], window[1], scheme);
            let target = members[window[1]];
            self.check_transplantable(state, target)?;
            state.transplant[target] = TransplantStatus::Transplanted;
            sinks.log_line(&transplant_log_line(members[window[0]], donor, target))?;
        }
        let last = *option.last().expect("cycles are non-empty");
        let donor = arrangement.select_donor(last, option[0], scheme);
        let target = members[option[0]];
        self.check_transplantable(state, target)?;
        state.transplant[target] = TransplantStatus::Transplanted;
        sinks.log_line(&transplant_log_line(members[last], donor, target))?;
        Ok(())
    }

    fn realize_chain<W: Write>(
        &self,
        state: &mut IterationState,
        arrangement: &mut Arrangement,
        members: &[NodeIndex],
        option: &[usize],
        sinks: &mut Sinks<W>,
    ) -> Result<(), SimError> {
        sinks.log_line(&format!("Chain of Length {}", option.len() - 1))?;
        let scheme = self.params.utility_scheme;

        // Every node but the tail is consumed: its donor gave, and (for
        // pairs) its candidate received from the predecessor.
        for window in option.windows(2) {
            let donor = arrangement.select_donor(window[0], window[1], scheme);
            let target = members[window[1]];
            self.check_transplantable(state, target)?;
            state.transplant[members[window[0]]] = TransplantStatus::Transplanted;
            sinks.log_line(&transplant_log_line(members[window[0]], donor, target))?;
        }

        // The tail keeps donating: its node becomes a bridge donor.
        let bridge = members[*option.last().expect("chains are non-empty")];
        state.nodes[bridge].into_bridge();
        state.transplant[bridge] = TransplantStatus::NotTransplanted;
        rewrite_bridge_adjacency(state, bridge);
        sinks.log_line(&format!("Node {bridge} now Bridge Donor, returned to pool"))?;
        Ok(())
    }
}

fn transplant_log_line(donor_node: NodeIndex, donor: Option<usize>, target: NodeIndex) -> String {
    match donor {
        Some(k) => format!("Transplant {donor_node}[{k}] -> {target} Recorded"),
        None => format!("Transplant {donor_node}[-] -> {target} Recorded"),
    }
}

/// Drops one donor-level edge; clears node-level adjacency when no adjacent
/// donor remains.
fn fail_match(state: &mut IterationState, u: NodeIndex, v: NodeIndex, k: usize) {
    if let Some(m) = state.matches.get_mut(u, v, k) {
        m.fail_lab();
    }
    if !state.matches.any_adjacent(u, v) {
        state.adjacency.set(u, v, false);
        state.adjacency_reduced.set(u, v, false);
    }
}

/// Rebuilds adjacency around a fresh bridge donor: all pre-existing edges in
/// or out of the node are dropped (outgoing ones only toward other donor-only
/// nodes), then every pair gets an implicit certain edge to the bridge.
fn rewrite_bridge_adjacency(state: &mut IterationState, bridge: NodeIndex) {
    for other in 0..state.nodes.len() {
        if other == bridge {
            continue;
        }
        if state.adjacency.get(other, bridge) {
            for k in 0..state.nodes[other].donor_count() {
                fail_match(state, other, bridge, k);
            }
        }
        if state.adjacency.get(bridge, other) && !state.nodes[other].is_pair() {
            for k in 0..state.nodes[bridge].donor_count() {
                fail_match(state, bridge, other, k);
            }
        }
        if state.nodes[other].is_pair() {
            state.adjacency.set(other, bridge, true);
            let count = state.nodes[other].donor_count();
            state
                .matches
                .set_matches(other, bridge, vec![crate::matching::Match::implicit(); count]);
        }
    }
}

/// Drives all configured iterations, recovering per iteration: an invariant
/// violation aborts only the iteration it happened in.
pub fn run_all_iterations<W: Write>(
    params: &Parameters,
    data: &DataSource,
    sinks: &mut Sinks<W>,
) -> Result<u32, SimError> {
    let simulation = Simulation::new(params, data);
    let start = params.starting_iteration_id;
    let mut completed = 0;
    for iteration in start..start + params.number_of_iterations {
        match simulation.run_iteration(iteration, sinks) {
            Ok(()) => {
                completed += 1;
                info!(iteration, "iteration complete");
            }
            Err(SimError::Invariant(violation)) => {
                warn!(iteration, %violation, "iteration aborted");
                sinks.log_line(&format!("Iteration {iteration} aborted: {violation}"))?;
            }
            Err(fatal) => return Err(fatal),
        }
    }
    Ok(completed)
}


#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::crossmatch::HlaDictionary;
    use crate::matchrun::testutil::{candidate, ndd, pair, wire};
    use crate::node::Node;
    use crate::record::Record;
    use crate::survival::SurvivalTable;
    use crate::types::BloodType;

    struct Captured {
        exchanges: String,
        transplants: String,
        population: String,
        log: String,
    }

    /// Lends in-memory sinks to `f`, then hands back everything written.
    fn capture<F>(f: F) -> Captured
    where
        F: FnOnce(&mut Sinks<&mut Vec<u8>>),
    {
        let mut exchanges = Vec::new();
        let mut transplants = Vec::new();
        let mut population = Vec::new();
        let mut log = Vec::new();
        {
            let mut sinks = Sinks::from_writers(
                Some(&mut exchanges),
                &mut transplants,
                Some(&mut population),
                &mut log,
            )
            .unwrap();
            f(&mut sinks);
            sinks.flush().unwrap();
        }
        Captured {
            exchanges: String::from_utf8(exchanges).unwrap(),
            transplants: String::from_utf8(transplants).unwrap(),
            population: String::from_utf8(population).unwrap(),
            log: String::from_utf8(log).unwrap(),
        }
    }

    fn empty_source() -> DataSource {
        DataSource::from_parts(
            HlaDictionary::new(),
            SurvivalTable::new(),
            vec![vec!["A1".into()]],
            vec![1.0],
            vec![candidate(1, BloodType::O, 10)],
            [(1u32, 1usize)].into(),
        )
    }

    /// A record whose nodes all arrive on day 1 and never transition again.
    fn fixed_record(nodes: Vec<Node>) -> Record {
        let (matches, adjacency, adjacency_reduced) = wire(&nodes);
        let transitions = nodes
            .iter()
            .map(|_| VecDeque::from([(1u32, Status::Active)]))
            .collect();
        let mut nodes = nodes;
        for node in &mut nodes {
            node.arrival_time = 1;
        }
        Record {
            nodes,
            transitions,
            matches,
            adjacency,
            adjacency_reduced,
        }
    }

    fn scenario_params() -> Parameters {
        let mut params = Parameters::default();
        params.time_span = 10;
        params.time_between_match_runs = 5;
        params.post_selection_inactive_period = 3;
        params.max_cycle_size = 3;
        params.max_chain_length = 3;
        params
    }

    #[test]
    fn test_two_cycle_realizes_both_transplants() {
        // Scenario: P0 (cand O, donor A) and P1 (cand A, donor O) with all
        // labs passing realize a 2-cycle; both candidates are transplanted.
        let record = fixed_record(vec![
            pair(0, BloodType::O, &[BloodType::A]),
            pair(1, BloodType::A, &[BloodType::O]),
        ]);
        let params = scenario_params();
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);

        let out = capture(|sinks| {
            simulation.run_iteration_from_record(record, 1, sinks).unwrap();
        });

        // The 2-cycle was offered and selected with utility 2.
        assert!(out.exchanges.contains("0;1,No,2.0,Yes"));
        // Two realized transplants, both flagged as the chosen donor.
        assert_eq!(
            out.transplants
                .lines()
                .filter(|l| l.ends_with(",T"))
                .count(),
            2
        );
        assert!(out.log.contains("Cycle of Size 2"));
        // One population row per donor.
        assert_eq!(out.population.lines().count(), 3);
    }

    #[test]
    fn test_three_chain_lab_failure_collapses_and_creates_bridge() {
        // Scenario: NDD(O) -> P1(cand A, donor B) -> P2(cand B, donor O).
        // The labs between P1 and P2 fail in both directions; the fallback
        // keeps the single-edge chain NDD -> P1, P1's donor becomes a bridge
        // with only implicit incoming edges, and P2 returns to the pool.
        let nodes = vec![
            ndd(0, BloodType::O),
            pair(1, BloodType::A, &[BloodType::B]),
            pair(2, BloodType::B, &[BloodType::O]),
        ];
        let mut record = fixed_record(nodes);
        record.matches.get_mut(1, 2, 0).unwrap().lab_crossmatch = false;
        record.matches.get_mut(2, 1, 0).unwrap().lab_crossmatch = false;

        let params = scenario_params();
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);

        // Drive the state by hand so the pool is inspectable afterwards.
        let mut state = IterationState::from_record(record);
        capture(|sinks| {
            state.current_time = 1;
            simulation.run_state_transitions(&mut state, sinks).unwrap();
            simulation.run_match_run(&mut state, 1, sinks).unwrap();
            assert_eq!(state.queue.len(), 1);
            state.current_time = 1 + params.post_selection_inactive_period;
            simulation.run_transplantations(&mut state, sinks).unwrap();
        });

        // NDD consumed, P1's node became the bridge, P2 back in the pool.
        assert_eq!(state.transplant[0], TransplantStatus::Transplanted);
        assert_eq!(state.transplant[1], TransplantStatus::NotTransplanted);
        assert_eq!(state.nodes[1].node_type(), crate::types::NodeType::Bridge);
        assert_eq!(state.transplant[2], TransplantStatus::NotTransplanted);
        assert_eq!(state.nodes[2].node_type(), crate::types::NodeType::Pair);

        // Bridge rewrite: implicit certain edge from the remaining pair, and
        // nothing else into or out of the bridge.
        assert!(state.adjacency.get(2, 1));
        let implicit = state.matches.get(2, 1, 0).unwrap();
        assert!(implicit.adjacency);
        assert_eq!(implicit.assumed_success_probability, 1.0);
        assert_eq!(implicit.actual_success_probability, 1.0);
        assert_eq!(
            implicit.virtual_crossmatch,
            crate::types::CrossmatchResult::Successful
        );
        assert!(implicit.lab_crossmatch);
        // The reduced matrix never carries edges into donor-only nodes.
        assert!(!state.adjacency_reduced.get(2, 1));
        // The bridge's old incoming planning edge from the NDD side is gone.
        assert!(!state.adjacency.get(0, 1));
    }

    #[test]
    fn test_fallback_with_clean_labs_matches_original_selection() {
        // With every lab passing and statuses unchanged, the fallback
        // realizes exactly the structure that was selected.
        let record = fixed_record(vec![
            pair(0, BloodType::O, &[BloodType::A]),
            pair(1, BloodType::A, &[BloodType::O]),
        ]);
        let params = scenario_params();
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);

        let mut state = IterationState::from_record(record);
        capture(|sinks| {
            state.current_time = 1;
            simulation.run_state_transitions(&mut state, sinks).unwrap();
            simulation.run_match_run(&mut state, 1, sinks).unwrap();
            state.current_time = 1 + params.post_selection_inactive_period;
            simulation.run_transplantations(&mut state, sinks).unwrap();
        });

        assert_eq!(state.transplant[0], TransplantStatus::Transplanted);
        assert_eq!(state.transplant[1], TransplantStatus::Transplanted);
    }

    #[test]
    fn test_empty_pool_completes() {
        let record = fixed_record(Vec::new());
        let params = scenario_params();
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);
        let out = capture(|sinks| {
            simulation.run_iteration_from_record(record, 1, sinks).unwrap();
        });
        // Header only.
        assert_eq!(out.transplants.lines().count(), 1);
    }

    #[test]
    fn test_boundary_two_cycles_only() {
        // max_cycle_size = 2 and max_chain_length = 0: the NDD can never
        // start a chain, and only the 2-cycle realizes.
        let record = fixed_record(vec![
            ndd(0, BloodType::O),
            pair(1, BloodType::O, &[BloodType::A]),
            pair(2, BloodType::A, &[BloodType::O]),
        ]);
        let mut params = scenario_params();
        params.max_cycle_size = 2;
        params.max_chain_length = 0;
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);

        let out = capture(|sinks| {
            simulation.run_iteration_from_record(record, 1, sinks).unwrap();
        });
        assert!(out.exchanges.contains("1;2"));
        assert!(!out.exchanges.contains("0;"));
        assert!(!out.log.contains("Chain of Length"));
        assert!(out.log.contains("Cycle of Size 2"));
    }

    #[test]
    fn test_determinism_identical_runs_byte_identical() {
        let data = empty_source();
        let mut params = scenario_params();
        params.pair_arrival_rate = 0.4;
        params.ndd_arrival_rate = 0.1;
        params.number_of_iterations = 2;
        params.starting_iteration_id = 1;

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let out = capture(|sinks| {
                run_all_iterations(&params, &data, sinks).unwrap();
            });
            outputs.push(out);
        }
        assert_eq!(outputs[0].exchanges, outputs[1].exchanges);
        assert_eq!(outputs[0].transplants, outputs[1].transplants);
        assert_eq!(outputs[0].population, outputs[1].population);
        assert_eq!(outputs[0].log, outputs[1].log);
    }

    #[test]
    fn test_withdrawal_before_transplant_skips_the_node() {
        // P1 withdraws while in progress: its slot goes unavailable and the
        // fallback finds nothing, so nothing is transplanted.
        let nodes = vec![
            pair(0, BloodType::O, &[BloodType::A]),
            pair(1, BloodType::A, &[BloodType::O]),
        ];
        let mut record = fixed_record(nodes);
        record.transitions[1] =
            VecDeque::from([(1u32, Status::Active), (2u32, Status::Withdrawn)]);

        let params = scenario_params();
        let data = empty_source();
        let simulation = Simulation::new(&params, &data);

        let mut state = IterationState::from_record(record);
        capture(|sinks| {
            state.current_time = 1;
            simulation.run_state_transitions(&mut state, sinks).unwrap();
            simulation.run_match_run(&mut state, 1, sinks).unwrap();
            assert_eq!(state.queue.len(), 1);

            state.current_time = 2;
            simulation.run_state_transitions(&mut state, sinks).unwrap();

            state.current_time = 1 + params.post_selection_inactive_period;
            simulation.run_transplantations(&mut state, sinks).unwrap();
        });

        assert_eq!(state.transplant[0], TransplantStatus::NotTransplanted);
        assert_eq!(state.transplant[1], TransplantStatus::NotTransplanted);
        assert_eq!(state.statuses[1], Status::Withdrawn);
    }
}
