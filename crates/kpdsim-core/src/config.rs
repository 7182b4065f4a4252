//! Simulation parameters and the `key=value` parameter-file format.
//!
//! Keys may carry a leading `#` (the historical file format wrote them that
//! way); values follow a single `=`. Blank lines are skipped. Unknown keys and
//! malformed values fail start-up, per the error-handling contract.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{OptimizationScheme, PlanningModel, UtilityScheme};

/// Seed block for the seven per-purpose random streams.
#[derive(Debug, Clone, Copy)]
pub struct RngSeeds {
    pub selection: i64,
    pub attrition: i64,
    pub arrival: i64,
    pub matching: i64,
    pub donor: i64,
    pub status: i64,
    pub expected_utility: i64,
}

impl Default for RngSeeds {
    fn default() -> Self {
        RngSeeds {
            selection: 9_007_900,
            attrition: 52_531,
            arrival: 5_416_162,
            matching: 3_102_156,
            donor: 3_942_252,
            status: 7_156_372,
            expected_utility: 1_923_323,
        }
    }
}

/// Read-only simulation configuration.
#[derive(Debug, Clone)]
pub struct Parameters {
    // Output location
    pub output_folder: String,
    pub sub_folder: String,

    // Simulation settings
    pub optimization_scheme: OptimizationScheme,
    pub utility_scheme: UtilityScheme,

    pub number_of_iterations: u32,
    pub starting_iteration_id: u32,

    // Structure bounds
    pub max_cycle_size: usize,
    pub max_chain_length: usize,
    pub max_lrs_size: usize,

    // Timeline
    pub time_span: u32,
    pub time_between_match_runs: u32,
    pub post_selection_inactive_period: u32,

    // Arrival and transition rates
    pub pair_arrival_rate: f64,
    pub ndd_arrival_rate: f64,
    pub prob_pair_attrition: f64,
    pub prob_ndd_attrition: f64,
    pub prob_pair_active_to_inactive: f64,
    pub prob_pair_inactive_to_active: f64,

    // Policy gates
    pub allow_ab_bridge_donors: bool,
    pub allow_desensitization: bool,
    pub reserve_o_donors_for_o_candidates: bool,

    // Expected utility
    pub estimate_expected_utility: bool,
    pub n_eu_iterations: u32,
    pub planning_model: PlanningModel,
    pub assumed_candidate_availability: f64,
    pub assumed_pair_donor_availability: f64,
    pub assumed_ndd_availability: f64,

    // High-PRA advantage
    pub add_pra_advantage: bool,
    pub pra_advantage_cutoff: f64,
    pub pra_advantage_value: f64,

    // Random-utility bounds for match generation
    pub match_utility_lower_bound: f64,
    pub match_utility_upper_bound: f64,

    // Input tables
    pub file_kpd_data: String,
    pub file_hla_frequency: String,
    pub file_hla_dictionary: String,
    pub file_survival_parameters: String,

    // Output suppression
    pub suppress_exchange_output: bool,
    pub suppress_population_output: bool,

    pub seeds: RngSeeds,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            output_folder: "Test".into(),
            sub_folder: "Test".into(),

            optimization_scheme: OptimizationScheme::CyclesAndChainsWithFallbacks,
            utility_scheme: UtilityScheme::Transplants,

            number_of_iterations: 200,
            starting_iteration_id: 1,

            max_cycle_size: 3,
            max_chain_length: 3,
            max_lrs_size: 4,

            time_span: 1095,
            time_between_match_runs: 1,
            post_selection_inactive_period: 30,

            pair_arrival_rate: 500.0,
            ndd_arrival_rate: 10.0,
            prob_pair_attrition: 0.005,
            prob_ndd_attrition: 0.005,
            prob_pair_active_to_inactive: 0.01,
            prob_pair_inactive_to_active: 0.02,

            allow_ab_bridge_donors: false,
            allow_desensitization: true,
            reserve_o_donors_for_o_candidates: false,

            estimate_expected_utility: false,
            n_eu_iterations: 100,
            planning_model: PlanningModel::PerfectInformation,
            assumed_candidate_availability: 1.0,
            assumed_pair_donor_availability: 1.0,
            assumed_ndd_availability: 1.0,

            add_pra_advantage: false,
            pra_advantage_cutoff: 97.0,
            pra_advantage_value: 1.0,

            match_utility_lower_bound: 1.0,
            match_utility_upper_bound: 1.0,

            file_kpd_data: "APDData.csv".into(),
            file_hla_frequency: "HLAFrequency.csv".into(),
            file_hla_dictionary: "HLADictionary.csv".into(),
            file_survival_parameters: "SurvivalParameters.csv".into(),

            suppress_exchange_output: false,
            suppress_population_output: false,

            seeds: RngSeeds::default(),
        }
    }
}

impl Parameters {
    /// Loads parameters from a file, starting from the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&text)
    }

    /// Parses `key=value` lines, starting from the defaults.
    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        let mut params = Parameters::default();
        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            let (raw_key, value) = match line.split_once('=') {
                Some(split) => split,
                None => {
                    return Err(ConfigError::InvalidValue {
                        line: line_no,
                        key: line.to_string(),
                        value: String::new(),
                    });
                }
            };
            let key = raw_key.trim().trim_start_matches('#');
            let value = value.trim();
            params.apply(line_no, key, value)?;
        }
        params.validate()?;
        Ok(params)
    }

    fn apply(&mut self, line: usize, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            line,
            key: key.to_string(),
            value: value.to_string(),
        };

        macro_rules! parse {
            ($ty:ty) => {
                value.parse::<$ty>().map_err(|_| invalid())?
            };
        }

        match key {
            "outputfolder" => self.output_folder = value.to_string(),
            "subfolder" => self.sub_folder = value.to_string(),

            "optimizationscheme" => {
                self.optimization_scheme =
                    OptimizationScheme::from_token(value).ok_or_else(invalid)?;
            }
            "utilityscheme" => {
                self.utility_scheme = UtilityScheme::from_token(value).ok_or_else(invalid)?;
            }

            "numberofiterations" => self.number_of_iterations = parse!(u32),
            "startingiterationid" => self.starting_iteration_id = parse!(u32),

            "maxcyclesize" => self.max_cycle_size = parse!(usize),
            "maxchainlength" => self.max_chain_length = parse!(usize),
            "maxlrssize" => self.max_lrs_size = parse!(usize),

            "timespan" => self.time_span = parse!(u32),
            "timebetweenmatchruns" => self.time_between_match_runs = parse!(u32),
            "postselectioninactiveperiod" => self.post_selection_inactive_period = parse!(u32),

            "pairarrivals" => self.pair_arrival_rate = parse!(f64),
            "nddarrivals" => self.ndd_arrival_rate = parse!(f64),
            "probpairattrition" => self.prob_pair_attrition = parse!(f64),
            "probnddattrition" => self.prob_ndd_attrition = parse!(f64),
            "probpairactivetoinactive" => self.prob_pair_active_to_inactive = parse!(f64),
            "probpairinactivetoactive" => self.prob_pair_inactive_to_active = parse!(f64),

            "allowabbridgedonors" => self.allow_ab_bridge_donors = parse_bool(value).ok_or_else(invalid)?,
            "allowdesensitization" => {
                self.allow_desensitization = parse_bool(value).ok_or_else(invalid)?;
            }
            "reserveodonorsforocandidates" => {
                self.reserve_o_donors_for_o_candidates = parse_bool(value).ok_or_else(invalid)?;
            }

            "estimateexpectedutility" => {
                self.estimate_expected_utility = parse_bool(value).ok_or_else(invalid)?;
            }
            "neuiterations" => self.n_eu_iterations = parse!(u32),
            "planningmodel" => {
                self.planning_model = PlanningModel::from_token(value).ok_or_else(invalid)?;
            }
            "assumedcandidateavailability" => self.assumed_candidate_availability = parse!(f64),
            "assumedpairdonoravailability" => self.assumed_pair_donor_availability = parse!(f64),
            "assumednddavailability" => self.assumed_ndd_availability = parse!(f64),

            "addpraadvantage" => self.add_pra_advantage = parse_bool(value).ok_or_else(invalid)?,
            "praadvantagecutoff" => self.pra_advantage_cutoff = parse!(f64),
            "praadvantagevalue" => self.pra_advantage_value = parse!(f64),

            "matchutilitylowerbound" => self.match_utility_lower_bound = parse!(f64),
            "matchutilityupperbound" => self.match_utility_upper_bound = parse!(f64),

            "filekpddata" => self.file_kpd_data = value.to_string(),
            "filehlafrequency" => self.file_hla_frequency = value.to_string(),
            "filehladictionary" => self.file_hla_dictionary = value.to_string(),
            "filesurvivalparameters" => self.file_survival_parameters = value.to_string(),

            "suppressexchangeoutput" => {
                self.suppress_exchange_output = parse_bool(value).ok_or_else(invalid)?;
            }
            "suppresspopulationoutput" => {
                self.suppress_population_output = parse_bool(value).ok_or_else(invalid)?;
            }

            "rngseedselection" => self.seeds.selection = parse!(i64),
            "rngseedattrition" => self.seeds.attrition = parse!(i64),
            "rngseedarrival" => self.seeds.arrival = parse!(i64),
            "rngseedmatch" => self.seeds.matching = parse!(i64),
            "rngseeddonor" => self.seeds.donor = parse!(i64),
            "rngseedstatus" => self.seeds.status = parse!(i64),
            "rngseedexpectedutility" => self.seeds.expected_utility = parse!(i64),

            _ => {
                return Err(ConfigError::UnknownKey {
                    line,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let range_err = |key: &str, value: String, reason: &str| ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            reason: reason.to_string(),
        };

        if self.max_cycle_size < 2 {
            return Err(range_err(
                "maxcyclesize",
                self.max_cycle_size.to_string(),
                "a cycle needs at least two nodes",
            ));
        }
        if self.max_lrs_size < 2 {
            return Err(range_err(
                "maxlrssize",
                self.max_lrs_size.to_string(),
                "a locally relevant subgraph needs at least two nodes",
            ));
        }
        if self.time_between_match_runs == 0 {
            return Err(range_err(
                "timebetweenmatchruns",
                "0".to_string(),
                "match runs must be at least a day apart",
            ));
        }
        for (key, p) in [
            ("probpairattrition", self.prob_pair_attrition),
            ("probnddattrition", self.prob_ndd_attrition),
            ("probpairactivetoinactive", self.prob_pair_active_to_inactive),
            ("probpairinactivetoactive", self.prob_pair_inactive_to_active),
            (
                "assumedcandidateavailability",
                self.assumed_candidate_availability,
            ),
            (
                "assumedpairdonoravailability",
                self.assumed_pair_donor_availability,
            ),
            ("assumednddavailability", self.assumed_ndd_availability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(range_err(key, p.to_string(), "probabilities live in [0, 1]"));
            }
        }
        if self.match_utility_lower_bound > self.match_utility_upper_bound {
            return Err(range_err(
                "matchutilitylowerbound",
                self.match_utility_lower_bound.to_string(),
                "lower bound exceeds upper bound",
            ));
        }
        Ok(())
    }

    /// Times at which match runs fire, in order, within one iteration.
    pub fn match_run_times(&self) -> Vec<u32> {
        (1..=self.time_span)
            .filter(|t| t % self.time_between_match_runs == 0)
            .collect()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "TRUE" | "True" | "1" => Some(true),
        "false" | "FALSE" | "False" | "0" => Some(false),
        _ => None,
    }
}
