//! Shared factor enums and their text encodings.
//!
//! Parsers are lenient by contract: unrecognized data tokens fall back to the
//! `Unspecified` member of each enum rather than failing the row.
//! Configuration tokens, by contrast, are parsed strictly (see
//! [`crate::config`]).

use std::fmt;

/// ABO blood type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloodType {
    O,
    A,
    B,
    Ab,
    Unspecified,
}

impl BloodType {
    pub fn from_token(token: &str) -> Self {
        match token {
            "O" => BloodType::O,
            "A" => BloodType::A,
            "B" => BloodType::B,
            "AB" => BloodType::Ab,
            _ => BloodType::Unspecified,
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BloodType::O => "O",
            BloodType::A => "A",
            BloodType::B => "B",
            BloodType::Ab => "AB",
            BloodType::Unspecified => "Unspecified",
        };
        f.write_str(label)
    }
}

/// Candidate or donor race grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Race {
    White,
    Black,
    Hispanic,
    Hawaiian,
    Native,
    Asian,
    Multiracial,
    Other,
    Unspecified,
}

impl Race {
    pub fn from_token(token: &str) -> Self {
        match token {
            "WHITE" | "White" => Race::White,
            "BLACK" | "Black" => Race::Black,
            "HISPANIC" | "Hispanic" => Race::Hispanic,
            "HAWAIIAN" | "Hawaiian" => Race::Hawaiian,
            "NATIVE" | "Native" => Race::Native,
            "ASIAN" | "Asian" => Race::Asian,
            "MULTIRACIAL" | "Multiracial" => Race::Multiracial,
            "OTHER" | "Other" => Race::Other,
            _ => Race::Unspecified,
        }
    }
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Race::White => "White",
            Race::Black => "Black",
            Race::Hispanic => "Hispanic",
            Race::Hawaiian => "Hawaiian",
            Race::Native => "Native",
            Race::Asian => "Asian",
            Race::Multiracial => "Multi-Racial",
            Race::Other => "Other",
            Race::Unspecified => "Unspecified",
        };
        f.write_str(label)
    }
}

/// Primary payment source of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insurance {
    Public,
    Medicaid,
    MedicarePlus,
    Medicare,
    Private,
    PrivatePlus,
    Other,
    Unspecified,
}

impl Insurance {
    pub fn from_token(token: &str) -> Self {
        match token {
            "Public only" => Insurance::Public,
            "Medicaid only" => Insurance::Medicaid,
            "Medicare(primary) + Other" => Insurance::MedicarePlus,
            "Medicare only" => Insurance::Medicare,
            "Private only" => Insurance::Private,
            "Private only + Other" => Insurance::PrivatePlus,
            "Other source of payment" => Insurance::Other,
            _ => Insurance::Unspecified,
        }
    }

    /// Publicly funded coverage, for survival-model grouping.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            Insurance::Public | Insurance::Medicaid | Insurance::Medicare | Insurance::MedicarePlus
        )
    }

    /// Privately funded coverage, for survival-model grouping.
    pub fn is_private(self) -> bool {
        matches!(self, Insurance::Private | Insurance::PrivatePlus)
    }
}

impl fmt::Display for Insurance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Insurance::Public => "Public Only",
            Insurance::Medicaid => "Medicaid Only",
            Insurance::MedicarePlus => "Medicare + Other",
            Insurance::Medicare => "Medicare Only",
            Insurance::Private => "Private Only",
            Insurance::PrivatePlus => "Private + Other",
            Insurance::Other => "Other Payment",
            Insurance::Unspecified => "Unspecified",
        };
        f.write_str(label)
    }
}

/// Relation of a paired donor to their candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Parent,
    NonDirected,
    Child,
    Twin,
    Sibling,
    HalfSibling,
    Relative,
    Spouse,
    Partner,
    PairedDonation,
    OtherUnrelated,
    Unspecified,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Relation::Parent => "Parent",
            Relation::NonDirected => "Non-Directed Donor",
            Relation::Child => "Child",
            Relation::Twin => "Twin",
            Relation::Sibling => "Sibling",
            Relation::HalfSibling => "Half-Sibling",
            Relation::Relative => "Relative",
            Relation::Spouse => "Spouse",
            Relation::Partner => "Partner",
            Relation::PairedDonation => "Paired Donation",
            Relation::OtherUnrelated => "Other Unrelated Donor",
            Relation::Unspecified => "Unspecified",
        };
        f.write_str(label)
    }
}

/// Node class in the exchange graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Pair,
    Ndd,
    Bridge,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeType::Pair => "Pair",
            NodeType::Ndd => "NDD",
            NodeType::Bridge => "Bridge Donor",
        };
        f.write_str(label)
    }
}

/// Lifetime status of a candidate, donor, or node.
///
/// The legal timeline is `Active -> {Inactive <-> Active}* -> Withdrawn`;
/// `Withdrawn` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Inactive,
    Withdrawn,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Active => "Active",
            Status::Inactive => "Inactive",
            Status::Withdrawn => "Withdrawn",
        };
        f.write_str(label)
    }
}

/// Transplant progress of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransplantStatus {
    NotTransplanted,
    InProgress,
    Transplanted,
}

impl fmt::Display for TransplantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransplantStatus::NotTransplanted => "Not Transplanted",
            TransplantStatus::InProgress => "In Progress",
            TransplantStatus::Transplanted => "Transplanted",
        };
        f.write_str(label)
    }
}

/// Outcome of a virtual (planning-time) or lab crossmatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossmatchResult {
    Successful,
    ODonorToNonOCandidate,
    RequiresDesensitization,
    RequiresDesensitizationAndOToNonO,
    FailedHla,
    FailedBt,
    FailedLab,
}

impl fmt::Display for CrossmatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CrossmatchResult::Successful => "Successful Crossmatch",
            CrossmatchResult::ODonorToNonOCandidate => "O Donor to Non-O Candidate",
            CrossmatchResult::RequiresDesensitization => "Requires Desensitization",
            CrossmatchResult::RequiresDesensitizationAndOToNonO => {
                "Requires Desensitization and O Donor to Non-O Candidate"
            }
            CrossmatchResult::FailedHla => "Failed Crossmatch (Based on HLA)",
            CrossmatchResult::FailedBt => "Failed Crossmatch (Based on BT)",
            CrossmatchResult::FailedLab => "Failed Crossmatch (Lab Crossmatch)",
        };
        f.write_str(label)
    }
}

/// Structure family enumerated and selected by a match run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationScheme {
    CyclesAndChains,
    CyclesAndChainsWithFallbacks,
    LocallyRelevantSubsets,
}

impl OptimizationScheme {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "CYCLES_AND_CHAINS" => Some(OptimizationScheme::CyclesAndChains),
            "CYCLES_AND_CHAINS_WITH_FALLBACKS" => {
                Some(OptimizationScheme::CyclesAndChainsWithFallbacks)
            }
            "LOCALLY_RELEVANT_SUBSETS" => Some(OptimizationScheme::LocallyRelevantSubsets),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OptimizationScheme::CyclesAndChains => "Cycles and Chains",
            OptimizationScheme::CyclesAndChainsWithFallbacks => "Cycles and Chains with Fallbacks",
            OptimizationScheme::LocallyRelevantSubsets => "Locally Relevant Subsets",
        };
        f.write_str(label)
    }
}

/// Scalar objective assigned to an arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilityScheme {
    Transplants,
    FiveYearSurvival,
    TenYearSurvival,
    TransplantDifficulty,
    Random,
}

impl UtilityScheme {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "UTILITY_TRANSPLANTS" => Some(UtilityScheme::Transplants),
            "UTILITY_FIVE_YEAR_SURVIVAL" => Some(UtilityScheme::FiveYearSurvival),
            "UTILITY_TEN_YEAR_SURVIVAL" => Some(UtilityScheme::TenYearSurvival),
            "UTILITY_TRANSPLANT_DIFFICULTY" => Some(UtilityScheme::TransplantDifficulty),
            "UTILITY_RANDOM" => Some(UtilityScheme::Random),
            _ => None,
        }
    }
}

impl fmt::Display for UtilityScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UtilityScheme::Transplants => "# Of Transplants",
            UtilityScheme::FiveYearSurvival => "5-Year Survival",
            UtilityScheme::TenYearSurvival => "10-Year Survival",
            UtilityScheme::TransplantDifficulty => "Difficult to Transplant Candidates",
            UtilityScheme::Random => "Random Utility Assignment",
        };
        f.write_str(label)
    }
}

/// How planning treats node availability when scoring expected utility.
///
/// `PerfectInformation` fixes every availability factor to 1;
/// `Parameterized` uses the configured assumed probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningModel {
    PerfectInformation,
    Parameterized,
}

impl PlanningModel {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "perfect_information" => Some(PlanningModel::PerfectInformation),
            "parameterized" => Some(PlanningModel::Parameterized),
            _ => None,
        }
    }
}

/// "Yes"/"No" rendering used by the CSV sinks.
pub fn yes_no(flag: bool) -> &'static str {
    if flag { "Yes" } else { "No" }
}

/// "T"/"F" rendering used by the CSV sinks.
pub fn t_f(flag: bool) -> &'static str {
    if flag { "T" } else { "F" }
}
