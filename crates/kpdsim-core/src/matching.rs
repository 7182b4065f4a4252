//! Donor-candidate match records.

use crate::types::{CrossmatchResult, UtilityScheme, t_f};

/// One directed potential transplant from a specific donor of one node to the
/// candidate of another. Created once per (donor node, candidate node, donor
/// index) triple per iteration; `adjacency == false` marks a placeholder that
/// only records why the virtual crossmatch rejected the edge.
#[derive(Debug, Clone)]
pub struct Match {
    /// Whether the edge is usable for planning.
    pub adjacency: bool,

    // Utility scores
    pub five_year_survival: f64,
    pub ten_year_survival: f64,
    pub difficulty_score: f64,
    pub random_utility: f64,

    /// Success probability used by planning and expected-utility scoring.
    pub assumed_success_probability: f64,
    /// Ground-truth success probability backing the lab reveal.
    pub actual_success_probability: f64,

    pub virtual_crossmatch: CrossmatchResult,
    /// Hidden until the arrangement reaches its transplantation time.
    pub lab_crossmatch: bool,
}

impl Match {
    /// Placeholder for an edge the virtual crossmatch rejected.
    pub fn placeholder(virtual_crossmatch: CrossmatchResult) -> Self {
        Match {
            adjacency: false,
            five_year_survival: 0.0,
            ten_year_survival: 0.0,
            difficulty_score: 0.0,
            random_utility: 0.0,
            assumed_success_probability: 0.0,
            actual_success_probability: 0.0,
            virtual_crossmatch,
            lab_crossmatch: false,
        }
    }

    /// Implicit backward edge toward an NDD or bridge donor: always adjacent,
    /// certain to succeed, carries no utility of its own.
    pub fn implicit() -> Self {
        Match {
            adjacency: true,
            five_year_survival: 0.0,
            ten_year_survival: 0.0,
            difficulty_score: 0.0,
            random_utility: 0.0,
            assumed_success_probability: 1.0,
            actual_success_probability: 1.0,
            virtual_crossmatch: CrossmatchResult::Successful,
            lab_crossmatch: true,
        }
    }

    /// Scalar value of this edge under the given utility scheme.
    /// `Transplants` counts 1 per realized transplant regardless of scores.
    pub fn utility(&self, scheme: UtilityScheme) -> f64 {
        match scheme {
            UtilityScheme::Transplants => 1.0,
            UtilityScheme::FiveYearSurvival => self.five_year_survival,
            UtilityScheme::TenYearSurvival => self.ten_year_survival,
            UtilityScheme::TransplantDifficulty => self.difficulty_score,
            UtilityScheme::Random => self.random_utility,
        }
    }

    /// Rewrites this edge as failed at the lab bench, removing it from planning.
    pub fn fail_lab(&mut self) {
        *self = Match::placeholder(CrossmatchResult::FailedLab);
    }

    /// Match columns for the transplant sink.
    pub fn csv_fields(&self) -> Vec<String> {
        vec![
            format!("{:.6}", self.five_year_survival),
            format!("{:.6}", self.ten_year_survival),
            format!("{:.4}", self.difficulty_score),
            format!("{:.4}", self.random_utility),
            format!("{:.2}", self.assumed_success_probability),
            format!("{:.2}", self.actual_success_probability),
            self.virtual_crossmatch.to_string(),
            t_f(self.lab_crossmatch).to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_not_adjacent() {
        let m = Match::placeholder(CrossmatchResult::FailedBt);
        assert!(!m.adjacency);
        assert_eq!(m.virtual_crossmatch, CrossmatchResult::FailedBt);
        assert!(!m.lab_crossmatch);
    }

    #[test]
    fn test_utility_by_scheme() {
        let mut m = Match::implicit();
        m.five_year_survival = 0.8;
        m.ten_year_survival = 0.6;
        m.difficulty_score = 1.0;
        m.random_utility = 0.3;

        assert_eq!(m.utility(UtilityScheme::Transplants), 1.0);
        assert_eq!(m.utility(UtilityScheme::FiveYearSurvival), 0.8);
        assert_eq!(m.utility(UtilityScheme::TenYearSurvival), 0.6);
        assert_eq!(m.utility(UtilityScheme::TransplantDifficulty), 1.0);
        assert_eq!(m.utility(UtilityScheme::Random), 0.3);
    }

    #[test]
    fn test_fail_lab_clears_edge() {
        let mut m = Match::implicit();
        m.fail_lab();
        assert!(!m.adjacency);
        assert_eq!(m.virtual_crossmatch, CrossmatchResult::FailedLab);
        assert_eq!(m.assumed_success_probability, 0.0);
    }
}
