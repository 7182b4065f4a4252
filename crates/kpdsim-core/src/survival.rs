//! Graft-survival scoring from the survival parameter table.
//!
//! The table stores one coefficient row per (factor, level) with separate
//! 5-year and 10-year columns. A match's survival score is
//! `baseline ^ exp(sum of applicable coefficients)`, the usual proportional
//! hazards form. Factor levels that act as the reference category contribute
//! nothing.

use std::collections::HashMap;

use crate::candidate::Candidate;
use crate::donor::Donor;
use crate::types::Race;

/// Survival horizon selected by the utility scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    FiveYear,
    TenYear,
}

/// Coefficient table keyed by factor name; levels are positional within each
/// factor, in table row order.
#[derive(Debug, Clone, Default)]
pub struct SurvivalTable {
    five_year: HashMap<String, Vec<f64>>,
    ten_year: HashMap<String, Vec<f64>>,
}

/// Donor-age piecewise slope segments: first 30 years, then 10-year bands.
const DONOR_AGE_SEGMENTS: [f64; 4] = [30.0, 10.0, 10.0, 10.0];

impl SurvivalTable {
    pub fn new() -> Self {
        SurvivalTable::default()
    }

    /// Appends one table row: the next level of `factor`.
    pub fn push_row(&mut self, factor: &str, five_year: f64, ten_year: f64) {
        self.five_year
            .entry(factor.to_string())
            .or_default()
            .push(five_year);
        self.ten_year
            .entry(factor.to_string())
            .or_default()
            .push(ten_year);
    }

    pub fn is_empty(&self) -> bool {
        self.five_year.is_empty()
    }

    /// Coefficient for (factor, level); absent entries contribute nothing.
    fn coef(&self, horizon: Horizon, factor: &str, level: usize) -> f64 {
        let map = match horizon {
            Horizon::FiveYear => &self.five_year,
            Horizon::TenYear => &self.ten_year,
        };
        map.get(factor)
            .and_then(|levels| levels.get(level))
            .copied()
            .unwrap_or(0.0)
    }

    fn baseline(&self, horizon: Horizon) -> f64 {
        let map = match horizon {
            Horizon::FiveYear => &self.five_year,
            Horizon::TenYear => &self.ten_year,
        };
        map.get("Baseline")
            .and_then(|levels| levels.first())
            .copied()
            .unwrap_or(1.0)
    }

    /// Expected graft survival for a donor-candidate pairing.
    pub fn graft_survival(
        &self,
        candidate: &Candidate,
        donor: &Donor,
        horizon: Horizon,
    ) -> f64 {
        let mut score = 0.0;

        // Recipient age band. 40-49 is the reference category.
        let (age_band, donor_slope_factor) = recipient_age_band(candidate.age);
        if age_band != 4 {
            score += self.coef(horizon, "Recipient Age", age_band);
        }

        // Donor age enters piecewise: the remaining age above each change
        // point is weighted by the band-specific slope for the recipient's
        // age group.
        let mut remaining_age = donor.age as f64;
        for (segment, width) in DONOR_AGE_SEGMENTS.iter().enumerate() {
            if remaining_age <= 0.0 {
                break;
            }
            score += remaining_age * self.coef(horizon, donor_slope_factor, segment);
            remaining_age -= width;
        }

        // Donor-recipient sex combination; male donor to female recipient is
        // the reference.
        match (candidate.male, donor.male) {
            (false, false) => score += self.coef(horizon, "Donor-Recipient Sex", 0),
            (false, true) => score += self.coef(horizon, "Donor-Recipient Sex", 1),
            (true, true) => score += self.coef(horizon, "Donor-Recipient Sex", 3),
            (true, false) => {}
        }

        // Zero-ABDR-mismatch baseline term.
        score += self.coef(horizon, "HLA ABDR Mismatch", 0);

        // Obesity flags.
        if candidate.bmi() > 30.0 {
            score += self.coef(horizon, "Recipient BMI", 1);
        }
        if donor.bmi() > 30.0 {
            score += self.coef(horizon, "Donor BMI", 1);
        }

        // Donor-to-recipient weight ratio; [0.90, 1.15) is the reference.
        if candidate.weight > 0.0 {
            let ratio = donor.weight / candidate.weight;
            if ratio < 0.75 {
                score += self.coef(horizon, "Donor-Recipient Weight Ratio", 0);
            } else if ratio < 0.90 {
                score += self.coef(horizon, "Donor-Recipient Weight Ratio", 1);
            } else if ratio >= 1.15 {
                score += self.coef(horizon, "Donor-Recipient Weight Ratio", 3);
            }
        }

        // Donor-to-recipient height ratio; [1.00, 1.06) is the reference.
        if candidate.height > 0.0 {
            let ratio = donor.height / candidate.height;
            if ratio < 0.94 {
                score += self.coef(horizon, "Donor-Recipient Height Ratio", 0);
            } else if ratio < 1.0 {
                score += self.coef(horizon, "Donor-Recipient Height Ratio", 1);
            } else if ratio >= 1.06 {
                score += self.coef(horizon, "Donor-Recipient Height Ratio", 2);
            }
        }

        // Race groups.
        let candidate_race_level = match candidate.race {
            Race::White => 0,
            Race::Black => 1,
            Race::Hispanic => 2,
            _ => 3,
        };
        score += self.coef(horizon, "Recipient Race", candidate_race_level);

        let donor_race_level = match donor.race {
            Race::Black => 1,
            Race::Hispanic => 2,
            _ => 0,
        };
        score += self.coef(horizon, "Donor Race", donor_race_level);

        if donor.cigarette_use {
            score += self.coef(horizon, "Donor Cigarette Use", 1);
        }

        // Sensitization bands.
        if (10..=79).contains(&candidate.pra) {
            score += self.coef(horizon, "PRA", 1);
        } else if (80..=100).contains(&candidate.pra) {
            score += self.coef(horizon, "PRA", 2);
        }

        if candidate.diabetes {
            score += self.coef(horizon, "Recipient Diabetes Status", 1);
        }
        if candidate.previous_transplant {
            score += self.coef(horizon, "Previous Transplant", 1);
        }

        let tod_level = if candidate.time_on_dialysis == 0.0 {
            0
        } else if candidate.time_on_dialysis <= 1.0 {
            1
        } else if candidate.time_on_dialysis <= 2.0 {
            2
        } else if candidate.time_on_dialysis <= 3.0 {
            3
        } else {
            4
        };
        score += self.coef(horizon, "Time on Dialysis", tod_level);

        if candidate.hep_c {
            score += self.coef(horizon, "Recipient Hepatitis C Seriology", 1);
        }

        if candidate.insurance.is_public() {
            score += self.coef(horizon, "Recipient Insurance", 0);
        } else if candidate.insurance.is_private() {
            score += self.coef(horizon, "Recipient Insurance", 1);
        } else if candidate.insurance == crate::types::Insurance::Other {
            score += self.coef(horizon, "Recipient Insurance", 2);
        }

        // Transplant-era adjustment.
        score += self.coef(horizon, "Transplant Year", 2);

        self.baseline(horizon).powf(score.exp())
    }
}

/// (band index, donor-age slope factor name) for a recipient age.
fn recipient_age_band(age: u32) -> (usize, &'static str) {
    match age {
        0..=12 => (0, "Among Recipients Age < 12"),
        13..=17 => (1, "Among Recipients 13-17"),
        18..=29 => (2, "Among Recipients 18-29"),
        30..=39 => (3, "Among Recipients 30-39"),
        40..=49 => (4, "Among Recipients 40-49"),
        50..=59 => (5, "Among Recipients 50-59"),
        _ => (6, "Among Recipients 60+"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BloodType, Insurance};

    fn candidate() -> Candidate {
        Candidate {
            matching_id: 1,
            id: 1,
            pra: 0,
            blood_type: BloodType::O,
            unacceptable_hla: Vec::new(),
            desensitizable_hla: Vec::new(),
            age: 45,
            male: true,
            race: Race::White,
            diabetes: false,
            height: 1.75,
            weight: 80.0,
            previous_transplant: false,
            time_on_dialysis: 0.0,
            hep_c: false,
            insurance: Insurance::Unspecified,
            epts: 0.0,
        }
    }

    fn donor() -> Donor {
        let mut d = Donor::synthetic(BloodType::O, Vec::new());
        d.age = 0;
        d.male = false;
        d.race = Race::White;
        d.height = 1.75;
        d.weight = 80.0;
        d
    }

    #[test]
    fn test_empty_table_scores_unity() {
        let table = SurvivalTable::new();
        let s = table.graft_survival(&candidate(), &donor(), Horizon::FiveYear);
        // baseline 1.0 raised to any power.
        assert_eq!(s, 1.0);
    }

    #[test]
    fn test_baseline_only() {
        let mut table = SurvivalTable::new();
        table.push_row("Baseline", 0.9, 0.8);
        // Reference-category inputs leave the linear score at zero, so the
        // result is baseline^exp(0) = baseline.
        let c = candidate();
        let d = donor();
        assert!((table.graft_survival(&c, &d, Horizon::FiveYear) - 0.9).abs() < 1e-12);
        assert!((table.graft_survival(&c, &d, Horizon::TenYear) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_risk_factor_lowers_survival() {
        let mut table = SurvivalTable::new();
        table.push_row("Baseline", 0.9, 0.8);
        table.push_row("Recipient Diabetes Status", 0.0, 0.0);
        table.push_row("Recipient Diabetes Status", 0.4, 0.5);

        let mut sick = candidate();
        sick.diabetes = true;
        let healthy = candidate();
        let d = donor();

        let s_sick = table.graft_survival(&sick, &d, Horizon::FiveYear);
        let s_healthy = table.graft_survival(&healthy, &d, Horizon::FiveYear);
        // Positive hazard coefficient with baseline < 1 pushes survival down.
        assert!(s_sick < s_healthy);
    }

    #[test]
    fn test_donor_age_segments_accumulate() {
        let mut table = SurvivalTable::new();
        table.push_row("Baseline", 0.9, 0.9);
        // Single slope for the 40-49 recipient band, first segment only.
        table.push_row("Among Recipients 40-49", 0.01, 0.01);

        let c = candidate();
        let mut young = donor();
        young.age = 20;
        let mut old = donor();
        old.age = 29;

        let s_young = table.graft_survival(&c, &young, Horizon::FiveYear);
        let s_old = table.graft_survival(&c, &old, Horizon::FiveYear);
        assert!(s_old < s_young);
    }

    #[test]
    fn test_age_bands() {
        assert_eq!(recipient_age_band(5).0, 0);
        assert_eq!(recipient_age_band(13).0, 1);
        assert_eq!(recipient_age_band(29).0, 2);
        assert_eq!(recipient_age_band(39).0, 3);
        assert_eq!(recipient_age_band(45).0, 4);
        assert_eq!(recipient_age_band(59).0, 5);
        assert_eq!(recipient_age_band(60).0, 6);
    }
}
