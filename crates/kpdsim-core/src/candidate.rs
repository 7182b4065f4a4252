//! Transplant candidate value object.

use crate::types::{BloodType, Insurance, Race};

/// A candidate awaiting transplant. Immutable after construction.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Matching id shared with the paired donors drawn from the same row set.
    pub matching_id: u32,
    /// Unique candidate id.
    pub id: u32,

    // Crossmatch information
    pub pra: u32,
    pub blood_type: BloodType,
    pub unacceptable_hla: Vec<String>,
    pub desensitizable_hla: Vec<String>,

    // Characteristics
    pub age: u32,
    pub male: bool,
    pub race: Race,
    pub diabetes: bool,
    pub height: f64,
    pub weight: f64,
    pub previous_transplant: bool,
    pub time_on_dialysis: f64,
    pub hep_c: bool,
    pub insurance: Insurance,
    pub epts: f64,
}

impl Candidate {
    /// Body mass index from height (m) and weight (kg); zero height yields zero.
    pub fn bmi(&self) -> f64 {
        if self.height > 0.0 {
            self.weight / (self.height * self.height)
        } else {
            0.0
        }
    }

    /// Demographic columns for the transplant and population sinks. Column
    /// order is fixed; see [`crate::output`].
    pub fn csv_fields(&self) -> Vec<String> {
        vec![
            self.blood_type.to_string(),
            self.pra.to_string(),
            self.age.to_string(),
            if self.male { "Male" } else { "Female" }.to_string(),
            self.race.to_string(),
            crate::types::yes_no(self.diabetes).to_string(),
            format!("{:.4}", self.height),
            format!("{:.4}", self.weight),
            format!("{:.4}", self.bmi()),
            crate::types::yes_no(self.previous_transplant).to_string(),
            format!("{:.2}", self.time_on_dialysis),
            crate::types::yes_no(self.hep_c).to_string(),
            self.insurance.to_string(),
            format!("{:.3}", self.epts),
        ]
    }

    /// Placeholder columns emitted when a node has no candidate (NDD/bridge).
    pub fn empty_csv_fields() -> Vec<String> {
        vec![String::new(); 14]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_candidate(id: u32, pra: u32, blood_type: BloodType) -> Candidate {
        Candidate {
            matching_id: id,
            id,
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
            time_on_dialysis: 1.5,
            hep_c: false,
            insurance: Insurance::Private,
            epts: 0.0,
        }
    }

    #[test]
    fn test_bmi() {
        let c = sample_candidate(1, 10, BloodType::O);
        assert!((c.bmi() - 80.0 / (1.75 * 1.75)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_fields_width_matches_populated_fields() {
        let c = sample_candidate(1, 10, BloodType::O);
        assert_eq!(c.csv_fields().len(), Candidate::empty_csv_fields().len());
    }
}
