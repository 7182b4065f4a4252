//! Living donor value object.

use crate::types::{BloodType, Race, Relation};

/// A living donor, either paired with a candidate or non-directed.
#[derive(Debug, Clone)]
pub struct Donor {
    /// Unique donor id (0 for synthetically generated donors).
    pub id: u32,
    /// Matching id of the paired candidate, if any.
    pub matching_id: u32,

    // Crossmatch information
    pub blood_type: BloodType,
    pub hla: Vec<String>,

    // Characteristics
    pub relation: Relation,
    pub age: u32,
    pub male: bool,
    pub race: Race,
    pub height: f64,
    pub weight: f64,
    pub cigarette_use: bool,
}

impl Donor {
    /// Synthetic donor carrying only crossmatch-relevant fields.
    pub fn synthetic(blood_type: BloodType, hla: Vec<String>) -> Self {
        Donor {
            id: 0,
            matching_id: 0,
            blood_type,
            hla,
            relation: Relation::Unspecified,
            age: 40,
            male: true,
            race: Race::Other,
            height: 1.75,
            weight: 80.0,
            cigarette_use: false,
        }
    }

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
            self.relation.to_string(),
            self.age.to_string(),
            if self.male { "Male" } else { "Female" }.to_string(),
            self.race.to_string(),
            format!("{:.4}", self.height),
            format!("{:.4}", self.weight),
            format!("{:.4}", self.bmi()),
            crate::types::yes_no(self.cigarette_use).to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_donor_defaults() {
        let d = Donor::synthetic(BloodType::A, vec!["A1".into(), "B8".into()]);
        assert_eq!(d.id, 0);
        assert_eq!(d.blood_type, BloodType::A);
        assert_eq!(d.hla.len(), 2);
        assert_eq!(d.relation, Relation::Unspecified);
    }

    #[test]
    fn test_csv_field_count_is_stable() {
        let d = Donor::synthetic(BloodType::O, Vec::new());
        assert_eq!(d.csv_fields().len(), 9);
    }
}
