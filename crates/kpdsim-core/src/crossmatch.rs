//! Virtual crossmatch and match-policy gates.

use std::collections::HashMap;

use crate::candidate::Candidate;
use crate::donor::Donor;
use crate::types::{BloodType, CrossmatchResult};

/// Expands a candidate's listed antigens into the equivalence class used for
/// donor screening. Antigens without a dictionary entry expand to nothing.
#[derive(Debug, Clone, Default)]
pub struct HlaDictionary {
    entries: HashMap<String, Vec<String>>,
}

impl HlaDictionary {
    pub fn new() -> Self {
        HlaDictionary::default()
    }

    pub fn insert(&mut self, antigen: &str, equivalents: Vec<String>) {
        self.entries
            .entry(antigen.to_string())
            .or_default()
            .extend(equivalents);
    }

    pub fn expand(&self, antigen: &str) -> &[String] {
        self.entries.get(antigen).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn any_hit(&self, listed: &[String], donor_hla: &[String]) -> bool {
        listed.iter().any(|antigen| {
            self.expand(antigen)
                .iter()
                .any(|equivalent| donor_hla.iter().any(|d| d == equivalent))
        })
    }
}

/// ABO compatibility: AB donates only to AB; A and B each fail against the
/// two groups lacking their antigen.
fn blood_type_incompatible(donor: BloodType, candidate: BloodType) -> bool {
    match donor {
        BloodType::Ab => candidate != BloodType::Ab,
        BloodType::A => candidate == BloodType::O || candidate == BloodType::B,
        BloodType::B => candidate == BloodType::O || candidate == BloodType::A,
        _ => false,
    }
}

/// Planning-time compatibility test from BT and HLA records alone.
pub fn virtual_crossmatch(
    candidate: &Candidate,
    donor: &Donor,
    dictionary: &HlaDictionary,
) -> CrossmatchResult {
    if blood_type_incompatible(donor.blood_type, candidate.blood_type) {
        return CrossmatchResult::FailedBt;
    }

    if dictionary.any_hit(&candidate.unacceptable_hla, &donor.hla) {
        return CrossmatchResult::FailedHla;
    }

    let o_to_non_o =
        donor.blood_type == BloodType::O && candidate.blood_type != BloodType::O;

    if dictionary.any_hit(&candidate.desensitizable_hla, &donor.hla) {
        if o_to_non_o {
            return CrossmatchResult::RequiresDesensitizationAndOToNonO;
        }
        return CrossmatchResult::RequiresDesensitization;
    }

    if o_to_non_o {
        return CrossmatchResult::ODonorToNonOCandidate;
    }

    CrossmatchResult::Successful
}

/// Program policy gates applied on top of the virtual crossmatch.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub allow_desensitization: bool,
    pub reserve_o_donors_for_o_candidates: bool,
}

impl MatchPolicy {
    /// Whether an edge with the given crossmatch outcome may enter the graph.
    pub fn allows(&self, result: CrossmatchResult) -> bool {
        match result {
            CrossmatchResult::Successful => true,
            CrossmatchResult::ODonorToNonOCandidate => !self.reserve_o_donors_for_o_candidates,
            CrossmatchResult::RequiresDesensitization => self.allow_desensitization,
            CrossmatchResult::RequiresDesensitizationAndOToNonO => {
                self.allow_desensitization && !self.reserve_o_donors_for_o_candidates
            }
            CrossmatchResult::FailedHla
            | CrossmatchResult::FailedBt
            | CrossmatchResult::FailedLab => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Insurance, Race};

    fn candidate(blood_type: BloodType) -> Candidate {
        Candidate {
            matching_id: 1,
            id: 1,
            pra: 50,
            blood_type,
            unacceptable_hla: Vec::new(),
            desensitizable_hla: Vec::new(),
            age: 45,
            male: true,
            race: Race::White,
            diabetes: false,
            height: 1.7,
            weight: 70.0,
            previous_transplant: false,
            time_on_dialysis: 1.0,
            hep_c: false,
            insurance: Insurance::Private,
            epts: 0.0,
        }
    }

    fn donor(blood_type: BloodType, hla: &[&str]) -> Donor {
        Donor::synthetic(blood_type, hla.iter().map(|s| s.to_string()).collect())
    }

    fn dictionary() -> HlaDictionary {
        let mut dict = HlaDictionary::new();
        dict.insert("A2", vec!["A2".into(), "A203".into()]);
        dict.insert("DR1", vec!["DR1".into()]);
        dict
    }

    #[test]
    fn test_bt_rules() {
        let dict = HlaDictionary::new();
        let cases = [
            (BloodType::Ab, BloodType::O, true),
            (BloodType::Ab, BloodType::Ab, false),
            (BloodType::A, BloodType::O, true),
            (BloodType::A, BloodType::B, true),
            (BloodType::A, BloodType::A, false),
            (BloodType::A, BloodType::Ab, false),
            (BloodType::B, BloodType::A, true),
            (BloodType::B, BloodType::Ab, false),
            (BloodType::O, BloodType::O, false),
        ];
        for (d_bt, c_bt, fails) in cases {
            let result = virtual_crossmatch(&candidate(c_bt), &donor(d_bt, &[]), &dict);
            assert_eq!(
                result == CrossmatchResult::FailedBt,
                fails,
                "donor {d_bt} candidate {c_bt}"
            );
        }
    }

    #[test]
    fn test_unacceptable_hla_beats_desensitization() {
        let dict = dictionary();
        let mut c = candidate(BloodType::A);
        c.unacceptable_hla = vec!["A2".into()];
        c.desensitizable_hla = vec!["A2".into()];
        // Equivalence expansion: donor carries A203, not A2 itself.
        let result = virtual_crossmatch(&c, &donor(BloodType::A, &["A203"]), &dict);
        assert_eq!(result, CrossmatchResult::FailedHla);
    }

    #[test]
    fn test_desensitizable_hit() {
        let dict = dictionary();
        let mut c = candidate(BloodType::A);
        c.desensitizable_hla = vec!["DR1".into()];
        let result = virtual_crossmatch(&c, &donor(BloodType::A, &["DR1"]), &dict);
        assert_eq!(result, CrossmatchResult::RequiresDesensitization);

        // Same antigen hit from an O donor to a non-O candidate combines codes.
        let result = virtual_crossmatch(&c, &donor(BloodType::O, &["DR1"]), &dict);
        assert_eq!(
            result,
            CrossmatchResult::RequiresDesensitizationAndOToNonO
        );
    }

    #[test]
    fn test_o_to_non_o() {
        let dict = HlaDictionary::new();
        let result = virtual_crossmatch(&candidate(BloodType::A), &donor(BloodType::O, &[]), &dict);
        assert_eq!(result, CrossmatchResult::ODonorToNonOCandidate);

        let result = virtual_crossmatch(&candidate(BloodType::O), &donor(BloodType::O, &[]), &dict);
        assert_eq!(result, CrossmatchResult::Successful);
    }

    #[test]
    fn test_crossmatch_is_deterministic_in_inputs() {
        let dict = dictionary();
        let mut c = candidate(BloodType::B);
        c.unacceptable_hla = vec!["A2".into()];
        let d = donor(BloodType::B, &["A203", "DR4"]);
        let first = virtual_crossmatch(&c, &d, &dict);
        for _ in 0..5 {
            assert_eq!(virtual_crossmatch(&c, &d, &dict), first);
        }
    }

    #[test]
    fn test_policy_gates() {
        let permissive = MatchPolicy {
            allow_desensitization: true,
            reserve_o_donors_for_o_candidates: false,
        };
        let strict = MatchPolicy {
            allow_desensitization: false,
            reserve_o_donors_for_o_candidates: true,
        };

        assert!(permissive.allows(CrossmatchResult::Successful));
        assert!(strict.allows(CrossmatchResult::Successful));

        assert!(permissive.allows(CrossmatchResult::ODonorToNonOCandidate));
        assert!(!strict.allows(CrossmatchResult::ODonorToNonOCandidate));

        assert!(permissive.allows(CrossmatchResult::RequiresDesensitization));
        assert!(!strict.allows(CrossmatchResult::RequiresDesensitization));

        assert!(permissive.allows(CrossmatchResult::RequiresDesensitizationAndOToNonO));
        assert!(!strict.allows(CrossmatchResult::RequiresDesensitizationAndOToNonO));

        for failure in [
            CrossmatchResult::FailedBt,
            CrossmatchResult::FailedHla,
            CrossmatchResult::FailedLab,
        ] {
            assert!(!permissive.allows(failure));
            assert!(!strict.allows(failure));
        }
    }

    #[test]
    fn test_combined_code_requires_both_flags() {
        let desensitization_only = MatchPolicy {
            allow_desensitization: true,
            reserve_o_donors_for_o_candidates: true,
        };
        assert!(!desensitization_only.allows(CrossmatchResult::RequiresDesensitizationAndOToNonO));
    }
}
