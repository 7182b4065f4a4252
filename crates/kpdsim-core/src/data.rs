//! Input tables: HLA frequencies, HLA dictionary, survival parameters, and
//! the KPD candidate/donor population.
//!
//! Tables are comma-separated with `;` separating items inside list fields
//! and `NA` marking absent values. Rows with an unparseable id are skipped
//! with a log line; unrecognized factor tokens fall back to `Unspecified`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::candidate::Candidate;
use crate::config::Parameters;
use crate::crossmatch::HlaDictionary;
use crate::donor::Donor;
use crate::error::DataError;
use crate::rng::PortableRng;
use crate::survival::SurvivalTable;
use crate::types::{BloodType, Insurance, Race};

/// Donor blood type mass function used when synthesizing donors: O, A, B, AB.
const DONOR_BLOOD_TYPE_FREQUENCY: [f64; 4] = [0.44, 0.42, 0.10, 0.04];
/// Marginal carrier frequencies of the BW4 and BW6 epitopes.
const DONOR_BW4_FREQUENCY: f64 = 0.66;
const DONOR_BW6_FREQUENCY: f64 = 0.85;

/// In-memory pools and lookup tables backing one simulation run.
#[derive(Debug, Clone)]
pub struct DataSource {
    hla_dictionary: HlaDictionary,
    survival: SurvivalTable,

    donor_hla_profiles: Vec<Vec<String>>,
    donor_hla_frequency: Vec<f64>,

    paired_candidates: Vec<Candidate>,
    donor_counts: HashMap<u32, usize>,
}

impl DataSource {
    /// Loads the four input tables from `data_dir` using the file names in
    /// `params`.
    pub fn load(data_dir: &Path, params: &Parameters) -> Result<Self, DataError> {
        let open = |name: &str| -> Result<(PathBuf, File), DataError> {
            let path = data_dir.join(name);
            let file = File::open(&path).map_err(|source| DataError::Io {
                path: path.clone(),
                source,
            })?;
            Ok((path, file))
        };

        let (path, file) = open(&params.file_hla_frequency)?;
        let (profiles, frequencies) = read_hla_frequency(&path, file)?;

        let (path, file) = open(&params.file_hla_dictionary)?;
        let dictionary = read_hla_dictionary(&path, file)?;

        let (path, file) = open(&params.file_survival_parameters)?;
        let survival = read_survival_parameters(&path, file)?;

        let (path, file) = open(&params.file_kpd_data)?;
        let (candidates, donor_counts) = read_kpd_population(&path, file)?;

        Ok(DataSource {
            hla_dictionary: dictionary,
            survival,
            donor_hla_profiles: profiles,
            donor_hla_frequency: frequencies,
            paired_candidates: candidates,
            donor_counts,
        })
    }

    /// Builds a source from in-memory tables; used by tests and callers that
    /// synthesize their own pools.
    pub fn from_parts(
        hla_dictionary: HlaDictionary,
        survival: SurvivalTable,
        donor_hla_profiles: Vec<Vec<String>>,
        donor_hla_frequency: Vec<f64>,
        paired_candidates: Vec<Candidate>,
        donor_counts: HashMap<u32, usize>,
    ) -> Self {
        DataSource {
            hla_dictionary,
            survival,
            donor_hla_profiles,
            donor_hla_frequency,
            paired_candidates,
            donor_counts,
        }
    }

    pub fn hla_dictionary(&self) -> &HlaDictionary {
        &self.hla_dictionary
    }

    pub fn survival_table(&self) -> &SurvivalTable {
        &self.survival
    }

    pub fn candidate_pool_size(&self) -> usize {
        self.paired_candidates.len()
    }

    /// Draws a candidate (with replacement) from the paired pool, returning
    /// the candidate and the number of donors recorded against them.
    pub fn draw_candidate(&self, u: f64) -> (&Candidate, usize) {
        let index = ((u * self.paired_candidates.len() as f64) as usize)
            .min(self.paired_candidates.len() - 1);
        let candidate = &self.paired_candidates[index];
        let donors = self
            .donor_counts
            .get(&candidate.matching_id)
            .copied()
            .unwrap_or(1)
            .max(1);
        (candidate, donors)
    }

    /// Synthesizes a donor from the HLA frequency table. Consumes exactly
    /// five uniforms: blood type, two antigen profiles, BW4, BW6.
    pub fn synthesize_donor(&self, u: [f64; 5]) -> Donor {
        let blood_type = match PortableRng::discrete_index(u[0], &DONOR_BLOOD_TYPE_FREQUENCY) {
            0 => BloodType::O,
            1 => BloodType::A,
            2 => BloodType::B,
            _ => BloodType::Ab,
        };

        let mut hla = Vec::new();
        for draw in [u[1], u[2]] {
            if !self.donor_hla_profiles.is_empty() {
                let index = PortableRng::discrete_index(draw, &self.donor_hla_frequency)
                    .min(self.donor_hla_profiles.len() - 1);
                hla.extend(self.donor_hla_profiles[index].iter().cloned());
            }
        }
        if u[3] <= DONOR_BW4_FREQUENCY {
            hla.push("BW4".to_string());
        }
        if u[4] <= DONOR_BW6_FREQUENCY {
            hla.push("BW6".to_string());
        }

        Donor::synthetic(blood_type, hla)
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader)
}

fn csv_err(path: &Path, source: csv::Error) -> DataError {
    DataError::Csv {
        path: path.to_path_buf(),
        source,
    }
}

/// `;`-separated list field; `NA` and blanks contribute nothing.
fn parse_list(field: &str) -> Vec<String> {
    field
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty() && *item != "NA")
        .map(str::to_string)
        .collect()
}

fn parse_f64_or(field: &str, default: f64) -> f64 {
    field.trim().parse().unwrap_or(default)
}

fn parse_u32_or(field: &str, default: u32) -> u32 {
    field.trim().parse().unwrap_or(default)
}

/// HLA frequency table: eight antigen columns followed by a probability.
pub fn read_hla_frequency<R: Read>(
    path: &Path,
    reader: R,
) -> Result<(Vec<Vec<String>>, Vec<f64>), DataError> {
    let mut profiles = Vec::new();
    let mut frequencies = Vec::new();

    for row in csv_reader(reader).records() {
        let record = row.map_err(|e| csv_err(path, e))?;
        if record.len() < 9 {
            return Err(DataError::ShortRow {
                path: path.to_path_buf(),
                row: profiles.len() + 2,
                got: record.len(),
                want: 9,
            });
        }
        let profile: Vec<String> = record
            .iter()
            .take(8)
            .map(str::trim)
            .filter(|antigen| !antigen.is_empty() && *antigen != "NA")
            .map(str::to_string)
            .collect();
        profiles.push(profile);
        frequencies.push(parse_f64_or(&record[8], 0.0));
    }

    if profiles.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok((profiles, frequencies))
}

/// HLA dictionary: antigen, `;`-separated equivalence list.
pub fn read_hla_dictionary<R: Read>(path: &Path, reader: R) -> Result<HlaDictionary, DataError> {
    let mut dictionary = HlaDictionary::new();
    for row in csv_reader(reader).records() {
        let record = row.map_err(|e| csv_err(path, e))?;
        if record.len() < 2 {
            continue;
        }
        let antigen = record[0].trim();
        if antigen.is_empty() || antigen == "NA" {
            continue;
        }
        dictionary.insert(antigen, parse_list(&record[1]));
    }
    if dictionary.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(dictionary)
}

/// Survival parameter table: factor, level label, 5-year and 10-year
/// coefficients. Levels accumulate in row order under their factor.
pub fn read_survival_parameters<R: Read>(
    path: &Path,
    reader: R,
) -> Result<SurvivalTable, DataError> {
    let mut table = SurvivalTable::new();
    for row in csv_reader(reader).records() {
        let record = row.map_err(|e| csv_err(path, e))?;
        if record.len() < 4 {
            continue;
        }
        let factor = record[0].trim();
        if factor.is_empty() {
            continue;
        }
        table.push_row(
            factor,
            parse_f64_or(&record[2], 0.0),
            parse_f64_or(&record[3], 0.0),
        );
    }
    if table.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(table)
}

/// KPD population table. Pair rows repeat the matching id once per donor; NDD
/// rows are flagged in the second column. Only the candidates and the donor
/// counts feed the simulation: the per-iteration pool synthesizes its own
/// donors against the drawn candidates.
///
/// Columns: matching id, NDD flag, candidate id, donor id, candidate PRA,
/// candidate BT, unacceptable HLA list, donor BT, donor HLA list, candidate
/// age, sex, race, diabetes, height, weight, donor age, donor sex, donor
/// height, donor weight, and optionally a desensitizable HLA list.
pub fn read_kpd_population<R: Read>(
    path: &Path,
    reader: R,
) -> Result<(Vec<Candidate>, HashMap<u32, usize>), DataError> {
    let mut candidates = Vec::new();
    let mut donor_counts: HashMap<u32, usize> = HashMap::new();
    let mut seen_pairs: HashSet<u32> = HashSet::new();

    for (row_index, row) in csv_reader(reader).records().enumerate() {
        let record = row.map_err(|e| csv_err(path, e))?;
        if record.len() < 2 {
            continue;
        }

        let matching_id: u32 = match record[0].trim().parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(row = row_index + 2, "skipping row with unusable matching id");
                continue;
            }
        };
        let is_ndd = record[1].trim() == "TRUE";
        if is_ndd {
            // NDD rows carry donors the simulation regenerates synthetically.
            continue;
        }
        if record.len() < 19 {
            return Err(DataError::ShortRow {
                path: path.to_path_buf(),
                row: row_index + 2,
                got: record.len(),
                want: 19,
            });
        }

        *donor_counts.entry(matching_id).or_insert(0) += 1;
        if !seen_pairs.insert(matching_id) {
            // Later rows of the same pair only add donors.
            continue;
        }

        let candidate = Candidate {
            matching_id,
            id: parse_u32_or(&record[2], matching_id),
            pra: parse_u32_or(&record[4], 0).min(100),
            blood_type: BloodType::from_token(record[5].trim()),
            unacceptable_hla: parse_list(&record[6]),
            desensitizable_hla: record.get(19).map(parse_list).unwrap_or_default(),
            age: parse_u32_or(&record[9], 0),
            male: record[10].trim() == "MALE",
            race: Race::from_token(record[11].trim()),
            diabetes: record[12].trim() == "TRUE",
            height: parse_f64_or(&record[13], 0.0),
            weight: parse_f64_or(&record[14], 0.0),
            previous_transplant: false,
            time_on_dialysis: 1.5,
            hep_c: false,
            insurance: Insurance::Unspecified,
            epts: 0.0,
        };
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok((candidates, donor_counts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> PathBuf {
        PathBuf::from("test.csv")
    }

    #[test]
    fn test_hla_frequency_skips_na_columns() {
        let data = b"A1,A2,B1,B2,C1,C2,DR1,DR2,Freq\n\
A1,NA,B8,NA,NA,NA,DR4,NA,0.25\n\
A2,A3,NA,NA,NA,NA,NA,NA,0.75\n";
        let (profiles, freq) = read_hla_frequency(&path(), &data[..]).unwrap();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0], vec!["A1", "B8", "DR4"]);
        assert_eq!(freq, vec![0.25, 0.75]);
    }

    #[test]
    fn test_hla_dictionary_expansion() {
        let data = b"Antigen,Equivalents\nA2,A2;A203;A210\nDR1,DR1\n";
        let dict = read_hla_dictionary(&path(), &data[..]).unwrap();
        assert_eq!(dict.expand("A2"), ["A2", "A203", "A210"]);
        assert_eq!(dict.expand("DR1"), ["DR1"]);
        assert!(dict.expand("B7").is_empty());
    }

    #[test]
    fn test_empty_dictionary_is_an_error() {
        let data = b"Antigen,Equivalents\n";
        assert!(matches!(
            read_hla_dictionary(&path(), &data[..]),
            Err(DataError::Empty { .. })
        ));
    }

    #[test]
    fn test_survival_rows_accumulate_levels() {
        let data = b"Factor,Level,FiveYear,TenYear\n\
Baseline,base,0.9,0.8\n\
PRA,0-9,0,0\n\
PRA,10-79,0.1,0.2\n\
PRA,80-100,0.3,0.4\n";
        let table = read_survival_parameters(&path(), &data[..]).unwrap();
        assert!(!table.is_empty());
    }

    fn population_csv() -> &'static [u8] {
        b"MatchingID,NDD,CandidateID,DonorID,cPRA,cBT,cUnacceptableHLA,dBT,dHLA,cAge,cSex,cRace,cDiabetes,cHeight,cWeight,dAge,dSex,dHeight,dWeight,cDesensitizableHLA\n\
1,FALSE,101,201,25,O,A2;B8,A,A1;B7,52,MALE,White,FALSE,1.8,85,48,FEMALE,1.65,70,DR1\n\
1,FALSE,101,202,25,O,A2;B8,B,A3,52,MALE,White,FALSE,1.8,85,50,MALE,1.7,80,DR1\n\
2,TRUE,NA,301,NA,NA,NA,O,A1,NA,NA,NA,NA,NA,NA,44,MALE,1.8,90\n\
3,FALSE,103,203,90,A,DR4,O,B8,39,FEMALE,Black,TRUE,1.6,60,41,MALE,1.75,80,\n\
bogus,FALSE,104,204,10,B,NA,O,NA,60,MALE,Other,FALSE,1.7,70,33,MALE,1.7,70,\n"
    }

    #[test]
    fn test_population_groups_donors_by_matching_id() {
        let (candidates, donor_counts) = read_kpd_population(&path(), population_csv()).unwrap();
        // NDD row and the bogus-id row contribute no candidates.
        assert_eq!(candidates.len(), 2);
        assert_eq!(donor_counts[&1], 2);
        assert_eq!(donor_counts[&3], 1);

        let first = &candidates[0];
        assert_eq!(first.matching_id, 1);
        assert_eq!(first.id, 101);
        assert_eq!(first.unacceptable_hla, vec!["A2", "B8"]);
        assert_eq!(first.desensitizable_hla, vec!["DR1"]);
        assert_eq!(first.blood_type, BloodType::O);
        assert!(first.male);
    }

    fn source() -> DataSource {
        let (candidates, donor_counts) = read_kpd_population(&path(), population_csv()).unwrap();
        DataSource::from_parts(
            HlaDictionary::new(),
            SurvivalTable::new(),
            vec![vec!["A1".into()], vec!["B8".into()]],
            vec![0.5, 0.5],
            candidates,
            donor_counts,
        )
    }

    #[test]
    fn test_draw_candidate_with_replacement() {
        let src = source();
        let (first, donors) = src.draw_candidate(0.0);
        assert_eq!(first.matching_id, 1);
        assert_eq!(donors, 2);
        let (second, donors) = src.draw_candidate(0.99);
        assert_eq!(second.matching_id, 3);
        assert_eq!(donors, 1);
    }

    #[test]
    fn test_synthesize_donor_consumes_five_uniforms() {
        let src = source();
        let donor = src.synthesize_donor([0.1, 0.2, 0.8, 0.5, 0.9]);
        // 0.1 lands in the O band of the blood-type mass function.
        assert_eq!(donor.blood_type, BloodType::O);
        // One profile from each antigen draw plus BW4 (0.5 <= 0.66),
        // but not BW6 (0.9 > 0.85).
        assert_eq!(donor.hla, vec!["A1", "B8", "BW4"]);
    }
}
