//! CSV sinks: arrangements, transplants, population snapshots, and the run
//! log. One set of files per simulation, appended across iterations.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Parameters;

/// One arrangement considered by a match run (selected or not).
#[derive(Debug, Serialize)]
pub struct ExchangeRow {
    pub simulation: u32,
    pub match_run: u32,
    pub match_run_time: u32,
    pub time_to_transplantation: u32,
    pub nodes: usize,
    /// `;`-separated node ids.
    pub node_ids: String,
    pub has_ndd: String,
    pub assigned_value: f64,
    pub selected: String,
}

const EXCHANGE_HEADER: &[&str] = &[
    "Simulation",
    "MatchRun",
    "MatchRunTime",
    "TimeToTransplantation",
    "Nodes",
    "NodeIDs",
    "HasNDD",
    "AssignedValue",
    "Selected",
];

const DONOR_COLUMNS: &[&str] = &[
    "dBT",
    "dRelation",
    "dAge",
    "dSex",
    "dRace",
    "dHeight",
    "dWeight",
    "dBMI",
    "dCigaretteUse",
];

const CANDIDATE_COLUMNS: &[&str] = &[
    "cBT",
    "cPRA",
    "cAge",
    "cSex",
    "cRace",
    "cDiabetes",
    "cHeight",
    "cWeight",
    "cBMI",
    "cPrevTransplant",
    "cTimeOnDialysis",
    "cHepC",
    "cInsurance",
    "cEPTS",
];

const MATCH_COLUMNS: &[&str] = &[
    "Surv5Year",
    "Surv10Year",
    "DifficultyScore",
    "RandomUtility",
    "AssumedSuccessProb",
    "ActualSuccessProb",
    "VirtualCrossmatch",
    "LabCrossmatch",
];

fn transplant_header() -> Vec<&'static str> {
    let mut header = vec![
        "Simulation",
        "MatchRun",
        "MatchRunTime",
        "TransplantationTime",
        "DonorType",
        "DonorNodeID",
        "DonorIndex",
        "DonorArrivalTime",
    ];
    header.extend_from_slice(DONOR_COLUMNS);
    header.extend_from_slice(&[
        "CandidateNodeID",
        "CandidateArrivalTime",
        "CandidateAssociatedDonors",
        "CandidateAvailable",
    ]);
    header.extend_from_slice(CANDIDATE_COLUMNS);
    header.extend_from_slice(MATCH_COLUMNS);
    header.push("Transplanted");
    header
}

fn population_header() -> Vec<&'static str> {
    let mut header = vec![
        "Simulation",
        "NodeID",
        "DonorIndex",
        "NodeType",
        "ArrivalTime",
    ];
    header.extend_from_slice(CANDIDATE_COLUMNS);
    header.extend_from_slice(DONOR_COLUMNS);
    header
}

/// Record writers for one simulation run. Exchange and population sinks are
/// optional, following the output-suppression switches.
pub struct Sinks<W: Write> {
    exchanges: Option<csv::Writer<W>>,
    transplants: csv::Writer<W>,
    population: Option<csv::Writer<W>>,
    log: W,
}

fn csv_writer<W: Write>(writer: W, header: &[&str]) -> io::Result<csv::Writer<W>> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    out.write_record(header).map_err(io::Error::other)?;
    Ok(out)
}

impl Sinks<File> {
    /// Creates `<output_root>/<output_folder>/<sub_folder>/` and the sink
    /// files inside it.
    pub fn create(output_root: &Path, params: &Parameters) -> io::Result<Self> {
        let dir: PathBuf = output_root
            .join(&params.output_folder)
            .join(&params.sub_folder);
        fs::create_dir_all(&dir)?;

        let exchanges = if params.suppress_exchange_output {
            None
        } else {
            Some(File::create(dir.join("Arrangements.csv"))?)
        };
        let transplants = File::create(dir.join("Transplants.csv"))?;
        let population = if params.suppress_population_output {
            None
        } else {
            Some(File::create(dir.join("PopulationList.csv"))?)
        };
        let log = File::create(dir.join("Log-Simulation.txt"))?;

        Sinks::from_writers(exchanges, transplants, population, log)
    }
}

impl<W: Write> Sinks<W> {
    /// Wraps raw writers, emitting the header rows.
    pub fn from_writers(
        exchanges: Option<W>,
        transplants: W,
        population: Option<W>,
        log: W,
    ) -> io::Result<Self> {
        let exchanges = exchanges
            .map(|w| csv_writer(w, EXCHANGE_HEADER))
            .transpose()?;
        let transplants = csv_writer(transplants, &transplant_header())?;
        let population = population
            .map(|w| csv_writer(w, &population_header()))
            .transpose()?;
        Ok(Sinks {
            exchanges,
            transplants,
            population,
            log,
        })
    }

    pub fn write_exchange(&mut self, row: &ExchangeRow) -> io::Result<()> {
        if let Some(writer) = &mut self.exchanges {
            writer.serialize(row).map_err(io::Error::other)?;
        }
        Ok(())
    }

    pub fn write_transplant_row(&mut self, row: &[String]) -> io::Result<()> {
        self.transplants.write_record(row).map_err(io::Error::other)
    }

    pub fn write_population_row(&mut self, row: &[String]) -> io::Result<()> {
        if let Some(writer) = &mut self.population {
            writer.write_record(row).map_err(io::Error::other)?;
        }
        Ok(())
    }

    pub fn log_line(&mut self, line: &str) -> io::Result<()> {
        self.log.write_all(line.as_bytes())?;
        self.log.write_all(b"\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = &mut self.exchanges {
            writer.flush()?;
        }
        self.transplants.flush()?;
        if let Some(writer) = &mut self.population {
            writer.flush()?;
        }
        self.log.flush()
    }

}
