//! Error taxonomy for the simulator.
//!
//! Configuration and data errors are fatal at start-up. Solver trouble is
//! degraded to an empty selection at the match-run boundary and never surfaces
//! here. Invariant violations abort the current iteration only; the outer
//! driver moves on to the next one.

use std::path::PathBuf;

use thiserror::Error;

/// Start-up failure while reading the parameter file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot open parameter file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: unrecognized option `{key}`")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: invalid value `{value}` for option `{key}`")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
    #[error("option `{key}` = {value} is out of range: {reason}")]
    OutOfRange {
        key: String,
        value: String,
        reason: String,
    },
}

/// Start-up failure while reading an input table.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot open data file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path:?}: row {row} has {got} fields, expected at least {want}")]
    ShortRow {
        path: PathBuf,
        row: usize,
        got: usize,
        want: usize,
    },
    #[error("{path:?}: no usable rows")]
    Empty { path: PathBuf },
}

/// A pool-state invariant was broken mid-iteration.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("attempted to transplant withdrawn node {node} at time {time}")]
    TransplantWithdrawnNode { node: usize, time: u32 },
    #[error("node {node} moved from {from} to {to}, which the status timeline forbids")]
    IllegalStatusTransition {
        node: usize,
        from: String,
        to: String,
    },
    #[error("arrangement references node {node} outside the pool (size {pool})")]
    UnknownNode { node: usize, pool: usize },
}

/// Top-level simulator error.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("data: {0}")]
    Data(#[from] DataError),
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantError),
    #[error("output: {0}")]
    Output(#[from] std::io::Error),
}
