//! Typed errors for the communication engine.
//!
//! Every variant is fatal: the three-phase protocol either completes on
//! every rank each timestep or the simulation terminates. Particles lost
//! through non-periodic boundaries or long jumps are not errors.

use std::fmt;

/// Errors arising from configuration, topology setup, or messaging.
#[derive(Debug, Clone, PartialEq)]
pub enum CommError {
    /// The factorization (after user pins) does not multiply out to the
    /// worker count.
    BadGrid {
        /// Total worker count.
        nprocs: usize,
        /// The grid that failed to cover it.
        grid: [usize; 3],
    },

    /// A 2d run was given more than one worker along z.
    ZGridNotOne(usize),

    /// The per-NUMA factorization does not cover the NUMA domain size.
    BadNumaGrid {
        /// Ranks per NUMA domain.
        per_numa: usize,
        /// The inner grid that failed to cover it.
        grid: [usize; 3],
    },

    /// Two ranks mapped to the same grid cell during placement.
    DuplicateGridCell {
        /// The rank found occupying an already-claimed cell.
        rank: usize,
        /// The contested cell.
        cell: [usize; 3],
    },

    /// Unrecognized configuration token.
    UnknownToken(String),

    /// Border group does not match the container's first group.
    InvalidGroup(String),

    /// Negative or non-finite ghost cutoff.
    InvalidCutoff(f64),

    /// Configuration file could not be read or parsed.
    Config(String),

    /// A message send or receive failed (peer gone, short message).
    Transport(String),
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadGrid { nprocs, grid } => write!(
                f,
                "bad grid of processors: {}x{}x{} != {nprocs}",
                grid[0], grid[1], grid[2]
            ),
            Self::ZGridNotOne(pz) => {
                write!(f, "processor count in z must be 1 for a 2d simulation, got {pz}")
            }
            Self::BadNumaGrid { per_numa, grid } => write!(
                f,
                "bad NUMA grid of processors: {}x{}x{} != {per_numa}",
                grid[0], grid[1], grid[2]
            ),
            Self::DuplicateGridCell { rank, cell } => write!(
                f,
                "rank {rank} mapped to already-occupied grid cell ({}, {}, {})",
                cell[0], cell[1], cell[2]
            ),
            Self::UnknownToken(tok) => write!(f, "unknown communication setting: {tok}"),
            Self::InvalidGroup(name) => {
                write!(f, "communication group '{name}' does not match the first group")
            }
            Self::InvalidCutoff(v) => write!(f, "invalid communication cutoff: {v}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

impl std::error::Error for CommError {}
