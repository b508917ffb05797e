//! Spatial-decomposition communication engine.
//!
//! Partitions the simulation cell into a Cartesian grid of sub-boxes, one
//! per worker, and coordinates the three-phase per-step protocol:
//!
//! - [`engine::CommEngine::forward_comm`] ships owner positions outward to
//!   ghost replicas every timestep;
//! - [`engine::CommEngine::reverse_comm`] accumulates ghost force
//!   contributions back onto their owners;
//! - on rebuild steps, [`engine::CommEngine::exchange`] migrates particles
//!   that crossed sub-box boundaries and
//!   [`engine::CommEngine::borders`] re-selects and ships ghost replicas.
//!
//! # Modules
//! - [`grid`] -- surface-minimizing factorization of the worker count.
//! - [`placement`] -- plain and NUMA-aware rank placement.
//! - [`plan`] -- the six-directional swap schedule.
//! - [`engine`] -- borders, forward/reverse drivers, and exchange.
//! - [`buffers`] -- slack-growth send/receive word buffers.
//! - [`transport`] -- the message substrate and its in-process cluster.
//! - [`config`] -- style, border group, cutoff, and ghost-velocity settings.
//! - [`error`] -- the fatal error surface.

#![warn(missing_docs)]

pub mod buffers;
pub mod config;
pub mod engine;
pub mod error;
pub mod grid;
pub mod placement;
pub mod plan;
pub mod transport;

pub use config::{CommConfig, CommStyle};
pub use engine::CommEngine;
pub use error::CommError;
pub use placement::ProcGrid;
pub use plan::SwapPlan;
pub use transport::{local_cluster, local_cluster_with_nodes, run_cluster, Transport};
