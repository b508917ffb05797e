//! Particle container and box geometry for the decomposition engine.
//!
//! This crate holds the data side of the simulator that the communication
//! engine coordinates:
//! - [`store`] -- struct-of-arrays particle storage with the owned/ghost
//!   slot discipline and the wire pack/unpack hooks.
//! - [`domain`] -- orthogonal and triclinic box geometry, sub-box bounds,
//!   and lambda-coordinate conversion.
//! - [`client`] -- the capability trait physics modules implement to ship
//!   auxiliary per-particle data on the same communication schedule.

#![warn(missing_docs)]

pub mod client;
pub mod domain;
pub mod store;

pub use client::CommClient;
pub use domain::{BoxSpec, SimBox};
pub use store::{
    ParticleStore, SIZE_BORDER, SIZE_EXCHANGE, SIZE_FORWARD, SIZE_REVERSE, SIZE_VELOCITY,
};
