//! The siren core binary: wires the stores, caches and pipeline stages
//! into a [`state::CoreRuntime`], runs the per-stage worker pools, and
//! serves the callback endpoint.

pub mod callback;
pub mod config;
pub mod provider;
pub mod seed;
pub mod selfmon;
pub mod state;
pub mod workers;
