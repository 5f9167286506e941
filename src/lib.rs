//! Kody engine library crate
//!
//! Rule scope resolution and the multi-stage suggestion pipeline behind an
//! automated pull-request reviewer. Rule persistence, pull-request fetching,
//! and model hosting live behind the traits in `catalog` and `provider` so
//! the engine itself stays a pure decision/orchestration layer.

pub mod catalog;
pub mod chunker;
pub mod config;
pub mod context;
pub mod executor;
pub mod linker;
pub mod pipeline;
pub mod provider;
pub mod resolver;
pub mod rules;
pub mod suggestion;
