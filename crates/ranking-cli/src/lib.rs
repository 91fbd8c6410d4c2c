//! Command-line driver for the pairwise ranking engine.
//!
//! The `ab-ranking` binary parses arguments and dispatches into [`pipeline`];
//! the library target exists so the subcommands can be driven from tests.

pub mod config;
pub mod pipeline;
pub mod results;
