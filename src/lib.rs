//! udmon - supervised `udisksctl monitor` with typed device events
//!
//! This library exposes the process supervisor, the monitor output parser
//! and the surrounding configuration, filtering and output layers used by
//! the `udmon` binary.

pub mod cli;
pub mod config;
pub mod constants;
pub mod filters;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod output;
pub mod process;
