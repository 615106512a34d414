//! Ship Library
//!
//! Machine reconciliation and versioned releases for small VPS fleets. The
//! `ship` binary drives a target over SSH; `ship-agent` runs on the target.

pub mod app;
pub mod cancel;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod installer;
pub mod logs;
pub mod machine;
pub mod reconcile;
pub mod release;
pub mod storage;
pub mod utils;
