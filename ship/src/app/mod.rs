//! Entry points shared by the `ship` and `ship-agent` binaries

pub mod options;
pub mod run;
pub mod state;
