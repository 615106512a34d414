//! Filesystem helpers for the agent side

pub mod dir;
pub mod file;
pub mod link;
