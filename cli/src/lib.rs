//! Stratum CLI - build layered OCI images from package sets.

pub mod commands;
pub mod output;
