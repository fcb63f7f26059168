//! CLI command implementations.

pub mod cleanup;
pub mod common;
pub mod dataset;
pub mod list;
pub mod status;
pub mod transfer;
