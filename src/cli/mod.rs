//! Command-line interface for the `skyv` binary.

pub mod commands;
