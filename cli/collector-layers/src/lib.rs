#![doc = include_str!("../README.md")]
//! Core library of the `collector-layers` CLI.
//!
//! Resolves collector distributions to build tags, maps build tags to the Go
//! modules they need, builds the layer zip, and publishes it idempotently with
//! a metadata record per published layer version.

pub mod aws_setup;
pub mod build;
pub mod cli;
pub mod command;
pub mod config;
pub mod console;
pub mod dependencies;
pub mod distribution;
pub mod error;
pub mod github;
pub mod hash;
pub mod identity;
pub mod metadata;
pub mod publish;
pub mod registry;
pub mod release;
pub mod report;

#[cfg(test)]
mod testing;
