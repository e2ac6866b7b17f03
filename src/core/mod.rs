//! Core planning logic: stage table, composition graph, manifests and plans.

pub mod composer;
pub mod error;
pub mod graph;
pub mod hasher;
pub mod manifest;
pub mod parser;
pub mod persist;
pub mod planner;
pub mod stages;
pub mod types;
