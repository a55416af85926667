//! Open Hydra control plane library.
//!
//! This crate primarily ships a `hydra-server` binary, but exposes a library
//! surface so the control loop can be driven from integration tests with
//! in-memory collaborators.

pub mod api;
pub mod config;
pub mod controller;
pub mod db;
pub mod desired;
pub mod state;
pub mod workload;
