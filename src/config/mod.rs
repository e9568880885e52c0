// src/config/mod.rs

//! Experiment configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load an experiment file from disk (`loader.rs`).
//! - Validate it into a [`ConfigFile`] (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    BackendSection, ClusterSection, ConfigFile, LocalSection, OrchestratorSection, Overrides,
    ProjectSection, RawConfigFile, StoreSection,
};
