//! Core types and configuration for stagecraft.
//!
//! This crate defines the `stagecraft.toml` schema ([`StagecraftConfig`]),
//! manifest and lockfile discovery ([`Manifest`]), the pipeline model
//! ([`Pipeline`], [`Stage`], [`Step`], [`Promotion`]) with its validation
//! rules, the standard web-app preset, and shared error types.

pub mod config;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod preset;

pub use config::{
    BuildConfig, CONFIG_FILE, CacheConfig, DepsConfig, LockfileVariant, OutputConfig,
    ProjectConfig, RuntimeConfig, StagecraftConfig,
};
pub use error::{Error, Result};
pub use manifest::{Manifest, detect_lockfile};
pub use pipeline::{
    CommandLine, CommandRole, Identity, Owner, Pipeline, Promotion, Stage, Step, stage_path,
};
pub use preset::standard_pipeline;
