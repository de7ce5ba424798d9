//! sitegen-lib: Core types and logic for sitegen
//!
//! This crate turns a multi-site configuration into Terraform root modules and
//! drives the external tool across them:
//! - `config`: the configuration tree, its loading and validation
//! - `plugin`: the integration contract and the plugin registry
//! - `state`: per-unit backends and remote state data sources
//! - `generate`: component and site rendering, formatting and writing
//! - `lockfile`: per-site fingerprints gating regeneration
//! - `graph` / `execute`: dependency-ordered batched execution

pub mod config;
pub mod consts;
pub mod execute;
pub mod generate;
pub mod graph;
pub mod lockfile;
pub mod plugin;
pub mod state;
pub mod util;
