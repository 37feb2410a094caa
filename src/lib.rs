//
// lib.rs
// Dicom-Hanging-rs
//
// Exposes the hanging protocol engine modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Engine, leaves first: attributes -> rules -> engine -> matcher -> binder -> service.
pub mod attributes;
pub mod binder;
pub mod engine;
pub mod error;
pub mod events;
pub mod extensions;
pub mod matcher;
pub mod models;
pub mod protocol;
pub mod rules;
pub mod service;

// Outer surfaces: DICOM ingestion, CLI verbs and the HTTP API.
pub mod cli;
pub mod dicom_access;
pub mod metadata;
pub mod web;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{HangingProtocolError, Result};
pub use service::{hang, HangingProtocolService, HangingReport};
