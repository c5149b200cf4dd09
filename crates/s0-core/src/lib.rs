//! Core types, configuration, and error handling for s0.
//!
//! This crate provides the shared foundation used by all other s0 crates:
//! - [`S0Error`]: unified error type using `thiserror`
//! - [`S0Config`]: configuration loaded from `.s0.toml`
//! - Shared types: [`ComponentRecord`], [`ComponentMatch`], [`EmbeddingSpace`],
//!   [`OutputFormat`], [`SearchMode`], [`ReportFormat`]

mod config;
mod error;
mod types;

pub use config::{
    CorpusBackend, CorpusConfig, EmbeddingConfig, GenerationConfig, LlmConfig, S0Config,
    ServerConfig, LLM_API_KEY_VARS,
};
pub use error::S0Error;
pub use types::{
    ComponentMatch, ComponentRecord, CorpusRow, EmbeddingSpace, OutputFormat, ReportFormat,
    SearchMode,
};
