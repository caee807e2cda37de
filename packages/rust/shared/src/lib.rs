//! Shared types, error model, adapter contracts, and configuration for docmodern.
//!
//! This crate is the foundation depended on by all other docmodern crates.
//! It provides:
//! - [`DocModernError`], [`StageFailure`], [`ErrorKind`]: the error model
//! - Domain types ([`PipelineState`], [`Finding`], [`Recommendation`], [`QualityReport`])
//! - Adapter contracts ([`Fetcher`], [`CompletionClient`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod adapters;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use adapters::{
    Completion, CompletionClient, CompletionRequest, FetchError, FetchErrorKind, Fetcher,
    ServiceError, ServiceErrorKind,
};
pub use config::{
    AppConfig, LimitsConfig, LlmConfig, PipelineConfig, PipelineSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
pub use error::{DocModernError, ErrorKind, Result, StageFailure};
pub use types::{
    Finding, PipelineState, PipelineStatus, QUALITY_DIMENSIONS, QualityReport, Recommendation,
    RunId, Severity, StageError, StageName, Usage, Verdict,
};
