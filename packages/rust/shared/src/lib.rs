//! Shared types, error model, and configuration for OpenCraft.
//!
//! This crate is the foundation depended on by all other OpenCraft crates.
//! It provides:
//! - [`OpenCraftError`]: the unified error type
//! - Domain types ([`Material`], [`Combination`], [`CachedCombination`], [`CraftOutcome`])
//! - Name helpers ([`normalize_name`], [`canonical_pair`], base elements)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, EmbeddingBackend, EmbeddingConfig, EnrichmentConfig,
    GeneratorConfig, api_key_from_env, config_dir, config_file_path, database_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{OpenCraftError, Result};
pub use types::{
    BASE_ELEMENTS, CachedCombination, Combination, CombinationId, CraftOutcome, Material,
    MaterialSummary, PLACEHOLDER_EMOJI, base_emoji, canonical_pair, is_base_element,
    normalize_name, same_name,
};
