//! Layerfs configuration types and helpers.

use std::path::Path;

use getset::{CopyGetters, Setters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    ConflictResolution, LayerFsResult, MergeStrategy, DEFAULT_CLEAN_TARGET,
    DEFAULT_CONFLICT_RESOLUTION, DEFAULT_MERGE_STRATEGY, DEFAULT_READ_CHUNK_SIZE,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The layerfs configuration.
///
/// Every field is optional in the TOML form and falls back to the crate defaults.
///
/// ```toml
/// merge_strategy = "preserve"
/// conflict_resolution = "skip"
/// read_chunk_size = 8192
/// clean = false
/// ```
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, CopyGetters, Setters,
)]
#[serde(default)]
pub struct LayerFsConfig {
    /// The strategy used when merging an overlay into a target.
    #[builder(default = DEFAULT_MERGE_STRATEGY)]
    #[getset(get_copy = "pub with_prefix", set = "pub")]
    merge_strategy: MergeStrategy,

    /// The policy for files that already exist on disk when materializing.
    #[builder(default = DEFAULT_CONFLICT_RESOLUTION)]
    #[getset(get_copy = "pub with_prefix", set = "pub")]
    conflict_resolution: ConflictResolution,

    /// The chunk size used when streaming content for comparison.
    #[builder(default = DEFAULT_READ_CHUNK_SIZE)]
    #[getset(get_copy = "pub with_prefix", set = "pub")]
    read_chunk_size: usize,

    /// Whether materialization clears the target directory first.
    #[builder(default = DEFAULT_CLEAN_TARGET)]
    #[getset(get_copy = "pub with_prefix", set = "pub")]
    clean: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerFsConfig {
    /// Parses a configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> LayerFsResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// ## Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The file contains invalid TOML or unknown policy names
    pub async fn load(path: impl AsRef<Path>) -> LayerFsResult<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&contents)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LayerFsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
