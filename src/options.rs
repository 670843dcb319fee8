//! Compiler configuration.
//!
//! ## Example config file (codec.toml):
//! ```toml
//! max_depth = 64
//! strict_constants = true
//! default_tag_type = "u16"
//! default_tag_field = "kind"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Maximum number of block compilations in flight at once.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Check decoded `const` fields against their declared value.
    #[serde(default)]
    pub strict_constants: bool,

    /// Discriminant wire type for enums that don't name one.
    #[serde(default = "default_tag_type")]
    pub default_tag_type: String,

    /// Discriminant key for object enums that don't name one.
    #[serde(default = "default_tag_field")]
    pub default_tag_field: String,
}

fn default_max_depth() -> usize {
    64
}

fn default_tag_type() -> String {
    "u8".to_string()
}

fn default_tag_field() -> String {
    "type".to_string()
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            strict_constants: false,
            default_tag_type: default_tag_type(),
            default_tag_field: default_tag_field(),
        }
    }
}

impl CompileOptions {
    pub fn from_toml_str(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&src)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(options)
    }
}
