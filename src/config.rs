//! lispjit.toml configuration.
//!
//! A serde/toml struct with per-section sub-structs, a directory-upward
//! search for the config file, and a fall-back to `Default` when none is
//! found. Nothing here affects the bytes a compile emits — it only sizes
//! buffers and the heap the CLI allocates before invoking compiled code,
//! and controls how much detail the CLI includes in its diagnostics.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config file not found: {0}")]
    NotFound(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching `lispjit.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LispjitConfig {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub heap: HeapConfig,
    #[serde(default)]
    pub compiler: CompilerConfig,
}

impl LispjitConfig {
    /// Load configuration from a specific file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: LispjitConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration by searching the current directory and its
    /// ancestors for `lispjit.toml`.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Search upward from `start_dir` for `lispjit.toml`, falling back to
    /// `Default::default()` if the filesystem root is reached without
    /// finding one.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join("lispjit.toml");
            if candidate.exists() {
                return Self::load(&candidate);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }
}

/// Sizing for the writable code buffer allocated before each compile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_size_bytes")]
    pub size_bytes: usize,
}

fn default_buffer_size_bytes() -> usize {
    4096
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size_bytes: default_buffer_size_bytes(),
        }
    }
}

/// Sizing for the heap `Vec<u64>` passed to compiled code in `rdi`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapConfig {
    #[serde(default = "default_heap_words")]
    pub default_words: usize,
}

fn default_heap_words() -> usize {
    1024
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            default_words: default_heap_words(),
        }
    }
}

/// Compiler-facing switches that do not change emitted bytes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompilerConfig {
    #[serde(default)]
    pub verbose_errors: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = LispjitConfig::default();
        assert_eq!(cfg.buffer.size_bytes, 4096);
        assert_eq!(cfg.heap.default_words, 1024);
        assert!(!cfg.compiler.verbose_errors);
    }

    #[test]
    fn find_and_load_falls_back_to_default_past_root() {
        let tmp = std::env::temp_dir().join(format!("lispjit-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let cfg = LispjitConfig::find_and_load(&tmp).unwrap();
        assert_eq!(cfg.buffer.size_bytes, default_buffer_size_bytes());
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn load_parses_toml_sections() {
        let tmp = std::env::temp_dir().join(format!("lispjit-config-load-{}", std::process::id()));
        std::fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("lispjit.toml");
        std::fs::write(
            &path,
            "[buffer]\nsize_bytes = 8192\n\n[heap]\ndefault_words = 64\n\n[compiler]\nverbose_errors = true\n",
        )
        .unwrap();
        let cfg = LispjitConfig::load(&path).unwrap();
        assert_eq!(cfg.buffer.size_bytes, 8192);
        assert_eq!(cfg.heap.default_words, 64);
        assert!(cfg.compiler.verbose_errors);
        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn load_missing_file_errors() {
        let err = LispjitConfig::load(Path::new("/nonexistent/lispjit.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
