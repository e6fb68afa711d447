use nimbus_crypto::{KdfParams, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NimbusError, NimbusResult};

/// Top-level client configuration (loaded from nimbus.toml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    pub logging: LoggingConfig,
    pub kdf: KdfConfig,
    pub stream: StreamConfig,
    pub upload: UploadConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Argon2id cost used when creating or re-wrapping key material.
///
/// Unlocking always uses the parameters stored with the key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub preset: KdfPreset,
    /// Overrides the preset's operations limit
    pub ops_limit: Option<u32>,
    /// Overrides the preset's memory limit (KiB)
    pub mem_limit_kib: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfPreset {
    #[default]
    Interactive,
    Moderate,
    Sensitive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Plaintext bytes per stream chunk (default: 4 MiB)
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Cipher frames per multipart upload part (default: 2)
    pub frames_per_part: usize,
    /// Concurrent file uploads, one cipher engine each (default: 4)
    pub max_parallel_uploads: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pending jobs per cipher engine before callers wait (default: 64)
    pub queue_depth: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            preset: KdfPreset::Interactive,
            ops_limit: None,
            mem_limit_kib: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            frames_per_part: 2,
            max_parallel_uploads: 4,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

impl KdfConfig {
    /// Resolve the preset and any overrides into concrete Argon2id parameters
    pub fn params(&self) -> KdfParams {
        let preset = match self.preset {
            KdfPreset::Interactive => KdfParams::INTERACTIVE,
            KdfPreset::Moderate => KdfParams::MODERATE,
            KdfPreset::Sensitive => KdfParams::SENSITIVE,
        };
        KdfParams::new(
            self.ops_limit.unwrap_or(preset.ops_limit),
            self.mem_limit_kib.unwrap_or(preset.mem_limit_kib),
        )
    }
}

impl NimbusConfig {
    /// Load and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> NimbusResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| NimbusError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NimbusResult<()> {
        if self.stream.chunk_size == 0 {
            return Err(NimbusError::Config("stream.chunk_size must be > 0".into()));
        }
        if self.upload.frames_per_part == 0 {
            return Err(NimbusError::Config(
                "upload.frames_per_part must be > 0".into(),
            ));
        }
        if self.upload.max_parallel_uploads == 0 {
            return Err(NimbusError::Config(
                "upload.max_parallel_uploads must be > 0".into(),
            ));
        }
        if self.engine.queue_depth == 0 {
            return Err(NimbusError::Config("engine.queue_depth must be > 0".into()));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(NimbusError::Config(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        let params = self.kdf.params();
        if params.ops_limit == 0 || params.mem_limit_kib < 8 {
            return Err(NimbusError::Config(format!(
                "kdf parameters too weak: ops_limit={} mem_limit_kib={}",
                params.ops_limit, params.mem_limit_kib
            )));
        }
        Ok(())
    }
}
