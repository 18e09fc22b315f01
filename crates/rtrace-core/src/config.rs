use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level rtrace configuration, loaded from rtrace.toml.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtraceConfig {
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub transforms: TransformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Device extensions removed from every replayed vkCreateDevice
    #[serde(default = "default_strip_device_extensions")]
    pub strip_device_extensions: Vec<String>,
    /// Inject the virtual-swapchain pNext entry into surface and swapchain creation
    #[serde(default = "default_true")]
    pub virtual_swapchain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// First application-pool address handed out for synthesized data
    #[serde(default = "default_alloc_base")]
    pub base: u64,
    /// Bytes available above `base`
    #[serde(default = "default_alloc_capacity")]
    pub capacity: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Clamp image extents to this many texels per side
    pub minimize_textures: Option<u32>,
    /// Force NEAREST filtering on every sampler
    #[serde(default)]
    pub simplify_samplers: bool,
    /// Disable sampler anisotropy and the samplerAnisotropy device feature
    #[serde(default)]
    pub disable_anisotropy: bool,
    /// Layers appended to every replayed vkCreateInstance
    #[serde(default)]
    pub profiling_layers: Vec<String>,
    /// Write the trace-to-replay handle table to this file
    pub handle_mapping: Option<String>,
    /// Append one line per command to this file
    pub command_log: Option<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            strip_device_extensions: default_strip_device_extensions(),
            virtual_swapchain: true,
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            base: default_alloc_base(),
            capacity: default_alloc_capacity(),
        }
    }
}

impl RtraceConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: RtraceConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. `$XDG_CONFIG_HOME/rtrace/rtrace.toml`
/// 2. Local fallback: `./rtrace.toml`
pub fn default_config_path() -> String {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        let user_path = format!("{}/rtrace/rtrace.toml", config_home);
        if Path::new(&user_path).exists() {
            return user_path;
        }
    }
    "rtrace.toml".to_string()
}

fn default_strip_device_extensions() -> Vec<String> {
    vec!["VK_EXT_debug_marker".to_string()]
}

fn default_alloc_base() -> u64 {
    0x7e00_0000_0000
}

fn default_alloc_capacity() -> u64 {
    0x4000_0000
}

fn default_true() -> bool {
    true
}
