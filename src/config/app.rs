use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::hardening::{HardeningConfig, HardeningOptions};
use super::ConfigError;
use crate::failsafe::RawErrorSink;

/// Application configuration file.
///
/// ```yaml
/// dispatcher:
///   allow_concurrency: false
///   cache_classes: false
///   error_file_path: public
/// logging:
///   level: info
///   format: pretty
/// hardening:
///   default: hardened
///   disable_xml_parsing: false
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherSection,
    pub logging: LoggingSection,
    pub hardening: Option<HardeningOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// Run dispatches in parallel instead of serializing them behind the pool lock.
    pub allow_concurrency: bool,
    /// `false` turns on reload mode: prepare callbacks and route/view reloads on every request.
    pub cache_classes: bool,
    /// Directory holding static error pages such as `500.html`.
    pub error_file_path: Option<PathBuf>,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            allow_concurrency: false,
            cache_classes: true,
            error_file_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
}

impl AppConfig {
    /// Load from a `.yaml`/`.yml` or `.toml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&source, path),
            Some("toml") => Self::from_toml_str(&source, path),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_yaml_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a map.
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Resolve the hardening toggles, warning on `diagnostics` if the section is absent.
    pub fn hardening(&self, diagnostics: &dyn RawErrorSink) -> Result<HardeningConfig, ConfigError> {
        HardeningConfig::from_options(self.hardening.clone(), diagnostics)
    }
}
