//! Security hardening finalizer.
//!
//! Two named profiles seed every toggle before per-key overrides apply:
//!
//! | toggle                         | `hardened` | `compatible` |
//! |--------------------------------|------------|--------------|
//! | `disable_json_parsing`         | true       | false        |
//! | `disable_xml_parsing`          | true       | false        |
//! | `escape_html_entities_in_json` | true       | false        |
//!
//! Toggles use the opt-out polarity (`disable_*`). The finalized result is a
//! [`FrameworkSettings`] value that is installed process-wide exactly once.

use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::ConfigError;
use crate::failsafe::RawErrorSink;
use crate::params::{encode_json, BodyFormat, ParamParsers};

pub const MISSING_OPTIONS_WARNING: &str = "Please configure the `hardening` section of your \
application config. Defaulting to `hardening: { default: compatible }`";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Hardened,
    Compatible,
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hardened" => Ok(Profile::Hardened),
            "compatible" => Ok(Profile::Compatible),
            other => Err(ConfigError::UnknownProfile(other.to_string())),
        }
    }
}

/// The `hardening` section as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardeningOptions {
    pub default: Option<String>,
    pub disable_json_parsing: Option<bool>,
    pub disable_xml_parsing: Option<bool>,
    pub escape_html_entities_in_json: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardeningConfig {
    pub disable_json_parsing: bool,
    pub disable_xml_parsing: bool,
    pub escape_html_entities_in_json: bool,
}

impl Default for HardeningConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Compatible)
    }
}

impl HardeningConfig {
    #[must_use]
    pub fn for_profile(profile: Profile) -> Self {
        let mut config = HardeningConfig {
            disable_json_parsing: false,
            disable_xml_parsing: false,
            escape_html_entities_in_json: false,
        };
        config.apply_profile(profile);
        config
    }

    /// Build from the optional config section.
    ///
    /// A missing section is tolerated with a warning on `diagnostics` and
    /// implies `compatible`. An unknown default profile is a hard error.
    pub fn from_options(
        options: Option<HardeningOptions>,
        diagnostics: &dyn RawErrorSink,
    ) -> Result<Self, ConfigError> {
        let options = options.unwrap_or_else(|| {
            diagnostics.emit(MISSING_OPTIONS_WARNING);
            HardeningOptions::default()
        });

        let mut config = HardeningConfig::default();
        config.set_defaults(options.default.as_deref().unwrap_or("compatible"))?;

        if let Some(value) = options.disable_json_parsing {
            config.disable_json_parsing = value;
        }
        if let Some(value) = options.disable_xml_parsing {
            config.disable_xml_parsing = value;
        }
        if let Some(value) = options.escape_html_entities_in_json {
            config.escape_html_entities_in_json = value;
        }
        Ok(config)
    }

    /// Reset every toggle from a named profile.
    pub fn set_defaults(&mut self, default: &str) -> Result<(), ConfigError> {
        let profile: Profile = default.parse()?;
        self.apply_profile(profile);
        Ok(())
    }

    fn apply_profile(&mut self, profile: Profile) {
        let hardened = profile == Profile::Hardened;
        self.disable_json_parsing = hardened;
        self.disable_xml_parsing = hardened;
        self.escape_html_entities_in_json = hardened;
    }

    /// Apply the toggles to a fresh set of framework settings.
    #[must_use]
    pub fn finalize(&self) -> FrameworkSettings {
        let mut parsers = ParamParsers::all();
        if self.disable_json_parsing {
            parsers.remove(BodyFormat::Json);
        }
        if self.disable_xml_parsing {
            parsers.remove(BodyFormat::Xml);
        }
        FrameworkSettings {
            param_parsers: parsers,
            escape_html_entities_in_json: self.escape_html_entities_in_json,
        }
    }
}

/// Read-only framework behaviour derived from the hardening toggles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameworkSettings {
    param_parsers: ParamParsers,
    escape_html_entities_in_json: bool,
}

impl FrameworkSettings {
    #[must_use]
    pub fn param_parsers(&self) -> &ParamParsers {
        &self.param_parsers
    }

    #[must_use]
    pub fn escape_html_entities_in_json(&self) -> bool {
        self.escape_html_entities_in_json
    }

    #[must_use]
    pub fn encode_json(&self, value: &Value) -> String {
        encode_json(value, self.escape_html_entities_in_json)
    }
}

static FRAMEWORK_SETTINGS: OnceCell<Arc<FrameworkSettings>> = OnceCell::new();

/// Install the finalized settings for the rest of the process.
pub fn install(settings: FrameworkSettings) -> Result<Arc<FrameworkSettings>, ConfigError> {
    let settings = Arc::new(settings);
    FRAMEWORK_SETTINGS
        .set(Arc::clone(&settings))
        .map_err(|_| ConfigError::AlreadyFinalized)?;
    info!(
        json_parsing = settings.param_parsers.contains(BodyFormat::Json),
        xml_parsing = settings.param_parsers.contains(BodyFormat::Xml),
        escape_html_entities_in_json = settings.escape_html_entities_in_json,
        "Framework settings finalized"
    );
    Ok(settings)
}

/// Installed settings, or the `compatible` defaults if nothing was installed yet.
#[must_use]
pub fn installed() -> Arc<FrameworkSettings> {
    FRAMEWORK_SETTINGS
        .get()
        .map(Arc::clone)
        .unwrap_or_else(|| Arc::new(HardeningConfig::default().finalize()))
}
