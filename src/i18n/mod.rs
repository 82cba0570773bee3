//! # Localization Module
//!
//! The [`Localization`] contract the dispatcher reloads as a preparation
//! callback and the view layer translates through, plus [`I18nStore`], an
//! in-memory backend fed from YAML files.

mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use thiserror::Error;

pub use store::I18nStore;

/// Lookup failed for `key` in `locale` under `scope`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("translation missing: {}", normalize_keys(.locale, .scope, .key).join(", "))]
pub struct MissingTranslation {
    pub locale: String,
    pub key: String,
    pub scope: Vec<String>,
}

impl MissingTranslation {
    /// Locale, scope segments and key segments, dot-separated parts split out.
    #[must_use]
    pub fn normalized_keys(&self) -> Vec<String> {
        normalize_keys(&self.locale, &self.scope, &self.key)
    }
}

fn normalize_keys(locale: &str, scope: &[String], key: &str) -> Vec<String> {
    std::iter::once(locale)
        .chain(scope.iter().map(String::as_str))
        .chain(std::iter::once(key))
        .flat_map(|part| part.split('.'))
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Error)]
pub enum I18nError {
    #[error(transparent)]
    Missing(#[from] MissingTranslation),
    #[error("invalid time format `{0}`")]
    InvalidFormat(String),
    #[error("failed to load translations from {path}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Options for one [`Localization::translate`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Falls back to the backend's default locale.
    pub locale: Option<String>,
    pub scope: Vec<String>,
    /// Used (and interpolated) when the key is missing.
    pub default: Option<String>,
    /// Return `MissingTranslation` instead of a placeholder string.
    pub raise: bool,
    /// Values for `%{name}` placeholders.
    pub interpolations: BTreeMap<String, String>,
}

impl TranslateOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: &str) -> Self {
        self.scope.push(scope.to_string());
        self
    }

    #[must_use]
    pub fn default_value(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    #[must_use]
    pub fn raise(mut self, raise: bool) -> Self {
        self.raise = raise;
        self
    }

    #[must_use]
    pub fn interpolate(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.interpolations.insert(name.to_string(), value.to_string());
        self
    }
}

/// A translation backend.
pub trait Localization: Send + Sync {
    /// Re-read translation sources.
    fn reload(&self) -> anyhow::Result<()>;

    fn default_locale(&self) -> String;

    /// Look up `key`; strings (and strings inside arrays) are interpolated.
    fn translate(&self, key: &str, options: &TranslateOptions) -> Result<Value, MissingTranslation>;

    /// Format `time` with the named format of `locale` (`default` when `None`).
    fn localize(
        &self,
        time: &DateTime<FixedOffset>,
        locale: Option<&str>,
        format: Option<&str>,
    ) -> Result<String, I18nError>;
}
