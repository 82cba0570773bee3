use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{I18nError, Localization, MissingTranslation, TranslateOptions};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"%\{(\w+)\}").expect("placeholder pattern is valid")
});

const FALLBACK_TIME_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// In-memory translations keyed by locale.
///
/// Translations come from two places: YAML files on the load path (each file
/// maps locales to nested keys, re-read on every [`reload`](Localization::reload))
/// and [`store_translations`](Self::store_translations) calls, which survive reloads.
pub struct I18nStore {
    default_locale: String,
    load_path: Vec<PathBuf>,
    stored: RwLock<Value>,
    merged: RwLock<Value>,
    reloads: AtomicU64,
}

impl std::fmt::Debug for I18nStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I18nStore")
            .field("default_locale", &self.default_locale)
            .field("load_path", &self.load_path)
            .finish_non_exhaustive()
    }
}

impl I18nStore {
    #[must_use]
    pub fn new(default_locale: &str) -> Self {
        Self {
            default_locale: default_locale.to_string(),
            load_path: Vec::new(),
            stored: RwLock::new(Value::Object(Map::new())),
            merged: RwLock::new(Value::Object(Map::new())),
            reloads: AtomicU64::new(0),
        }
    }

    /// Files or directories (searched for `*.yml` / `*.yaml`) read on reload.
    #[must_use]
    pub fn with_load_path(mut self, paths: Vec<PathBuf>) -> Self {
        self.load_path = paths;
        self
    }

    /// Deep-merge `translations` under `locale`.
    pub fn store_translations(&self, locale: &str, translations: Value) {
        let mut wrapped = Map::new();
        wrapped.insert(locale.to_string(), translations);
        let wrapped = Value::Object(wrapped);
        deep_merge(
            &mut self.stored.write().unwrap_or_else(PoisonError::into_inner),
            wrapped.clone(),
        );
        deep_merge(
            &mut self.merged.write().unwrap_or_else(PoisonError::into_inner),
            wrapped,
        );
    }

    /// Number of completed reloads.
    #[must_use]
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Acquire)
    }

    fn load_files(&self) -> Result<Value, I18nError> {
        let mut loaded = Value::Object(Map::new());
        for root in &self.load_path {
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(|e| I18nError::Load {
                    path: root.clone(),
                    message: e.to_string(),
                })?;
                if entry.file_type().is_file() && is_yaml(entry.path()) {
                    deep_merge(&mut loaded, read_yaml(entry.path())?);
                }
            }
        }
        Ok(loaded)
    }

    fn lookup(&self, locale: &str, scope: &[String], key: &str) -> Option<Value> {
        let merged = self.merged.read().unwrap_or_else(PoisonError::into_inner);
        let segments = std::iter::once(locale)
            .chain(scope.iter().map(String::as_str))
            .chain(std::iter::once(key))
            .flat_map(|part| part.split('.'))
            .filter(|segment| !segment.is_empty());
        let mut node = &*merged;
        for segment in segments {
            node = node.get(segment)?;
        }
        Some(node.clone())
    }
}

impl Localization for I18nStore {
    fn reload(&self) -> anyhow::Result<()> {
        let mut fresh = self.load_files()?;
        deep_merge(
            &mut fresh,
            self.stored
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        );
        *self.merged.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        let count = self.reloads.fetch_add(1, Ordering::AcqRel) + 1;
        info!(reloads = count, paths = self.load_path.len(), "Translations reloaded");
        Ok(())
    }

    fn default_locale(&self) -> String {
        self.default_locale.clone()
    }

    fn translate(&self, key: &str, options: &TranslateOptions) -> Result<Value, MissingTranslation> {
        let locale = options.locale.as_deref().unwrap_or(&self.default_locale);
        match self.lookup(locale, &options.scope, key) {
            Some(found) => Ok(interpolate(found, options)),
            None => {
                let missing = MissingTranslation {
                    locale: locale.to_string(),
                    key: key.to_string(),
                    scope: options.scope.clone(),
                };
                if let Some(default) = &options.default {
                    return Ok(interpolate(Value::String(default.clone()), options));
                }
                debug!(key, locale, "Translation missing");
                if options.raise {
                    Err(missing)
                } else {
                    Ok(Value::String(missing.to_string()))
                }
            }
        }
    }

    fn localize(
        &self,
        time: &DateTime<FixedOffset>,
        locale: Option<&str>,
        format: Option<&str>,
    ) -> Result<String, I18nError> {
        let locale = locale.unwrap_or(&self.default_locale);
        let name = format.unwrap_or("default");
        let pattern = match self.lookup(locale, &[], &format!("time.formats.{name}")) {
            Some(Value::String(pattern)) => pattern,
            _ if name.contains('%') => name.to_string(),
            _ if format.is_none() => FALLBACK_TIME_FORMAT.to_string(),
            _ => {
                return Err(MissingTranslation {
                    locale: locale.to_string(),
                    key: format!("time.formats.{name}"),
                    scope: Vec::new(),
                }
                .into())
            }
        };
        if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
            return Err(I18nError::InvalidFormat(pattern));
        }
        Ok(time.format(&pattern).to_string())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}

fn read_yaml(path: &Path) -> Result<Value, I18nError> {
    let load_error = |message: String| I18nError::Load {
        path: path.to_path_buf(),
        message,
    };
    let source = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    if source.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_yaml::from_str(&source).map_err(|e| load_error(e.to_string()))
}

fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Substitute `%{name}` placeholders; unknown names are left as they are.
fn interpolate(value: Value, options: &TranslateOptions) -> Value {
    if options.interpolations.is_empty() {
        return value;
    }
    match value {
        Value::String(text) => Value::String(
            PLACEHOLDER
                .replace_all(&text, |caps: &Captures<'_>| {
                    options
                        .interpolations
                        .get(&caps[1])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| interpolate(item, options))
                .collect(),
        ),
        other => other,
    }
}
