use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use super::escape_html;
use crate::i18n::{I18nError, Localization, MissingTranslation, TranslateOptions};

#[allow(clippy::expect_used)]
static HTML_SAFE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\b|_|\.)html$").expect("html key pattern is valid"));

#[allow(clippy::expect_used)]
static PARTIAL_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/_?").expect("partial separator pattern is valid"));

/// Result of a view translation.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    /// Plain text; escape before embedding in markup.
    Text(String),
    /// Markup that can be embedded as is.
    SafeHtml(String),
    /// Anything that is not a string, such as an array of strings.
    Value(Value),
}

impl Translated {
    #[must_use]
    pub fn is_html_safe(&self) -> bool {
        matches!(self, Translated::SafeHtml(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Translated::Text(s) | Translated::SafeHtml(s) => Some(s),
            Translated::Value(Value::String(s)) => Some(s),
            Translated::Value(_) => None,
        }
    }

    /// Markup for embedding in a template.
    #[must_use]
    pub fn to_html(&self) -> String {
        match self {
            Translated::Text(text) => escape_html(text),
            Translated::SafeHtml(html) => html.clone(),
            Translated::Value(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => escape_html(s),
                    other => escape_html(&other.to_string()),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Translated::Value(other) => escape_html(&other.to_string()),
        }
    }
}

impl fmt::Display for Translated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Translated::Text(s) | Translated::SafeHtml(s) => f.write_str(s),
            Translated::Value(Value::String(s)) => f.write_str(s),
            Translated::Value(other) => write!(f, "{other}"),
        }
    }
}

/// Translation helpers available to templates.
///
/// Lookups always raise inside the backend; a missing translation is
/// rendered as `<span class="translation_missing">en, some, key</span>` so it
/// shows up in the page instead of failing the render.
#[derive(Clone)]
pub struct TranslationHelper {
    backend: Arc<dyn Localization>,
    template_path: Option<String>,
    xss_safe: bool,
}

impl fmt::Debug for TranslationHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationHelper")
            .field("template_path", &self.template_path)
            .field("xss_safe", &self.xss_safe)
            .finish_non_exhaustive()
    }
}

impl TranslationHelper {
    #[must_use]
    pub fn new(backend: Arc<dyn Localization>) -> Self {
        Self {
            backend,
            template_path: None,
            xss_safe: true,
        }
    }

    /// The template being rendered, e.g. `people/_form.html.erb`.
    #[must_use]
    pub fn for_template(mut self, path: &str) -> Self {
        self.template_path = Some(path.to_string());
        self
    }

    /// Escape interpolation values of html-safe keys (on by default).
    #[must_use]
    pub fn xss_safe(mut self, enabled: bool) -> Self {
        self.xss_safe = enabled;
        self
    }

    /// Translate one key.
    ///
    /// A key starting with `.` is scoped by the current template: `.title`
    /// inside `people/_form` looks up `people.form.title`.
    pub fn translate(&self, key: &str, options: TranslateOptions) -> Translated {
        let options = options.raise(true);
        match self.lookup(key, &options) {
            Ok(translated) => translated,
            Err(missing) => missing_span(&missing),
        }
    }

    /// Short for [`translate`](Self::translate).
    pub fn t(&self, key: &str, options: TranslateOptions) -> Translated {
        self.translate(key, options)
    }

    /// Translate several keys at once.
    ///
    /// Deprecated in favour of one call per key. A missing key turns the
    /// whole result into the single missing-translation span.
    pub fn translate_many(&self, keys: &[&str], options: TranslateOptions) -> Vec<Translated> {
        warn!(
            keys = keys.len(),
            "Giving an array to translate is deprecated, please give a single key instead"
        );
        let options = options.raise(true);
        keys.iter()
            .map(|key| self.lookup(key, &options))
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_else(|missing| vec![missing_span(&missing)])
    }

    /// Delegates to the backend.
    pub fn localize(
        &self,
        time: &DateTime<FixedOffset>,
        locale: Option<&str>,
        format: Option<&str>,
    ) -> Result<String, I18nError> {
        self.backend.localize(time, locale, format)
    }

    /// Short for [`localize`](Self::localize).
    pub fn l(&self, time: &DateTime<FixedOffset>) -> Result<String, I18nError> {
        self.localize(time, None, None)
    }

    fn lookup(&self, key: &str, options: &TranslateOptions) -> Result<Translated, MissingTranslation> {
        let qualified = self.scope_key_by_partial(key);
        if !HTML_SAFE_KEY.is_match(&qualified) {
            return Ok(match self.backend.translate(&qualified, options)? {
                Value::String(text) => Translated::Text(text),
                other => Translated::Value(other),
            });
        }

        let mut html_options = options.clone();
        if self.xss_safe {
            for value in html_options.interpolations.values_mut() {
                *value = escape_html(value);
            }
        }
        Ok(match self.backend.translate(&qualified, &html_options)? {
            Value::String(html) => Translated::SafeHtml(html),
            other => Translated::Value(other),
        })
    }

    fn scope_key_by_partial(&self, key: &str) -> String {
        match (key.starts_with('.'), &self.template_path) {
            (true, Some(path)) => {
                let without_extensions = strip_extensions(path);
                format!(
                    "{}{key}",
                    PARTIAL_SEPARATOR.replace_all(without_extensions, ".")
                )
            }
            _ => key.to_string(),
        }
    }
}

/// `people/_form.html.erb` → `people/_form`
fn strip_extensions(path: &str) -> &str {
    let file_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[file_start..].find('.') {
        Some(dot) => &path[..file_start + dot],
        None => path,
    }
}

fn missing_span(missing: &MissingTranslation) -> Translated {
    Translated::SafeHtml(format!(
        "<span class=\"translation_missing\">{}</span>",
        escape_html(&missing.normalized_keys().join(", "))
    ))
}
