//! Job records: the unit of work stored as one file per job.
//!
//! A job has identity (its filename), a small typed core (`url`, `category`,
//! `app`) and an opaque bag of whatever else the producer sent. The bag is
//! carried through untouched so re-serializing never drops fields.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Extension of job files. The default job glob is `*.dljob`.
pub const JOB_EXTENSION: &str = "dljob";

pub const DEFAULT_CATEGORY: &str = "unsorted";
pub const DEFAULT_APP: &str = "YouTube";

// ---------------------------------------------------------------------------
// Job Name
// ---------------------------------------------------------------------------

/// Filename identifying a job. Stable across every state directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobName(String);

impl JobName {
    /// Generate `<YYYYmmdd-HHMMSS>-<8 hex>.dljob`.
    ///
    /// The hex suffix comes from a v4 UUID, so two names minted in the same
    /// second by different processes do not collide.
    pub fn generate(now: DateTime<Local>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}.{JOB_EXTENSION}",
            now.format("%Y%m%d-%H%M%S"),
            &suffix[..8]
        ))
    }

    /// Accept a producer-supplied filename verbatim, rejecting anything that
    /// could escape the state directory or be mistaken for a temp file.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty()
            || raw.starts_with('.')
            || raw.contains('/')
            || raw.contains('\\')
            || raw.contains('\0')
        {
            return Err(Error::InvalidPayload(format!("unsafe job name: {raw:?}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename without its final extension.
    pub fn stem(&self) -> &str {
        self.0.rsplit_once('.').map_or(&self.0, |(stem, _)| stem)
    }

    /// Final extension including the dot, or empty.
    pub fn extension(&self) -> &str {
        self.0.rfind('.').map_or("", |i| &self.0[i..])
    }

    /// Name the reaper uses when the plain name is already taken.
    pub fn reaped(&self, now: DateTime<Local>) -> Self {
        Self(format!(
            "{}.reaped-{}{}",
            self.stem(),
            now.format("%Y%m%d-%H%M%S"),
            self.extension()
        ))
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A parsed job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Locator of the resource to fetch. Always an absolute http(s) URL.
    pub url: String,

    #[serde(default = "default_category")]
    pub category: String,

    /// Source type; decides which pipeline handles the job.
    #[serde(default = "default_app")]
    pub app: String,

    /// Every other field, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_app() -> String {
    DEFAULT_APP.to_string()
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: default_category(),
            app: default_app(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    /// Build a job from an arbitrary JSON document, validating the typed core.
    ///
    /// Non-string values for the typed fields are stringified the way a
    /// loosely-typed producer would expect. Blank `category`/`app` fall back to
    /// their defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(mut map) = value else {
            return Err(Error::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        };

        let url = take_string(&mut map, "url");
        if url.is_empty() {
            return Err(Error::InvalidPayload("payload missing 'url'".to_string()));
        }
        validate_url(&url)?;

        let category = Some(take_string(&mut map, "category"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_category);
        let app = Some(take_string(&mut map, "app"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_app);

        Ok(Self {
            url,
            category,
            app,
            extra: map,
        })
    }

    /// Parse the text of a job file.
    ///
    /// JSON objects are the normal form. Anything else is treated as a legacy
    /// plain-text job: the first http(s) URL in the text, or its first line.
    pub fn parse(name: &JobName, text: &str) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedJob {
            name: name.to_string(),
            reason,
        };

        let blob = text.trim();
        let result = if blob.starts_with('{') {
            let value: serde_json::Value =
                serde_json::from_str(blob).map_err(|e| malformed(e.to_string()))?;
            Self::from_value(value)
        } else {
            let url = extract_url(blob)
                .or_else(|| blob.lines().next().map(str::trim))
                .unwrap_or_default();
            Self::from_value(serde_json::json!({ "url": url }))
        };

        result.map_err(|e| match e {
            Error::InvalidPayload(reason) => {
                let preview: String = blob.chars().take(200).collect();
                malformed(format!("{reason}; first 200 chars: {preview:?}"))
            }
            other => other,
        })
    }

    /// Stable on-disk form: pretty JSON with a trailing newline.
    pub fn to_text(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// Normalized app key used for dispatch.
    pub fn app_key(&self) -> String {
        self.app.trim().to_lowercase()
    }
}

fn take_string(map: &mut serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    match map.remove(key) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Require an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::InvalidPayload(format!("invalid url {raw:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(parsed),
        _ => Err(Error::InvalidPayload(format!(
            "url must be an absolute http(s) address: {raw:?}"
        ))),
    }
}

/// First `http://` or `https://` URL in `text`, up to whitespace, quotes or
/// angle brackets.
pub fn extract_url(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    let start = match (lower.find("http://"), lower.find("https://")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return None,
    };
    let tail = &text[start..];
    let end = tail
        .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>'))
        .unwrap_or(tail.len());
    Some(&tail[..end])
}
