//! Media metadata returned by resolvers, and the dedup key derived from it.

use serde::{Deserialize, Serialize};

/// What a resolver knows about a remote resource before fetching it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub id: String,
    pub title: String,
    pub uploader: String,
    pub channel: String,
    /// Canonical page URL reported by the source.
    pub webpage_url: String,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
}

impl MediaMeta {
    /// Best display name for whoever published the resource.
    pub fn publisher(&self) -> &str {
        [self.channel.as_str(), self.uploader.as_str()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown")
    }
}

/// One line of the dedup archive: `<source-type> <source-id>`.
///
/// The source type is compared case-insensitively, so it is lowercased on
/// construction. Source ids are frequently case-sensitive and kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    source_type: String,
    source_id: String,
}

impl ArchiveKey {
    pub fn new(source_type: &str, source_id: &str) -> Self {
        Self {
            source_type: source_type.trim().to_lowercase(),
            source_id: source_id.trim().to_string(),
        }
    }

    /// Parse the `"<extractor> <id>"` form printed by a resolver.
    pub fn parse(line: &str) -> Option<Self> {
        let (source_type, source_id) = line.trim().split_once(char::is_whitespace)?;
        let source_id = source_id.trim();
        if source_type.is_empty() || source_id.is_empty() {
            return None;
        }
        Some(Self::new(source_type, source_id))
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.source_type, self.source_id)
    }
}
