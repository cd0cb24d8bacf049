//! Resource model: the typed containers collectors hand to the persistence
//! layer, and the metadata sidecar that travels with each one.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Immutable `{display_name, extra}` record persisted as a `.meta.yaml`
/// sidecar next to a resource's content file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceMetadata {
    pub display_name: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ResourceMetadata {
    /// Construct metadata, coercing every extra value to a string and
    /// rejecting an empty `display_name`.
    pub fn new(
        display_name: impl Into<String>,
        extra: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            bail!("ResourceMetadata.display_name must be non-empty");
        }
        Ok(Self {
            display_name,
            extra: extra.into_iter().collect(),
        })
    }

    /// Flatten into a single string map with `display_name` merged in,
    /// the shape attached to vector-collection entries.
    pub fn as_dict(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("display_name".to_string(), self.display_name.clone());
        map
    }
}

/// A unit of ingested content with a stable hash, filename, and optional
/// metadata. Implemented by [`ScrapedResource`], [`TicketResource`], and
/// [`LocalFileResource`].
pub trait Resource: Send + Sync {
    fn hash(&self) -> String;
    fn filename(&self) -> String;
    fn content(&self) -> ResourceContent;
    fn metadata(&self) -> Option<ResourceMetadata>;
}

/// A resource's content, either text or opaque bytes (e.g. a fetched PDF).
#[derive(Debug, Clone)]
pub enum ResourceContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl ResourceContent {
    pub fn is_binary(&self) -> bool {
        matches!(self, ResourceContent::Bytes(_))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            ResourceContent::Text(t) => t.as_bytes().to_vec(),
            ResourceContent::Bytes(b) => b.clone(),
        }
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// 12-hex-digit prefix of an md5 digest, used for URL- and path-derived hashes.
fn short_md5(input: &str) -> String {
    md5_hex(input)[..12].to_string()
}

fn format_link_display(url: &str) -> String {
    let without_scheme = url.splitn(2, "://").nth(1).unwrap_or(url);
    let mut parts = without_scheme.splitn(2, '/');
    let host = parts.next().unwrap_or(without_scheme);
    let rest = parts.next().unwrap_or("");
    let first_segment = rest.split('/').find(|s| !s.is_empty());
    match first_segment {
        Some(seg) => format!("{host} / {seg}"),
        None => host.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ScrapedResource
// ═══════════════════════════════════════════════════════════════════════

/// A page fetched by a web/git/SSO scraper.
pub struct ScrapedResource {
    pub url: String,
    pub payload: ResourceContent,
    pub suffix: String,
    pub source_type: String,
    pub extra_metadata: BTreeMap<String, String>,
}

impl Resource for ScrapedResource {
    fn hash(&self) -> String {
        short_md5(&self.url)
    }

    fn filename(&self) -> String {
        format!("{}.{}", self.hash(), self.suffix.trim_start_matches('.'))
    }

    fn content(&self) -> ResourceContent {
        self.payload.clone()
    }

    fn metadata(&self) -> Option<ResourceMetadata> {
        let display_name = self
            .extra_metadata
            .get("display_name")
            .cloned()
            .unwrap_or_else(|| format_link_display(&self.url));
        let mut extra = self.extra_metadata.clone();
        extra.insert("url".to_string(), self.url.clone());
        extra.insert("source_type".to_string(), self.source_type.clone());
        ResourceMetadata::new(display_name, extra).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// TicketResource
// ═══════════════════════════════════════════════════════════════════════

pub struct TicketResource {
    pub ticket_id: String,
    pub text: String,
    pub source: TicketSource,
    pub created_at: Option<DateTime<Utc>>,
    pub extra_metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketSource {
    Jira,
    Redmine,
}

impl TicketSource {
    fn as_str(&self) -> &'static str {
        match self {
            TicketSource::Jira => "jira",
            TicketSource::Redmine => "redmine",
        }
    }
}

fn normalize_ticket_id(raw: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());
    re.replace_all(raw, "_").to_string()
}

impl Resource for TicketResource {
    fn hash(&self) -> String {
        format!("{}_{}", self.source.as_str(), normalize_ticket_id(&self.ticket_id))
    }

    fn filename(&self) -> String {
        format!("{}.txt", self.hash())
    }

    fn content(&self) -> ResourceContent {
        ResourceContent::Text(self.text.clone())
    }

    fn metadata(&self) -> Option<ResourceMetadata> {
        let display_name = self
            .extra_metadata
            .get("display_name")
            .cloned()
            .or_else(|| self.extra_metadata.get("url").cloned())
            .unwrap_or_else(|| format!("{}:{}", self.source.as_str(), self.ticket_id));
        let mut extra = self.extra_metadata.clone();
        extra.insert("ticket_id".to_string(), self.ticket_id.clone());
        extra.insert("source".to_string(), self.source.as_str().to_string());
        if let Some(created) = self.created_at {
            extra.insert("created_at".to_string(), created.to_rfc3339());
        }
        ResourceMetadata::new(display_name, extra).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// LocalFileResource
// ═══════════════════════════════════════════════════════════════════════

pub struct LocalFileResource {
    pub file_name: String,
    pub source_path: PathBuf,
    pub bytes: Vec<u8>,
    pub base_dir: Option<PathBuf>,
}

impl LocalFileResource {
    fn hash_key(&self) -> String {
        match &self.base_dir {
            Some(base) => self
                .source_path
                .strip_prefix(base)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| self.source_path.to_string_lossy().to_string()),
            None => self.source_path.to_string_lossy().to_string(),
        }
    }
}

impl Resource for LocalFileResource {
    fn hash(&self) -> String {
        short_md5(&self.hash_key())
    }

    fn filename(&self) -> String {
        let suffix = Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if suffix.is_empty() {
            self.hash()
        } else {
            format!("{}.{}", self.hash(), suffix)
        }
    }

    fn content(&self) -> ResourceContent {
        match String::from_utf8(self.bytes.clone()) {
            Ok(text) => ResourceContent::Text(text),
            Err(_) => ResourceContent::Bytes(self.bytes.clone()),
        }
    }

    fn metadata(&self) -> Option<ResourceMetadata> {
        let suffix = Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut extra = BTreeMap::new();
        extra.insert(
            "original_path".to_string(),
            self.source_path.to_string_lossy().to_string(),
        );
        extra.insert("suffix".to_string(), suffix);
        extra.insert("size_bytes".to_string(), self.bytes.len().to_string());
        extra.insert("modified_at".to_string(), Utc::now().to_rfc3339());
        if let Some(base) = &self.base_dir {
            extra.insert("base_path".to_string(), base.to_string_lossy().to_string());
            if let Ok(rel) = self.source_path.strip_prefix(base) {
                extra.insert(
                    "relative_path".to_string(),
                    rel.to_string_lossy().to_string(),
                );
            }
        }
        ResourceMetadata::new(self.file_name.clone(), extra).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scraped_resource_hash_is_stable() {
        let r = ScrapedResource {
            url: "https://example.com/docs/guide".to_string(),
            payload: ResourceContent::Text("hi".to_string()),
            suffix: "html".to_string(),
            source_type: "web".to_string(),
            extra_metadata: BTreeMap::new(),
        };
        assert_eq!(r.hash().len(), 12);
        assert_eq!(r.hash(), short_md5("https://example.com/docs/guide"));
        assert_eq!(r.filename(), format!("{}.html", r.hash()));
    }

    #[test]
    fn scraped_resource_display_name_falls_back_to_link() {
        let r = ScrapedResource {
            url: "https://example.com/docs/guide".to_string(),
            payload: ResourceContent::Text("hi".to_string()),
            suffix: "html".to_string(),
            source_type: "web".to_string(),
            extra_metadata: BTreeMap::new(),
        };
        let meta = r.metadata().unwrap();
        assert_eq!(meta.display_name, "example.com / docs");
    }

    #[test]
    fn ticket_resource_hash_normalizes_id() {
        let r = TicketResource {
            ticket_id: "CMSCOMPOPS-123 ".to_string(),
            text: "q/a".to_string(),
            source: TicketSource::Jira,
            created_at: None,
            extra_metadata: BTreeMap::new(),
        };
        assert_eq!(r.hash(), "jira_CMSCOMPOPS-123_");
        assert_eq!(r.filename(), format!("{}.txt", r.hash()));
    }

    #[test]
    fn ticket_resource_display_name_fallback_chain() {
        let mut extra = BTreeMap::new();
        extra.insert("url".to_string(), "https://jira/browse/X-1".to_string());
        let r = TicketResource {
            ticket_id: "X-1".to_string(),
            text: String::new(),
            source: TicketSource::Jira,
            created_at: None,
            extra_metadata: extra,
        };
        assert_eq!(r.metadata().unwrap().display_name, "https://jira/browse/X-1");

        let r2 = TicketResource {
            ticket_id: "X-2".to_string(),
            text: String::new(),
            source: TicketSource::Redmine,
            created_at: None,
            extra_metadata: BTreeMap::new(),
        };
        assert_eq!(r2.metadata().unwrap().display_name, "redmine:X-2");
    }

    #[test]
    fn local_file_resource_hash_uses_relative_path() {
        let r = LocalFileResource {
            file_name: "notes.md".to_string(),
            source_path: PathBuf::from("/staging/notes.md"),
            bytes: b"hello".to_vec(),
            base_dir: Some(PathBuf::from("/staging")),
        };
        assert_eq!(r.hash(), short_md5("notes.md"));
        assert_eq!(r.filename(), format!("{}.md", r.hash()));
        let meta = r.metadata().unwrap();
        assert_eq!(meta.extra.get("relative_path").unwrap(), "notes.md");
    }

    #[test]
    fn metadata_rejects_empty_display_name() {
        assert!(ResourceMetadata::new("", vec![]).is_err());
    }
}
