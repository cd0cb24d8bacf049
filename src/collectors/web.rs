//! Web scraping: a breadth-first crawl scoped to a hostname, collecting
//! pages and linked PDFs as [`ScrapedResource`]s.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::OnceLock;

use crate::collectors::{Collector, CollectorReport};
use crate::persistence::PersistenceService;
use crate::resource::{ResourceContent, ScrapedResource};

fn link_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r#"href=["']([^"'#]+)["']"#).unwrap())
}

/// Crawls a set of seed URLs breadth-first, staying within each seed's
/// hostname, and persists every page and linked PDF it encounters.
pub struct WebScraper {
    name: String,
    seed_urls: Vec<String>,
    client: reqwest::Client,
}

impl WebScraper {
    pub fn new(name: impl Into<String>, seed_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            seed_urls,
            client: reqwest::Client::new(),
        }
    }

    fn hostname(url: &str) -> Option<String> {
        url.splitn(2, "://").nth(1)?.split('/').next().map(|s| s.to_string())
    }

    fn extract_links(base_url: &str, body: &str) -> Vec<String> {
        link_pattern()
            .captures_iter(body)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .filter_map(|href| resolve_link(base_url, &href))
            .collect()
    }

    async fn fetch(&self, url: &str) -> Result<(ResourceContent, String)> {
        let mut response = self.client.get(url).send().await?;
        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            // retry once, in case of a transient auth hiccup
            response = self.client.get(url).send().await?;
        }
        response.error_for_status_ref()?;
        let is_pdf = url.to_lowercase().ends_with(".pdf")
            || response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.contains("application/pdf"))
                .unwrap_or(false);
        if is_pdf {
            let bytes = response.bytes().await?;
            Ok((ResourceContent::Bytes(bytes.to_vec()), "pdf".to_string()))
        } else {
            let text = response.text().await?;
            Ok((ResourceContent::Text(text), "html".to_string()))
        }
    }

    pub async fn crawl(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        let mut report = CollectorReport::new(self.name.clone());
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, String)> = self
            .seed_urls
            .iter()
            .filter_map(|u| Self::hostname(u).map(|h| (u.clone(), h)))
            .collect();

        while let Some((url, host)) = queue.pop_front() {
            if !visited.insert(url.clone()) {
                continue;
            }
            let fetched = self.fetch(&url).await;
            let (content, suffix) = match fetched {
                Ok(v) => v,
                Err(e) => {
                    report.failed.push((url.clone(), e.to_string()));
                    continue;
                }
            };

            if suffix == "html" {
                if let ResourceContent::Text(body) = &content {
                    for link in Self::extract_links(&url, body) {
                        if Self::hostname(&link).as_deref() == Some(host.as_str())
                            && !visited.contains(&link)
                        {
                            queue.push_back((link, host.clone()));
                        }
                    }
                }
            }

            let resource = ScrapedResource {
                url: url.clone(),
                payload: content,
                suffix,
                source_type: "web".to_string(),
                extra_metadata: BTreeMap::new(),
            };
            match persistence.persist(&resource, Path::new("web"), true) {
                Ok(_) => report.persisted += 1,
                Err(e) => report.failed.push((url, e.to_string())),
            }
        }

        Ok(report)
    }
}

fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if href.starts_with('/') {
        let scheme_end = base_url.find("://")? + 3;
        let host_end = base_url[scheme_end..]
            .find('/')
            .map(|i| scheme_end + i)
            .unwrap_or(base_url.len());
        return Some(format!("{}{}", &base_url[..host_end], href));
    }
    None
}

#[async_trait]
impl Collector for WebScraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        self.crawl(persistence).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_extracts_authority() {
        assert_eq!(
            WebScraper::hostname("https://example.com/a/b").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn resolve_link_handles_absolute_and_root_relative() {
        assert_eq!(
            resolve_link("https://example.com/x", "https://other.com/y").unwrap(),
            "https://other.com/y"
        );
        assert_eq!(
            resolve_link("https://example.com/x", "/y/z").unwrap(),
            "https://example.com/y/z"
        );
        assert!(resolve_link("https://example.com/x", "mailto:a@b.com").is_none());
    }

    #[test]
    fn extract_links_finds_hrefs() {
        let body = r#"<a href="/docs/guide">g</a><a href="https://external.com">e</a>"#;
        let links = WebScraper::extract_links("https://example.com", body);
        assert_eq!(links.len(), 2);
    }
}
