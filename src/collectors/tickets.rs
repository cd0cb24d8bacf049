//! Ticket collectors: Jira and Redmine clients, both producing
//! [`TicketResource`]s keyed by `{source}_{normalized_id}`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::collectors::{Anonymizer, Collector, CollectorReport, NoopAnonymizer};
use crate::config::resolve_secret;
use crate::persistence::PersistenceService;
use crate::resource::{TicketResource, TicketSource};

/// A single question/answer ticket pulled from a tracker, prior to being
/// wrapped into a [`TicketResource`].
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub id: String,
    pub text: String,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    summary: String,
    #[serde(default)]
    description: Option<String>,
}

pub struct JiraClient {
    base_url: String,
    projects: Vec<String>,
    token: String,
    client: reqwest::Client,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, projects: Vec<String>) -> Self {
        Self {
            base_url: base_url.into(),
            projects,
            token: resolve_secret("JIRA_TOKEN"),
            client: reqwest::Client::new(),
        }
    }

    pub async fn fetch_tickets(&self) -> Result<Vec<TicketRecord>> {
        if self.token.is_empty() {
            anyhow::bail!("JIRA_TOKEN_FILE not configured");
        }
        let jql = format!("project in ({})", self.projects.join(","));
        let url = format!("{}/rest/api/2/search", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("jql", jql.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<JiraSearchResponse>()
            .await?;

        Ok(response
            .issues
            .into_iter()
            .map(|issue| TicketRecord {
                url: Some(format!("{}/browse/{}", self.base_url.trim_end_matches('/'), issue.key)),
                id: issue.key,
                text: format!(
                    "{}\n\n{}",
                    issue.fields.summary,
                    issue.fields.description.unwrap_or_default()
                ),
            })
            .collect())
    }
}

pub struct RedmineClient {
    base_url: String,
    project: String,
    answer_tag: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RedmineIssuesResponse {
    issues: Vec<RedmineIssue>,
}

#[derive(Debug, Deserialize)]
struct RedmineIssue {
    id: u64,
    subject: String,
    #[serde(default)]
    description: Option<String>,
}

impl RedmineClient {
    pub fn new(base_url: impl Into<String>, project: impl Into<String>, answer_tag: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            project: project.into(),
            answer_tag: answer_tag.into(),
            token: resolve_secret("REDMINE_TOKEN"),
            client: reqwest::Client::new(),
        }
    }

    /// Only issues whose description contains `answer_tag` are treated as
    /// having a community-provided answer worth indexing.
    pub async fn fetch_tickets(&self) -> Result<Vec<TicketRecord>> {
        if self.token.is_empty() {
            anyhow::bail!("REDMINE_TOKEN_FILE not configured");
        }
        let url = format!("{}/projects/{}/issues.json", self.base_url.trim_end_matches('/'), self.project);
        let response = self
            .client
            .get(&url)
            .header("X-Redmine-API-Key", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json::<RedmineIssuesResponse>()
            .await?;

        Ok(response
            .issues
            .into_iter()
            .filter(|issue| {
                issue
                    .description
                    .as_deref()
                    .map(|d| d.contains(&self.answer_tag))
                    .unwrap_or(false)
            })
            .map(|issue| TicketRecord {
                url: Some(format!("{}/issues/{}", self.base_url.trim_end_matches('/'), issue.id)),
                id: issue.id.to_string(),
                text: format!("{}\n\n{}", issue.subject, issue.description.unwrap_or_default()),
            })
            .collect())
    }
}

enum TrackerClient {
    Jira(JiraClient),
    Redmine(RedmineClient),
}

/// Drives a single tracker client, anonymizing and persisting each ticket
/// it returns as a [`TicketResource`].
pub struct TicketManager {
    name: String,
    source: TicketSource,
    client: TrackerClient,
    anonymizer: Box<dyn Anonymizer>,
}

impl TicketManager {
    pub fn jira(name: impl Into<String>, client: JiraClient, anonymize: bool) -> Self {
        Self {
            name: name.into(),
            source: TicketSource::Jira,
            client: TrackerClient::Jira(client),
            anonymizer: anonymizer_for(anonymize),
        }
    }

    pub fn redmine(name: impl Into<String>, client: RedmineClient) -> Self {
        Self {
            name: name.into(),
            source: TicketSource::Redmine,
            client: TrackerClient::Redmine(client),
            anonymizer: anonymizer_for(false),
        }
    }
}

fn anonymizer_for(anonymize: bool) -> Box<dyn Anonymizer> {
    if anonymize {
        Box::new(EmailRedactingAnonymizer)
    } else {
        Box::new(NoopAnonymizer)
    }
}

struct EmailRedactingAnonymizer;

impl Anonymizer for EmailRedactingAnonymizer {
    fn anonymize(&self, text: &str) -> String {
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        let re = RE.get_or_init(|| regex::Regex::new(r"[\w.+-]+@[\w-]+\.[\w.-]+").unwrap());
        re.replace_all(text, "[redacted-email]").to_string()
    }
}

#[async_trait]
impl Collector for TicketManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        let mut report = CollectorReport::new(self.name.clone());
        let records = match &self.client {
            TrackerClient::Jira(c) => c.fetch_tickets().await,
            TrackerClient::Redmine(c) => c.fetch_tickets().await,
        };
        let records = match records {
            Ok(r) => r,
            Err(e) => {
                report.failed.push(("*".to_string(), e.to_string()));
                return Ok(report);
            }
        };

        for record in records {
            let mut extra = BTreeMap::new();
            if let Some(url) = &record.url {
                extra.insert("url".to_string(), url.clone());
            }
            let resource = TicketResource {
                ticket_id: record.id.clone(),
                text: self.anonymizer.anonymize(&record.text),
                source: self.source,
                created_at: None,
                extra_metadata: extra,
            };
            match persistence.persist(&resource, Path::new("tickets"), true) {
                Ok(_) => report.persisted += 1,
                Err(e) => report.failed.push((record.id, e.to_string())),
            }
        }

        Ok(report)
    }
}
