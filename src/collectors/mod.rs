//! Collectors: pure producers of [`Resource`] instances. A collector never
//! touches `index.yaml` directly — it hands resources to a
//! [`PersistenceService`] and returns a report of what it found.

pub mod git;
pub mod localfile;
pub mod sso;
pub mod tickets;
pub mod web;

use anyhow::Result;
use async_trait::async_trait;

use crate::persistence::PersistenceService;

/// Summary of a single collection run, returned to the scheduler / CLI for
/// logging. Partial failures (one bad URL, one unreachable ticket) are
/// recorded here rather than aborting the whole run.
#[derive(Debug, Default)]
pub struct CollectorReport {
    pub collector: String,
    pub persisted: usize,
    pub failed: Vec<(String, String)>,
}

impl CollectorReport {
    pub fn new(collector: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            persisted: 0,
            failed: Vec::new(),
        }
    }
}

/// Implemented by every source type (web, git, SSO, tickets, local files).
/// Generalizes the single `scan` entry point into one that also knows how
/// to persist what it finds, since collectors differ widely in how many
/// resources they produce per remote call.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self, persistence: &PersistenceService) -> Result<CollectorReport>;
}

/// Redacts or removes free-text content before it is persisted. The
/// default is a no-op; ticket collectors wire a real implementation when
/// `anonymize` is set.
pub trait Anonymizer: Send + Sync {
    fn anonymize(&self, text: &str) -> String;
}

pub struct NoopAnonymizer;

impl Anonymizer for NoopAnonymizer {
    fn anonymize(&self, text: &str) -> String {
        text.to_string()
    }
}
