//! The top-level entry point: owns configuration, the pipeline map, and a
//! connector that materializes a fresh vector collection handle per call.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::pipelines::{BasePipeline, HistoryTurn, PipelineOutput};
use crate::vectorstore::VectorCollection;

/// Materializes a fresh [`VectorCollection`] handle on demand, so pipelines
/// never hold a stale connection across calls.
pub trait VectorstoreConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn VectorCollection>>;
}

/// Owns the active pipeline set and dispatches `invoke`/`update` calls to
/// them, injecting a fresh vectorstore handle before every call.
pub struct A2rchi {
    pipelines: Mutex<HashMap<String, Box<dyn BasePipeline>>>,
    connector: Arc<dyn VectorstoreConnector>,
    active_pipeline: Mutex<String>,
}

impl A2rchi {
    pub fn new(
        pipelines: HashMap<String, Box<dyn BasePipeline>>,
        connector: Arc<dyn VectorstoreConnector>,
        default_pipeline: impl Into<String>,
    ) -> Self {
        Self {
            pipelines: Mutex::new(pipelines),
            connector,
            active_pipeline: Mutex::new(default_pipeline.into()),
        }
    }

    /// Fetch a fresh vectorstore handle, inject it into the active
    /// pipeline, and invoke it with `question`/`history`.
    pub async fn invoke(&self, question: &str, history: &[HistoryTurn]) -> Result<PipelineOutput> {
        let collection = self.connector.connect().context("failed to connect to vectorstore")?;
        let active = self.active_pipeline.lock().await.clone();
        let mut pipelines = self.pipelines.lock().await;
        let pipeline = pipelines
            .get_mut(&active)
            .with_context(|| format!("unknown pipeline '{active}'"))?;
        pipeline.update_retriever(collection);
        pipeline.invoke(question, history).await
    }

    /// Swap the active pipeline by name, or reload pipelines if a config
    /// name is given (left to the caller: this façade only tracks which
    /// already-constructed pipeline is active).
    pub async fn update(&self, pipeline_name: Option<&str>) -> Result<()> {
        if let Some(name) = pipeline_name {
            if !self.pipelines.lock().await.contains_key(name) {
                bail!("cannot activate unknown pipeline '{name}'");
            }
            *self.active_pipeline.lock().await = name.to_string();
        }
        Ok(())
    }

    pub async fn active_pipeline(&self) -> String {
        self.active_pipeline.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoAdapter;
    use crate::pipelines::image::{ImageProcessingPipeline, TextOnlyMultimodalAdapter};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    struct EmptyCollection;
    impl VectorCollection for EmptyCollection {
        fn get_ids(&self) -> Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
        fn add(&self, _: Vec<crate::vectorstore::VectorDocument>) -> Result<()> {
            Ok(())
        }
        fn delete_by_hash(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn count(&self) -> Result<usize> {
            Ok(0)
        }
        fn similarity_search_with_score(&self, _: &[f32], _: usize) -> Result<Vec<crate::vectorstore::ScoredDocument>> {
            Ok(vec![])
        }
        fn get_all_documents(&self) -> Result<Vec<crate::vectorstore::ScoredDocument>> {
            Ok(vec![])
        }
    }

    struct StubConnector;
    impl VectorstoreConnector for StubConnector {
        fn connect(&self) -> Result<Arc<dyn VectorCollection>> {
            Ok(Arc::new(EmptyCollection))
        }
    }

    #[tokio::test]
    async fn invoke_dispatches_to_active_pipeline() {
        let mut pipelines: HashMap<String, Box<dyn BasePipeline>> = HashMap::new();
        pipelines.insert(
            "image".to_string(),
            Box::new(ImageProcessingPipeline::new(Arc::new(TextOnlyMultimodalAdapter::new(Arc::new(EchoAdapter))))),
        );
        let facade = A2rchi::new(pipelines, Arc::new(StubConnector), "image");
        let output = facade.invoke("describe this", &[]).await.unwrap();
        assert!(output.answer.starts_with("echo:"));
    }

    #[tokio::test]
    async fn update_to_unknown_pipeline_errors() {
        let pipelines: HashMap<String, Box<dyn BasePipeline>> = HashMap::new();
        let facade = A2rchi::new(pipelines, Arc::new(StubConnector), "missing");
        assert!(facade.update(Some("nope")).await.is_err());
    }
}
