//! Analysis of a finished OCR task through the workflow endpoint.
//!
//! Both modes chunk the task's pages, relay the chunk list, and store the
//! accumulated text as the task's [`AnalysisRecord`], replacing any earlier
//! record:
//!
//! - [`AnalysisService::analyze_buffered`] returns one [`AnalysisResponse`].
//! - [`AnalysisService::analyze_stream`] returns a stream of
//!   [`AnalysisEvent`]s, forwarding each fragment as soon as it is decoded.
//!
//! A relay failure replaces the analysis output with a diagnostic string and
//! leaves the stored record untouched. If the consumer of an event stream
//! goes away before the remote stream ends, the relay is abandoned and
//! nothing is stored.

use crate::chunk::chunk_pages;
use crate::config::{NoticeRewrite, PipelineConfig};
use crate::error::OcrFlowError;
use crate::export::{self, ExportedArtifact};
use crate::relay::WorkflowClient;
use crate::store::{AnalysisRecord, TaskStatus, TaskStore};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// One frame of a streamed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// First frame: how the pages were chunked.
    Init { chunks_count: usize, k_pages: usize },
    /// One fragment, in arrival order.
    Content { data: String },
    /// The analysis was exported.
    WordGenerated {
        filename: String,
        download_url: String,
    },
    /// Last frame on success.
    Done,
    /// Last frame on failure.
    Error { error: String },
}

impl AnalysisEvent {
    /// Render as a server-sent-event frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_default()
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisEvent::Done | AnalysisEvent::Error { .. })
    }
}

/// A boxed stream of analysis events.
pub type AnalysisEventStream = Pin<Box<dyn Stream<Item = AnalysisEvent> + Send>>;

/// Buffered analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub chunks_count: usize,
    pub k_pages: usize,
    /// The analysis text, or the diagnostic when `success` is false.
    pub analysis_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ExportedArtifact>,
}

/// Runs analyses against tasks held in a [`TaskStore`].
#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn TaskStore>,
    client: WorkflowClient,
    export_dir: Option<PathBuf>,
    notice_rewrite: Option<NoticeRewrite>,
}

impl AnalysisService {
    pub fn new(store: Arc<dyn TaskStore>, client: WorkflowClient, config: &PipelineConfig) -> Self {
        Self {
            store,
            client,
            export_dir: config.export_dir.clone(),
            notice_rewrite: config.notice_rewrite.clone(),
        }
    }

    /// Chunk a task's pages, checking that it can be analysed.
    pub fn chunks_for(&self, task_id: &str, k: usize) -> Result<Vec<String>, OcrFlowError> {
        if k == 0 {
            return Err(OcrFlowError::InvalidChunkSize { k });
        }

        let status = self.store.task_status(task_id)?;
        if !matches!(status, TaskStatus::Completed | TaskStatus::Cancelled) {
            return Err(OcrFlowError::TaskNotReady {
                task_id: task_id.to_string(),
                status: status.to_string(),
            });
        }

        let pages = self.store.all_pages(task_id)?;
        if pages.is_empty() {
            return Err(OcrFlowError::NoContent {
                task_id: task_id.to_string(),
            });
        }

        let chunks = chunk_pages(&pages, k)?;
        info!(
            "Task {}: {} pages → {} chunk(s) of up to {} pages",
            task_id,
            pages.len(),
            chunks.len(),
            k
        );
        Ok(chunks)
    }

    /// Analyse a task and wait for the full response.
    pub async fn analyze_buffered(
        &self,
        task_id: &str,
        k: usize,
    ) -> Result<AnalysisResponse, OcrFlowError> {
        let chunks = self.chunks_for(task_id, k)?;
        let chunks_count = chunks.len();

        match self.client.buffered(&chunks).await {
            Ok(text) => {
                let record = self.persist(task_id, text, chunks_count, k).await?;
                Ok(AnalysisResponse {
                    success: true,
                    chunks_count,
                    k_pages: k,
                    analysis_result: record.text,
                    artifact: record.artifact,
                })
            }
            Err(e) => {
                warn!("Task {}: analysis failed: {}", task_id, e);
                Ok(AnalysisResponse {
                    success: false,
                    chunks_count,
                    k_pages: k,
                    analysis_result: e.diagnostic(),
                    artifact: None,
                })
            }
        }
    }

    /// Analyse a task, streaming events as fragments arrive.
    ///
    /// Input errors are returned before the stream starts. The stream
    /// always starts with `init` and ends with `done` or `error`.
    pub fn analyze_stream(
        &self,
        task_id: &str,
        k: usize,
    ) -> Result<AnalysisEventStream, OcrFlowError> {
        let chunks = self.chunks_for(task_id, k)?;
        let (tx, rx) = mpsc::channel(32);

        let service = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let chunks_count = chunks.len();
            let relayed = tokio::select! {
                _ = tx.closed() => {
                    info!("Task {}: analysis stream abandoned by caller", task_id);
                    None
                }
                text = service.relay_fragments(&task_id, k, &chunks, &tx) => text,
            };
            let Some(text) = relayed else {
                return;
            };
            if tx.is_closed() {
                info!("Task {}: analysis stream abandoned by caller", task_id);
                return;
            }
            service.finish_stream(&task_id, text, chunks_count, k, &tx).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Forward fragments until the remote stream ends. Returns the raw
    /// accumulated text, or `None` if the relay failed or the caller left.
    async fn relay_fragments(
        &self,
        task_id: &str,
        k: usize,
        chunks: &[String],
        tx: &mpsc::Sender<AnalysisEvent>,
    ) -> Option<String> {
        let init = AnalysisEvent::Init {
            chunks_count: chunks.len(),
            k_pages: k,
        };
        tx.send(init).await.ok()?;

        let mut fragments = match self.client.stream(chunks).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Task {}: analysis failed: {}", task_id, e);
                let _ = tx.send(AnalysisEvent::Error { error: e.diagnostic() }).await;
                return None;
            }
        };

        let mut accumulated = String::new();
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    let data = match &self.notice_rewrite {
                        Some(rule) => rule.apply(&fragment),
                        None => fragment.clone(),
                    };
                    accumulated.push_str(&fragment);
                    if tx.send(AnalysisEvent::Content { data }).await.is_err() {
                        debug!("Task {}: stream consumer gone", task_id);
                        return None;
                    }
                }
                Err(e) => {
                    warn!("Task {}: analysis stream broke: {}", task_id, e);
                    let _ = tx.send(AnalysisEvent::Error { error: e.diagnostic() }).await;
                    return None;
                }
            }
        }
        Some(accumulated)
    }

    /// Persist a fully relayed analysis and send the closing frames.
    ///
    /// Runs to completion even if the caller leaves meanwhile, so an export
    /// is never cut off between its write and its rename.
    async fn finish_stream(
        &self,
        task_id: &str,
        text: String,
        chunks_count: usize,
        k: usize,
        tx: &mpsc::Sender<AnalysisEvent>,
    ) {
        match self.persist(task_id, text, chunks_count, k).await {
            Ok(record) => {
                if let Some(artifact) = record.artifact {
                    let _ = tx
                        .send(AnalysisEvent::WordGenerated {
                            filename: artifact.filename,
                            download_url: artifact.download_url,
                        })
                        .await;
                }
                let _ = tx.send(AnalysisEvent::Done).await;
            }
            Err(e) => {
                let _ = tx.send(AnalysisEvent::Error { error: e.to_string() }).await;
            }
        }
    }

    /// Export (when configured) and store the record for a finished analysis.
    async fn persist(
        &self,
        task_id: &str,
        text: String,
        chunks_count: usize,
        k: usize,
    ) -> Result<AnalysisRecord, OcrFlowError> {
        let artifact = match &self.export_dir {
            Some(dir) => match export::write_analysis(dir, task_id, &text).await {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!("Task {}: export failed: {}", task_id, e);
                    None
                }
            },
            None => None,
        };

        let record = AnalysisRecord {
            text,
            chunks_count,
            k_pages: k,
            created_at: Utc::now(),
            artifact,
        };
        self.store.set_analysis_record(task_id, record.clone())?;
        info!(
            "Task {}: analysis stored ({} chars)",
            task_id,
            record.text.len()
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowEndpoint;
    use crate::store::{FileResult, InMemoryTaskStore, PageResult};

    fn service(store: Arc<dyn TaskStore>) -> AnalysisService {
        let client = WorkflowClient::new(
            WorkflowEndpoint::new("t", "f").with_url("http://127.0.0.1:9/unused"),
        )
        .unwrap();
        AnalysisService::new(store, client, &PipelineConfig::default())
    }

    #[test]
    fn event_frames_are_tagged() {
        let frame = AnalysisEvent::Content { data: "A".into() }.to_sse_frame();
        assert_eq!(frame, "data: {\"type\":\"content\",\"data\":\"A\"}\n\n");
        assert_eq!(
            AnalysisEvent::Done.to_sse_frame(),
            "data: {\"type\":\"done\"}\n\n"
        );
        let init = serde_json::to_value(AnalysisEvent::Init {
            chunks_count: 2,
            k_pages: 5,
        })
        .unwrap();
        assert_eq!(init["type"], "init");
        assert_eq!(init["chunks_count"], 2);
        let word = serde_json::to_value(AnalysisEvent::WordGenerated {
            filename: "a.md".into(),
            download_url: "/download/a.md".into(),
        })
        .unwrap();
        assert_eq!(word["type"], "word_generated");
    }

    #[test]
    fn unknown_task_and_zero_k_are_input_errors() {
        let svc = service(Arc::new(InMemoryTaskStore::new()));
        assert!(matches!(
            svc.chunks_for("missing", 5),
            Err(OcrFlowError::UnknownTask { .. })
        ));
        assert!(matches!(
            svc.chunks_for("missing", 0),
            Err(OcrFlowError::InvalidChunkSize { k: 0 })
        ));
    }

    #[test]
    fn processing_task_is_not_ready() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.create("t", 1).unwrap();
        let svc = service(store);
        match svc.chunks_for("t", 2) {
            Err(OcrFlowError::TaskNotReady { status, .. }) => assert_eq!(status, "processing"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn completed_task_without_pages_has_no_content() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.create("t", 1).unwrap();
        store
            .append_file_result("t", FileResult::error("bad.pdf", "unreadable"))
            .unwrap();
        store.mark_completed("t").unwrap();
        let svc = service(store);
        assert!(matches!(
            svc.chunks_for("t", 2),
            Err(OcrFlowError::NoContent { .. })
        ));
    }

    #[test]
    fn chunks_follow_page_order() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.create("t", 1).unwrap();
        let pages = (1..=3)
            .map(|n| PageResult::recognized("doc", n, Some(format!("p{n}"))))
            .collect();
        store
            .append_file_result("t", FileResult::pages("doc.pdf", pages))
            .unwrap();
        store.mark_completed("t").unwrap();

        let chunks = service(store).chunks_for("t", 2).unwrap();
        assert_eq!(
            chunks,
            vec![
                "==== doc page 1 ====\np1\n\n==== doc page 2 ====\np2".to_string(),
                "==== doc page 3 ====\np3".to_string(),
            ]
        );
    }
}
