//! Background analysis worker and its JSON message protocol.
//!
//! Requests arrive on an mpsc queue; each one is analyzed on tokio's
//! blocking pool and answered on the response channel with the same `id`.
//! Responses may come back out of order.

use crate::analyzer::Analyzer;
use crate::models::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};

/// Default depth of the request and response queues. Also the number of
/// requests a worker analyzes at once.
pub const QUEUE_DEPTH: usize = 32;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker is no longer accepting requests")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    AnalyzeFile,
    AnalyzePcm,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Compressed file contents (ANALYZE_FILE).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_buffer: Option<Vec<u8>>,
    /// Mono float samples (ANALYZE_PCM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcm_buffer: Option<Vec<f32>>,
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub data: RequestData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisResponse {
    AnalysisComplete { id: String, result: AnalysisResult },
    AnalysisError { id: String, error: String },
}

impl AnalysisResponse {
    pub fn id(&self) -> &str {
        match self {
            Self::AnalysisComplete { id, .. } | Self::AnalysisError { id, .. } => id,
        }
    }
}

/// A request that passed validation.
enum Job {
    File {
        bytes: Vec<u8>,
        filename: String,
    },
    Pcm {
        samples: Vec<f32>,
        sample_rate: u32,
        duration: Option<f64>,
        filename: String,
    },
}

impl Job {
    fn from_request(request: AnalysisRequest) -> Result<Self, String> {
        let data = request.data;
        match request.kind {
            RequestKind::AnalyzeFile => {
                let bytes = data
                    .array_buffer
                    .ok_or("ANALYZE_FILE request without arrayBuffer")?;
                Ok(Job::File {
                    bytes,
                    filename: data.filename,
                })
            }
            RequestKind::AnalyzePcm => {
                let samples = data
                    .pcm_buffer
                    .ok_or("ANALYZE_PCM request without pcmBuffer")?;
                let sample_rate = data
                    .sample_rate
                    .ok_or("ANALYZE_PCM request without sampleRate")?;
                Ok(Job::Pcm {
                    samples,
                    sample_rate,
                    duration: data.duration,
                    filename: data.filename,
                })
            }
        }
    }

    fn run(self, analyzer: &Analyzer) -> AnalysisResult {
        match self {
            Job::File { bytes, filename } => analyzer.analyze_bytes(&bytes, &filename),
            Job::Pcm {
                samples,
                sample_rate,
                duration,
                filename,
            } => analyzer.analyze_pcm(samples, sample_rate, duration, &filename),
        }
    }
}

/// Validate and run one request on the blocking pool.
pub async fn handle_request(analyzer: Arc<Analyzer>, request: AnalysisRequest) -> AnalysisResponse {
    let id = request.id.clone();
    let job = match Job::from_request(request) {
        Ok(job) => job,
        Err(error) => {
            log::warn!("Rejecting request {id}: {error}");
            return AnalysisResponse::AnalysisError { id, error };
        }
    };

    match tokio::task::spawn_blocking(move || job.run(&analyzer)).await {
        Ok(result) => AnalysisResponse::AnalysisComplete { id, result },
        Err(e) => {
            log::error!("Analysis task for request {id} failed: {e}");
            AnalysisResponse::AnalysisError {
                id,
                error: format!("Analysis task failed: {e}"),
            }
        }
    }
}

/// Handle to a running worker. Dropping every handle closes the queue; the
/// worker finishes in-flight requests and then closes the response channel.
#[derive(Clone)]
pub struct AnalysisWorker {
    requests: mpsc::Sender<AnalysisRequest>,
}

impl AnalysisWorker {
    /// Start a worker on the current tokio runtime. At most `queue_depth`
    /// requests are in flight; further requests wait in the queue.
    pub fn spawn(
        analyzer: Arc<Analyzer>,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<AnalysisResponse>) {
        let (req_tx, mut req_rx) = mpsc::channel::<AnalysisRequest>(queue_depth.max(1));
        let (resp_tx, resp_rx) = mpsc::channel(queue_depth.max(1));

        let in_flight = Arc::new(Semaphore::new(queue_depth.max(1)));

        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                log::debug!("Worker received request {}", request.id);
                let Ok(permit) = Arc::clone(&in_flight).acquire_owned().await else {
                    break;
                };
                let analyzer = Arc::clone(&analyzer);
                let responses = resp_tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(analyzer, request).await;
                    if responses.send(response).await.is_err() {
                        log::debug!("Response receiver dropped");
                    }
                    drop(permit);
                });
            }
            log::debug!("Request queue closed, worker exiting");
        });

        (Self { requests: req_tx }, resp_rx)
    }

    pub async fn submit(&self, request: AnalysisRequest) -> Result<(), WorkerError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| WorkerError::Closed)
    }
}

/// Best-effort `id` from a line that failed to parse as a request.
fn salvage_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| match v.get("id")? {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .unwrap_or_default()
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &AnalysisResponse,
) -> Result<(), WorkerError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Speak the protocol as JSON lines: one request per input line, one
/// response per output line. Returns once input is exhausted and every
/// accepted request has been answered.
pub async fn serve_lines<R, W>(
    analyzer: Arc<Analyzer>,
    reader: R,
    writer: &mut W,
) -> Result<(), WorkerError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (worker, mut responses) = AnalysisWorker::spawn(analyzer, QUEUE_DEPTH);
    let mut worker = Some(worker);
    let mut lines = reader.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<AnalysisRequest>(&line) {
                        Ok(request) => {
                            worker.as_ref().ok_or(WorkerError::Closed)?.submit(request).await?;
                        }
                        Err(e) => {
                            log::warn!("Malformed request: {e}");
                            let response = AnalysisResponse::AnalysisError {
                                id: salvage_id(&line),
                                error: format!("Malformed request: {e}"),
                            };
                            write_response(writer, &response).await?;
                        }
                    },
                    None => {
                        input_open = false;
                        worker = None;
                    }
                }
            }
            response = responses.recv() => match response {
                Some(response) => write_response(writer, &response).await?,
                None => break,
            },
        }
    }

    Ok(())
}
