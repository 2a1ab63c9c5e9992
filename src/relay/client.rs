//! HTTP client for the analysis workflow endpoint.

use crate::config::WorkflowEndpoint;
use crate::error::{OcrFlowError, RelayError};
use crate::pipeline::sign;
use crate::relay::sse::{delta_content, SseDecoder, SseFrame};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Content fragments in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

/// Sends chunk lists to the workflow endpoint.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    http: reqwest::Client,
    endpoint: WorkflowEndpoint,
}

impl WorkflowClient {
    pub fn new(endpoint: WorkflowEndpoint) -> Result<Self, OcrFlowError> {
        sign::parse_endpoint(&endpoint.url)?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.connect_timeout_secs))
            .build()
            .map_err(|e| OcrFlowError::InvalidConfig(format!("workflow HTTP client: {e}")))?;

        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &WorkflowEndpoint {
        &self.endpoint
    }

    /// The JSON request body carrying the full chunk list.
    pub fn request_body(&self, chunks: &[String]) -> Value {
        json!({
            "flow_id": self.endpoint.flow_id,
            "uid": self.endpoint.uid,
            "parameters": {
                "AGENT_USER_INPUT": self.endpoint.user_input,
                "pdf_list": chunks,
            },
            "ext": {
                "bot_id": self.endpoint.bot_id,
                "caller": self.endpoint.caller,
            },
            "stream": self.endpoint.stream,
        })
    }

    async fn send(&self, chunks: &[String]) -> Result<reqwest::Response, RelayError> {
        info!(
            "Sending {} chunk(s) to workflow {} (stream: {})",
            chunks.len(),
            self.endpoint.flow_id,
            self.endpoint.stream
        );

        let response = self
            .http
            .post(&self.endpoint.url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .bearer_auth(&self.endpoint.bearer_token)
            .json(&self.request_body(chunks))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Send `chunks` and yield content fragments as they arrive.
    pub async fn stream(&self, chunks: &[String]) -> Result<FragmentStream, RelayError> {
        let response = self.send(chunks).await?;

        if self.endpoint.stream {
            return Ok(decode_fragments(response.bytes_stream()));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(e.to_string()))?;
        let content = json
            .pointer("/choices/0/message/content")
            .or_else(|| json.pointer("/choices/0/delta/content"))
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Decode("response carries no choices[0] content".into()))?
            .to_string();
        Ok(Box::pin(stream::once(async move { Ok(content) })))
    }

    /// Send `chunks` and collect the whole response into one string.
    pub async fn buffered(&self, chunks: &[String]) -> Result<String, RelayError> {
        let mut fragments = self.stream(chunks).await?;
        let mut out = String::new();
        while let Some(fragment) = fragments.next().await {
            out.push_str(&fragment?);
        }
        debug!("Workflow response complete: {} chars", out.len());
        Ok(out)
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

impl<S> DecodeState<S> {
    fn enqueue(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            if self.done {
                break;
            }
            match frame {
                SseFrame::Data(payload) => match delta_content(&payload) {
                    Some(content) if !content.is_empty() => self.pending.push_back(content),
                    Some(_) => {}
                    None => trace!("Skipping data frame without delta content"),
                },
                SseFrame::Done => self.done = true,
                SseFrame::Other(line) => trace!("Ignoring non-data line: {}", line),
            }
        }
    }
}

/// Turn a raw SSE body into a stream of `choices[0].delta.content`
/// fragments.
///
/// Non-`data:` lines and payloads that fail to parse are skipped. The first
/// transport error ends the stream.
pub fn decode_fragments<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
    RelayError: From<E>,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let frames = st.decoder.push(bytes.as_ref());
                    st.enqueue(frames);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(RelayError::from(e)), st));
                }
                None => {
                    let tail = st.decoder.finish();
                    st.enqueue(tail);
                    st.done = true;
                }
            }
        }
    }))
}
