//! HTTP client for remote agents
//!
//! A remote agent exposes `POST {url}/invoke` and answers with a server-sent
//! event stream of `chunk`, `response` and `error` messages.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use conclave_core::agent::{AgentMessage, AgentResponse, ContextMap};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::error::AgentError;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    agent: &'a str,
    messages: &'a [AgentMessage],
    context: &'a ContextMap,
    stream: bool,
}

pub struct RemoteAgent {
    name: String,
    url: String,
    client: Client,
    request_timeout: Option<Duration>,
}

impl RemoteAgent {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            // Agents are addressed directly, never through a proxy
            client: Client::builder()
                .no_proxy()
                .build()
                .unwrap_or_else(|_| Client::new()),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
        chunks: Option<mpsc::Sender<String>>,
    ) -> Result<AgentResponse, AgentError> {
        let req = InvokeRequest {
            agent: &self.name,
            messages,
            context,
            stream: chunks.is_some(),
        };

        info!("Invoking remote agent {} at {}/invoke", self.name, self.url);

        let mut builder = self.client.post(format!("{}/invoke", self.url)).json(&req);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let res = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AgentError::timeout(&self.name, self.request_timeout.unwrap_or_default())
            } else {
                AgentError::unavailable(&self.name, format!("Failed to connect: {}", e))
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res.text().await.unwrap_or_default();
            return Err(status_error(&self.name, status, error_text));
        }

        let mut stream = res.bytes_stream();
        let mut frames = FrameBuffer::default();
        let mut streamed = String::new();

        while let Some(item) = stream.next().await {
            let chunk: bytes::Bytes = item.map_err(|e| {
                AgentError::unavailable(&self.name, format!("Stream error: {}", e))
            })?;
            frames.extend(&chunk);

            while let Some(msg) = frames.next_frame() {
                match parse_frame(&self.name, msg.trim())? {
                    Some(Frame::Chunk(text)) => {
                        streamed.push_str(&text);
                        if let Some(tx) = &chunks {
                            if tx.send(text).await.is_err() {
                                debug!("Chunk receiver for {} closed", self.name);
                            }
                        }
                    }
                    Some(Frame::Response(response)) => return Ok(finish(&self.name, response)),
                    None => {}
                }
            }
        }

        // Some agents only stream chunks and close the connection
        if !streamed.is_empty() {
            return Ok(AgentResponse::new(&self.name, streamed));
        }
        Err(AgentError::unavailable(
            &self.name,
            "stream ended without a response",
        ))
    }
}

#[async_trait]
impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
    ) -> Result<AgentResponse, AgentError> {
        self.call(messages, context, None).await
    }

    async fn invoke_streaming(
        &self,
        messages: &[AgentMessage],
        context: &ContextMap,
        chunks: mpsc::Sender<String>,
    ) -> Result<AgentResponse, AgentError> {
        self.call(messages, context, Some(chunks)).await
    }
}

/// Raw body bytes split into `\n\n`-terminated frames. Decoding waits for a
/// whole frame so a character split across network chunks stays intact.
#[derive(Default)]
struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    fn next_frame(&mut self) -> Option<String> {
        let end = self.pending.windows(2).position(|pair| pair == b"\n\n")?;
        let frame = self.pending.split_to(end + 2);
        Some(String::from_utf8_lossy(&frame).into_owned())
    }
}

/// Parsed server-sent event
#[derive(Debug, PartialEq)]
enum Frame {
    Chunk(String),
    Response(AgentResponse),
}

fn parse_frame(agent: &str, msg: &str) -> Result<Option<Frame>, AgentError> {
    let Some(data) = msg.strip_prefix("data:") else {
        return Ok(None);
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(data.trim()) else {
        debug!("Skipping malformed frame from {}", agent);
        return Ok(None);
    };
    match json["type"].as_str() {
        Some("chunk") => Ok(json["content"].as_str().map(|c| Frame::Chunk(c.to_string()))),
        Some("response") => {
            let response = serde_json::from_value::<AgentResponse>(json["response"].clone())
                .map_err(|e| {
                    AgentError::capability(agent, format!("Malformed response: {}", e))
                })?;
            Ok(Some(Frame::Response(response)))
        }
        Some("error") => {
            let message = json["error"].as_str().unwrap_or("Unknown error");
            Err(AgentError::capability(agent, message))
        }
        _ => Ok(None),
    }
}

/// Agents report their own name; the registry name wins
fn finish(agent: &str, mut response: AgentResponse) -> AgentResponse {
    response.agent_name = agent.to_string();
    response
}

fn status_error(agent: &str, status: StatusCode, body: String) -> AgentError {
    let message = if body.is_empty() {
        format!("Agent returned {}", status)
    } else {
        format!("Agent returned {}: {}", status, body)
    };
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AgentError::unavailable(agent, message)
    } else {
        AgentError::capability(agent, message)
    }
}
