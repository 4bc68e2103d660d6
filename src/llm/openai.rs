//! OpenAI-compatible streaming chat completions.
//!
//! Works with any server speaking the `/chat/completions` streaming dialect
//! (vLLM, Ollama, OpenAI).

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{CompletionSource, ConversationContext, LlmError, TokenStream, TokenStreamSender};
use crate::types::MessageRole;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest gap between body reads before the upstream is treated as dead
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest SSE line accepted from the upstream
const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct OpenAiSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiSource {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
        })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, context: &ConversationContext) -> ChatRequest {
        let mut messages = Vec::with_capacity(context.turns.len() + 1);

        if let Some(system) = &context.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }

        for turn in &context.turns {
            messages.push(ChatMessage {
                role: match turn.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }

        ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// What one `data:` line carried
#[derive(Debug, PartialEq, Eq)]
enum SseData {
    Text(String),
    Done,
    Empty,
}

fn parse_data_line(line: &str) -> Result<SseData, LlmError> {
    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, event names and keep-alives
        return Ok(SseData::Empty);
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return Ok(SseData::Done);
    }
    if payload.is_empty() {
        return Ok(SseData::Empty);
    }

    let chunk: ChatStreamChunk =
        serde_json::from_str(payload).map_err(|e| LlmError::ParseError(e.to_string()))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map(SseData::Text)
        .unwrap_or(SseData::Empty))
}

/// Splits a byte stream into lines without breaking multi-byte characters
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, LlmError> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            if pos > MAX_LINE_BYTES {
                return Err(Self::too_long());
            }
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }

        if self.buf.len() > MAX_LINE_BYTES {
            return Err(Self::too_long());
        }
        Ok(lines)
    }

    fn too_long() -> LlmError {
        LlmError::ParseError(format!("upstream line exceeds {} bytes", MAX_LINE_BYTES))
    }
}

/// Copies the upstream body into `sender` until it finishes, fails, or the
/// consumer drops the stream. Returning drops the response, which closes the
/// upstream connection.
async fn pump(response: reqwest::Response, sender: TokenStreamSender) {
    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = sender.closed() => {
                debug!("Consumer dropped the completion stream");
                return;
            }
            next = body.next() => next,
        };

        let Some(next) = next else { break };
        let bytes = match next {
            Ok(bytes) => bytes,
            Err(e) => {
                sender.fail(LlmError::NetworkError(e.to_string())).await;
                return;
            }
        };

        let parsed = match lines.push(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                sender.fail(e).await;
                return;
            }
        };

        for line in parsed {
            match parse_data_line(&line) {
                Ok(SseData::Text(text)) => {
                    if sender.send(text).await.is_err() {
                        debug!("Consumer dropped the completion stream");
                        return;
                    }
                }
                Ok(SseData::Done) => return,
                Ok(SseData::Empty) => {}
                Err(e) => {
                    sender.fail(e).await;
                    return;
                }
            }
        }
    }

    // Body ended without [DONE]
    sender
        .fail(LlmError::NetworkError("upstream closed before completion".into()))
        .await;
}

#[async_trait]
impl CompletionSource for OpenAiSource {
    fn id(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, context: &ConversationContext) -> Result<TokenStream, LlmError> {
        let mut request = self
            .client
            .post(self.chat_completions_url())
            .header(header::ACCEPT, "text/event-stream");

        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request
            .json(&self.build_request(context))
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Upstream completion request rejected");
            return Err(LlmError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        let (sender, stream) = TokenStream::channel(32);
        tokio::spawn(pump(response, sender));
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatTurn;
    use uuid::Uuid;

    #[test]
    fn test_parse_data_lines() {
        assert_eq!(
            parse_data_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            SseData::Text("Hel".into())
        );
        assert_eq!(parse_data_line("data: [DONE]").unwrap(), SseData::Done);
        assert_eq!(
            parse_data_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseData::Empty
        );
        assert_eq!(parse_data_line(": keep-alive").unwrap(), SseData::Empty);
        assert!(parse_data_line("data: {not json").is_err());
    }

    #[test]
    fn test_line_buffer_handles_split_utf8() {
        let mut lines = LineBuffer::default();
        let text = "data: café\n".as_bytes();
        let split = text.len() - 3;

        assert!(lines.push(&text[..split]).unwrap().is_empty());
        assert_eq!(
            lines.push(&text[split..]).unwrap(),
            vec!["data: café".to_string()]
        );
    }

    #[test]
    fn test_line_buffer_rejects_unterminated_flood() {
        let mut lines = LineBuffer::default();
        let block = vec![b'x'; 16 * 1024];

        let mut result = Ok(Vec::new());
        for _ in 0..8 {
            result = lines.push(&block);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(LlmError::ParseError(_))));
        assert!(lines.buf.len() <= MAX_LINE_BYTES + block.len());
    }

    #[tokio::test]
    async fn test_dropped_consumer_closes_stalled_upstream() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Sends one delta, then holds the connection open without finishing
        let upstream = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await.unwrap();

            let event = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
            let head = "HTTP/1.1 200 OK\r\n\
                        content-type: text/event-stream\r\n\
                        transfer-encoding: chunked\r\n\r\n";
            let chunk = format!("{:x}\r\n{}\r\n", event.len(), event);
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(chunk.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();

            let closed = async {
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
            };
            tokio::time::timeout(Duration::from_millis(1500), closed)
                .await
                .is_ok()
        });

        let source = OpenAiSource::new(format!("http://{}", addr), "llama", None).unwrap();
        let ctx = ConversationContext::from_history(Uuid::new_v4(), &[]);
        let mut stream = source.open_stream(&ctx).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "Hel");
        drop(stream);

        assert!(
            upstream.await.unwrap(),
            "upstream connection should close once the consumer is gone"
        );
    }

    #[test]
    fn test_request_includes_system_prompt_and_turns() {
        let source = OpenAiSource::new("http://localhost:8000/v1/", "llama", None).unwrap();
        let ctx = ConversationContext {
            session_id: Uuid::new_v4(),
            system_prompt: Some("be kind".into()),
            turns: vec![ChatTurn {
                role: MessageRole::User,
                content: "hello".into(),
            }],
        };

        let request = source.build_request(&ctx);
        assert!(request.stream);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].role, "user");
        assert_eq!(
            source.chat_completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }
}
