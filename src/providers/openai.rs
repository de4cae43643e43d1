use async_trait::async_trait;
use reqwest::Client;

use crate::core::config::ApiKey;
use crate::core::error::ProviderError;
use crate::core::message::{ChatMessage, TokenUsage};
use crate::core::model::ModelId;
use crate::core::provider::*;

const DEFAULT_MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

pub struct OpenAiProvider {
    client: Client,
    api_key: ApiKey,
    model: ModelId,
    base_url: String,
    max_tokens: Option<u64>,
    max_attempts: u32,
    initial_backoff_ms: u64,
}

impl OpenAiProvider {
    pub fn new(api_key: ApiKey, model: ModelId, base_url: String, max_tokens: Option<u64>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tokens,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
        }
    }

    /// Override how often a rate-limited request is retried before giving up.
    pub fn with_retry(mut self, max_attempts: u32, initial_backoff_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub(crate) fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let wire: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model.0,
            "messages": wire,
            "stream": true,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }

    pub(crate) fn backoff_ms(&self, attempt: u32) -> u64 {
        let base = 2u64
            .checked_pow(attempt.saturating_sub(1))
            .map_or(u64::MAX, |factor| self.initial_backoff_ms.saturating_mul(factor));
        let capped = base.min(MAX_BACKOFF_MS);
        // 0-25% jitter
        let jitter = (capped as f64 * 0.25 * rand_f64()) as u64;
        capped + jitter
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn stream_response(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ProviderEventStream, ProviderError> {
        let body = self.request_body(messages);
        let url = self.endpoint();

        let mut last_err = ProviderError::Http("no attempts made".into());
        let mut wait_ms = 0;
        let mut resp_ok = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                tracing::warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    wait_ms,
                    "completion request failed, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
            }

            tracing::debug!(%url, model = %self.model, messages = messages.len(), "opening completion stream");
            let resp = match self
                .client
                .post(&url)
                .bearer_auth(self.api_key.expose())
                .header("Accept", "text/event-stream")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = ProviderError::Http(e.to_string());
                    wait_ms = self.backoff_ms(attempt + 1);
                    continue;
                }
            };

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                resp_ok = Some(resp);
                break;
            }

            let retry_after = retry_after_ms(resp.headers());

            let text = resp.text().await.unwrap_or_default();
            if status == 429 || status == 502 || status == 503 {
                wait_ms = retry_after.unwrap_or_else(|| self.backoff_ms(attempt + 1));
                last_err = ProviderError::RateLimited {
                    retry_after_ms: wait_ms,
                };
                continue;
            }
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let resp = resp_ok.ok_or(last_err)?;
        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            use tokio_stream::StreamExt;

            let mut byte_stream = Box::pin(byte_stream);
            let mut buffer = LineBuffer::default();
            let mut finished = false;
            let mut usage = TokenUsage::default();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield ProviderEvent::Error {
                            error: ProviderError::Stream(e.to_string()),
                        };
                        return;
                    }
                };

                buffer.extend(&chunk);

                while let Some(line) = buffer.next_line() {
                    let line = match line {
                        Ok(l) => l,
                        Err(error) => {
                            yield ProviderEvent::Error { error };
                            return;
                        }
                    };

                    let data = match line.strip_prefix("data:") {
                        Some(d) => d.trim(),
                        None => continue,
                    };

                    if data == "[DONE]" {
                        yield ProviderEvent::Complete { usage };
                        return;
                    }

                    match parse_chunk(data) {
                        Ok(parsed) => {
                            if let Some(u) = parsed.usage {
                                usage = u;
                            }
                            finished |= parsed.finished;
                            for text in parsed.deltas {
                                yield ProviderEvent::ContentDelta { text };
                            }
                        }
                        Err(error) => {
                            yield ProviderEvent::Error { error };
                            return;
                        }
                    }
                }
            }

            if finished {
                yield ProviderEvent::Complete { usage };
            } else {
                yield ProviderEvent::Error {
                    error: ProviderError::Stream("stream ended before completion".into()),
                };
            }
        };

        Ok(Box::pin(stream))
    }

    fn model(&self) -> &ModelId {
        &self.model
    }
}

/// `Retry-After` in milliseconds; only the delta-seconds form is understood.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.saturating_mul(1000))
}

/// Raw response bytes split into lines. A line is decoded only once its
/// newline has arrived, so a character cut by a chunk boundary stays intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line, trimmed, or `None` until more bytes arrive.
    pub fn next_line(&mut self) -> Option<Result<String, ProviderError>> {
        let end = self.bytes.iter().position(|b| *b == b'\n')?;
        let raw: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(
            std::str::from_utf8(&raw[..end])
                .map(|line| line.trim().to_string())
                .map_err(|e| ProviderError::Stream(format!("invalid utf-8 in stream: {e}"))),
        )
    }
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ParsedChunk {
    pub deltas: Vec<String>,
    pub finished: bool,
    pub usage: Option<TokenUsage>,
}

/// Parse the JSON payload of one `data:` line.
pub(crate) fn parse_chunk(data: &str) -> Result<ParsedChunk, ProviderError> {
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ProviderError::Stream(format!("malformed chunk: {e}")))?;

    if let Some(err) = json.get("error") {
        let message = err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(ProviderError::Stream(message));
    }

    let mut parsed = ParsedChunk::default();

    if let Some(choices) = json["choices"].as_array() {
        for choice in choices {
            if let Some(text) = choice["delta"]["content"].as_str() {
                if !text.is_empty() {
                    parsed.deltas.push(text.to_string());
                }
            }
            if choice["finish_reason"].as_str().is_some() {
                parsed.finished = true;
            }
        }
    }

    if let Some(u) = json.get("usage").filter(|u| u.is_object()) {
        parsed.usage = Some(TokenUsage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0),
        });
    }

    Ok(parsed)
}

/// Cheap pseudo-random float in [0, 1) for backoff jitter
fn rand_f64() -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (seed as f64 % 1000.0) / 1000.0
}
