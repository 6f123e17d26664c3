use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::OllamaSettings;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// HTTP client for the Ollama generation API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Sampling options forwarded verbatim under `options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// A prompt plus the knobs for one generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Overrides the client's default model.
    pub model: Option<String>,
    pub system: Option<String>,
    pub options: GenerationOptions,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.num_predict = Some(max_tokens);
        self
    }
}

/// Completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub model: String,
    pub response_time: Duration,
    pub tokens_used: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Entry returned by `/api/tags`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl OllamaClient {
    pub fn new(settings: &OllamaSettings) -> Result<Self> {
        settings.validate()?;
        let http = Client::builder()
            .user_agent(concat!("rfi-scanner/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            http,
            base_url: settings.base_url().to_string(),
            model: settings.model.clone(),
            max_retries: settings.max_retries,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Base delay between generation attempts; attempt `n` waits `n * backoff`.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// True when `/api/tags` answers with a success status.
    pub async fn check_connection(&self) -> bool {
        match self.http.get(self.endpoint("/api/tags")).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "Ollama connection check failed");
                false
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .http
            .get(self.endpoint("/api/tags"))
            .send()
            .await
            .context("failed to call Ollama tags API")?;
        let tags: TagsResponse = ensure_success(response, "tags")
            .await?
            .json()
            .await
            .context("failed to parse Ollama tags response")?;
        Ok(tags.models)
    }

    /// Non-streaming generation with linear backoff between attempts.
    #[instrument(name = "ollama_generate", skip_all, fields(prompt_len = request.prompt.len()))]
    pub async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let started = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = GenerateBody::new(request, model, false);
        let attempts = self.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.generate_once(&body).await {
                Ok(chunk) => {
                    return Ok(Generation {
                        content: chunk.response,
                        model: chunk.model.unwrap_or_else(|| model.to_string()),
                        response_time: started.elapsed(),
                        tokens_used: chunk.eval_count,
                    });
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(attempt = attempt + 1, error = %message, "generation attempt failed");
                    last_error = Some(err);
                    if attempt + 1 < attempts {
                        sleep(self.retry_backoff * (attempt + 1)).await;
                    }
                }
            }
        }

        let err = last_error.unwrap_or_else(|| anyhow!("no generation attempts were made"));
        Err(err.context(format!("all {attempts} generation attempt(s) failed")))
    }

    async fn generate_once(&self, body: &GenerateBody<'_>) -> Result<GenerateChunk> {
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(body)
            .send()
            .await
            .context("failed to call Ollama generate API")?;
        let chunk: GenerateChunk = ensure_success(response, "generate")
            .await?
            .json()
            .await
            .context("failed to parse Ollama generate response")?;
        if let Some(error) = chunk.error {
            bail!("Ollama generate error: {error}");
        }
        Ok(chunk)
    }

    /// Streaming generation. `on_chunk` sees each fragment as it arrives; the
    /// concatenated text is returned once the server reports `done`.
    #[instrument(name = "ollama_generate_stream", skip_all, fields(prompt_len = request.prompt.len()))]
    pub async fn generate_stream<F>(&self, request: &GenerateRequest, mut on_chunk: F) -> Result<Generation>
    where
        F: FnMut(&str) + Send,
    {
        let started = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = GenerateBody::new(request, model, true);
        let response = self
            .http
            .post(self.endpoint("/api/generate"))
            .json(&body)
            .send()
            .await
            .context("failed to call Ollama generate API")?;
        let response = ensure_success(response, "generate").await?;

        let mut decoder = NdjsonDecoder::default();
        let mut stream = response.bytes_stream();
        let mut content = String::new();
        let mut last: Option<GenerateChunk> = None;

        'read: while let Some(bytes) = stream.next().await {
            let bytes = bytes.context("failed to read Ollama streaming response")?;
            for chunk in decoder.push(&bytes)? {
                let done = absorb_chunk(chunk, &mut content, &mut last, &mut on_chunk)?;
                if done {
                    break 'read;
                }
            }
        }
        if !last.as_ref().is_some_and(|c| c.done) {
            if let Some(chunk) = decoder.finish()? {
                absorb_chunk(chunk, &mut content, &mut last, &mut on_chunk)?;
            }
        }

        let last = last.ok_or_else(|| anyhow!("Ollama streaming response was empty"))?;
        if !last.done {
            bail!("Ollama stream ended before completion");
        }
        Ok(Generation {
            content,
            model: last.model.unwrap_or_else(|| model.to_string()),
            response_time: started.elapsed(),
            tokens_used: last.eval_count,
        })
    }

    /// Single non-streaming chat round.
    pub async fn chat(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<Generation> {
        let started = Instant::now();
        let body = ChatBody {
            model: &self.model,
            messages,
            stream: false,
            options,
        };
        let response = self
            .http
            .post(self.endpoint("/api/chat"))
            .json(&body)
            .send()
            .await
            .context("failed to call Ollama chat API")?;
        let reply: ChatResponse = ensure_success(response, "chat")
            .await?
            .json()
            .await
            .context("failed to parse Ollama chat response")?;
        let message = reply
            .message
            .ok_or_else(|| anyhow!("Ollama chat response missing message"))?;
        Ok(Generation {
            content: message.content,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            response_time: started.elapsed(),
            tokens_used: reply.eval_count,
        })
    }

    pub async fn embeddings(&self, prompt: &str) -> Result<Vec<f64>> {
        let response = self
            .http
            .post(self.endpoint("/api/embeddings"))
            .json(&serde_json::json!({ "model": self.model, "prompt": prompt }))
            .send()
            .await
            .context("failed to call Ollama embeddings API")?;
        let reply: EmbeddingsResponse = ensure_success(response, "embeddings")
            .await?
            .json()
            .await
            .context("failed to parse Ollama embeddings response")?;
        if reply.embedding.is_empty() {
            bail!("Ollama returned an empty embedding");
        }
        Ok(reply.embedding)
    }

    /// Download a model and wait for the server to report completion.
    pub async fn pull_model(&self, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint("/api/pull"))
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await
            .with_context(|| format!("failed to call Ollama pull API for {name}"))?;
        let status: PullResponse = ensure_success(response, "pull")
            .await?
            .json()
            .await
            .context("failed to parse Ollama pull response")?;
        if let Some(error) = status.error {
            bail!("Ollama failed to pull {name}: {error}");
        }
        debug!(model = name, status = %status.status, "model pulled");
        Ok(())
    }
}

async fn ensure_success(response: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    bail!("Ollama {api} API error ({status}): {body}")
}

fn absorb_chunk<F: FnMut(&str)>(
    chunk: GenerateChunk,
    content: &mut String,
    last: &mut Option<GenerateChunk>,
    on_chunk: &mut F,
) -> Result<bool> {
    if let Some(error) = &chunk.error {
        bail!("Ollama stream error: {error}");
    }
    if !chunk.response.is_empty() {
        on_chunk(&chunk.response);
        content.push_str(&chunk.response);
    }
    let done = chunk.done;
    *last = Some(chunk);
    Ok(done)
}

/// Splits a byte stream into newline-delimited JSON objects, buffering partial lines.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<GenerateChunk>> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(chunk) = parse_line(&line)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    /// Parse whatever remains after the stream closes without a trailing newline.
    fn finish(&mut self) -> Result<Option<GenerateChunk>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Result<Option<GenerateChunk>> {
    let text = std::str::from_utf8(line).context("Ollama stream contained invalid UTF-8")?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let chunk = serde_json::from_str(text)
        .with_context(|| format!("invalid JSON line in Ollama stream: {text}"))?;
    Ok(Some(chunk))
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    options: &'a GenerationOptions,
}

impl<'a> GenerateBody<'a> {
    fn new(request: &'a GenerateRequest, model: &'a str, stream: bool) -> Self {
        Self {
            model,
            prompt: &request.prompt,
            stream,
            system: request.system.as_deref(),
            options: &request.options,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f64>,
}

#[derive(Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}
