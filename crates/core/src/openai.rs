use crate::completion::{CompletionModel, CompletionRequest};
use crate::config::OpenAiConfig;
use crate::embeddings::Embedder;
use crate::error::ClientError;
use crate::models::EMBEDDING_DIMENSIONS;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
    encoding_format: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatChoiceMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("content-type", "application/json");
        match &self.config.api_key {
            Some(api_key) => request.bearer_auth(api_key),
            None => request,
        }
    }

    pub async fn request_embedding(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        let endpoint = self.config.endpoint("embeddings")?;
        let payload = EmbeddingRequest {
            input: text,
            model: &self.config.embedding_model,
            encoding_format: "float",
        };

        let response = self
            .authorized(self.client.post(endpoint.clone()))
            .timeout(self.config.embedding_timeout)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| ClientError::Malformed {
                endpoint: endpoint.to_string(),
                details: "response has no embedding".to_string(),
            })
    }

    pub async fn request_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<String, ClientError> {
        let endpoint = self.config.endpoint("chat/completions")?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatCompletionBody {
            model: &self.config.completion_model,
            messages,
            max_completion_tokens: Some(request.max_completion_tokens),
        };

        let response = self
            .authorized(self.client.post(endpoint.clone()))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        first_choice_content(parsed).ok_or_else(|| ClientError::Malformed {
            endpoint: endpoint.to_string(),
            details: "response has no content".to_string(),
        })
    }
}

fn first_choice_content(response: ChatCompletionResponse) -> Option<String> {
    let choice = response.choices.into_iter().next()?;
    choice
        .message
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .or_else(|| choice.text.filter(|text| !text.trim().is_empty()))
}

#[async_trait]
impl Embedder for OpenAiClient {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.request_embedding(text).await {
            Ok(embedding) if embedding.len() == EMBEDDING_DIMENSIONS => {
                debug!(dimensions = embedding.len(), "embedding obtained");
                Some(embedding)
            }
            Ok(embedding) => {
                warn!(
                    expected = EMBEDDING_DIMENSIONS,
                    actual = embedding.len(),
                    "embedding has unexpected dimensionality"
                );
                None
            }
            Err(error) => {
                warn!(%error, "failed to get embedding");
                None
            }
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Option<String> {
        match self.request_completion(request).await {
            Ok(content) => Some(content),
            Err(error) => {
                warn!(%error, "failed to get LLM response");
                None
            }
        }
    }
}
