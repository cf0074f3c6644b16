use std::time::Duration;
use url::Url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-5-nano";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub embedding_timeout: Duration,
}

impl OpenAiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self
    }

    /// Resolves an endpoint path under the base URL. A missing trailing slash
    /// on the base would make `join` replace its last segment.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = if self.base_url.ends_with('/') {
            Url::parse(&self.base_url)?
        } else {
            Url::parse(&format!("{}/", self.base_url))?
        };
        base.join(path)
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            embedding_timeout: Duration::from_secs(30),
        }
    }
}
