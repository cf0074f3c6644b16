use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(60);
pub const TITLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const ANSWER_MAX_TOKENS: u32 = 20_000;
pub const TITLE_MAX_TOKENS: u32 = 1_000;
pub const TITLE_MAX_WORDS: usize = 10;

const TITLE_SYSTEM_PROMPT: &str = "You are a helpful assistant that outputs a single concise title.";

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_completion_tokens: u32,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn answer(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_completion_tokens: ANSWER_MAX_TOKENS,
            timeout: ANSWER_TIMEOUT,
        }
    }

    pub fn title(prompt: impl Into<String>) -> Self {
        Self {
            system: Some(TITLE_SYSTEM_PROMPT.to_string()),
            prompt: prompt.into(),
            max_completion_tokens: TITLE_MAX_TOKENS,
            timeout: TITLE_TIMEOUT,
        }
    }
}

/// Chat-completion model. A timeout, a non-success status, or an empty reply
/// all come back as `None`.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Option<String>;
}

pub fn title_prompt(conversation_summary: &str) -> String {
    format!(
        "Generate a concise and descriptive title for the following chat conversation summary.\n\
         The title should be no longer than {TITLE_MAX_WORDS} words and should capture the main topic of the conversation.\n\
         Respond with only the title, without any additional text or formatting.\n\n\
         Conversation Summary:\n\
         {conversation_summary}\n\n\
         Output Format: <summary>"
    )
}

pub async fn generate_chat_title<C>(model: &C, query: &str) -> Option<String>
where
    C: CompletionModel + ?Sized,
{
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let reply = model.complete(&CompletionRequest::title(title_prompt(query))).await?;
    let title = truncate_words(reply.trim(), TITLE_MAX_WORDS);
    if title.is_empty() {
        debug!("title model returned blank content");
        return None;
    }

    Some(title)
}

fn truncate_words(text: &str, limit: usize) -> String {
    text.split_whitespace()
        .take(limit)
        .collect::<Vec<_>>()
        .join(" ")
}
